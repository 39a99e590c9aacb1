//! The step-file workflow engine: a separate flavor used by out-of-band
//! long-running tasks. State lives in the output file's frontmatter
//! (`workflow_status`, `steps_completed`, `current_step`, `checkpoints`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::frontmatter;
use crate::types::error::ConductorError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StepState {
    pub status: WorkflowStatus,
    pub steps_completed: Vec<u32>,
    pub current_step: Option<u32>,
    pub checkpoints: Vec<Checkpoint>,
    pub pause_reason: Option<String>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            status: WorkflowStatus::NotStarted,
            steps_completed: vec![],
            current_step: None,
            checkpoints: vec![],
            pause_reason: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowManifest {
    #[allow(dead_code)]
    name: String,
    total_steps: u32,
}

pub struct StepWorkflow {
    dir: PathBuf,
    total_steps: u32,
}

impl StepWorkflow {
    pub fn open(dir: &Path) -> Result<Self, ConductorError> {
        let manifest_path = dir.join("workflow.yaml");
        let raw = std::fs::read_to_string(&manifest_path).map_err(|e| ConductorError::Io(e.to_string()))?;
        let manifest: WorkflowManifest = serde_yaml::from_str(&raw).map_err(|e| ConductorError::Io(e.to_string()))?;
        Ok(Self { dir: dir.to_path_buf(), total_steps: manifest.total_steps })
    }

    fn output_path(&self) -> PathBuf {
        self.dir.join("output.md")
    }

    fn read_state(&self) -> Result<(StepState, String), ConductorError> {
        let path = self.output_path();
        if !path.exists() {
            return Ok((StepState::default(), String::new()));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ConductorError::Io(e.to_string()))?;
        let (fm, body) = frontmatter::parse(&content);
        Ok((state_from_map(&fm), body))
    }

    fn write_state(&self, state: &StepState, body: &str) -> Result<(), ConductorError> {
        let map = state_to_map(state);
        let rendered = frontmatter::format(&map) + body;
        std::fs::write(self.output_path(), rendered).map_err(|e| ConductorError::Io(e.to_string()))
    }

    /// `start()`.
    pub fn start(&self) -> Result<StepState, ConductorError> {
        let (existing, _) = self.read_state()?;
        if existing.status != WorkflowStatus::NotStarted {
            return Err(ConductorError::InvalidState(format!("workflow already {:?}", existing.status)));
        }
        let state = StepState { status: WorkflowStatus::InProgress, current_step: Some(1), ..Default::default() };
        self.write_state(&state, "")?;
        Ok(state)
    }

    /// `resume(from_step?)`.
    pub fn resume(&self, from_step: Option<u32>) -> Result<StepState, ConductorError> {
        let (mut state, body) = self.read_state()?;
        if !matches!(state.status, WorkflowStatus::InProgress | WorkflowStatus::Paused) {
            return Err(ConductorError::InvalidState(format!("cannot resume from {:?}", state.status)));
        }
        state.status = WorkflowStatus::InProgress;
        state.pause_reason = None;
        state.current_step = from_step.or(state.current_step).or(Some(1));
        self.write_state(&state, &body)?;
        Ok(state)
    }

    /// `complete_step(step_num, output?)`.
    pub fn complete_step(&self, step_num: u32, output: Option<&str>) -> Result<StepState, ConductorError> {
        let (mut state, mut body) = self.read_state()?;
        if state.status != WorkflowStatus::InProgress {
            return Err(ConductorError::InvalidState(format!("cannot complete a step while {:?}", state.status)));
        }
        if !state.steps_completed.contains(&step_num) {
            state.steps_completed.push(step_num);
            state.steps_completed.sort_unstable();
        }
        state.checkpoints.push(Checkpoint { step: step_num, completed_at: Utc::now() });
        state.current_step = Some(step_num + 1);
        if let Some(text) = output {
            body.push_str(text);
            body.push('\n');
        }
        if state.steps_completed.len() as u32 >= self.total_steps {
            state.status = WorkflowStatus::Completed;
            state.current_step = None;
        }
        self.write_state(&state, &body)?;
        Ok(state)
    }

    /// `pause(reason?)`.
    pub fn pause(&self, reason: Option<&str>) -> Result<StepState, ConductorError> {
        let (mut state, body) = self.read_state()?;
        if state.status != WorkflowStatus::InProgress {
            return Err(ConductorError::InvalidState(format!("cannot pause from {:?}", state.status)));
        }
        state.status = WorkflowStatus::Paused;
        state.pause_reason = reason.map(|s| s.to_string());
        self.write_state(&state, &body)?;
        Ok(state)
    }

    /// `can_resume()`: true iff status is in_progress/paused and pending steps exist.
    pub fn can_resume(&self) -> bool {
        let Ok((state, _)) = self.read_state() else { return false };
        matches!(state.status, WorkflowStatus::InProgress | WorkflowStatus::Paused)
            && (state.steps_completed.len() as u32) < self.total_steps
    }
}

fn state_from_map(map: &BTreeMap<String, Value>) -> StepState {
    let status = map
        .get("workflow_status")
        .and_then(|v| v.as_str())
        .and_then(|s| match s {
            "not_started" => Some(WorkflowStatus::NotStarted),
            "in_progress" => Some(WorkflowStatus::InProgress),
            "paused" => Some(WorkflowStatus::Paused),
            "completed" => Some(WorkflowStatus::Completed),
            _ => None,
        })
        .unwrap_or(WorkflowStatus::NotStarted);
    let steps_completed = map
        .get("steps_completed")
        .and_then(|v| v.as_sequence())
        .map(|seq| seq.iter().filter_map(|x| x.as_u64()).map(|n| n as u32).collect())
        .unwrap_or_default();
    let current_step = map.get("current_step").and_then(|v| v.as_u64()).map(|n| n as u32);
    let checkpoints = map
        .get("checkpoints")
        .and_then(|v| serde_yaml::from_value::<Vec<Checkpoint>>(v.clone()).ok())
        .unwrap_or_default();
    let pause_reason = map.get("pause_reason").and_then(|v| v.as_str()).map(|s| s.to_string());
    StepState { status, steps_completed, current_step, checkpoints, pause_reason }
}

fn state_to_map(state: &StepState) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    let status_str = match state.status {
        WorkflowStatus::NotStarted => "not_started",
        WorkflowStatus::InProgress => "in_progress",
        WorkflowStatus::Paused => "paused",
        WorkflowStatus::Completed => "completed",
    };
    map.insert("workflow_status".to_string(), Value::String(status_str.to_string()));
    map.insert(
        "steps_completed".to_string(),
        Value::Sequence(state.steps_completed.iter().map(|n| Value::Number((*n as u64).into())).collect()),
    );
    if let Some(step) = state.current_step {
        map.insert("current_step".to_string(), Value::Number((step as u64).into()));
    }
    map.insert(
        "checkpoints".to_string(),
        serde_yaml::to_value(&state.checkpoints).unwrap_or(Value::Sequence(vec![])),
    );
    if let Some(reason) = &state.pause_reason {
        map.insert("pause_reason".to_string(), Value::String(reason.clone()));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(total_steps: u32) -> (tempfile::TempDir, StepWorkflow) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("workflow.yaml"), format!("name: demo\ntotal_steps: {total_steps}\n")).unwrap();
        let wf = StepWorkflow::open(tmp.path()).unwrap();
        (tmp, wf)
    }

    #[test]
    fn start_then_complete_all_steps_marks_completed() {
        let (_tmp, wf) = setup(2);
        wf.start().unwrap();
        wf.complete_step(1, Some("step one output")).unwrap();
        let final_state = wf.complete_step(2, Some("step two output")).unwrap();
        assert_eq!(final_state.status, WorkflowStatus::Completed);
        assert_eq!(final_state.steps_completed, vec![1, 2]);
    }

    #[test]
    fn pause_then_resume_preserves_progress() {
        let (_tmp, wf) = setup(3);
        wf.start().unwrap();
        wf.complete_step(1, None).unwrap();
        wf.pause(Some("waiting on review")).unwrap();
        assert!(wf.can_resume());
        let resumed = wf.resume(None).unwrap();
        assert_eq!(resumed.status, WorkflowStatus::InProgress);
        assert_eq!(resumed.steps_completed, vec![1]);
    }

    #[test]
    fn can_resume_is_false_once_completed() {
        let (_tmp, wf) = setup(1);
        wf.start().unwrap();
        wf.complete_step(1, None).unwrap();
        assert!(!wf.can_resume());
    }

    #[test]
    fn double_start_is_rejected() {
        let (_tmp, wf) = setup(1);
        wf.start().unwrap();
        assert!(wf.start().is_err());
    }
}
