//! C9 — Replay & Workflow Engine: rebuilding conductor runs from a
//! checkpoint, plus the separate step-file workflow engine for
//! out-of-band long-running tasks (§4.9).

use chrono::Utc;
use std::sync::Arc;

use crate::knowledge::types::{ConductorDecision, NodeExecStatus, NodeExecution, WorkflowRun};
use crate::knowledge::KnowledgeStore;
use crate::types::error::ConductorError;

pub mod frontmatter;
pub mod step_workflow;

pub struct ReplayPlan {
    pub run_id: String,
    pub context: serde_json::Value,
    pub replayed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct ReplayEngine {
    store: Arc<KnowledgeStore>,
}

impl ReplayEngine {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    /// `get_replay_plan(run_id, from_node?)`.
    pub async fn get_replay_plan(&self, run_id: &str, from_node: Option<&str>) -> Result<ReplayPlan, ConductorError> {
        let run = self
            .store
            .get_workflow_run(run_id)
            .await?
            .ok_or_else(|| ConductorError::RunNotFound(run_id.to_string()))?;
        let mut executions = self.store.list_node_executions(run_id).await?;
        executions.sort_by_key(|e| e.created_at);

        let mut context = run.input.clone();
        let mut replayed = Vec::new();
        let mut skipped = Vec::new();
        let mut past_checkpoint = false;

        for exec in &executions {
            if exec.status != NodeExecStatus::Completed {
                continue;
            }
            if past_checkpoint {
                skipped.push(exec.node_id.clone());
                continue;
            }
            if let Some(result) = &exec.result_json {
                if let (serde_json::Value::Object(ctx), serde_json::Value::Object(map)) = (&mut context, result) {
                    for (k, v) in map {
                        ctx.insert(k.clone(), v.clone());
                    }
                }
            }
            replayed.push(exec.node_id.clone());
            if Some(exec.node_id.as_str()) == from_node {
                past_checkpoint = true;
            }
        }

        Ok(ReplayPlan { run_id: run_id.to_string(), context, replayed, skipped })
    }

    /// `create_replay_run(original_run_id, from_node?, include_context=true)`.
    pub async fn create_replay_run(
        &self,
        original_run_id: &str,
        from_node: Option<&str>,
        include_context: bool,
    ) -> Result<WorkflowRun, ConductorError> {
        let original = self
            .store
            .get_workflow_run(original_run_id)
            .await?
            .ok_or_else(|| ConductorError::RunNotFound(original_run_id.to_string()))?;
        let plan = self.get_replay_plan(original_run_id, from_node).await?;

        let new_run = WorkflowRun {
            id: uuid::Uuid::new_v4().to_string(),
            workflow: original.workflow.clone(),
            status: crate::knowledge::types::RunStatus::Running,
            phase: "replay".to_string(),
            input: original.input.clone(),
            context: if include_context { plan.context.clone() } else { original.input.clone() },
            total_nodes: 0,
            completed_nodes: 0,
            failed_nodes: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert_workflow_run(&new_run).await?;
        self.store
            .insert_conductor_decision(&ConductorDecision {
                id: uuid::Uuid::new_v4().to_string(),
                run_id: new_run.id.clone(),
                decision_type: "create_replay_run".to_string(),
                node_id: from_node.map(|s| s.to_string()),
                detail: serde_json::json!({
                    "original_run_id": original_run_id,
                    "replayed": plan.replayed,
                    "skipped": plan.skipped,
                    "include_context": include_context,
                }),
                created_at: Utc::now(),
            })
            .await?;
        Ok(new_run)
    }

    /// `retry_failed_nodes(run_id, dry_run)`.
    pub async fn retry_failed_nodes(&self, run_id: &str, dry_run: bool) -> Result<WorkflowRun, ConductorError> {
        let executions = self.store.list_node_executions(run_id).await?;
        let failed: Vec<&NodeExecution> = executions.iter().filter(|e| e.status == NodeExecStatus::Failed).collect();

        let replay_run = self.create_replay_run(run_id, None, true).await?;

        if !dry_run {
            for failed_exec in failed {
                let pending = NodeExecution {
                    id: uuid::Uuid::new_v4().to_string(),
                    run_id: replay_run.id.clone(),
                    node_id: failed_exec.node_id.clone(),
                    status: NodeExecStatus::Pending,
                    prompt_hash: failed_exec.prompt_hash.clone(),
                    result_text: None,
                    result_json: None,
                    findings_json: None,
                    files_modified: vec![],
                    duration_ms: None,
                    token_count: None,
                    error_type: None,
                    error_message: None,
                    retry_count: failed_exec.retry_count + 1,
                    created_at: Utc::now(),
                };
                self.store.insert_node_execution(&pending).await?;
            }
        }
        Ok(replay_run)
    }

    /// `reset_node(run_id, node_id)`.
    pub async fn reset_node(&self, run_id: &str, node_id: &str) -> Result<(), ConductorError> {
        let mut executions = self.store.list_node_executions(run_id).await?;
        executions.retain(|e| e.node_id == node_id);
        executions.sort_by_key(|e| e.created_at);
        let Some(mut exec) = executions.pop() else {
            return Err(ConductorError::NodeFailed { node_id: node_id.to_string(), reason: "no execution found".to_string() });
        };

        exec.status = NodeExecStatus::Pending;
        exec.result_text = None;
        exec.result_json = None;
        exec.error_type = None;
        exec.error_message = None;
        exec.retry_count += 1;
        self.store.update_node_execution(&exec).await?;

        self.store
            .insert_conductor_decision(&ConductorDecision {
                id: uuid::Uuid::new_v4().to_string(),
                run_id: run_id.to_string(),
                decision_type: "reset_node".to_string(),
                node_id: Some(node_id.to_string()),
                detail: serde_json::json!({ "retry_count": exec.retry_count }),
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::types::RunStatus;

    async fn seed_run(store: &KnowledgeStore) -> String {
        let run = WorkflowRun {
            id: "run-1".to_string(),
            workflow: "wf".to_string(),
            status: RunStatus::Completed,
            phase: "completed".to_string(),
            input: serde_json::json!({ "seed": true }),
            context: serde_json::json!({ "seed": true }),
            total_nodes: 2,
            completed_nodes: 1,
            failed_nodes: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_workflow_run(&run).await.unwrap();

        let ok = NodeExecution {
            id: "exec-a".to_string(),
            run_id: "run-1".to_string(),
            node_id: "a".to_string(),
            status: NodeExecStatus::Completed,
            prompt_hash: "h1".to_string(),
            result_text: Some("done".to_string()),
            result_json: Some(serde_json::json!({ "a_done": true })),
            findings_json: None,
            files_modified: vec![],
            duration_ms: Some(10),
            token_count: None,
            error_type: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        store.insert_node_execution(&ok).await.unwrap();

        let failed = NodeExecution {
            id: "exec-b".to_string(),
            run_id: "run-1".to_string(),
            node_id: "b".to_string(),
            status: NodeExecStatus::Failed,
            prompt_hash: "h2".to_string(),
            result_text: None,
            result_json: None,
            findings_json: None,
            files_modified: vec![],
            duration_ms: Some(5),
            token_count: None,
            error_type: Some("exception".to_string()),
            error_message: Some("boom".to_string()),
            retry_count: 0,
            created_at: Utc::now(),
        };
        store.insert_node_execution(&failed).await.unwrap();
        "run-1".to_string()
    }

    #[tokio::test]
    async fn replay_plan_folds_completed_results_into_context() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let run_id = seed_run(&store).await;
        let engine = ReplayEngine::new(store);

        let plan = engine.get_replay_plan(&run_id, None).await.unwrap();
        assert_eq!(plan.replayed, vec!["a".to_string()]);
        assert_eq!(plan.context["a_done"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn retry_failed_nodes_creates_pending_executions_on_replay_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let run_id = seed_run(&store).await;
        let engine = ReplayEngine::new(store.clone());

        let replay_run = engine.retry_failed_nodes(&run_id, false).await.unwrap();
        let executions = store.list_node_executions(&replay_run.id).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].node_id, "b");
        assert_eq!(executions[0].status, NodeExecStatus::Pending);
    }

    #[tokio::test]
    async fn reset_node_clears_error_and_bumps_retry_count() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let run_id = seed_run(&store).await;
        let engine = ReplayEngine::new(store.clone());

        engine.reset_node(&run_id, "b").await.unwrap();
        let executions = store.list_node_executions(&run_id).await.unwrap();
        let reset = executions.iter().find(|e| e.node_id == "b").unwrap();
        assert_eq!(reset.status, NodeExecStatus::Pending);
        assert_eq!(reset.retry_count, 1);
        assert!(reset.error_message.is_none());
    }
}
