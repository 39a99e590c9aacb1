//! C2 — Blackboard: a single JSON document giving agents a synchronous,
//! read-your-writes view of shared coordination state (§4.2). Writes are
//! guarded by `.blackboard.lock` and committed via temp-file + rename so a
//! reader never observes a partial document.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::{AgentRecord, BoardState, ClaimChain, Finding, Message, Question, Task};
use crate::types::error::BlackboardError;
use crate::types::{
    AgentStatus, ClaimStatus, FindingType, Importance, MessageType, QuestionStatus, TaskStatus,
};

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-document store rooted at `<project>/.coordination/blackboard.json`.
pub struct Blackboard {
    dir: PathBuf,
}

impl Blackboard {
    pub fn open(project_root: &Path) -> Result<Self, BlackboardError> {
        let dir = project_root.join(".coordination");
        std::fs::create_dir_all(&dir).map_err(|e| BlackboardError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn doc_path(&self) -> PathBuf {
        self.dir.join("blackboard.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(".blackboard.lock")
    }

    fn load(&self) -> Result<BoardState, BlackboardError> {
        let path = self.doc_path();
        if !path.exists() {
            return Ok(BoardState::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| BlackboardError::Io(e.to_string()))?;
        let mut state: BoardState =
            serde_json::from_str(&raw).map_err(|e| BlackboardError::Serialization(e.to_string()))?;
        state.expire_stale_chains(Utc::now());
        Ok(state)
    }

    /// Writes `state` to a temp file in the same directory, fsyncs, then
    /// renames over the document — the rename is the atomicity boundary a
    /// concurrent reader relies on (§4.2, §5).
    fn commit(&self, state: &BoardState) -> Result<(), BlackboardError> {
        let path = self.doc_path();
        let tmp_path = self.dir.join(format!(".blackboard.json.{}.tmp", std::process::id()));
        let json = serde_json::to_vec_pretty(state).map_err(|e| BlackboardError::Serialization(e.to_string()))?;
        {
            let mut file = std::fs::File::create(&tmp_path).map_err(|e| BlackboardError::Io(e.to_string()))?;
            use std::io::Write;
            file.write_all(&json).map_err(|e| BlackboardError::Io(e.to_string()))?;
            file.sync_all().map_err(|e| BlackboardError::Io(e.to_string()))?;
        }
        std::fs::rename(&tmp_path, &path).map_err(|e| BlackboardError::Io(e.to_string()))?;
        Ok(())
    }

    /// Runs `mutate` against the freshly-loaded state under an exclusive
    /// `.blackboard.lock`, then commits the result. Jittered retry on
    /// contention, bounded by `LOCK_TIMEOUT` (§5).
    fn with_lock<T>(
        &self,
        mutate: impl FnOnce(&mut BoardState) -> Result<T, BlackboardError>,
    ) -> Result<T, BlackboardError> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| BlackboardError::Io(e.to_string()))?;
        let mut locked = fd_lock::RwLock::new(lock_file);

        let start = std::time::Instant::now();
        let _guard = loop {
            match locked.try_write() {
                Ok(guard) => break guard,
                Err(_) => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        return Err(BlackboardError::LockTimeout {
                            timeout_secs: LOCK_TIMEOUT.as_secs(),
                        });
                    }
                    let jitter_ms = rand::thread_rng().gen_range(100..200);
                    std::thread::sleep(Duration::from_millis(jitter_ms));
                }
            }
        };

        let mut state = self.load()?;
        let result = mutate(&mut state)?;
        state.updated_at = Utc::now();
        self.commit(&state)?;
        Ok(result)
    }

    pub fn snapshot(&self) -> Result<BoardState, BlackboardError> {
        self.load()
    }

    // ---- agents -------------------------------------------------------

    pub fn register_agent(
        &self,
        agent_id: &str,
        task: &str,
        scope: Vec<String>,
        interests: Vec<String>,
    ) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let now = Utc::now();
            state.agents.insert(
                agent_id.to_string(),
                AgentRecord {
                    agent_id: agent_id.to_string(),
                    task: task.to_string(),
                    scope,
                    interests,
                    status: AgentStatus::Active,
                    started_at: now,
                    last_seen: now,
                    context_cursor: 0,
                    result: None,
                },
            );
            Ok(())
        })
    }

    pub fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        result: Option<serde_json::Value>,
    ) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("agent {agent_id}")))?;
            agent.status = status;
            agent.last_seen = Utc::now();
            if result.is_some() {
                agent.result = result;
            }
            Ok(())
        })
    }

    pub fn heartbeat(&self, agent_id: &str) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("agent {agent_id}")))?;
            agent.last_seen = Utc::now();
            Ok(())
        })
    }

    pub fn get_active_agents(&self) -> Result<HashMap<String, AgentRecord>, BlackboardError> {
        let state = self.load()?;
        Ok(state
            .agents
            .into_iter()
            .filter(|(_, a)| a.status == AgentStatus::Active)
            .collect())
    }

    pub fn get_all_agents(&self) -> Result<HashMap<String, AgentRecord>, BlackboardError> {
        Ok(self.load()?.agents)
    }

    /// Advances `agent_id`'s context cursor to the current finding count —
    /// call after injecting context so the next delta read starts from
    /// here. Returns the new cursor.
    pub fn update_agent_cursor(&self, agent_id: &str) -> Result<u64, BlackboardError> {
        self.with_lock(|state| {
            let cursor = state.findings.len() as u64;
            let agent = state
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("agent {agent_id}")))?;
            agent.context_cursor = cursor;
            agent.last_seen = Utc::now();
            Ok(cursor)
        })
    }

    pub fn get_agent_cursor(&self, agent_id: &str) -> Result<u64, BlackboardError> {
        Ok(self
            .load()?
            .agents
            .get(agent_id)
            .map(|a| a.context_cursor)
            .unwrap_or(0))
    }

    // ---- findings -------------------------------------------------------

    pub fn add_finding(
        &self,
        agent_id: &str,
        finding_type: FindingType,
        content: &str,
        files: Vec<String>,
        importance: Importance,
        tags: Vec<String>,
        ttl: Option<ChronoDuration>,
    ) -> Result<String, BlackboardError> {
        self.with_lock(|state| {
            let now = Utc::now();
            let id = format!("finding-{}", state.findings.len() + 1);
            state.findings.push(Finding {
                id: id.clone(),
                seq: state.findings.len() as u64 + 1,
                agent_id: agent_id.to_string(),
                finding_type,
                content: content.to_string(),
                files,
                importance,
                tags,
                timestamp: now,
                expires_at: ttl.map(|d| now + d),
            });
            Ok(id)
        })
    }

    /// Findings filtered by any combination of `since`/`finding_type`/
    /// `importance`; `None` skips that filter.
    pub fn get_findings(
        &self,
        since: Option<DateTime<Utc>>,
        finding_type: Option<FindingType>,
        importance: Option<Importance>,
    ) -> Result<Vec<Finding>, BlackboardError> {
        let state = self.load()?;
        Ok(state
            .findings
            .into_iter()
            .filter(|f| since.map_or(true, |s| f.timestamp > s))
            .filter(|f| finding_type.map_or(true, |t| f.finding_type == t))
            .filter(|f| importance.map_or(true, |i| f.importance == i))
            .collect())
    }

    /// Delta read: findings added after `cursor`, so a caller only sees
    /// what's new since it last checked.
    pub fn get_findings_since_cursor(&self, cursor: u64) -> Result<Vec<Finding>, BlackboardError> {
        let state = self.load()?;
        let cursor = cursor as usize;
        Ok(if cursor < state.findings.len() {
            state.findings[cursor..].to_vec()
        } else {
            Vec::new()
        })
    }

    pub fn get_critical_findings(&self) -> Result<Vec<Finding>, BlackboardError> {
        let state = self.load()?;
        Ok(state
            .findings
            .into_iter()
            .filter(|f| f.importance == Importance::Critical || f.finding_type == FindingType::Blocker)
            .collect())
    }

    /// Findings whose tags or content match any of `interests` (case-insensitive).
    pub fn get_findings_for_interests(&self, interests: &[String]) -> Result<Vec<Finding>, BlackboardError> {
        if interests.is_empty() {
            return Ok(Vec::new());
        }
        let interests_lower: Vec<String> = interests.iter().map(|i| i.to_lowercase()).collect();
        let state = self.load()?;
        Ok(state
            .findings
            .into_iter()
            .filter(|f| {
                let tags_lower: Vec<String> = f.tags.iter().map(|t| t.to_lowercase()).collect();
                let content_lower = f.content.to_lowercase();
                interests_lower
                    .iter()
                    .any(|i| tags_lower.contains(i) || content_lower.contains(i.as_str()))
            })
            .collect())
    }

    /// Substring match on finding content/tags, capped at `limit` hits.
    /// Basic keyword matching only — no semantic search.
    pub fn search_findings(&self, query: &str, limit: usize) -> Result<Vec<Finding>, BlackboardError> {
        let query_lower = query.to_lowercase();
        let state = self.load()?;
        Ok(state
            .findings
            .into_iter()
            .filter(|f| {
                f.content.to_lowercase().contains(&query_lower)
                    || f.tags.iter().any(|t| t.to_lowercase().contains(&query_lower))
            })
            .take(limit)
            .collect())
    }

    // ---- messages -------------------------------------------------------

    pub fn send_message(
        &self,
        from: &str,
        to: &str,
        message_type: MessageType,
        content: &str,
    ) -> Result<String, BlackboardError> {
        self.with_lock(|state| {
            let id = uuid::Uuid::new_v4().to_string();
            state.messages.push(Message {
                id: id.clone(),
                from: from.to_string(),
                to: to.to_string(),
                message_type,
                content: content.to_string(),
                read: false,
                timestamp: Utc::now(),
            });
            Ok(id)
        })
    }

    pub fn mark_message_read(&self, message_id: &str) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("message {message_id}")))?;
            message.read = true;
            Ok(())
        })
    }

    // ---- tasks -------------------------------------------------------

    pub fn add_task(
        &self,
        task: &str,
        priority: u8,
        depends_on: Vec<String>,
    ) -> Result<String, BlackboardError> {
        self.with_lock(|state| {
            let now = Utc::now();
            let id = uuid::Uuid::new_v4().to_string();
            state.task_queue.push(Task {
                id: id.clone(),
                task: task.to_string(),
                priority,
                depends_on,
                assigned_to: None,
                status: TaskStatus::Pending,
                created_at: now,
                updated_at: now,
            });
            Ok(id)
        })
    }

    /// Claims the highest-priority unassigned task whose dependencies are
    /// all completed; `None` if nothing is claimable right now.
    pub fn claim_task(&self, agent_id: &str) -> Result<Option<String>, BlackboardError> {
        self.with_lock(|state| {
            let completed: std::collections::HashSet<String> = state
                .task_queue
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .map(|t| t.id.clone())
                .collect();

            let claimable_id = state
                .task_queue
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .filter(|t| t.depends_on.iter().all(|dep| completed.contains(dep)))
                .max_by_key(|t| t.priority)
                .map(|t| t.id.clone());

            if let Some(id) = &claimable_id {
                let now = Utc::now();
                let t = state.task_queue.iter_mut().find(|t| &t.id == id).unwrap();
                t.status = TaskStatus::InProgress;
                t.assigned_to = Some(agent_id.to_string());
                t.updated_at = now;
            }
            Ok(claimable_id)
        })
    }

    pub fn complete_task(&self, task_id: &str) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let task = state
                .task_queue
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("task {task_id}")))?;
            task.status = TaskStatus::Completed;
            task.updated_at = Utc::now();
            Ok(())
        })
    }

    // ---- questions -------------------------------------------------------

    pub fn ask_question(
        &self,
        agent_id: &str,
        question: &str,
        options: Option<Vec<String>>,
        blocking: bool,
    ) -> Result<String, BlackboardError> {
        self.with_lock(|state| {
            let now = Utc::now();
            let id = uuid::Uuid::new_v4().to_string();
            state.questions.push(Question {
                id: id.clone(),
                agent_id: agent_id.to_string(),
                question: question.to_string(),
                options,
                blocking,
                status: QuestionStatus::Open,
                answer: None,
                answered_by: None,
                created_at: now,
                updated_at: now,
            });
            Ok(id)
        })
    }

    pub fn answer_question(
        &self,
        question_id: &str,
        answer: &str,
        answered_by: &str,
    ) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let question = state
                .questions
                .iter_mut()
                .find(|q| q.id == question_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("question {question_id}")))?;
            question.status = QuestionStatus::Resolved;
            question.answer = Some(answer.to_string());
            question.answered_by = Some(answered_by.to_string());
            question.updated_at = Utc::now();
            Ok(())
        })
    }

    // ---- context -------------------------------------------------------

    pub fn set_context(&self, key: &str, value: serde_json::Value) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            state.context.insert(key.to_string(), value);
            Ok(())
        })
    }

    // ---- claim chains -------------------------------------------------------

    /// Atomically checks that no active chain overlaps `files`, under the
    /// same lock as the insert — the mutual-exclusion invariant from §4.2.
    /// On conflict, returns `Blocked` naming every blocking chain and the
    /// overlapping files, so a caller can decide whether to wait or route
    /// around it.
    pub fn claim_chain(
        &self,
        agent_id: &str,
        files: Vec<String>,
        reason: &str,
        ttl_minutes: i64,
    ) -> Result<String, BlackboardError> {
        self.with_lock(|state| {
            let now = Utc::now();
            state.expire_stale_chains(now);
            let requested: std::collections::HashSet<String> =
                files.iter().map(|f| normalize_path(f)).collect();

            let mut blocking_ids = Vec::new();
            let mut overlapping = std::collections::HashSet::new();
            for chain in state.claim_chains.iter().filter(|c| c.status == ClaimStatus::Active) {
                let overlap: Vec<&String> = chain.files.intersection(&requested).collect();
                if !overlap.is_empty() {
                    blocking_ids.push(chain.chain_id.clone());
                    for f in overlap {
                        overlapping.insert(f.clone());
                    }
                }
            }
            if !blocking_ids.is_empty() {
                let overlapping: Vec<String> = overlapping.into_iter().collect();
                let file_count = overlapping.len();
                return Err(BlackboardError::Blocked {
                    blocking_chain_ids: blocking_ids,
                    overlapping_files: overlapping,
                    file_count,
                });
            }

            let chain_id = uuid::Uuid::new_v4().to_string();
            state.claim_chains.push(ClaimChain {
                chain_id: chain_id.clone(),
                agent_id: agent_id.to_string(),
                files: requested,
                reason: reason.to_string(),
                claimed_at: now,
                expires_at: now + ChronoDuration::minutes(ttl_minutes),
                status: ClaimStatus::Active,
            });
            Ok(chain_id)
        })
    }

    pub fn release_chain(&self, chain_id: &str, agent_id: &str) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let chain = state
                .claim_chains
                .iter_mut()
                .find(|c| c.chain_id == chain_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("claim chain {chain_id}")))?;
            if chain.agent_id != agent_id {
                return Err(BlackboardError::NotOwner {
                    chain_id: chain_id.to_string(),
                    agent_id: agent_id.to_string(),
                });
            }
            chain.status = ClaimStatus::Released;
            Ok(())
        })
    }

    pub fn complete_chain(&self, chain_id: &str, agent_id: &str) -> Result<(), BlackboardError> {
        self.with_lock(|state| {
            let chain = state
                .claim_chains
                .iter_mut()
                .find(|c| c.chain_id == chain_id)
                .ok_or_else(|| BlackboardError::NotFound(format!("claim chain {chain_id}")))?;
            if chain.agent_id != agent_id {
                return Err(BlackboardError::NotOwner {
                    chain_id: chain_id.to_string(),
                    agent_id: agent_id.to_string(),
                });
            }
            chain.status = ClaimStatus::Completed;
            Ok(())
        })
    }

    /// Active chains that overlap any of `files`. `load()` has already
    /// expired anything past its TTL.
    pub fn get_blocking_chains(&self, files: &[String]) -> Result<Vec<ClaimChain>, BlackboardError> {
        let state = self.load()?;
        let requested: std::collections::HashSet<String> = files.iter().map(|f| normalize_path(f)).collect();
        Ok(state
            .claim_chains
            .into_iter()
            .filter(|c| c.status == ClaimStatus::Active && !c.files.is_disjoint(&requested))
            .collect())
    }

    /// The active claim chain containing `file_path`, if any.
    pub fn get_claim_for_file(&self, file_path: &str) -> Result<Option<ClaimChain>, BlackboardError> {
        let state = self.load()?;
        let normalized = normalize_path(file_path);
        Ok(state
            .claim_chains
            .into_iter()
            .find(|c| c.status == ClaimStatus::Active && c.files.contains(&normalized)))
    }

    pub fn get_agent_chains(&self, agent_id: &str) -> Result<Vec<ClaimChain>, BlackboardError> {
        let state = self.load()?;
        Ok(state.claim_chains.into_iter().filter(|c| c.agent_id == agent_id).collect())
    }

    pub fn get_all_active_chains(&self) -> Result<Vec<ClaimChain>, BlackboardError> {
        let state = self.load()?;
        Ok(state
            .claim_chains
            .into_iter()
            .filter(|c| c.status == ClaimStatus::Active)
            .collect())
    }
}

fn normalize_path(p: &str) -> String {
    p.trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, Blackboard) {
        let dir = tempfile::tempdir().unwrap();
        let board = Blackboard::open(dir.path()).unwrap();
        (dir, board)
    }

    #[test]
    fn register_and_read_back_agent() {
        let (_dir, board) = open_tmp();
        board
            .register_agent("a1", "explore repo", vec!["src/**".into()], vec!["perf".into()])
            .unwrap();
        let state = board.snapshot().unwrap();
        assert_eq!(state.agents["a1"].task, "explore repo");
    }

    #[test]
    fn overlapping_claim_chains_are_blocked() {
        let (_dir, board) = open_tmp();
        board.register_agent("a1", "t", vec![], vec![]).unwrap();
        board.register_agent("a2", "t", vec![], vec![]).unwrap();
        board
            .claim_chain("a1", vec!["src/lib.rs".into()], "refactor", 30)
            .unwrap();
        let err = board
            .claim_chain("a2", vec!["src/lib.rs".into(), "src/main.rs".into()], "also refactor", 30)
            .unwrap_err();
        match err {
            BlackboardError::Blocked {
                blocking_chain_ids,
                overlapping_files,
                file_count,
            } => {
                assert_eq!(blocking_chain_ids.len(), 1);
                assert_eq!(overlapping_files, vec!["src/lib.rs".to_string()]);
                assert_eq!(file_count, 1);
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn disjoint_claim_chains_both_succeed() {
        let (_dir, board) = open_tmp();
        board.claim_chain("a1", vec!["src/a.rs".into()], "x", 30).unwrap();
        let second = board.claim_chain("a2", vec!["src/b.rs".into()], "y", 30);
        assert!(second.is_ok());
    }

    #[test]
    fn releasing_a_chain_frees_its_files() {
        let (_dir, board) = open_tmp();
        let chain_id = board.claim_chain("a1", vec!["src/a.rs".into()], "x", 30).unwrap();
        board.release_chain(&chain_id, "a1").unwrap();
        let second = board.claim_chain("a2", vec!["src/a.rs".into()], "y", 30);
        assert!(second.is_ok());
    }

    #[test]
    fn claim_task_respects_priority_and_dependencies() {
        let (_dir, board) = open_tmp();
        let low = board.add_task("low prio", 1, vec![]).unwrap();
        let high = board.add_task("high prio", 9, vec![low.clone()]).unwrap();
        let _ = high;
        let claimed = board.claim_task("a1").unwrap();
        assert_eq!(claimed, Some(low));
    }

    #[test]
    fn non_owner_cannot_release_a_chain() {
        let (_dir, board) = open_tmp();
        let chain_id = board.claim_chain("a1", vec!["src/a.rs".into()], "x", 30).unwrap();
        let err = board.release_chain(&chain_id, "a2").unwrap_err();
        assert!(matches!(err, BlackboardError::NotOwner { .. }));
    }

    #[test]
    fn claim_chain_respects_caller_supplied_ttl() {
        let (_dir, board) = open_tmp();
        let chain_id = board.claim_chain("a1", vec!["src/a.rs".into()], "x", 5).unwrap();
        let state = board.snapshot().unwrap();
        let chain = state.claim_chains.iter().find(|c| c.chain_id == chain_id).unwrap();
        let ttl = chain.expires_at - chain.claimed_at;
        assert_eq!(ttl.num_minutes(), 5);
    }

    #[test]
    fn agent_cursor_tracks_finding_count() {
        let (_dir, board) = open_tmp();
        board.register_agent("a1", "t", vec![], vec![]).unwrap();
        assert_eq!(board.get_agent_cursor("a1").unwrap(), 0);
        board
            .add_finding("a2", FindingType::Discovery, "x", vec![], Importance::Normal, vec![], None)
            .unwrap();
        let cursor = board.update_agent_cursor("a1").unwrap();
        assert_eq!(cursor, 1);
        assert_eq!(board.get_agent_cursor("a1").unwrap(), 1);
    }

    #[test]
    fn get_findings_since_cursor_returns_only_new_findings() {
        let (_dir, board) = open_tmp();
        board
            .add_finding("a1", FindingType::Discovery, "first", vec![], Importance::Normal, vec![], None)
            .unwrap();
        board
            .add_finding("a1", FindingType::Discovery, "second", vec![], Importance::Normal, vec![], None)
            .unwrap();
        let delta = board.get_findings_since_cursor(1).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].content, "second");
    }

    #[test]
    fn critical_findings_include_blockers_and_critical_importance() {
        let (_dir, board) = open_tmp();
        board
            .add_finding("a1", FindingType::Blocker, "blocked", vec![], Importance::Normal, vec![], None)
            .unwrap();
        board
            .add_finding("a1", FindingType::Fact, "urgent", vec![], Importance::Critical, vec![], None)
            .unwrap();
        board
            .add_finding("a1", FindingType::Fact, "routine", vec![], Importance::Low, vec![], None)
            .unwrap();
        let critical = board.get_critical_findings().unwrap();
        assert_eq!(critical.len(), 2);
    }

    #[test]
    fn search_findings_matches_content_case_insensitively() {
        let (_dir, board) = open_tmp();
        board
            .add_finding("a1", FindingType::Discovery, "found a JWT bug", vec![], Importance::Normal, vec![], None)
            .unwrap();
        let hits = board.search_findings("jwt", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn get_blocking_chains_and_claim_for_file_report_active_claims() {
        let (_dir, board) = open_tmp();
        let chain_id = board.claim_chain("a1", vec!["src/a.rs".into()], "x", 30).unwrap();
        let blocking = board.get_blocking_chains(&["src/a.rs".to_string()]).unwrap();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].chain_id, chain_id);
        let claim = board.get_claim_for_file("src/a.rs").unwrap();
        assert_eq!(claim.unwrap().chain_id, chain_id);
        assert!(board.get_claim_for_file("src/other.rs").unwrap().is_none());
    }

    #[test]
    fn get_all_active_chains_excludes_released() {
        let (_dir, board) = open_tmp();
        let chain_id = board.claim_chain("a1", vec!["src/a.rs".into()], "x", 30).unwrap();
        board.claim_chain("a2", vec!["src/b.rs".into()], "y", 30).unwrap();
        board.release_chain(&chain_id, "a1").unwrap();
        let active = board.get_all_active_chains().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(board.get_agent_chains("a1").unwrap().len(), 1);
    }
}
