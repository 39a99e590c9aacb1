//! The coordination state shape shared by the blackboard (C2, which persists
//! it directly) and the event log (C1, which can fold events into the same
//! shape for `current_state`/replay-equivalence, §8 property 2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::{
    AgentStatus, ClaimStatus, EventType, FindingType, Importance, MessageType, QuestionStatus,
    TaskStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub task: String,
    pub scope: Vec<String>,
    pub interests: Vec<String>,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub context_cursor: u64,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub seq: u64,
    pub agent_id: String,
    pub finding_type: FindingType,
    pub content: String,
    pub files: Vec<String>,
    pub importance: Importance,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub message_type: MessageType,
    pub content: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task: String,
    pub priority: u8,
    pub depends_on: Vec<String>,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub agent_id: String,
    pub question: String,
    pub options: Option<Vec<String>>,
    pub blocking: bool,
    pub status: QuestionStatus,
    pub answer: Option<String>,
    pub answered_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimChain {
    pub chain_id: String,
    pub agent_id: String,
    pub files: HashSet<String>,
    pub reason: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ClaimStatus,
}

/// The document persisted at `blackboard.json`; also the shape produced by
/// folding the event log from `seq=0` (§8 property 2: the two must agree up
/// to timestamps and `updated_at`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardState {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agents: HashMap<String, AgentRecord>,
    pub findings: Vec<Finding>,
    pub messages: Vec<Message>,
    pub task_queue: Vec<Task>,
    pub questions: Vec<Question>,
    pub context: HashMap<String, serde_json::Value>,
    pub claim_chains: Vec<ClaimChain>,
}

impl Default for BoardState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: 1,
            created_at: now,
            updated_at: now,
            agents: HashMap::new(),
            findings: Vec::new(),
            messages: Vec::new(),
            task_queue: Vec::new(),
            questions: Vec::new(),
            context: HashMap::new(),
            claim_chains: Vec::new(),
        }
    }
}

impl BoardState {
    /// Normalizes an active-chain's expiry lazily, matching the blackboard's
    /// "expired active chains are marked expired on any read that inspects
    /// chains" behavior (§4.2).
    pub fn expire_stale_chains(&mut self, now: DateTime<Utc>) {
        for chain in self.claim_chains.iter_mut() {
            if chain.status == ClaimStatus::Active && chain.expires_at <= now {
                chain.status = ClaimStatus::Expired;
            }
        }
    }

    /// Folds one event's `(type, data)` payload into the state, per the
    /// closed dispatch table in §4.1. Unknown types are skipped (a warning
    /// is expected to have already been logged by the caller).
    pub fn apply(&mut self, event_type: EventType, ts: DateTime<Utc>, data: &serde_json::Value) {
        self.updated_at = ts;
        match event_type {
            EventType::AgentRegistered => {
                if let Some(record) = parse_agent_record(data, ts) {
                    self.agents.insert(record.agent_id.clone(), record);
                }
            }
            EventType::AgentStatusUpdated => {
                if let (Some(id), Some(status)) = (
                    data.get("agent_id").and_then(|v| v.as_str()),
                    data.get("status").and_then(|v| v.as_str()),
                ) {
                    if let Some(agent) = self.agents.get_mut(id) {
                        agent.status = parse_agent_status(status);
                        agent.last_seen = ts;
                    }
                }
            }
            EventType::AgentCursorUpdated => {
                if let (Some(id), Some(cursor)) = (
                    data.get("agent_id").and_then(|v| v.as_str()),
                    data.get("cursor").and_then(|v| v.as_u64()),
                ) {
                    if let Some(agent) = self.agents.get_mut(id) {
                        agent.context_cursor = cursor;
                    }
                }
            }
            EventType::AgentHeartbeat => {
                if let Some(id) = data.get("agent_id").and_then(|v| v.as_str()) {
                    if let Some(agent) = self.agents.get_mut(id) {
                        agent.last_seen = ts;
                    }
                }
            }
            EventType::FindingAdded => {
                if let Some(finding) = parse_finding(data, ts) {
                    self.findings.push(finding);
                }
            }
            EventType::MessageSent => {
                if let Some(message) = parse_message(data, ts) {
                    self.messages.push(message);
                }
            }
            EventType::MessageRead => {
                if let Some(id) = data.get("message_id").and_then(|v| v.as_str()) {
                    if let Some(m) = self.messages.iter_mut().find(|m| m.id == id) {
                        m.read = true;
                    }
                }
            }
            EventType::TaskAdded => {
                if let Some(task) = parse_task(data, ts) {
                    self.task_queue.push(task);
                }
            }
            EventType::TaskClaimed => {
                if let (Some(id), Some(agent_id)) = (
                    data.get("task_id").and_then(|v| v.as_str()),
                    data.get("agent_id").and_then(|v| v.as_str()),
                ) {
                    if let Some(t) = self.task_queue.iter_mut().find(|t| t.id == id) {
                        if t.status == TaskStatus::Pending {
                            t.status = TaskStatus::InProgress;
                            t.assigned_to = Some(agent_id.to_string());
                            t.updated_at = ts;
                        }
                    }
                }
            }
            EventType::TaskCompleted => {
                if let Some(id) = data.get("task_id").and_then(|v| v.as_str()) {
                    if let Some(t) = self.task_queue.iter_mut().find(|t| t.id == id) {
                        t.status = TaskStatus::Completed;
                        t.updated_at = ts;
                    }
                }
            }
            EventType::QuestionAsked => {
                if let Some(question) = parse_question(data, ts) {
                    self.questions.push(question);
                }
            }
            EventType::QuestionAnswered => {
                if let Some(id) = data.get("question_id").and_then(|v| v.as_str()) {
                    if let Some(q) = self.questions.iter_mut().find(|q| q.id == id) {
                        q.status = QuestionStatus::Resolved;
                        q.answer = data
                            .get("answer")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());
                        q.answered_by = data
                            .get("answered_by")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());
                        q.updated_at = ts;
                    }
                }
            }
            EventType::ContextSet => {
                if let (Some(key), Some(value)) = (data.get("key").and_then(|v| v.as_str()), data.get("value")) {
                    self.context.insert(key.to_string(), value.clone());
                }
            }
        }
    }
}

fn parse_agent_status(s: &str) -> AgentStatus {
    match s {
        "completed" => AgentStatus::Completed,
        "failed" => AgentStatus::Failed,
        "blocked" => AgentStatus::Blocked,
        _ => AgentStatus::Active,
    }
}

fn parse_agent_record(data: &serde_json::Value, ts: DateTime<Utc>) -> Option<AgentRecord> {
    Some(AgentRecord {
        agent_id: data.get("agent_id")?.as_str()?.to_string(),
        task: data.get("task").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        scope: str_vec(data.get("scope")),
        interests: str_vec(data.get("interests")),
        status: AgentStatus::Active,
        started_at: ts,
        last_seen: ts,
        context_cursor: 0,
        result: None,
    })
}

fn parse_finding(data: &serde_json::Value, ts: DateTime<Utc>) -> Option<Finding> {
    let seq = data.get("seq")?.as_u64()?;
    Some(Finding {
        id: format!("finding-{seq}"),
        seq,
        agent_id: data.get("agent_id")?.as_str()?.to_string(),
        finding_type: parse_finding_type(data.get("finding_type").and_then(|v| v.as_str()).unwrap_or("note")),
        content: data.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        files: str_vec(data.get("files")),
        importance: parse_importance(data.get("importance").and_then(|v| v.as_str()).unwrap_or("normal")),
        tags: str_vec(data.get("tags")),
        timestamp: ts,
        expires_at: None,
    })
}

fn parse_finding_type(s: &str) -> FindingType {
    match s {
        "discovery" => FindingType::Discovery,
        "warning" => FindingType::Warning,
        "decision" => FindingType::Decision,
        "blocker" => FindingType::Blocker,
        "fact" => FindingType::Fact,
        "hypothesis" => FindingType::Hypothesis,
        "trail" => FindingType::Trail,
        _ => FindingType::Note,
    }
}

fn parse_importance(s: &str) -> Importance {
    match s {
        "low" => Importance::Low,
        "high" => Importance::High,
        "critical" => Importance::Critical,
        _ => Importance::Normal,
    }
}

fn parse_message(data: &serde_json::Value, ts: DateTime<Utc>) -> Option<Message> {
    Some(Message {
        id: data.get("id")?.as_str()?.to_string(),
        from: data.get("from")?.as_str()?.to_string(),
        to: data.get("to").and_then(|v| v.as_str()).unwrap_or("*").to_string(),
        message_type: match data.get("message_type").and_then(|v| v.as_str()).unwrap_or("info") {
            "question" => MessageType::Question,
            "warning" => MessageType::Warning,
            "handoff" => MessageType::Handoff,
            _ => MessageType::Info,
        },
        content: data.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        read: false,
        timestamp: ts,
    })
}

fn parse_task(data: &serde_json::Value, ts: DateTime<Utc>) -> Option<Task> {
    Some(Task {
        id: data.get("id")?.as_str()?.to_string(),
        task: data.get("task").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        priority: data.get("priority").and_then(|v| v.as_u64()).unwrap_or(5) as u8,
        depends_on: str_vec(data.get("depends_on")),
        assigned_to: None,
        status: TaskStatus::Pending,
        created_at: ts,
        updated_at: ts,
    })
}

fn parse_question(data: &serde_json::Value, ts: DateTime<Utc>) -> Option<Question> {
    Some(Question {
        id: data.get("id")?.as_str()?.to_string(),
        agent_id: data.get("agent_id")?.as_str()?.to_string(),
        question: data.get("question").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        options: data
            .get("options")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect()),
        blocking: data.get("blocking").and_then(|v| v.as_bool()).unwrap_or(false),
        status: QuestionStatus::Open,
        answer: None,
        answered_by: None,
        created_at: ts,
        updated_at: ts,
    })
}

fn str_vec(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}
