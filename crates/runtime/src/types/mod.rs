//! Core identifiers and closed enumerations shared across every component.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::*;

/// Unique identifier for a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number assigned by the event log; strictly increasing, process-wide.
pub type Seq = u64;

/// `agent.*` / `finding.*` / ... event type, a closed set per the event log contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    AgentRegistered,
    AgentStatusUpdated,
    AgentCursorUpdated,
    AgentHeartbeat,
    FindingAdded,
    MessageSent,
    MessageRead,
    TaskAdded,
    TaskClaimed,
    TaskCompleted,
    QuestionAsked,
    QuestionAnswered,
    ContextSet,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegistered => "agent.registered",
            EventType::AgentStatusUpdated => "agent.status_updated",
            EventType::AgentCursorUpdated => "agent.cursor_updated",
            EventType::AgentHeartbeat => "agent.heartbeat",
            EventType::FindingAdded => "finding.added",
            EventType::MessageSent => "message.sent",
            EventType::MessageRead => "message.read",
            EventType::TaskAdded => "task.added",
            EventType::TaskClaimed => "task.claimed",
            EventType::TaskCompleted => "task.completed",
            EventType::QuestionAsked => "question.asked",
            EventType::QuestionAnswered => "question.answered",
            EventType::ContextSet => "context.set",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "agent.registered" => EventType::AgentRegistered,
            "agent.status_updated" => EventType::AgentStatusUpdated,
            "agent.cursor_updated" => EventType::AgentCursorUpdated,
            "agent.heartbeat" => EventType::AgentHeartbeat,
            "finding.added" => EventType::FindingAdded,
            "message.sent" => EventType::MessageSent,
            "message.read" => EventType::MessageRead,
            "task.added" => EventType::TaskAdded,
            "task.claimed" => EventType::TaskClaimed,
            "task.completed" => EventType::TaskCompleted,
            "question.asked" => EventType::QuestionAsked,
            "question.answered" => EventType::QuestionAnswered,
            "context.set" => EventType::ContextSet,
            _ => return None,
        })
    }
}

/// Status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Completed,
    Failed,
    Blocked,
}

/// Finding kind, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Discovery,
    Warning,
    Decision,
    Blocker,
    Fact,
    Hypothesis,
    Trail,
    Note,
}

/// Finding importance, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Normal,
    High,
    Critical,
}

/// Message kind, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Info,
    Question,
    Warning,
    Handoff,
}

/// Task status; legal transitions are pending -> in_progress -> completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// Question status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Open,
    Resolved,
}

/// Claim chain status; active chains are mutually exclusive over their file sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Completed,
    Expired,
    Released,
}

/// Heuristic lifecycle state. Archived/deprecated are terminal for automated processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicStatus {
    Active,
    Dormant,
    Archived,
    Deprecated,
}

/// Confidence update kind driving `update_confidence`'s raw-target formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Success,
    Failure,
    Contradiction,
    Decay,
    Revival,
}
