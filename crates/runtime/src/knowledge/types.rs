//! Row shapes persisted by the knowledge store, one struct per §3 entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningType {
    Failure,
    Success,
    Heuristic,
    Experiment,
    Observation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heuristic {
    pub id: String,
    pub domain: String,
    pub rule: String,
    pub explanation: String,
    pub confidence: f64,
    pub confidence_ema: f64,
    pub ema_alpha: f64,
    pub ema_warmup_remaining: u32,
    pub times_validated: u32,
    pub times_violated: u32,
    pub times_contradicted: u32,
    pub times_revived: u32,
    pub fraud_flags: u32,
    pub status: crate::types::HeuristicStatus,
    pub is_golden: bool,
    pub project_path: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub dormant_since: Option<DateTime<Utc>>,
    pub revival_conditions: Vec<RevivalCondition>,
    pub update_count_today: u32,
    pub update_count_reset_date: DateTime<Utc>,
    pub last_confidence_update: Option<DateTime<Utc>>,
    pub last_fraud_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevivalCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub learning_type: LearningType,
    pub filepath: String,
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub domain: String,
    pub severity: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub title: String,
    pub context: String,
    pub options: Vec<String>,
    pub decision: String,
    pub rationale: String,
    pub status: String,
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantScope {
    Codebase,
    Module,
    Function,
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invariant {
    pub id: String,
    pub statement: String,
    pub rationale: String,
    pub scope: InvariantScope,
    pub severity: InvariantSeverity,
    pub status: String,
    pub violation_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assumption {
    pub id: String,
    pub assumption: String,
    pub context: String,
    pub source: String,
    pub confidence: f64,
    pub status: String,
    pub verified_count: u32,
    pub challenged_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeReport {
    pub id: String,
    pub title: String,
    pub findings: String,
    pub gotchas: String,
    pub usefulness_score: f64,
    pub access_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingQuery {
    pub id: String,
    pub query_type: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub filters: serde_json::Value,
    pub results_returned: u32,
    pub duration_ms: u64,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceUpdate {
    pub id: String,
    pub heuristic_id: String,
    pub old_confidence: f64,
    pub new_confidence: f64,
    pub delta: f64,
    pub update_type: crate::types::UpdateType,
    pub raw_target: f64,
    pub smoothed_delta: f64,
    pub alpha: f64,
    pub session: Option<String>,
    pub agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicMerge {
    pub id: String,
    pub result_id: String,
    pub source_ids: Vec<String>,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricObservation {
    pub id: String,
    pub name: String,
    pub value: f64,
    pub domain: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudReport {
    pub id: String,
    pub heuristic_id: String,
    pub fraud_score: f64,
    pub classification: String,
    pub evidence: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySignal {
    pub id: String,
    pub report_id: String,
    pub detector: String,
    pub score: f64,
    pub severity: FraudSeverity,
    pub reason: String,
    pub evidence: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudOutcome {
    pub report_id: String,
    pub outcome: String,
    pub decided_by: String,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub agent_id: String,
    pub context_hash: String,
    pub preview: String,
    pub heuristics_applied: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainBaseline {
    pub domain: String,
    pub avg_success_rate: f64,
    pub std_success_rate: f64,
    pub sample_count: u32,
    pub avg_update_frequency: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRecommendation {
    pub id: String,
    pub detector: String,
    pub level: String,
    pub current_value: f64,
    pub recommended_value: f64,
    pub target_fpr: f64,
    pub estimated_fpr: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub nodes: serde_json::Value,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub workflow: String,
    pub from_node: String,
    pub to_node: String,
    pub condition: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow: String,
    pub status: RunStatus,
    pub phase: String,
    pub input: serde_json::Value,
    pub context: serde_json::Value,
    pub total_nodes: u32,
    pub completed_nodes: u32,
    pub failed_nodes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub status: NodeExecStatus,
    pub prompt_hash: String,
    pub result_text: Option<String>,
    pub result_json: Option<serde_json::Value>,
    pub findings_json: Option<serde_json::Value>,
    pub files_modified: Vec<String>,
    pub duration_ms: Option<u64>,
    pub token_count: Option<u32>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorDecision {
    pub id: String,
    pub run_id: String,
    pub decision_type: String,
    pub node_id: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trail {
    pub id: String,
    pub run_id: String,
    pub location: String,
    pub scent: String,
    pub strength: f64,
    pub agent_id: Option<String>,
    pub node_id: Option<String>,
    pub message: Option<String>,
    pub tags: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    New,
    Active,
    Ack,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: String,
    pub metric_name: String,
    pub severity: String,
    pub message: String,
    pub current_value: f64,
    pub baseline_value: Option<f64>,
    pub state: AlertState,
    pub true_positive_count: u32,
    pub false_positive_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
