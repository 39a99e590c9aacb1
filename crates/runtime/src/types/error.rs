//! Error taxonomy for the core (§7). Validation/DB/timeout/config errors
//! propagate to callers; ancillary side effects (audit rows, metrics,
//! fraud auto-check, blackboard bridge sync) are always best-effort and
//! must never surface through these variants.

use thiserror::Error;

/// Top-level error aggregating every component's error type, mirroring the
/// way the original runtime aggregates subsystem errors into one enum.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("blackboard error: {0}")]
    Blackboard(#[from] BlackboardError),

    #[error("knowledge store error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("fraud detector error: {0}")]
    Fraud(#[from] FraudError),

    #[error("meta-observer error: {0}")]
    Observer(#[from] ObserverError),

    #[error("conductor error: {0}")]
    Conductor(#[from] ConductorError),

    #[error("context builder error: {0}")]
    Context(#[from] ContextError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl CoreError {
    /// CLI exit-code mapping per §6/§7: 1 validation/DB, 2 DB-specific, 3 timeout.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Knowledge(KnowledgeError::Validation { .. }) => 1,
            CoreError::Knowledge(KnowledgeError::Sqlite(_)) => 2,
            CoreError::Knowledge(KnowledgeError::Timeout { .. }) => 3,
            CoreError::EventLog(EventLogError::LockTimeout { .. }) => 3,
            CoreError::Blackboard(BlackboardError::LockTimeout { .. }) => 3,
            CoreError::Context(ContextError::Timeout { .. }) => 3,
            _ => 1,
        }
    }

    /// `KIND ERROR: <message>` stderr rendering per §7.
    pub fn render(&self) -> String {
        format!("{} ERROR: {}", self.kind(), self)
    }

    fn kind(&self) -> &'static str {
        match self {
            CoreError::EventLog(_) => "EVENT_LOG",
            CoreError::Blackboard(_) => "BLACKBOARD",
            CoreError::Knowledge(_) => "KNOWLEDGE",
            CoreError::Lifecycle(_) => "LIFECYCLE",
            CoreError::Fraud(_) => "FRAUD",
            CoreError::Observer(_) => "OBSERVER",
            CoreError::Conductor(_) => "CONDUCTOR",
            CoreError::Context(_) => "CONTEXT",
            CoreError::Configuration(_) => "CONFIG",
        }
    }
}

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("event file exceeds 50 MiB; rotate events.jsonl before appending more")]
    FileTooLarge,

    #[error("lock timeout acquiring {resource} after {timeout_secs}s")]
    LockTimeout { resource: String, timeout_secs: u64 },

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum BlackboardError {
    #[error("lock timeout acquiring blackboard.lock after {timeout_secs}s")]
    LockTimeout { timeout_secs: u64 },

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Claim-chain conflict: carries the blocking chains and overlapping files.
    #[error("blocked by {} active chain(s) over {file_count} overlapping file(s)", blocking_chain_ids.len())]
    Blocked {
        blocking_chain_ids: Vec<String>,
        overlapping_files: Vec<String>,
        file_count: usize,
    },

    #[error("no active chain {chain_id} owned by {agent_id}")]
    NotOwner { chain_id: String, agent_id: String },

    #[error("not found: {0}")]
    NotFound(String),
}

/// Mirrors `elf/query/exceptions.py`'s `ValidationError` / `DatabaseError` /
/// `TimeoutError` / `QueryError` taxonomy, with the same `QS0xx` codes.
#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("validation error [QS001]: {message}")]
    Validation { message: String },

    #[error("database error [QS002]: {0}")]
    Sqlite(String),

    #[error("timeout [QS003]: {operation} exceeded {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("configuration error [QS004]: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl KnowledgeError {
    pub fn code(&self) -> &'static str {
        match self {
            KnowledgeError::Validation { .. } => "QS001",
            KnowledgeError::Sqlite(_) => "QS002",
            KnowledgeError::Timeout { .. } => "QS003",
            KnowledgeError::Configuration(_) => "QS004",
            KnowledgeError::NotFound(_) => "QS000",
        }
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("knowledge store error: {0}")]
    Store(#[from] KnowledgeError),

    #[error("heuristic not found: {0}")]
    NotFound(String),

    #[error("heuristic {0} is golden and cannot be mutated by automated processes")]
    GoldenImmune(String),

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::types::HeuristicStatus,
        to: crate::types::HeuristicStatus,
    },
}

#[derive(Error, Debug)]
pub enum FraudError {
    #[error("knowledge store error: {0}")]
    Store(#[from] KnowledgeError),

    #[error("insufficient baseline sample: {reason}")]
    InsufficientBaseline { reason: String },

    #[error("report not found: {0}")]
    NotFound(String),

    #[error("threshold update rejected: {reason}")]
    ThresholdRejected { reason: String },
}

#[derive(Error, Debug)]
pub enum ObserverError {
    #[error("knowledge store error: {0}")]
    Store(#[from] KnowledgeError),

    #[error("insufficient data: need at least {needed} observations, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("insufficient time spread: need at least {needed_secs}s, span is {span_secs}s")]
    InsufficientTimeSpread { needed_secs: i64, span_secs: i64 },

    #[error("alert not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("knowledge store error: {0}")]
    Store(#[from] KnowledgeError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("node execution failed: {node_id}: {reason}")]
    NodeFailed { node_id: String, reason: String },

    #[error("reserved node id used as a regular node: {0}")]
    ReservedNodeId(String),

    #[error("unsafe edge condition rejected: {0}")]
    UnsafeCondition(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("invalid step-workflow state: {0}")]
    InvalidState(String),
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("knowledge store error: {0}")]
    Store(#[from] KnowledgeError),

    #[error("timeout [QS003]: context build exceeded {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("max_tokens {0} exceeds the 50000 hard cap")]
    TokenBudgetExceeded(usize),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot materialize base path {path}: {reason}")]
    BasePath { path: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
