//! Import the common core types with a single line:
//!
//! ```ignore
//! use elf_runtime::prelude::*;
//! ```

pub use crate::config::{Config, ContextConfig, FraudConfig, MetaObserverConfig, PathsConfig, RateLimitConfig};
pub use crate::types::error::{
    BlackboardError, ConductorError, ConfigError, ContextError, CoreError, EventLogError, FraudError,
    KnowledgeError, LifecycleError, ObserverError,
};
pub use crate::types::{
    AgentStatus, ClaimStatus, EventType, FindingType, HeuristicStatus, Importance, MessageType,
    QuestionStatus, TaskStatus, UpdateType,
};

pub use crate::blackboard::Blackboard;
pub use crate::conductor::Conductor;
pub use crate::context::ContextBuilder;
pub use crate::eventlog::EventLog;
pub use crate::fraud::FraudDetector;
pub use crate::knowledge::KnowledgeStore;
pub use crate::lifecycle::LifecycleEngine;
pub use crate::meta_observer::MetaObserver;
pub use crate::replay::ReplayEngine;
pub use crate::safety::SafetyScanner;

pub use crate::Core;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_exposes_core_config_types() {
        let config = Config::default();
        assert_eq!(config.context.hard_max_tokens, 50_000);
    }
}
