//! elf-runtime: the concurrency and learning substrate for multi-agent
//! coordination — event log, blackboard, knowledge store, heuristic
//! lifecycle engine, fraud detector, meta-observer, conductor, context
//! builder, replay engine and safety scanner.

pub mod blackboard;
pub mod config;
pub mod conductor;
pub mod context;
pub mod eventlog;
pub mod fraud;
pub mod knowledge;
pub mod lifecycle;
pub mod meta_observer;
pub mod prelude;
pub mod replay;
pub mod safety;
pub mod state;
pub mod types;

use std::sync::Arc;
use std::sync::Once;

pub use types::error::CoreError;

static TRACING_INIT: Once = Once::new();

/// Installs the process-wide `tracing-subscriber` exactly once. Safe to call
/// from both the CLI entrypoint and `Core::new`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

/// Owns one handle per component, all sharing the same `KnowledgeStore`
/// connection, constructed from a single `Config`.
pub struct Core {
    pub config: config::Config,
    pub events: eventlog::EventLog,
    pub board: blackboard::Blackboard,
    pub knowledge: Arc<knowledge::KnowledgeStore>,
    pub lifecycle: lifecycle::LifecycleEngine,
    pub fraud: fraud::FraudDetector,
    pub observer: meta_observer::MetaObserver,
    pub conductor: conductor::Conductor,
    pub context: context::ContextBuilder,
    pub replay: replay::ReplayEngine,
    pub safety: safety::SafetyScanner,
}

impl Core {
    pub fn new(config: config::Config) -> Result<Self, CoreError> {
        init_tracing();

        let events = eventlog::EventLog::open(&config.paths.project_root)?;
        let board = blackboard::Blackboard::open(&config.paths.project_root)?;
        let memory_dir = config.paths.elf_base.join("memory");
        let knowledge = Arc::new(knowledge::KnowledgeStore::open(&memory_dir)?);

        let lifecycle = lifecycle::LifecycleEngine::new(knowledge.clone(), config.rate_limits);
        let fraud = fraud::FraudDetector::new(knowledge.clone(), config.fraud, &config.paths.elf_base);
        let observer = meta_observer::MetaObserver::new(knowledge.clone(), config.meta_observer);
        let conductor = conductor::Conductor::new(knowledge.clone());
        let context = context::ContextBuilder::new(knowledge.clone());
        let replay = replay::ReplayEngine::new(knowledge.clone());
        let safety = safety::SafetyScanner::new(knowledge.clone());

        Ok(Self {
            config,
            events,
            board,
            knowledge,
            lifecycle,
            fraud,
            observer,
            conductor,
            context,
            replay,
            safety,
        })
    }
}
