//! Benchmarks the heuristic confidence update path under repeated success
//! applications, the hot loop of the lifecycle engine.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;

use elf_runtime::config::RateLimitConfig;
use elf_runtime::knowledge::types::Heuristic;
use elf_runtime::knowledge::KnowledgeStore;
use elf_runtime::lifecycle::LifecycleEngine;
use elf_runtime::types::{HeuristicStatus, UpdateType};

fn make_heuristic(id: &str) -> Heuristic {
    let now = chrono::Utc::now();
    Heuristic {
        id: id.to_string(),
        domain: "bench".to_string(),
        rule: "benchmark rule".to_string(),
        explanation: String::new(),
        confidence: 0.5,
        confidence_ema: 0.5,
        ema_alpha: 0.3,
        ema_warmup_remaining: 0,
        times_validated: 0,
        times_violated: 0,
        times_contradicted: 0,
        times_revived: 0,
        fraud_flags: 0,
        status: HeuristicStatus::Active,
        is_golden: false,
        project_path: None,
        last_used_at: None,
        dormant_since: None,
        revival_conditions: vec![],
        update_count_today: 0,
        update_count_reset_date: now,
        last_confidence_update: None,
        last_fraud_check: None,
        created_at: now,
        updated_at: now,
    }
}

fn bench_update_confidence(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
    let engine = LifecycleEngine::new(store.clone(), RateLimitConfig::default());

    rt.block_on(store.insert_heuristic(&make_heuristic("bench-1"))).unwrap();

    c.bench_function("lifecycle_update_confidence_success", |b| {
        b.iter_batched(
            || (),
            |()| {
                rt.block_on(engine.update_confidence("bench-1", UpdateType::Success, None, None, true))
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_update_confidence);
criterion_main!(benches);
