//! Transition engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use statewise_core::builtin::ContextFlag;
use statewise_core::{
    Actor, BuiltinHandlers, Definition, DefinitionBuilder, DefinitionDocument, DefinitionStatus,
    HandlerRegistry, Instance, Requirement, StateCategory, TransitionEngine, TransitionSpec,
};
use statewise_storage::{FileStore, MemoryStore};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn memory_engine() -> TransitionEngine {
    let mut registry = HandlerRegistry::new();
    registry.install(&BuiltinHandlers);
    TransitionEngine::new(Arc::new(registry), Arc::new(MemoryStore::new()))
}

fn pipeline() -> Arc<Definition> {
    let def = DefinitionBuilder::new("pipeline")
        .status(DefinitionStatus::Published)
        .initial_state("created")
        .state("processing", StateCategory::Intermediate)
        .state("failed", StateCategory::Intermediate)
        .final_state("completed")
        .transition(TransitionSpec::on("start").from("created").to("processing"))
        .transition(TransitionSpec::on("complete").from("processing").to("completed"))
        .transition(TransitionSpec::on("fail").from("processing").to("failed"))
        .transition(TransitionSpec::on("retry").from("failed").to("processing"))
        .transition(TransitionSpec::on("note"))
        .build()
        .unwrap();
    Arc::new(def)
}

/// A definition of `n` states chained by `next_<i>` triggers.
fn chain_document(n: usize) -> DefinitionDocument {
    let states: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "name": format!("state_{}", i),
                "category": if i == 0 { "initial" } else if i == n - 1 { "final" } else { "intermediate" }
            })
        })
        .collect();
    let transitions: Vec<_> = (0..n - 1)
        .map(|i| {
            serde_json::json!({
                "trigger": format!("next_{}", i),
                "from": format!("state_{}", i),
                "to": format!("state_{}", i + 1)
            })
        })
        .collect();
    serde_json::from_value(serde_json::json!({
        "name": "chain",
        "states": states,
        "transitions": transitions
    }))
    .unwrap()
}

fn bench_definition(c: &mut Criterion) {
    let mut group = c.benchmark_group("definition");

    for size in [5usize, 50] {
        let doc = chain_document(size);
        group.bench_with_input(BenchmarkId::new("from_document", size), &doc, |b, doc| {
            b.iter(|| black_box(Definition::from_document(doc.clone()).unwrap()))
        });

        let def = Definition::from_document(doc).unwrap();
        group.bench_with_input(BenchmarkId::new("validate", size), &def, |b, def| {
            b.iter(|| black_box(def.validate()))
        });
        group.bench_with_input(BenchmarkId::new("mermaid", size), &def, |b, def| {
            b.iter(|| black_box(def.to_mermaid_diagram(None)))
        });
    }

    group.finish();
}

fn bench_try_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_try_transition");
    let rt = runtime();
    let engine = memory_engine();
    let def = pipeline();
    let actor = Actor::from("bench");

    group.throughput(Throughput::Elements(1));
    group.bench_function("state_changing", |b| {
        b.to_async(&rt).iter(|| async {
            let mut instance = Instance::create(def.clone()).unwrap();
            black_box(
                engine
                    .try_transition_by_name(&mut instance, "start", &actor, None)
                    .await
                    .unwrap(),
            )
        });
    });

    group.bench_function("trigger_only", |b| {
        b.to_async(&rt).iter(|| async {
            let mut instance = Instance::create(def.clone()).unwrap();
            black_box(
                engine
                    .try_transition_by_name(&mut instance, "note", &actor, None)
                    .await
                    .unwrap(),
            )
        });
    });

    let flagged = DefinitionBuilder::new("flagged")
        .status(DefinitionStatus::Published)
        .initial_state("pending")
        .final_state("approved")
        .transition(
            TransitionSpec::on("approve")
                .from("pending")
                .to("approved")
                .requirement(Requirement::of(&ContextFlag::new("order.paid")).unwrap()),
        )
        .build()
        .unwrap();
    let flagged = Arc::new(flagged);
    let ctx = serde_json::json!({"order": {"paid": true}});

    group.bench_function("with_requirement", |b| {
        b.to_async(&rt).iter(|| async {
            let mut instance = Instance::create(flagged.clone()).unwrap();
            black_box(
                engine
                    .try_transition_by_name(&mut instance, "approve", &actor, Some(&ctx))
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_revert(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_revert");
    let rt = runtime();
    let engine = memory_engine();
    let def = pipeline();
    let actor = Actor::from("bench");

    for depth in [10usize, 100] {
        group.bench_with_input(BenchmarkId::new("half_history", depth), &depth, |b, &depth| {
            b.to_async(&rt).iter(|| async {
                let mut instance = Instance::create(def.clone()).unwrap();
                for _ in 0..depth {
                    engine
                        .try_transition_by_name(&mut instance, "note", &actor, None)
                        .await
                        .unwrap();
                }
                black_box(
                    engine
                        .revert_transitions(&mut instance, depth / 2, "bench", &actor)
                        .await
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_file_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store");
    let rt = runtime();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let mut registry = HandlerRegistry::new();
    registry.install(&BuiltinHandlers);
    let engine = TransitionEngine::new(Arc::new(registry), store);
    let def = pipeline();
    let actor = Actor::from("bench");

    group.throughput(Throughput::Elements(1));
    group.bench_function("create_and_start", |b| {
        b.to_async(&rt).iter(|| async {
            let mut instance = Instance::create(def.clone()).unwrap();
            black_box(
                engine
                    .try_transition_by_name(&mut instance, "start", &actor, None)
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_definition,
    bench_try_transition,
    bench_revert,
    bench_file_store,
);

criterion_main!(benches);
