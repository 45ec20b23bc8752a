//! Performance benchmarks for the batch lifecycle.
//!
//! Run with: cargo bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use herbtrace::auth::{can_perform, ViewAudience};
use herbtrace::domain::{
    Batch, BatchStatus, CreateBatchRequest, Location, ManufacturerDetails, Principal,
    QuantityInput, Transition,
};
use herbtrace::infra::SqliteBatchRepository;
use herbtrace::ledger::DisabledLedger;
use herbtrace::lifecycle::{
    plan_creation, plan_transition, Command, LifecycleConfig, LifecycleEngine,
};
use herbtrace::metrics::MetricsRegistry;
use herbtrace::projection::BatchView;

fn request(batch_id: Option<String>) -> CreateBatchRequest {
    CreateBatchRequest {
        batch_id,
        herb_name: Some("Brahmi".to_string()),
        quantity: Some(QuantityInput::Text("12.75".to_string())),
        unit: Some("kg".to_string()),
        harvest_date: Some("2024-05-02".to_string()),
        location: Location {
            village: Some("Kangra".to_string()),
            state: Some("Himachal Pradesh".to_string()),
            ..Default::default()
        },
        certifications: vec!["organic".to_string(), "fair-trade".to_string()],
        ..Default::default()
    }
}

fn collected_batch() -> Batch {
    let now = Utc::now();
    let (mut batch, _) =
        plan_creation(&Principal::farmer("f-1"), &request(Some("VC-B".into())), "VC", now)
            .expect("valid request");
    batch.status = BatchStatus::Collected;
    batch.collected_by = Some(Principal::manufacturer("m-1").id);
    batch
}

/// Benchmark planning, which runs on every mutation before the store is touched
fn bench_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("planning");
    let farmer = Principal::farmer("f-1");
    let manufacturer = Principal::manufacturer("m-1");
    let batch = collected_batch();

    group.bench_function("plan_creation", |b| {
        let req = request(None);
        b.iter(|| black_box(plan_creation(&farmer, &req, "VC", Utc::now())));
    });

    let command = Command::UpdateManufacturerDetails(ManufacturerDetails {
        processing_details: Some("shade dried".into()),
        storage_location: Some("WH-2".into()),
        ..Default::default()
    });
    group.bench_function("plan_manufacturer_update", |b| {
        b.iter(|| black_box(plan_transition(&manufacturer, &batch, &command, Utc::now())));
    });

    group.bench_function("can_perform", |b| {
        b.iter(|| {
            black_box(can_perform(
                &manufacturer,
                Transition::UpdateManufacturerDetails,
                Some(&batch),
            ))
        });
    });

    group.finish();
}

/// Benchmark view rendering with growing journals
fn bench_view_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_render");
    let manufacturer = Principal::manufacturer("m-1");
    let batch = collected_batch();

    for updates in [1usize, 10, 100].iter() {
        let mut current = batch.clone();
        let mut history = Vec::with_capacity(*updates);
        for n in 0..*updates {
            let command = Command::UpdateManufacturerDetails(ManufacturerDetails {
                remarks: Some(format!("inspection {n}")),
                ..Default::default()
            });
            let update = plan_transition(&manufacturer, &current, &command, Utc::now())
                .expect("collector may update");
            history.push(update.record);
            current = update.batch;
        }

        group.throughput(Throughput::Elements(*updates as u64));
        group.bench_with_input(BenchmarkId::new("public", updates), &history, |b, history| {
            b.iter(|| {
                black_box(BatchView::render(
                    current.clone(),
                    history,
                    None,
                    ViewAudience::Public,
                ))
            });
        });
    }

    group.finish();
}

/// Benchmark full create round trips against in-memory SQLite
fn bench_create_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let engine = rt.block_on(async {
        let repo = Arc::new(SqliteBatchRepository::in_memory().await.expect("sqlite"));
        LifecycleEngine::new(
            repo,
            Arc::new(DisabledLedger),
            Arc::new(MetricsRegistry::new()),
            LifecycleConfig::default(),
        )
    });
    let farmer = Principal::farmer("f-1");
    let req = request(None);

    c.bench_function("create_batch_sqlite", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(engine.create_batch(&farmer, &req).await) });
    });
}

criterion_group!(benches, bench_planning, bench_view_render, bench_create_roundtrip);
criterion_main!(benches);
