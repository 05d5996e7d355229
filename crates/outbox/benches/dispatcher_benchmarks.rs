use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use devboard_core::{BoardId, TaskItemId, TenantId};
use devboard_events::catalog::{EventMetadata, TaskItemCreated};
use devboard_events::{EventEnvelope, InMemoryEventBus};
use devboard_outbox::{
    BusBroker, DispatcherSettings, EventRegistry, InMemoryOutboxStore, OutboxDispatcher, OutboxWriter, UnitOfWork,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn event(tenant_id: TenantId, n: usize) -> TaskItemCreated {
    TaskItemCreated {
        meta: EventMetadata::new(tenant_id),
        task_item_id: TaskItemId::new(),
        board_id: BoardId::new(),
        title: format!("task {n}"),
        assigned_to_user_id: None,
    }
}

async fn seeded_store(count: usize) -> Arc<InMemoryOutboxStore> {
    let store = Arc::new(InMemoryOutboxStore::new());
    let tenant_id = TenantId::new();
    let mut uow = store.begin();
    for n in 0..count {
        uow.append(&event(tenant_id, n)).await.expect("append");
    }
    uow.commit().await.expect("commit");
    store
}

/// Writer throughput: staging N events in one unit of work and committing.
fn bench_append(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("outbox_append");

    for count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| rt.block_on(async { black_box(seeded_store(count).await) }));
        });
    }
    group.finish();
}

/// One dispatch cycle over a full batch (decode + publish + bulk save).
fn bench_dispatch_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("outbox_dispatch_cycle");

    for batch_size in [20usize, 100, 500] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &batch_size| {
            b.iter_batched(
                || rt.block_on(seeded_store(batch_size)),
                |store| {
                    let bus: Arc<InMemoryEventBus<EventEnvelope>> = Arc::new(InMemoryEventBus::new());
                    let dispatcher = OutboxDispatcher::new(
                        store,
                        Arc::new(BusBroker::new(bus)),
                        Arc::new(EventRegistry::devboard()),
                        DispatcherSettings::default().with_batch_size(batch_size),
                    );
                    rt.block_on(async { black_box(dispatcher.run_cycle().await.expect("cycle")) })
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_dispatch_cycle);
criterion_main!(benches);
