//! End-to-end outbox scenarios.
//!
//! Business write → writer stages the record → commit → dispatcher publishes
//! to the bus → consumer handles it; plus retry exhaustion, batching, reaping,
//! unknown event types, concurrent dispatchers and shutdown mid-batch.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use tokio::sync::watch;

    use devboard_core::{BoardId, TaskItemId, TenantId, UserId};
    use devboard_events::catalog::{EventMetadata, TaskItemCreated};
    use devboard_events::{
        ConsumerRunner, DeliveryOutcome, EventBus, EventEnvelope, IdempotentHandler, InMemoryDeadLetterSink,
        InMemoryEventBus, RedeliveryPolicy, TypedHandler,
    };

    use crate::admin::OutboxAdmin;
    use crate::broker::{Broker, BusBroker, PublishError};
    use crate::config::{DispatcherSettings, ReaperSettings};
    use crate::dispatcher::OutboxDispatcher;
    use crate::reaper::OutboxReaper;
    use crate::record::{OutboxRecord, RecordStatus};
    use crate::registry::EventRegistry;
    use crate::store::{InMemoryOutboxStore, OutboxStore, UnitOfWork};
    use crate::writer::OutboxWriter;

    const DAY: i64 = 86_400;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn task_created(tenant_id: TenantId, title: &str) -> TaskItemCreated {
        TaskItemCreated {
            meta: EventMetadata::new(tenant_id),
            task_item_id: TaskItemId::new(),
            board_id: BoardId::new(),
            title: title.to_string(),
            assigned_to_user_id: Some(UserId::new()),
        }
    }

    fn record_at(occurred: i64) -> OutboxRecord {
        let tenant_id = TenantId::new();
        let payload = serde_json::to_string(&task_created(tenant_id, "seeded")).unwrap();
        OutboxRecord::new(tenant_id, "task_item.created", payload, at(occurred))
    }

    type Bus = Arc<InMemoryEventBus<EventEnvelope>>;

    fn bus_dispatcher(store: Arc<InMemoryOutboxStore>, settings: DispatcherSettings) -> (OutboxDispatcher, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = OutboxDispatcher::new(
            store,
            Arc::new(BusBroker::new(bus.clone())),
            Arc::new(EventRegistry::devboard()),
            settings,
        );
        (dispatcher, bus)
    }

    struct DownBroker {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Broker for DownBroker {
        async fn publish(&self, _envelope: EventEnvelope) -> Result<(), PublishError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(PublishError::transport("connection refused"))
        }
    }

    /// Publishes successfully and requests shutdown on the first publish.
    struct ShutdownOnFirstPublish {
        shutdown: watch::Sender<bool>,
        published: AtomicUsize,
    }

    #[async_trait]
    impl Broker for ShutdownOnFirstPublish {
        async fn publish(&self, _envelope: EventEnvelope) -> Result<(), PublishError> {
            self.published.fetch_add(1, Ordering::SeqCst);
            let _ = self.shutdown.send(true);
            Ok(())
        }
    }

    /// Counts publishes and yields so concurrent dispatchers interleave.
    #[derive(Default)]
    struct CountingBroker {
        published: AtomicUsize,
    }

    #[async_trait]
    impl Broker for CountingBroker {
        async fn publish(&self, _envelope: EventEnvelope) -> Result<(), PublishError> {
            tokio::task::yield_now().await;
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn committed_event_is_delivered_to_consumers() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let (dispatcher, bus) = bus_dispatcher(store.clone(), DispatcherSettings::default());
        let subscription = bus.subscribe();

        let tenant_id = TenantId::new();
        let event = task_created(tenant_id, "Write release notes");
        let mut uow = store.begin();
        let id = uow.append(&event).await.unwrap();
        uow.commit().await.unwrap();

        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.delivered, 1);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status(), RecordStatus::Delivered);
        assert!(record.error.is_none());

        let envelope = subscription.try_recv().unwrap();
        assert_eq!(envelope.event_type(), "task_item.created");
        assert_eq!(envelope.tenant_id(), tenant_id);
        assert_eq!(envelope.decode::<TaskItemCreated>().unwrap(), event);
    }

    #[tokio::test]
    async fn rolled_back_business_write_publishes_nothing() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let (dispatcher, bus) = bus_dispatcher(store.clone(), DispatcherSettings::default());

        let mut uow = store.begin();
        uow.append(&task_created(TenantId::new(), "never happened")).await.unwrap();
        uow.rollback().await.unwrap();

        let report = dispatcher.run_cycle().await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(bus.published_count(), 0);
    }

    #[tokio::test]
    async fn failing_broker_exhausts_retries_then_abandons() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let record = record_at(0);
        store.insert(record.clone()).await.unwrap();

        let broker = Arc::new(DownBroker { attempts: AtomicU32::new(0) });
        let dispatcher = OutboxDispatcher::new(
            store.clone(),
            broker.clone(),
            Arc::new(EventRegistry::devboard()),
            DispatcherSettings::default().with_max_retries(5),
        );

        for cycle in 1..=4u32 {
            dispatcher.run_cycle_at(at(cycle as i64 * 10)).await.unwrap();
            let stored = store.get(record.id).await.unwrap().unwrap();
            assert_eq!(stored.retry_count, cycle);
            assert!(stored.processed_at.is_none());
            assert!(stored.error.as_deref().unwrap().ends_with("connection refused"));
        }

        let report = dispatcher.run_cycle_at(at(50)).await.unwrap();
        assert_eq!(report.abandoned, 1);
        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 5);
        assert_eq!(stored.processed_at, Some(at(50)));
        assert_eq!(stored.status(), RecordStatus::Abandoned);

        // terminal: never picked up again
        let report = dispatcher.run_cycle_at(at(60)).await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 5);
        assert_eq!(store.get(record.id).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn batch_size_limits_each_cycle_to_the_oldest_records() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let records: Vec<_> = (0..5).map(|i| record_at(i * 60)).collect();
        // insert newest first to prove ordering is by occurrence
        for r in records.iter().rev() {
            store.insert(r.clone()).await.unwrap();
        }

        let (dispatcher, _bus) = bus_dispatcher(store.clone(), DispatcherSettings::default().with_batch_size(2));
        let report = dispatcher.run_cycle_at(at(1000)).await.unwrap();
        assert_eq!(report.delivered, 2);

        for (i, r) in records.iter().enumerate() {
            let stored = store.get(r.id).await.unwrap().unwrap();
            assert_eq!(stored.processed_at.is_some(), i < 2, "record {i}");
        }
    }

    #[tokio::test]
    async fn reaper_removes_only_expired_terminal_records() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let now = at(60 * DAY);

        let mut old_delivered = record_at(0);
        old_delivered.mark_delivered(now - chrono::Duration::days(10));
        let mut recent_delivered = record_at(0);
        recent_delivered.mark_delivered(now - chrono::Duration::days(1));
        let mut old_abandoned = record_at(0);
        old_abandoned.record_failure("boom", now - chrono::Duration::days(8), 1, false, None);
        let ancient_pending = OutboxRecord {
            occurred_at: now - chrono::Duration::days(30),
            ..record_at(0)
        };

        for r in [&old_delivered, &recent_delivered, &old_abandoned, &ancient_pending] {
            store.insert((*r).clone()).await.unwrap();
        }

        let reaper = OutboxReaper::new(store.clone(), ReaperSettings::default());
        assert_eq!(reaper.run_once_at(now).await.unwrap(), 2);

        assert!(store.get(old_delivered.id).await.unwrap().is_none());
        assert!(store.get(old_abandoned.id).await.unwrap().is_none());
        assert!(store.get(recent_delivered.id).await.unwrap().is_some());
        assert!(store.get(ancient_pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_event_type_is_terminal_without_publishing() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let record = OutboxRecord::new(TenantId::new(), "sprint.started", "{}", at(0));
        store.insert(record.clone()).await.unwrap();

        let (dispatcher, bus) = bus_dispatcher(store.clone(), DispatcherSettings::default());
        let report = dispatcher.run_cycle_at(at(5)).await.unwrap();
        assert_eq!(report.undeliverable, 1);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.processed_at, Some(at(5)));
        assert!(stored.error.unwrap().contains("Could not resolve type: sprint.started"));
        assert_eq!(bus.published_count(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_terminal() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let record = OutboxRecord::new(TenantId::new(), "task_item.created", "{\"title\":", at(0));
        store.insert(record.clone()).await.unwrap();

        let (dispatcher, _bus) = bus_dispatcher(store.clone(), DispatcherSettings::default());
        dispatcher.run_cycle_at(at(5)).await.unwrap();

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Abandoned);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error.unwrap().contains("Deserialization failed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_dispatchers_never_publish_a_record_twice() {
        let store = Arc::new(InMemoryOutboxStore::new());
        for i in 0..40 {
            store.insert(record_at(i)).await.unwrap();
        }

        let broker = Arc::new(CountingBroker::default());
        let make = || {
            OutboxDispatcher::new(
                store.clone(),
                broker.clone(),
                Arc::new(EventRegistry::devboard()),
                DispatcherSettings::default().with_batch_size(7),
            )
        };
        let (a, b) = (make(), make());

        for _ in 0..6 {
            let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
            ra.unwrap();
            rb.unwrap();
        }

        assert_eq!(broker.published.load(Ordering::SeqCst), 40);
        assert_eq!(store.stats().await.unwrap().processed, 40);
    }

    #[tokio::test]
    async fn shutdown_mid_batch_releases_unattempted_records() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let records: Vec<_> = (0..4).map(record_at).collect();
        for r in &records {
            store.insert(r.clone()).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let broker = Arc::new(ShutdownOnFirstPublish {
            shutdown: tx,
            published: AtomicUsize::new(0),
        });
        let dispatcher = OutboxDispatcher::new(
            store.clone(),
            broker.clone(),
            Arc::new(EventRegistry::devboard()),
            DispatcherSettings::default(),
        );

        let report = dispatcher.run_cycle_until(at(10), &rx).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.released, 3);
        assert_eq!(broker.published.load(Ordering::SeqCst), 1);

        assert!(store.get(records[0].id).await.unwrap().unwrap().processed_at.is_some());
        for r in &records[1..] {
            let stored = store.get(r.id).await.unwrap().unwrap();
            assert!(stored.is_pending());
            assert_eq!(stored.retry_count, 0);
            assert!(stored.locked_until.is_none());
        }

        // released rows are immediately claimable by the next cycle
        let claimed = store
            .claim_pending(10, 5, Duration::from_secs(60), at(11))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 3);
    }

    #[tokio::test]
    async fn requeued_record_is_redelivered_and_consumed_once() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let (dispatcher, bus) = bus_dispatcher(store.clone(), DispatcherSettings::default());
        let subscription = bus.subscribe();
        let admin = OutboxAdmin::new(store.clone());

        let notified = Arc::new(AtomicU32::new(0));
        let counter = notified.clone();
        let mut runner = ConsumerRunner::new(RedeliveryPolicy::immediate(3), Arc::new(InMemoryDeadLetterSink::new()));
        runner.register(
            "task_item.created",
            IdempotentHandler::new(TypedHandler::new(move |_: &TaskItemCreated| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        let mut uow = store.begin();
        let id = uow.append(&task_created(TenantId::new(), "Triage inbox")).await.unwrap();
        uow.commit().await.unwrap();

        dispatcher.run_cycle().await.unwrap();
        admin.retry(id).await.unwrap();
        dispatcher.run_cycle().await.unwrap();

        let first = subscription.try_recv().unwrap();
        let second = subscription.try_recv().unwrap();
        assert_eq!(first.event_id(), second.event_id());

        assert_eq!(runner.deliver(&first), DeliveryOutcome::Handled { attempts: 1 });
        assert_eq!(runner.deliver(&second), DeliveryOutcome::Handled { attempts: 1 });
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn admin_statistics_and_cleanup() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let now = at(30 * DAY);

        let mut delivered = record_at(0);
        delivered.mark_delivered(now - chrono::Duration::days(9));
        let mut failed = record_at(0);
        failed.record_failure("boom", now - chrono::Duration::days(2), 1, false, None);
        let pending = record_at(0);
        for r in [&delivered, &failed, &pending] {
            store.insert((*r).clone()).await.unwrap();
        }

        let admin = OutboxAdmin::new(store.clone());
        let stats = admin.statistics().await.unwrap();
        assert_eq!((stats.total, stats.pending, stats.processed, stats.failed), (3, 1, 1, 1));

        let failed_page = admin.failed(Default::default()).await.unwrap();
        assert_eq!(failed_page.len(), 1);
        assert_eq!(failed_page[0].id, failed.id);

        assert_eq!(admin.cleanup_at(7, now).await.unwrap(), 1);
        assert_eq!(admin.statistics().await.unwrap().total, 2);

        admin.delete(pending.id).await.unwrap();
        assert!(admin.delete(pending.id).await.is_err());
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn claims_take_the_oldest_records_first(
            offsets in prop::collection::vec(0i64..50, 1..30),
            batch_size in 1usize..10,
        ) {
            let store = InMemoryOutboxStore::new();
            let records: Vec<_> = offsets.iter().map(|o| record_at(*o)).collect();

            let claimed = block_on(async {
                for r in &records {
                    store.insert(r.clone()).await.unwrap();
                }
                store.claim_pending(batch_size, 5, Duration::from_secs(60), at(100)).await.unwrap()
            });

            // insertion order breaks ties
            let mut expected: Vec<_> = records.iter().enumerate().map(|(i, r)| (r.occurred_at, i, r.id)).collect();
            expected.sort();
            let expected: Vec<_> = expected.into_iter().take(batch_size).map(|(_, _, id)| id).collect();
            let actual: Vec<_> = claimed.iter().map(|r| r.id).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn reaper_never_deletes_pending_records(
            ages in prop::collection::vec((0i64..40, 0u8..3), 1..30),
            retention_days in 0u64..15,
        ) {
            let store = Arc::new(InMemoryOutboxStore::new());
            let now = at(100 * DAY);
            let mut pending_ids = Vec::new();

            let remaining = block_on(async {
                for (age_days, state) in &ages {
                    let when = now - chrono::Duration::days(*age_days);
                    let mut r = record_at(0);
                    match state {
                        0 => pending_ids.push(r.id),
                        1 => r.mark_delivered(when),
                        _ => { r.record_failure("boom", when, 1, false, None); }
                    }
                    store.insert(r).await.unwrap();
                }
                let reaper = OutboxReaper::new(
                    store.clone(),
                    ReaperSettings::default().with_retention(Duration::from_secs(retention_days * 86_400)),
                );
                reaper.run_once_at(now).await.unwrap();
                store.all().unwrap()
            });

            for id in &pending_ids {
                prop_assert!(remaining.iter().any(|r| r.id == *id));
            }
            let cutoff = now - chrono::Duration::days(retention_days as i64);
            for r in &remaining {
                if let Some(processed) = r.processed_at {
                    prop_assert!(processed >= cutoff);
                }
            }
        }

        #[test]
        fn retry_count_grows_by_one_per_failed_attempt(
            outcomes in prop::collection::vec(any::<bool>(), 1..12),
            max_retries in 1u32..6,
        ) {
            let mut record = record_at(0);
            let mut previous = 0u32;
            for (i, success) in outcomes.iter().enumerate() {
                if !record.is_pending() {
                    break;
                }
                let now = at(i as i64);
                if *success {
                    record.mark_delivered(now);
                    prop_assert_eq!(record.retry_count, previous);
                } else {
                    record.record_failure("boom", now, max_retries, false, None);
                    prop_assert_eq!(record.retry_count, previous + 1);
                    prop_assert_eq!(record.is_pending(), record.retry_count < max_retries);
                }
                prop_assert!(record.retry_count <= max_retries);
                previous = record.retry_count;
            }
        }
    }
}
