use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use devboard_events::{
    ConsumerRunner, EventBus, EventEnvelope, InMemoryDeadLetterSink, InMemoryEventBus, RedeliveryPolicy,
    Subscription,
};
use devboard_outbox::{
    Broker, BusBroker, EventRegistry, InMemoryOutboxStore, OutboxAdmin, OutboxDispatcher, OutboxError,
    OutboxReaper, OutboxSettings, OutboxStore, PostgresOutboxStore, PublishError,
};

use crate::config::AppConfig;
use crate::consumers::{self, Notifier};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error("broker setup failed: {0}")]
    Broker(#[from] PublishError),
}

/// Shared process services: the outbox store and the delivery pipeline around it.
pub struct AppServices {
    pub store: Arc<dyn OutboxStore>,
    /// Set when running on the in-memory store; lets dev/tests open units of work.
    pub in_memory_store: Option<Arc<InMemoryOutboxStore>>,
    /// Set when running on Postgres.
    pub postgres_store: Option<Arc<PostgresOutboxStore>>,
    pub admin: OutboxAdmin,
    pub broker: Arc<dyn Broker>,
    pub registry: Arc<EventRegistry>,
    /// In-process bus; `None` when an external broker is configured.
    pub bus: Option<Arc<InMemoryEventBus<EventEnvelope>>>,
    pub dead_letters: Arc<InMemoryDeadLetterSink>,
    pub settings: OutboxSettings,
    pub consumer_policy: RedeliveryPolicy,
}

impl AppServices {
    /// In-memory store + in-process bus.
    pub fn in_memory(settings: OutboxSettings, consumer_policy: RedeliveryPolicy) -> Self {
        let store = Arc::new(InMemoryOutboxStore::new());
        let mut services = Self::assemble(store.clone(), settings, consumer_policy);
        services.in_memory_store = Some(store);
        services
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        if !config.use_persistent_stores {
            info!("using in-memory outbox store");
            let services = Self::in_memory(config.outbox.clone(), config.consumer);
            return services.with_external_broker(config);
        }

        // Guaranteed by AppConfig validation.
        let database_url = config.database_url.as_deref().unwrap_or_default();
        let pool = PgPool::connect(database_url).await?;
        let store = Arc::new(PostgresOutboxStore::new(pool));
        store.ensure_schema().await?;
        info!("using postgres outbox store");

        let mut services = Self::assemble(store.clone(), config.outbox.clone(), config.consumer);
        services.postgres_store = Some(store);
        services.with_external_broker(config)
    }

    fn assemble(store: Arc<dyn OutboxStore>, settings: OutboxSettings, consumer_policy: RedeliveryPolicy) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        Self {
            admin: OutboxAdmin::new(store.clone()),
            store,
            in_memory_store: None,
            postgres_store: None,
            broker: Arc::new(BusBroker::new(bus.clone())),
            registry: Arc::new(EventRegistry::devboard()),
            bus: Some(bus),
            dead_letters: Arc::new(InMemoryDeadLetterSink::new()),
            settings,
            consumer_policy,
        }
    }

    #[cfg(feature = "redis")]
    fn with_external_broker(mut self, config: &AppConfig) -> Result<Self, ServiceError> {
        if let Some(url) = config.redis_url.as_deref() {
            let broker = devboard_outbox::RedisStreamsBroker::new(url, None)?;
            info!("publishing outbox events to redis streams");
            self.broker = Arc::new(broker);
            self.bus = None;
        }
        Ok(self)
    }

    #[cfg(not(feature = "redis"))]
    fn with_external_broker(self, config: &AppConfig) -> Result<Self, ServiceError> {
        if config.redis_url.is_some() {
            tracing::warn!("REDIS_URL set but the redis feature is not enabled; using the in-process bus");
        }
        Ok(self)
    }

    pub fn dispatcher(&self) -> OutboxDispatcher {
        OutboxDispatcher::new(
            self.store.clone(),
            self.broker.clone(),
            self.registry.clone(),
            self.settings.dispatcher.clone(),
        )
    }

    pub fn reaper(&self) -> OutboxReaper {
        OutboxReaper::new(self.store.clone(), self.settings.reaper.clone())
    }

    /// Consumer runner with every DevBoard handler registered.
    pub fn consumer_runner(&self, notifier: Arc<dyn Notifier>) -> ConsumerRunner {
        let mut runner = ConsumerRunner::new(self.consumer_policy, self.dead_letters.clone());
        consumers::register_devboard_handlers(&mut runner, notifier);
        runner
    }

    /// Subscription on the in-process bus, if one is in use.
    pub fn subscribe(&self) -> Option<Subscription<EventEnvelope>> {
        self.bus.as_ref().map(|bus| bus.subscribe())
    }
}
