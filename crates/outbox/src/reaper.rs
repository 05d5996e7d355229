//! Outbox reaper: reclaims space held by terminal records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::ReaperSettings;
use crate::error::OutboxError;
use crate::store::OutboxStore;
use crate::worker::{WorkerHandle, sleep_or_shutdown};

pub struct OutboxReaper {
    store: Arc<dyn OutboxStore>,
    settings: ReaperSettings,
}

impl OutboxReaper {
    pub fn new(store: Arc<dyn OutboxStore>, settings: ReaperSettings) -> Self {
        Self { store, settings }
    }

    /// Delete delivered/abandoned records processed more than `retention` before `now`.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<u64, OutboxError> {
        let retention = chrono::Duration::from_std(self.settings.retention)
            .map_err(|e| OutboxError::InvalidState(format!("retention out of range: {e}")))?;
        let cutoff = now - retention;

        let deleted = self.store.delete_processed_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "purged processed outbox records");
        } else {
            debug!(cutoff = %cutoff, "no processed outbox records to purge");
        }
        Ok(deleted)
    }

    pub async fn run_once(&self) -> Result<u64, OutboxError> {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            retention_secs = self.settings.retention.as_secs(),
            "outbox reaper started"
        );

        let mut delay = self.settings.startup_delay;
        while !sleep_or_shutdown(delay, &mut shutdown).await {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "outbox reaper cycle failed");
            }
            delay = self.settings.interval;
        }

        info!("outbox reaper stopped");
    }

    pub fn spawn(self) -> WorkerHandle {
        WorkerHandle::spawn("outbox-reaper", move |shutdown| self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::record::OutboxRecord;
    use crate::store::InMemoryOutboxStore;
    use devboard_core::TenantId;

    const DAY: i64 = 86_400;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn zero_retention_purges_everything_processed() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let mut delivered = OutboxRecord::new(TenantId::new(), "board.created", "{}", at(0));
        delivered.mark_delivered(at(DAY));
        store.insert(delivered).await.unwrap();
        store
            .insert(OutboxRecord::new(TenantId::new(), "board.created", "{}", at(0)))
            .await
            .unwrap();

        let reaper = OutboxReaper::new(store.clone(), ReaperSettings::default().with_retention(Duration::ZERO));
        assert_eq!(reaper.run_once_at(at(2 * DAY)).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
