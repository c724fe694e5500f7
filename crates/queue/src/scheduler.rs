//! Periodic maintenance: stale-claim recovery and receipt pruning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{AppResult, Config};
use herald_db::repositories::FanoutReceiptRepository;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::manager::QueueManager;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for releasing stale claims (default: 5 minutes).
    pub reclaim_interval: Duration,
    /// Interval for pruning fan-out receipts (default: 1 hour).
    pub receipt_prune_interval: Duration,
    /// Receipts older than this many days are dropped.
    pub receipt_retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reclaim_interval: Duration::from_secs(300),
            receipt_prune_interval: Duration::from_secs(3600),
            receipt_retention_days: 30,
        }
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            receipt_retention_days: config.fanout.receipt_retention_days,
            ..Self::default()
        }
    }
}

/// Maintenance tasks run by the scheduler.
#[async_trait]
pub trait MaintenanceExecutor: Send + Sync {
    /// Hand out claims that outlived the claim timeout again.
    async fn reclaim_stale_claims(&self) -> AppResult<u64>;

    /// Delete fan-out receipts older than `retention_days`.
    async fn prune_receipts(&self, retention_days: u32) -> AppResult<u64>;
}

/// Maintenance over a queue manager and the receipt table.
pub struct QueueMaintenance {
    manager: Arc<QueueManager>,
    receipts: FanoutReceiptRepository,
}

impl QueueMaintenance {
    /// Create the executor.
    #[must_use]
    pub const fn new(manager: Arc<QueueManager>, receipts: FanoutReceiptRepository) -> Self {
        Self { manager, receipts }
    }
}

#[async_trait]
impl MaintenanceExecutor for QueueMaintenance {
    async fn reclaim_stale_claims(&self) -> AppResult<u64> {
        self.manager.reclaim_stale().await
    }

    async fn prune_receipts(&self, retention_days: u32) -> AppResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        self.receipts.prune(cutoff).await
    }
}

/// Spawn the maintenance tasks. They stop when `shutdown` turns true.
pub fn run_scheduler<E: MaintenanceExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let executor_reclaim = executor.clone();
    let executor_prune = executor;
    let retention_days = config.receipt_retention_days;

    let reclaim = spawn_periodic(config.reclaim_interval, shutdown.clone(), move || {
        let executor = executor_reclaim.clone();
        async move {
            match executor.reclaim_stale_claims().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count, "Released stale queue claims");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to release stale queue claims");
                }
            }
        }
    });

    let prune = spawn_periodic(config.receipt_prune_interval, shutdown, move || {
        let executor = executor_prune.clone();
        async move {
            match executor.prune_receipts(retention_days).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count, retention_days, "Pruned fan-out receipts");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to prune fan-out receipts");
                }
            }
        }
    });

    vec![reclaim, prune]
}

fn spawn_periodic<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => task().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::DatabaseBackend;
    use crate::manager::QueueSettings;
    use crate::registry::HandlerRegistry;
    use herald_common::QueueConfig;
    use herald_db::repositories::{DeadLetterRepository, QueueItemRepository};
    use herald_db::test_utils::TestDatabase;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    #[derive(Default)]
    struct Counting {
        reclaims: AtomicU64,
        prunes: AtomicU64,
        retention: AtomicU32,
    }

    #[async_trait]
    impl MaintenanceExecutor for Counting {
        async fn reclaim_stale_claims(&self) -> AppResult<u64> {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        async fn prune_receipts(&self, retention_days: u32) -> AppResult<u64> {
            self.prunes.fetch_add(1, Ordering::SeqCst);
            self.retention.store(retention_days, Ordering::SeqCst);
            Ok(2)
        }
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.reclaim_interval, Duration::from_secs(300));
        assert_eq!(config.receipt_prune_interval, Duration::from_secs(3600));
        assert_eq!(config.receipt_retention_days, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_tasks_until_shutdown() {
        let executor = Arc::new(Counting::default());
        let (tx, rx) = watch::channel(false);
        let config = SchedulerConfig {
            reclaim_interval: Duration::from_secs(10),
            receipt_prune_interval: Duration::from_secs(60),
            receipt_retention_days: 7,
        };

        let handles = run_scheduler(config, executor.clone(), rx);
        tokio::time::sleep(Duration::from_secs(65)).await;

        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        // Ticks at 0, 10, .., 60 and at 0, 60.
        assert_eq!(executor.reclaims.load(Ordering::SeqCst), 7);
        assert_eq!(executor.prunes.load(Ordering::SeqCst), 2);
        assert_eq!(executor.retention.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_prunes_old_receipts() {
        let db = TestDatabase::new().await.unwrap();
        let receipts = FanoutReceiptRepository::new(db.connection());
        assert!(receipts.claim("act1:bob").await.unwrap());

        let maintenance = QueueMaintenance::new(manager(&db), receipts.clone());

        // Nothing is older than a day yet.
        assert_eq!(maintenance.prune_receipts(1).await.unwrap(), 0);
        assert!(receipts.exists("act1:bob").await.unwrap());
        assert_eq!(maintenance.reclaim_stale_claims().await.unwrap(), 0);
    }

    fn manager(db: &TestDatabase) -> Arc<QueueManager> {
        Arc::new(QueueManager::new(
            Arc::new(DatabaseBackend::new(QueueItemRepository::new(db.connection()))),
            Arc::new(HandlerRegistry::new()),
            Arc::new(DeadLetterRepository::new(db.connection())),
            QueueSettings::from(&QueueConfig::default()),
        ))
    }
}
