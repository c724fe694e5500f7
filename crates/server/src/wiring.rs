//! Builds the queue stack from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use herald_common::{Config, QueueBackendKind};
use herald_db::repositories::{
    ActorKeypairRepository, DeadLetterRepository, NotificationRepository, QueueItemRepository,
};
use herald_federation::ApClient;
use herald_queue::{
    DatabaseBackend, DeliverWorker, FEDERATION_QUEUE, HandlerRegistry, InProcessBackend,
    InstanceRateLimiter, NOTIFICATION_QUEUE, NotificationWorker, QueueBackend, QueueManager,
    QueueSettings, RateLimitConfig, RedisBackend, StompBackend,
};
use sea_orm::DatabaseConnection;
use tracing::info;

/// Everything the commands need.
pub struct Stack {
    /// Queue manager over the configured backend.
    pub manager: Arc<QueueManager>,
    /// Limiter shared by the delivery handlers.
    pub limiter: InstanceRateLimiter,
}

/// Register the standard handlers.
pub fn registry(
    config: &Config,
    db: &Arc<DatabaseConnection>,
    limiter: InstanceRateLimiter,
) -> Result<HandlerRegistry> {
    let client = ApClient::new(&config.federation).context("building federation client")?;

    let mut registry = HandlerRegistry::new();
    registry.register(
        NOTIFICATION_QUEUE,
        Arc::new(NotificationWorker::new(NotificationRepository::new(
            db.clone(),
        ))),
    );
    registry.register(
        FEDERATION_QUEUE,
        Arc::new(DeliverWorker::new(
            ActorKeypairRepository::new(db.clone()),
            client,
            limiter,
        )),
    );
    Ok(registry)
}

/// Open the configured backend.
pub async fn backend(
    config: &Config,
    db: &Arc<DatabaseConnection>,
    registry: &Arc<HandlerRegistry>,
) -> Result<Arc<dyn QueueBackend>> {
    let backend: Arc<dyn QueueBackend> = match config.queue.backend {
        QueueBackendKind::InProcess => Arc::new(InProcessBackend::new(registry.clone())),
        QueueBackendKind::Database => {
            Arc::new(DatabaseBackend::new(QueueItemRepository::new(db.clone())))
        }
        QueueBackendKind::Redis => {
            let redis = config
                .redis
                .as_ref()
                .context("queue.backend = redis requires a [redis] section")?;
            Arc::new(RedisBackend::connect(redis, config.queue.queues.clone()).await?)
        }
        QueueBackendKind::Stomp => {
            let stomp = config
                .stomp
                .clone()
                .context("queue.backend = stomp requires a [stomp] section")?;
            Arc::new(StompBackend::new(stomp))
        }
    };

    info!(backend = backend.name(), "Queue backend ready");
    Ok(backend)
}

/// Build the manager and check every served queue has a handler.
pub async fn stack(config: &Config, db: &Arc<DatabaseConnection>) -> Result<Stack> {
    let limiter = InstanceRateLimiter::new(RateLimitConfig::from(&config.federation));
    let registry = Arc::new(registry(config, db, limiter.clone())?);
    let backend = backend(config, db, &registry).await?;

    let manager = QueueManager::new(
        backend,
        registry,
        Arc::new(DeadLetterRepository::new(db.clone())),
        QueueSettings::from(&config.queue),
    );
    manager.validate()?;

    Ok(Stack {
        manager: Arc::new(manager),
        limiter,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use herald_common::{
        DatabaseConfig, FanOutConfig, FederationConfig, QueueConfig, StompConfig,
    };
    use herald_db::test_utils::TestDatabase;

    fn config(backend: QueueBackendKind) -> Config {
        Config {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                min_connections: 1,
            },
            queue: QueueConfig {
                backend,
                ..QueueConfig::default()
            },
            redis: None,
            stomp: None,
            federation: FederationConfig {
                instance_url: "https://local.example".to_string(),
                user_agent: None,
                request_timeout_secs: 5,
                host_max_requests: 300,
                host_window_secs: 60,
                host_cooldown_secs: 120,
            },
            fanout: FanOutConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_database_stack_serves_standard_queues() {
        let db = TestDatabase::new().await.unwrap();
        let stack = stack(&config(QueueBackendKind::Database), &db.connection())
            .await
            .unwrap();

        assert_eq!(stack.manager.backend_name(), "database");
        assert_eq!(stack.manager.settings().queues, vec!["notification", "federation"]);
    }

    #[tokio::test]
    async fn test_unknown_queue_fails_validation() {
        let db = TestDatabase::new().await.unwrap();
        let mut config = config(QueueBackendKind::InProcess);
        config.queue.queues.push("email".to_string());

        assert!(stack(&config, &db.connection()).await.is_err());
    }

    #[tokio::test]
    async fn test_stomp_without_section_is_rejected() {
        let db = TestDatabase::new().await.unwrap();
        let result = stack(&config(QueueBackendKind::Stomp), &db.connection()).await;
        assert!(result.is_err());

        let mut config = config(QueueBackendKind::Stomp);
        config.stomp = Some(StompConfig {
            server: "127.0.0.1:61613".to_string(),
            username: None,
            password: None,
            vhost: None,
            prefix: "herald.".to_string(),
            poll_timeout_ms: 100,
        });
        let stack = stack(&config, &db.connection()).await.unwrap();
        assert_eq!(stack.manager.backend_name(), "stomp");
    }
}
