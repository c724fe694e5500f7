//! Deliver worker.

use async_trait::async_trait;
use herald_common::DeliveryOutcome;
use herald_db::repositories::ActorKeypairRepository;
use herald_federation::{ApClient, HttpSigner};
use tracing::{debug, info, warn};

use crate::backend::Job;
use crate::jobs::DeliverJob;
use crate::rate_limit::{InstanceRateLimiter, RateLimitResult};
use crate::registry::JobHandler;

/// Pushes activities to remote inboxes, signed with the sender's key.
#[derive(Clone)]
pub struct DeliverWorker {
    keypairs: ActorKeypairRepository,
    client: ApClient,
    limiter: InstanceRateLimiter,
}

impl DeliverWorker {
    /// Create a deliver worker.
    #[must_use]
    pub const fn new(
        keypairs: ActorKeypairRepository,
        client: ApClient,
        limiter: InstanceRateLimiter,
    ) -> Self {
        Self {
            keypairs,
            client,
            limiter,
        }
    }

    async fn signer_for(&self, sender_id: &str) -> Result<HttpSigner, DeliveryOutcome> {
        let keypair = match self.keypairs.find_by_actor_id(sender_id).await {
            Ok(Some(keypair)) => keypair,
            Ok(None) => {
                return Err(DeliveryOutcome::permanent(format!(
                    "no signing key for actor {sender_id}"
                )));
            }
            Err(e) if e.is_transient() => return Err(DeliveryOutcome::retryable(e.to_string())),
            Err(e) => return Err(DeliveryOutcome::permanent(e.to_string())),
        };

        HttpSigner::new(&keypair.private_key, keypair.key_id)
            .map_err(|e| DeliveryOutcome::permanent(e.to_string()))
    }
}

#[async_trait]
impl JobHandler for DeliverWorker {
    async fn handle(&self, job: &Job) -> DeliveryOutcome {
        let deliver: DeliverJob = match job.decode() {
            Ok(deliver) => deliver,
            Err(e) => return DeliveryOutcome::permanent(e.to_string()),
        };

        let Some(host) = deliver.host() else {
            return DeliveryOutcome::permanent(format!("invalid inbox url: {}", deliver.inbox));
        };

        if let RateLimitResult::Cooldown { retry_after } = self.limiter.check(&host).await {
            debug!(host = %host, ?retry_after, "Host is cooling down, postponing delivery");
            return DeliveryOutcome::Deferred { retry_after };
        }

        let signer = match self.signer_for(&deliver.sender_id).await {
            Ok(signer) => signer,
            Err(outcome) => {
                warn!(sender_id = %deliver.sender_id, outcome = %outcome, "Cannot sign delivery");
                return outcome;
            }
        };

        info!(
            job_id = %job.id,
            activity_id = %deliver.activity_id,
            inbox = %deliver.inbox,
            recipients = deliver.target_actor_ids.len(),
            attempt = job.attempts,
            "Delivering activity"
        );

        self.client
            .deliver(&deliver.inbox, &deliver.activity, &signer)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitConfig;
    use chrono::Utc;
    use herald_common::{FederationConfig, generate_rsa_keypair};
    use herald_db::test_utils::TestDatabase;
    use std::time::Duration;
    use crate::backend::DatabaseBackend;
    use crate::jobs::FEDERATION_QUEUE;
    use crate::manager::{QueueManager, QueueSettings};
    use crate::registry::HandlerRegistry;
    use crate::retry::RetryConfig;
    use herald_db::repositories::{DeadLetterRepository, QueueItemRepository};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn federation() -> FederationConfig {
        FederationConfig {
            instance_url: "https://local.example".to_string(),
            user_agent: None,
            request_timeout_secs: 5,
            host_max_requests: 300,
            host_window_secs: 60,
            host_cooldown_secs: 120,
        }
    }

    fn worker(db: &TestDatabase, limiter: InstanceRateLimiter) -> DeliverWorker {
        DeliverWorker::new(
            ActorKeypairRepository::new(db.connection()),
            ApClient::new(&federation()).unwrap(),
            limiter,
        )
    }

    fn deliver(sender: &str, inbox: &str) -> DeliverJob {
        DeliverJob {
            sender_id: sender.to_string(),
            activity_id: "act1".to_string(),
            inbox: inbox.to_string(),
            target_actor_ids: vec!["bob".to_string()],
            activity: serde_json::json!({ "type": "Create", "id": "https://local.example/activities/act1" }),
        }
    }

    fn job(sender: &str, inbox: &str) -> Job {
        Job {
            id: "job1".to_string(),
            queue: "federation".to_string(),
            payload: serde_json::to_value(deliver(sender, inbox)).unwrap(),
            attempts: 1,
            enqueued_at: Utc::now(),
            receipt: None,
        }
    }

    /// Answer one request on `socket` with `status_line`.
    async fn answer(mut socket: TcpStream, status_line: &'static str) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response =
            format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        socket.write_all(response.as_bytes()).await.ok();
        socket.shutdown().await.ok();
    }

    /// Answer every request with `status_line`; returns the inbox URL and
    /// the number of requests seen.
    async fn counting_inbox(status_line: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(answer(socket, status_line));
            }
        });

        (format!("http://{addr}/inbox"), hits)
    }

    async fn inbox_answering(status_line: &'static str) -> String {
        counting_inbox(status_line).await.0
    }

    async fn db_with_sender() -> TestDatabase {
        let db = TestDatabase::new().await.unwrap();
        db.local_actor("alice").await;
        let keypair = generate_rsa_keypair().unwrap();
        db.keypair("alice", &keypair.public_key_pem, &keypair.private_key_pem)
            .await;
        db
    }

    #[tokio::test]
    async fn test_delivers_signed_activity() {
        let db = db_with_sender().await;
        let inbox = inbox_answering("202 Accepted").await;
        let worker = worker(&db, InstanceRateLimiter::new(RateLimitConfig::default()));

        assert_eq!(
            worker.handle(&job("alice", &inbox)).await,
            DeliveryOutcome::Delivered
        );
    }

    #[tokio::test]
    async fn test_gone_is_permanent() {
        let db = db_with_sender().await;
        let inbox = inbox_answering("410 Gone").await;
        let worker = worker(&db, InstanceRateLimiter::new(RateLimitConfig::default()));

        assert!(matches!(
            worker.handle(&job("alice", &inbox)).await,
            DeliveryOutcome::Permanent { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_permanent() {
        let db = TestDatabase::new().await.unwrap();
        db.local_actor("carol").await;
        let worker = worker(&db, InstanceRateLimiter::new(RateLimitConfig::default()));

        let outcome = worker
            .handle(&job("carol", "https://remote.example/inbox"))
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Permanent { reason } if reason.contains("carol")));
    }

    #[tokio::test]
    async fn test_cooling_host_defers_without_sending() {
        let db = db_with_sender().await;
        let limiter = InstanceRateLimiter::new(RateLimitConfig {
            max_requests: 0,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(90),
        });
        let worker = worker(&db, limiter);

        assert_eq!(
            worker
                .handle(&job("alice", "https://remote.example/inbox"))
                .await,
            DeliveryOutcome::Deferred {
                retry_after: Duration::from_secs(90),
            }
        );
    }

    #[tokio::test]
    async fn test_throttled_jobs_are_delivered_not_dead_lettered() {
        let db = db_with_sender().await;
        let (inbox, hits) = counting_inbox("202 Accepted").await;
        let limiter = InstanceRateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            cooldown: Duration::from_millis(50),
        });
        let mut registry = HandlerRegistry::new();
        registry.register(FEDERATION_QUEUE, Arc::new(worker(&db, limiter)));
        let manager = QueueManager::new(
            Arc::new(DatabaseBackend::new(QueueItemRepository::new(db.connection()))),
            Arc::new(registry),
            Arc::new(DeadLetterRepository::new(db.connection())),
            QueueSettings {
                queues: vec![FEDERATION_QUEUE.to_string()],
                poll_interval: Duration::from_millis(10),
                claim_timeout: Duration::from_secs(3600),
                retry: RetryConfig {
                    max_attempts: 2,
                    initial_delay: Duration::ZERO,
                    max_delay: Duration::ZERO,
                    multiplier: 2.0,
                },
            },
        );
        for _ in 0..3 {
            manager
                .enqueue_job(FEDERATION_QUEUE, &deliver("alice", &inbox))
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while hits.load(Ordering::SeqCst) < 3 {
                manager.run_once().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(manager.dead_letter_count().await.unwrap(), 0);
        assert_eq!(
            manager.depths().await.unwrap(),
            vec![(FEDERATION_QUEUE.to_string(), Some(0))]
        );
    }

    #[tokio::test]
    async fn test_invalid_inbox_is_permanent() {
        let db = db_with_sender().await;
        let worker = worker(&db, InstanceRateLimiter::new(RateLimitConfig::default()));

        assert!(matches!(
            worker.handle(&job("alice", "not a url")).await,
            DeliveryOutcome::Permanent { .. }
        ));
    }
}
