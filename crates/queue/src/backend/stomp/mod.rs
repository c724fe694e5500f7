//! STOMP broker transport.
//!
//! Jobs are sent to `/queue/{prefix}{name}` and consumed with
//! `ack:client-individual` subscriptions holding one unacknowledged message
//! at a time. Retries are re-sent as new messages carrying the attempt
//! count; ActiveMQ honours the `AMQ_SCHEDULED_DELAY` header for delayed
//! retries, other brokers deliver them immediately.
//!
//! Publishing uses its own session, and every queue is consumed on a
//! session of its own, so a poll waiting for messages never holds up an
//! enqueue or a poll on another queue.

mod frame;

pub use frame::Frame;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult, IdGenerator, StompConfig};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use super::{Job, JobId, Nack, QueueBackend};

const HEADER_ID: &str = "herald-id";
const HEADER_ATTEMPTS: &str = "herald-attempts";
const HEADER_ENQUEUED_AT: &str = "herald-enqueued-at";
const HEADER_SCHEDULED_DELAY: &str = "AMQ_SCHEDULED_DELAY";

/// How long to wait for CONNECTED and RECEIPT frames.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Read side of a broker session.
struct Reader {
    stream: OwnedReadHalf,
    buf: BytesMut,
    /// Messages read while waiting for a receipt.
    pending: VecDeque<Frame>,
}

impl Reader {
    async fn read_frame(&mut self) -> AppResult<Frame> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf)? {
                if frame.command == "ERROR" {
                    return Err(AppError::Broker(format!(
                        "broker error: {} {}",
                        frame.get("message").unwrap_or_default(),
                        String::from_utf8_lossy(&frame.body)
                    )));
                }
                return Ok(frame);
            }

            let read = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| AppError::Broker(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(AppError::Broker("connection closed by broker".to_string()));
            }
        }
    }

    /// Next MESSAGE, or `None` once `deadline` passes.
    async fn next_message(&mut self, deadline: Instant) -> AppResult<Option<Frame>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        loop {
            let Ok(frame) = timeout_at(deadline, self.read_frame()).await else {
                return Ok(None);
            };
            let frame = frame?;
            if frame.command == "MESSAGE" {
                return Ok(Some(frame));
            }
            debug!(command = %frame.command, "Ignoring unexpected frame");
        }
    }
}

/// An open broker session. Writes and reads are locked separately so acks
/// go out while a poll is waiting.
struct Session {
    /// Unique per backend, so acks from a dropped session are skipped.
    generation: u64,
    writer: Mutex<OwnedWriteHalf>,
    reader: Mutex<Reader>,
    next_receipt: AtomicU64,
}

impl Session {
    async fn write_frame(&self, frame: &Frame) -> AppResult<()> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.writer
            .lock()
            .await
            .write_all(&buf)
            .await
            .map_err(|e| AppError::Broker(format!("write failed: {e}")))
    }

    /// Send a frame and wait for the broker's RECEIPT on `reader`.
    async fn send_confirmed(&self, reader: &mut Reader, frame: Frame) -> AppResult<()> {
        let receipt = format!("r-{}", self.next_receipt.fetch_add(1, Ordering::Relaxed) + 1);
        self.write_frame(&frame.header("receipt", receipt.clone()))
            .await?;

        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            let frame = timeout_at(deadline, reader.read_frame())
                .await
                .map_err(|_| AppError::Broker("timed out waiting for receipt".to_string()))??;
            match frame.command.as_str() {
                "RECEIPT" if frame.get("receipt-id") == Some(receipt.as_str()) => return Ok(()),
                "MESSAGE" => reader.pending.push_back(frame),
                other => debug!(command = %other, "Ignoring unexpected frame"),
            }
        }
    }

    /// Send a frame, waiting for its receipt. Calls are serialized.
    async fn send(&self, frame: Frame) -> AppResult<()> {
        let mut reader = self.reader.lock().await;
        self.send_confirmed(&mut reader, frame).await
    }
}

/// Jobs carried by a STOMP 1.2 broker (ActiveMQ, Artemis, RabbitMQ).
///
/// Sessions are opened on first use. A transport error drops the session
/// and the next call reconnects; messages the broker had handed to the
/// dropped session are redelivered by the broker.
pub struct StompBackend {
    config: StompConfig,
    publisher: Mutex<Option<Arc<Session>>>,
    consumers: Mutex<HashMap<String, Arc<Session>>>,
    generation: AtomicU64,
    id_gen: IdGenerator,
}

impl StompBackend {
    /// Create a backend. Connections are opened on first use.
    #[must_use]
    pub fn new(config: StompConfig) -> Self {
        Self {
            config,
            publisher: Mutex::new(None),
            consumers: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            id_gen: IdGenerator::new(),
        }
    }

    fn destination(&self, queue: &str) -> String {
        format!("/queue/{}{queue}", self.config.prefix)
    }

    async fn open(&self) -> AppResult<Session> {
        let stream = TcpStream::connect(self.config.server.as_str())
            .await
            .map_err(|e| {
                AppError::Broker(format!("connect to {} failed: {e}", self.config.server))
            })?;
        let (read, write) = stream.into_split();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let session = Session {
            generation,
            writer: Mutex::new(write),
            reader: Mutex::new(Reader {
                stream: read,
                buf: BytesMut::with_capacity(8 * 1024),
                pending: VecDeque::new(),
            }),
            next_receipt: AtomicU64::new(0),
        };

        let host = self.config.vhost.clone().unwrap_or_else(|| {
            self.config
                .server
                .split(':')
                .next()
                .unwrap_or("localhost")
                .to_string()
        });
        let mut connect = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0");
        if let Some(login) = &self.config.username {
            connect = connect.header("login", login.clone());
        }
        if let Some(passcode) = &self.config.password {
            connect = connect.header("passcode", passcode.clone());
        }
        session.write_frame(&connect).await?;

        let reply = {
            let mut reader = session.reader.lock().await;
            tokio::time::timeout(REPLY_TIMEOUT, reader.read_frame())
                .await
                .map_err(|_| AppError::Broker("timed out waiting for CONNECTED".to_string()))??
        };
        if reply.command != "CONNECTED" {
            return Err(AppError::Broker(format!(
                "expected CONNECTED, got {}",
                reply.command
            )));
        }

        info!(server = %self.config.server, generation, "STOMP session established");
        Ok(session)
    }

    async fn publisher(&self) -> AppResult<Arc<Session>> {
        let mut slot = self.publisher.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let session = Arc::new(self.open().await?);
        *slot = Some(session.clone());
        Ok(session)
    }

    /// The consuming session of a queue, subscribed with a prefetch of one.
    async fn consumer(&self, queue: &str) -> AppResult<Arc<Session>> {
        let mut consumers = self.consumers.lock().await;
        if let Some(session) = consumers.get(queue) {
            return Ok(session.clone());
        }

        let session = Arc::new(self.open().await?);
        let subscribe = Frame::new("SUBSCRIBE")
            .header("id", queue)
            .header("destination", self.destination(queue))
            .header("ack", "client-individual")
            .header("activemq.prefetchSize", "1")
            .header("prefetch-count", "1");
        session.send(subscribe).await?;

        consumers.insert(queue.to_string(), session.clone());
        Ok(session)
    }

    /// Send on the publishing session, dropping it on failure.
    async fn publish(&self, frame: Frame) -> AppResult<()> {
        let session = self.publisher().await?;
        let result = session.send(frame).await;
        if let Err(e) = &result {
            let mut slot = self.publisher.lock().await;
            if slot
                .as_ref()
                .is_some_and(|current| current.generation == session.generation)
            {
                warn!(error = %e, "Dropping STOMP publisher session");
                *slot = None;
            }
        }
        result
    }

    async fn drop_consumer(&self, queue: &str, generation: u64, error: &AppError) {
        let mut consumers = self.consumers.lock().await;
        if consumers
            .get(queue)
            .is_some_and(|current| current.generation == generation)
        {
            warn!(queue = %queue, error = %error, "Dropping STOMP consumer session");
            consumers.remove(queue);
        }
    }

    fn to_job(&self, queue: &str, generation: u64, frame: &Frame) -> Job {
        let ack_id = frame
            .get("ack")
            .or_else(|| frame.get("message-id"))
            .unwrap_or_default();
        let attempts = frame
            .get(HEADER_ATTEMPTS)
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap_or(0);
        let enqueued_at = frame
            .get(HEADER_ENQUEUED_AT)
            .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
            .map_or_else(Utc::now, |at| at.with_timezone(&Utc));
        let payload = serde_json::from_slice(&frame.body).unwrap_or_else(|e| {
            warn!(queue = %queue, error = %e, "Message body is not JSON");
            Value::String(String::from_utf8_lossy(&frame.body).into_owned())
        });

        Job {
            id: frame
                .get(HEADER_ID)
                .map_or_else(|| self.id_gen.generate(), str::to_string),
            queue: queue.to_string(),
            payload,
            attempts: attempts.saturating_add(1),
            enqueued_at,
            receipt: Some(format!("{generation}/{ack_id}")),
        }
    }

    fn send_frame(
        &self,
        queue: &str,
        id: &str,
        payload: &Value,
        attempts: u32,
        enqueued_at: DateTime<Utc>,
        delay: Duration,
    ) -> AppResult<Frame> {
        let mut frame = Frame::new("SEND")
            .header("destination", self.destination(queue))
            .header("content-type", "application/json")
            .header("persistent", "true")
            .header(HEADER_ID, id)
            .header(HEADER_ATTEMPTS, attempts.to_string())
            .header(HEADER_ENQUEUED_AT, enqueued_at.to_rfc3339());
        if !delay.is_zero() {
            frame = frame.header(HEADER_SCHEDULED_DELAY, delay.as_millis().to_string());
        }
        Ok(frame.body(serde_json::to_vec(payload)?))
    }

    /// ACK a delivery if it belongs to the live session of its queue.
    async fn ack_receipt(&self, job: &Job) -> AppResult<()> {
        let receipt = job
            .receipt
            .as_deref()
            .ok_or_else(|| AppError::Queue(format!("job {} has no stomp receipt", job.id)))?;
        let (generation, ack_id) = receipt
            .split_once('/')
            .and_then(|(generation, ack_id)| Some((generation.parse::<u64>().ok()?, ack_id)))
            .ok_or_else(|| AppError::Queue(format!("malformed stomp receipt: {receipt}")))?;

        let session = self.consumers.lock().await.get(&job.queue).cloned();
        let Some(session) = session.filter(|session| session.generation == generation) else {
            debug!(job_id = %job.id, "Skipping ack from a previous session");
            return Ok(());
        };

        let result = session
            .write_frame(&Frame::new("ACK").header("id", ack_id))
            .await;
        if let Err(e) = &result {
            self.drop_consumer(&job.queue, generation, e).await;
        }
        result
    }
}

#[async_trait]
impl QueueBackend for StompBackend {
    fn name(&self) -> &'static str {
        "stomp"
    }

    async fn enqueue(&self, queue: &str, payload: Value) -> AppResult<JobId> {
        let id = self.id_gen.generate();
        let frame = self.send_frame(queue, &id, &payload, 0, Utc::now(), Duration::ZERO)?;
        self.publish(frame).await?;

        debug!(job_id = %id, queue = %queue, "Queued job");
        Ok(id)
    }

    async fn poll(&self, queue: &str) -> AppResult<Option<Job>> {
        let deadline = Instant::now() + Duration::from_millis(self.config.poll_timeout_ms);
        let session = self.consumer(queue).await?;

        // Another worker is already waiting on this queue.
        let Ok(mut reader) = timeout_at(deadline, session.reader.lock()).await else {
            return Ok(None);
        };
        let received = reader.next_message(deadline).await;
        drop(reader);

        match received {
            Ok(frame) => Ok(frame.map(|frame| self.to_job(queue, session.generation, &frame))),
            Err(e) => {
                self.drop_consumer(queue, session.generation, &e).await;
                Err(e)
            }
        }
    }

    async fn ack(&self, job: &Job) -> AppResult<()> {
        self.ack_receipt(job).await
    }

    async fn nack(&self, job: &Job, nack: Nack) -> AppResult<()> {
        let attempts = match nack {
            Nack::Requeue { delay } => Some((delay, job.attempts)),
            Nack::Defer { delay } => Some((delay, job.attempts.saturating_sub(1))),
            Nack::Discard => None,
        };

        if let Some((delay, attempts)) = attempts {
            let frame = self.send_frame(
                &job.queue,
                &job.id,
                &job.payload,
                attempts,
                job.enqueued_at,
                delay,
            )?;
            self.publish(frame).await?;
        }
        self.ack_receipt(job).await
    }
}
