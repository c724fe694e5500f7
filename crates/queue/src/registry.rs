//! Queue name to handler mapping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{AppError, AppResult, DeliveryOutcome};
use tracing::warn;

use crate::backend::Job;

/// Processes jobs of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt of a job.
    async fn handle(&self, job: &Job) -> DeliveryOutcome;
}

/// Handlers by queue name.
///
/// Built once at startup and shared by `Arc`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a queue, replacing any previous one.
    pub fn register(&mut self, queue: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let queue = queue.into();
        if self.handlers.insert(queue.clone(), handler).is_some() {
            warn!(queue = %queue, "Replacing already registered queue handler");
        }
    }

    /// Handler for a queue.
    pub fn resolve(&self, queue: &str) -> AppResult<Arc<dyn JobHandler>> {
        self.handlers
            .get(queue)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("no handler registered for queue '{queue}'")))
    }

    /// Registered queue names, sorted.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check that every queue has a handler.
    pub fn validate(&self, queues: &[String]) -> AppResult<()> {
        let missing: Vec<&str> = queues
            .iter()
            .filter(|queue| !self.handlers.contains_key(queue.as_str()))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(format!(
                "no handler registered for queues: {}",
                missing.join(", ")
            )))
        }
    }
}
