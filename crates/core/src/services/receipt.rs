//! Idempotency ledger for fan-out.

use async_trait::async_trait;
use herald_common::AppResult;
use herald_db::repositories::FanoutReceiptRepository;

/// Records which (activity, target) keys have been dispatched.
#[async_trait]
pub trait ReceiptLedger: Send + Sync {
    /// Record `key`. Returns false if it was recorded before.
    async fn claim(&self, key: &str) -> AppResult<bool>;

    /// Forget `key` after a failed dispatch.
    async fn release(&self, key: &str) -> AppResult<()>;
}

#[async_trait]
impl ReceiptLedger for FanoutReceiptRepository {
    async fn claim(&self, key: &str) -> AppResult<bool> {
        Self::claim(self, key).await
    }

    async fn release(&self, key: &str) -> AppResult<()> {
        Self::release(self, key).await
    }
}
