//! Retrying client-side wrapper around a block worker.
//!
//! Every call gets a deadline, and transient failures (`ServiceUnavailable`,
//! including timeouts) are retried with exponential backoff plus a small
//! jitter. `BlockUnavailable` and the rest of the taxonomy pass straight
//! through: callers decide how to handle a missing block.

use crate::block::BlockId;
use crate::conf::{RetryConf, WriteType};
use crate::error::{Result, TfsError};
use crate::worker::BlockWorker;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct WorkerClient<W> {
    inner: Arc<W>,
    retry: RetryConf,
    timeout: Duration,
}

// Derived Clone would demand W: Clone; the handle only clones the Arc.
impl<W> Clone for WorkerClient<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            retry: self.retry,
            timeout: self.timeout,
        }
    }
}

impl<W: BlockWorker> WorkerClient<W> {
    pub fn new(inner: Arc<W>, retry: RetryConf, timeout: Duration) -> Self {
        Self {
            inner,
            retry,
            timeout,
        }
    }

    pub fn inner(&self) -> &Arc<W> {
        &self.inner
    }

    pub async fn fetch_block(&self, id: BlockId) -> Result<Bytes> {
        self.call("fetch_block", || self.inner.fetch_block(id)).await
    }

    pub async fn write_block(&self, id: BlockId, data: Bytes, policy: WriteType) -> Result<()> {
        self.call("write_block", || {
            self.inner.write_block(id, data.clone(), policy)
        })
        .await
    }

    pub async fn remove_block(&self, id: BlockId) -> Result<()> {
        self.call("remove_block", || self.inner.remove_block(id))
            .await
    }

    pub async fn contains_block(&self, id: BlockId) -> Result<bool> {
        self.call("contains_block", || self.inner.contains_block(id))
            .await
    }

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, f()).await {
                Ok(res) => res,
                Err(_) => Err(TfsError::unavailable(format!(
                    "{op} timed out after {:?}",
                    self.timeout
                ))),
            };
            match outcome {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!("{op} attempt {attempt} failed, retrying in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        use rand::RngCore;
        let exp = (attempt - 1).min(16);
        let base = self.retry.initial_delay_ms.saturating_mul(1u64 << exp);
        let jitter = rand::rng().next_u64() % 20;
        Duration::from_millis(base.saturating_add(jitter))
    }
}
