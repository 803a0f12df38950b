//! Worker with a memory tier in front of a durable object understore.

use crate::block::BlockId;
use crate::conf::WriteType;
use crate::error::{Result, TfsError};
use crate::ustore::ObjectBackend;
use crate::worker::BlockWorker;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Two-tier worker: hot blocks live in a process-local map, the understore
/// keeps the durable copy. The write policy decides which tiers a block
/// lands in; fetches try memory first and fall back to the understore
/// without promoting, so promotion stays an explicit recache.
pub struct ObjectWorker<B: ObjectBackend> {
    tier: RwLock<HashMap<BlockId, Bytes>>,
    backend: Arc<B>,
}

impl<B: ObjectBackend> ObjectWorker<B> {
    pub fn new(backend: B) -> Self {
        Self {
            tier: RwLock::new(HashMap::new()),
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    async fn persist(&self, id: BlockId, data: &[u8]) -> Result<()> {
        self.backend
            .put_object(&id.object_key(), data)
            .await
            .map_err(|e| TfsError::unavailable(format!("understore put {id}: {e}")))
    }
}

#[async_trait]
impl<B: ObjectBackend> BlockWorker for ObjectWorker<B> {
    async fn fetch_block(&self, id: BlockId) -> Result<Bytes> {
        if let Some(data) = self.tier.read().await.get(&id) {
            return Ok(data.clone());
        }
        match self.backend.get_object(&id.object_key()).await {
            Ok(Some(data)) => Ok(Bytes::from(data)),
            Ok(None) => Err(TfsError::BlockUnavailable {
                file_id: id.file_id,
                index: id.index,
            }),
            Err(e) => Err(TfsError::unavailable(format!("understore get {id}: {e}"))),
        }
    }

    async fn write_block(&self, id: BlockId, data: Bytes, policy: WriteType) -> Result<()> {
        match policy {
            // The embedded memory tier never refuses an insert, so the
            // must/try distinction collapses to the same placement.
            WriteType::MustCache | WriteType::TryCache => {
                self.tier.write().await.insert(id, data);
            }
            WriteType::Through => {
                self.persist(id, &data).await?;
            }
            WriteType::CacheThrough => {
                self.persist(id, &data).await?;
                self.tier.write().await.insert(id, data);
            }
            WriteType::AsyncThrough => {
                self.tier.write().await.insert(id, data.clone());
                let backend = Arc::clone(&self.backend);
                tokio::spawn(async move {
                    if let Err(e) = backend.put_object(&id.object_key(), &data).await {
                        warn!("async understore put {id} failed: {e}");
                    }
                });
            }
        }
        Ok(())
    }

    async fn remove_block(&self, id: BlockId) -> Result<()> {
        self.tier.write().await.remove(&id);
        self.backend
            .delete_object(&id.object_key())
            .await
            .map_err(|e| TfsError::unavailable(format!("understore delete {id}: {e}")))
    }

    async fn contains_block(&self, id: BlockId) -> Result<bool> {
        if self.tier.read().await.contains_key(&id) {
            return Ok(true);
        }
        self.backend
            .exists(&id.object_key())
            .await
            .map_err(|e| TfsError::unavailable(format!("understore head {id}: {e}")))
    }
}
