//! Purely in-memory worker, the authoritative tier for local setups.

use crate::block::BlockId;
use crate::conf::WriteType;
use crate::error::{Result, TfsError};
use crate::worker::BlockWorker;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Worker that keeps every block in a process-local map. There is no
/// understore behind it, so all write policies land in the same tier and
/// nothing is ever evicted.
pub struct InMemoryWorker {
    blocks: RwLock<HashMap<BlockId, Bytes>>,
}

impl InMemoryWorker {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockWorker for InMemoryWorker {
    async fn fetch_block(&self, id: BlockId) -> Result<Bytes> {
        let blocks = self.blocks.read().await;
        blocks.get(&id).cloned().ok_or(TfsError::BlockUnavailable {
            file_id: id.file_id,
            index: id.index,
        })
    }

    async fn write_block(&self, id: BlockId, data: Bytes, _policy: WriteType) -> Result<()> {
        // Single tier: every policy stores to the map.
        self.blocks.write().await.insert(id, data);
        Ok(())
    }

    async fn remove_block(&self, id: BlockId) -> Result<()> {
        self.blocks.write().await.remove(&id);
        Ok(())
    }

    async fn contains_block(&self, id: BlockId) -> Result<bool> {
        Ok(self.blocks.read().await.contains_key(&id))
    }
}
