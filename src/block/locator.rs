//! Per-block locality resolution.
//!
//! Locality is advisory and point in time: a block can be evicted between
//! classification and the read, so stream code treats `Local` as a hint and
//! falls back to the worker when the cache misses.

use crate::block::BlockId;
use crate::conf::IncompleteBlockPolicy;
use crate::context::FsContext;
use crate::error::{Result, TfsError};
use crate::master::{FileMetadata, MasterClient};
use crate::worker::BlockWorker;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    /// Served from the client-side cache without a worker call.
    Local,
    /// Held by a worker; a fetch is required.
    Remote,
    /// Nothing stored; reads see zeros.
    Empty,
}

/// Where one block's bytes come from, and how many of them are readable.
#[derive(Debug, Clone, Copy)]
pub struct BlockDescriptor {
    pub id: BlockId,
    pub len: u64,
    pub locality: Locality,
}

pub struct BlockLocator<'a, M: MasterClient, W: BlockWorker> {
    ctx: &'a FsContext<M, W>,
}

impl<'a, M: MasterClient, W: BlockWorker> BlockLocator<'a, M, W> {
    pub fn new(ctx: &'a FsContext<M, W>) -> Self {
        Self { ctx }
    }

    /// Resolve the locality of `index` under the given metadata snapshot.
    ///
    /// Complete files reject out-of-range indices. For an incomplete file an
    /// index past the known blocks is governed by the configured policy:
    /// treat it as empty, or poll the namespace until the writer commits it.
    pub async fn locate(&self, meta: &FileMetadata, index: u32) -> Result<BlockDescriptor> {
        if meta.complete {
            if index >= meta.block_count() {
                return Err(TfsError::invalid_argument(format!(
                    "block {index} out of range for {} ({} blocks)",
                    meta.path,
                    meta.block_count()
                )));
            }
            return self.classify(meta, index).await;
        }

        if index >= meta.block_count() {
            return match self.ctx.conf().incomplete_block_policy {
                IncompleteBlockPolicy::TreatEmpty => Ok(BlockDescriptor {
                    id: BlockId::new(meta.file_id, index),
                    len: meta.layout().len_of_block(meta.length, index),
                    locality: Locality::Empty,
                }),
                IncompleteBlockPolicy::Wait => self.wait_for_block(meta.file_id, index).await,
            };
        }
        self.classify(meta, index).await
    }

    async fn classify(&self, meta: &FileMetadata, index: u32) -> Result<BlockDescriptor> {
        let id = BlockId::new(meta.file_id, index);
        let committed = meta.committed_len(index);
        if committed == 0 {
            // A hole: the writer skipped it or never flushed it.
            return Ok(BlockDescriptor {
                id,
                len: meta.layout().len_of_block(meta.length, index),
                locality: Locality::Empty,
            });
        }
        let locality = if self.ctx.cache().contains(id).await {
            Locality::Local
        } else {
            Locality::Remote
        };
        Ok(BlockDescriptor {
            id,
            len: committed,
            locality,
        })
    }

    async fn wait_for_block(&self, file_id: i64, index: u32) -> Result<BlockDescriptor> {
        let conf = self.ctx.conf();
        for attempt in 0..conf.block_wait_attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(conf.block_wait_interval_ms)).await;
            }
            let fresh = self.ctx.master().get_metadata(file_id).await?;
            if index < fresh.block_count() {
                return self.classify(&fresh, index).await;
            }
        }
        Err(TfsError::BlockUnavailable { file_id, index })
    }
}
