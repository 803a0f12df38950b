//! Block-serving workers: the service contract plus the bundled
//! in-memory and object-store-backed implementations.

pub mod client;
pub mod mem;
pub mod object;

pub use client::WorkerClient;
pub use mem::InMemoryWorker;
pub use object::ObjectWorker;

use crate::block::BlockId;
use crate::conf::WriteType;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Contract of a block-serving service. Payloads travel as owned [`Bytes`]
/// so a fetch can hand out a cached block without copying it.
#[async_trait]
pub trait BlockWorker: Send + Sync + 'static {
    /// Fetch the stored bytes of a block. For an incomplete file this is the
    /// committed prefix, which may be shorter than the block size.
    ///
    /// Fails with `BlockUnavailable` when no tier of the worker holds the
    /// block.
    async fn fetch_block(&self, id: BlockId) -> Result<Bytes>;

    /// Store the bytes of a block, placed per the write policy. Writing an
    /// id that already exists replaces the previous bytes, which is how a
    /// flushed prefix grows across flushes.
    async fn write_block(&self, id: BlockId, data: Bytes, policy: WriteType) -> Result<()>;

    /// Drop a block from every tier. Removing an absent block is not an
    /// error so that cancellation can sweep a range of indices.
    async fn remove_block(&self, id: BlockId) -> Result<()>;

    async fn contains_block(&self, id: BlockId) -> Result<bool>;
}
