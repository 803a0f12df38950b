//! Collaborator context threaded explicitly through handles and streams.
//!
//! Everything that talks to the services carries one of these instead of
//! reaching for process-global state, so two clients with different
//! configurations can coexist in one process.

use crate::block::cache::BlockCache;
use crate::block::layout::BlockLayout;
use crate::conf::ClientConf;
use crate::master::MasterClient;
use crate::worker::{BlockWorker, WorkerClient};
use std::sync::Arc;

pub struct FsContext<M: MasterClient, W: BlockWorker> {
    master: Arc<M>,
    worker: WorkerClient<W>,
    cache: Arc<BlockCache>,
    conf: ClientConf,
}

// Derived Clone would demand M: Clone + W: Clone; the context only clones
// handles.
impl<M: MasterClient, W: BlockWorker> Clone for FsContext<M, W> {
    fn clone(&self) -> Self {
        Self {
            master: Arc::clone(&self.master),
            worker: self.worker.clone(),
            cache: Arc::clone(&self.cache),
            conf: self.conf.clone(),
        }
    }
}

impl<M: MasterClient, W: BlockWorker> FsContext<M, W> {
    pub fn new(master: Arc<M>, worker: Arc<W>, conf: ClientConf) -> Self {
        let worker = WorkerClient::new(worker, conf.retry, conf.rpc_timeout);
        let cache = Arc::new(BlockCache::new(&conf.cache));
        Self {
            master,
            worker,
            cache,
            conf,
        }
    }

    pub fn master(&self) -> &M {
        &self.master
    }

    pub fn worker(&self) -> &WorkerClient<W> {
        &self.worker
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn cache_arc(&self) -> Arc<BlockCache> {
        Arc::clone(&self.cache)
    }

    pub fn conf(&self) -> &ClientConf {
        &self.conf
    }

    /// Layout for the client's default block size. Per-file layouts come
    /// from the file's own metadata.
    pub fn default_layout(&self) -> BlockLayout {
        BlockLayout::new(self.conf.block_size)
    }
}
