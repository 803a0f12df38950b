//! Client facade: path operations, file handles and stream factories.

use crate::block::BlockId;
use crate::block::in_stream::FileInStream;
use crate::block::locator::{BlockDescriptor, BlockLocator, Locality};
use crate::block::out_stream::FileOutStream;
use crate::buffer::BufferHandle;
use crate::conf::{ClientConf, KvConf, ReadType, WriteType};
use crate::context::FsContext;
use crate::error::{Result, TfsError};
use crate::kv::KvStore;
use crate::master::{FileMetadata, InMemoryMaster, MasterClient};
use crate::uri::TfsUri;
use crate::ustore::ObjectBackend;
use crate::worker::{BlockWorker, InMemoryWorker, ObjectWorker};
use std::sync::Arc;

/// Entry point to the store. Generic over the two collaborators so local
/// setups, object-backed setups and test doubles all share one code path.
pub struct Client<M: MasterClient, W: BlockWorker> {
    ctx: FsContext<M, W>,
    /// Path-independent metadata snapshots, consulted when callers opt in
    /// with `use_cached`.
    meta_cache: moka::future::Cache<i64, FileMetadata>,
}

impl Client<InMemoryMaster, InMemoryWorker> {
    /// Fully in-process store: in-memory namespace and worker.
    pub fn new_local(conf: ClientConf) -> Self {
        Self::new(
            Arc::new(InMemoryMaster::new()),
            Arc::new(InMemoryWorker::new()),
            conf,
        )
    }
}

impl<B: ObjectBackend> Client<InMemoryMaster, ObjectWorker<B>> {
    /// In-memory namespace over a worker with a durable understore.
    pub fn with_backend(backend: B, conf: ClientConf) -> Self {
        Self::new(
            Arc::new(InMemoryMaster::new()),
            Arc::new(ObjectWorker::new(backend)),
            conf,
        )
    }
}

impl<M: MasterClient, W: BlockWorker> Client<M, W> {
    pub fn new(master: Arc<M>, worker: Arc<W>, conf: ClientConf) -> Self {
        Self {
            ctx: FsContext::new(master, worker, conf),
            meta_cache: moka::future::Cache::new(10_000),
        }
    }

    pub fn conf(&self) -> &ClientConf {
        self.ctx.conf()
    }

    pub(crate) fn ctx(&self) -> &FsContext<M, W> {
        &self.ctx
    }

    /// Allocate a buffer suitable for `KvStore::get` and direct fills.
    pub fn allocate_buffer(&self, capacity: usize) -> BufferHandle {
        BufferHandle::with_capacity(capacity)
    }

    pub async fn get_file(&self, path: &str) -> Result<FileHandle<M, W>> {
        let uri = TfsUri::parse(path)?;
        let id = self.ctx.master().resolve(&uri).await?;
        let meta = self.fetch_meta(id).await?;
        Ok(FileHandle {
            ctx: self.ctx.clone(),
            meta,
        })
    }

    /// Handle by id. With `use_cached` a previously fetched snapshot is
    /// served without a master round trip; the snapshot may lag the
    /// namespace.
    pub async fn get_file_by_id(&self, file_id: i64, use_cached: bool) -> Result<FileHandle<M, W>> {
        let meta = if use_cached {
            match self.meta_cache.get(&file_id).await {
                Some(meta) => meta,
                None => self.fetch_meta(file_id).await?,
            }
        } else {
            self.fetch_meta(file_id).await?
        };
        Ok(FileHandle {
            ctx: self.ctx.clone(),
            meta,
        })
    }

    pub async fn get_file_id(&self, path: &str) -> Result<i64> {
        let uri = TfsUri::parse(path)?;
        self.ctx.master().resolve(&uri).await
    }

    /// Create a file with the configured block size, creating missing
    /// parent directories along the way.
    pub async fn create_file(&self, path: &str) -> Result<FileHandle<M, W>> {
        let uri = TfsUri::parse(path)?;
        let id = self
            .ctx
            .master()
            .create_file(&uri, self.ctx.conf().block_size)
            .await?;
        let meta = self.fetch_meta(id).await?;
        Ok(FileHandle {
            ctx: self.ctx.clone(),
            meta,
        })
    }

    /// `false` when the directory already exists or the parent is missing.
    pub async fn mkdir(&self, path: &str) -> Result<bool> {
        self.mkdirs(path, false).await
    }

    pub async fn mkdirs(&self, path: &str, recursive: bool) -> Result<bool> {
        let uri = TfsUri::parse(path)?;
        self.ctx.master().mkdir(&uri, recursive).await
    }

    /// `false` when nothing lives at the path. Deleting the root is
    /// `PermissionDenied`.
    pub async fn delete_path(&self, path: &str, recursive: bool) -> Result<bool> {
        let uri = TfsUri::parse(path)?;
        match self.ctx.master().resolve(&uri).await {
            Ok(id) => self.delete_file_id(id, recursive).await,
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_file_id(&self, file_id: i64, recursive: bool) -> Result<bool> {
        let deleted = self.ctx.master().delete(file_id, recursive).await?;
        if deleted {
            self.meta_cache.invalidate(&file_id).await;
        }
        Ok(deleted)
    }

    /// Children of a directory; a file lists itself.
    pub async fn list_path(&self, path: &str) -> Result<Vec<FileMetadata>> {
        let uri = TfsUri::parse(path)?;
        let id = self.ctx.master().resolve(&uri).await?;
        self.ctx.master().list(id).await
    }

    /// A KV store over one backing file at `path`. Call `init` before use.
    pub fn kv_store(&self, path: &str, conf: KvConf) -> Result<KvStore<M, W>> {
        let uri = TfsUri::parse(path)?;
        Ok(KvStore::new(self.ctx.clone(), uri, conf))
    }

    async fn fetch_meta(&self, file_id: i64) -> Result<FileMetadata> {
        let meta = self.ctx.master().get_metadata(file_id).await?;
        self.meta_cache.insert(file_id, meta.clone()).await;
        Ok(meta)
    }
}

/// Snapshot-backed handle to one file or directory.
pub struct FileHandle<M: MasterClient, W: BlockWorker> {
    ctx: FsContext<M, W>,
    meta: FileMetadata,
}

impl<M: MasterClient, W: BlockWorker> FileHandle<M, W> {
    pub fn file_id(&self) -> i64 {
        self.meta.file_id
    }

    pub fn path(&self) -> &str {
        &self.meta.path
    }

    pub fn length(&self) -> u64 {
        self.meta.length
    }

    pub fn block_size(&self) -> u64 {
        self.meta.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.meta.block_count()
    }

    pub fn is_file(&self) -> bool {
        self.meta.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.meta.is_directory()
    }

    pub fn is_complete(&self) -> bool {
        self.meta.complete
    }

    /// Whether every block of the file is held by a worker's memory tier.
    pub fn is_in_memory(&self) -> bool {
        self.meta.in_memory
    }

    pub fn need_pin(&self) -> bool {
        self.meta.pinned
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.meta
    }

    /// Re-pull the namespace snapshot this handle serves from.
    pub async fn refresh(&mut self) -> Result<()> {
        self.meta = self.ctx.master().get_metadata(self.meta.file_id).await?;
        Ok(())
    }

    pub async fn set_pinned(&mut self, pinned: bool) -> Result<()> {
        self.ctx
            .master()
            .set_pinned(self.meta.file_id, pinned)
            .await?;
        self.meta.pinned = pinned;
        Ok(())
    }

    pub fn in_stream(&self, read_type: ReadType) -> Result<FileInStream<M, W>> {
        if !self.meta.is_file() {
            return Err(TfsError::invalid_argument(format!(
                "{} is a directory",
                self.meta.path
            )));
        }
        Ok(FileInStream::new(
            self.ctx.clone(),
            self.meta.clone(),
            read_type,
        ))
    }

    /// Writer for this file. A fresh file starts at offset zero; an
    /// incomplete file with flushed data resumes at its end. Complete files
    /// are immutable and refuse.
    pub async fn out_stream(&self, write_type: WriteType) -> Result<FileOutStream<M, W>> {
        if !self.meta.is_file() {
            return Err(TfsError::invalid_argument(format!(
                "{} is a directory",
                self.meta.path
            )));
        }
        let fresh = self.ctx.master().get_metadata(self.meta.file_id).await?;
        if fresh.complete {
            return Err(TfsError::invalid_argument(format!(
                "{} is complete and cannot be rewritten",
                fresh.path
            )));
        }
        if fresh.length == 0 {
            Ok(FileOutStream::new(self.ctx.clone(), &fresh, write_type))
        } else {
            FileOutStream::resume(self.ctx.clone(), &fresh, write_type).await
        }
    }

    /// Whole-block read through the locality dispatch. Holes come back as
    /// zeros without touching any worker.
    pub async fn read_block(&self, index: u32) -> Result<BufferHandle> {
        if !self.meta.is_file() {
            return Err(TfsError::invalid_argument(format!(
                "{} is a directory",
                self.meta.path
            )));
        }
        let meta = if self.meta.complete {
            self.meta.clone()
        } else {
            self.ctx.master().get_metadata(self.meta.file_id).await?
        };
        let read_type = self.ctx.conf().read_type;
        let desc = BlockLocator::new(&self.ctx).locate(&meta, index).await?;
        match desc.locality {
            Locality::Empty => {
                let mut buf = BufferHandle::with_capacity(desc.len as usize);
                buf.set_len(desc.len as usize)?;
                Ok(buf)
            }
            Locality::Local => {
                if let Some(data) = self.ctx.cache().get(desc.id, read_type.promotes()).await
                    && data.len() as u64 >= desc.len
                {
                    return Ok(BufferHandle::from_bytes(data.slice(0..desc.len as usize)));
                }
                self.fetch_into_buffer(desc, read_type).await
            }
            Locality::Remote => self.fetch_into_buffer(desc, read_type).await,
        }
    }

    /// Pull every stored block of a complete file back into the local cache
    /// tier. `false` when the file is not recacheable or a block has gone
    /// missing.
    pub async fn recache(&self) -> Result<bool> {
        if !self.meta.is_file() || !self.meta.complete {
            return Ok(false);
        }
        for index in 0..self.meta.block_count() {
            if self.meta.committed_len(index) == 0 {
                continue;
            }
            let id = BlockId::new(self.meta.file_id, index);
            if self.ctx.cache().contains(id).await {
                continue;
            }
            match self.ctx.worker().fetch_block(id).await {
                Ok(data) => self.ctx.cache().insert(id, data).await,
                Err(TfsError::BlockUnavailable { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    async fn fetch_into_buffer(
        &self,
        desc: BlockDescriptor,
        read_type: ReadType,
    ) -> Result<BufferHandle> {
        let data = self.ctx.worker().fetch_block(desc.id).await?;
        if read_type.caches() {
            self.ctx.cache().insert(desc.id, data.clone()).await;
        }
        let view = if data.len() as u64 > desc.len {
            data.slice(0..desc.len as usize)
        } else {
            data
        };
        Ok(BufferHandle::from_bytes(view))
    }
}
