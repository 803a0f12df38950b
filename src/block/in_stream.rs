//! Readable streams over a file's blocks.
//!
//! A [`FileInStream`] advances through per-block streams, dispatching on the
//! locality the locator resolved for each block: cached bytes are served
//! in-process, remote blocks are fetched whole from a worker, and holes read
//! as zeros without any storage call. Block boundaries re-validate locality
//! and, for incomplete files, refresh the extent so a reader sees flushed
//! data as soon as the namespace does.

use crate::block::BlockId;
use crate::block::cache::BlockCache;
use crate::block::locator::{BlockDescriptor, BlockLocator, Locality};
use crate::conf::ReadType;
use crate::context::FsContext;
use crate::error::{Result, TfsError};
use crate::master::{FileMetadata, MasterClient};
use crate::worker::{BlockWorker, WorkerClient};
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Zero-filled view over a block that nothing stores.
pub struct EmptyBlockInStream {
    len: u64,
    pos: u64,
}

impl EmptyBlockInStream {
    pub fn new(len: u64) -> Self {
        Self { len, pos: 0 }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.pos >= self.len {
            return 0;
        }
        let n = (buf.len() as u64).min(self.len - self.pos) as usize;
        buf[..n].fill(0);
        self.pos += n as u64;
        n
    }

    fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }
}

/// Reads out of bytes already resident in the client cache.
pub struct LocalBlockInStream {
    data: Bytes,
    pos: u64,
}

impl LocalBlockInStream {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let len = self.data.len();
        let pos = self.pos as usize;
        if pos >= len {
            return 0;
        }
        let n = buf.len().min(len - pos);
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.pos += n as u64;
        n
    }

    fn remaining(&self) -> u64 {
        (self.data.len() as u64).saturating_sub(self.pos)
    }
}

/// Fetches a whole block from a worker on first touch, then reads out of
/// the fetched bytes. Populates the client cache per the read policy.
pub struct RemoteBlockInStream<W: BlockWorker> {
    id: BlockId,
    len: u64,
    pos: u64,
    read_type: ReadType,
    worker: WorkerClient<W>,
    cache: Arc<BlockCache>,
    data: Option<Bytes>,
}

impl<W: BlockWorker> RemoteBlockInStream<W> {
    pub fn new(
        id: BlockId,
        len: u64,
        read_type: ReadType,
        worker: WorkerClient<W>,
        cache: Arc<BlockCache>,
    ) -> Self {
        Self {
            id,
            len,
            pos: 0,
            read_type,
            worker,
            cache,
            data: None,
        }
    }

    async fn ensure_loaded(&mut self) -> Result<()> {
        if self.data.is_some() {
            return Ok(());
        }
        let fetched = self.worker.fetch_block(self.id).await?;
        if (fetched.len() as u64) < self.len {
            warn!(
                "block {} served {} of {} expected bytes",
                self.id,
                fetched.len(),
                self.len
            );
            self.len = fetched.len() as u64;
        }
        if self.read_type.caches() {
            self.cache.insert(self.id, fetched.clone()).await;
        }
        self.data = Some(fetched);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_loaded().await?;
        if self.pos >= self.len {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(self.len - self.pos) as usize;
        let pos = self.pos as usize;
        let data = self.data.as_ref().expect("loaded above");
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }
}

/// One open block, dispatched by locality.
pub enum BlockInStream<W: BlockWorker> {
    Empty(EmptyBlockInStream),
    Local(LocalBlockInStream),
    Remote(RemoteBlockInStream<W>),
}

impl<W: BlockWorker> BlockInStream<W> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            BlockInStream::Empty(s) => Ok(s.read(buf)),
            BlockInStream::Local(s) => Ok(s.read(buf)),
            BlockInStream::Remote(s) => s.read(buf).await,
        }
    }

    fn remaining(&self) -> u64 {
        match self {
            BlockInStream::Empty(s) => s.remaining(),
            BlockInStream::Local(s) => s.remaining(),
            BlockInStream::Remote(s) => s.remaining(),
        }
    }

    fn seek_to(&mut self, offset: u64) {
        match self {
            BlockInStream::Empty(s) => s.pos = offset,
            BlockInStream::Local(s) => s.pos = offset,
            BlockInStream::Remote(s) => s.pos = offset,
        }
    }
}

/// Sequential reader over a whole file.
pub struct FileInStream<M: MasterClient, W: BlockWorker> {
    ctx: FsContext<M, W>,
    meta: FileMetadata,
    read_type: ReadType,
    pos: u64,
    current: Option<(u32, BlockInStream<W>)>,
    closed: bool,
}

impl<M: MasterClient, W: BlockWorker> FileInStream<M, W> {
    pub(crate) fn new(ctx: FsContext<M, W>, meta: FileMetadata, read_type: ReadType) -> Self {
        Self {
            ctx,
            meta,
            read_type,
            pos: 0,
            current: None,
            closed: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Fill `buf`, crossing block boundaries as needed. Returns the number
    /// of bytes read, `0` only at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut filled = 0usize;
        while filled < buf.len() {
            if self.pos >= self.meta.length {
                if self.meta.complete {
                    break;
                }
                // The writer may have flushed more since our snapshot.
                self.refresh_meta().await?;
                if self.pos >= self.meta.length {
                    break;
                }
            }
            let layout = self.meta.layout();
            let index = layout.block_index_of(self.pos);
            let reusable = matches!(&self.current, Some((i, s)) if *i == index && s.remaining() > 0);
            if !reusable {
                self.open_block(index).await?;
            }
            let remaining_in_file = self.meta.length - self.pos;
            let want = ((buf.len() - filled) as u64).min(remaining_in_file) as usize;
            let (_, stream) = self.current.as_mut().expect("open_block sets the stream");
            let n = stream.read(&mut buf[filled..filled + want]).await?;
            if n == 0 {
                break;
            }
            filled += n;
            self.pos += n as u64;
        }
        Ok(filled)
    }

    /// Single-byte read; `None` at end of file.
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.read(&mut b).await? {
            0 => Ok(None),
            _ => Ok(Some(b[0])),
        }
    }

    /// Reposition the stream. Seeking past the end of a complete file is
    /// rejected; on an incomplete file the extent is unknown, so any
    /// position is accepted and reads report end of file.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.ensure_open()?;
        if self.meta.complete && pos > self.meta.length {
            return Err(TfsError::invalid_argument(format!(
                "seek to {pos} past end of {} ({} bytes)",
                self.meta.path, self.meta.length
            )));
        }
        self.reposition(pos);
        Ok(())
    }

    /// Advance up to `n` bytes without surfacing them. Returns how far the
    /// stream actually moved, which is short only at end of file.
    pub async fn skip(&mut self, n: u64) -> Result<u64> {
        self.ensure_open()?;
        if n == 0 {
            return Ok(0);
        }
        if !self.meta.complete {
            self.refresh_meta().await?;
        }
        let skipped = n.min(self.meta.length.saturating_sub(self.pos));
        self.reposition(self.pos + skipped);
        Ok(skipped)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(TfsError::AlreadyClosed);
        }
        self.closed = true;
        self.current = None;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TfsError::StreamClosed);
        }
        Ok(())
    }

    fn reposition(&mut self, pos: u64) {
        let layout = self.meta.layout();
        match &mut self.current {
            Some((i, s)) if *i == layout.block_index_of(pos) => {
                s.seek_to(layout.offset_in_block(pos));
            }
            _ => self.current = None,
        }
        self.pos = pos;
    }

    async fn refresh_meta(&mut self) -> Result<()> {
        self.meta = self.ctx.master().get_metadata(self.meta.file_id).await?;
        Ok(())
    }

    async fn open_block(&mut self, index: u32) -> Result<()> {
        if !self.meta.complete {
            self.refresh_meta().await?;
        }
        let layout = self.meta.layout();
        let offset = layout.offset_in_block(self.pos);
        let block_extent = layout.len_of_block(self.meta.length, index);
        let desc = BlockLocator::new(&self.ctx).locate(&self.meta, index).await?;
        let mut stream = if offset >= desc.len {
            // Committed data ends inside this block; the rest of its extent
            // reads as zeros.
            BlockInStream::Empty(EmptyBlockInStream::new(block_extent))
        } else {
            self.materialize(desc).await?
        };
        stream.seek_to(offset);
        self.current = Some((index, stream));
        Ok(())
    }

    async fn materialize(&self, desc: BlockDescriptor) -> Result<BlockInStream<W>> {
        match desc.locality {
            Locality::Empty => Ok(BlockInStream::Empty(EmptyBlockInStream::new(desc.len))),
            Locality::Local => {
                match self.ctx.cache().get(desc.id, self.read_type.promotes()).await {
                    Some(data) if data.len() as u64 >= desc.len => Ok(BlockInStream::Local(
                        LocalBlockInStream::new(data.slice(0..desc.len as usize)),
                    )),
                    // Evicted or stale since classification; fetch instead.
                    _ => Ok(self.remote(desc)),
                }
            }
            Locality::Remote => Ok(self.remote(desc)),
        }
    }

    fn remote(&self, desc: BlockDescriptor) -> BlockInStream<W> {
        BlockInStream::Remote(RemoteBlockInStream::new(
            desc.id,
            desc.len,
            self.read_type,
            self.ctx.worker().clone(),
            self.ctx.cache_arc(),
        ))
    }
}
