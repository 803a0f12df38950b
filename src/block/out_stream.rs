//! Writable streams: append-only, block at a time.
//!
//! A [`FileOutStream`] buffers into the current block and pushes it to a
//! worker when the block fills or the caller flushes. Every push commits the
//! block's length with the namespace, so flushed bytes become readable
//! before the file is completed. `close` seals the file; `cancel` unwinds
//! it. The two are mutually exclusive and terminal.

use crate::block::BlockId;
use crate::block::layout::BlockLayout;
use crate::conf::WriteType;
use crate::context::FsContext;
use crate::error::{Result, TfsError};
use crate::master::{FileMetadata, MasterClient};
use crate::worker::BlockWorker;
use bytes::BytesMut;

/// Write buffer for one block. Grows to the block size, tracking how much
/// of it has already been pushed to the worker.
pub struct BlockOutStream {
    id: BlockId,
    block_size: u64,
    buf: BytesMut,
    flushed: usize,
}

impl BlockOutStream {
    fn new(id: BlockId, block_size: u64) -> Self {
        Self {
            id,
            block_size,
            buf: BytesMut::new(),
            flushed: 0,
        }
    }

    fn space(&self) -> usize {
        self.block_size as usize - self.buf.len()
    }

    fn is_full(&self) -> bool {
        self.space() == 0
    }

    fn is_dirty(&self) -> bool {
        self.buf.len() > self.flushed
    }

    /// Append as much of `data` as fits; returns how much was taken.
    fn append(&mut self, data: &[u8]) -> usize {
        let take = self.space().min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        take
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Closed,
    Canceled,
}

/// Sequential writer for one file.
pub struct FileOutStream<M: MasterClient, W: BlockWorker> {
    ctx: FsContext<M, W>,
    file_id: i64,
    path: String,
    layout: BlockLayout,
    write_type: WriteType,
    current: BlockOutStream,
    written: u64,
    state: StreamState,
}

impl<M: MasterClient, W: BlockWorker> FileOutStream<M, W> {
    /// Writer positioned at the start of a freshly created file.
    pub(crate) fn new(ctx: FsContext<M, W>, meta: &FileMetadata, write_type: WriteType) -> Self {
        let layout = meta.layout();
        Self {
            ctx,
            file_id: meta.file_id,
            path: meta.path.clone(),
            current: BlockOutStream::new(BlockId::new(meta.file_id, 0), layout.block_size),
            layout,
            write_type,
            written: 0,
            state: StreamState::Open,
        }
    }

    /// Writer positioned at the end of an incomplete file. When the tail
    /// block is partial its flushed prefix is reloaded so appends continue
    /// inside it.
    pub(crate) async fn resume(
        ctx: FsContext<M, W>,
        meta: &FileMetadata,
        write_type: WriteType,
    ) -> Result<Self> {
        if meta.complete {
            return Err(TfsError::invalid_argument(format!(
                "{} is complete and cannot be appended",
                meta.path
            )));
        }
        let layout = meta.layout();
        let index = layout.block_index_of(meta.length);
        let offset = layout.offset_in_block(meta.length);
        let mut current = BlockOutStream::new(BlockId::new(meta.file_id, index), layout.block_size);
        if offset > 0 {
            let data = ctx.worker().fetch_block(current.id).await?;
            if (data.len() as u64) < offset {
                return Err(TfsError::unavailable(format!(
                    "tail block {} holds {} of {} flushed bytes",
                    current.id,
                    data.len(),
                    offset
                )));
            }
            current.buf.extend_from_slice(&data[..offset as usize]);
            current.flushed = offset as usize;
        }
        Ok(Self {
            ctx,
            file_id: meta.file_id,
            path: meta.path.clone(),
            current,
            layout,
            write_type,
            written: meta.length,
            state: StreamState::Open,
        })
    }

    /// Total bytes accepted, including any the stream resumed behind.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        while !data.is_empty() {
            if self.current.is_full() {
                self.roll_block().await?;
            }
            let n = self.current.append(data);
            data = &data[n..];
            self.written += n as u64;
        }
        Ok(())
    }

    pub async fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write(&[b]).await
    }

    /// Push the buffered prefix of the current block and commit its length,
    /// making everything written so far readable.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_current().await
    }

    /// Seal the file. After this the file is immutable and the stream is
    /// finished.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            StreamState::Closed => Err(TfsError::StreamFinalized("stream already closed")),
            StreamState::Canceled => Err(TfsError::StreamFinalized("close after cancel")),
            StreamState::Open => {
                self.flush_current().await?;
                self.ctx.master().complete_file(self.file_id).await?;
                self.state = StreamState::Closed;
                Ok(())
            }
        }
    }

    /// Abandon the file: drop every block written through this stream and
    /// remove the namespace entry.
    pub async fn cancel(&mut self) -> Result<()> {
        match self.state {
            StreamState::Closed => Err(TfsError::StreamFinalized("cancel after close")),
            StreamState::Canceled => Err(TfsError::StreamFinalized("stream already canceled")),
            StreamState::Open => {
                for index in 0..=self.current.id.index {
                    let id = BlockId::new(self.file_id, index);
                    self.ctx.worker().remove_block(id).await?;
                    self.ctx.cache().invalidate(id).await;
                }
                self.ctx.master().abort_file(self.file_id).await?;
                self.state = StreamState::Canceled;
                Ok(())
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            StreamState::Open => Ok(()),
            StreamState::Closed => Err(TfsError::StreamFinalized("stream closed")),
            StreamState::Canceled => Err(TfsError::StreamFinalized("stream canceled")),
        }
    }

    async fn roll_block(&mut self) -> Result<()> {
        self.flush_current().await?;
        let next = BlockId::new(self.file_id, self.current.id.index + 1);
        self.current = BlockOutStream::new(next, self.layout.block_size);
        Ok(())
    }

    async fn flush_current(&mut self) -> Result<()> {
        if !self.current.is_dirty() {
            return Ok(());
        }
        let data = self.current.buf.clone().freeze();
        self.ctx
            .worker()
            .write_block(self.current.id, data.clone(), self.write_type)
            .await?;
        self.ctx
            .master()
            .commit_block(self.file_id, self.current.id.index, data.len() as u64)
            .await?;
        if self.write_type.caches() {
            self.ctx.cache().insert(self.current.id, data).await;
        }
        self.current.flushed = self.current.buf.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::ClientConf;
    use crate::master::InMemoryMaster;
    use crate::uri::TfsUri;
    use crate::worker::InMemoryWorker;
    use std::sync::Arc;

    const BS: u64 = 64;

    async fn setup(
        path: &str,
    ) -> (
        FsContext<InMemoryMaster, InMemoryWorker>,
        Arc<InMemoryMaster>,
        Arc<InMemoryWorker>,
        FileMetadata,
    ) {
        let master = Arc::new(InMemoryMaster::new());
        let worker = Arc::new(InMemoryWorker::new());
        let ctx = FsContext::new(
            master.clone(),
            worker.clone(),
            ClientConf::default().with_block_size(BS),
        );
        let uri = TfsUri::parse(path).unwrap();
        let id = master.create_file(&uri, BS).await.unwrap();
        let meta = master.get_metadata(id).await.unwrap();
        (ctx, master, worker, meta)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn write_across_blocks_and_close() {
        let (ctx, master, worker, meta) = setup("/out").await;
        let data = pattern(150);

        let mut stream = FileOutStream::new(ctx, &meta, WriteType::CacheThrough);
        stream.write(&data).await.unwrap();
        assert_eq!(stream.bytes_written(), 150);
        stream.close().await.unwrap();

        let meta = master.get_metadata(meta.file_id).await.unwrap();
        assert!(meta.complete);
        assert!(meta.in_memory);
        assert_eq!(meta.length, 150);
        assert_eq!(meta.block_lens, vec![64, 64, 22]);

        for (index, chunk) in data.chunks(BS as usize).enumerate() {
            let stored = worker
                .fetch_block(BlockId::new(meta.file_id, index as u32))
                .await
                .unwrap();
            assert_eq!(stored.as_ref(), chunk);
        }
    }

    #[tokio::test]
    async fn flush_makes_bytes_readable_before_close() {
        let (ctx, master, worker, meta) = setup("/out").await;
        let mut stream = FileOutStream::new(ctx, &meta, WriteType::MustCache);

        stream.write(&[1u8; 10]).await.unwrap();
        // Nothing visible until the flush.
        assert_eq!(master.get_metadata(meta.file_id).await.unwrap().length, 0);
        stream.flush().await.unwrap();

        let mid = master.get_metadata(meta.file_id).await.unwrap();
        assert_eq!(mid.length, 10);
        assert!(!mid.complete);
        assert_eq!(
            worker
                .fetch_block(BlockId::new(meta.file_id, 0))
                .await
                .unwrap()
                .len(),
            10
        );

        // Appends after a flush regrow the same block.
        stream.write(&[2u8; 20]).await.unwrap();
        stream.flush().await.unwrap();
        assert_eq!(master.get_metadata(meta.file_id).await.unwrap().length, 30);
        assert_eq!(
            worker
                .fetch_block(BlockId::new(meta.file_id, 0))
                .await
                .unwrap()
                .len(),
            30
        );
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let (ctx, _master, _worker, meta) = setup("/out").await;
        let mut stream = FileOutStream::new(ctx, &meta, WriteType::MustCache);
        stream.write(b"abc").await.unwrap();
        stream.close().await.unwrap();

        assert!(matches!(
            stream.write(b"more").await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));
        assert!(matches!(
            stream.flush().await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));
        assert!(matches!(
            stream.close().await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));
        assert!(matches!(
            stream.cancel().await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));
    }

    #[tokio::test]
    async fn cancel_unwinds_file_and_blocks() {
        let (ctx, master, worker, meta) = setup("/doomed").await;
        let mut stream = FileOutStream::new(ctx, &meta, WriteType::MustCache);
        stream.write(&pattern(100)).await.unwrap();
        stream.flush().await.unwrap();
        stream.cancel().await.unwrap();

        let uri = TfsUri::parse("/doomed").unwrap();
        assert!(master.resolve(&uri).await.unwrap_err().is_not_found());
        for index in 0..2 {
            assert!(
                !worker
                    .contains_block(BlockId::new(meta.file_id, index))
                    .await
                    .unwrap()
            );
        }
        assert!(matches!(
            stream.cancel().await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));
        assert!(matches!(
            stream.close().await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));
    }

    #[tokio::test]
    async fn close_of_empty_file_completes_it() {
        let (ctx, master, _worker, meta) = setup("/empty").await;
        let mut stream = FileOutStream::new(ctx, &meta, WriteType::MustCache);
        stream.close().await.unwrap();

        let meta = master.get_metadata(meta.file_id).await.unwrap();
        assert!(meta.complete);
        assert_eq!(meta.length, 0);
        assert_eq!(meta.block_count(), 0);
    }

    #[tokio::test]
    async fn resume_continues_a_partial_tail_block() {
        let (ctx, master, worker, meta) = setup("/resumed").await;
        let data = pattern(128);

        let mut first = FileOutStream::new(ctx.clone(), &meta, WriteType::MustCache);
        first.write(&data[..100]).await.unwrap();
        first.flush().await.unwrap();
        drop(first);

        let halfway = master.get_metadata(meta.file_id).await.unwrap();
        assert_eq!(halfway.length, 100);
        let mut second = FileOutStream::resume(ctx, &halfway, WriteType::MustCache)
            .await
            .unwrap();
        assert_eq!(second.bytes_written(), 100);
        second.write(&data[100..]).await.unwrap();
        second.close().await.unwrap();

        let done = master.get_metadata(meta.file_id).await.unwrap();
        assert!(done.complete);
        assert_eq!(done.length, 128);
        assert_eq!(done.block_lens, vec![64, 64]);
        assert_eq!(
            worker
                .fetch_block(BlockId::new(meta.file_id, 0))
                .await
                .unwrap()
                .as_ref(),
            &data[..64]
        );
        assert_eq!(
            worker
                .fetch_block(BlockId::new(meta.file_id, 1))
                .await
                .unwrap()
                .as_ref(),
            &data[64..]
        );
    }

    #[tokio::test]
    async fn resume_rejects_complete_files() {
        let (ctx, master, _worker, meta) = setup("/sealed").await;
        let mut stream = FileOutStream::new(ctx.clone(), &meta, WriteType::MustCache);
        stream.write(b"data").await.unwrap();
        stream.close().await.unwrap();

        let sealed = master.get_metadata(meta.file_id).await.unwrap();
        let err = FileOutStream::resume(ctx, &sealed, WriteType::MustCache)
            .await
            .unwrap_err();
        assert!(matches!(err, TfsError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn write_type_controls_cache_population() {
        let (ctx, _master, _worker, meta) = setup("/cached").await;
        let mut stream = FileOutStream::new(ctx.clone(), &meta, WriteType::CacheThrough);
        stream.write(&pattern(64)).await.unwrap();
        stream.close().await.unwrap();
        assert!(ctx.cache().contains(BlockId::new(meta.file_id, 0)).await);

        let master2 = Arc::new(InMemoryMaster::new());
        let worker2 = Arc::new(InMemoryWorker::new());
        let ctx2 = FsContext::new(
            master2.clone(),
            worker2,
            ClientConf::default().with_block_size(BS),
        );
        let uri = TfsUri::parse("/uncached").unwrap();
        let id = master2.create_file(&uri, BS).await.unwrap();
        let meta2 = master2.get_metadata(id).await.unwrap();
        let mut through = FileOutStream::new(ctx2.clone(), &meta2, WriteType::Through);
        through.write(&pattern(64)).await.unwrap();
        through.close().await.unwrap();
        assert!(!ctx2.cache().contains(BlockId::new(id, 0)).await);
    }
}
