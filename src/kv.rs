//! Key-value store layered over one backing file.
//!
//! Records are appended as `[key_len: u32 le][value_len: u32 le][key][value]`
//! and every `set` flushes, so the log is durable record by record. The
//! in-memory index maps each key to the offset of its latest value; an
//! overwrite appends a new record and repoints the index, nothing is
//! reclaimed. Reopening a store rebuilds the index by scanning the log.

use crate::block::in_stream::FileInStream;
use crate::block::out_stream::FileOutStream;
use crate::buffer::BufferHandle;
use crate::conf::{KvConf, ReadType};
use crate::context::FsContext;
use crate::error::{Result, TfsError};
use crate::master::{FileMetadata, MasterClient};
use crate::uri::TfsUri;
use crate::worker::BlockWorker;
use std::collections::HashMap;
use tracing::warn;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy)]
struct ValueLoc {
    offset: u64,
    len: u32,
}

pub struct KvStore<M: MasterClient, W: BlockWorker> {
    ctx: FsContext<M, W>,
    uri: TfsUri,
    conf: KvConf,
    file_id: i64,
    index: HashMap<Vec<u8>, ValueLoc>,
    writer: Option<FileOutStream<M, W>>,
    initialized: bool,
    read_only: bool,
}

impl<M: MasterClient, W: BlockWorker> KvStore<M, W> {
    pub(crate) fn new(ctx: FsContext<M, W>, uri: TfsUri, conf: KvConf) -> Self {
        Self {
            ctx,
            uri,
            conf,
            file_id: 0,
            index: HashMap::new(),
            writer: None,
            initialized: false,
            read_only: false,
        }
    }

    /// Bind the store to its backing file: create it when absent, otherwise
    /// scan the existing log to rebuild the index. Idempotent.
    pub async fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        match self.ctx.master().resolve(&self.uri).await {
            Ok(id) => {
                self.file_id = id;
                self.load_existing(id).await?;
            }
            Err(e) if e.is_not_found() => {
                let id = self
                    .ctx
                    .master()
                    .create_file(&self.uri, self.conf.block_size)
                    .await?;
                self.file_id = id;
                let meta = self.ctx.master().get_metadata(id).await?;
                self.writer = Some(FileOutStream::new(
                    self.ctx.clone(),
                    &meta,
                    self.conf.write_type,
                ));
            }
            Err(e) => return Err(e),
        }
        self.initialized = true;
        Ok(())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.ensure_init()?;
        Ok(self.index.contains_key(key))
    }

    /// Append a record and repoint the key at it. The record is flushed
    /// before this returns, so a concurrent reader of the backing file sees
    /// it.
    pub async fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_init()?;
        if key.is_empty() {
            return Err(TfsError::invalid_argument("empty key"));
        }
        if key.len() > self.conf.max_key_len {
            return Err(TfsError::invalid_argument(format!(
                "key of {} bytes exceeds limit {}",
                key.len(),
                self.conf.max_key_len
            )));
        }
        if value.len() > self.conf.max_value_len {
            return Err(TfsError::invalid_argument(format!(
                "value of {} bytes exceeds limit {}",
                value.len(),
                self.conf.max_value_len
            )));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or(TfsError::StreamFinalized("kv backing file is sealed"))?;

        let start = writer.bytes_written();
        let mut record = Vec::with_capacity(HEADER_LEN + key.len() + value.len());
        record.extend_from_slice(&(key.len() as u32).to_le_bytes());
        record.extend_from_slice(&(value.len() as u32).to_le_bytes());
        record.extend_from_slice(key);
        record.extend_from_slice(value);
        writer.write(&record).await?;
        writer.flush().await?;

        self.index.insert(
            key.to_vec(),
            ValueLoc {
                offset: start + (HEADER_LEN + key.len()) as u64,
                len: value.len() as u32,
            },
        );
        Ok(())
    }

    /// Copy the latest value for `key` into `buf`; returns the value length.
    pub async fn get(&self, key: &[u8], buf: &mut BufferHandle) -> Result<usize> {
        self.ensure_init()?;
        let loc = *self.index.get(key).ok_or_else(|| {
            TfsError::not_found(format!("key {}", String::from_utf8_lossy(key)))
        })?;
        let len = loc.len as usize;
        if buf.capacity() < len {
            return Err(TfsError::BufferTooSmall {
                need: len,
                capacity: buf.capacity(),
            });
        }

        let meta = self.ctx.master().get_metadata(self.file_id).await?;
        let mut stream = FileInStream::new(self.ctx.clone(), meta, self.conf.read_type);
        stream.seek(loc.offset)?;
        if !read_exact(&mut stream, &mut buf.as_mut_slice()[..len]).await? {
            return Err(TfsError::unavailable(format!(
                "kv value for key {} is truncated",
                String::from_utf8_lossy(key)
            )));
        }
        stream.close()?;
        buf.set_len(len)?;
        Ok(len)
    }

    /// Seal the backing file. The store stays readable; appends refuse from
    /// here on, including after a reopen.
    pub async fn close(&mut self) -> Result<()> {
        self.ensure_init()?;
        if let Some(mut writer) = self.writer.take() {
            writer.close().await?;
        }
        Ok(())
    }

    fn ensure_init(&self) -> Result<()> {
        if !self.initialized {
            return Err(TfsError::invalid_argument("kv store used before init"));
        }
        Ok(())
    }

    async fn load_existing(&mut self, id: i64) -> Result<()> {
        let meta = self.ctx.master().get_metadata(id).await?;
        if !meta.is_file() {
            return Err(TfsError::invalid_argument(format!(
                "{} is a directory",
                meta.path
            )));
        }
        self.scan(&meta).await?;
        self.writer = if meta.complete || self.read_only {
            None
        } else {
            Some(FileOutStream::resume(self.ctx.clone(), &meta, self.conf.write_type).await?)
        };
        Ok(())
    }

    /// Walk the log once, pointing the index at the latest record per key.
    /// A malformed or truncated tail stops the scan and leaves the store
    /// read only, so later appends cannot interleave with garbage.
    async fn scan(&mut self, meta: &FileMetadata) -> Result<()> {
        let extent = meta.length;
        let mut stream = FileInStream::new(self.ctx.clone(), meta.clone(), ReadType::NoCache);
        let mut pos = 0u64;
        while pos + HEADER_LEN as u64 <= extent {
            let mut header = [0u8; HEADER_LEN];
            if !read_exact(&mut stream, &mut header).await? {
                self.read_only = true;
                break;
            }
            let key_len = u32::from_le_bytes(header[0..4].try_into().expect("4 bytes")) as usize;
            let val_len = u32::from_le_bytes(header[4..8].try_into().expect("4 bytes")) as usize;
            if key_len == 0 || key_len > self.conf.max_key_len || val_len > self.conf.max_value_len
            {
                warn!("kv log {}: invalid record header at {pos}", meta.path);
                self.read_only = true;
                break;
            }
            let record_end = pos + (HEADER_LEN + key_len + val_len) as u64;
            if record_end > extent {
                warn!("kv log {}: truncated record at {pos}", meta.path);
                self.read_only = true;
                break;
            }
            let mut key = vec![0u8; key_len];
            if !read_exact(&mut stream, &mut key).await? {
                self.read_only = true;
                break;
            }
            stream.skip(val_len as u64).await?;
            self.index.insert(
                key,
                ValueLoc {
                    offset: pos + (HEADER_LEN + key_len) as u64,
                    len: val_len as u32,
                },
            );
            pos = record_end;
        }
        stream.close()?;
        Ok(())
    }
}

async fn read_exact<M: MasterClient, W: BlockWorker>(
    stream: &mut FileInStream<M, W>,
    buf: &mut [u8],
) -> Result<bool> {
    let mut off = 0usize;
    while off < buf.len() {
        let n = stream.read(&mut buf[off..]).await?;
        if n == 0 {
            return Ok(false);
        }
        off += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::conf::ClientConf;
    use crate::master::InMemoryMaster;
    use crate::worker::InMemoryWorker;

    fn kv_conf() -> KvConf {
        KvConf {
            block_size: 64,
            ..KvConf::default()
        }
    }

    fn client() -> Client<InMemoryMaster, InMemoryWorker> {
        Client::new_local(ClientConf::default().with_block_size(64))
    }

    async fn open(client: &Client<InMemoryMaster, InMemoryWorker>, path: &str) -> KvStore<InMemoryMaster, InMemoryWorker> {
        let mut kv = client.kv_store(path, kv_conf()).unwrap();
        kv.init().await.unwrap();
        kv
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let client = client();
        let mut kv = open(&client, "/kv").await;
        kv.set(b"alpha", b"one").await.unwrap();
        kv.set(b"beta", b"two").await.unwrap();
        assert_eq!(kv.len(), 2);
        assert!(kv.contains(b"alpha").unwrap());
        assert!(!kv.contains(b"gamma").unwrap());

        // A second init is a no-op and keeps the index.
        kv.init().await.unwrap();
        assert_eq!(kv.len(), 2);

        let mut buf = client.allocate_buffer(64);
        assert_eq!(kv.get(b"alpha", &mut buf).await.unwrap(), 3);
        assert_eq!(buf.as_slice(), b"one");
        assert_eq!(kv.get(b"beta", &mut buf).await.unwrap(), 3);
        assert_eq!(buf.as_slice(), b"two");
    }

    #[tokio::test]
    async fn fresh_store_get_is_not_found() {
        let client = client();
        let kv = open(&client, "/kv").await;
        let mut buf = client.allocate_buffer(16);
        assert!(kv.get(b"missing", &mut buf).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn overwrite_shadows_previous_value() {
        let client = client();
        let mut kv = open(&client, "/kv").await;
        kv.set(b"k", b"first").await.unwrap();
        kv.set(b"k", b"second").await.unwrap();
        assert_eq!(kv.len(), 1);

        let mut buf = client.allocate_buffer(16);
        assert_eq!(kv.get(b"k", &mut buf).await.unwrap(), 6);
        assert_eq!(buf.as_slice(), b"second");
    }

    #[tokio::test]
    async fn undersized_buffer_is_reported() {
        let client = client();
        let mut kv = open(&client, "/kv").await;
        kv.set(b"k", &[9u8; 100]).await.unwrap();

        let mut buf = client.allocate_buffer(10);
        let err = kv.get(b"k", &mut buf).await.unwrap_err();
        assert!(matches!(
            err,
            TfsError::BufferTooSmall {
                need: 100,
                capacity: 10
            }
        ));
    }

    #[tokio::test]
    async fn values_span_block_boundaries() {
        let client = client();
        let mut kv = open(&client, "/kv").await;
        let value: Vec<u8> = (0..150u32).map(|i| (i % 251) as u8).collect();
        kv.set(b"wide", &value).await.unwrap();

        let mut buf = client.allocate_buffer(256);
        assert_eq!(kv.get(b"wide", &mut buf).await.unwrap(), 150);
        assert_eq!(buf.as_slice(), &value[..]);
    }

    #[tokio::test]
    async fn reopen_rebuilds_the_index_and_appends() {
        let client = client();
        let mut kv = open(&client, "/kv").await;
        kv.set(b"a", b"1").await.unwrap();
        kv.set(b"b", b"2").await.unwrap();
        kv.set(b"a", b"3").await.unwrap();
        drop(kv);

        let mut reopened = open(&client, "/kv").await;
        assert_eq!(reopened.len(), 2);
        let mut buf = client.allocate_buffer(16);
        assert_eq!(reopened.get(b"a", &mut buf).await.unwrap(), 1);
        assert_eq!(buf.as_slice(), b"3");

        reopened.set(b"c", b"4").await.unwrap();
        assert_eq!(reopened.get(b"c", &mut buf).await.unwrap(), 1);
        assert_eq!(buf.as_slice(), b"4");
    }

    #[tokio::test]
    async fn sealed_store_stays_readable() {
        let client = client();
        let mut kv = open(&client, "/kv").await;
        kv.set(b"k", b"v").await.unwrap();
        kv.close().await.unwrap();
        assert!(matches!(
            kv.set(b"k2", b"v2").await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));

        let mut reopened = open(&client, "/kv").await;
        let mut buf = client.allocate_buffer(16);
        assert_eq!(reopened.get(b"k", &mut buf).await.unwrap(), 1);
        assert_eq!(buf.as_slice(), b"v");
        assert!(matches!(
            reopened.set(b"k2", b"v2").await.unwrap_err(),
            TfsError::StreamFinalized(_)
        ));
    }

    #[tokio::test]
    async fn use_before_init_is_rejected() {
        let client = client();
        let mut kv = client.kv_store("/kv", kv_conf()).unwrap();
        let mut buf = client.allocate_buffer(16);
        assert!(matches!(
            kv.get(b"k", &mut buf).await.unwrap_err(),
            TfsError::InvalidArgument(_)
        ));
        assert!(matches!(
            kv.set(b"k", b"v").await.unwrap_err(),
            TfsError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn init_refuses_directories() {
        let client = client();
        client.mkdir("/dir").await.unwrap();
        let mut kv = client.kv_store("/dir", kv_conf()).unwrap();
        assert!(matches!(
            kv.init().await.unwrap_err(),
            TfsError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn oversized_keys_and_values_are_rejected() {
        let client = client();
        let mut kv = client.kv_store("/kv", kv_conf()).unwrap();
        kv.init().await.unwrap();

        let big_key = vec![1u8; kv_conf().max_key_len + 1];
        assert!(matches!(
            kv.set(&big_key, b"v").await.unwrap_err(),
            TfsError::InvalidArgument(_)
        ));
        let big_value = vec![1u8; kv_conf().max_value_len + 1];
        assert!(matches!(
            kv.set(b"k", &big_value).await.unwrap_err(),
            TfsError::InvalidArgument(_)
        ));
        assert!(matches!(
            kv.set(b"", b"v").await.unwrap_err(),
            TfsError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn empty_values_are_allowed() {
        let client = client();
        let mut kv = open(&client, "/kv").await;
        kv.set(b"tombstone", b"").await.unwrap();
        let mut buf = client.allocate_buffer(8);
        assert_eq!(kv.get(b"tombstone", &mut buf).await.unwrap(), 0);
        assert!(buf.is_empty());
    }
}
