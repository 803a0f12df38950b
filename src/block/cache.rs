//! Local cache tier for block payloads.
//!
//! Two layers: a weighted in-memory cache and an optional on-disk layer under
//! the user cache directory (or an explicit override). Disk writes happen off
//! the read path. A block present in either layer classifies as LOCAL.

use crate::block::BlockId;
use crate::conf::CacheConf;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::warn;

pub struct BlockCache {
    mem: moka::future::Cache<BlockId, Bytes>,
    disk: Option<DiskTier>,
}

struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    /// Hash the block key into a two-level fan-out under the root so no single
    /// directory grows unbounded.
    fn path_for(&self, id: BlockId) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(id.object_key().as_bytes());
        let hash = hex::encode(hasher.finalize());
        self.root.join(&hash[0..2]).join(&hash[2..])
    }
}

impl BlockCache {
    pub fn new(conf: &CacheConf) -> BlockCache {
        let mem = moka::future::Cache::builder()
            .weigher(|_id: &BlockId, data: &Bytes| data.len().min(u32::MAX as usize) as u32)
            .max_capacity(conf.mem_capacity_bytes)
            .build();
        let disk = conf.disk_enabled.then(|| DiskTier {
            root: conf
                .disk_dir
                .clone()
                .unwrap_or_else(BlockCache::default_disk_root),
        });
        BlockCache { mem, disk }
    }

    fn default_disk_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("tierfs")
    }

    /// Residency check across both layers; this is what makes a block LOCAL.
    pub async fn contains(&self, id: BlockId) -> bool {
        if self.mem.contains_key(&id) {
            return true;
        }
        match &self.disk {
            Some(disk) => tokio::fs::metadata(disk.path_for(id)).await.is_ok(),
            None => false,
        }
    }

    /// Memory layer first, then disk. `promote` copies a disk hit back into
    /// the memory layer.
    pub async fn get(&self, id: BlockId, promote: bool) -> Option<Bytes> {
        if let Some(data) = self.mem.get(&id).await {
            return Some(data);
        }
        let disk = self.disk.as_ref()?;
        match tokio::fs::read(disk.path_for(id)).await {
            Ok(buf) => {
                let data = Bytes::from(buf);
                if promote {
                    self.mem.insert(id, data.clone()).await;
                }
                Some(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("block cache disk read failed for {id}: {e}");
                None
            }
        }
    }

    /// Insert into memory; the disk copy is written in the background.
    pub async fn insert(&self, id: BlockId, data: Bytes) {
        self.mem.insert(id, data.clone()).await;
        if let Some(disk) = &self.disk {
            let path = disk.path_for(id);
            tokio::spawn(async move {
                if let Err(e) = spill(path, data).await {
                    warn!("block cache spill failed for {id}: {e}");
                }
            });
        }
    }

    pub async fn invalidate(&self, id: BlockId) {
        self.mem.invalidate(&id).await;
        if let Some(disk) = &self.disk {
            let _ = tokio::fs::remove_file(disk.path_for(id)).await;
        }
    }
}

async fn spill(path: PathBuf, data: Bytes) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mem_only() -> BlockCache {
        BlockCache::new(&CacheConf::default())
    }

    fn with_disk(dir: &std::path::Path) -> BlockCache {
        BlockCache::new(&CacheConf {
            disk_enabled: true,
            disk_dir: Some(dir.to_path_buf()),
            ..CacheConf::default()
        })
    }

    async fn wait_for_disk(cache: &BlockCache, id: BlockId) {
        for _ in 0..100 {
            if let Some(disk) = &cache.disk {
                if tokio::fs::metadata(disk.path_for(id)).await.is_ok() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("disk spill never landed for {id}");
    }

    #[tokio::test]
    async fn memory_roundtrip() {
        let cache = mem_only();
        let id = BlockId::new(7, 0);
        assert!(!cache.contains(id).await);
        cache.insert(id, Bytes::from_static(b"payload")).await;
        assert!(cache.contains(id).await);
        assert_eq!(
            cache.get(id, false).await.unwrap(),
            Bytes::from_static(b"payload")
        );
        cache.invalidate(id).await;
        assert!(!cache.contains(id).await);
    }

    #[tokio::test]
    async fn disk_spill_and_promote() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = with_disk(tmp.path());
        let id = BlockId::new(3, 2);
        cache.insert(id, Bytes::from_static(b"spilled")).await;
        wait_for_disk(&cache, id).await;

        // Drop the memory copy; the block must still be resident via disk.
        cache.mem.invalidate(&id).await;
        assert!(cache.contains(id).await);
        assert!(!cache.mem.contains_key(&id));

        // Non-promoting read leaves memory cold.
        assert_eq!(
            cache.get(id, false).await.unwrap(),
            Bytes::from_static(b"spilled")
        );
        assert!(!cache.mem.contains_key(&id));

        // Promoting read pulls it back into memory.
        assert_eq!(
            cache.get(id, true).await.unwrap(),
            Bytes::from_static(b"spilled")
        );
        assert!(cache.mem.contains_key(&id));
    }

    #[tokio::test]
    async fn invalidate_clears_both_layers() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = with_disk(tmp.path());
        let id = BlockId::new(9, 1);
        cache.insert(id, Bytes::from_static(b"gone soon")).await;
        wait_for_disk(&cache, id).await;
        cache.invalidate(id).await;
        assert!(!cache.contains(id).await);
        assert!(cache.get(id, true).await.is_none());
    }
}
