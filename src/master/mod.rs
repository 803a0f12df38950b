//! Namespace (master) collaborator contract.
//!
//! The master resolves paths to file ids, owns file metadata and the
//! commit/complete lifecycle of written blocks. The wire protocol is out of
//! scope; anything implementing [`MasterClient`] can serve as the namespace,
//! and [`memory::InMemoryMaster`] is the embedded implementation.

pub mod memory;

use crate::block::layout::BlockLayout;
use crate::error::Result;
use crate::uri::TfsUri;
use async_trait::async_trait;

pub use memory::InMemoryMaster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_id: i64,
    /// Normalized absolute path at creation time.
    pub path: String,
    pub kind: FileKind,
    pub length: u64,
    pub block_size: u64,
    /// Once true, `length` is authoritative and blocks are immutable.
    pub complete: bool,
    /// Every block of the file is held by the block tier.
    pub in_memory: bool,
    pub pinned: bool,
    /// Committed byte count per block index. May cover fewer blocks than
    /// `length` implies: the gap is sparse (reads synthesize zeros).
    pub block_lens: Vec<u64>,
}

impl FileMetadata {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn layout(&self) -> BlockLayout {
        BlockLayout::new(self.block_size)
    }

    /// Known block count: derived from `length` once complete, otherwise the
    /// committed prefix. Directories have no blocks.
    pub fn block_count(&self) -> u32 {
        if self.is_directory() {
            0
        } else if self.complete {
            self.layout().block_count(self.length)
        } else {
            self.block_lens.len() as u32
        }
    }

    /// Committed bytes of one block; zero for never-committed indices.
    pub fn committed_len(&self, index: u32) -> u64 {
        self.block_lens.get(index as usize).copied().unwrap_or(0)
    }
}

/// Namespace service contract. Path arguments are normalized [`TfsUri`]s;
/// everything after resolution is keyed by file id.
///
/// `mkdir` and `delete` return `Ok(false)` for the non-fatal "nothing to do"
/// cases (already exists, nothing there, directory not empty) and reserve
/// errors for structural misuse and service failure.
#[async_trait]
pub trait MasterClient: Send + Sync + 'static {
    async fn resolve(&self, uri: &TfsUri) -> Result<i64>;

    async fn get_metadata(&self, file_id: i64) -> Result<FileMetadata>;

    /// Children of a directory (sorted by path); a file lists itself.
    async fn list(&self, file_id: i64) -> Result<Vec<FileMetadata>>;

    /// Create a file, creating missing parent directories. Fails with
    /// `AlreadyExists` when the path is taken and `InvalidArgument` when a
    /// parent component is a file.
    async fn create_file(&self, uri: &TfsUri, block_size: u64) -> Result<i64>;

    async fn mkdir(&self, uri: &TfsUri, recursive: bool) -> Result<bool>;

    async fn delete(&self, file_id: i64, recursive: bool) -> Result<bool>;

    async fn set_pinned(&self, file_id: i64, pinned: bool) -> Result<()>;

    /// Record that `len` bytes of block `index` are held by the block tier.
    /// Commits are monotonic per block; the file must be incomplete.
    async fn commit_block(&self, file_id: i64, index: u32, len: u64) -> Result<()>;

    /// Seal the file: length becomes authoritative, blocks immutable.
    async fn complete_file(&self, file_id: i64) -> Result<()>;

    /// Drop an in-progress file from the namespace as if it was never
    /// created. Only valid before `complete_file`.
    async fn abort_file(&self, file_id: i64) -> Result<()>;
}
