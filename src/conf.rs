//! Client configuration and the read/write policy enums.
//!
//! Plain structs with `Default` plus a few `with_*` helpers for the knobs that
//! tests and embedders actually turn. Policies are closed enums; every place
//! that acts on one matches exhaustively, so adding a variant is a compile
//! error until each site decides what it means.

use std::path::PathBuf;
use std::time::Duration;

/// Default block size: 64 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// How a read interacts with the local cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadType {
    /// Never populate the local tier.
    NoCache,
    /// Populate the local tier with blocks fetched remotely.
    #[default]
    Cache,
    /// Like `Cache`, and additionally promote disk-tier hits into memory.
    CachePromote,
}

impl ReadType {
    pub fn caches(self) -> bool {
        match self {
            ReadType::NoCache => false,
            ReadType::Cache | ReadType::CachePromote => true,
        }
    }

    pub fn promotes(self) -> bool {
        match self {
            ReadType::NoCache | ReadType::Cache => false,
            ReadType::CachePromote => true,
        }
    }
}

/// Placement and durability policy for block writes. The stream layer tags
/// every block write with one of these; the block-serving side enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteType {
    /// Memory tier now, persisted to the understore in the background.
    AsyncThrough,
    /// Memory tier and understore, synchronously.
    #[default]
    CacheThrough,
    /// Memory tier only; fails if the tier refuses.
    MustCache,
    /// Understore only.
    Through,
    /// Memory tier if possible, silently falling back to the understore.
    TryCache,
}

impl WriteType {
    /// Whether written blocks land in a cache/memory tier.
    pub fn caches(self) -> bool {
        match self {
            WriteType::Through => false,
            WriteType::AsyncThrough
            | WriteType::CacheThrough
            | WriteType::MustCache
            | WriteType::TryCache => true,
        }
    }

    /// Whether written blocks are persisted to the understore at all.
    pub fn is_through(self) -> bool {
        match self {
            WriteType::MustCache | WriteType::TryCache => false,
            WriteType::AsyncThrough | WriteType::CacheThrough | WriteType::Through => true,
        }
    }

    /// Whether understore persistence happens off the write path.
    pub fn is_async(self) -> bool {
        matches!(self, WriteType::AsyncThrough)
    }
}

/// What to do when a reader asks for a block index past the committed blocks
/// of a file that is still being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncompleteBlockPolicy {
    /// Serve zeros for anything inside the known extent.
    #[default]
    TreatEmpty,
    /// Poll the namespace until the block is committed or the wait budget runs
    /// out, then surface `BlockUnavailable`.
    Wait,
}

/// Retry budget for collaborator calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryConf {
    pub max_retries: u32,
    /// Initial delay; doubles per attempt, plus jitter.
    pub initial_delay_ms: u64,
}

impl Default for RetryConf {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
        }
    }
}

/// Local cache tier sizing.
#[derive(Debug, Clone)]
pub struct CacheConf {
    /// Capacity of the in-memory tier, in bytes.
    pub mem_capacity_bytes: u64,
    /// Whether fetched blocks also spill to a disk directory.
    pub disk_enabled: bool,
    /// Override for the disk directory; defaults to the user cache dir.
    pub disk_dir: Option<PathBuf>,
}

impl Default for CacheConf {
    fn default() -> Self {
        Self {
            mem_capacity_bytes: 256 * 1024 * 1024,
            disk_enabled: false,
            disk_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConf {
    pub block_size: u64,
    /// Policy for reads that take no explicit `ReadType`, such as
    /// whole-block reads through a file handle.
    pub read_type: ReadType,
    pub incomplete_block_policy: IncompleteBlockPolicy,
    /// Poll budget used by `IncompleteBlockPolicy::Wait`.
    pub block_wait_attempts: u32,
    pub block_wait_interval_ms: u64,
    /// Upper bound on any single block-service call.
    pub rpc_timeout: Duration,
    pub retry: RetryConf,
    pub cache: CacheConf,
}

impl Default for ClientConf {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            read_type: ReadType::default(),
            incomplete_block_policy: IncompleteBlockPolicy::default(),
            block_wait_attempts: 10,
            block_wait_interval_ms: 100,
            rpc_timeout: Duration::from_secs(30),
            retry: RetryConf::default(),
            cache: CacheConf::default(),
        }
    }
}

impl ClientConf {
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_read_type(mut self, read_type: ReadType) -> Self {
        self.read_type = read_type;
        self
    }

    pub fn with_incomplete_block_policy(mut self, policy: IncompleteBlockPolicy) -> Self {
        self.incomplete_block_policy = policy;
        self
    }
}

/// Configuration of one KV store instance.
#[derive(Debug, Clone)]
pub struct KvConf {
    /// Block size of the backing file.
    pub block_size: u64,
    pub read_type: ReadType,
    pub write_type: WriteType,
    pub max_key_len: usize,
    pub max_value_len: usize,
}

impl Default for KvConf {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            read_type: ReadType::Cache,
            write_type: WriteType::CacheThrough,
            max_key_len: 4 * 1024,
            max_value_len: 1024 * 1024,
        }
    }
}
