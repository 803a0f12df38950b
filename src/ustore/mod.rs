//! Understore backends: durable object storage sitting beneath a worker.
//!
//! Backends speak plain object keys and report failures as `anyhow` errors;
//! the worker translates those into the client error taxonomy.

pub mod localfs;
pub mod s3;

pub use localfs::LocalFsBackend;
pub use s3::{S3Backend, S3Config};

use async_trait::async_trait;

#[async_trait]
pub trait ObjectBackend: Send + Sync + 'static {
    async fn put_object(&self, key: &str, data: &[u8]) -> anyhow::Result<()>;

    /// `Ok(None)` when the key does not exist.
    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Deleting an absent key is not an error.
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;

    /// Backends with a cheap stat override this; the default pays for a full
    /// read.
    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get_object(key).await?.is_some())
    }
}
