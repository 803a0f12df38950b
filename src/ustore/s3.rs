//! S3 understore built on aws-sdk-s3: multipart upload for large objects,
//! bounded retries and md5 content checks.

use crate::ustore::ObjectBackend;
use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{Duration, sleep};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct S3Config {
    /// Service endpoint; `None` uses the region's default.
    pub endpoint_url: Option<String>,
    pub region: String,
    /// Part size in bytes, 8-64MiB recommended.
    pub part_size: usize,
    /// Maximum concurrent part uploads.
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: "us-east-1".to_string(),
            part_size: 8 * 1024 * 1024,
            max_concurrency: 8,
            max_retries: 3,
            initial_retry_delay_ms: 100,
        }
    }
}

pub struct S3Backend {
    client: Client,
    bucket: String,
    config: S3Config,
}

impl S3Backend {
    /// Credentials come from the environment, matching how the workers are
    /// deployed.
    pub async fn new(bucket: impl Into<String>, config: S3Config) -> anyhow::Result<Self> {
        let mut loader = aws_config::ConfigLoader::default()
            .credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            )
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let conf = loader.load().await;
        Ok(Self {
            client: Client::new(&conf),
            bucket: bucket.into(),
            config,
        })
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }

    async fn execute_with_retry<T, F, Fut, E>(&self, f: F, op: &'static str) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt <= self.config.max_retries => {
                    let delay_ms = self.config.initial_retry_delay_ms * 2u64.pow(attempt - 1);
                    warn!("{op} attempt {attempt} failed, retrying in {delay_ms}ms: {e}");
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(anyhow!("{op} failed after {attempt} attempts: {e}")),
            }
        }
    }

    async fn upload_part(
        &self,
        key: String,
        upload_id: String,
        part_number: i32,
        data: Vec<u8>,
        semaphore: Arc<Semaphore>,
    ) -> anyhow::Result<(i32, Option<String>)> {
        let _permit = semaphore.acquire().await?;
        let checksum = Self::md5_base64(&data);

        let operation = || async {
            self.client
                .upload_part()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .content_md5(checksum.clone())
                .body(data.clone().into())
                .send()
                .await
        };

        self.execute_with_retry(operation, "upload_part")
            .await
            .map(|resp| (part_number, resp.e_tag().map(|s| s.to_string())))
    }

    async fn put_multipart(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        let upload_id = create.upload_id().unwrap_or_default().to_string();
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency));

        let mut parts = Vec::new();
        let mut idx = 0usize;
        let mut part_number = 1i32;
        while idx < data.len() {
            let end = (idx + self.config.part_size).min(data.len());
            parts.push(self.upload_part(
                key.to_string(),
                upload_id.clone(),
                part_number,
                data[idx..end].to_vec(),
                sem.clone(),
            ));
            idx = end;
            part_number += 1;
        }

        let results = match futures::future::try_join_all(parts).await {
            Ok(v) => v,
            Err(e) => {
                let abort = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort_err) = abort {
                    warn!("abort_multipart_upload for {key} failed: {abort_err}");
                }
                return Err(e);
            }
        };

        let completed_parts = results
            .into_iter()
            .map(|(pn, etag)| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(pn)
                    .set_e_tag(etag)
                    .build()
            })
            .collect::<Vec<_>>();
        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        if data.len() > self.config.part_size {
            return self.put_multipart(key, data).await;
        }
        let checksum = Self::md5_base64(data);
        let operation = || async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(data.to_vec().into())
                .content_md5(checksum.clone())
                .send()
                .await
        };
        self.execute_with_retry(operation, "put_object")
            .await
            .map(|_| ())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match resp {
            Ok(o) => {
                use tokio::io::AsyncReadExt;
                let mut body = o.body.into_async_read();
                let mut buf = Vec::new();
                body.read_to_end(&mut buf).await?;
                Ok(Some(buf))
            }
            Err(e) => {
                let e = e.into_service_error();
                if e.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let operation = || async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
        };
        self.execute_with_retry(operation, "delete_object")
            .await
            .map(|_| ())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match resp {
            Ok(_) => Ok(true),
            Err(e) => {
                let e = e.into_service_error();
                if e.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}
