//! S3 pile: one object per chunk under key `{name}/{part}`.
//!
//! Objects cannot be streamed into S3, so a chunk writer buffers its bytes and
//! uploads them on `close`. Chunks larger than `part_size` go through a
//! multipart upload with bounded concurrency.

use super::{ChunkRead, ChunkWrite, Pile, chunk_key};
use crate::error::{BoxError, ChunkBufferError, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use std::{ops::Range, pin::Pin, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::Semaphore,
};

/// S3 pile options.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Region; falls back to the AWS environment when unset.
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, RustFS, ...).
    pub endpoint_url: Option<String>,
    /// Address buckets as `{endpoint}/{bucket}` instead of a subdomain.
    pub force_path_style: bool,
    /// Multipart part size in bytes; chunks up to this size use a single PUT.
    pub part_size: usize,
    /// Maximum parts uploaded at once for one chunk.
    pub max_concurrency: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            endpoint_url: None,
            force_path_style: false,
            part_size: 8 * 1024 * 1024, // 8MB
            max_concurrency: 8,
        }
    }
}

#[derive(Clone)]
pub struct S3Pile {
    client: Client,
    config: Arc<S3Config>,
}

impl S3Pile {
    pub fn new(client: Client, config: S3Config) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// Builds a client from the AWS environment plus the overrides in `config`.
    pub async fn connect(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();
        Self::new(Client::from_conf(s3_config), config)
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn head_len(&self, name: &str, part: u64) -> Result<i64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(chunk_key(name, part))
            .send()
            .await
            .map_err(|e| ChunkBufferError::backend(name, part, e))?;
        head.content_length()
            .ok_or_else(|| ChunkBufferError::backend(name, part, "object has no content length"))
    }

    async fn put_chunk(&self, name: &str, part: u64, data: Bytes) -> Result<()> {
        let key = chunk_key(name, part);
        if data.len() <= self.config.part_size {
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(&key)
                .content_md5(md5_base64(&data))
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| ChunkBufferError::backend(name, part, e))?;
            return Ok(());
        }
        self.put_multipart(&key, data)
            .await
            .map_err(|e| ChunkBufferError::backend(name, part, e))
    }

    async fn put_multipart(&self, key: &str, data: Bytes) -> Result<(), BoxError> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await?;
        let upload_id = create
            .upload_id()
            .ok_or("multipart upload created without an upload id")?
            .to_string();

        let sem = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let uploads = part_ranges(data.len(), self.config.part_size)
            .into_iter()
            .enumerate()
            .map(|(i, range)| {
                self.upload_part(key, &upload_id, i as i32 + 1, data.slice(range), sem.clone())
            });

        let parts = match futures::future::try_join_all(uploads).await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!("failed to abort multipart upload of {key}: {abort}");
                }
                return Err(e);
            }
        };

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await?;
        Ok(())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
        semaphore: Arc<Semaphore>,
    ) -> Result<CompletedPart, BoxError> {
        let _permit = semaphore.acquire().await?;
        tracing::trace!("uploading part {part_number} of {key} ({} bytes)", data.len());
        let resp = self
            .client
            .upload_part()
            .bucket(&self.config.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(md5_base64(&data))
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(resp.e_tag().map(str::to_string))
            .build())
    }
}

/// Whether a chunk is the sentinel, if that can be told without a request:
/// from the response length, or from a fully drained body.
fn known_last(len: Option<i64>, read: u64, drained: bool) -> Option<bool> {
    match len {
        Some(len) => Some(len == 0),
        None if drained => Some(read == 0),
        None if read > 0 => Some(false),
        None => None,
    }
}

fn md5_base64(data: &[u8]) -> String {
    let sum = md5::compute(data);
    B64.encode(sum.0)
}

/// Splits `len` bytes into consecutive ranges of at most `part_size`.
fn part_ranges(len: usize, part_size: usize) -> Vec<Range<usize>> {
    let part_size = part_size.max(1);
    (0..len)
        .step_by(part_size)
        .map(|start| start..(start + part_size).min(len))
        .collect()
}

#[async_trait]
impl Pile for S3Pile {
    async fn chunk_reader(&self, name: &str, part: u64) -> Result<Box<dyn ChunkRead>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(chunk_key(name, part))
            .send()
            .await;
        match resp {
            Ok(obj) => Ok(Box::new(S3ChunkReader {
                pile: self.clone(),
                name: name.to_string(),
                part,
                len: obj.content_length(),
                read: 0,
                drained: false,
                body: Some(Box::pin(obj.body.into_async_read())),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                Err(ChunkBufferError::not_found(name, part))
            }
            Err(e) => Err(ChunkBufferError::backend(name, part, e)),
        }
    }

    async fn chunk_writer(&self, name: &str, part: u64) -> Result<Box<dyn ChunkWrite>> {
        Ok(Box::new(S3ChunkWriter {
            pile: self.clone(),
            name: name.to_string(),
            part,
            buf: Vec::new(),
            pending: None,
            closed: false,
        }))
    }
}

struct S3ChunkReader {
    pile: S3Pile,
    name: String,
    part: u64,
    // Content-Length of the GET response, when the store sent one.
    len: Option<i64>,
    read: u64,
    drained: bool,
    body: Option<Pin<Box<dyn AsyncRead + Send>>>,
}

#[async_trait]
impl ChunkRead for S3ChunkReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(body) = self.body.as_mut() else {
            return Ok(0);
        };
        let n = body
            .read(buf)
            .await
            .map_err(|e| ChunkBufferError::backend(&self.name, self.part, e))?;
        self.read += n as u64;
        if n == 0 && !buf.is_empty() {
            self.drained = true;
        }
        Ok(n)
    }

    async fn last(&mut self) -> Result<bool> {
        if let Some(last) = known_last(self.len, self.read, self.drained) {
            return Ok(last);
        }
        let len = self.pile.head_len(&self.name, self.part).await?;
        self.len = Some(len);
        Ok(len == 0)
    }

    async fn close(&mut self) -> Result<()> {
        self.body.take();
        Ok(())
    }
}

struct S3ChunkWriter {
    pile: S3Pile,
    name: String,
    part: u64,
    buf: Vec<u8>,
    // Payload of a failed upload, kept so `close` can be retried.
    pending: Option<Bytes>,
    closed: bool,
}

#[async_trait]
impl ChunkWrite for S3ChunkWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(ChunkBufferError::backend(
                &self.name,
                self.part,
                "write to closed S3 object",
            ));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    // The chunk data is only sent here; S3 objects cannot be appended to.
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let data = match self.pending.take() {
            Some(data) => data,
            None => Bytes::from(std::mem::take(&mut self.buf)),
        };
        match self.pile.put_chunk(&self.name, self.part, data.clone()).await {
            Ok(()) => {
                self.closed = true;
                Ok(())
            }
            Err(e) => {
                self.pending = Some(data);
                Err(e)
            }
        }
    }

    async fn set_last(&mut self) -> Result<()> {
        self.pile.mark_last(&self.name, self.part + 1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_ranges() {
        assert!(part_ranges(0, 4).is_empty());
        assert_eq!(part_ranges(8, 4), vec![0..4, 4..8]);
        assert_eq!(part_ranges(10, 4), vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_last_without_content_length() {
        assert_eq!(known_last(Some(0), 0, false), Some(true));
        assert_eq!(known_last(Some(12), 0, false), Some(false));
        // No length: a body that produced data is never the sentinel.
        assert_eq!(known_last(None, 12, true), Some(false));
        assert_eq!(known_last(None, 12, false), Some(false));
        assert_eq!(known_last(None, 0, true), Some(true));
        // Nothing read yet: ask the store.
        assert_eq!(known_last(None, 0, false), None);
    }

    #[test]
    fn test_md5_base64() {
        assert_eq!(md5_base64(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    // Needs a reachable bucket, e.g. a local MinIO:
    // CHUNKBUFFER_S3_BUCKET=main CHUNKBUFFER_S3_ENDPOINT=http://127.0.0.1:9000 cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_s3_pile_round_trip() -> Result<(), BoxError> {
        let config = S3Config {
            bucket: std::env::var("CHUNKBUFFER_S3_BUCKET")?,
            endpoint_url: std::env::var("CHUNKBUFFER_S3_ENDPOINT").ok(),
            force_path_style: true,
            ..S3Config::default()
        };
        let pile = S3Pile::connect(config).await;

        let data = vec![7u8; 500 * 1000];
        let mut w = pile.chunk_writer("s3-test", 0).await?;
        w.write_all(&data).await?;
        w.close().await?;
        w.set_last().await?;

        let mut r = pile.chunk_reader("s3-test", 0).await?;
        let mut out = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = r.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
        assert!(!r.last().await?);

        let mut sentinel = pile.chunk_reader("s3-test", 1).await?;
        assert!(sentinel.last().await?);
        Ok(())
    }
}
