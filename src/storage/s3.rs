use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Storage;
use super::path::split_key;
use crate::error::{Error, Result};

fn sdk_error(op: &str, key: &str, e: impl std::error::Error) -> Error {
    Error::Storage(format!("s3 {op} {key}: {}", DisplayErrorContext(e)))
}

/// Flat object storage in an S3 bucket. Directories do not exist as
/// objects; they are inferred from key prefixes.
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    /// Builds a client from the ambient AWS configuration (env, profile, IMDS).
    pub async fn connect(bucket: &str, prefix: &str) -> Self {
        let config = aws_config::load_from_env().await;
        Self::with_client(Client::new(&config), bucket, prefix)
    }

    pub fn with_client(client: Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, path: &str) -> Result<String> {
        let segments = split_key(path)?;
        let joined = segments.join("/");
        if self.prefix.is_empty() {
            Ok(joined)
        } else {
            Ok(format!("{}/{joined}", self.prefix))
        }
    }

    async fn put(&self, key: &str, body: ByteStream) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error("put", key, e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<ByteStream> {
        let key = self.key(path)?;
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => Ok(output.body),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    Err(Error::NotFound(path.to_string()))
                } else {
                    Err(sdk_error("get", &key, service))
                }
            }
        }
    }

    async fn head(&self, path: &str) -> Result<Option<i64>> {
        let key = self.key(path)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0))),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(None)
                } else {
                    Err(sdk_error("head", &key, service))
                }
            }
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload_file(&self, src: &Path, dest_dir: &str, dest_name: &str) -> Result<()> {
        let key = self.key(&format!("{dest_dir}/{dest_name}"))?;
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| Error::Storage(format!("failed to read {}: {e}", src.display())))?;
        self.put(&key, body).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let key = self.key(path)?;
        self.put(&key, ByteStream::from(data.to_vec())).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let body = self.get(path).await?;
        let data = body
            .collect()
            .await
            .map_err(|e| Error::Storage(format!("s3 read {path}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        let prefix = format!("{}/", self.key(path)?);
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| sdk_error("list", &prefix, e))?;
        Ok(!output.contents().is_empty())
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        self.key(path)?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<bool> {
        if self.head(path).await?.is_none() {
            return Ok(false);
        }
        let key = self.key(path)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| sdk_error("delete", &key, e))?;
        Ok(true)
    }

    /// Objects are flat, so there is nothing to remove beyond the files
    /// callers delete individually.
    async fn delete_directory(&self, path: &str) -> Result<()> {
        self.key(path)?;
        Ok(())
    }

    async fn upload_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        dest: &str,
    ) -> Result<u64> {
        let key = self.key(dest)?;
        let mut buf = Vec::new();
        let n = reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::Storage(format!("s3 upload {key}: {e}")))?;
        self.put(&key, ByteStream::from(buf)).await?;
        Ok(n as u64)
    }

    async fn stream_to(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let body = self.get(path).await?;
        let mut reader = body.into_async_read();
        let n = tokio::io::copy(&mut reader, writer)
            .await
            .map_err(|e| Error::Storage(format!("s3 stream {path}: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Storage(format!("s3 stream {path}: {e}")))?;
        Ok(n)
    }

    async fn size(&self, path: &str) -> Result<u64> {
        match self.head(path).await? {
            Some(len) => Ok(u64::try_from(len).unwrap_or(0)),
            None => Err(Error::NotFound(path.to_string())),
        }
    }
}
