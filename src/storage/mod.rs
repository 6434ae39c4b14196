//! Byte-level object storage for module archives.
//!
//! Keys are logical, `/`-separated paths such as
//! `modules/<ns>/<mod>/<prov>/<ver>/source.tar.gz`. Backends map them onto a
//! directory tree or onto flat object keys.

mod local;
pub mod path;
#[cfg(feature = "s3")]
mod s3;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub use local::LocalStorage;
pub use path::{ArchiveKind, archive_path, safe_join, upload_path, version_dir};
#[cfg(feature = "s3")]
pub use s3::S3Storage;

use crate::config::StorageLocation;
use crate::error::{Error, Result};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Copies a local file to `dest_dir/dest_name`.
    async fn upload_file(&self, src: &Path, dest_dir: &str, dest_name: &str) -> Result<()>;

    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    async fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes)
            .map_err(|_| Error::Storage(format!("{path} is not valid UTF-8")))
    }

    async fn file_exists(&self, path: &str) -> Result<bool>;

    async fn directory_exists(&self, path: &str) -> Result<bool>;

    async fn make_directory(&self, path: &str) -> Result<()>;

    /// Returns false when the file did not exist.
    async fn delete_file(&self, path: &str) -> Result<bool>;

    async fn delete_directory(&self, path: &str) -> Result<()>;

    /// Writes everything from `reader` to `dest`, returning the byte count.
    async fn upload_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        dest: &str,
    ) -> Result<u64>;

    /// Copies the object at `path` into `writer`, returning the byte count.
    async fn stream_to(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64>;

    async fn size(&self, path: &str) -> Result<u64>;
}

/// Opens the backend named by the configured data directory.
pub async fn open_storage(location: &StorageLocation) -> Result<Arc<dyn Storage>> {
    match location {
        StorageLocation::Local(root) => Ok(Arc::new(LocalStorage::new(root)?)),
        #[cfg(feature = "s3")]
        StorageLocation::S3 { bucket, prefix } => {
            Ok(Arc::new(S3Storage::connect(bucket, prefix).await))
        }
        #[cfg(not(feature = "s3"))]
        StorageLocation::S3 { bucket, .. } => Err(Error::Config(format!(
            "s3://{bucket} requires building with the `s3` feature"
        ))),
    }
}
