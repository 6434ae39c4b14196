use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::Storage;
use super::path::{safe_join, split_key};
use crate::error::{Error, Result};

fn from_io(path: &str, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(path.to_string())
    } else {
        Error::Storage(format!("{path}: {e}"))
    }
}

/// Storage bound to a directory on the local filesystem.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| Error::Storage(format!("failed to create {}: {e}", root.display())))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a logical key to a path under the root, refusing anything that escapes it.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let segments = split_key(key)?;
        let path = safe_join(&self.root, &segments);
        if path == self.root {
            return Err(Error::Validation(format!(
                "storage path '{key}' escapes the storage root"
            )));
        }
        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(".tmp").join(Uuid::new_v4().to_string())
    }

    /// Moves a fully written temp file into place so readers never see partial content.
    async fn commit(&self, temp_path: &Path, key: &str) -> Result<()> {
        let final_path = self.resolve(key)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| from_io(key, e))?;
        }
        if let Err(e) = fs::rename(temp_path, &final_path).await {
            let _ = fs::remove_file(temp_path).await;
            return Err(from_io(key, e));
        }
        Ok(())
    }

    async fn create_temp(&self) -> Result<(PathBuf, File)> {
        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| from_io(".tmp", e))?;
        }
        let file = File::create(&temp_path)
            .await
            .map_err(|e| from_io(".tmp", e))?;
        Ok((temp_path, file))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_file(&self, src: &Path, dest_dir: &str, dest_name: &str) -> Result<()> {
        let key = format!("{dest_dir}/{dest_name}");
        self.resolve(&key)?;

        let (temp_path, file) = self.create_temp().await?;
        drop(file);
        if let Err(e) = fs::copy(src, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!(
                "failed to copy {} to {key}: {e}",
                src.display()
            )));
        }
        self.commit(&temp_path, &key).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.resolve(path)?;

        let (temp_path, mut file) = self.create_temp().await?;
        let written = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(from_io(path, e));
        }
        self.commit(&temp_path, path).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(|e| from_io(path, e))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(from_io(path, e)),
        }
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(from_io(path, e)),
        }
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full)
            .await
            .map_err(|e| from_io(path, e))
    }

    async fn delete_file(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(from_io(path, e)),
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match fs::remove_dir_all(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(from_io(path, e)),
        }
    }

    async fn upload_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        dest: &str,
    ) -> Result<u64> {
        self.resolve(dest)?;

        let (temp_path, mut file) = self.create_temp().await?;
        let copied = async {
            let n = tokio::io::copy(reader, &mut file).await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(n)
        }
        .await;
        match copied {
            Ok(n) => {
                self.commit(&temp_path, dest).await?;
                Ok(n)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(from_io(dest, e))
            }
        }
    }

    async fn stream_to(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let full = self.resolve(path)?;
        let mut file = File::open(&full).await.map_err(|e| from_io(path, e))?;
        let n = tokio::io::copy(&mut file, writer)
            .await
            .map_err(|e| from_io(path, e))?;
        writer.flush().await.map_err(|e| from_io(path, e))?;
        Ok(n)
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full).await.map_err(|e| from_io(path, e))?;
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path()).unwrap();

        storage
            .write("modules/ns/mod/aws/1.0.0/README.md", b"# hello")
            .await
            .unwrap();

        assert!(storage.file_exists("modules/ns/mod/aws/1.0.0/README.md").await.unwrap());
        assert!(storage.directory_exists("modules/ns/mod/aws/1.0.0").await.unwrap());
        assert!(!storage.file_exists("modules/ns/mod/aws/1.0.0").await.unwrap());
        assert_eq!(
            storage.read_to_string("modules/ns/mod/aws/1.0.0/README.md").await.unwrap(),
            "# hello"
        );
        assert_eq!(storage.size("modules/ns/mod/aws/1.0.0/README.md").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path()).unwrap();

        assert!(matches!(
            storage.read("modules/missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(storage.size("modules/missing").await, Err(Error::NotFound(_))));
        assert!(!storage.delete_file("modules/missing").await.unwrap());
        storage.delete_directory("modules/missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(&temp_dir.path().join("root")).unwrap();

        assert!(matches!(
            storage.write("../outside", b"x").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            storage.read("modules/../../outside").await,
            Err(Error::Validation(_))
        ));
        assert!(!temp_dir.path().join("outside").exists());
    }

    #[tokio::test]
    async fn test_upload_file_and_delete_directory() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(&temp_dir.path().join("data")).unwrap();
        let src = temp_dir.path().join("source.zip");
        std::fs::write(&src, b"PK\x03\x04").unwrap();

        storage.make_directory("modules/a/b/c/1.0.0").await.unwrap();
        storage
            .upload_file(&src, "modules/a/b/c/1.0.0", "source.zip")
            .await
            .unwrap();
        assert_eq!(storage.size("modules/a/b/c/1.0.0/source.zip").await.unwrap(), 4);

        storage.delete_directory("modules/a/b/c/1.0.0").await.unwrap();
        assert!(!storage.directory_exists("modules/a/b/c/1.0.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_streams() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path()).unwrap();

        let mut reader: &[u8] = b"streamed bytes";
        let n = storage.upload_stream(&mut reader, "upload/blob").await.unwrap();
        assert_eq!(n, 14);

        let (mut client, mut server) = tokio::io::duplex(64);
        let copied = storage.stream_to("upload/blob", &mut server).await.unwrap();
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(copied, 14);
        assert_eq!(out, b"streamed bytes");
    }
}
