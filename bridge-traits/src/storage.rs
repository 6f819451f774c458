//! Host File System Abstraction
//!
//! The engine never touches host paths directly: staging of device tracks
//! for playback and reading of host source files both go through
//! [`FileSystemAccess`], so hosts with sandboxed storage can supply their own
//! adapter.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn staging_root(fs: &dyn FileSystemAccess) -> Result<PathBuf> {
///     let dir = fs.get_cache_directory().await?.join("device-staging");
///     fs.create_dir_all(&dir).await?;
///     Ok(dir)
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's cache directory
    ///
    /// Staged device files live below this directory; the host may purge it
    /// when storage is low.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Get the application's data directory
    async fn get_data_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Calculate total size of a directory recursively
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let entries = self.list_directory(path).await?;

        for entry in entries {
            let metadata = self.metadata(&entry).await?;
            if metadata.is_directory {
                total += self.directory_size(&entry).await?;
            } else {
                total += metadata.size;
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Fs {}

        #[async_trait]
        impl FileSystemAccess for Fs {
            async fn get_cache_directory(&self) -> Result<PathBuf>;
            async fn get_data_directory(&self) -> Result<PathBuf>;
            async fn exists(&self, path: &Path) -> Result<bool>;
            async fn metadata(&self, path: &Path) -> Result<FileMetadata>;
            async fn create_dir_all(&self, path: &Path) -> Result<()>;
            async fn read_file(&self, path: &Path) -> Result<Bytes>;
            async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;
            async fn delete_file(&self, path: &Path) -> Result<()>;
            async fn delete_dir_all(&self, path: &Path) -> Result<()>;
            async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
        }
    }

    fn file(size: u64) -> FileMetadata {
        FileMetadata {
            size,
            created_at: None,
            modified_at: None,
            is_directory: false,
        }
    }

    #[core_async::test]
    async fn test_directory_size_walks_nested_entries() {
        let mut fs = MockFs::new();
        fs.expect_list_directory().returning(|path| {
            if path == Path::new("/staging") {
                Ok(vec![PathBuf::from("/staging/a.mp3"), PathBuf::from("/staging/sub")])
            } else {
                Ok(vec![PathBuf::from("/staging/sub/b.mp3")])
            }
        });
        fs.expect_metadata().returning(|path| {
            if path == Path::new("/staging/sub") {
                Ok(FileMetadata {
                    is_directory: true,
                    ..file(0)
                })
            } else if path == Path::new("/staging/a.mp3") {
                Ok(file(100))
            } else {
                Ok(file(50))
            }
        });

        let total = fs.directory_size(Path::new("/staging")).await.unwrap();
        assert_eq!(total, 150);
    }
}
