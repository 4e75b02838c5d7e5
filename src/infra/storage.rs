//! Filesystem storage for rendered images.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;

/// Errors that can occur while interacting with the image storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem-backed image storage.
///
/// Stored paths are the image file names themselves; a tex key is a hex
/// digest plus tool names, so the names are already filesystem-safe and
/// collision-free.
#[derive(Debug)]
pub struct ImageStorage {
    root: PathBuf,
}

impl ImageStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store the rendered image and return its stored (relative) path.
    pub async fn store(&self, file_name: &str, data: Bytes) -> Result<String, StorageError> {
        let absolute = self.resolve(file_name)?;
        fs::write(&absolute, &data).await?;
        Ok(file_name.to_string())
    }

    /// Attempt to read the stored image into memory.
    pub async fn read(&self, stored_path: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Size of the stored image in bytes, or `None` when it does not exist.
    pub async fn size(&self, stored_path: &str) -> Result<Option<u64>, StorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::metadata(&absolute).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Remove the stored image. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Obtain the absolute filesystem path for a stored image.
    pub fn absolute_path(&self, stored_path: &str) -> Result<PathBuf, StorageError> {
        self.resolve(stored_path)
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}
