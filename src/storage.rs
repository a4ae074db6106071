//! Blob storage for product images.
//!
//! Blobs are addressed by slash-separated keys such as `products/img_1f2e.png`.
//! The [`BlobStore`] trait is the capability handed to the product operations;
//! [`LocalStorage`] maps every key onto a file below a root directory.

use chrono::Utc;
use std::{
    fmt::Debug,
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use thiserror::Error;

/// Namespace every product image key lives under.
pub const PRODUCT_PREFIX: &str = "products";

/// Key-addressed byte storage.
///
/// Operations are blocking; callers run them one after another.
pub trait BlobStore: Send + Sync + Debug {
    /// Writes `bytes` under `key`, replacing any previous blob.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Reads the blob stored under `key`, or `None` when there is none.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Returns whether a blob is stored under `key`.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Deletes the blob under `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed [`BlobStore`].
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_path: PathBuf,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` rooted at `root`.
    ///
    /// The directory is created lazily on the first `put`.
    pub fn new(root: PathBuf) -> LocalStorage {
        LocalStorage { root_path: root }
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Resolves a key to an absolute path below the root.
    ///
    /// Keys must be relative and may not climb out of the root.
    fn derive_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !well_formed {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }

        Ok(self.root_path.join(relative))
    }
}

impl BlobStore for LocalStorage {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.derive_path(key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, bytes)?;

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.derive_path(key)?;
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.derive_path(key)?;
        Ok(path.is_file())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.derive_path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Generates a fresh key for an uploaded file: `products/<uuid>.<ext>`.
pub fn upload_key(ext: &str) -> String {
    format!(
        "{}/{}.{}",
        PRODUCT_PREFIX,
        uuid::Uuid::new_v4().simple(),
        ext
    )
}

/// Generates a fresh key for a decoded data URL: `products/img_<unique>.<ext>`.
///
/// The unique part is the current time in microseconds followed by a random suffix.
pub fn decoded_key(ext: &str) -> String {
    let micros = Utc::now().timestamp_micros();
    let random = uuid::Uuid::new_v4().simple().to_string();

    format!(
        "{}/img_{:x}{}.{}",
        PRODUCT_PREFIX,
        micros,
        &random[..8],
        ext
    )
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key is empty, absolute, or escapes the storage root.
    #[error("invalid storage key: {key}")]
    InvalidKey { key: String },

    /// Filesystem IO error.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
