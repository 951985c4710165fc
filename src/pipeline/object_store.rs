//! Object store contract for raw batches
//!
//! Raw documents are immutable: `put` never overwrites an existing key.
//! `LocalObjectStore` maps a bucket onto a directory on disk.

use async_trait::async_trait;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    AlreadyExists(String),
    NotFound(String),
    InvalidKey(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::AlreadyExists(key) => write!(f, "Object already exists: {}", key),
            StoreError::NotFound(key) => write!(f, "Object not found: {}", key),
            StoreError::InvalidKey(key) => write!(f, "Invalid object key: {}", key),
        }
    }
}

impl std::error::Error for StoreError {}

/// Fully qualified address of a persisted object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub uri: String,
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `content` under `key`. Fails with `AlreadyExists` if the key is taken.
    async fn put(
        &self,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<ObjectLocation, StoreError>;

    /// Read back a previously written object
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, StoreError>;
}

/// Filesystem-backed bucket: objects live at `<root>/<bucket>/<key>`
pub struct LocalObjectStore {
    bucket: String,
    bucket_dir: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Result<Self, StoreError> {
        if bucket.is_empty() || bucket.contains('/') || bucket.contains("..") {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }

        let bucket_dir = root.as_ref().join(bucket);
        fs::create_dir_all(&bucket_dir)?;

        // Canonical path so URIs are absolute and stable
        let bucket_dir = bucket_dir.canonicalize()?;

        log::info!("🪣 Object store bucket: {}", bucket_dir.display());

        Ok(Self {
            bucket: bucket.to_string(),
            bucket_dir,
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('/')
            && key.split('/').all(|part| !part.is_empty() && part != "." && part != "..");
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.bucket_dir.join(key))
    }

    fn location_for(&self, key: &str, path: &Path) -> ObjectLocation {
        ObjectLocation {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            uri: format!("file://{}", path.display()),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<ObjectLocation, StoreError> {
        let path = self.object_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        write_or_remove(&path, file, content, |f| f.sync_all())?;

        log::debug!(
            "Stored {} bytes ({}) at {}",
            content.len(),
            content_type,
            path.display()
        );

        Ok(self.location_for(key, &path))
    }

    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, StoreError> {
        if location.bucket != self.bucket {
            return Err(StoreError::NotFound(location.uri.clone()));
        }

        let path = self.object_path(&location.key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(location.uri.clone()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Write `content` through `out`, then `finish`; on any error the file at
/// `path` is removed so the key stays free.
fn write_or_remove<W: Write>(
    path: &Path,
    mut out: W,
    content: &[u8],
    finish: impl FnOnce(&mut W) -> std::io::Result<()>,
) -> Result<(), StoreError> {
    let result = out.write_all(content).and_then(|_| finish(&mut out));
    drop(out);

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(path) {
            log::warn!("⚠️  Could not remove partial object {}: {}", path.display(), cleanup);
        }
        return Err(StoreError::Io(e));
    }
    Ok(())
}
