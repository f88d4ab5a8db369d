//! Blob storage for uploaded document versions.
//!
//! The engine only ever sees an opaque reference returned by
//! [`BlobStore::put`]. [`LocalBlobStore`] writes files under a root directory
//! using tokio fs; [`MemoryBlobStore`] keeps bytes in a map for tests and the
//! in-memory development mode.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob {0} not found")]
    NotFound(String),

    #[error("invalid blob reference: {0}")]
    InvalidReference(String),

    #[error("blob storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store `bytes` and return the reference to record on the version.
    async fn put(&self, bytes: &[u8], content_type: &str, filename: &str)
        -> Result<String, BlobError>;

    async fn get(&self, reference: &str) -> Result<Vec<u8>, BlobError>;

    /// Remove a blob no version points at. Missing blobs are not an error.
    async fn delete(&self, reference: &str) -> Result<(), BlobError>;
}

/// Blob name for a new upload: a fresh UUID keeping the original extension.
fn blob_name(filename: &str) -> String {
    let id = Uuid::new_v4();
    match Path::new(filename).extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", id, ext.to_ascii_lowercase()),
        _ => id.to_string(),
    }
}

/// References are bare file names; anything that could walk out of the root
/// is refused.
fn check_reference(reference: &str) -> Result<(), BlobError> {
    let suspicious = reference.is_empty()
        || reference.contains('/')
        || reference.contains('\\')
        || reference.starts_with('.');
    if suspicious {
        return Err(BlobError::InvalidReference(reference.to_string()));
    }
    Ok(())
}

pub fn format_file_size(size: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as i64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, BlobError> {
        fs::create_dir_all(&self.root).await?;

        let name = blob_name(filename);
        let mut file = fs::File::create(self.root.join(&name)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        debug!(
            blob = %name,
            content_type,
            size = %format_file_size(bytes.len() as i64),
            "Stored blob"
        );
        Ok(name)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, BlobError> {
        check_reference(reference)?;
        match fs::read(self.root.join(reference)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, reference: &str) -> Result<(), BlobError> {
        check_reference(reference)?;
        match fs::remove_file(self.root.join(reference)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        bytes: &[u8],
        _content_type: &str,
        filename: &str,
    ) -> Result<String, BlobError> {
        let name = blob_name(filename);
        self.blobs.write().await.insert(name.clone(), bytes.to_vec());
        Ok(name)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, BlobError> {
        check_reference(reference)?;
        self.blobs
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(reference.to_string()))
    }

    async fn delete(&self, reference: &str) -> Result<(), BlobError> {
        check_reference(reference)?;
        self.blobs.write().await.remove(reference);
        Ok(())
    }
}
