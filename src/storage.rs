//! Output persistence
//!
//! Captured bytes go to the host's [`MediaStore`] first. When the store
//! declines (returns `None`) the bytes are written to a file under the
//! configured fallback directory and a file locator is returned instead.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::CameraError;

/// Where a capture or recording ended up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaLocator {
    /// Opaque locator handed back by the media store.
    Store(String),
    /// Plain file written by the core itself.
    File(PathBuf),
}

impl MediaLocator {
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            MediaLocator::File(path) => Some(path),
            MediaLocator::Store(_) => None,
        }
    }
}

impl std::fmt::Display for MediaLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaLocator::Store(uri) => write!(f, "{}", uri),
            MediaLocator::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Storage collaborator: persist bytes under a kind prefix (`IMG`, `NIGHT`,
/// `BURST_3`, ...). `None` means the store could not take them.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn persist(&self, data: Bytes, prefix: &str) -> Option<MediaLocator>;
}

/// `PREFIX_yyyyMMdd_HHmmss_<short uuid>.ext`
pub fn timestamped_file_name(prefix: &str, extension: &str) -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}.{}", prefix, stamp, &unique[..8], extension)
}

/// Write bytes to a fresh file in `directory`.
pub async fn write_fallback_file(
    directory: &Path,
    prefix: &str,
    extension: &str,
    data: Bytes,
) -> Result<PathBuf, CameraError> {
    let path = directory.join(timestamped_file_name(prefix, extension));
    let dir = directory.to_path_buf();
    let target = path.clone();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        std::fs::create_dir_all(&dir)?;
        std::fs::write(&target, &data)
    })
    .await
    .map_err(|e| CameraError::IoError(format!("Fallback write task failed: {}", e)))??;

    Ok(path)
}

/// Store first, fallback file second.
pub async fn persist_with_fallback(
    store: &dyn MediaStore,
    fallback_directory: &Path,
    data: Bytes,
    prefix: &str,
    extension: &str,
) -> Result<MediaLocator, CameraError> {
    if let Some(locator) = store.persist(data.clone(), prefix).await {
        log::debug!("Persisted {} ({} bytes) as {}", prefix, data.len(), locator);
        return Ok(locator);
    }

    log::warn!(
        "Media store declined {} capture, writing fallback file in {}",
        prefix,
        fallback_directory.display()
    );
    let path = write_fallback_file(fallback_directory, prefix, extension, data).await?;
    Ok(MediaLocator::File(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Declining;

    #[async_trait]
    impl MediaStore for Declining {
        async fn persist(&self, _data: Bytes, _prefix: &str) -> Option<MediaLocator> {
            None
        }
    }

    struct Accepting;

    #[async_trait]
    impl MediaStore for Accepting {
        async fn persist(&self, _data: Bytes, prefix: &str) -> Option<MediaLocator> {
            Some(MediaLocator::Store(format!("media://{}", prefix)))
        }
    }

    #[test]
    fn test_file_name_shape() {
        let name = timestamped_file_name("IMG", "jpg");
        assert!(name.starts_with("IMG_"));
        assert!(name.ends_with(".jpg"));
        assert_ne!(name, timestamped_file_name("IMG", "jpg"));
    }

    #[tokio::test]
    async fn test_store_wins_when_it_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let locator = persist_with_fallback(&Accepting, dir.path(), Bytes::from_static(b"jpeg"), "IMG", "jpg")
            .await
            .unwrap();
        assert_eq!(locator, MediaLocator::Store("media://IMG".to_string()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_file_when_store_declines() {
        let dir = tempfile::tempdir().unwrap();
        let locator = persist_with_fallback(&Declining, dir.path(), Bytes::from_static(b"jpeg"), "NIGHT", "jpg")
            .await
            .unwrap();
        let path = locator.as_path().expect("file locator").to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }
}
