use crate::keys::validate_public_id;
use crate::traits::{DeleteOutcome, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
///
/// Objects live at `{base_path}/{public_id}.{ext}` and are served from
/// `{base_url}/upload/v{version}/{public_id}.{ext}`.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for object storage (e.g., "/var/lib/feedline/media")
    /// * `base_url` - Base URL for serving objects (e.g., "http://localhost:3000/media")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    fn object_path(&self, public_id: &str, extension: Option<&str>) -> PathBuf {
        match extension {
            Some(ext) => self.base_path.join(format!("{}.{}", public_id, ext)),
            None => self.base_path.join(public_id),
        }
    }

    fn generate_url(&self, public_id: &str, extension: Option<&str>, version: i64) -> String {
        let file = match extension {
            Some(ext) => format!("{}.{}", public_id, ext),
            None => public_id.to_string(),
        };
        format!(
            "{}/upload/v{}/{}",
            self.base_url.trim_end_matches('/'),
            version,
            file
        )
    }

    /// Remove every file stored under `public_id`, whatever its extension.
    async fn remove_variants(&self, public_id: &str) -> StorageResult<usize> {
        let target = self.base_path.join(public_id);
        let (Some(dir), Some(stem)) = (target.parent(), target.file_name()) else {
            return Ok(0);
        };

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let same_object = path.file_stem() == Some(stem) || path.file_name() == Some(stem);
            if !same_object || !entry.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::DeleteFailed(format!(
                        "Failed to delete {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(removed)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(
        &self,
        public_id: &str,
        filename: &str,
        _content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<StoredObject> {
        validate_public_id(public_id)?;
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty());
        let path = self.object_path(public_id, extension);
        let size = data.len();

        self.ensure_parent_dir(&path).await?;
        // Overwrite semantics: a previous upload may have used another extension.
        self.remove_variants(public_id).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        let url = self.generate_url(public_id, extension, chrono::Utc::now().timestamp());

        tracing::info!(
            path = %path.display(),
            public_id = %public_id,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(StoredObject {
            public_id: public_id.to_string(),
            url,
        })
    }

    async fn delete(&self, public_id: &str) -> StorageResult<DeleteOutcome> {
        validate_public_id(public_id)?;

        let removed = self.remove_variants(public_id).await?;
        if removed == 0 {
            tracing::debug!(public_id = %public_id, "Local object already absent");
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        tracing::info!(public_id = %public_id, "Local storage delete successful");
        Ok(DeleteOutcome::Deleted)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:3000/media/".to_string())
            .await
            .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn upload_returns_versioned_url_for_public_id() {
        let (dir, storage) = storage().await;

        let stored = storage
            .upload("feeds/f1/abc", "photo.png", "image/png", b"png".to_vec())
            .await
            .unwrap();

        assert!(stored.url.starts_with("http://localhost:3000/media/upload/v"));
        assert!(stored.url.ends_with("/feeds/f1/abc.png"));
        assert_eq!(stored.public_id, "feeds/f1/abc");
        assert!(dir.path().join("feeds/f1/abc.png").exists());
    }

    #[tokio::test]
    async fn reupload_overwrites_same_public_id() {
        let (dir, storage) = storage().await;

        storage
            .upload("feeds/f1/abc", "a.jpg", "image/jpeg", b"one".to_vec())
            .await
            .unwrap();
        storage
            .upload("feeds/f1/abc", "a.png", "image/png", b"two".to_vec())
            .await
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("feeds/f1"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::read(dir.path().join("feeds/f1/abc.png")).unwrap(),
            b"two"
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, storage) = storage().await;
        storage
            .upload("feeds/f1/abc", "a.png", "image/png", b"x".to_vec())
            .await
            .unwrap();

        assert_eq!(
            storage.delete("feeds/f1/abc").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            storage.delete("feeds/f1/abc").await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
        assert_eq!(
            storage.delete("feeds/never/existed").await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn rejects_traversal_public_ids() {
        let (_dir, storage) = storage().await;
        let err = storage
            .upload("../escape", "a.png", "image/png", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
