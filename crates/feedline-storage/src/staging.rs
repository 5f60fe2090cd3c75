//! Local staging directory for files that are waiting for the ingestion worker.
//!
//! The staging directory is flat: every staged file sits directly under it with an opaque
//! `{uuid}.{ext}` name. Paths that come back from event payloads are untrusted, so every
//! read or remove is resolved against the canonical staging directory first.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use feedline_core::models::{IncomingFile, MediaKind};
use feedline_core::AppError;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Staging I/O failure at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path is outside the staging directory: {}", .0.display())]
    OutsideStagingDir(PathBuf),

    #[error("Staged file not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl StagingError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return StagingError::NotFound(path.to_path_buf());
        }
        StagingError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        AppError::Staging(err.to_string())
    }
}

/// Handle to a file written by [`StagingArea::stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Absolute path inside the staging directory.
    pub path: PathBuf,
    pub original_filename: String,
    pub content_type: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Open the staging directory, creating it if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StagingError::io(&dir, e))?;
        let dir = fs::canonicalize(&dir)
            .await
            .map_err(|e| StagingError::io(&dir, e))?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the full content of `file` under a fresh name and return its handle.
    #[tracing::instrument(skip(self, file), fields(filename = %file.original_filename, size_bytes = file.data.len()))]
    pub async fn stage(&self, file: &IncomingFile) -> Result<StagedFile, StagingError> {
        let name = match file.extension() {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_lowercase()),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.dir.join(name);

        let mut out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| StagingError::io(&path, e))?;

        let written = async {
            out.write_all(&file.data).await?;
            out.sync_all().await
        }
        .await;

        if let Err(e) = written {
            // Never leave a truncated file behind for the worker to pick up.
            let _ = fs::remove_file(&path).await;
            return Err(StagingError::io(&path, e));
        }

        tracing::debug!(path = %path.display(), "File staged");

        Ok(StagedFile {
            path,
            original_filename: file.original_filename.clone(),
            content_type: file.content_type.clone(),
            kind: MediaKind::from_content_type(&file.content_type),
            size_bytes: file.data.len() as u64,
        })
    }

    /// Read a staged file back.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StagingError> {
        let path = self.contain(path).await?;

        let meta = fs::symlink_metadata(&path)
            .await
            .map_err(|e| StagingError::io(&path, e))?;
        if !meta.is_file() {
            return Err(StagingError::OutsideStagingDir(path));
        }

        fs::read(&path).await.map_err(|e| StagingError::io(&path, e))
    }

    pub async fn exists(&self, path: &Path) -> Result<bool, StagingError> {
        let path = self.contain(path).await?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StagingError::io(&path, e))
    }

    /// Remove a staged file. A file that is already gone counts as removed.
    pub async fn remove(&self, path: &Path) -> Result<(), StagingError> {
        let path = self.contain(path).await?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Staged file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagingError::io(&path, e)),
        }
    }

    /// Best-effort removal of several staged files; failures are logged, not returned.
    pub async fn remove_all<'a, I>(&self, paths: I)
    where
        I: IntoIterator<Item = &'a Path>,
    {
        for path in paths {
            if let Err(e) = self.remove(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged file");
            }
        }
    }

    /// Delete staged files whose modification time is at least `max_age` ago.
    pub async fn sweep_expired(&self, max_age: Duration) -> Result<usize, StagingError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StagingError::io(&self.dir, e))?;

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StagingError::io(&self.dir, e))?
        {
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StagingError::io(&path, e)),
            };

            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StagingError::io(&path, e)),
            }
        }

        if removed > 0 {
            tracing::info!(removed, dir = %self.dir.display(), "Swept expired staged files");
        }
        Ok(removed)
    }

    /// Resolve `path` to a file directly under the staging directory.
    async fn contain(&self, path: &Path) -> Result<PathBuf, StagingError> {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        };

        let name = match candidate.file_name() {
            Some(name) if name != ".." && name != "." => name.to_owned(),
            _ => return Err(StagingError::OutsideStagingDir(candidate)),
        };
        let parent = candidate
            .parent()
            .ok_or_else(|| StagingError::OutsideStagingDir(candidate.clone()))?;

        let parent = match fs::canonicalize(parent).await {
            Ok(parent) => parent,
            Err(_) => return Err(StagingError::OutsideStagingDir(candidate)),
        };
        if parent != self.dir {
            return Err(StagingError::OutsideStagingDir(candidate));
        }

        Ok(self.dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn area() -> (tempfile::TempDir, StagingArea) {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("staging")).await.unwrap();
        (dir, area)
    }

    #[tokio::test]
    async fn stage_writes_full_content_with_original_extension() {
        let (_dir, area) = area().await;
        let file = IncomingFile::new("Cat.PNG", "image/png", b"not really a png".to_vec());

        let staged = area.stage(&file).await.unwrap();

        assert!(staged.path.is_absolute());
        assert!(staged.path.starts_with(area.dir()));
        assert_eq!(staged.path.extension().unwrap(), "png");
        assert_eq!(staged.kind, MediaKind::Image);
        assert_eq!(staged.size_bytes, 16);
        assert_eq!(area.read(&staged.path).await.unwrap(), b"not really a png");
    }

    #[tokio::test]
    async fn staged_names_do_not_collide() {
        let (_dir, area) = area().await;
        let file = IncomingFile::new("a.jpg", "image/jpeg", vec![1, 2, 3]);

        let first = area.stage(&file).await.unwrap();
        let second = area.stage(&file).await.unwrap();

        assert_ne!(first.path, second.path);
    }

    #[tokio::test]
    async fn read_rejects_paths_outside_staging_dir() {
        let (dir, area) = area().await;
        let outside = dir.path().join("secret.txt");
        std::fs::write(&outside, b"secret").unwrap();

        let err = area.read(&outside).await.unwrap_err();
        assert!(matches!(err, StagingError::OutsideStagingDir(_)));

        let traversal = area.dir().join("..").join("secret.txt");
        let err = area.read(&traversal).await.unwrap_err();
        assert!(matches!(err, StagingError::OutsideStagingDir(_)));
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let (_dir, area) = area().await;
        let err = area.read(&area.dir().join("gone.png")).await.unwrap_err();
        assert!(matches!(err, StagingError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_dir, area) = area().await;
        let staged = area
            .stage(&IncomingFile::new("a.mp4", "video/mp4", vec![0; 8]))
            .await
            .unwrap();

        area.remove(&staged.path).await.unwrap();
        area.remove(&staged.path).await.unwrap();
        assert!(!area.exists(&staged.path).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_only_removes_expired_files() {
        let (_dir, area) = area().await;
        area.stage(&IncomingFile::new("a.png", "image/png", vec![1]))
            .await
            .unwrap();
        area.stage(&IncomingFile::new("b.png", "image/png", vec![2]))
            .await
            .unwrap();

        let kept = area.sweep_expired(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(kept, 0);

        let removed = area.sweep_expired(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(std::fs::read_dir(area.dir()).unwrap().count(), 0);
    }
}
