//! Public id generation and validation shared by all backends.
//!
//! URL format: `{base}/upload/v{version}/{public_id}.{ext}`. The public id may contain `/`
//! (folders).

use std::path::Path;

use feedline_core::constants::FEED_MEDIA_FOLDER;
use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

/// Public id for a staged feed media file: `feeds/{feed_id}/{staged_file_stem}`.
///
/// Deterministic per staged file, so re-uploading after a redelivery targets the same object.
pub fn feed_media_public_id(feed_id: Uuid, staged_path: &Path) -> String {
    let stem = staged_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    format!("{}/{}/{}", FEED_MEDIA_FOLDER, feed_id, stem)
}

/// Reject public ids that are empty, absolute, or escape their folder.
pub fn validate_public_id(public_id: &str) -> StorageResult<()> {
    if public_id.is_empty()
        || public_id.starts_with('/')
        || public_id.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(format!(
            "invalid public id: {:?}",
            public_id
        )));
    }
    Ok(())
}
