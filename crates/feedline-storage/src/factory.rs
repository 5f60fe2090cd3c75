#[cfg(feature = "storage-cloudinary")]
use crate::{CloudinaryCredentials, CloudinaryStorage};
#[cfg(feature = "storage-local")]
use crate::LocalStorage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use feedline_core::Config;
use std::sync::Arc;

/// Create a storage backend based on configuration
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    match config.storage.backend {
        #[cfg(feature = "storage-cloudinary")]
        StorageBackend::Cloudinary => {
            let url = config.storage.cloudinary_url.as_deref().ok_or_else(|| {
                StorageError::ConfigError("CLOUDINARY_URL not configured".to_string())
            })?;
            let credentials = CloudinaryCredentials::from_url(url)?;
            let timeout = std::time::Duration::from_secs(config.ingestion.upload_timeout_secs);

            tracing::info!(cloud_name = %credentials.cloud_name, "Using Cloudinary storage");
            Ok(Arc::new(CloudinaryStorage::new(credentials, timeout)?))
        }

        #[cfg(not(feature = "storage-cloudinary"))]
        StorageBackend::Cloudinary => Err(StorageError::ConfigError(
            "Cloudinary backend not available (storage-cloudinary feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config.storage.local_path.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;
            let base_url = config.storage.local_base_url.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_BASE_URL not configured".to_string())
            })?;

            tracing::info!(path = %base_path, "Using local filesystem storage");
            Ok(Arc::new(LocalStorage::new(base_path, base_url).await?))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
