//! Feedline Storage Library
//!
//! Object storage abstraction and backends (Cloudinary, local filesystem), plus the two
//! file-handling pieces of the ingestion pipeline:
//!
//! - [`StagingArea`]: the local directory where request files wait for the worker.
//! - [`BoundedUploader`]: concurrent multi-file upload with a fixed ceiling on in-flight calls.
//!
//! # Public ids
//!
//! Objects are addressed by a public id (`feeds/{feed_id}/{stem}`) chosen by the caller,
//! and served from URLs shaped `.../upload/v{version}/{public_id}.{ext}`. Deletes are keyed
//! by public id and are idempotent. See the `keys` module.

#[cfg(feature = "storage-cloudinary")]
pub mod cloudinary;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod staging;
pub mod traits;
pub mod uploader;

// Re-export commonly used types
#[cfg(feature = "storage-cloudinary")]
pub use cloudinary::{CloudinaryCredentials, CloudinaryStorage};
pub use factory::create_storage;
pub use feedline_core::StorageBackend;
pub use keys::feed_media_public_id;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use staging::{StagedFile, StagingArea, StagingError};
pub use traits::{DeleteOutcome, Storage, StorageError, StorageResult, StoredObject};
pub use uploader::{BoundedUploader, UploadBatch, UploadRequest, UploadResult, UploadedMedia};
