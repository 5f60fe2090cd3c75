//! Cloudinary backend using the signed upload/destroy REST API.

use crate::keys::validate_public_id;
use crate::traits::{DeleteOutcome, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.cloudinary.com";

/// Resource types tried, in order, when destroying by public id.
const DESTROY_RESOURCE_TYPES: [&str; 2] = ["image", "video"];

/// Account credentials parsed from `cloudinary://<api_key>:<api_secret>@<cloud_name>`.
#[derive(Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl CloudinaryCredentials {
    pub fn from_url(url: &str) -> StorageResult<Self> {
        let invalid = || {
            StorageError::ConfigError(
                "CLOUDINARY_URL must look like cloudinary://<api_key>:<api_secret>@<cloud_name>"
                    .to_string(),
            )
        };

        let rest = url.trim().strip_prefix("cloudinary://").ok_or_else(invalid)?;
        let (userinfo, cloud_name) = rest.rsplit_once('@').ok_or_else(invalid)?;
        let (api_key, api_secret) = userinfo.split_once(':').ok_or_else(invalid)?;
        let cloud_name = cloud_name.trim_end_matches('/');

        if api_key.is_empty() || api_secret.is_empty() || cloud_name.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Cloudinary storage implementation
#[derive(Clone)]
pub struct CloudinaryStorage {
    client: reqwest::Client,
    credentials: CloudinaryCredentials,
    api_base: String,
}

impl CloudinaryStorage {
    pub fn new(credentials: CloudinaryCredentials, timeout: Duration) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point the client at another API host (e.g. a local mock).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, resource_type: &str, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{}/{}",
            self.api_base, self.credentials.cloud_name, resource_type, action
        )
    }

    /// Signature over the alphabetically sorted `key=value` pairs followed by the API secret.
    pub(crate) fn sign(&self, params: &[(&str, String)]) -> String {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let to_sign = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(to_sign.as_bytes());
        hasher.update(self.credentials.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn signed_params(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        params.push(("timestamp", chrono::Utc::now().timestamp().to_string()));
        let signature = self.sign(&params);
        params.push(("signature", signature));
        params.push(("signature_algorithm", "sha256".to_string()));
        params.push(("api_key", self.credentials.api_key.clone()));
        params
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => format!("{}: {}", status, body.error.message),
            Err(_) => status.to_string(),
        }
    }

    async fn destroy(&self, resource_type: &str, public_id: &str) -> StorageResult<DestroyResponse> {
        let params = self.signed_params(vec![
            ("invalidate", "true".to_string()),
            ("public_id", public_id.to_string()),
        ]);

        let response = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&params)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(format!("Cloudinary destroy request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::DeleteFailed(Self::error_message(response).await));
        }

        response
            .json::<DestroyResponse>()
            .await
            .map_err(|e| StorageError::BackendError(format!("Invalid destroy response: {}", e)))
    }
}

#[async_trait]
impl Storage for CloudinaryStorage {
    #[tracing::instrument(skip(self, data), fields(storage.backend = "cloudinary", size_bytes = data.len()))]
    async fn upload(
        &self,
        public_id: &str,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<StoredObject> {
        validate_public_id(public_id)?;
        let start = std::time::Instant::now();

        let params = self.signed_params(vec![
            ("invalidate", "true".to_string()),
            ("overwrite", "true".to_string()),
            ("public_id", public_id.to_string()),
        ]);

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .map_err(|e| StorageError::UploadFailed(format!("Invalid content type {}: {}", content_type, e)))?;

        let mut form = reqwest::multipart::Form::new().part("file", part);
        for (key, value) in params {
            form = form.text(key, value);
        }

        let response = self
            .client
            .post(self.endpoint("auto", "upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Cloudinary upload request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StorageError::UploadFailed(Self::error_message(response).await));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::BackendError(format!("Invalid upload response: {}", e)))?;

        tracing::info!(
            public_id = %body.public_id,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Cloudinary upload successful"
        );

        Ok(StoredObject {
            public_id: body.public_id,
            url: body.secure_url,
        })
    }

    async fn delete(&self, public_id: &str) -> StorageResult<DeleteOutcome> {
        validate_public_id(public_id)?;

        for resource_type in DESTROY_RESOURCE_TYPES {
            let response = self.destroy(resource_type, public_id).await?;
            match response.result.as_str() {
                "ok" => {
                    tracing::info!(public_id = %public_id, resource_type, "Cloudinary delete successful");
                    return Ok(DeleteOutcome::Deleted);
                }
                "not found" => continue,
                other => {
                    return Err(StorageError::DeleteFailed(format!(
                        "Unexpected destroy result for {}: {}",
                        public_id, other
                    )))
                }
            }
        }

        tracing::debug!(public_id = %public_id, "Cloudinary object already absent");
        Ok(DeleteOutcome::AlreadyAbsent)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Cloudinary
    }
}
