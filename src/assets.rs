//! Asset host client: turns raw image bytes into a publicly reachable URL.

use crate::config::Credentials;
use crate::error::UploadError;
use crate::signing::upload_signature;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

/// An image received from the browser, held in memory for one request.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub secure_url: String,
    pub public_id: Option<String>,
}

#[async_trait]
pub trait AssetHost: Send + Sync {
    async fn upload(&self, image: &ImageFile) -> Result<UploadedAsset, UploadError>;
}

pub struct CloudinaryClient {
    http: Client,
    upload_url: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    public_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryClient {
    pub fn new(http: Client, creds: &Credentials) -> Self {
        Self {
            http,
            upload_url: format!(
                "{}/v1_1/{}/image/upload",
                creds.asset_api_url, creds.cloud_name
            ),
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
            folder: creds.upload_folder.clone(),
        }
    }

    fn timestamp() -> String {
        chrono::Utc::now().timestamp().to_string()
    }
}

#[async_trait]
impl AssetHost for CloudinaryClient {
    async fn upload(&self, image: &ImageFile) -> Result<UploadedAsset, UploadError> {
        let timestamp = Self::timestamp();
        let mut signed = BTreeMap::new();
        signed.insert("folder", self.folder.clone());
        signed.insert("timestamp", timestamp.clone());
        let signature = upload_signature(&signed, &self.api_secret);

        let mut part =
            reqwest::multipart::Part::bytes(image.bytes.clone()).file_name(image.file_name.clone());
        if let Some(mime) = image.content_type.as_deref() {
            part = part
                .mime_str(mime)
                .map_err(|e| UploadError::Network(format!("Invalid MIME type: {e}")))?;
        }
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", self.folder.clone())
            .text("signature", signature);

        tracing::debug!(
            folder = %self.folder,
            bytes = image.len(),
            "Uploading image to asset host"
        );
        let resp = self
            .http
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 {
            tracing::error!(
                "Received 401 Unauthorized from the asset host. \
                 Check CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET."
            );
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(UploadError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let uploaded: UploadResponse = resp
            .json()
            .await
            .map_err(|e| UploadError::Network(format!("Failed to parse media response: {e}")))?;
        match uploaded.secure_url {
            Some(secure_url) if !secure_url.is_empty() => {
                tracing::info!(url = %secure_url, "Image stored on asset host");
                Ok(UploadedAsset {
                    secure_url,
                    public_id: uploaded.public_id,
                })
            }
            _ => Err(UploadError::EmptyResult),
        }
    }
}
