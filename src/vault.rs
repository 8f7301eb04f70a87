//! Request orchestration: encode, decode, ciphertext preview and type stats.
//!
//! Key material exists only inside the `encode` and `decode` call trees. It
//! moves from the generator into the cipher and then into the envelope
//! buffer that the codec writes into the carrier. It is never logged or
//! stored. The blob store only ever receives ciphertext, tag and metadata.

use base64::Engine;
use std::sync::Arc;

use crate::carrier::CarrierProvider;
use crate::config::Config;
use crate::envelope::{KeyEnvelope, MAX_CONTENT_TYPE_LEN, MAX_NAME_LEN};
use crate::error::{Result, ServiceError};
use crate::keys;
use crate::stego;
use crate::stego_crypto;
use crate::store::{BlobMetadata, BlobStore, FileId, GraphStat};

const DEFAULT_KEY_IMAGE_NAME: &str = "stegvault-key.png";
const MAX_KEY_IMAGE_STEM: usize = 64;

/// Limits and URLs the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub max_upload_bytes: usize,
    pub allowed_expiry_minutes: Vec<u32>,
    pub default_expiry_minutes: u32,
    pub public_base_url: String,
    /// Key images wider or taller than this are refused before decoding.
    pub max_key_image_dimension: u32,
}

impl VaultSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_upload_bytes: config.limits.max_upload_bytes(),
            allowed_expiry_minutes: config.limits.allowed_expiry_minutes.clone(),
            default_expiry_minutes: config.limits.default_expiry_minutes,
            public_base_url: config.public_base_url.clone(),
            max_key_image_dimension: config.carrier.max_dimension,
        }
    }
}

/// An upload as received from the client.
#[derive(Debug)]
pub struct EncodeRequest {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub original_name: Option<String>,
    pub expiry_minutes: Option<u32>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeResponse {
    pub access_url: String,
    pub key_image_data_url: String,
    pub key_image_name: String,
}

#[derive(Debug)]
pub struct DecodedFile {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

/// Run CPU-bound work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServiceError::Internal(format!("task join error: {}", e)))?
}

/// Strip any directory part and cap the length at a char boundary.
fn sanitize_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() {
        return None;
    }
    let mut end = base.len().min(MAX_NAME_LEN);
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    Some(base[..end].to_string())
}

/// `report.pdf` -> `report-key.png`.
pub fn key_image_name(original_name: Option<&str>) -> String {
    let stem = original_name
        .map(|name| match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        })
        .unwrap_or("");
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(MAX_KEY_IMAGE_STEM)
        .collect();
    if cleaned.is_empty() {
        DEFAULT_KEY_IMAGE_NAME.to_string()
    } else {
        format!("{}-key.png", cleaned)
    }
}

/// Pull a file id out of an access URL, a path, or a bare id. The id is the
/// last non-empty path segment, ignoring any query or fragment.
pub fn parse_file_reference(reference: &str) -> Option<FileId> {
    let path = reference.trim().split(['?', '#']).next().unwrap_or("");
    let segment = path.split('/').filter(|s| !s.is_empty()).last()?;
    FileId::parse(segment)
}

pub struct Vault {
    store: Arc<BlobStore>,
    carriers: CarrierProvider,
    settings: VaultSettings,
}

impl Vault {
    pub fn new(store: Arc<BlobStore>, carriers: CarrierProvider, settings: VaultSettings) -> Self {
        Self {
            store,
            carriers,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    fn resolve_expiry(&self, requested: Option<u32>) -> Result<u32> {
        match requested {
            None => Ok(self.settings.default_expiry_minutes),
            Some(minutes) if self.settings.allowed_expiry_minutes.contains(&minutes) => Ok(minutes),
            Some(minutes) => Err(ServiceError::InvalidRequest(format!(
                "expiryMinutes must be one of {:?}, got {}",
                self.settings.allowed_expiry_minutes, minutes
            ))),
        }
    }

    fn access_url(&self, file_id: &FileId) -> String {
        format!(
            "{}/file/{}",
            self.settings.public_base_url.trim_end_matches('/'),
            file_id
        )
    }

    /// Encrypt an upload, hide its key in a fresh carrier and store the
    /// ciphertext.
    pub async fn encode(&self, request: EncodeRequest) -> Result<EncodeResponse> {
        let limit = self.settings.max_upload_bytes;
        if request.data.len() > limit {
            return Err(ServiceError::PayloadTooLarge { limit });
        }
        let expiry_minutes = self.resolve_expiry(request.expiry_minutes)?;

        let content_type = request
            .content_type
            .map(|ct| ct.trim().to_string())
            .filter(|ct| !ct.is_empty());
        if content_type.as_ref().is_some_and(|ct| ct.len() > MAX_CONTENT_TYPE_LEN) {
            return Err(ServiceError::InvalidRequest("content type too long".to_string()));
        }
        let original_name = request.original_name.as_deref().and_then(sanitize_name);
        let original_size = request.data.len();

        let material = keys::generate()?;
        let file_id = self.store.allocate_id()?;
        let aad = stego_crypto::associated_data(file_id.as_str(), content_type.as_deref())?;

        let data = request.data;
        let (ciphertext, auth_tag, material) = run_blocking(move || {
            let (ciphertext, tag) = stego_crypto::encrypt(data, &material, &aad)?;
            Ok((ciphertext, tag, material))
        })
        .await?;

        let payload = KeyEnvelope {
            material,
            file_id: file_id.clone(),
            content_type: content_type.clone(),
            original_name: original_name.clone(),
        }
        .to_bytes()?;

        let carrier = self.carriers.fetch_carrier(payload.len()).await?;
        let key_png = run_blocking(move || stego::embed(&carrier, &payload)).await?;

        self.store.put(
            file_id.clone(),
            ciphertext,
            auth_tag,
            BlobMetadata {
                content_type: content_type.clone(),
                original_size,
            },
            chrono::Duration::minutes(i64::from(expiry_minutes)),
        )?;

        tracing::info!(
            file_id = %file_id,
            size = original_size,
            content_type = content_type.as_deref().unwrap_or("-"),
            expiry_minutes,
            "encoded file"
        );

        Ok(EncodeResponse {
            access_url: self.access_url(&file_id),
            key_image_data_url: format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(&key_png)
            ),
            key_image_name: key_image_name(original_name.as_deref()),
        })
    }

    /// Recover a file from its access URL and key image.
    pub async fn decode(&self, file_url: &str, key_image: Vec<u8>) -> Result<DecodedFile> {
        let file_id = parse_file_reference(file_url).ok_or(ServiceError::NotFound)?;

        let max_side = self.settings.max_key_image_dimension;
        let envelope = run_blocking(move || {
            let payload = stego::extract(&key_image, max_side)?;
            KeyEnvelope::from_bytes(&payload)
        })
        .await?;

        let blob = self.store.get(&file_id)?;
        let aad =
            stego_crypto::associated_data(blob.file_id.as_str(), blob.content_type.as_deref())?;
        let file_name = envelope.original_name;
        let material = envelope.material;

        let sealed = Arc::clone(&blob);
        let data = run_blocking(move || {
            stego_crypto::decrypt(&sealed.ciphertext, &sealed.auth_tag, &material, &aad)
        })
        .await
        .inspect_err(|e| {
            if matches!(e, ServiceError::AuthenticationFailed) {
                tracing::info!(file_id = %file_id, "key image rejected for file");
            }
        })?;

        tracing::info!(file_id = %file_id, size = data.len(), "decoded file");

        Ok(DecodedFile {
            data,
            content_type: blob.content_type.clone(),
            file_name,
        })
    }

    /// Stored ciphertext followed by its tag, for preview.
    pub fn fetch_ciphertext(&self, file_id: &str) -> Result<Vec<u8>> {
        let file_id = FileId::parse(file_id).ok_or(ServiceError::NotFound)?;
        let blob = self.store.get(&file_id)?;
        Ok(stego_crypto::join_sealed(&blob.ciphertext, &blob.auth_tag))
    }

    pub fn graph(&self) -> Vec<GraphStat> {
        self.store.stats()
    }
}
