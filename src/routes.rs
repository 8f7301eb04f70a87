//! HTTP surface consumed by the browser client.
//!
//! POST /encode        multipart `file` + optional `expiryMinutes` -> JSON with access URL and key image
//! POST /decode        multipart `fileUrl` + `file` (key image)    -> decrypted bytes
//! GET  /graph         live file counts by content type (top 5)
//! GET  /file/{fileId} stored ciphertext followed by its GCM tag
//! GET  /health        liveness and record count

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Result, ServiceError};
use crate::store::GraphStat;
use crate::vault::{EncodeRequest, EncodeResponse, Vault};

/// Room for multipart boundaries and the text fields around the file.
const MULTIPART_SLACK_BYTES: usize = 1024 * 1024;

/// Shared state passed to all handlers via the axum State extractor.
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<Vault>,
}

#[derive(Debug, Serialize)]
pub struct GraphResponse {
    pub data: Vec<GraphStat>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    blobs: usize,
}

fn multipart_error(err: MultipartError, limit: usize) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge { limit }
    } else {
        ServiceError::InvalidRequest(format!("malformed multipart body: {}", err.body_text()))
    }
}

/// POST /encode
pub async fn encode_route(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<EncodeResponse>> {
    let limit = state.vault.settings().max_upload_bytes;
    let mut upload: Option<EncodeRequest> = None;
    let mut expiry_minutes: Option<u32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let original_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                if data.len() > limit {
                    return Err(ServiceError::PayloadTooLarge { limit });
                }
                upload = Some(EncodeRequest {
                    data: data.to_vec(),
                    content_type,
                    original_name,
                    expiry_minutes: None,
                });
            }
            Some("expiryMinutes") => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let text = text.trim();
                if !text.is_empty() {
                    let minutes = text.parse::<u32>().map_err(|_| {
                        ServiceError::InvalidRequest(format!("expiryMinutes is not a number: {}", text))
                    })?;
                    expiry_minutes = Some(minutes);
                }
            }
            other => {
                tracing::debug!(field = ?other, "ignoring unknown multipart field");
            }
        }
    }

    let mut request =
        upload.ok_or_else(|| ServiceError::InvalidRequest("missing `file` field".to_string()))?;
    request.expiry_minutes = expiry_minutes;

    let response = state.vault.encode(request).await?;
    Ok(Json(response))
}

fn attachment_disposition(file_name: Option<&str>) -> HeaderValue {
    let safe: Option<String> = file_name.map(|name| {
        name.chars()
            .map(|c| {
                if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    });
    safe.and_then(|name| HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)).ok())
        .unwrap_or_else(|| HeaderValue::from_static("attachment"))
}

/// POST /decode
pub async fn decode_route(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, HeaderMap, Vec<u8>)> {
    let limit = state.vault.settings().max_upload_bytes;
    let mut file_url: Option<String> = None;
    let mut key_image: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("fileUrl") => {
                file_url = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            Some("file") => {
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                key_image = Some(bytes.to_vec());
            }
            other => {
                tracing::debug!(field = ?other, "ignoring unknown multipart field");
            }
        }
    }

    let file_url =
        file_url.ok_or_else(|| ServiceError::InvalidRequest("missing `fileUrl` field".to_string()))?;
    let key_image =
        key_image.ok_or_else(|| ServiceError::InvalidRequest("missing `file` field".to_string()))?;

    let decoded = state.vault.decode(&file_url, key_image).await?;

    let mut headers = HeaderMap::new();
    let content_type = decoded
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CONTENT_DISPOSITION,
        attachment_disposition(decoded.file_name.as_deref()),
    );
    Ok((StatusCode::OK, headers, decoded.data))
}

/// GET /graph
pub async fn graph_route(State(state): State<AppState>) -> Json<GraphResponse> {
    Json(GraphResponse {
        data: state.vault.graph(),
    })
}

/// GET /file/{fileId}
pub async fn file_route(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<(StatusCode, HeaderMap, Vec<u8>)> {
    let sealed = state.vault.fetch_ciphertext(&file_id)?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok((StatusCode::OK, headers, sealed))
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        blobs: state.vault.store().len(),
    })
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.vault.settings().max_upload_bytes + MULTIPART_SLACK_BYTES;

    // The browser client is served from a different origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/encode", post(encode_route))
        .route("/decode", post(decode_route))
        .route("/graph", get(graph_route))
        .route("/file/{file_id}", get(file_route))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
