//! Carrier images for key embedding.
//!
//! A carrier is any photo large enough to hold a key envelope. Remote stock
//! photo sources are tried first; a locally generated noise image can serve
//! as the last resort. Every fetched image is decoded, optionally
//! downscaled, and checked for capacity before the codec sees it.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::RgbaImage;
use rand::{Rng, RngCore};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CarrierConfig;
use crate::error::{Result, ServiceError};
use crate::stego;

/// A place carrier image bytes come from.
#[async_trait]
pub trait CarrierSource: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Fetch encoded image bytes (PNG, JPEG, ...).
    async fn fetch(&self) -> Result<Vec<u8>>;
}

fn unavailable(source: &str, err: impl std::fmt::Display) -> ServiceError {
    ServiceError::CarrierUnavailable(format!("{}: {}", source, err))
}

/// Largest carrier download accepted from a remote source.
pub const MAX_CARRIER_BYTES: usize = 16 * 1024 * 1024;

/// Remote carriers may be this many times `max_dimension` on a side before
/// downscaling; anything larger is refused at the header.
const SOURCE_OVERSIZE_FACTOR: u32 = 8;

async fn download(client: &Client, source: &str, url: &str) -> Result<Vec<u8>> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| unavailable(source, e))?
        .error_for_status()
        .map_err(|e| unavailable(source, e))?;

    if response
        .content_length()
        .is_some_and(|len| len > MAX_CARRIER_BYTES as u64)
    {
        return Err(unavailable(source, "image larger than the download cap"));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| unavailable(source, e))? {
        if body.len() + chunk.len() > MAX_CARRIER_BYTES {
            return Err(unavailable(source, "image larger than the download cap"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Random photo from a URL template such as `https://picsum.photos/{width}/{height}`.
pub struct PicsumSource {
    client: Client,
    url: String,
}

impl PicsumSource {
    pub fn new(client: Client, template: &str, width: u32, height: u32) -> Self {
        let url = template
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string());
        Self { client, url }
    }
}

#[async_trait]
impl CarrierSource for PicsumSource {
    fn name(&self) -> &str {
        "picsum"
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        download(&self.client, self.name(), &self.url).await
    }
}

const PEXELS_CURATED_URL: &str = "https://api.pexels.com/v1/curated";

/// Pexels curates roughly this many pages at one photo per page.
const PEXELS_MAX_PAGE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct PexelsPage {
    photos: Vec<PexelsPhoto>,
}

#[derive(Debug, Deserialize)]
struct PexelsPhoto {
    src: PexelsSrc,
}

#[derive(Debug, Deserialize)]
struct PexelsSrc {
    large: String,
}

/// Random curated photo from the Pexels API.
pub struct PexelsSource {
    client: Client,
    api_key: String,
}

impl PexelsSource {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl CarrierSource for PexelsSource {
    fn name(&self) -> &str {
        "pexels"
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        let page = rand::thread_rng().gen_range(1..=PEXELS_MAX_PAGE).to_string();
        let listing: PexelsPage = self
            .client
            .get(PEXELS_CURATED_URL)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .query(&[("per_page", "1"), ("page", page.as_str())])
            .send()
            .await
            .map_err(|e| unavailable(self.name(), e))?
            .error_for_status()
            .map_err(|e| unavailable(self.name(), e))?
            .json()
            .await
            .map_err(|e| unavailable(self.name(), e))?;

        let photo = listing
            .photos
            .into_iter()
            .next()
            .ok_or_else(|| unavailable(self.name(), "empty curated page"))?;
        download(&self.client, self.name(), &photo.src.large).await
    }
}

/// Locally generated carrier of soft coloured noise.
pub struct NoiseSource {
    width: u32,
    height: u32,
}

impl NoiseSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn generate(&self) -> RgbaImage {
        let mut rng = rand::thread_rng();
        let mut base = [0u8; 3];
        rng.fill_bytes(&mut base);
        let (w, h) = (self.width.max(1), self.height.max(1));
        RgbaImage::from_fn(w, h, |x, y| {
            let fx = (x * 255 / w) as u8;
            let fy = (y * 255 / h) as u8;
            let jitter: u8 = rng.gen_range(0..48);
            image::Rgba([
                base[0].wrapping_add(fx / 2).wrapping_add(jitter),
                base[1].wrapping_add(fy / 2).wrapping_add(jitter),
                base[2].wrapping_add((fx / 4).wrapping_add(fy / 4)).wrapping_add(jitter),
                255,
            ])
        })
    }
}

#[async_trait]
impl CarrierSource for NoiseSource {
    fn name(&self) -> &str {
        "noise"
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        stego::encode_png(&self.generate())
    }
}

/// Decode fetched bytes, bound their size and convert to RGBA.
fn prepare(bytes: &[u8], max_dimension: u32) -> std::result::Result<RgbaImage, String> {
    let decode_limit = max_dimension.saturating_mul(SOURCE_OVERSIZE_FACTOR);
    let img = stego::decode_carrier(bytes, decode_limit)
        .map_err(|e| format!("undecodable image: {}", e))?;
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Triangle)
    } else {
        img
    };
    Ok(img.to_rgba8())
}

/// Rotates through its sources with a per-attempt timeout.
pub struct CarrierProvider {
    sources: Vec<Arc<dyn CarrierSource>>,
    attempts: u32,
    timeout: Duration,
    max_dimension: u32,
}

impl CarrierProvider {
    pub fn new(
        sources: Vec<Arc<dyn CarrierSource>>,
        attempts: u32,
        timeout: Duration,
        max_dimension: u32,
    ) -> Self {
        Self {
            sources,
            attempts: attempts.max(1),
            timeout,
            max_dimension,
        }
    }

    /// Build the configured source list: Pexels (if keyed), the URL template
    /// source (if set), then local noise (if enabled).
    pub fn from_config(config: &CarrierConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stegvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Internal(format!("HTTP client: {}", e)))?;

        let mut sources: Vec<Arc<dyn CarrierSource>> = Vec::new();
        if !config.pexels_api_key.is_empty() {
            sources.push(Arc::new(PexelsSource::new(
                client.clone(),
                config.pexels_api_key.clone(),
            )));
        }
        if !config.picsum_url_template.is_empty() {
            sources.push(Arc::new(PicsumSource::new(
                client,
                &config.picsum_url_template,
                config.width,
                config.height,
            )));
        }
        if config.local_fallback {
            sources.push(Arc::new(NoiseSource::new(config.width, config.height)));
        }

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        tracing::info!(sources = ?names, attempts = config.attempts, "carrier sources configured");

        Ok(Self::new(sources, config.attempts, timeout, config.max_dimension))
    }

    /// Fetch a carrier that can hold at least `min_payload` bytes.
    ///
    /// Fails with `CarrierTooSmall` if the last attempt produced an image
    /// that was too small, `CarrierUnavailable` otherwise.
    pub async fn fetch_carrier(&self, min_payload: usize) -> Result<RgbaImage> {
        if self.sources.is_empty() {
            return Err(ServiceError::CarrierUnavailable(
                "no carrier sources configured".to_string(),
            ));
        }

        let needed_bits = (min_payload + stego::FRAME_OVERHEAD) * 8;
        let mut last_error = ServiceError::CarrierUnavailable("no attempt made".to_string());

        for attempt in 0..self.attempts {
            let source = &self.sources[attempt as usize % self.sources.len()];
            let fetched = tokio::time::timeout(self.timeout, source.fetch()).await;

            let bytes = match fetched {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    tracing::warn!(source = source.name(), attempt, "carrier fetch failed: {}", e);
                    last_error = e;
                    continue;
                }
                Err(_) => {
                    tracing::warn!(source = source.name(), attempt, "carrier fetch timed out");
                    last_error = unavailable(source.name(), "timed out");
                    continue;
                }
            };

            let max_dimension = self.max_dimension;
            let prepared = tokio::task::spawn_blocking(move || prepare(&bytes, max_dimension))
                .await
                .map_err(|e| ServiceError::Internal(format!("task join error: {}", e)))?;

            match prepared {
                Ok(img) => {
                    let available = stego::capacity_bits(img.width(), img.height());
                    if stego::capacity_bytes(img.width(), img.height()) >= min_payload {
                        tracing::debug!(
                            source = source.name(),
                            width = img.width(),
                            height = img.height(),
                            "carrier accepted"
                        );
                        return Ok(img);
                    }
                    tracing::warn!(
                        source = source.name(),
                        width = img.width(),
                        height = img.height(),
                        "carrier too small"
                    );
                    last_error = ServiceError::CarrierTooSmall {
                        needed: needed_bits,
                        available,
                    };
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), attempt, "carrier rejected: {}", e);
                    last_error = unavailable(source.name(), e);
                }
            }
        }

        Err(last_error)
    }
}
