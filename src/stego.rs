// LSB steganography for PNG: frame = 4-byte length (big-endian) + data + 4-byte checksum.
// One bit per R, G, B byte in raster order; alpha is left untouched.
// Sequential LSB embedding is detectable by statistical steganalysis. It keeps
// the key out of sight, not out of reach of someone looking for it.

use image::codecs::png::PngEncoder;
use image::metadata::Orientation;
use image::error::{LimitError, LimitErrorKind};
use image::{ExtendedColorType, ImageDecoder, ImageEncoder, ImageError, ImageReader, Limits, RgbaImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use zeroize::Zeroizing;

use crate::error::{Result, ServiceError};

const LENGTH_BYTES: usize = 4;
const CHECKSUM_BYTES: usize = 4;
const CHANNELS_USED: usize = 3;

/// Bytes the frame adds around a payload.
pub const FRAME_OVERHEAD: usize = LENGTH_BYTES + CHECKSUM_BYTES;

pub fn capacity_bits(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS_USED
}

/// Largest payload that fits in a `width` x `height` carrier.
pub fn capacity_bytes(width: u32, height: u32) -> usize {
    (capacity_bits(width, height) / 8).saturating_sub(FRAME_OVERHEAD)
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_BYTES] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; CHECKSUM_BYTES];
    out.copy_from_slice(&digest[..CHECKSUM_BYTES]);
    out
}

fn frame(payload: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let len = u32::try_from(payload.len()).map_err(|_| ServiceError::CarrierTooSmall {
        needed: payload.len().saturating_mul(8),
        available: u32::MAX as usize,
    })?;
    let mut framed = Zeroizing::new(Vec::with_capacity(FRAME_OVERHEAD + payload.len()));
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    framed.extend_from_slice(&checksum(payload));
    Ok(framed)
}

/// Open a decoder that refuses images wider or taller than `max_side`.
/// Only the header is read here, so oversized images fail before any pixel
/// buffer is allocated.
fn bounded_decoder(
    bytes: &[u8],
    max_side: u32,
) -> std::result::Result<impl ImageDecoder + '_, ImageError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let mut limits = Limits::default();
    limits.max_image_width = Some(max_side);
    limits.max_image_height = Some(max_side);
    reader.limits(limits);

    let decoder = reader.into_decoder()?;
    let (width, height) = decoder.dimensions();
    if width > max_side || height > max_side {
        return Err(ImageError::Limits(LimitError::from_kind(
            LimitErrorKind::DimensionError,
        )));
    }
    Ok(decoder)
}

/// Decode any supported image format no larger than `max_side` on either
/// side and apply its EXIF orientation so the carrier comes out upright.
pub fn decode_carrier(
    bytes: &[u8],
    max_side: u32,
) -> std::result::Result<image::DynamicImage, ImageError> {
    let mut decoder = bounded_decoder(bytes, max_side)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = image::DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Decode a key image as stored. No orientation is applied: the bits were
/// written in raw raster order.
fn decode_raw(bytes: &[u8], max_side: u32) -> std::result::Result<RgbaImage, ImageError> {
    let decoder = bounded_decoder(bytes, max_side)?;
    Ok(image::DynamicImage::from_decoder(decoder)?.to_rgba8())
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    let encoder = PngEncoder::new(&mut out);
    encoder
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .map_err(|e: image::ImageError| ServiceError::Internal(format!("PNG encoding failed: {}", e)))?;
    Ok(out.into_inner())
}

/// Write the framed payload into a copy of `carrier`. Returns the pixel
/// buffer, ready for PNG encoding.
pub fn embed_pixels(carrier: &RgbaImage, payload: &[u8]) -> Result<RgbaImage> {
    let framed = frame(payload)?;
    let bits_needed = framed.len() * 8;
    let available = capacity_bits(carrier.width(), carrier.height());
    if bits_needed > available {
        return Err(ServiceError::CarrierTooSmall {
            needed: bits_needed,
            available,
        });
    }

    let mut img = carrier.clone();
    let mut bit_idx = 0usize;
    for pixel in img.pixels_mut() {
        if bit_idx >= bits_needed {
            break;
        }
        for ch in 0..CHANNELS_USED {
            if bit_idx >= bits_needed {
                break;
            }
            let byte_idx = bit_idx / 8;
            let bit_in_byte = 7 - (bit_idx % 8);
            let bit = (framed[byte_idx] >> bit_in_byte) & 1;
            pixel[ch] = (pixel[ch] & 0xFE) | bit;
            bit_idx += 1;
        }
    }
    Ok(img)
}

/// Embed `payload` into `carrier` and return PNG bytes.
pub fn embed(carrier: &RgbaImage, payload: &[u8]) -> Result<Vec<u8>> {
    let img = embed_pixels(carrier, payload)?;
    encode_png(&img)
}

fn lsb_bits(img: &RgbaImage) -> impl Iterator<Item = u8> + '_ {
    img.pixels().flat_map(|p| {
        let [r, g, b, _] = p.0;
        [r & 1, g & 1, b & 1]
    })
}

fn read_bytes(bits: &mut impl Iterator<Item = u8>, count: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | bits.next()?;
        }
        out.push(byte);
    }
    Some(out)
}

/// Read a framed payload back out of decoded pixels.
pub fn extract_pixels(img: &RgbaImage) -> Result<Zeroizing<Vec<u8>>> {
    let available = capacity_bits(img.width(), img.height());
    if available < FRAME_OVERHEAD * 8 {
        return Err(ServiceError::CorruptPayload("image too small to hold a key".to_string()));
    }

    let mut bits = lsb_bits(img);
    let header = read_bytes(&mut bits, LENGTH_BYTES)
        .ok_or_else(|| ServiceError::CorruptPayload("missing length header".to_string()))?;
    let payload_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;

    let needed_bits = payload_len
        .checked_add(FRAME_OVERHEAD)
        .and_then(|n| n.checked_mul(8));
    match needed_bits {
        Some(n) if n <= available => {}
        _ => {
            return Err(ServiceError::CorruptPayload(format!(
                "declared length {} exceeds image capacity",
                payload_len
            )))
        }
    }

    let payload = Zeroizing::new(
        read_bytes(&mut bits, payload_len)
            .ok_or_else(|| ServiceError::CorruptPayload("truncated payload".to_string()))?,
    );
    let stored = read_bytes(&mut bits, CHECKSUM_BYTES)
        .ok_or_else(|| ServiceError::CorruptPayload("missing checksum".to_string()))?;
    if stored[..] != checksum(&payload)[..] {
        return Err(ServiceError::CorruptPayload("checksum mismatch".to_string()));
    }
    Ok(payload)
}

/// Decode image bytes and extract the embedded payload. Images larger than
/// `max_side` on either side are rejected unread.
pub fn extract(image_bytes: &[u8], max_side: u32) -> Result<Zeroizing<Vec<u8>>> {
    let img = decode_raw(image_bytes, max_side).map_err(|e| match e {
        ImageError::Limits(_) => ServiceError::CorruptPayload(format!(
            "key image exceeds {}x{} pixels",
            max_side, max_side
        )),
        other => ServiceError::CorruptPayload(format!("not a readable image: {}", other)),
    })?;
    extract_pixels(&img)
}
