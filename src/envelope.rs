//! Binary record carried inside a key image.
//!
//! ```text
//! [1 byte ]  version (1)
//! [32 bytes] AES-256 key
//! [12 bytes] GCM nonce
//! [1 byte ]  file id length, then file id (ASCII)
//! [1 byte ]  content type length, then content type (0 = none)
//! [2 bytes]  original name length (BE), then name (UTF-8, 0 = none)
//! ```

use zeroize::Zeroizing;

use crate::error::{Result, ServiceError};
use crate::keys::{KeyMaterial, KEY_LEN, NONCE_LEN};
use crate::store::FileId;

pub const ENVELOPE_VERSION: u8 = 1;

/// Longest content type the envelope can carry.
pub const MAX_CONTENT_TYPE_LEN: usize = u8::MAX as usize;

/// Longest original file name the envelope can carry.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug)]
pub struct KeyEnvelope {
    pub material: KeyMaterial,
    pub file_id: FileId,
    pub content_type: Option<String>,
    pub original_name: Option<String>,
}

fn corrupt(msg: &str) -> ServiceError {
    ServiceError::CorruptPayload(msg.to_string())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| corrupt("envelope truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_string(&mut self, len: usize) -> Result<Option<String>> {
        if len == 0 {
            return Ok(None);
        }
        let raw = self.take(len)?;
        let text = std::str::from_utf8(raw).map_err(|_| corrupt("envelope text is not UTF-8"))?;
        Ok(Some(text.to_string()))
    }
}

impl KeyEnvelope {
    pub fn encoded_len(&self) -> usize {
        1 + KEY_LEN
            + NONCE_LEN
            + 1
            + self.file_id.as_str().len()
            + 1
            + self.content_type.as_deref().map_or(0, str::len)
            + 2
            + self.original_name.as_deref().map_or(0, str::len)
    }

    /// Serialize. The buffer holds the key, so it is wiped on drop.
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let content_type = self.content_type.as_deref().unwrap_or("");
        let name = self.original_name.as_deref().unwrap_or("");
        if content_type.len() > MAX_CONTENT_TYPE_LEN {
            return Err(ServiceError::InvalidRequest("content type too long".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ServiceError::InvalidRequest("file name too long".to_string()));
        }

        let id = self.file_id.as_str();
        let mut out = Zeroizing::new(Vec::with_capacity(self.encoded_len()));
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(self.material.key());
        out.extend_from_slice(self.material.nonce());
        out.push(id.len() as u8);
        out.extend_from_slice(id.as_bytes());
        out.push(content_type.len() as u8);
        out.extend_from_slice(content_type.as_bytes());
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor { bytes, pos: 0 };

        let version = cur.take(1)?[0];
        if version != ENVELOPE_VERSION {
            return Err(ServiceError::CorruptPayload(format!(
                "unsupported envelope version {}",
                version
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(cur.take(KEY_LEN)?);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(cur.take(NONCE_LEN)?);
        let material = KeyMaterial::from_parts(*key, nonce);

        let id_len = cur.take(1)?[0] as usize;
        let id_text = cur
            .take_string(id_len)?
            .ok_or_else(|| corrupt("envelope has no file id"))?;
        let file_id = FileId::parse(&id_text).ok_or_else(|| corrupt("envelope file id malformed"))?;

        let ct_len = cur.take(1)?[0] as usize;
        let content_type = cur.take_string(ct_len)?;

        let name_len_bytes = cur.take(2)?;
        let name_len = u16::from_be_bytes([name_len_bytes[0], name_len_bytes[1]]) as usize;
        let original_name = cur.take_string(name_len)?;

        if cur.pos != bytes.len() {
            return Err(corrupt("trailing bytes after envelope"));
        }

        Ok(Self {
            material,
            file_id,
            content_type,
            original_name,
        })
    }
}
