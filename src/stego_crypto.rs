// File-layer encryption: AES-256-GCM with a per-file key and a detached 128-bit tag.
// Associated data binds the ciphertext to its file id and content type.

use aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};

use crate::error::{Result, ServiceError};
use crate::keys::KeyMaterial;

pub const TAG_LEN: usize = 16;
const AAD_DOMAIN: &[u8] = b"stegvault-v1";

fn aad_field_len(field: &str, what: &str) -> Result<u8> {
    u8::try_from(field.len())
        .map_err(|_| ServiceError::InvalidRequest(format!("{} longer than 255 bytes", what)))
}

/// Associated data for a stored file:
/// domain || u8 len || file id || u8 len || content type.
pub fn associated_data(file_id: &str, content_type: Option<&str>) -> Result<Vec<u8>> {
    let content_type = content_type.unwrap_or("");
    let id_len = aad_field_len(file_id, "file id")?;
    let type_len = aad_field_len(content_type, "content type")?;

    let mut aad = Vec::with_capacity(AAD_DOMAIN.len() + 2 + file_id.len() + content_type.len());
    aad.extend_from_slice(AAD_DOMAIN);
    aad.push(id_len);
    aad.extend_from_slice(file_id.as_bytes());
    aad.push(type_len);
    aad.extend_from_slice(content_type.as_bytes());
    Ok(aad)
}

fn cipher_for(material: &KeyMaterial) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(material.key()).map_err(|e| ServiceError::Internal(e.to_string()))
}

/// Encrypt `plaintext` in place. Returns (ciphertext, tag).
pub fn encrypt(
    plaintext: Vec<u8>,
    material: &KeyMaterial,
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let cipher = cipher_for(material)?;
    let nonce = Nonce::from_slice(material.nonce());
    let mut buffer = plaintext;
    let tag = cipher
        .encrypt_in_place_detached(nonce, aad, &mut buffer)
        .map_err(|_| ServiceError::Internal("AES-256-GCM encryption failed".to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Decrypt and authenticate. The tag is verified (constant time) before the
/// keystream is applied, so a failed check never yields plaintext bytes.
pub fn decrypt(
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
    material: &KeyMaterial,
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = cipher_for(material)?;
    let nonce = Nonce::from_slice(material.nonce());
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce, aad, &mut buffer, Tag::from_slice(tag))
        .map_err(|_| ServiceError::AuthenticationFailed)?;
    Ok(buffer)
}

/// Wire form served by `/file/{id}`: ciphertext followed by the tag.
pub fn join_sealed(ciphertext: &[u8], tag: &[u8; TAG_LEN]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(tag);
    out
}

/// Inverse of [`join_sealed`].
pub fn split_sealed(sealed: &[u8]) -> Result<(&[u8], [u8; TAG_LEN])> {
    if sealed.len() < TAG_LEN {
        return Err(ServiceError::InvalidRequest(
            "sealed data shorter than the authentication tag".to_string(),
        ));
    }
    let (ciphertext, tag_slice) = sealed.split_at(sealed.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(tag_slice);
    Ok((ciphertext, tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    #[test]
    fn test_roundtrip_with_aad() {
        let material = keys::generate().unwrap();
        let aad = associated_data("00112233445566778899aabbccddeeff", Some("text/plain")).unwrap();
        let (ciphertext, tag) = encrypt(b"hello stegvault".to_vec(), &material, &aad).unwrap();
        assert_eq!(ciphertext.len(), 15);

        let plaintext = decrypt(&ciphertext, &tag, &material, &aad).unwrap();
        assert_eq!(plaintext, b"hello stegvault");
    }

    #[test]
    fn test_every_bit_flip_is_rejected() {
        let material = keys::generate().unwrap();
        let aad = associated_data("abc", None).unwrap();
        let (ciphertext, tag) = encrypt(b"tamper".to_vec(), &material, &aad).unwrap();

        for bit in 0..ciphertext.len() * 8 {
            let mut bad = ciphertext.clone();
            bad[bit / 8] ^= 1 << (bit % 8);
            let result = decrypt(&bad, &tag, &material, &aad);
            assert!(matches!(result, Err(ServiceError::AuthenticationFailed)));
        }
        for bit in 0..TAG_LEN * 8 {
            let mut bad_tag = tag;
            bad_tag[bit / 8] ^= 1 << (bit % 8);
            let result = decrypt(&ciphertext, &bad_tag, &material, &aad);
            assert!(matches!(result, Err(ServiceError::AuthenticationFailed)));
        }
    }

    #[test]
    fn test_content_type_is_bound() {
        let material = keys::generate().unwrap();
        let good = associated_data("abc", Some("image/png")).unwrap();
        let relabelled = associated_data("abc", Some("text/html")).unwrap();
        let (ciphertext, tag) = encrypt(b"pixels".to_vec(), &material, &good).unwrap();
        assert!(matches!(
            decrypt(&ciphertext, &tag, &material, &relabelled),
            Err(ServiceError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_aad_layout_and_length_bound() {
        let aad = associated_data("ab", Some("x/y")).unwrap();
        assert_eq!(aad, b"stegvault-v1\x02ab\x03x/y".to_vec());
        assert_eq!(associated_data("ab", None).unwrap(), b"stegvault-v1\x02ab\x00".to_vec());

        let longest = "t".repeat(255);
        assert!(associated_data("ab", Some(&longest)).is_ok());
        let too_long = "t".repeat(256);
        assert!(matches!(
            associated_data("ab", Some(&too_long)),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let material = keys::generate().unwrap();
        let other = keys::generate().unwrap();
        let (ciphertext, tag) = encrypt(b"secret".to_vec(), &material, b"").unwrap();
        assert!(decrypt(&ciphertext, &tag, &other, b"").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let material = keys::generate().unwrap();
        let (ciphertext, tag) = encrypt(Vec::new(), &material, b"").unwrap();
        assert!(ciphertext.is_empty());
        assert!(decrypt(&ciphertext, &tag, &material, b"").unwrap().is_empty());
    }

    #[test]
    fn test_sealed_split_join() {
        let sealed = join_sealed(b"abc", &[7u8; TAG_LEN]);
        assert_eq!(sealed.len(), 3 + TAG_LEN);
        let (ciphertext, tag) = split_sealed(&sealed).unwrap();
        assert_eq!(ciphertext, b"abc");
        assert_eq!(tag, [7u8; TAG_LEN]);
        assert!(split_sealed(&[0u8; 4]).is_err());
    }
}
