use aes_gcm::{aead::Aead, aead::KeyInit, Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::OsRng;
use rand_core::RngCore;

const NONCE_LEN: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum EncryptionError {
    #[error("encryption key must be 32 bytes")]
    InvalidKeyLength,
    #[error("failed to encrypt secret")]
    Encrypt,
    #[error("failed to decrypt secret")]
    Decrypt,
    #[error("invalid ciphertext encoding")]
    InvalidEncoding,
}

pub fn decode_key(key_b64: &str) -> Result<Vec<u8>, EncryptionError> {
    let decoded = STANDARD
        .decode(key_b64)
        .map_err(|_| EncryptionError::InvalidEncoding)?;
    if decoded.len() != 32 {
        return Err(EncryptionError::InvalidKeyLength);
    }
    Ok(decoded)
}

/// Encrypts a secret value for at-rest storage. Nonce and ciphertext are
/// returned separately because they are persisted as separate columns.
pub fn encrypt_secret(key: &[u8], plaintext: &str) -> Result<(String, String), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| EncryptionError::Encrypt)?;

    Ok((STANDARD.encode(nonce_bytes), STANDARD.encode(ciphertext)))
}

pub fn decrypt_secret(
    key: &[u8],
    nonce_b64: &str,
    ciphertext_b64: &str,
) -> Result<String, EncryptionError> {
    let nonce_bytes = STANDARD
        .decode(nonce_b64)
        .map_err(|_| EncryptionError::InvalidEncoding)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(EncryptionError::InvalidEncoding);
    }
    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|_| EncryptionError::InvalidEncoding)?;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| EncryptionError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| EncryptionError::Decrypt)
}
