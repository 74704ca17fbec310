//! AES-256-GCM primitive used for per-segment chunk encryption.
//!
//! An encrypted chunk is laid out as `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! The segment's data key and AAD come from its manifest. Key wrapping is
//! handled elsewhere; this module only sees raw data keys.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::{ChunkError, Result};
use crate::manifest::SegmentEncryptionMetadata;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const AAD_SIZE: usize = 32;

/// Fresh key material for a new segment.
#[derive(Clone)]
pub struct DataKeyAndAad {
    pub data_key: [u8; KEY_SIZE],
    pub aad: [u8; AAD_SIZE],
}

impl From<&DataKeyAndAad> for SegmentEncryptionMetadata {
    fn from(k: &DataKeyAndAad) -> Self {
        SegmentEncryptionMetadata::new(k.data_key.to_vec(), k.aad.to_vec())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AesEncryptionProvider;

impl AesEncryptionProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn create_data_key_and_aad(&self) -> DataKeyAndAad {
        DataKeyAndAad {
            data_key: rand::random(),
            aad: rand::random(),
        }
    }

    /// Encrypt one chunk with a random nonce, prefixing the nonce to the output.
    pub fn encrypt(&self, data_key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = cipher(data_key)?;
        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| ChunkError::Decode("aes-gcm encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Reverse of [`encrypt`](Self::encrypt). Wrong key, wrong AAD, a
    /// truncated input or a tampered tag all yield `ChunkError::Decode`.
    pub fn decrypt(&self, encryption: &SegmentEncryptionMetadata, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ChunkError::Decode(format!(
                "encrypted chunk too short: {} bytes",
                data.len()
            )));
        }
        let cipher = cipher(encryption.data_key())?;
        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: encryption.aad(),
                },
            )
            .map_err(|_| ChunkError::Decode("aes-gcm authentication failed".to_string()))
    }
}

fn cipher(data_key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(data_key).map_err(|_| {
        ChunkError::Decode(format!(
            "data key must be {KEY_SIZE} bytes, got {}",
            data_key.len()
        ))
    })
}
