use log::{debug, error, warn};
use thiserror::Error;
use crate::telegram::Telegram;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CipherError {
    #[error("Invalid key or iv length")]
    InvalidLength,
    #[error("No AES-CTR support compiled in")]
    Unavailable,
}

/// The AES-CTR primitive the gate hands encrypted payloads to
pub trait CtrDecryptor: Send + Sync {
    fn decrypt_ctr(&self, ciphertext: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, CipherError>;
}

#[cfg(feature = "aes-ctr")]
pub struct Aes128CtrDecryptor;

#[cfg(feature = "aes-ctr")]
impl CtrDecryptor for Aes128CtrDecryptor {
    fn decrypt_ctr(&self, ciphertext: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, CipherError> {
        use ctr::cipher::{KeyIvInit, StreamCipher};
        type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

        let mut cipher = Aes128Ctr::new_from_slices(key, iv).map_err(|_| CipherError::InvalidLength)?;
        let mut plain = ciphertext.to_vec();
        cipher.apply_keystream(&mut plain);
        return Ok(plain);
    }
}

#[cfg(not(feature = "aes-ctr"))]
struct NoCipher;

#[cfg(not(feature = "aes-ctr"))]
impl CtrDecryptor for NoCipher {
    fn decrypt_ctr(&self, _ciphertext: &[u8], _key: &[u8], _iv: &[u8; 16]) -> Result<Vec<u8>, CipherError> {
        Err(CipherError::Unavailable)
    }
}

/// Bytes ready for decoding and whether they were taken as plaintext without a key
#[derive(Debug, Clone, PartialEq)]
pub struct Plaintext {
    pub bytes: Vec<u8>,
    pub key_missing: bool,
}

/// Decides whether a telegram needs decrypting and does it
pub struct DecryptionGate {
    decryptor: Box<dyn CtrDecryptor>,
}

impl DecryptionGate {
    pub fn new(decryptor: Box<dyn CtrDecryptor>) -> Self {
        DecryptionGate { decryptor }
    }

    pub fn apply(&self, telegram: &Telegram, key: Option<&[u8]>) -> Result<Plaintext, CipherError> {
        if !telegram.is_encrypted() {
            return Ok(Plaintext { bytes: telegram.payload.clone(), key_missing: false });
        }

        let key = match key {
            Some(k) => k,
            None => {
                /* Best effort, the frame type check downstream will most likely reject it */
                let key_missing = !telegram.is_simulated();
                if key_missing {
                    warn!("Telegram from {} is encrypted but no key supplied!", telegram.id);
                }
                return Ok(Plaintext { bytes: telegram.payload.clone(), key_missing });
            }
        };

        match self.decryptor.decrypt_ctr(&telegram.payload, key, &telegram.iv) {
            Ok(bytes) => {
                debug!("Decrypted {} bytes from {}", bytes.len(), telegram.id);
                Ok(Plaintext { bytes, key_missing: false })
            }
            Err(e) => {
                error!("Decryption of telegram from {} failed: {e}", telegram.id);
                Err(e)
            }
        }
    }
}

impl Default for DecryptionGate {
    #[cfg(feature = "aes-ctr")]
    fn default() -> Self {
        DecryptionGate::new(Box::new(Aes128CtrDecryptor))
    }

    #[cfg(not(feature = "aes-ctr"))]
    fn default() -> Self {
        DecryptionGate::new(Box::new(NoCipher))
    }
}
