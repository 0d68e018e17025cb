mod drbg;
pub(crate) use drbg::HmacDrbg;

use crate::{AEAD_KEY_LENGTH, AeadKey, Error};
use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::sync::Arc;
use zeroize::Zeroize;

const NONCE_SIZE: usize = 12; // AES-GCM-SIV uses 12-byte (96-bit) nonces
const TAG_SIZE: usize = 16;

/// Suite version used for channels created by this build.
pub const CURRENT_SUITE_VERSION: u32 = 0;

/// A deterministic byte stream seeded from ratchet state.
pub trait Prng {
    /// Fills `out` with the next bytes of the stream.
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Error>;
}

impl Prng for HmacDrbg {
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Error> {
        HmacDrbg::fill(self, out)
    }
}

/// The PRNG, KDF and AEAD primitives pinned by one protocol version.
pub trait CryptoSuite: Send + Sync {
    /// Version tag this suite is registered under.
    fn version(&self) -> u32;

    /// Seeds a fresh PRNG stream.
    fn prng(&self, seed: &[u8]) -> Result<Box<dyn Prng>, Error>;

    /// Derives a one-time AEAD key from PRNG output.
    fn derive_aead_key(&self, material: &[u8]) -> Result<AeadKey, Error>;

    /// Encrypts `plaintext`. The output carries everything needed to decrypt.
    fn encrypt(&self, key: &AeadKey, plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    /// Decrypts and authenticates a ciphertext produced by [`CryptoSuite::encrypt`].
    fn decrypt(&self, key: &AeadKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Resolves the suite pinned by a channel.
pub trait CryptoSuiteProvider: Send + Sync {
    /// Returns the suite registered under `version`.
    fn suite(&self, version: u32) -> Result<Arc<dyn CryptoSuite>, Error>;
}

/// Version 0: HMAC-DRBG-SHA256, HKDF-SHA256 and AES-256-GCM-SIV.
#[derive(Clone, Copy, Debug, Default)]
pub struct SuiteV0;

impl CryptoSuite for SuiteV0 {
    fn version(&self) -> u32 {
        0
    }

    fn prng(&self, seed: &[u8]) -> Result<Box<dyn Prng>, Error> {
        Ok(Box::new(HmacDrbg::new(seed)?))
    }

    fn derive_aead_key(&self, material: &[u8]) -> Result<AeadKey, Error> {
        let hkdf = Hkdf::<Sha256>::new(None, material);

        let mut key = [0u8; AEAD_KEY_LENGTH];
        hkdf.expand(b"ChannelRatchet-V0-AeadKey", &mut key)?;

        let aead_key = AeadKey::from(key);
        key.zeroize();
        Ok(aead_key)
    }

    fn encrypt(&self, key: &AeadKey, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| Error::Random)?;

        let aes_key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key.as_bytes());
        let cipher = Aes256GcmSiv::new(aes_key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::Crypto("Key wrapping failed".to_string()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.append(&mut ciphertext);

        Ok(result)
    }

    fn decrypt(&self, key: &AeadKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Crypto("Ciphertext too short".to_string()));
        }

        let aes_key = aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(key.as_bytes());
        let cipher = Aes256GcmSiv::new(aes_key);
        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);

        Ok(cipher.decrypt(nonce, &ciphertext[NONCE_SIZE..])?)
    }
}

/// Provider knowing every suite shipped with this crate.
#[derive(Clone, Debug, Default)]
pub struct DefaultSuiteProvider;

impl CryptoSuiteProvider for DefaultSuiteProvider {
    fn suite(&self, version: u32) -> Result<Arc<dyn CryptoSuite>, Error> {
        match version {
            0 => Ok(Arc::new(SuiteV0)),
            other => Err(Error::Crypto(format!("Unsupported suite version: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_unwrap_with_same_key() {
        let suite = SuiteV0;
        let key = suite.derive_aead_key(&[3u8; 32]).unwrap();

        let ciphertext = suite.encrypt(&key, b"message key").unwrap();
        assert_eq!(ciphertext.len(), NONCE_SIZE + b"message key".len() + TAG_SIZE);

        let plaintext = suite.decrypt(&key, &ciphertext).unwrap();
        assert_eq!(plaintext, b"message key");
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let suite = SuiteV0;
        let key = suite.derive_aead_key(&[3u8; 32]).unwrap();
        let other = suite.derive_aead_key(&[4u8; 32]).unwrap();

        let ciphertext = suite.encrypt(&key, b"message key").unwrap();
        assert!(suite.decrypt(&other, &ciphertext).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_is_rejected() {
        let suite = SuiteV0;
        let key = suite.derive_aead_key(&[3u8; 32]).unwrap();

        assert!(suite.decrypt(&key, &[0u8; NONCE_SIZE + TAG_SIZE - 1]).is_err());
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        assert!(DefaultSuiteProvider.suite(0).is_ok());
        assert!(matches!(
            DefaultSuiteProvider.suite(7),
            Err(Error::Crypto(_))
        ));
    }
}
