use crate::Error;
use rand::TryRngCore;
use rand::rngs::OsRng;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of every ratchet seed.
pub const SEED_LENGTH: usize = 32;

/// Length in bytes of a one-time AEAD key.
pub const AEAD_KEY_LENGTH: usize = 32;

/// Secret state of a ratchet chain.
///
/// Used both for the raw seed shared by two devices after channel
/// establishment and for the diversified send/receive seeds derived from it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Seed(Box<[u8; SEED_LENGTH]>);

impl Seed {
    /// Generates a fresh seed from the operating system RNG.
    pub fn random() -> Result<Self, Error> {
        let mut seed = Box::new([0u8; SEED_LENGTH]);
        OsRng
            .try_fill_bytes(seed.as_mut_slice())
            .map_err(|_| Error::Random)?;
        Ok(Self(seed))
    }

    /// Returns the raw seed bytes.
    pub fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }
}

impl From<[u8; SEED_LENGTH]> for Seed {
    fn from(bytes: [u8; SEED_LENGTH]) -> Self {
        Self(Box::new(bytes))
    }
}

impl TryFrom<&[u8]> for Seed {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SEED_LENGTH {
            return Err(Error::Serde("Invalid seed length".to_string()));
        }
        let mut seed = Box::new([0u8; SEED_LENGTH]);
        seed.copy_from_slice(bytes);
        Ok(Self(seed))
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// One-time symmetric key wrapping a single message key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey(Box<[u8; AEAD_KEY_LENGTH]>);

impl AeadKey {
    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; AEAD_KEY_LENGTH] {
        &self.0
    }
}

impl From<[u8; AEAD_KEY_LENGTH]> for AeadKey {
    fn from(bytes: [u8; AEAD_KEY_LENGTH]) -> Self {
        Self(Box::new(bytes))
    }
}

impl TryFrom<&[u8]> for AeadKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != AEAD_KEY_LENGTH {
            return Err(Error::Serde("Invalid AEAD key length".to_string()));
        }
        let mut key = Box::new([0u8; AEAD_KEY_LENGTH]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }
}

impl fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AeadKey(..)")
    }
}
