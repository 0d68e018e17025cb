use crate::crypto::CryptoSuite;
use crate::{AeadKey, Error, KeyId, ProvisionIdentity};
use std::time::SystemTime;

/// A pre-generated, one-time receive key.
///
/// Key material is immutable apart from its expiration, which is set once
/// when a newer epoch of the same channel decrypts successfully. It is
/// deleted after its first successful use or once expired.
#[derive(Clone, Debug)]
pub struct ProvisionedKeyMaterial {
    pub(crate) provision: ProvisionIdentity,
    pub(crate) self_ratcheting_count: u32,
    pub(crate) key_id: KeyId,
    pub(crate) aead_key: AeadKey,
    pub(crate) expiration: Option<SystemTime>,
}

impl ProvisionedKeyMaterial {
    pub(crate) fn new(
        provision: ProvisionIdentity,
        self_ratcheting_count: u32,
        key_id: KeyId,
        aead_key: AeadKey,
    ) -> Self {
        Self {
            provision,
            self_ratcheting_count,
            key_id,
            aead_key,
            expiration: None,
        }
    }

    /// Returns the provision this key belongs to.
    pub fn provision(&self) -> &ProvisionIdentity {
        &self.provision
    }

    /// Returns the position of this key in its provision's chain.
    pub fn self_ratcheting_count(&self) -> u32 {
        self.self_ratcheting_count
    }

    /// Returns the lookup key carried by headers wrapped with this key.
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Returns the expiration time, if the key has been superseded.
    pub fn expiration(&self) -> Option<SystemTime> {
        self.expiration
    }

    /// Returns true when the key has an expiration at or before `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }

    /// Sets the expiration unless one is already set.
    pub(crate) fn expire_at(&mut self, expiration: SystemTime) {
        if self.expiration.is_none() {
            self.expiration = Some(expiration);
        }
    }

    /// Tries to recover a wrapped message key.
    pub(crate) fn unwrap(
        &self,
        suite: &dyn CryptoSuite,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        suite.decrypt(&self.aead_key, ciphertext)
    }
}
