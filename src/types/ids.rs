use crate::Error;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use std::fmt;

/// Length in bytes of a [`KeyId`].
pub const KEY_ID_LENGTH: usize = 32;

/// Length in bytes of a [`DeviceUid`].
pub const DEVICE_UID_LENGTH: usize = 32;

fn short_base64(bytes: &[u8]) -> String {
    let engine = base64::engine::general_purpose::STANDARD_NO_PAD;
    let mut encoded = engine.encode(bytes);
    encoded.truncate(8);
    encoded
}

/// Identifier of one device of a user.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceUid(pub [u8; DEVICE_UID_LENGTH]);

impl DeviceUid {
    /// Returns the raw bytes of this uid.
    pub fn as_bytes(&self) -> &[u8; DEVICE_UID_LENGTH] {
        &self.0
    }
}

impl From<[u8; DEVICE_UID_LENGTH]> for DeviceUid {
    fn from(bytes: [u8; DEVICE_UID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for DeviceUid {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; DEVICE_UID_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::Serde("Invalid device uid length".to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceUid({})", short_base64(&self.0))
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&short_base64(&self.0))
    }
}

/// Lookup key of a one-time key, embedded at the front of every channel header.
///
/// Key ids are drawn from the ratchet PRNG so they are unique with overwhelming
/// probability, but nothing enforces global uniqueness across channels.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub [u8; KEY_ID_LENGTH]);

impl KeyId {
    /// Returns the raw bytes of this key id.
    pub fn as_bytes(&self) -> &[u8; KEY_ID_LENGTH] {
        &self.0
    }
}

impl From<[u8; KEY_ID_LENGTH]> for KeyId {
    fn from(bytes: [u8; KEY_ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for KeyId {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; KEY_ID_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::Serde("Invalid key id length".to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", short_base64(&self.0))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&short_base64(&self.0))
    }
}

/// Long-term public identity of the remote user owning a channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(VerifyingKey);

impl Identity {
    /// Returns the Ed25519 verifying key behind this identity.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    /// Returns the compressed encoding of the identity key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<VerifyingKey> for Identity {
    fn from(value: VerifyingKey) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Identity {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Serde("Invalid identity length".to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|err| Error::Serde(format!("Invalid identity key: {err}")))?;
        Ok(Self(key))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", short_base64(self.0.as_bytes()))
    }
}

/// Composite identity of a channel: one per (local device, remote device, remote user).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelIdentity {
    /// Device on this side of the channel.
    pub local_device_uid: DeviceUid,
    /// Device on the other side of the channel.
    pub remote_device_uid: DeviceUid,
    /// User owning the remote device.
    pub remote_identity: Identity,
}

impl ChannelIdentity {
    /// Creates a channel identity.
    pub fn new(
        local_device_uid: DeviceUid,
        remote_device_uid: DeviceUid,
        remote_identity: Identity,
    ) -> Self {
        Self {
            local_device_uid,
            remote_device_uid,
            remote_identity,
        }
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}",
            self.local_device_uid, self.remote_device_uid
        )
    }
}

/// Composite identity of a provision: a receive epoch of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProvisionIdentity {
    /// Owning channel.
    pub channel: ChannelIdentity,
    /// Number of full ratchets that preceded this epoch.
    pub full_ratcheting_count: u32,
}

impl ProvisionIdentity {
    /// Creates a provision identity.
    pub fn new(channel: ChannelIdentity, full_ratcheting_count: u32) -> Self {
        Self {
            channel,
            full_ratcheting_count,
        }
    }
}
