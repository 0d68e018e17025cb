use crate::store::StoreError;

/// Errors that can occur while driving a channel ratchet.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// A PRNG, KDF or AEAD operation failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// The durable store could not complete the request. Retry later.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A protocol rule or a store invariant was violated.
    #[error("Protocol Violation: {0}")]
    Protocol(String),

    /// The requested channel does not exist.
    #[error("Unknown channel")]
    UnknownChannel,

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(value: hkdf::InvalidLength) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Invariant(reason) => Self::Protocol(reason),
            other => Self::Persistence(other.to_string()),
        }
    }
}
