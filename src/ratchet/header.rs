use crate::{Error, KEY_ID_LENGTH, KeyId};

/// Header prepended to every message sent over a channel.
///
/// Format: [key id (32 bytes)][wrapped message key]
///
/// The length of the wrapped key depends on the suite pinned by the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelHeader {
    /// Lookup key of the one-time key that wrapped the message key.
    pub key_id: KeyId,
    /// AEAD ciphertext of the message key.
    pub ciphertext: Vec<u8>,
}

impl ChannelHeader {
    /// Serializes the header to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(KEY_ID_LENGTH + self.ciphertext.len());
        result.extend_from_slice(self.key_id.as_bytes());
        result.extend_from_slice(&self.ciphertext);

        result
    }

    /// Deserializes a header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() <= KEY_ID_LENGTH {
            return Err(Error::Protocol("Invalid channel header length".to_string()));
        }

        Ok(Self {
            key_id: KeyId::try_from(&bytes[..KEY_ID_LENGTH])?,
            ciphertext: bytes[KEY_ID_LENGTH..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = ChannelHeader {
            key_id: KeyId([5u8; 32]),
            ciphertext: vec![1, 2, 3],
        };

        let bytes = header.to_bytes();
        assert_eq!(&bytes[..32], &[5u8; 32]);
        assert_eq!(&bytes[32..], &[1, 2, 3]);
        assert_eq!(ChannelHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_without_ciphertext_is_rejected() {
        assert!(ChannelHeader::from_bytes(&[]).is_err());
        assert!(ChannelHeader::from_bytes(&[0u8; 32]).is_err());
    }
}
