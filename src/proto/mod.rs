use crate::channel::{Channel, Gkmv2Watermark, Provision, ProvisionedKeyMaterial};
use crate::{AeadKey, ChannelIdentity, DeviceUid, Error, Identity, KeyId, ProvisionIdentity, Seed};
use prost::Message;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Message)]
struct ChannelIdentityProto {
    #[prost(bytes = "vec", tag = "1")]
    local_device_uid: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    remote_device_uid: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    remote_identity: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
struct ChannelProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(message, optional, tag = "2")]
    identity: Option<ChannelIdentityProto>,
    #[prost(bool, tag = "3")]
    confirmed: bool,
    #[prost(uint32, tag = "4")]
    suite_version: u32,
    #[prost(bytes = "vec", tag = "5")]
    send_seed: Vec<u8>,
    #[prost(uint64, tag = "6")]
    sent_count: u64,
    #[prost(uint64, tag = "7")]
    sent_since_full_ratchet: u64,
    #[prost(uint64, tag = "8")]
    sent_since_full_ratchet_message: u64,
    #[prost(uint64, tag = "9")]
    decrypted_since_full_ratchet_message: u64,
    #[prost(uint64, tag = "10")]
    last_full_ratchet_at: u64,
    #[prost(uint64, tag = "11")]
    last_full_ratchet_message_at: u64,
    #[prost(bool, tag = "12")]
    full_ratchet_in_progress: bool,
    #[prost(uint32, tag = "13")]
    latest_full_ratcheting_count: u32,
    #[prost(bool, tag = "14")]
    supports_gkmv2: bool,
    #[prost(uint32, tag = "15")]
    gkmv2_full_ratcheting_count: u32,
    #[prost(uint32, tag = "16")]
    gkmv2_self_ratcheting_count: u32,
}

#[derive(Clone, PartialEq, Message)]
struct ProvisionProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(message, optional, tag = "2")]
    channel: Option<ChannelIdentityProto>,
    #[prost(uint32, tag = "3")]
    full_ratcheting_count: u32,
    #[prost(uint32, tag = "4")]
    self_ratcheting_count: u32,
    #[prost(bytes = "vec", tag = "5")]
    seed: Vec<u8>,
    #[prost(uint32, tag = "6")]
    suite_version: u32,
}

#[derive(Clone, PartialEq, Message)]
struct KeyMaterialProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(message, optional, tag = "2")]
    channel: Option<ChannelIdentityProto>,
    #[prost(uint32, tag = "3")]
    full_ratcheting_count: u32,
    #[prost(uint32, tag = "4")]
    self_ratcheting_count: u32,
    #[prost(bytes = "vec", tag = "5")]
    key_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    aead_key: Vec<u8>,
    #[prost(uint64, optional, tag = "7")]
    expiration: Option<u64>,
}

fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

fn check_version(version: u32) -> Result<(), Error> {
    if version != SCHEMA_VERSION {
        return Err(Error::Serde(format!("Unsupported schema version: {version}")));
    }
    Ok(())
}

fn encode(message: &impl Message, what: &str) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(message.encoded_len());
    message
        .encode(&mut buf)
        .map_err(|err| Error::Serde(format!("Failed to encode {what}: {err:?}")))?;
    Ok(buf)
}

impl ChannelIdentity {
    fn to_proto(self) -> ChannelIdentityProto {
        ChannelIdentityProto {
            local_device_uid: self.local_device_uid.as_bytes().to_vec(),
            remote_device_uid: self.remote_device_uid.as_bytes().to_vec(),
            remote_identity: self.remote_identity.to_bytes().to_vec(),
        }
    }

    fn from_proto(proto: Option<ChannelIdentityProto>) -> Result<Self, Error> {
        let proto = proto.ok_or_else(|| Error::Serde("Missing channel identity".to_string()))?;

        Ok(ChannelIdentity::new(
            DeviceUid::try_from(proto.local_device_uid.as_slice())?,
            DeviceUid::try_from(proto.remote_device_uid.as_slice())?,
            Identity::try_from(proto.remote_identity.as_slice())?,
        ))
    }
}

impl Channel {
    /// Serialize the channel to Protocol Buffers format
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let proto = ChannelProto {
            version: SCHEMA_VERSION,
            identity: Some(self.identity.to_proto()),
            confirmed: self.confirmed,
            suite_version: self.suite_version,
            send_seed: self.send_seed.as_bytes().to_vec(),
            sent_count: self.sent_count,
            sent_since_full_ratchet: self.sent_since_full_ratchet,
            sent_since_full_ratchet_message: self.sent_since_full_ratchet_message,
            decrypted_since_full_ratchet_message: self.decrypted_since_full_ratchet_message,
            last_full_ratchet_at: to_millis(self.last_full_ratchet_at),
            last_full_ratchet_message_at: to_millis(self.last_full_ratchet_message_at),
            full_ratchet_in_progress: self.full_ratchet_in_progress,
            latest_full_ratcheting_count: self.latest_full_ratcheting_count,
            supports_gkmv2: self.supports_gkmv2,
            gkmv2_full_ratcheting_count: self.gkmv2_watermark.full_ratcheting_count,
            gkmv2_self_ratcheting_count: self.gkmv2_watermark.self_ratcheting_count,
        };

        encode(&proto, "channel")
    }

    /// Deserialize a channel from Protocol Buffers format
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = ChannelProto::decode(bytes)
            .map_err(|err| Error::Serde(format!("Failed to decode channel: {err:?}")))?;
        check_version(proto.version)?;

        Ok(Channel {
            identity: ChannelIdentity::from_proto(proto.identity)?,
            confirmed: proto.confirmed,
            suite_version: proto.suite_version,
            send_seed: Seed::try_from(proto.send_seed.as_slice())?,
            sent_count: proto.sent_count,
            sent_since_full_ratchet: proto.sent_since_full_ratchet,
            sent_since_full_ratchet_message: proto.sent_since_full_ratchet_message,
            decrypted_since_full_ratchet_message: proto.decrypted_since_full_ratchet_message,
            last_full_ratchet_at: from_millis(proto.last_full_ratchet_at),
            last_full_ratchet_message_at: from_millis(proto.last_full_ratchet_message_at),
            full_ratchet_in_progress: proto.full_ratchet_in_progress,
            latest_full_ratcheting_count: proto.latest_full_ratcheting_count,
            supports_gkmv2: proto.supports_gkmv2,
            gkmv2_watermark: Gkmv2Watermark {
                full_ratcheting_count: proto.gkmv2_full_ratcheting_count,
                self_ratcheting_count: proto.gkmv2_self_ratcheting_count,
            },
        })
    }
}

impl Provision {
    /// Serialize the provision to Protocol Buffers format
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let proto = ProvisionProto {
            version: SCHEMA_VERSION,
            channel: Some(self.identity.channel.to_proto()),
            full_ratcheting_count: self.identity.full_ratcheting_count,
            self_ratcheting_count: self.self_ratcheting_count,
            seed: self.seed.as_bytes().to_vec(),
            suite_version: self.suite_version,
        };

        encode(&proto, "provision")
    }

    /// Deserialize a provision from Protocol Buffers format
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = ProvisionProto::decode(bytes)
            .map_err(|err| Error::Serde(format!("Failed to decode provision: {err:?}")))?;
        check_version(proto.version)?;

        Ok(Provision {
            identity: ProvisionIdentity::new(
                ChannelIdentity::from_proto(proto.channel)?,
                proto.full_ratcheting_count,
            ),
            self_ratcheting_count: proto.self_ratcheting_count,
            seed: Seed::try_from(proto.seed.as_slice())?,
            suite_version: proto.suite_version,
        })
    }
}

impl ProvisionedKeyMaterial {
    /// Serialize the key material to Protocol Buffers format
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let proto = KeyMaterialProto {
            version: SCHEMA_VERSION,
            channel: Some(self.provision.channel.to_proto()),
            full_ratcheting_count: self.provision.full_ratcheting_count,
            self_ratcheting_count: self.self_ratcheting_count,
            key_id: self.key_id.as_bytes().to_vec(),
            aead_key: self.aead_key.as_bytes().to_vec(),
            expiration: self.expiration.map(to_millis),
        };

        encode(&proto, "key material")
    }

    /// Deserialize key material from Protocol Buffers format
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = KeyMaterialProto::decode(bytes)
            .map_err(|err| Error::Serde(format!("Failed to decode key material: {err:?}")))?;
        check_version(proto.version)?;

        Ok(ProvisionedKeyMaterial {
            provision: ProvisionIdentity::new(
                ChannelIdentity::from_proto(proto.channel)?,
                proto.full_ratcheting_count,
            ),
            self_ratcheting_count: proto.self_ratcheting_count,
            key_id: KeyId::try_from(proto.key_id.as_slice())?,
            aead_key: AeadKey::try_from(proto.aead_key.as_slice())?,
            expiration: proto.expiration.map(from_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelConfig;
    use crate::crypto::SuiteV0;
    use crate::channel::WrapKind;
    use crate::effects::Effects;
    use ed25519_dalek::SigningKey;

    fn identity() -> ChannelIdentity {
        let remote = Identity::from(SigningKey::from_bytes(&[4u8; 32]).verifying_key());
        ChannelIdentity::new(DeviceUid([1u8; 32]), DeviceUid([2u8; 32]), remote)
    }

    fn records() -> (Channel, Provision, Vec<ProvisionedKeyMaterial>) {
        let config = ChannelConfig {
            reprovisioning_threshold: 2,
            ..ChannelConfig::default()
        };
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        Channel::new(identity(), &Seed::from([3u8; 32]), &SuiteV0, &config, now).unwrap()
    }

    #[test]
    fn test_channel_survives_serialization() {
        let (mut channel, _, _) = records();
        channel
            .wrap(b"key", WrapKind::Regular, &SuiteV0, &mut Effects::new())
            .unwrap();
        channel.set_supports_gkmv2(Gkmv2Watermark {
            full_ratcheting_count: 0,
            self_ratcheting_count: 7,
        });

        let restored = Channel::deserialize(&channel.serialize().unwrap()).unwrap();

        assert_eq!(restored.identity, channel.identity);
        assert_eq!(restored.send_seed, channel.send_seed);
        assert_eq!(restored.sent_count(), 1);
        assert_eq!(restored.last_full_ratchet_at, channel.last_full_ratchet_at);
        assert_eq!(restored.gkmv2_watermark(), channel.gkmv2_watermark());
    }

    #[test]
    fn test_restored_key_material_still_unwraps() {
        let (channel, provision, keys) = records();
        let mut sender = channel.clone();
        // Mirror the peer: its send seed is our receive seed.
        sender.send_seed =
            crate::diversify(&Seed::from([3u8; 32]), &identity().remote_device_uid, &SuiteV0)
                .unwrap();
        let header = sender
            .wrap(b"message key", WrapKind::Regular, &SuiteV0, &mut Effects::new())
            .unwrap();

        let mut key = keys[0].clone();
        key.expire_at(UNIX_EPOCH + Duration::from_millis(42));
        let restored = ProvisionedKeyMaterial::deserialize(&key.serialize().unwrap()).unwrap();
        let restored_provision =
            Provision::deserialize(&provision.serialize().unwrap()).unwrap();

        assert_eq!(restored.key_id(), &header.key_id);
        assert_eq!(restored.expiration(), key.expiration());
        assert_eq!(restored_provision.self_ratcheting_count(), 4);
        assert_eq!(
            restored.unwrap(&SuiteV0, &header.ciphertext).unwrap(),
            b"message key"
        );
    }

    #[test]
    fn test_rejects_unknown_schema_version() {
        let (_, provision, _) = records();
        let mut proto = ProvisionProto::decode(provision.serialize().unwrap().as_slice()).unwrap();
        proto.version = 2;

        let result = Provision::deserialize(&proto.encode_to_vec());
        assert!(matches!(result, Err(Error::Serde(_))));
    }
}
