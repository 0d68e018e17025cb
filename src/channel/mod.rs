mod key_material;
pub use key_material::ProvisionedKeyMaterial;

mod provision;
pub use provision::{KeyMaterialCounts, Provision};

use crate::crypto::CryptoSuite;
use crate::effects::{Effects, PendingEffect};
use crate::{ChannelConfig, ChannelHeader, ChannelIdentity, Error, Seed, diversify, self_ratchet};
use std::time::SystemTime;
use tracing::debug;

/// What a wrapped message is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapKind {
    /// Any message other than a full-ratchet handshake message.
    Regular,
    /// A message of the full-ratchet handshake itself. Sending one never
    /// re-evaluates the full-ratchet policy.
    FullRatchetHandshake,
}

/// Last `(full_ratcheting_count, self_ratcheting_count)` at which the peer
/// announced GKMv2 support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Gkmv2Watermark {
    /// Epoch of the announcing message.
    pub full_ratcheting_count: u32,
    /// Position of the announcing message in its epoch.
    pub self_ratcheting_count: u32,
}

/// A secure channel between one local device and one remote device.
///
/// The channel owns the send ratchet and decides when a full ratchet is due.
/// Receive keys live in the channel's [`Provision`]s.
#[derive(Clone, Debug)]
pub struct Channel {
    pub(crate) identity: ChannelIdentity,
    pub(crate) confirmed: bool,
    pub(crate) suite_version: u32,
    pub(crate) send_seed: Seed,

    // Send counters
    pub(crate) sent_count: u64,
    pub(crate) sent_since_full_ratchet: u64,
    pub(crate) sent_since_full_ratchet_message: u64,

    // Receive counters
    pub(crate) decrypted_since_full_ratchet_message: u64,

    pub(crate) last_full_ratchet_at: SystemTime,
    pub(crate) last_full_ratchet_message_at: SystemTime,
    pub(crate) full_ratchet_in_progress: bool,
    pub(crate) latest_full_ratcheting_count: u32,

    pub(crate) supports_gkmv2: bool,
    pub(crate) gkmv2_watermark: Gkmv2Watermark,
}

impl Channel {
    /// Creates a channel and its epoch-0 provision from a raw shared seed.
    ///
    /// The send seed is the raw seed diversified with the local device uid;
    /// the provision diversifies with the remote uid. The provision starts
    /// with twice the reprovisioning threshold of keys.
    pub(crate) fn new(
        identity: ChannelIdentity,
        raw_seed: &Seed,
        suite: &dyn CryptoSuite,
        config: &ChannelConfig,
        now: SystemTime,
    ) -> Result<(Self, Provision, Vec<ProvisionedKeyMaterial>), Error> {
        let send_seed = diversify(raw_seed, &identity.local_device_uid, suite)?;

        let mut provision = Provision::new(identity, 0, raw_seed, suite)?;
        let keys = provision.self_ratchet(2 * config.reprovisioning_threshold, suite)?;

        let channel = Self {
            identity,
            confirmed: false,
            suite_version: suite.version(),
            send_seed,
            sent_count: 0,
            sent_since_full_ratchet: 0,
            sent_since_full_ratchet_message: 0,
            decrypted_since_full_ratchet_message: 0,
            last_full_ratchet_at: now,
            last_full_ratchet_message_at: now,
            full_ratchet_in_progress: false,
            latest_full_ratcheting_count: 0,
            supports_gkmv2: false,
            gkmv2_watermark: Gkmv2Watermark {
                full_ratcheting_count: 0,
                self_ratcheting_count: 0,
            },
        };

        Ok((channel, provision, keys))
    }

    /// Returns the identity of this channel.
    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    /// Returns true once a message from the peer has been decrypted.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Returns the suite version pinned by the send ratchet.
    pub fn suite_version(&self) -> u32 {
        self.suite_version
    }

    /// Returns how many messages were wrapped on this channel.
    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    /// Returns how many messages were wrapped since the last full ratchet.
    pub fn sent_since_full_ratchet(&self) -> u64 {
        self.sent_since_full_ratchet
    }

    /// Returns true while our full-ratchet handshake awaits completion.
    pub fn is_full_ratchet_in_progress(&self) -> bool {
        self.full_ratchet_in_progress
    }

    /// Returns the epoch of the newest provision.
    pub fn latest_full_ratcheting_count(&self) -> u32 {
        self.latest_full_ratcheting_count
    }

    /// Returns the GKMv2 watermark if the peer announced support.
    pub fn gkmv2_watermark(&self) -> Option<Gkmv2Watermark> {
        self.supports_gkmv2.then_some(self.gkmv2_watermark)
    }

    /// Wraps `message_key` under the next one-time send key.
    ///
    /// Nothing is mutated unless ratcheting and encryption both succeed.
    pub(crate) fn wrap(
        &mut self,
        message_key: &[u8],
        kind: WrapKind,
        suite: &dyn CryptoSuite,
        effects: &mut Effects,
    ) -> Result<ChannelHeader, Error> {
        let step = self_ratchet(&self.send_seed, suite)?;
        let ciphertext = suite.encrypt(&step.aead_key, message_key)?;

        self.send_seed = step.next_seed;
        self.sent_count = self.sent_count.saturating_add(1);
        self.sent_since_full_ratchet = self.sent_since_full_ratchet.saturating_add(1);
        self.sent_since_full_ratchet_message =
            self.sent_since_full_ratchet_message.saturating_add(1);

        if kind == WrapKind::Regular {
            effects.push(PendingEffect::CheckFullRatchet(self.identity));
        }

        Ok(ChannelHeader {
            key_id: step.key_id,
            ciphertext,
        })
    }

    /// Books a successful decryption on this channel.
    pub(crate) fn record_decryption(&mut self, effects: &mut Effects) {
        self.decrypted_since_full_ratchet_message =
            self.decrypted_since_full_ratchet_message.saturating_add(1);
        effects.push(PendingEffect::CheckFullRatchet(self.identity));
        self.confirm(effects);
    }

    /// Marks the channel as confirmed.
    ///
    /// Only the first call has an effect: it schedules the re-sync with the
    /// peer and the confirmation notification. Returns true on that call.
    pub(crate) fn confirm(&mut self, effects: &mut Effects) -> bool {
        if self.confirmed {
            return false;
        }

        self.confirmed = true;
        effects.push(PendingEffect::ResyncAfterConfirmation(self.identity));
        effects.push(PendingEffect::NotifyConfirmed(self.identity));
        true
    }

    /// Tells whether a full ratchet should be started now. Never mutates.
    ///
    /// While our handshake is in progress this detects a handshake the peer
    /// lost or never answered. Otherwise it implements periodic rekeying.
    pub fn requires_full_ratchet(&self, config: &ChannelConfig, now: SystemTime) -> bool {
        if self.full_ratchet_in_progress {
            self.decrypted_since_full_ratchet_message
                >= config.full_ratchet_max_decrypted_during_handshake
                || now
                    .duration_since(self.last_full_ratchet_message_at)
                    .unwrap_or_default()
                    >= config.full_ratchet_handshake_timeout
                || self.sent_since_full_ratchet_message
                    >= config.full_ratchet_max_sent_during_handshake
        } else {
            self.sent_since_full_ratchet >= config.full_ratchet_message_interval
                || now
                    .duration_since(self.last_full_ratchet_at)
                    .unwrap_or_default()
                    >= config.full_ratchet_time_interval
        }
    }

    /// Records that we just sent a full-ratchet handshake message.
    pub(crate) fn mark_full_ratchet_message_sent(&mut self, now: SystemTime) {
        self.full_ratchet_in_progress = true;
        self.last_full_ratchet_message_at = now;
        self.sent_since_full_ratchet_message = 0;
        self.decrypted_since_full_ratchet_message = 0;
    }

    /// Replaces the send seed with the outcome of a completed full ratchet.
    ///
    /// The suite may change here and only here.
    pub(crate) fn update_send_seed(
        &mut self,
        raw_seed: &Seed,
        suite: &dyn CryptoSuite,
        now: SystemTime,
    ) -> Result<(), Error> {
        let send_seed = diversify(raw_seed, &self.identity.local_device_uid, suite)?;

        self.send_seed = send_seed;
        self.suite_version = suite.version();
        self.sent_since_full_ratchet = 0;
        self.last_full_ratchet_at = now;
        self.full_ratchet_in_progress = false;

        debug!(channel = %self.identity, "send seed replaced by full ratchet");
        Ok(())
    }

    /// Creates the provision of the next epoch from a full-ratchet seed.
    pub(crate) fn create_next_provision(
        &mut self,
        raw_seed: &Seed,
        suite: &dyn CryptoSuite,
        config: &ChannelConfig,
    ) -> Result<(Provision, Vec<ProvisionedKeyMaterial>), Error> {
        let epoch = self
            .latest_full_ratcheting_count
            .checked_add(1)
            .ok_or_else(|| Error::Protocol("Full-ratcheting count overflow".to_string()))?;

        let mut provision = Provision::new(self.identity, epoch, raw_seed, suite)?;
        let keys = provision.self_ratchet(2 * config.reprovisioning_threshold, suite)?;
        self.latest_full_ratcheting_count = epoch;

        debug!(channel = %self.identity, epoch, "created provision");
        Ok((provision, keys))
    }

    /// Raises the GKMv2 watermark. Stale or repeated announcements are ignored.
    ///
    /// Returns true when the watermark moved.
    pub(crate) fn set_supports_gkmv2(&mut self, watermark: Gkmv2Watermark) -> bool {
        if self.supports_gkmv2 && watermark <= self.gkmv2_watermark {
            return false;
        }

        self.supports_gkmv2 = true;
        self.gkmv2_watermark = watermark;
        true
    }

    /// Tells whether the peer supported GKMv2 when it used the key at `position`.
    pub fn supports_gkmv2_at(&self, position: Gkmv2Watermark) -> bool {
        self.supports_gkmv2 && self.gkmv2_watermark <= position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SuiteV0;
    use crate::{DeviceUid, Identity};
    use ed25519_dalek::SigningKey;
    use std::time::Duration;

    fn identity() -> ChannelIdentity {
        let remote = Identity::from(SigningKey::from_bytes(&[1u8; 32]).verifying_key());
        ChannelIdentity::new(DeviceUid([1u8; 32]), DeviceUid([2u8; 32]), remote)
    }

    fn channel(config: &ChannelConfig, now: SystemTime) -> Channel {
        let (channel, _, _) =
            Channel::new(identity(), &Seed::from([5u8; 32]), &SuiteV0, config, now).unwrap();
        channel
    }

    fn watermark(full_ratcheting_count: u32, self_ratcheting_count: u32) -> Gkmv2Watermark {
        Gkmv2Watermark {
            full_ratcheting_count,
            self_ratcheting_count,
        }
    }

    #[test]
    fn test_new_channel_provisions_twice_the_threshold() {
        let config = ChannelConfig {
            reprovisioning_threshold: 4,
            ..ChannelConfig::default()
        };
        let (channel, provision, keys) = Channel::new(
            identity(),
            &Seed::from([5u8; 32]),
            &SuiteV0,
            &config,
            SystemTime::now(),
        )
        .unwrap();

        assert!(!channel.is_confirmed());
        assert_eq!(provision.full_ratcheting_count(), 0);
        assert_eq!(provision.self_ratcheting_count(), 8);
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn test_wrap_advances_send_ratchet() {
        let config = ChannelConfig::default();
        let mut channel = channel(&config, SystemTime::now());
        let seed_before = channel.send_seed.clone();
        let mut effects = Effects::new();

        let first = channel
            .wrap(b"message key", WrapKind::Regular, &SuiteV0, &mut effects)
            .unwrap();
        let second = channel
            .wrap(b"message key", WrapKind::Regular, &SuiteV0, &mut effects)
            .unwrap();

        assert_ne!(first.key_id, second.key_id);
        assert_ne!(channel.send_seed, seed_before);
        assert_eq!(channel.sent_count(), 2);
        assert_eq!(
            effects.as_slice(),
            &[PendingEffect::CheckFullRatchet(identity())]
        );
    }

    #[test]
    fn test_handshake_messages_skip_policy_check() {
        let config = ChannelConfig::default();
        let mut channel = channel(&config, SystemTime::now());
        let mut effects = Effects::new();

        channel
            .wrap(b"key", WrapKind::FullRatchetHandshake, &SuiteV0, &mut effects)
            .unwrap();

        assert!(effects.is_empty());
        assert_eq!(channel.sent_count(), 1);
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let config = ChannelConfig::default();
        let mut channel = channel(&config, SystemTime::now());

        let mut effects = Effects::new();
        assert!(channel.confirm(&mut effects));
        assert_eq!(
            effects.as_slice(),
            &[
                PendingEffect::ResyncAfterConfirmation(identity()),
                PendingEffect::NotifyConfirmed(identity())
            ]
        );

        let mut effects = Effects::new();
        assert!(!channel.confirm(&mut effects));
        assert!(effects.is_empty());
        assert!(channel.is_confirmed());
    }

    #[test]
    fn test_idle_policy_boundaries() {
        let config = ChannelConfig::default();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mut channel = channel(&config, start);

        channel.sent_since_full_ratchet = config.full_ratchet_message_interval - 1;
        assert!(!channel.requires_full_ratchet(&config, start));
        channel.sent_since_full_ratchet = config.full_ratchet_message_interval;
        assert!(channel.requires_full_ratchet(&config, start));

        channel.sent_since_full_ratchet = 0;
        let due = start + config.full_ratchet_time_interval;
        assert!(!channel.requires_full_ratchet(&config, due - Duration::from_millis(1)));
        assert!(channel.requires_full_ratchet(&config, due));
    }

    #[test]
    fn test_in_progress_policy_boundaries() {
        let config = ChannelConfig::default();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mut channel = channel(&config, start);
        channel.mark_full_ratchet_message_sent(start);

        // Idle thresholds no longer apply.
        channel.sent_since_full_ratchet = config.full_ratchet_message_interval;
        assert!(!channel.requires_full_ratchet(&config, start));

        channel.decrypted_since_full_ratchet_message =
            config.full_ratchet_max_decrypted_during_handshake - 1;
        assert!(!channel.requires_full_ratchet(&config, start));
        channel.decrypted_since_full_ratchet_message =
            config.full_ratchet_max_decrypted_during_handshake;
        assert!(channel.requires_full_ratchet(&config, start));
        channel.decrypted_since_full_ratchet_message = 0;

        channel.sent_since_full_ratchet_message =
            config.full_ratchet_max_sent_during_handshake - 1;
        assert!(!channel.requires_full_ratchet(&config, start));
        channel.sent_since_full_ratchet_message = config.full_ratchet_max_sent_during_handshake;
        assert!(channel.requires_full_ratchet(&config, start));
        channel.sent_since_full_ratchet_message = 0;

        let timeout = start + config.full_ratchet_handshake_timeout;
        assert!(!channel.requires_full_ratchet(&config, timeout - Duration::from_millis(1)));
        assert!(channel.requires_full_ratchet(&config, timeout));
    }

    #[test]
    fn test_update_send_seed_resets_policy() {
        let config = ChannelConfig::default();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mut channel = channel(&config, start);
        channel.sent_since_full_ratchet = config.full_ratchet_message_interval;
        channel.mark_full_ratchet_message_sent(start);
        let old_seed = channel.send_seed.clone();

        channel
            .update_send_seed(&Seed::from([6u8; 32]), &SuiteV0, start)
            .unwrap();

        assert_ne!(channel.send_seed, old_seed);
        assert!(!channel.is_full_ratchet_in_progress());
        assert_eq!(channel.sent_since_full_ratchet(), 0);
        assert!(!channel.requires_full_ratchet(&config, start));
    }

    #[test]
    fn test_gkmv2_watermark_is_monotonic() {
        let config = ChannelConfig::default();
        let mut channel = channel(&config, SystemTime::now());
        assert_eq!(channel.gkmv2_watermark(), None);

        assert!(channel.set_supports_gkmv2(watermark(1, 5)));
        assert!(!channel.set_supports_gkmv2(watermark(1, 5)));
        assert!(!channel.set_supports_gkmv2(watermark(1, 4)));
        assert!(!channel.set_supports_gkmv2(watermark(0, 90)));
        assert_eq!(channel.gkmv2_watermark(), Some(watermark(1, 5)));

        assert!(channel.set_supports_gkmv2(watermark(1, 6)));
        assert!(channel.set_supports_gkmv2(watermark(2, 0)));
        assert_eq!(channel.gkmv2_watermark(), Some(watermark(2, 0)));
    }

    #[test]
    fn test_gkmv2_support_depends_on_position() {
        let config = ChannelConfig::default();
        let mut channel = channel(&config, SystemTime::now());
        assert!(!channel.supports_gkmv2_at(watermark(5, 5)));

        channel.set_supports_gkmv2(watermark(1, 5));
        assert!(!channel.supports_gkmv2_at(watermark(1, 4)));
        assert!(channel.supports_gkmv2_at(watermark(1, 5)));
        assert!(channel.supports_gkmv2_at(watermark(2, 0)));
    }
}
