use crate::Error;
use std::time::Duration;

/// Tuning of the provisioning layer and of the full-ratchet policy.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Unexpired receive keys kept per provision. Top-ups generate this many,
    /// a new provision starts with twice as many.
    pub reprovisioning_threshold: usize,
    /// Grace period during which superseded receive keys stay usable.
    pub key_material_expiration_delay: Duration,
    /// Upper bound on the candidate keys tried for one incoming header.
    pub max_unwrap_candidates: usize,
    /// Messages decrypted since our handshake message after which the
    /// handshake is considered lost.
    pub full_ratchet_max_decrypted_during_handshake: u64,
    /// Messages sent since our handshake message after which the handshake is
    /// considered lost.
    pub full_ratchet_max_sent_during_handshake: u64,
    /// Time after our handshake message after which it is considered lost.
    pub full_ratchet_handshake_timeout: Duration,
    /// Messages sent after which a new full ratchet is due.
    pub full_ratchet_message_interval: u64,
    /// Time after which a new full ratchet is due.
    pub full_ratchet_time_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reprovisioning_threshold: 50,
            key_material_expiration_delay: Duration::from_secs(24 * 60 * 60), // 1 day
            max_unwrap_candidates: 16,
            full_ratchet_max_decrypted_during_handshake: 20,
            full_ratchet_max_sent_during_handshake: 100,
            full_ratchet_handshake_timeout: Duration::from_secs(60 * 60), // 1 hour
            full_ratchet_message_interval: 500,
            full_ratchet_time_interval: Duration::from_secs(7 * 24 * 60 * 60), // 1 week
        }
    }
}

impl ChannelConfig {
    /// Rejects values the provisioning layer cannot work with.
    ///
    /// A zero threshold would leave new provisions without keys, and a zero
    /// candidate bound would make every header undecryptable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.reprovisioning_threshold == 0 {
            return Err(Error::Config(
                "reprovisioning_threshold must be positive".to_string(),
            ));
        }
        if self.max_unwrap_candidates == 0 {
            return Err(Error::Config(
                "max_unwrap_candidates must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(ChannelConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = ChannelConfig {
            reprovisioning_threshold: 0,
            ..ChannelConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ChannelConfig {
            max_unwrap_candidates: 0,
            ..ChannelConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ChannelConfig {
            reprovisioning_threshold: 1,
            max_unwrap_candidates: 1,
            ..ChannelConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
