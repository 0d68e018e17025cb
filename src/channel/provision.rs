use crate::channel::ProvisionedKeyMaterial;
use crate::crypto::CryptoSuite;
use crate::{ChannelIdentity, Error, ProvisionIdentity, Seed, diversify, self_ratchet};
use tracing::debug;

/// Number of key-material rows a store holds for one provision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyMaterialCounts {
    /// Every row, expiring or not.
    pub total: usize,
    /// Rows without an expiration.
    pub non_expiring: usize,
}

/// One epoch of the receive ratchet of a channel.
///
/// A provision is created with the channel (epoch 0) and then once per full
/// ratchet. It walks its own receive seed forward to pre-generate the keys the
/// peer will use, so messages can arrive late or out of order.
#[derive(Clone, Debug)]
pub struct Provision {
    pub(crate) identity: ProvisionIdentity,
    pub(crate) self_ratcheting_count: u32,
    pub(crate) seed: Seed,
    pub(crate) suite_version: u32,
}

impl Provision {
    /// Creates the provision of epoch `full_ratcheting_count`.
    ///
    /// The receive seed is the raw seed diversified with the remote device
    /// uid, mirroring how the peer derives its send seed.
    pub(crate) fn new(
        channel: ChannelIdentity,
        full_ratcheting_count: u32,
        raw_seed: &Seed,
        suite: &dyn CryptoSuite,
    ) -> Result<Self, Error> {
        let seed = diversify(raw_seed, &channel.remote_device_uid, suite)?;

        Ok(Self {
            identity: ProvisionIdentity::new(channel, full_ratcheting_count),
            self_ratcheting_count: 0,
            seed,
            suite_version: suite.version(),
        })
    }

    /// Returns the identity of this provision.
    pub fn identity(&self) -> &ProvisionIdentity {
        &self.identity
    }

    /// Returns the epoch of this provision.
    pub fn full_ratcheting_count(&self) -> u32 {
        self.identity.full_ratcheting_count
    }

    /// Returns how many keys this provision has generated so far.
    pub fn self_ratcheting_count(&self) -> u32 {
        self.self_ratcheting_count
    }

    /// Returns the suite version pinned by this provision.
    pub fn suite_version(&self) -> u32 {
        self.suite_version
    }

    /// Generates the next `count` receive keys.
    ///
    /// The seed and counter only move once every key has been derived, so a
    /// failure part-way leaves the provision untouched.
    pub(crate) fn self_ratchet(
        &mut self,
        count: usize,
        suite: &dyn CryptoSuite,
    ) -> Result<Vec<ProvisionedKeyMaterial>, Error> {
        let mut seed = self.seed.clone();
        let mut next_count = self.self_ratcheting_count;
        let mut keys = Vec::with_capacity(count);

        for _ in 0..count {
            let step = self_ratchet(&seed, suite)?;
            keys.push(ProvisionedKeyMaterial::new(
                self.identity,
                next_count,
                step.key_id,
                step.aead_key,
            ));
            seed = step.next_seed;
            next_count = next_count
                .checked_add(1)
                .ok_or_else(|| Error::Protocol("Self-ratcheting count overflow".to_string()))?;
        }

        self.seed = seed;
        self.self_ratcheting_count = next_count;

        Ok(keys)
    }

    /// Tops up the provision when fewer than `threshold` keys are left.
    ///
    /// `counts` must describe this provision's rows as currently stored. A
    /// provision whose keys already carry an expiration has been superseded by
    /// a newer epoch and is left to drain.
    pub(crate) fn self_ratchet_if_required(
        &mut self,
        counts: KeyMaterialCounts,
        threshold: usize,
        suite: &dyn CryptoSuite,
    ) -> Result<Vec<ProvisionedKeyMaterial>, Error> {
        if counts.total > counts.non_expiring {
            return Ok(Vec::new());
        }

        if counts.non_expiring >= threshold {
            return Ok(Vec::new());
        }

        debug!(
            channel = %self.identity.channel,
            epoch = self.identity.full_ratcheting_count,
            remaining = counts.non_expiring,
            "reprovisioning receive keys"
        );
        self.self_ratchet(threshold, suite)
    }
}
