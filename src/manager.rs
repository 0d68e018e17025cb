use crate::channel::{Channel, Gkmv2Watermark, ProvisionedKeyMaterial, WrapKind};
use crate::clock::{Clock, SystemClock};
use crate::crypto::{CryptoSuiteProvider, DefaultSuiteProvider};
use crate::delegates::{
    ChannelNotification, FullRatchetStarter, IdentityDelegate, Noop, NotificationSink,
};
use crate::effects::{Effects, PendingEffect};
use crate::store::{ChannelStore, WriteBatch, WriteOp};
use crate::{ChannelConfig, ChannelHeader, ChannelIdentity, DeviceUid, Error, Identity, Seed};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

/// A message key recovered from a channel header.
#[derive(Debug)]
pub struct Unwrapped {
    /// The unwrapped message key.
    pub message_key: Zeroizing<Vec<u8>>,
    /// Channel the header was addressed on.
    pub channel: ChannelIdentity,
    /// Epoch of the key that matched.
    pub full_ratcheting_count: u32,
    /// Position of the key that matched in its epoch.
    pub self_ratcheting_count: u32,
    /// Whether the peer had announced GKMv2 support when it sent this message.
    pub supports_gkmv2: bool,
}

/// Rows removed by [`ChannelManager::housekeeping`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Expired key-material rows deleted.
    pub expired_key_materials: usize,
    /// Drained provisions deleted.
    pub empty_provisions: usize,
}

/// Entry point of the engine: drives every channel of a store.
///
/// Mutations of one channel are serialized by a per-channel lock, collected
/// into one [`WriteBatch`] and committed atomically. The side effects they
/// request run after the commit, once the lock is released.
pub struct ChannelManager<S: ChannelStore> {
    store: S,
    config: ChannelConfig,
    suites: Arc<dyn CryptoSuiteProvider>,
    full_ratchet_starter: Arc<dyn FullRatchetStarter>,
    identity_delegate: Arc<dyn IdentityDelegate>,
    notification_sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<ChannelIdentity, Arc<Mutex<()>>>>,
}

impl<S: ChannelStore> ChannelManager<S> {
    /// Creates a manager with the default suites, the system clock and
    /// collaborators that do nothing.
    ///
    /// Fails with [`Error::Config`] if `config` does not validate.
    pub fn new(store: S, config: ChannelConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            suites: Arc::new(DefaultSuiteProvider),
            full_ratchet_starter: Arc::new(Noop),
            identity_delegate: Arc::new(Noop),
            notification_sink: Arc::new(Noop),
            clock: Arc::new(SystemClock),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the crypto suite provider.
    pub fn with_suite_provider(mut self, suites: Arc<dyn CryptoSuiteProvider>) -> Self {
        self.suites = suites;
        self
    }

    /// Sets who starts full-ratchet handshakes.
    pub fn with_full_ratchet_starter(mut self, starter: Arc<dyn FullRatchetStarter>) -> Self {
        self.full_ratchet_starter = starter;
        self
    }

    /// Sets the identity hooks run on first confirmation.
    pub fn with_identity_delegate(mut self, delegate: Arc<dyn IdentityDelegate>) -> Self {
        self.identity_delegate = delegate;
        self
    }

    /// Sets where channel notifications go.
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notification_sink = sink;
        self
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Returns the lock of `identity`.
    ///
    /// Without `create`, no entry is added for a channel missing from the
    /// store and the call fails with [`Error::UnknownChannel`].
    fn channel_lock(
        &self,
        identity: &ChannelIdentity,
        create: bool,
    ) -> Result<Arc<Mutex<()>>, Error> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Persistence("Channel lock registry poisoned".to_string()))?;
        if let Some(lock) = locks.get(identity) {
            return Ok(lock.clone());
        }
        if !create && self.store.channel(identity)?.is_none() {
            return Err(Error::UnknownChannel);
        }
        Ok(locks.entry(*identity).or_default().clone())
    }

    /// Drops the lock of `identity` if nobody holds a handle to it.
    ///
    /// Handles are only cloned under the registry mutex, so a count of one
    /// means no caller can be waiting on or holding the lock.
    fn release_lock(&self, identity: &ChannelIdentity) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks
            .get(identity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(identity);
        }
    }

    /// Runs `f` under the lock of `identity`, then runs the effects it requested.
    ///
    /// Fails with [`Error::UnknownChannel`] unless the channel exists or
    /// `create` is set.
    fn locked<T>(
        &self,
        identity: &ChannelIdentity,
        create: bool,
        f: impl FnOnce() -> Result<(T, Effects), Error>,
    ) -> Result<T, Error> {
        let (value, effects) = {
            let lock = self.channel_lock(identity, create)?;
            let _guard = lock
                .lock()
                .map_err(|_| Error::Persistence("Channel lock poisoned".to_string()))?;
            f()?
        };

        self.run_effects(effects);
        Ok(value)
    }

    fn load_channel(&self, identity: &ChannelIdentity) -> Result<Channel, Error> {
        self.store.channel(identity)?.ok_or(Error::UnknownChannel)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), Error> {
        self.store.apply(batch).map_err(|err| {
            warn!(error = %err, "failed to commit channel state");
            Error::from(err)
        })
    }

    /// Creates a channel from the raw seed shared with the remote device.
    ///
    /// A channel already existing under the same identity is deleted first.
    pub fn create_channel(
        &self,
        local_device_uid: DeviceUid,
        remote_device_uid: DeviceUid,
        remote_identity: Identity,
        raw_seed: &Seed,
        suite_version: u32,
    ) -> Result<ChannelIdentity, Error> {
        let identity = ChannelIdentity::new(local_device_uid, remote_device_uid, remote_identity);

        let created = self.locked(&identity, true, || {
            let suite = self.suites.suite(suite_version)?;
            let (channel, provision, keys) = Channel::new(
                identity,
                raw_seed,
                suite.as_ref(),
                &self.config,
                self.clock.now(),
            )?;

            let mut batch = WriteBatch::new();
            let mut effects = Effects::new();
            if self.store.channel(&identity)?.is_some() {
                debug!(channel = %identity, "replacing existing channel");
                batch.push(WriteOp::DeleteChannel(identity));
                effects.push(PendingEffect::NotifyDeleted(identity));
            }
            batch.push(WriteOp::PutChannel(channel));
            batch.push(WriteOp::PutProvision(provision));
            for key in keys {
                batch.push(WriteOp::PutKeyMaterial(key));
            }
            self.commit(batch)?;

            debug!(channel = %identity, suite_version, "channel created");
            Ok((identity, effects))
        });

        if created.is_err() {
            self.release_lock(&identity);
        }
        created
    }

    /// Wraps `message_key` for the remote device of a channel.
    ///
    /// Returns the serialized [`ChannelHeader`].
    pub fn wrap(
        &self,
        identity: &ChannelIdentity,
        message_key: &[u8],
        kind: WrapKind,
    ) -> Result<Vec<u8>, Error> {
        self.locked(identity, false, || {
            let mut channel = self.load_channel(identity)?;
            let suite = self.suites.suite(channel.suite_version)?;

            let mut effects = Effects::new();
            let header = channel
                .wrap(message_key, kind, suite.as_ref(), &mut effects)
                .inspect_err(|err| error!(channel = %identity, error = %err, "wrap failed"))?;

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutChannel(channel));
            self.commit(batch)?;

            Ok((header.to_bytes(), effects))
        })
    }

    /// Unwraps a header received by a local device.
    ///
    /// Every key matching the header's key id on any channel of the device is
    /// tried in turn, up to the configured bound. Returns `None` when no key
    /// matches, which just means the header was not meant for these channels.
    pub fn unwrap(
        &self,
        local_device_uid: &DeviceUid,
        header: &[u8],
    ) -> Result<Option<Unwrapped>, Error> {
        let header = ChannelHeader::from_bytes(header)?;

        let candidates = self.store.key_materials_for_key_id(
            &header.key_id,
            local_device_uid,
            self.config.max_unwrap_candidates,
        )?;
        if candidates.is_empty() {
            debug!(key_id = %header.key_id, "no provisioned key for header");
            return Ok(None);
        }

        // A failing candidate must not hide the one holding the right key.
        let mut persistence_failure = None;
        for candidate in &candidates {
            match self.try_candidate(candidate, &header.ciphertext) {
                Ok(Some(unwrapped)) => return Ok(Some(unwrapped)),
                Ok(None) | Err(Error::UnknownChannel) => {}
                Err(err @ Error::Protocol(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        channel = %candidate.provision.channel,
                        key_id = %header.key_id,
                        error = %err,
                        "skipping candidate key"
                    );
                    if matches!(err, Error::Persistence(_)) {
                        persistence_failure = Some(err);
                    }
                }
            }
        }

        // The right key may sit behind a failed commit, so let the caller retry.
        if let Some(err) = persistence_failure {
            return Err(err);
        }

        debug!(
            key_id = %header.key_id,
            candidates = candidates.len(),
            "no candidate key could unwrap header"
        );
        Ok(None)
    }

    fn try_candidate(
        &self,
        candidate: &ProvisionedKeyMaterial,
        ciphertext: &[u8],
    ) -> Result<Option<Unwrapped>, Error> {
        let identity = candidate.provision.channel;

        self.locked(&identity, false, || {
            // Housekeeping does not take channel locks and may have purged the
            // key and its drained provision since the scan. The store never
            // keeps a key without its provision, so the provision is read first.
            let Some(mut provision) = self.store.provision(&candidate.provision)? else {
                return Ok((None, Effects::new()));
            };
            // Another unwrap may have consumed the key since the scan.
            let Some(key) = self
                .store
                .key_material(&candidate.provision, candidate.self_ratcheting_count)?
            else {
                return Ok((None, Effects::new()));
            };
            let mut channel = self
                .store
                .channel(&identity)?
                .ok_or_else(|| Error::Protocol("Provision without owning channel".to_string()))?;

            let suite = self.suites.suite(provision.suite_version)?;
            let message_key = match key.unwrap(suite.as_ref(), ciphertext) {
                Ok(message_key) => Zeroizing::new(message_key),
                Err(_) => {
                    debug!(channel = %identity, key_id = %key.key_id, "candidate key rejected");
                    return Ok((None, Effects::new()));
                }
            };

            let now = self.clock.now();
            let epoch = provision.full_ratcheting_count();
            let mut batch = WriteBatch::new();
            let mut effects = Effects::new();

            if epoch > 0 {
                batch.push(WriteOp::ExpireSupersededKeyMaterial {
                    channel: identity,
                    below: epoch,
                    expiration: now
                        .checked_add(self.config.key_material_expiration_delay)
                        .unwrap_or(now),
                });
            }

            let counts = self.store.key_material_counts(&provision.identity)?;
            let fresh = provision.self_ratchet_if_required(
                counts,
                self.config.reprovisioning_threshold,
                suite.as_ref(),
            )?;
            if !fresh.is_empty() {
                batch.push(WriteOp::PutProvision(provision));
                for fresh_key in fresh {
                    batch.push(WriteOp::PutKeyMaterial(fresh_key));
                }
            }

            channel.record_decryption(&mut effects);
            batch.push(WriteOp::DeleteKeyMaterial {
                provision: key.provision,
                self_ratcheting_count: key.self_ratcheting_count,
            });

            let unwrapped = Unwrapped {
                message_key,
                channel: identity,
                full_ratcheting_count: epoch,
                self_ratcheting_count: key.self_ratcheting_count,
                supports_gkmv2: channel.supports_gkmv2_at(Gkmv2Watermark {
                    full_ratcheting_count: epoch,
                    self_ratcheting_count: key.self_ratcheting_count,
                }),
            };
            batch.push(WriteOp::PutChannel(channel));
            self.commit(batch)?;

            Ok((Some(unwrapped), effects))
        })
    }

    /// Confirms a channel. Returns true if it was not confirmed before.
    pub fn confirm(&self, identity: &ChannelIdentity) -> Result<bool, Error> {
        self.locked(identity, false, || {
            let mut channel = self.load_channel(identity)?;
            let mut effects = Effects::new();

            if !channel.confirm(&mut effects) {
                return Ok((false, effects));
            }

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutChannel(channel));
            self.commit(batch)?;

            Ok((true, effects))
        })
    }

    /// Tells whether a channel is due for a full ratchet.
    pub fn requires_full_ratchet(&self, identity: &ChannelIdentity) -> Result<bool, Error> {
        let channel = self.load_channel(identity)?;
        Ok(channel.requires_full_ratchet(&self.config, self.clock.now()))
    }

    /// Records a GKMv2 announcement received with the key at
    /// `(full_ratcheting_count, self_ratcheting_count)`.
    ///
    /// Returns true when the stored watermark moved forward.
    pub fn set_supports_gkmv2(
        &self,
        identity: &ChannelIdentity,
        full_ratcheting_count: u32,
        self_ratcheting_count: u32,
    ) -> Result<bool, Error> {
        self.locked(identity, false, || {
            let mut channel = self.load_channel(identity)?;
            let watermark = Gkmv2Watermark {
                full_ratcheting_count,
                self_ratcheting_count,
            };

            if !channel.set_supports_gkmv2(watermark) {
                return Ok((false, Effects::new()));
            }

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutChannel(channel));
            self.commit(batch)?;

            Ok((true, Effects::new()))
        })
    }

    /// Records that a full-ratchet handshake message was just sent.
    pub fn mark_full_ratchet_message_sent(&self, identity: &ChannelIdentity) -> Result<(), Error> {
        self.locked(identity, false, || {
            let mut channel = self.load_channel(identity)?;
            channel.mark_full_ratchet_message_sent(self.clock.now());

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutChannel(channel));
            self.commit(batch)?;

            Ok(((), Effects::new()))
        })
    }

    /// Applies the send side of a completed full ratchet.
    pub fn update_send_seed(
        &self,
        identity: &ChannelIdentity,
        raw_seed: &Seed,
        suite_version: u32,
    ) -> Result<(), Error> {
        self.locked(identity, false, || {
            let mut channel = self.load_channel(identity)?;
            let suite = self.suites.suite(suite_version)?;
            channel.update_send_seed(raw_seed, suite.as_ref(), self.clock.now())?;

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutChannel(channel));
            self.commit(batch)?;

            Ok(((), Effects::new()))
        })
    }

    /// Applies the receive side of a completed full ratchet.
    ///
    /// Returns the epoch of the new provision. Older provisions keep working
    /// until a message of the new epoch arrives.
    pub fn create_next_provision(
        &self,
        identity: &ChannelIdentity,
        raw_seed: &Seed,
        suite_version: u32,
    ) -> Result<u32, Error> {
        self.locked(identity, false, || {
            let mut channel = self.load_channel(identity)?;
            let suite = self.suites.suite(suite_version)?;
            let (provision, keys) =
                channel.create_next_provision(raw_seed, suite.as_ref(), &self.config)?;
            let epoch = provision.full_ratcheting_count();

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutChannel(channel));
            batch.push(WriteOp::PutProvision(provision));
            for key in keys {
                batch.push(WriteOp::PutKeyMaterial(key));
            }
            self.commit(batch)?;

            Ok((epoch, Effects::new()))
        })
    }

    /// Deletes a channel with its provisions and key material.
    ///
    /// Returns false if the channel did not exist.
    pub fn delete_channel(&self, identity: &ChannelIdentity) -> Result<bool, Error> {
        let deleted = match self.locked(identity, false, || {
            if self.store.channel(identity)?.is_none() {
                return Ok((false, Effects::new()));
            }

            let mut batch = WriteBatch::new();
            batch.push(WriteOp::DeleteChannel(*identity));
            self.commit(batch)?;

            let mut effects = Effects::new();
            effects.push(PendingEffect::NotifyDeleted(*identity));
            debug!(channel = %identity, "channel deleted");
            Ok((true, effects))
        }) {
            Err(Error::UnknownChannel) => false,
            result => result?,
        };

        self.release_lock(identity);
        Ok(deleted)
    }

    /// Deletes every channel between a local device and a remote user.
    ///
    /// Returns how many channels were deleted.
    pub fn delete_channels_with_remote_identity(
        &self,
        local_device_uid: &DeviceUid,
        remote_identity: &Identity,
    ) -> Result<usize, Error> {
        let mut deleted = 0;
        for channel in self.channels_for_local_device(local_device_uid)? {
            if channel.identity.remote_identity == *remote_identity
                && self.delete_channel(&channel.identity)?
            {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Gets a channel.
    pub fn channel(&self, identity: &ChannelIdentity) -> Result<Option<Channel>, Error> {
        Ok(self.store.channel(identity)?)
    }

    /// Lists every channel of a local device.
    pub fn channels_for_local_device(
        &self,
        local_device_uid: &DeviceUid,
    ) -> Result<Vec<Channel>, Error> {
        Ok(self.store.channels_for_local_device(local_device_uid)?)
    }

    /// Lists the remote devices of a user reachable from a local device over a
    /// confirmed channel.
    pub fn confirmed_remote_devices(
        &self,
        local_device_uid: &DeviceUid,
        remote_identity: &Identity,
    ) -> Result<Vec<DeviceUid>, Error> {
        Ok(self
            .channels_for_local_device(local_device_uid)?
            .into_iter()
            .filter(|channel| {
                channel.confirmed && channel.identity.remote_identity == *remote_identity
            })
            .map(|channel| channel.identity.remote_device_uid)
            .collect())
    }

    /// Purges key material whose grace period is over.
    pub fn delete_all_expired(&self) -> Result<usize, Error> {
        Ok(self.store.delete_expired_key_materials(self.clock.now())?)
    }

    /// Deletes provisions without key material left.
    pub fn delete_all_empty(&self) -> Result<usize, Error> {
        Ok(self.store.delete_empty_provisions()?)
    }

    /// Runs both purges, expired keys first so drained epochs go too.
    pub fn housekeeping(&self) -> Result<HousekeepingReport, Error> {
        let expired_key_materials = self.delete_all_expired()?;
        let empty_provisions = self.delete_all_empty()?;

        if expired_key_materials > 0 || empty_provisions > 0 {
            debug!(expired_key_materials, empty_provisions, "housekeeping done");
        }

        Ok(HousekeepingReport {
            expired_key_materials,
            empty_provisions,
        })
    }

    fn run_effects(&self, effects: Effects) {
        for effect in effects {
            match effect {
                PendingEffect::CheckFullRatchet(identity) => self.check_full_ratchet(&identity),
                PendingEffect::ResyncAfterConfirmation(identity) => self.resync(&identity),
                PendingEffect::NotifyConfirmed(identity) => self
                    .notification_sink
                    .notify(ChannelNotification::Confirmed(identity)),
                PendingEffect::NotifyDeleted(identity) => self
                    .notification_sink
                    .notify(ChannelNotification::Deleted(identity)),
            }
        }
    }

    fn check_full_ratchet(&self, identity: &ChannelIdentity) {
        match self.requires_full_ratchet(identity) {
            Ok(true) => {
                debug!(channel = %identity, "full ratchet required");
                if let Err(err) = self.full_ratchet_starter.start_full_ratchet(identity) {
                    warn!(channel = %identity, error = %err, "failed to start full ratchet");
                }
            }
            Ok(false) => {}
            Err(err) => {
                warn!(channel = %identity, error = %err, "failed to evaluate full-ratchet policy");
            }
        }
    }

    fn resync(&self, identity: &ChannelIdentity) {
        let delegate = &self.identity_delegate;
        if let Err(err) = delegate.refresh_group_memberships(identity) {
            warn!(channel = %identity, error = %err, "failed to refresh group memberships");
        }
        if let Err(err) = delegate.reinvite_to_pending_groups(identity) {
            warn!(channel = %identity, error = %err, "failed to re-invite to groups");
        }
        if let Err(err) = delegate.resend_gkmv2_keys(identity) {
            warn!(channel = %identity, error = %err, "failed to resend GKMv2 keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::ProvisionIdentity;
    use ed25519_dalek::SigningKey;

    fn manager(config: ChannelConfig) -> ChannelManager<MemoryStore> {
        ChannelManager::new(MemoryStore::new(), config).unwrap()
    }

    fn create(manager: &ChannelManager<MemoryStore>) -> ChannelIdentity {
        let remote = Identity::from(SigningKey::from_bytes(&[1u8; 32]).verifying_key());
        manager
            .create_channel(
                DeviceUid::from([0xA1; 32]),
                DeviceUid::from([0xB1; 32]),
                remote,
                &Seed::from([3u8; 32]),
                0,
            )
            .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ChannelConfig {
            max_unwrap_candidates: 0,
            ..ChannelConfig::default()
        };
        assert!(matches!(
            ChannelManager::new(MemoryStore::new(), config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_lock_survives_recreation_while_held() {
        let manager = manager(ChannelConfig::default());
        let identity = create(&manager);

        let held = manager.channel_lock(&identity, false).unwrap();
        assert!(manager.delete_channel(&identity).unwrap());
        assert_eq!(create(&manager), identity);

        let again = manager.channel_lock(&identity, false).unwrap();
        assert!(Arc::ptr_eq(&held, &again));

        let _guard = held.lock().unwrap();
        assert!(again.try_lock().is_err());
    }

    #[test]
    fn test_lock_registry_only_tracks_live_channels() {
        let manager = manager(ChannelConfig::default());
        let remote = Identity::from(SigningKey::from_bytes(&[1u8; 32]).verifying_key());
        let unknown = ChannelIdentity::new(
            DeviceUid::from([0xA1; 32]),
            DeviceUid::from([0xB2; 32]),
            remote,
        );

        assert_eq!(
            manager.wrap(&unknown, &[7u8; 32], WrapKind::Regular),
            Err(Error::UnknownChannel)
        );
        assert_eq!(manager.confirm(&unknown), Err(Error::UnknownChannel));
        assert!(!manager.delete_channel(&unknown).unwrap());
        assert!(manager.locks.lock().unwrap().is_empty());

        let identity = create(&manager);
        assert_eq!(manager.locks.lock().unwrap().len(), 1);

        assert!(manager.delete_channel(&identity).unwrap());
        assert!(manager.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_create_leaves_no_lock() {
        let manager = manager(ChannelConfig::default());
        let remote = Identity::from(SigningKey::from_bytes(&[1u8; 32]).verifying_key());

        let created = manager.create_channel(
            DeviceUid::from([0xA1; 32]),
            DeviceUid::from([0xB1; 32]),
            remote,
            &Seed::from([3u8; 32]),
            42,
        );
        assert!(matches!(created, Err(Error::Crypto(_))));
        assert!(manager.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_candidate_purged_by_housekeeping_is_skipped() {
        let manager = manager(ChannelConfig {
            reprovisioning_threshold: 1,
            ..ChannelConfig::default()
        });
        let identity = create(&manager);
        let provision = ProvisionIdentity::new(identity, 0);
        let candidate = manager.store().key_material(&provision, 0).unwrap().unwrap();

        // Drain the provision the way the purges do, outside the channel lock.
        let mut batch = WriteBatch::new();
        for self_ratcheting_count in 0..2 {
            batch.push(WriteOp::DeleteKeyMaterial {
                provision,
                self_ratcheting_count,
            });
        }
        manager.store().apply(batch).unwrap();
        assert_eq!(manager.delete_all_empty().unwrap(), 1);

        assert!(manager
            .try_candidate(&candidate, &[0u8; 64])
            .unwrap()
            .is_none());
    }
}
