//! In-memory implementation of [`ChannelStore`].
//!
//! Mostly for tests and hosts without persistence. A batch is checked against
//! the current state first and then applied in place, so a rejected batch
//! changes nothing.

use super::{ChannelStore, Result, StoreError, WriteBatch, WriteOp};
use crate::channel::{Channel, KeyMaterialCounts, Provision, ProvisionedKeyMaterial};
use crate::{ChannelIdentity, DeviceUid, KeyId, ProvisionIdentity};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use std::time::SystemTime;

type KeyMaterialId = (ProvisionIdentity, u32);

/// Thread-safe in-memory store. Everything is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

/// Positions of the keys of one provision.
#[derive(Default)]
struct ProvisionKeys {
    positions: BTreeSet<u32>,
    non_expiring: usize,
}

#[derive(Default)]
struct MemoryStoreInner {
    channels: HashMap<ChannelIdentity, Channel>,
    /// Epochs of the provisions of each channel.
    epochs: HashMap<ChannelIdentity, BTreeSet<u32>>,
    provisions: HashMap<ProvisionIdentity, Provision>,
    /// One entry per stored provision.
    provision_keys: HashMap<ProvisionIdentity, ProvisionKeys>,
    key_materials: HashMap<KeyMaterialId, ProvisionedKeyMaterial>,
    /// Lookup index: (key id, local device) -> key materials.
    key_index: HashMap<(KeyId, DeviceUid), Vec<KeyMaterialId>>,
    /// Keys carrying an expiration.
    expiring: HashSet<KeyMaterialId>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of key-material rows, across all channels.
    pub fn key_material_len(&self) -> Result<usize> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.key_materials.len())
    }

    /// Returns the total number of provisions, across all channels.
    pub fn provision_len(&self) -> Result<usize> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.provisions.len())
    }
}

impl MemoryStoreInner {
    /// Replays the ownership rules of `batch` without touching the state.
    fn validate(&self, batch: &WriteBatch) -> Result<()> {
        let mut staged_channels: HashMap<ChannelIdentity, bool> = HashMap::new();
        let mut staged_provisions: HashSet<ProvisionIdentity> = HashSet::new();
        let mut deleted_channels: HashSet<ChannelIdentity> = HashSet::new();

        for op in batch.ops() {
            match op {
                WriteOp::PutChannel(channel) => {
                    staged_channels.insert(channel.identity, true);
                }
                WriteOp::DeleteChannel(identity) => {
                    staged_channels.insert(*identity, false);
                    deleted_channels.insert(*identity);
                    staged_provisions.retain(|provision| provision.channel != *identity);
                }
                WriteOp::PutProvision(provision) => {
                    let channel = &provision.identity.channel;
                    let channel_exists = staged_channels
                        .get(channel)
                        .copied()
                        .unwrap_or_else(|| self.channels.contains_key(channel));
                    if !channel_exists {
                        return Err(StoreError::Invariant(
                            "Provision without owning channel".to_string(),
                        ));
                    }
                    staged_provisions.insert(provision.identity);
                }
                WriteOp::PutKeyMaterial(key) => {
                    let provision_exists = staged_provisions.contains(&key.provision)
                        || (!deleted_channels.contains(&key.provision.channel)
                            && self.provisions.contains_key(&key.provision));
                    if !provision_exists {
                        return Err(StoreError::Invariant(
                            "Key material without owning provision".to_string(),
                        ));
                    }
                }
                WriteOp::DeleteKeyMaterial { .. }
                | WriteOp::ExpireSupersededKeyMaterial { .. } => {}
            }
        }

        Ok(())
    }

    fn insert_provision(&mut self, provision: Provision) {
        let identity = provision.identity;
        self.epochs
            .entry(identity.channel)
            .or_default()
            .insert(identity.full_ratcheting_count);
        self.provision_keys.entry(identity).or_default();
        self.provisions.insert(identity, provision);
    }

    fn insert_key_material(&mut self, key: ProvisionedKeyMaterial) {
        let id = (key.provision, key.self_ratcheting_count);
        self.remove_key_material(&id);

        let keys = self.provision_keys.entry(key.provision).or_default();
        keys.positions.insert(key.self_ratcheting_count);
        if key.expiration.is_none() {
            keys.non_expiring += 1;
        } else {
            self.expiring.insert(id);
        }

        self.key_index
            .entry((key.key_id, key.provision.channel.local_device_uid))
            .or_default()
            .push(id);
        self.key_materials.insert(id, key);
    }

    fn remove_key_material(&mut self, id: &KeyMaterialId) {
        let Some(key) = self.key_materials.remove(id) else {
            return;
        };

        let index_key = (key.key_id, key.provision.channel.local_device_uid);
        if let Some(ids) = self.key_index.get_mut(&index_key) {
            ids.retain(|candidate| candidate != id);
            if ids.is_empty() {
                self.key_index.remove(&index_key);
            }
        }

        let was_expiring = self.expiring.remove(id);
        if let Some(keys) = self.provision_keys.get_mut(&id.0) {
            keys.positions.remove(&id.1);
            if !was_expiring {
                keys.non_expiring = keys.non_expiring.saturating_sub(1);
            }
        }
    }

    fn remove_provision(&mut self, identity: &ProvisionIdentity) {
        self.provisions.remove(identity);
        if let Some(epochs) = self.epochs.get_mut(&identity.channel) {
            epochs.remove(&identity.full_ratcheting_count);
            if epochs.is_empty() {
                self.epochs.remove(&identity.channel);
            }
        }

        let Some(keys) = self.provision_keys.remove(identity) else {
            return;
        };
        for position in keys.positions {
            self.remove_key_material(&(*identity, position));
        }
    }

    fn remove_channel(&mut self, identity: &ChannelIdentity) {
        self.channels.remove(identity);
        let epochs = self.epochs.remove(identity).unwrap_or_default();
        for epoch in epochs {
            self.remove_provision(&ProvisionIdentity::new(*identity, epoch));
        }
    }

    fn expire_superseded(
        &mut self,
        channel: ChannelIdentity,
        below: u32,
        expiration: SystemTime,
    ) {
        let Some(epochs) = self.epochs.get(&channel) else {
            return;
        };

        for epoch in epochs.range(..below) {
            let provision = ProvisionIdentity::new(channel, *epoch);
            let Some(keys) = self.provision_keys.get_mut(&provision) else {
                continue;
            };
            if keys.non_expiring == 0 {
                continue;
            }

            for position in &keys.positions {
                let id = (provision, *position);
                if let Some(key) = self.key_materials.get_mut(&id) {
                    if key.expiration.is_none() {
                        key.expire_at(expiration);
                        self.expiring.insert(id);
                    }
                }
            }
            keys.non_expiring = 0;
        }
    }

    /// Applies one validated mutation.
    fn apply_op(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutChannel(channel) => {
                self.channels.insert(channel.identity, channel);
            }
            WriteOp::DeleteChannel(identity) => self.remove_channel(&identity),
            WriteOp::PutProvision(provision) => self.insert_provision(provision),
            WriteOp::PutKeyMaterial(key) => self.insert_key_material(key),
            WriteOp::DeleteKeyMaterial {
                provision,
                self_ratcheting_count,
            } => self.remove_key_material(&(provision, self_ratcheting_count)),
            WriteOp::ExpireSupersededKeyMaterial {
                channel,
                below,
                expiration,
            } => self.expire_superseded(channel, below, expiration),
        }
    }
}

impl ChannelStore for MemoryStore {
    fn channel(&self, identity: &ChannelIdentity) -> Result<Option<Channel>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.channels.get(identity).cloned())
    }

    fn channels_for_local_device(&self, local_device_uid: &DeviceUid) -> Result<Vec<Channel>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .channels
            .values()
            .filter(|channel| channel.identity.local_device_uid == *local_device_uid)
            .cloned()
            .collect())
    }

    fn provision(&self, identity: &ProvisionIdentity) -> Result<Option<Provision>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.provisions.get(identity).cloned())
    }

    fn provisions_for_channel(&self, channel: &ChannelIdentity) -> Result<Vec<Provision>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let Some(epochs) = inner.epochs.get(channel) else {
            return Ok(Vec::new());
        };

        Ok(epochs
            .iter()
            .filter_map(|epoch| {
                inner
                    .provisions
                    .get(&ProvisionIdentity::new(*channel, *epoch))
            })
            .cloned()
            .collect())
    }

    fn key_material(
        &self,
        provision: &ProvisionIdentity,
        self_ratcheting_count: u32,
    ) -> Result<Option<ProvisionedKeyMaterial>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .key_materials
            .get(&(*provision, self_ratcheting_count))
            .cloned())
    }

    fn key_materials_for_key_id(
        &self,
        key_id: &KeyId,
        local_device_uid: &DeviceUid,
        limit: usize,
    ) -> Result<Vec<ProvisionedKeyMaterial>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let Some(ids) = inner.key_index.get(&(*key_id, *local_device_uid)) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| inner.key_materials.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn key_material_counts(&self, provision: &ProvisionIdentity) -> Result<KeyMaterialCounts> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .provision_keys
            .get(provision)
            .map(|keys| KeyMaterialCounts {
                total: keys.positions.len(),
                non_expiring: keys.non_expiring,
            })
            .unwrap_or_default())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        inner.validate(&batch)?;
        for op in batch {
            inner.apply_op(op);
        }

        Ok(())
    }

    fn delete_expired_key_materials(&self, now: SystemTime) -> Result<usize> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let expired: Vec<KeyMaterialId> = inner
            .expiring
            .iter()
            .filter(|id| {
                inner
                    .key_materials
                    .get(id)
                    .is_some_and(|key| key.is_expired(now))
            })
            .copied()
            .collect();
        for id in &expired {
            inner.remove_key_material(id);
        }

        Ok(expired.len())
    }

    fn delete_empty_provisions(&self) -> Result<usize> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let empty: Vec<ProvisionIdentity> = inner
            .provision_keys
            .iter()
            .filter(|(_, keys)| keys.positions.is_empty())
            .map(|(identity, _)| *identity)
            .collect();
        for identity in &empty {
            inner.remove_provision(identity);
        }

        Ok(empty.len())
    }
}
