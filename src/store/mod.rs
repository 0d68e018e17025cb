//! Repository interface for channel state.
//!
//! The ratchet logic never touches storage directly: it reads records through
//! [`ChannelStore`] and hands every mutation back as a [`WriteBatch`] that the
//! store applies atomically. Backends only need to honour that contract.

mod memory;
pub use memory::MemoryStore;

use crate::channel::{Channel, KeyMaterialCounts, Provision, ProvisionedKeyMaterial};
use crate::{ChannelIdentity, DeviceUid, KeyId, ProvisionIdentity};
use std::time::SystemTime;

/// Errors raised by store backends.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or the write did not land.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write would break a relation between records.
    #[error("store invariant violated: {0}")]
    Invariant(String),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// One mutation of a [`WriteBatch`].
#[derive(Clone, Debug)]
pub enum WriteOp {
    /// Inserts or replaces a channel.
    PutChannel(Channel),
    /// Deletes a channel with all its provisions and key material.
    DeleteChannel(ChannelIdentity),
    /// Inserts or replaces a provision. Its channel must exist.
    PutProvision(Provision),
    /// Inserts a key. Its provision must exist.
    PutKeyMaterial(ProvisionedKeyMaterial),
    /// Deletes one key.
    DeleteKeyMaterial {
        /// Owning provision.
        provision: ProvisionIdentity,
        /// Position of the key in the provision.
        self_ratcheting_count: u32,
    },
    /// Sets `expiration` on every key of `channel` whose epoch is lower than
    /// `below` and which has no expiration yet.
    ExpireSupersededKeyMaterial {
        /// Channel whose older epochs are superseded.
        channel: ChannelIdentity,
        /// First epoch that is not superseded.
        below: u32,
        /// Expiration to set.
        expiration: SystemTime,
    },
}

/// Mutations committed together or not at all.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mutation.
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Returns the mutations in application order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Returns true when the batch holds no mutation.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = WriteOp;
    type IntoIter = std::vec::IntoIter<WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Durable storage of channels, provisions and key material.
///
/// Records are addressed by their composite identities. Reads may run
/// concurrently; [`ChannelStore::apply`] must be atomic.
pub trait ChannelStore: Send + Sync {
    /// Gets a channel by identity.
    fn channel(&self, identity: &ChannelIdentity) -> Result<Option<Channel>>;

    /// Lists every channel of a local device.
    fn channels_for_local_device(&self, local_device_uid: &DeviceUid) -> Result<Vec<Channel>>;

    /// Gets a provision by identity.
    fn provision(&self, identity: &ProvisionIdentity) -> Result<Option<Provision>>;

    /// Lists the provisions of a channel, oldest epoch first.
    fn provisions_for_channel(&self, channel: &ChannelIdentity) -> Result<Vec<Provision>>;

    /// Gets one key by its position in a provision.
    fn key_material(
        &self,
        provision: &ProvisionIdentity,
        self_ratcheting_count: u32,
    ) -> Result<Option<ProvisionedKeyMaterial>>;

    /// Finds at most `limit` keys with `key_id` on channels of a local device.
    fn key_materials_for_key_id(
        &self,
        key_id: &KeyId,
        local_device_uid: &DeviceUid,
        limit: usize,
    ) -> Result<Vec<ProvisionedKeyMaterial>>;

    /// Counts the keys of a provision.
    fn key_material_counts(&self, provision: &ProvisionIdentity) -> Result<KeyMaterialCounts>;

    /// Applies every mutation of `batch`, or none of them.
    fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// Deletes every key whose expiration is at or before `now`.
    ///
    /// Returns how many keys were deleted.
    fn delete_expired_key_materials(&self, now: SystemTime) -> Result<usize>;

    /// Deletes every provision without key material.
    ///
    /// Returns how many provisions were deleted.
    fn delete_empty_provisions(&self) -> Result<usize>;
}
