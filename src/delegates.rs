use crate::{ChannelIdentity, Error};

/// Starts the full-ratchet handshake of a channel.
///
/// Called after commit, fire-and-forget. A failure is only logged: the policy
/// is evaluated again on the next send or receive.
pub trait FullRatchetStarter: Send + Sync {
    /// Begins (or restarts) the handshake for `channel`.
    fn start_full_ratchet(&self, channel: &ChannelIdentity) -> Result<(), Error>;
}

/// Hooks into identity and group management, run when a channel is first confirmed.
pub trait IdentityDelegate: Send + Sync {
    /// Resends the group memberships shared with the peer.
    fn refresh_group_memberships(&self, channel: &ChannelIdentity) -> Result<(), Error>;

    /// Re-invites the peer to groups whose invitation may have been lost.
    fn reinvite_to_pending_groups(&self, channel: &ChannelIdentity) -> Result<(), Error>;

    /// Resends the current GKMv2 group key batches to the peer.
    fn resend_gkmv2_keys(&self, channel: &ChannelIdentity) -> Result<(), Error>;
}

/// Lifecycle events published to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelNotification {
    /// First successful decryption on the channel.
    Confirmed(ChannelIdentity),
    /// The channel and everything it owned were deleted.
    Deleted(ChannelIdentity),
}

/// Receives [`ChannelNotification`]s.
pub trait NotificationSink: Send + Sync {
    /// Publishes one notification.
    fn notify(&self, notification: ChannelNotification);
}

/// Collaborator that ignores every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct Noop;

impl FullRatchetStarter for Noop {
    fn start_full_ratchet(&self, _channel: &ChannelIdentity) -> Result<(), Error> {
        Ok(())
    }
}

impl IdentityDelegate for Noop {
    fn refresh_group_memberships(&self, _channel: &ChannelIdentity) -> Result<(), Error> {
        Ok(())
    }

    fn reinvite_to_pending_groups(&self, _channel: &ChannelIdentity) -> Result<(), Error> {
        Ok(())
    }

    fn resend_gkmv2_keys(&self, _channel: &ChannelIdentity) -> Result<(), Error> {
        Ok(())
    }
}

impl NotificationSink for Noop {
    fn notify(&self, _notification: ChannelNotification) {}
}
