use crate::ChannelIdentity;

/// Side effect requested by a mutation, run once the mutation is committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PendingEffect {
    /// Evaluate the full-ratchet policy and start a handshake if it is due.
    CheckFullRatchet(ChannelIdentity),
    /// Resend group memberships, invitations and group keys to the peer.
    ResyncAfterConfirmation(ChannelIdentity),
    /// Tell the host the channel is now confirmed.
    NotifyConfirmed(ChannelIdentity),
    /// Tell the host the channel was deleted.
    NotifyDeleted(ChannelIdentity),
}

/// Effects accumulated while building one transaction.
///
/// Behaves like a small set: pushing an effect twice keeps one copy, so a
/// transaction touching a channel repeatedly still runs each effect once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Effects(Vec<PendingEffect>);

impl Effects {
    /// Creates an empty effect list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `effect` unless it is already pending.
    pub fn push(&mut self, effect: PendingEffect) {
        if !self.0.contains(&effect) {
            self.0.push(effect);
        }
    }

    /// Appends every effect of `other`.
    pub fn extend(&mut self, other: Effects) {
        for effect in other.0 {
            self.push(effect);
        }
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the pending effects in the order they were first requested.
    pub fn as_slice(&self) -> &[PendingEffect] {
        &self.0
    }
}

impl IntoIterator for Effects {
    type Item = PendingEffect;
    type IntoIter = std::vec::IntoIter<PendingEffect>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
