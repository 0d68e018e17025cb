mod header;
pub use header::ChannelHeader;

use crate::crypto::CryptoSuite;
use crate::{AEAD_KEY_LENGTH, AeadKey, DeviceUid, Error, KEY_ID_LENGTH, KeyId, SEED_LENGTH, Seed};
use zeroize::Zeroize;

/// Everything one self-ratchet step yields.
///
/// The three values are only ever handed out together, so a failed step can
/// never leave a caller holding an advanced seed without its key.
#[derive(Debug)]
pub struct RatchetStep {
    /// Seed replacing the one that was ratcheted.
    pub next_seed: Seed,
    /// Lookup key for `aead_key`.
    pub key_id: KeyId,
    /// One-time key.
    pub aead_key: AeadKey,
}

/// Advances `seed` by one step.
///
/// Deterministic: the same seed and suite always give the same step. The next
/// seed and the key id are successive draws of the PRNG seeded with `seed`, and
/// the AEAD key comes from the suite KDF applied to a third draw.
pub fn self_ratchet(seed: &Seed, suite: &dyn CryptoSuite) -> Result<RatchetStep, Error> {
    let mut prng = suite.prng(seed.as_bytes())?;

    let mut next_seed = [0u8; SEED_LENGTH];
    prng.fill(&mut next_seed)?;

    let mut key_id = [0u8; KEY_ID_LENGTH];
    prng.fill(&mut key_id)?;

    let mut key_material = [0u8; AEAD_KEY_LENGTH];
    prng.fill(&mut key_material)?;
    let aead_key = suite.derive_aead_key(&key_material);
    key_material.zeroize();

    let step = RatchetStep {
        next_seed: Seed::from(next_seed),
        key_id: KeyId::from(key_id),
        aead_key: aead_key?,
    };
    next_seed.zeroize();

    Ok(step)
}

/// Forks a raw shared seed into a root specific to `device_uid`.
///
/// Each side diversifies with its own uid for sending and with the peer's uid
/// for receiving, so the two directions of a channel never share a chain.
pub fn diversify(
    raw_seed: &Seed,
    device_uid: &DeviceUid,
    suite: &dyn CryptoSuite,
) -> Result<Seed, Error> {
    let mut input = Vec::with_capacity(SEED_LENGTH + device_uid.as_bytes().len());
    input.extend_from_slice(raw_seed.as_bytes());
    input.extend_from_slice(device_uid.as_bytes());

    let prng = suite.prng(&input);
    input.zeroize();

    let mut seed = [0u8; SEED_LENGTH];
    prng?.fill(&mut seed)?;

    let diversified = Seed::from(seed);
    seed.zeroize();
    Ok(diversified)
}
