use crate::Error;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

const OUTPUT_LENGTH: usize = 32;

/// HMAC-DRBG over SHA-256 (NIST SP 800-90A, no reseeding).
///
/// The whole output stream is a deterministic function of the seed, which is
/// what lets two devices walk the same ratchet independently.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct HmacDrbg {
    key: [u8; OUTPUT_LENGTH],
    value: [u8; OUTPUT_LENGTH],
}

impl HmacDrbg {
    pub(crate) fn new(seed: &[u8]) -> Result<Self, Error> {
        let mut drbg = Self {
            key: [0x00; OUTPUT_LENGTH],
            value: [0x01; OUTPUT_LENGTH],
        };
        drbg.update(seed)?;
        Ok(drbg)
    }

    fn mac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; OUTPUT_LENGTH], Error> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))?;
        for part in parts {
            mac.update(part);
        }

        let mut out = [0u8; OUTPUT_LENGTH];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    fn update(&mut self, provided: &[u8]) -> Result<(), Error> {
        self.key = Self::mac(&self.key, &[&self.value, &[0x00], provided])?;
        self.value = Self::mac(&self.key, &[&self.value])?;

        if !provided.is_empty() {
            self.key = Self::mac(&self.key, &[&self.value, &[0x01], provided])?;
            self.value = Self::mac(&self.key, &[&self.value])?;
        }

        Ok(())
    }

    /// Fills `out` with the next bytes of the stream.
    pub(crate) fn fill(&mut self, out: &mut [u8]) -> Result<(), Error> {
        for chunk in out.chunks_mut(OUTPUT_LENGTH) {
            self.value = Self::mac(&self.key, &[&self.value])?;
            chunk.copy_from_slice(&self.value[..chunk.len()]);
        }
        self.update(&[])
    }
}
