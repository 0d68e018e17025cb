#[macro_use]
extern crate afl;
use channel_ratchet::{Channel, Provision, ProvisionedKeyMaterial};

fn main() {
    fuzz!(|data: &[u8]| {
        let _ = Channel::deserialize(data);
        let _ = Provision::deserialize(data);
        let _ = ProvisionedKeyMaterial::deserialize(data);
    });
}
