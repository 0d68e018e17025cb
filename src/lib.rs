mod types;
pub use types::*;

pub mod crypto;

mod ratchet;
pub use ratchet::*;

mod error;
pub use error::Error;

mod config;
pub use config::ChannelConfig;

pub mod channel;
pub use channel::{Channel, Gkmv2Watermark, Provision, ProvisionedKeyMaterial, WrapKind};

pub mod clock;
pub mod delegates;
pub mod effects;
pub mod store;

mod proto;

mod manager;
pub use manager::*;
