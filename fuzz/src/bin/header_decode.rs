#[macro_use]
extern crate afl;
use channel_ratchet::ChannelHeader;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(header) = ChannelHeader::from_bytes(data) {
            assert_eq!(header.to_bytes(), data);
        }
    });
}
