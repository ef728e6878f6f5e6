//! Wire format for `wharfrat-mux`: an 8-byte header followed by `len` bytes
//! of payload. Big-endian throughout.
//!
//! ```text
//! 0               4               8
//! +---------------+---------------+
//! |   channel id  | flags | length|
//! +---------------+---------------+
//! |            payload...         |
//! +--------------------------------
//! ```
//!
//! The high bit of the length word marks an ack/error frame (payload is
//! empty on success, a UTF-8 error message otherwise). A data frame with
//! `len == 0` means "close this channel".

pub const HEADER_LEN: usize = 8;

/// High bit of the length word. Set on frames that are acknowledging a
/// previous data frame rather than carrying new data.
const ACK_FLAG: u32 = 0x8000_0000;

/// Largest payload a single frame may carry: the length word minus its ack
/// bit.
pub const MAX_CHUNK: usize = 0x7fff_ffff;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub channel: u32,
    pub is_ack: bool,
    pub len: u32,
}

impl FrameHeader {
    #[must_use]
    pub fn data(channel: u32, len: u32) -> Self {
        debug_assert!(len as usize <= MAX_CHUNK);
        Self { channel, is_ack: false, len }
    }

    #[must_use]
    pub fn ack(channel: u32, len: u32) -> Self {
        debug_assert!(len as usize <= MAX_CHUNK);
        Self { channel, is_ack: true, len }
    }

    #[must_use]
    pub fn is_close(&self) -> bool {
        !self.is_ack && self.len == 0
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.channel.to_be_bytes());
        let flagged = self.len | if self.is_ack { ACK_FLAG } else { 0 };
        buf[4..8].copy_from_slice(&flagged.to_be_bytes());
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        let channel = u32::from_be_bytes(buf[0..4].try_into().expect("4 bytes"));
        let word = u32::from_be_bytes(buf[4..8].try_into().expect("4 bytes"));
        Self { channel, is_ack: word & ACK_FLAG != 0, len: word & !ACK_FLAG }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_data_frame() {
        let hdr = FrameHeader::data(7, 1234);
        assert_eq!(FrameHeader::decode(&hdr.encode()), hdr);
        assert!(!hdr.is_ack);
    }

    #[test]
    fn round_trips_ack_frame() {
        let hdr = FrameHeader::ack(7, 0);
        let encoded = hdr.encode();
        assert_eq!(encoded[4] & 0x80, 0x80);
        assert_eq!(FrameHeader::decode(&encoded), hdr);
    }

    #[test]
    fn close_is_a_zero_length_data_frame() {
        assert!(FrameHeader::data(3, 0).is_close());
        assert!(!FrameHeader::ack(3, 0).is_close());
        assert!(!FrameHeader::data(3, 1).is_close());
    }

    #[test]
    fn max_chunk_leaves_ack_bit_free() {
        assert_eq!(MAX_CHUNK as u32 & 0x8000_0000, 0);
    }
}
