// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Length-framed VSOA packet codec.
//!
//! A VSOA packet is a fixed 12-byte header (network byte order for every
//! multibyte field) followed immediately by the URL bytes and then the data
//! payload:
//!
//! ```text
//! +-------+---------+------+--------+---------+-------+----------+-----+------+
//! | magic | version | type | status | url_len | seqno | data_len | url | data |
//! |  u8   |   u8    |  u8  |  u8    |  u16    |  u16  |   u32    | ... | ...  |
//! +-------+---------+------+--------+---------+-------+----------+-----+------+
//! ```
//!
//! `PacketBuilder` assembles an outgoing frame field by field. `Reassembler`
//! consumes arbitrarily-chunked socket reads and emits whole frames, built on
//! the same accumulator-buffer approach as `hdds`'s TCP transport framing,
//! generalized from a flat 4-byte length prefix to the 12-byte VSOA header.

mod header;
mod reassembler;

pub use header::{Header, MsgType, Status, HEADER_LEN, MAGIC, VERSION};
pub use reassembler::{PacketView, Reassembler};

/// Hard cap on a full packet: 12-byte header + url + data.
pub const MAX_PACKET_LENGTH: usize = 131_072;

/// Hard cap on `url_len + data_len`.
pub const MAX_DATA_LENGTH: usize = MAX_PACKET_LENGTH - HEADER_LEN;

/// Incrementally builds one framed packet into an owned buffer.
///
/// `set_url` is only legal while `data_len == 0` (matching the source's
/// ordering requirement that the URL is written before the payload);
/// `set_payload` may be called repeatedly and replaces the previous payload.
pub struct PacketBuilder {
    buf: Vec<u8>,
    url_len: u16,
    data_len: u32,
}

impl PacketBuilder {
    /// Start a new packet with the header fields filled in and
    /// `url_len = data_len = 0`.
    pub fn new(msg_type: MsgType, status: Status, seqno: u16) -> Self {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = MAGIC;
        buf[1] = VERSION;
        buf[2] = msg_type as u8;
        buf[3] = status as u8;
        buf[6..8].copy_from_slice(&seqno.to_be_bytes());
        Self {
            buf,
            url_len: 0,
            data_len: 0,
        }
    }

    /// Set the URL payload. Fails with `ARGUMENTS` semantics if the data
    /// payload has already been set, or if the combined length would exceed
    /// `MAX_DATA_LENGTH`.
    pub fn set_url(&mut self, url: &[u8]) -> crate::Result<&mut Self> {
        if self.data_len != 0 {
            return Err(crate::Error::InvalidArg(
                "set_url called after set_payload".into(),
            ));
        }
        let new_len = url.len() + self.data_len as usize;
        if new_len > MAX_DATA_LENGTH || url.len() > u16::MAX as usize {
            return Err(crate::Error::InvalidArg(
                "url_len + data_len exceeds MAX_DATA_LENGTH".into(),
            ));
        }
        self.buf.truncate(HEADER_LEN);
        self.buf.extend_from_slice(url);
        self.url_len = url.len() as u16;
        Ok(self)
    }

    /// Set (or replace) the data payload.
    pub fn set_payload(&mut self, payload: &[u8]) -> crate::Result<&mut Self> {
        let new_total = self.url_len as usize + payload.len();
        if new_total > MAX_DATA_LENGTH {
            return Err(crate::Error::InvalidArg(
                "url_len + data_len exceeds MAX_DATA_LENGTH".into(),
            ));
        }
        self.buf.truncate(HEADER_LEN + self.url_len as usize);
        self.buf.extend_from_slice(payload);
        self.data_len = payload.len() as u32;
        Ok(self)
    }

    /// Patch the header's length fields and return the framed bytes, ready
    /// to write to the socket in one scatter/gather send.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf[4..6].copy_from_slice(&self.url_len.to_be_bytes());
        self.buf[8..12].copy_from_slice(&self.data_len.to_be_bytes());
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_header_and_body() {
        let mut pkt = PacketBuilder::new(MsgType::Rpc, Status::Ok, 42);
        pkt.set_url(b"/foo/bar").unwrap();
        pkt.set_payload(b"hello").unwrap();
        let framed = pkt.finish();

        assert_eq!(framed.len(), HEADER_LEN + 8 + 5);
        let header = Header::parse(&framed[..HEADER_LEN]).unwrap();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, VERSION);
        assert_eq!(header.msg_type(), Some(MsgType::Rpc));
        assert_eq!(header.seqno, 42);
        assert_eq!(header.url_len, 8);
        assert_eq!(header.data_len, 5);
        assert_eq!(&framed[HEADER_LEN..HEADER_LEN + 8], b"/foo/bar");
        assert_eq!(&framed[HEADER_LEN + 8..], b"hello");
    }

    #[test]
    fn set_url_after_payload_rejected() {
        let mut pkt = PacketBuilder::new(MsgType::Publish, Status::Ok, 0);
        pkt.set_payload(b"x").unwrap();
        assert!(pkt.set_url(b"/a").is_err());
    }

    #[test]
    fn oversized_url_rejected() {
        let mut pkt = PacketBuilder::new(MsgType::Publish, Status::Ok, 0);
        let huge = vec![b'a'; MAX_DATA_LENGTH + 1];
        assert!(pkt.set_url(&huge).is_err());
    }

    #[test]
    fn empty_url_and_payload_is_legal() {
        // A header-only packet (no url, no data) is a legal, complete frame.
        let pkt = PacketBuilder::new(MsgType::ReplyFlag, Status::Ok, 7);
        let framed = pkt.finish();
        assert_eq!(framed.len(), HEADER_LEN);
    }
}
