// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stream reassembly for VSOA's sticky-packet framing.
//!
//! Generalizes the accumulator-buffer approach `hdds` uses for its TCP
//! transport framing from a flat 4-byte length prefix to the 12-byte VSOA
//! header + URL + data shape.

use super::header::{Header, HEADER_LEN};
use crate::Result;

#[derive(Debug, Clone, Copy)]
enum State {
    ReadingHeader,
    ReadingBody { total_len: usize },
}

/// Borrowed view of one fully assembled packet. The callback passed to
/// `Reassembler::feed` must not retain this past its return — the backing
/// buffer is reused for the next packet as soon as the callback returns.
pub struct PacketView<'a> {
    pub header: Header,
    pub url: &'a [u8],
    pub data: &'a [u8],
}

/// Carries at most one header's worth of header bytes plus one whole
/// payload, per connection.
pub struct Reassembler {
    buf: Vec<u8>,
    cur_len: usize,
    state: State,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; HEADER_LEN],
            cur_len: 0,
            state: State::ReadingHeader,
        }
    }

    /// Feed a freshly-read slice of socket bytes. Invokes `on_packet` once
    /// per fully assembled packet found in `input`, in order.
    ///
    /// On a magic/version mismatch or an oversized packet, returns `Err` and
    /// leaves the rest of `input` undelivered; the caller must close the
    /// session in that case. The reassembler does not attempt to
    /// resynchronize within the buffer.
    pub fn feed<F>(&mut self, mut input: &[u8], mut on_packet: F) -> Result<()>
    where
        F: FnMut(PacketView<'_>),
    {
        while !input.is_empty() {
            match self.state {
                State::ReadingHeader => {
                    let need = HEADER_LEN - self.cur_len;
                    let take = need.min(input.len());
                    self.buf[self.cur_len..self.cur_len + take]
                        .copy_from_slice(&input[..take]);
                    self.cur_len += take;
                    input = &input[take..];

                    if self.cur_len < HEADER_LEN {
                        return Ok(());
                    }

                    let header = Header::parse(&self.buf[..HEADER_LEN])?;
                    let total_len = header.validate()?;
                    if total_len == HEADER_LEN {
                        // Header-only packet (empty url + empty data).
                        on_packet(PacketView {
                            header,
                            url: &[],
                            data: &[],
                        });
                        self.cur_len = 0;
                        self.state = State::ReadingHeader;
                        continue;
                    }
                    self.buf.resize(total_len, 0);
                    self.state = State::ReadingBody { total_len };
                }
                State::ReadingBody { total_len } => {
                    let need = total_len - self.cur_len;
                    let take = need.min(input.len());
                    self.buf[self.cur_len..self.cur_len + take]
                        .copy_from_slice(&input[..take]);
                    self.cur_len += take;
                    input = &input[take..];

                    if self.cur_len < total_len {
                        return Ok(());
                    }

                    let header = Header::parse(&self.buf[..HEADER_LEN])?;
                    let url_end = HEADER_LEN + header.url_len as usize;
                    on_packet(PacketView {
                        header,
                        url: &self.buf[HEADER_LEN..url_end],
                        data: &self.buf[url_end..total_len],
                    });

                    self.buf.resize(HEADER_LEN, 0);
                    self.cur_len = 0;
                    self.state = State::ReadingHeader;
                }
            }
        }
        Ok(())
    }

    /// True if a partial packet is currently buffered.
    pub fn is_partial(&self) -> bool {
        self.cur_len > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MsgType, PacketBuilder, Status};

    fn make_packet(url: &[u8], data: &[u8], seqno: u16) -> Vec<u8> {
        let mut b = PacketBuilder::new(MsgType::Publish, Status::Ok, seqno);
        b.set_url(url).unwrap();
        b.set_payload(data).unwrap();
        b.finish()
    }

    #[test]
    fn reassembles_single_packet_fed_whole() {
        let frame = make_packet(b"/tele/speed", b"42", 1);
        let mut r = Reassembler::new();
        let mut seen = Vec::new();
        r.feed(&frame, |pkt| {
            seen.push((pkt.url.to_vec(), pkt.data.to_vec()));
        })
        .unwrap();
        assert_eq!(seen, vec![(b"/tele/speed".to_vec(), b"42".to_vec())]);
        assert!(!r.is_partial());
    }

    #[test]
    fn reassembles_byte_by_byte_identically_to_one_slice() {
        let frame = make_packet(b"/tele/speed", b"42", 7);

        let mut whole = Reassembler::new();
        let mut whole_seen = Vec::new();
        whole
            .feed(&frame, |pkt| whole_seen.push(pkt.data.to_vec()))
            .unwrap();

        let mut piecewise = Reassembler::new();
        let mut piecewise_seen = Vec::new();
        for byte in &frame {
            piecewise
                .feed(std::slice::from_ref(byte), |pkt| {
                    piecewise_seen.push(pkt.data.to_vec())
                })
                .unwrap();
        }

        assert_eq!(whole_seen, piecewise_seen);
    }

    #[test]
    fn reassembles_multiple_packets_in_one_slice() {
        let mut stream = make_packet(b"/a", b"1", 1);
        stream.extend(make_packet(b"/b", b"22", 2));
        stream.extend(make_packet(b"/c", b"333", 3));

        let mut r = Reassembler::new();
        let mut seen = Vec::new();
        r.feed(&stream, |pkt| seen.push(pkt.header.seqno)).unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut frame = make_packet(b"/a", b"1", 1);
        frame[0] = 0xAB;
        let mut r = Reassembler::new();
        assert!(r.feed(&frame, |_| {}).is_err());
    }

    #[test]
    fn empty_url_empty_data_header_only_packet() {
        let b = PacketBuilder::new(MsgType::ReplyFlag, Status::Ok, 9);
        let frame = b.finish();
        let mut r = Reassembler::new();
        let mut count = 0;
        r.feed(&frame, |pkt| {
            count += 1;
            assert!(pkt.url.is_empty());
            assert!(pkt.data.is_empty());
        })
        .unwrap();
        assert_eq!(count, 1);
    }
}
