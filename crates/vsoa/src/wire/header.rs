// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::{Error, Result};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 12;

/// Constant magic byte for every VSOA packet.
pub const MAGIC: u8 = 0x9;

/// Constant protocol version byte.
pub const VERSION: u8 = 0x1;

/// Packet type, carried in the header's `type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    ServInfo = 0x00,
    Rpc = 0x01,
    Subscribe = 0x02,
    Unsubscribe = 0x03,
    Publish = 0x04,
    Datagram = 0x05,
    ReplyFlag = 0xfc,
    Noop = 0xfe,
    PingEcho = 0xff,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::ServInfo),
            0x01 => Some(Self::Rpc),
            0x02 => Some(Self::Subscribe),
            0x03 => Some(Self::Unsubscribe),
            0x04 => Some(Self::Publish),
            0x05 => Some(Self::Datagram),
            0xfc => Some(Self::ReplyFlag),
            0xfe => Some(Self::Noop),
            0xff => Some(Self::PingEcho),
            _ => None,
        }
    }
}

/// Reply status code, carried in the header's `status` byte. Always `0` on
/// requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Password = 1,
    Arguments = 2,
    InvalidUrl = 3,
    NoResponding = 4,
    NoPermissions = 5,
    NoMemory = 6,
}

impl Status {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ok),
            1 => Some(Self::Password),
            2 => Some(Self::Arguments),
            3 => Some(Self::InvalidUrl),
            4 => Some(Self::NoResponding),
            5 => Some(Self::NoPermissions),
            6 => Some(Self::NoMemory),
            _ => None,
        }
    }
}

/// A parsed 12-byte header. Multibyte fields are stored host-order; wire
/// access happens only in `parse`/`write_into`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub version: u8,
    pub type_raw: u8,
    pub status_raw: u8,
    pub url_len: u16,
    pub seqno: u16,
    pub data_len: u32,
}

impl Header {
    /// Parse a 12-byte slice into a `Header`, without validating magic,
    /// version or total length — see `validate` for that.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Protocol("short header".into()));
        }
        Ok(Self {
            magic: buf[0],
            version: buf[1],
            type_raw: buf[2],
            status_raw: buf[3],
            url_len: u16::from_be_bytes([buf[4], buf[5]]),
            seqno: u16::from_be_bytes([buf[6], buf[7]]),
            data_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.type_raw)
    }

    pub fn status(&self) -> Option<Status> {
        Status::from_u8(self.status_raw)
    }

    /// Check `magic`/`version` and that the total framed length is within
    /// bounds. Returns the total packet length (header + url + data) on
    /// success.
    pub fn validate(&self) -> Result<usize> {
        if self.magic != MAGIC || self.version != VERSION {
            return Err(Error::Protocol(format!(
                "bad magic/version: {:#x}/{:#x}",
                self.magic, self.version
            )));
        }
        let total = HEADER_LEN + self.url_len as usize + self.data_len as usize;
        if total > super::MAX_PACKET_LENGTH {
            return Err(Error::Protocol(format!("packet too large: {total}")));
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = 0xff;
        raw[1] = VERSION;
        let h = Header::parse(&raw).unwrap();
        assert!(h.validate().is_err());
    }

    #[test]
    fn rejects_oversized_total() {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = MAGIC;
        raw[1] = VERSION;
        raw[8..12].copy_from_slice(&(super::super::MAX_PACKET_LENGTH as u32).to_be_bytes());
        let h = Header::parse(&raw).unwrap();
        assert!(h.validate().is_err());
    }
}
