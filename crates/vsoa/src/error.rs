// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the VSOA session core.
//!
//! Mirrors the kinds in the design's error-handling table: protocol errors
//! never unwind the event loop, they close the offending session; timeouts
//! and disconnects surface through callbacks rather than `Result`.

use std::fmt;

use crate::wire::Status;

/// Errors surfaced synchronously by `vsoa` APIs.
#[derive(Debug)]
pub enum Error {
    /// Magic/version mismatch or oversized/undersized packet at the wire layer.
    Protocol(String),

    /// A URL argument was missing its leading `/`, or a required payload was empty.
    InvalidArg(String),

    /// The pending table (slow lane, 255 entries) is exhausted.
    Busy,

    /// The peer disconnected before a reply arrived.
    Disconnected,

    /// No reply arrived within the call's timeout.
    Timeout,

    /// Socket-level I/O failure.
    Io(std::io::Error),
}

impl Error {
    /// Map to the wire `Status` a server reply would carry for this error,
    /// where applicable (client-only errors like `Busy`/`Timeout` have no
    /// wire representation and return `None`).
    pub fn as_status(&self) -> Option<Status> {
        match self {
            Error::InvalidArg(_) => Some(Status::Arguments),
            Error::Protocol(_) => Some(Status::InvalidUrl),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::InvalidArg(msg) => write!(f, "invalid argument: {msg}"),
            Error::Busy => write!(f, "pending table full"),
            Error::Disconnected => write!(f, "session disconnected"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
