use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::packet::MacAddr;

/// Failures while encoding or decoding OpenFlow messages and packet payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer too short: {0}")]
    Truncated(#[from] io::Error),
    #[error("unknown OpenFlow message code {0}")]
    UnknownMessage(u8),
    #[error("unsupported OpenFlow message code {0}")]
    UnsupportedMessage(u8),
    #[error("unsupported OpenFlow version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("unsupported port number {0:#06x}")]
    UnsupportedPort(u16),
    #[error("unsupported action type {0}")]
    UnsupportedAction(u16),
    #[error("invalid header length {0}")]
    BadLength(usize),
    #[error("{0}")]
    Invalid(&'static str),
}

/// Errors raised by the controller.
///
/// The drop variants (`Filtered`, `Malformed`, `Unroutable`, `UnknownDestination`, `NoRoute`)
/// are expected while the topology converges: the packet is dropped and no rule is touched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("switch {0:#x} is not connected")]
    UnknownSwitch(u64),
    #[error("ether-type {0:#06x} is not routed")]
    Filtered(u16),
    #[error("malformed packet: {0}")]
    Malformed(CodecError),
    #[error("broadcast frame without ARP payload cannot be routed")]
    Unroutable,
    #[error("host {0} has not joined the topology yet")]
    UnknownDestination(Ipv4Addr),
    #[error("no route from {src} to {dst}")]
    NoRoute { src: MacAddr, dst: MacAddr },
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("invalid topology file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid topology: {0}")]
    Topology(String),
}

impl Error {
    /// Whether the error only means "drop this packet".
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            Error::Filtered(_)
                | Error::Malformed(_)
                | Error::Unroutable
                | Error::UnknownDestination(_)
                | Error::NoRoute { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
