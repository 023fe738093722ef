use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::bits::{put_u16, put_u32};
use crate::error::CodecError;
use crate::openflow0x01::MsgCode;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub const fn size() -> usize {
        8
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) {
        bytes.push(header.version);
        bytes.push(header.typ);
        put_u16(bytes, header.length);
        put_u32(bytes, header.xid);
    }

    /// Takes a message buffer (sized for an `OfpHeader`) and returns an `OfpHeader`.
    pub fn parse(buf: [u8; 8]) -> Result<Self, CodecError> {
        let mut bytes = Cursor::new(&buf[..]);
        Ok(OfpHeader {
            version: bytes.read_u8()?,
            typ: bytes.read_u8()?,
            length: bytes.read_u16::<BigEndian>()?,
            xid: bytes.read_u32::<BigEndian>()?,
        })
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the OpenFlow message type code of a header.
    pub fn type_code(&self) -> Result<MsgCode, CodecError> {
        MsgCode::try_from(self.typ)
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Length of the message body following the header.
    pub fn body_length(&self) -> Result<usize, CodecError> {
        self.length()
            .checked_sub(Self::size())
            .ok_or(CodecError::BadLength(self.length()))
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    /// Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}
