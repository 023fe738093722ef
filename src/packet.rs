use std::fmt;
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::bits::{put_u16, put_u32};
use crate::error::CodecError;

/// Ethernet (link-layer) address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub const fn new(octets: [u8; 6]) -> MacAddr {
        MacAddr(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    fn read(bytes: &mut Cursor<&[u8]>) -> Result<MacAddr, CodecError> {
        let mut arr = [0; 6];
        bytes.read_exact(&mut arr)?;
        Ok(MacAddr(arr))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut arr = [0; 6];
        let mut parts = s.split(':');
        for byte in arr.iter_mut() {
            let part = parts.next().ok_or(CodecError::Invalid("mac address needs 6 octets"))?;
            if part.len() != 2 {
                return Err(CodecError::Invalid("mac address octets are two hex digits"));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| CodecError::Invalid("mac address octets are two hex digits"))?;
        }
        if parts.next().is_some() {
            return Err(CodecError::Invalid("mac address needs 6 octets"));
        }
        Ok(MacAddr(arr))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = CodecError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// IPv4 frame of a packet. Only the addressing part of the header is decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub ttl: u8,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub payload: Vec<u8>,
}

impl Ip {
    const MIN_SIZE: usize = 20;

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Option<Ip>, CodecError> {
        if remaining(bytes) < Self::MIN_SIZE {
            return Ok(None);
        }
        let vhl = bytes.read_u8()?;
        if (vhl >> 4) != 4 {
            return Ok(None);
        }
        let ihl = (vhl & 0x0f) as usize * 4;
        if ihl < Self::MIN_SIZE {
            return Ok(None);
        }
        let tos = bytes.read_u8()?;
        // total length, identification, flags and fragment offset
        skip(bytes, 6)?;
        let ttl = bytes.read_u8()?;
        let proto = bytes.read_u8()?;
        let _chksum = bytes.read_u16::<BigEndian>()?;
        let src = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        skip(bytes, ihl - Self::MIN_SIZE)?;
        let mut payload = vec![];
        bytes.read_to_end(&mut payload)?;
        Ok(Some(Ip {
            tos,
            ttl,
            proto,
            src,
            dst,
            payload,
        }))
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let total = (Self::MIN_SIZE + self.payload.len()) as u16;
        bytes.push(0x45);
        bytes.push(self.tos);
        put_u16(bytes, total);
        put_u32(bytes, 0);
        bytes.push(self.ttl);
        bytes.push(self.proto);
        put_u16(bytes, 0);
        bytes.extend_from_slice(&self.src.octets());
        bytes.extend_from_slice(&self.dst.octets());
        bytes.extend_from_slice(&self.payload);
    }
}

/// Address resolution protocol (ARP) packet payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arp {
    Query {
        sha: MacAddr,
        spa: Ipv4Addr,
        tpa: Ipv4Addr,
    },
    Reply {
        sha: MacAddr,
        spa: Ipv4Addr,
        tha: MacAddr,
        tpa: Ipv4Addr,
    },
}

impl Arp {
    const SIZE: usize = 28;

    /// Protocol address of the host sending the ARP message.
    pub fn sender_ip(&self) -> Ipv4Addr {
        match *self {
            Arp::Query { spa, .. } | Arp::Reply { spa, .. } => spa,
        }
    }

    /// Protocol address the ARP message is about (query) or addressed to (reply).
    pub fn target_ip(&self) -> Ipv4Addr {
        match *self {
            Arp::Query { tpa, .. } | Arp::Reply { tpa, .. } => tpa,
        }
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Option<Arp>, CodecError> {
        if remaining(bytes) < Self::SIZE {
            return Ok(None);
        }
        // hardware type, protocol type and address lengths
        skip(bytes, 6)?;
        let oper = bytes.read_u16::<BigEndian>()?;
        let sha = MacAddr::read(bytes)?;
        let spa = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let tha = MacAddr::read(bytes)?;
        let tpa = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        Ok(match oper {
            0x0001 => Some(Arp::Query { sha, spa, tpa }),
            0x0002 => Some(Arp::Reply { sha, spa, tha, tpa }),
            _ => None,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let (oper, sha, spa, tha, tpa) = match *self {
            Arp::Query { sha, spa, tpa } => (0x0001, sha, spa, MacAddr::ZERO, tpa),
            Arp::Reply { sha, spa, tha, tpa } => (0x0002, sha, spa, tha, tpa),
        };
        put_u16(bytes, 0x0001);
        put_u16(bytes, EthTyp::Ip as u16);
        bytes.push(6);
        bytes.push(4);
        put_u16(bytes, oper);
        bytes.extend_from_slice(&sha.octets());
        bytes.extend_from_slice(&spa.octets());
        bytes.extend_from_slice(&tha.octets());
        bytes.extend_from_slice(&tpa.octets());
    }
}

/// Represents a packet at the network protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Arp(Arp),
    Unparsable(u16, Vec<u8>),
}

/// Ether-types the controller knows about.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EthTyp {
    Ip = 0x0800,
    Arp = 0x0806,
    Vlan = 0x8100,
    Ipv6 = 0x86dd,
    Lldp = 0x88cc,
}

/// Represents a packet at the ethernet protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: u8,
    pub dl_typ: u16,
    pub nw: Nw,
}

impl Packet {
    pub fn parse(buf: &[u8]) -> Result<Packet, CodecError> {
        let mut bytes = Cursor::new(buf);
        let dl_dst = MacAddr::read(&mut bytes)?;
        let dl_src = MacAddr::read(&mut bytes)?;
        let typ = bytes.read_u16::<BigEndian>()?;
        let (dl_vlan, dl_vlan_pcp, dl_typ) = if typ == EthTyp::Vlan as u16 {
            let tci = bytes.read_u16::<BigEndian>()?;
            let typ = bytes.read_u16::<BigEndian>()?;
            (Some(tci & 0xfff), (tci >> 13) as u8, typ)
        } else {
            (None, 0, typ)
        };
        let start = bytes.position() as usize;
        let nw = match dl_typ {
            t if t == EthTyp::Ip as u16 => Ip::parse(&mut bytes)?.map(Nw::Ip),
            t if t == EthTyp::Arp as u16 => Arp::parse(&mut bytes)?.map(Nw::Arp),
            _ => None,
        }
        .unwrap_or_else(|| Nw::Unparsable(dl_typ, buf[start..].to_vec()));
        Ok(Packet {
            dl_src,
            dl_dst,
            dl_vlan,
            dl_vlan_pcp,
            dl_typ,
            nw,
        })
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend_from_slice(&self.dl_dst.octets());
        bytes.extend_from_slice(&self.dl_src.octets());
        if let Some(vlan) = self.dl_vlan {
            put_u16(&mut bytes, EthTyp::Vlan as u16);
            put_u16(&mut bytes, ((self.dl_vlan_pcp as u16) << 13) | (vlan & 0xfff));
        }
        put_u16(&mut bytes, self.dl_typ);
        match self.nw {
            Nw::Ip(ref ip) => ip.marshal(&mut bytes),
            Nw::Arp(ref arp) => arp.marshal(&mut bytes),
            Nw::Unparsable(_, ref rest) => bytes.extend_from_slice(rest),
        }
        bytes
    }

    /// The ARP payload, if the frame carries one.
    pub fn arp(&self) -> Option<&Arp> {
        match self.nw {
            Nw::Arp(ref arp) => Some(arp),
            _ => None,
        }
    }
}

fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

fn skip(bytes: &mut Cursor<&[u8]>, n: usize) -> Result<(), CodecError> {
    if remaining(bytes) < n {
        return Err(CodecError::Invalid("header shorter than advertised"));
    }
    bytes.set_position(bytes.position() + n as u64);
    Ok(())
}
