use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt};

use crate::bits::{bit, put_u16, put_u32, put_u64, test_bit};
use crate::error::CodecError;
use crate::packet::MacAddr;

/// Wire version of OpenFlow 1.0.
pub const OFP_VERSION: u8 = 0x01;

/// Buffer id announcing that the switch did not buffer the packet.
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Vendor,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    PortMod,
    StatsReq,
    StatsResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
}

const MSG_CODES: [MsgCode; 22] = [
    MsgCode::Hello,
    MsgCode::Error,
    MsgCode::EchoReq,
    MsgCode::EchoResp,
    MsgCode::Vendor,
    MsgCode::FeaturesReq,
    MsgCode::FeaturesResp,
    MsgCode::GetConfigReq,
    MsgCode::GetConfigResp,
    MsgCode::SetConfig,
    MsgCode::PacketIn,
    MsgCode::FlowRemoved,
    MsgCode::PortStatus,
    MsgCode::PacketOut,
    MsgCode::FlowMod,
    MsgCode::PortMod,
    MsgCode::StatsReq,
    MsgCode::StatsResp,
    MsgCode::BarrierReq,
    MsgCode::BarrierResp,
    MsgCode::QueueGetConfigReq,
    MsgCode::QueueGetConfigResp,
];

impl TryFrom<u8> for MsgCode {
    type Error = CodecError;

    fn try_from(code: u8) -> Result<MsgCode, CodecError> {
        MSG_CODES
            .get(code as usize)
            .copied()
            .ok_or(CodecError::UnknownMessage(code))
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(msg: &Self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self, CodecError>;
    /// Marshal a message into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> Result<(), CodecError>;
}

fn read_mac(bytes: &mut Cursor<&[u8]>) -> Result<MacAddr, CodecError> {
    let mut arr = [0; 6];
    bytes.read_exact(&mut arr)?;
    Ok(MacAddr::new(arr))
}

fn skip(bytes: &mut Cursor<&[u8]>, n: u64) -> Result<(), CodecError> {
    let pos = bytes.position() + n;
    if pos > bytes.get_ref().len() as u64 {
        return Err(CodecError::Invalid("padding runs past the end of the message"));
    }
    bytes.set_position(pos);
    Ok(())
}

fn rest(bytes: &mut Cursor<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let mut v = vec![];
    bytes.read_to_end(&mut v)?;
    Ok(v)
}

/// Wildcard bits of `ofp_match`.
mod wildcard {
    pub const IN_PORT: u32 = 0;
    pub const DL_VLAN: u32 = 1;
    pub const DL_SRC: u32 = 2;
    pub const DL_DST: u32 = 3;
    pub const DL_TYPE: u32 = 4;
    pub const NW_PROTO: u32 = 5;
    pub const TP_SRC: u32 = 6;
    pub const TP_DST: u32 = 7;
    pub const NW_SRC_SHIFT: u32 = 8;
    pub const NW_DST_SHIFT: u32 = 14;
    pub const NW_ADDR_MASK: u32 = 0x3f;
    pub const NW_ADDR_ALL: u32 = 32;
    pub const DL_VLAN_PCP: u32 = 20;
    pub const NW_TOS: u32 = 21;
}

/// Fields to match against flows. `None` wildcards the field.
///
/// Network addresses are matched exactly; prefix masks are not modeled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: Option<u8>,
    pub dl_typ: Option<u16>,
    pub nw_tos: Option<u8>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl Pattern {
    const SIZE: usize = 40;

    /// A pattern wildcarding every field.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// A pattern matching frames from `src` to `dst`.
    pub fn between(src: MacAddr, dst: MacAddr) -> Pattern {
        Pattern {
            dl_src: Some(src),
            dl_dst: Some(dst),
            ..Pattern::default()
        }
    }

    fn wildcards(&self) -> u32 {
        use self::wildcard::*;
        let mut w = 0;
        w = bit(IN_PORT, w, self.in_port.is_none());
        w = bit(DL_VLAN, w, self.dl_vlan.is_none());
        w = bit(DL_SRC, w, self.dl_src.is_none());
        w = bit(DL_DST, w, self.dl_dst.is_none());
        w = bit(DL_TYPE, w, self.dl_typ.is_none());
        w = bit(NW_PROTO, w, self.nw_proto.is_none());
        w = bit(TP_SRC, w, self.tp_src.is_none());
        w = bit(TP_DST, w, self.tp_dst.is_none());
        if self.nw_src.is_none() {
            w |= NW_ADDR_ALL << NW_SRC_SHIFT;
        }
        if self.nw_dst.is_none() {
            w |= NW_ADDR_ALL << NW_DST_SHIFT;
        }
        w = bit(DL_VLAN_PCP, w, self.dl_vlan_pcp.is_none());
        bit(NW_TOS, w, self.nw_tos.is_none())
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        put_u32(bytes, self.wildcards());
        put_u16(bytes, self.in_port.unwrap_or(0));
        bytes.extend_from_slice(&self.dl_src.unwrap_or_default().octets());
        bytes.extend_from_slice(&self.dl_dst.unwrap_or_default().octets());
        put_u16(bytes, self.dl_vlan.unwrap_or(0));
        bytes.push(self.dl_vlan_pcp.unwrap_or(0));
        bytes.push(0);
        put_u16(bytes, self.dl_typ.unwrap_or(0));
        bytes.push(self.nw_tos.unwrap_or(0));
        bytes.push(self.nw_proto.unwrap_or(0));
        put_u16(bytes, 0);
        put_u32(bytes, self.nw_src.map(u32::from).unwrap_or(0));
        put_u32(bytes, self.nw_dst.map(u32::from).unwrap_or(0));
        put_u16(bytes, self.tp_src.unwrap_or(0));
        put_u16(bytes, self.tp_dst.unwrap_or(0));
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern, CodecError> {
        use self::wildcard::*;
        let w = bytes.read_u32::<BigEndian>()?;
        let given = |b: u32| !test_bit(b, w);
        let addr_given = |shift: u32| ((w >> shift) & NW_ADDR_MASK) < NW_ADDR_ALL;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let dl_src = read_mac(bytes)?;
        let dl_dst = read_mac(bytes)?;
        let dl_vlan = bytes.read_u16::<BigEndian>()?;
        let dl_vlan_pcp = bytes.read_u8()?;
        skip(bytes, 1)?;
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        let nw_tos = bytes.read_u8()?;
        let nw_proto = bytes.read_u8()?;
        skip(bytes, 2)?;
        let nw_src = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let nw_dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        Ok(Pattern {
            in_port: given(IN_PORT).then_some(in_port),
            dl_src: given(DL_SRC).then_some(dl_src),
            dl_dst: given(DL_DST).then_some(dl_dst),
            dl_vlan: given(DL_VLAN).then_some(dl_vlan),
            dl_vlan_pcp: given(DL_VLAN_PCP).then_some(dl_vlan_pcp),
            dl_typ: given(DL_TYPE).then_some(dl_typ),
            nw_tos: given(NW_TOS).then_some(nw_tos),
            nw_proto: given(NW_PROTO).then_some(nw_proto),
            nw_src: addr_given(NW_SRC_SHIFT).then_some(nw_src),
            nw_dst: addr_given(NW_DST_SHIFT).then_some(nw_dst),
            tp_src: given(TP_SRC).then_some(tp_src),
            tp_dst: given(TP_DST).then_some(tp_dst),
        })
    }
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    /// Send to the controller, including at most this many bytes of the packet.
    Controller(u16),
    Local,
}

#[repr(u16)]
enum OfpPort {
    Max = 0xff00,
    InPort = 0xfff8,
    Table = 0xfff9,
    Normal = 0xfffa,
    Flood = 0xfffb,
    All = 0xfffc,
    Controller = 0xfffd,
    Local = 0xfffe,
    None = 0xffff,
}

impl PseudoPort {
    /// Max length asking the switch to send the whole packet to the controller.
    pub const NO_BUFFER: u16 = 0xffff;

    fn of_int(p: u16) -> Result<Option<PseudoPort>, CodecError> {
        if p == OfpPort::None as u16 {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u16, len: u16) -> Result<PseudoPort, CodecError> {
        Ok(match p {
            p if p == OfpPort::InPort as u16 => PseudoPort::InPort,
            p if p == OfpPort::Table as u16 => PseudoPort::Table,
            p if p == OfpPort::Normal as u16 => PseudoPort::Normal,
            p if p == OfpPort::Flood as u16 => PseudoPort::Flood,
            p if p == OfpPort::All as u16 => PseudoPort::AllPorts,
            p if p == OfpPort::Controller as u16 => PseudoPort::Controller(len),
            p if p == OfpPort::Local as u16 => PseudoPort::Local,
            p if p <= OfpPort::Max as u16 => PseudoPort::PhysicalPort(p),
            p => return Err(CodecError::UnsupportedPort(p)),
        })
    }

    fn to_int(self) -> u16 {
        match self {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::InPort as u16,
            PseudoPort::Table => OfpPort::Table as u16,
            PseudoPort::Normal => OfpPort::Normal as u16,
            PseudoPort::Flood => OfpPort::Flood as u16,
            PseudoPort::AllPorts => OfpPort::All as u16,
            PseudoPort::Controller(_) => OfpPort::Controller as u16,
            PseudoPort::Local => OfpPort::Local as u16,
        }
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

#[repr(u16)]
enum OfpActionType {
    Output,
}

impl Action {
    const OUTPUT_SIZE: usize = 8;

    fn size_of(&self) -> usize {
        match *self {
            Action::Output(_) => Self::OUTPUT_SIZE,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Action, CodecError> {
        let typ = bytes.read_u16::<BigEndian>()?;
        let len = bytes.read_u16::<BigEndian>()?;
        if typ != OfpActionType::Output as u16 {
            return Err(CodecError::UnsupportedAction(typ));
        }
        if len as usize != Self::OUTPUT_SIZE {
            return Err(CodecError::Invalid("output action must be 8 bytes"));
        }
        let port = bytes.read_u16::<BigEndian>()?;
        let max_len = bytes.read_u16::<BigEndian>()?;
        Ok(Action::Output(PseudoPort::make(port, max_len)?))
    }

    fn parse_sequence(bytes: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<Action>, CodecError> {
        let end = bytes.position() + len as u64;
        if end > bytes.get_ref().len() as u64 {
            return Err(CodecError::Invalid("action list runs past the end of the message"));
        }
        let mut actions = vec![];
        while bytes.position() < end {
            actions.push(Action::parse(bytes)?);
        }
        Ok(actions)
    }

    /// Switches apply actions in order; output to the controller goes last so the
    /// other outputs are not delayed behind it.
    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .into_iter()
            .partition(|act| matches!(act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.extend(to_ctrl);
        not_to_ctrl
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        match *self {
            Action::Output(pp) => {
                put_u16(bytes, OfpActionType::Output as u16);
                put_u16(bytes, Self::OUTPUT_SIZE as u16);
                put_u16(bytes, pp.to_int());
                put_u16(
                    bytes,
                    match pp {
                        PseudoPort::Controller(w) => w,
                        _ => 0,
                    },
                );
            }
        }
    }
}

/// How long before a flow entry expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(self) -> u16 {
        match self {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities bitmap supported by the datapath.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities(pub u32);

impl Capabilities {
    pub fn flow_stats(&self) -> bool {
        test_bit(0, self.0)
    }

    pub fn stp(&self) -> bool {
        test_bit(3, self.0)
    }

    pub fn arp_match_ip(&self) -> bool {
        test_bit(7, self.0)
    }
}

/// Action bitmap supported by the datapath.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupportedActions(pub u32);

impl SupportedActions {
    pub fn output(&self) -> bool {
        test_bit(OfpActionType::Output as u32, self.0)
    }
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub capabilities: Capabilities,
    pub actions: SupportedActions,
    pub ports: Vec<PortDesc>,
}

impl SwitchFeatures {
    const FIXED_SIZE: usize = 24;
}

impl MessageType for SwitchFeatures {
    fn size_of(sf: &SwitchFeatures) -> usize {
        Self::FIXED_SIZE + sf.ports.len() * PortDesc::SIZE
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, CodecError> {
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        skip(&mut bytes, 3)?;
        let capabilities = Capabilities(bytes.read_u32::<BigEndian>()?);
        let actions = SupportedActions(bytes.read_u32::<BigEndian>()?);
        let num_ports = buf.len().saturating_sub(Self::FIXED_SIZE) / PortDesc::SIZE;
        let ports = (0..num_ports)
            .map(|_| PortDesc::parse(&mut bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            capabilities,
            actions,
            ports,
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) -> Result<(), CodecError> {
        put_u64(bytes, sf.datapath_id);
        put_u32(bytes, sf.num_buffers);
        bytes.push(sf.num_tables);
        bytes.extend_from_slice(&[0; 3]);
        put_u32(bytes, sf.capabilities.0);
        put_u32(bytes, sf.actions.0);
        for port in &sf.ports {
            port.marshal(bytes);
        }
        Ok(())
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl TryFrom<u16> for FlowModCmd {
    type Error = CodecError;

    fn try_from(cmd: u16) -> Result<FlowModCmd, CodecError> {
        Ok(match cmd {
            0 => FlowModCmd::AddFlow,
            1 => FlowModCmd::ModFlow,
            2 => FlowModCmd::ModStrictFlow,
            3 => FlowModCmd::DeleteFlow,
            4 => FlowModCmd::DeleteStrictFlow,
            _ => return Err(CodecError::Invalid("unknown flow_mod command")),
        })
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

impl FlowMod {
    const FIXED_SIZE: usize = 24;

    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        bit(1, bit(0, 0, notify_when_removed), check_overlap) as u16
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        Pattern::SIZE + Self::FIXED_SIZE + Action::size_of_sequence(&msg.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, CodecError> {
        let mut bytes = Cursor::new(buf);
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = FlowModCmd::try_from(bytes.read_u16::<BigEndian>()?)?;
        let idle_timeout = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard_timeout = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()? as u32;
        let remaining = buf.len() - bytes.position() as usize;
        let actions = Action::parse_sequence(&mut bytes, remaining)?;
        Ok(FlowMod {
            command,
            pattern,
            priority,
            actions,
            cookie,
            idle_timeout,
            hard_timeout,
            notify_when_removed: test_bit(0, flags),
            apply_to_packet: (buffer_id != OFP_NO_BUFFER).then_some(buffer_id),
            out_port,
            check_overlap: test_bit(1, flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<(), CodecError> {
        if fm.actions.contains(&Action::Output(PseudoPort::Table)) {
            return Err(CodecError::Invalid("OFPP_TABLE is not allowed in an installed flow"));
        }
        fm.pattern.marshal(bytes);
        put_u64(bytes, fm.cookie);
        put_u16(bytes, fm.command as u16);
        put_u16(bytes, fm.idle_timeout.to_int());
        put_u16(bytes, fm.hard_timeout.to_int());
        put_u16(bytes, fm.priority);
        put_u32(bytes, fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER));
        put_u16(
            bytes,
            fm.out_port.map_or(OfpPort::None as u16, PseudoPort::to_int),
        );
        put_u16(
            bytes,
            FlowMod::flags_to_int(fm.check_overlap, fm.notify_when_removed),
        );
        for act in Action::move_controller_last(fm.actions) {
            act.marshal(bytes);
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        payload.data().len()
    }

    /// Bytes of the packet carried in the message.
    pub fn data(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    pub fn buffer_id(&self) -> Option<u32> {
        match *self {
            Payload::Buffered(id, _) => Some(id),
            Payload::NotBuffered(_) => None,
        }
    }

    fn of_buffer_id(buffer_id: u32, data: Vec<u8>) -> Payload {
        if buffer_id == OFP_NO_BUFFER {
            Payload::NotBuffered(data)
        } else {
            Payload::Buffered(buffer_id, data)
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

impl PacketIn {
    const FIXED_SIZE: usize = 10;
}

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        Self::FIXED_SIZE + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, CodecError> {
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason = match bytes.read_u8()? {
            0 => PacketInReason::NoMatch,
            1 => PacketInReason::ExplicitSend,
            _ => return Err(CodecError::Invalid("unknown packet_in reason")),
        };
        skip(&mut bytes, 1)?;
        Ok(PacketIn {
            input_payload: Payload::of_buffer_id(buffer_id, rest(&mut bytes)?),
            total_len,
            port,
            reason,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) -> Result<(), CodecError> {
        put_u32(bytes, pi.input_payload.buffer_id().unwrap_or(OFP_NO_BUFFER));
        put_u16(bytes, pi.total_len);
        put_u16(bytes, pi.port);
        bytes.push(pi.reason as u8);
        bytes.push(0);
        bytes.extend_from_slice(pi.input_payload.data());
        Ok(())
    }
}

/// Send a packet out of the datapath.
///
/// A buffered payload only sends its buffer id; the switch still holds the bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

impl PacketOut {
    const FIXED_SIZE: usize = 8;

    fn data_len(&self) -> usize {
        match self.output_payload {
            Payload::Buffered(..) => 0,
            Payload::NotBuffered(ref data) => data.len(),
        }
    }
}

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        Self::FIXED_SIZE + Action::size_of_sequence(&po.apply_actions) + po.data_len()
    }

    fn parse(buf: &[u8]) -> Result<PacketOut, CodecError> {
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let port_id = match bytes.read_u16::<BigEndian>()? {
            p if p == OfpPort::None as u16 => None,
            p => Some(p),
        };
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        let apply_actions = Action::parse_sequence(&mut bytes, actions_len)?;
        Ok(PacketOut {
            output_payload: Payload::of_buffer_id(buffer_id, rest(&mut bytes)?),
            port_id,
            apply_actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> Result<(), CodecError> {
        put_u32(bytes, po.output_payload.buffer_id().unwrap_or(OFP_NO_BUFFER));
        put_u16(bytes, po.port_id.unwrap_or(OfpPort::None as u16));
        put_u16(bytes, Action::size_of_sequence(&po.apply_actions) as u16);
        for act in &po.apply_actions {
            act.marshal(bytes);
        }
        if let Payload::NotBuffered(ref data) = po.output_payload {
            bytes.extend_from_slice(data);
        }
        Ok(())
    }
}

/// Description of a physical port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
}

impl PortDesc {
    const SIZE: usize = 48;
    const NAME_LEN: usize = 16;

    /// Administratively down or without link.
    pub fn is_down(&self) -> bool {
        test_bit(0, self.config) || test_bit(0, self.state)
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortDesc, CodecError> {
        let port_no = bytes.read_u16::<BigEndian>()?;
        let hw_addr = read_mac(bytes)?;
        let mut name = [0; Self::NAME_LEN];
        bytes.read_exact(&mut name)?;
        let name_end = name.iter().position(|&b| b == 0).unwrap_or(Self::NAME_LEN);
        Ok(PortDesc {
            port_no,
            hw_addr,
            name: String::from_utf8_lossy(&name[..name_end]).into_owned(),
            config: bytes.read_u32::<BigEndian>()?,
            state: bytes.read_u32::<BigEndian>()?,
            curr: bytes.read_u32::<BigEndian>()?,
            advertised: bytes.read_u32::<BigEndian>()?,
            supported: bytes.read_u32::<BigEndian>()?,
            peer: bytes.read_u32::<BigEndian>()?,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        put_u16(bytes, self.port_no);
        bytes.extend_from_slice(&self.hw_addr.octets());
        let mut name = [0; Self::NAME_LEN];
        let len = self.name.len().min(Self::NAME_LEN - 1);
        name[..len].copy_from_slice(&self.name.as_bytes()[..len]);
        bytes.extend_from_slice(&name);
        for v in [
            self.config,
            self.state,
            self.curr,
            self.advertised,
            self.supported,
            self.peer,
        ] {
            put_u32(bytes, v);
        }
    }
}

/// What changed about a physical port.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortReason {
    PortAdd,
    PortDelete,
    PortModify,
}

/// A physical port has changed in the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

impl MessageType for PortStatus {
    fn size_of(_: &PortStatus) -> usize {
        8 + PortDesc::SIZE
    }

    fn parse(buf: &[u8]) -> Result<PortStatus, CodecError> {
        let mut bytes = Cursor::new(buf);
        let reason = match bytes.read_u8()? {
            0 => PortReason::PortAdd,
            1 => PortReason::PortDelete,
            2 => PortReason::PortModify,
            _ => return Err(CodecError::Invalid("unknown port_status reason")),
        };
        skip(&mut bytes, 7)?;
        let desc = PortDesc::parse(&mut bytes)?;
        Ok(PortStatus { reason, desc })
    }

    fn marshal(ps: PortStatus, bytes: &mut Vec<u8>) -> Result<(), CodecError> {
        bytes.push(ps.reason as u8);
        bytes.extend_from_slice(&[0; 7]);
        ps.desc.marshal(bytes);
        Ok(())
    }
}

/// Error reported by the switch, typically about a message the controller sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchError {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl MessageType for SwitchError {
    fn size_of(err: &SwitchError) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> Result<SwitchError, CodecError> {
        let mut bytes = Cursor::new(buf);
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        Ok(SwitchError {
            typ,
            code,
            data: rest(&mut bytes)?,
        })
    }

    fn marshal(err: SwitchError, bytes: &mut Vec<u8>) -> Result<(), CodecError> {
        put_u16(bytes, err.typ);
        put_u16(bytes, err.code);
        bytes.extend_from_slice(&err.data);
        Ok(())
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use crate::packet::Packet;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(SwitchError),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        PortStatus(PortStatus),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        pub fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::PortStatus(_) => MsgCode::PortStatus,
            }
        }

        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<(), CodecError> {
            match msg {
                Message::Hello | Message::FeaturesReq => Ok(()),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::Error(err) => SwitchError::marshal(err, bytes),
                Message::FeaturesReply(feats) => SwitchFeatures::marshal(feats, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(packet_out) => PacketOut::marshal(packet_out, bytes),
                Message::PortStatus(sts) => PortStatus::marshal(sts, bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            OfpHeader::size()
                + match *msg {
                    Message::Hello | Message::FeaturesReq => 0,
                    Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => buf.len(),
                    Message::Error(ref err) => SwitchError::size_of(err),
                    Message::FeaturesReply(ref feats) => SwitchFeatures::size_of(feats),
                    Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                    Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                    Message::PacketOut(ref packet_out) => PacketOut::size_of(packet_out),
                    Message::PortStatus(ref ps) => PortStatus::size_of(ps),
                }
        }

        fn header_of(xid: u32, msg: &Message) -> Result<OfpHeader, CodecError> {
            let sizeof_buf = Self::size_of(msg);
            let length = u16::try_from(sizeof_buf).map_err(|_| CodecError::BadLength(sizeof_buf))?;
            Ok(OfpHeader::new(
                OFP_VERSION,
                Self::msg_code_of_message(msg) as u8,
                length,
                xid,
            ))
        }

        fn marshal(xid: u32, msg: Message) -> Result<Vec<u8>, CodecError> {
            let hdr = Self::header_of(xid, &msg)?;
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr);
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message), CodecError> {
            let typ = header.type_code()?;
            // Hello is exchanged before versions are negotiated.
            if header.version() != OFP_VERSION && typ != MsgCode::Hello {
                return Err(CodecError::UnsupportedVersion(header.version()));
            }
            let msg = match typ {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(SwitchError::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::PortStatus => Message::PortStatus(PortStatus::parse(buf)?),
                t => return Err(CodecError::UnsupportedMessage(t as u8)),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }

    /// Return a `FlowMod` deleting every flow matching `pattern`, whatever its priority
    /// or output port.
    pub fn delete_flow(pattern: Pattern) -> FlowMod {
        FlowMod {
            command: FlowModCmd::DeleteFlow,
            ..add_flow(0, pattern, vec![])
        }
    }

    /// Decode the Ethernet frame carried by a packet-in payload.
    pub fn parse_payload(payload: &Payload) -> Result<Packet, CodecError> {
        Packet::parse(payload.data())
    }
}

#[cfg(test)]
mod tests {
    use super::message::*;
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use pretty_assertions::assert_eq;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0, 0, 0, 0, 0, last])
    }

    fn reparse(bytes: &[u8]) -> (u32, Message) {
        let mut hdr = [0; 8];
        hdr.copy_from_slice(&bytes[..8]);
        let header = OfpHeader::parse(hdr).unwrap();
        assert_eq!(header.length(), bytes.len());
        Message::parse(&header, &bytes[8..]).unwrap()
    }

    #[test]
    fn msg_codes_follow_the_wire_table() {
        assert_eq!(MsgCode::try_from(0).unwrap(), MsgCode::Hello);
        assert_eq!(MsgCode::try_from(1).unwrap(), MsgCode::Error);
        assert_eq!(MsgCode::try_from(10).unwrap(), MsgCode::PacketIn);
        assert_eq!(MsgCode::try_from(21).unwrap(), MsgCode::QueueGetConfigResp);
        assert!(matches!(MsgCode::try_from(22), Err(CodecError::UnknownMessage(22))));
        assert_eq!(FlowModCmd::try_from(3).unwrap(), FlowModCmd::DeleteFlow);
        assert!(FlowModCmd::try_from(9).is_err());
    }

    #[test]
    fn flow_mod_layout() {
        let fm = add_flow(
            1,
            Pattern::between(mac(1), mac(2)),
            vec![Action::Output(PseudoPort::PhysicalPort(3))],
        );
        let bytes = Message::marshal(7, Message::FlowMod(fm.clone())).unwrap();
        assert_eq!(bytes.len(), 8 + 40 + 24 + 8);
        assert_eq!(bytes[1], MsgCode::FlowMod as u8);

        // dl_src and dl_dst are the only fields not wildcarded
        let wildcards = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(wildcards & 0b1100, 0);
        assert_eq!(wildcards & 0b0011, 0b0011);
        assert_eq!(&bytes[14..20], &mac(1).octets());
        assert_eq!(&bytes[20..26], &mac(2).octets());

        // output action: type 0, len 8, port 3, max_len 0
        assert_eq!(&bytes[72..], &[0, 0, 0, 8, 0, 3, 0, 0]);

        assert_eq!(reparse(&bytes), (7, Message::FlowMod(fm)));
    }

    #[test]
    fn delete_flow_has_no_actions_and_any_out_port() {
        let bytes = Message::marshal(1, Message::FlowMod(delete_flow(Pattern::match_all()))).unwrap();
        assert_eq!(bytes.len(), 72);
        let (_, msg) = reparse(&bytes);
        match msg {
            Message::FlowMod(fm) => {
                assert_eq!(fm.command, FlowModCmd::DeleteFlow);
                assert_eq!(fm.pattern, Pattern::match_all());
                assert_eq!(fm.out_port, None);
                assert!(fm.actions.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn table_output_is_rejected_in_flow_mod() {
        let fm = add_flow(1, Pattern::match_all(), vec![Action::Output(PseudoPort::Table)]);
        assert!(Message::marshal(1, Message::FlowMod(fm)).is_err());
    }

    #[test]
    fn controller_output_goes_last() {
        let acts = vec![
            Action::Output(PseudoPort::Controller(0xffff)),
            Action::Output(PseudoPort::PhysicalPort(1)),
        ];
        assert_eq!(
            Action::move_controller_last(acts),
            vec![
                Action::Output(PseudoPort::PhysicalPort(1)),
                Action::Output(PseudoPort::Controller(0xffff)),
            ]
        );
    }

    #[test]
    fn buffered_packet_out_omits_data() {
        let po = PacketOut {
            output_payload: Payload::Buffered(9, vec![1, 2, 3]),
            port_id: Some(4),
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(2))],
        };
        let bytes = Message::marshal(3, Message::PacketOut(po)).unwrap();
        assert_eq!(bytes.len(), 8 + 8 + 8);
        assert_eq!(&bytes[8..12], &9u32.to_be_bytes());

        let po = PacketOut {
            output_payload: Payload::NotBuffered(vec![1, 2, 3]),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(2))],
        };
        let bytes = Message::marshal(3, Message::PacketOut(po.clone())).unwrap();
        assert_eq!(bytes.len(), 8 + 8 + 8 + 3);
        assert_eq!(&bytes[8..12], &OFP_NO_BUFFER.to_be_bytes());
        assert_eq!(reparse(&bytes), (3, Message::PacketOut(po)));
    }

    #[test]
    fn features_reply_with_ports() {
        let feats = SwitchFeatures {
            datapath_id: 0x1,
            num_buffers: 256,
            num_tables: 2,
            capabilities: Capabilities(0b1000_0001),
            actions: SupportedActions(1),
            ports: vec![PortDesc {
                port_no: 1,
                hw_addr: mac(0x11),
                name: "s1-eth1".to_string(),
                config: 0,
                state: 0,
                curr: 0,
                advertised: 0,
                supported: 0,
                peer: 0,
            }],
        };
        let bytes = Message::marshal(0, Message::FeaturesReply(feats.clone())).unwrap();
        assert_eq!(bytes.len(), 8 + 24 + 48);
        let (_, msg) = reparse(&bytes);
        assert_eq!(msg, Message::FeaturesReply(feats.clone()));
        assert!(feats.capabilities.arp_match_ip());
        assert!(feats.actions.output());
        assert!(!feats.ports[0].is_down());
    }

    #[test]
    fn unsupported_and_foreign_versions() {
        let header = OfpHeader::new(OFP_VERSION, MsgCode::BarrierResp as u8, 8, 0);
        assert!(matches!(
            Message::parse(&header, &[]),
            Err(CodecError::UnsupportedMessage(19))
        ));
        let header = OfpHeader::new(0x04, MsgCode::PacketIn as u8, 18, 0);
        assert!(matches!(
            Message::parse(&header, &[0; 10]),
            Err(CodecError::UnsupportedVersion(0x04))
        ));
        let header = OfpHeader::new(0x04, MsgCode::Hello as u8, 8, 5);
        assert_eq!(Message::parse(&header, &[]).unwrap(), (5, Message::Hello));
    }

    #[test]
    fn packet_in_keeps_buffer_id() {
        let pi = PacketIn {
            input_payload: Payload::Buffered(12, vec![0xaa; 20]),
            total_len: 60,
            port: 1,
            reason: PacketInReason::NoMatch,
        };
        let bytes = Message::marshal(2, Message::PacketIn(pi.clone())).unwrap();
        assert_eq!(reparse(&bytes), (2, Message::PacketIn(pi)));
    }
}
