use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use ofp_multipath::config::{EngineConfig, RetirePolicy};
use ofp_multipath::ofp_controller::OfpController;
use ofp_multipath::ofp_header::OfpHeader;
use ofp_multipath::ofp_message::OfpMessage;
use ofp_multipath::openflow0x01::message::Message;
use ofp_multipath::openflow0x01::{
    Action, Capabilities, FlowModCmd, PacketIn, PacketInReason, Pattern, Payload, PseudoPort,
    SupportedActions, SwitchFeatures,
};
use ofp_multipath::packet::{Arp, EthTyp, MacAddr, Nw, Packet};
use ofp_multipath::topology::StaticTopology;
use ofp_multipath::ForwardingEngine;
use pretty_assertions::assert_eq;

const TWO_PATHS: &str = r#"{
    "switches": [1, 2, 3],
    "links": [
        { "a": { "switch": 1, "port": 2 }, "b": { "switch": 2, "port": 1 } },
        { "a": { "switch": 2, "port": 3 }, "b": { "switch": 3, "port": 2 } },
        { "a": { "switch": 2, "port": 4 }, "b": { "switch": 3, "port": 3 } }
    ],
    "hosts": [
        { "mac": "00:00:00:00:00:0a", "ip": "10.0.0.1", "switch": 1, "port": 1 },
        { "mac": "00:00:00:00:00:0b", "ip": "10.0.0.2", "switch": 3, "port": 1 }
    ]
}"#;

const A: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 0x0a]);
const B: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 0x0b]);

fn start_controller(config: EngineConfig) -> SocketAddr {
    let topology = Arc::new(StaticTopology::from_json(TWO_PATHS).unwrap());
    let engine = Arc::new(ForwardingEngine::new(topology, config));
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = stream.unwrap();
            let engine = engine.clone();
            std::thread::spawn(move || engine.handle_client_connected(stream));
        }
    });
    addr
}

/// Speaks the switch side of an OpenFlow 1.0 session.
struct FakeSwitch {
    stream: TcpStream,
}

impl FakeSwitch {
    /// Connect and complete the handshake, up to the table-miss rule.
    fn connect(addr: SocketAddr, datapath_id: u64) -> FakeSwitch {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut sw = FakeSwitch { stream };

        assert_eq!(sw.recv().1, Message::Hello);
        assert_eq!(sw.recv().1, Message::FeaturesReq);
        sw.send(0, Message::Hello);
        sw.send(
            1,
            Message::FeaturesReply(SwitchFeatures {
                datapath_id,
                num_buffers: 256,
                num_tables: 1,
                capabilities: Capabilities(0xc7),
                actions: SupportedActions(0xfff),
                ports: vec![],
            }),
        );

        match sw.recv().1 {
            Message::FlowMod(fm) => {
                assert_eq!(fm.command, FlowModCmd::AddFlow);
                assert_eq!(fm.priority, 0);
                assert_eq!(fm.pattern, Pattern::match_all());
                assert_eq!(fm.actions, vec![Action::Output(PseudoPort::Controller(0xffff))]);
            }
            other => panic!("expected the table-miss rule, got {:?}", other),
        }
        sw
    }

    fn send(&mut self, xid: u32, msg: Message) {
        let bytes = Message::marshal(xid, msg).unwrap();
        self.stream.write_all(&bytes).unwrap();
    }

    fn recv(&mut self) -> (u32, Message) {
        let mut hdr = [0; 8];
        self.stream.read_exact(&mut hdr).unwrap();
        let header = OfpHeader::parse(hdr).unwrap();
        let mut body = vec![0; header.body_length().unwrap()];
        self.stream.read_exact(&mut body).unwrap();
        Message::parse(&header, &body).unwrap()
    }

    fn recv_n(&mut self, n: usize) -> Vec<Message> {
        (0..n).map(|_| self.recv().1).collect()
    }
}

fn arp_request(tpa: Ipv4Addr) -> PacketIn {
    let frame = Packet {
        dl_src: A,
        dl_dst: MacAddr::BROADCAST,
        dl_vlan: None,
        dl_vlan_pcp: 0,
        dl_typ: EthTyp::Arp as u16,
        nw: Nw::Arp(Arp::Query {
            sha: A,
            spa: Ipv4Addr::new(10, 0, 0, 1),
            tpa,
        }),
    };
    PacketIn {
        input_payload: Payload::Buffered(5, frame.marshal()),
        total_len: 42,
        port: 1,
        reason: PacketInReason::NoMatch,
    }
}

/// (command, output port) of a flow mod between A and B. Deletes report their out-port filter.
fn rule(msg: &Message) -> (FlowModCmd, Option<u16>) {
    match msg {
        Message::FlowMod(fm) => {
            assert_eq!(fm.pattern, Pattern::between(A, B));
            let port = fm
                .actions
                .iter()
                .map(|Action::Output(port)| *port)
                .chain(fm.out_port)
                .find_map(|port| match port {
                    PseudoPort::PhysicalPort(p) => Some(p),
                    _ => None,
                });
            (fm.command, port)
        }
        other => panic!("expected a flow mod, got {:?}", other),
    }
}

#[test_log::test]
fn echo_is_answered_with_same_xid() {
    let addr = start_controller(EngineConfig::default());
    let mut s1 = FakeSwitch::connect(addr, 1);
    s1.send(42, Message::EchoRequest(vec![1, 2, 3]));
    assert_eq!(s1.recv(), (42, Message::EchoReply(vec![1, 2, 3])));
}

#[test_log::test]
fn arp_request_is_forwarded_over_alternating_paths() {
    let addr = start_controller(EngineConfig::default());
    let mut s1 = FakeSwitch::connect(addr, 1);
    let mut s2 = FakeSwitch::connect(addr, 2);
    let mut s3 = FakeSwitch::connect(addr, 3);

    s1.send(7, Message::PacketIn(arp_request(Ipv4Addr::new(10, 0, 0, 2))));
    let at_s1 = s1.recv_n(4);
    assert_eq!(rule(&at_s1[0]), (FlowModCmd::AddFlow, Some(2)));
    assert_eq!(rule(&at_s1[1]), (FlowModCmd::AddFlow, Some(2)));
    match &at_s1[2] {
        Message::PacketOut(po) => {
            assert_eq!(po.output_payload.buffer_id(), Some(5));
            assert_eq!(po.port_id, Some(1));
            assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::PhysicalPort(2))]);
        }
        other => panic!("expected a packet out, got {:?}", other),
    }
    assert_eq!(rule(&at_s1[3]), (FlowModCmd::DeleteFlow, Some(2)));

    let at_s2: Vec<_> = s2.recv_n(3).iter().map(rule).collect();
    assert_eq!(
        at_s2,
        vec![
            (FlowModCmd::AddFlow, Some(3)),
            (FlowModCmd::AddFlow, Some(4)),
            (FlowModCmd::DeleteFlow, Some(3)),
        ]
    );
    let at_s3: Vec<_> = s3.recv_n(3).iter().map(rule).collect();
    assert_eq!(
        at_s3,
        vec![
            (FlowModCmd::AddFlow, Some(1)),
            (FlowModCmd::AddFlow, Some(1)),
            (FlowModCmd::DeleteFlow, Some(1)),
        ]
    );

    // the second decision goes over the other parallel link
    s1.send(8, Message::PacketIn(arp_request(Ipv4Addr::new(10, 0, 0, 2))));
    let at_s1 = s1.recv_n(4);
    assert!(matches!(&at_s1[2], Message::PacketOut(_)));
    let at_s2: Vec<_> = s2.recv_n(3).iter().map(rule).collect();
    assert_eq!(at_s2[2], (FlowModCmd::DeleteFlow, Some(4)));
    s3.recv_n(3);
}

#[test_log::test]
fn unknown_destination_programs_nothing() {
    let addr = start_controller(EngineConfig {
        retire: RetirePolicy::All,
        ..EngineConfig::default()
    });
    let mut s1 = FakeSwitch::connect(addr, 1);

    s1.send(7, Message::PacketIn(arp_request(Ipv4Addr::new(10, 0, 0, 9))));
    // an echo round trip proves the packet-in was handled without a reply
    s1.send(9, Message::EchoRequest(vec![]));
    assert_eq!(s1.recv(), (9, Message::EchoReply(vec![])));
}

#[test]
fn bundled_topologies_load() {
    for file in ["demos/mininet.json", "demos/two_paths.json"] {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(file);
        StaticTopology::from_file(&path).unwrap();
    }
}
