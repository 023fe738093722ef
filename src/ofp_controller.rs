use std::net::TcpStream;

use crate::error::Result;
use crate::ofp_message::OfpMessage;

/// OpenFlow Controller
///
/// Version-agnostic API for implementing an OpenFlow controller.
pub trait OfpController {
    /// OpenFlow message type supporting the same protocol version as the controller.
    type Message: OfpMessage;

    /// Perform handshake and loop reading incoming messages from the switch on `stream`
    /// until it disconnects.
    fn handle_client_connected(&self, stream: TcpStream) -> Result<()>;
}

pub mod openflow0x01 {
    use std::io::{self, BufReader, Read};
    use std::net::TcpStream;
    use std::sync::Arc;

    use super::OfpController;
    use crate::error::{CodecError, Result};
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use crate::openflow0x01::message::Message;
    use crate::openflow0x01::{PacketIn, PortStatus, SwitchError, SwitchFeatures};
    use crate::switch::{SwitchConnection, TcpTransport, Transport};

    /// OpenFlow 1.0 controller callbacks. One connection is served per thread, so callbacks
    /// for different switches may run concurrently.
    pub trait OF0x01Controller: Send + Sync {
        /// A switch completed the handshake. `conn` sends to it.
        fn switch_connected(&self, sw: u64, feats: &SwitchFeatures, conn: SwitchConnection);
        /// The connection with id `conn_id` to switch `sw` went away.
        fn switch_disconnected(&self, sw: u64, conn_id: u64);
        /// Switch `sw` sent a packet to the controller.
        fn packet_in(&self, sw: u64, xid: u32, pkt: PacketIn);

        /// A port of switch `sw` changed.
        fn port_status(&self, sw: u64, status: PortStatus) {
            log::debug!(
                "[Controller] switch {:#x} port {} ({}) {:?}, down: {}",
                sw,
                status.desc.port_no,
                status.desc.name,
                status.reason,
                status.desc.is_down()
            );
        }

        /// Switch `sw` reported an error about a message we sent.
        fn switch_error(&self, sw: Option<u64>, err: SwitchError) {
            log::warn!(
                "[Controller] switch {:?} reported error type {} code {}",
                sw,
                err.typ,
                err.code
            );
        }
    }

    impl<T: OF0x01Controller> OfpController for T {
        type Message = Message;

        fn handle_client_connected(&self, stream: TcpStream) -> Result<()> {
            let peer = stream.peer_addr()?;
            let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(stream.try_clone()?));
            transport.send_message(0, Message::Hello)?;
            transport.send_message(0, Message::FeaturesReq)?;

            let mut session = Session {
                controller: self,
                transport,
                conn: None,
            };
            let res = session.serve(BufReader::new(stream));
            if let Some(conn) = session.conn {
                log::info!("[Controller] switch {:#x} at {} disconnected", conn.datapath_id(), peer);
                self.switch_disconnected(conn.datapath_id(), conn.id());
            } else {
                log::info!("[Controller] {} disconnected before the handshake completed", peer);
            }
            res
        }
    }

    struct Session<'a, C: OF0x01Controller> {
        controller: &'a C,
        transport: Arc<dyn Transport>,
        conn: Option<SwitchConnection>,
    }

    impl<'a, C: OF0x01Controller> Session<'a, C> {
        fn serve<R: Read>(&mut self, mut reader: R) -> Result<()> {
            loop {
                let mut buf = [0; 8];
                match reader.read_exact(&mut buf) {
                    Ok(()) => (),
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
                let header = OfpHeader::parse(buf)?;
                let mut body = vec![0; header.body_length()?];
                reader.read_exact(&mut body)?;
                match Message::parse(&header, &body) {
                    Ok((xid, msg)) => self.dispatch(xid, msg)?,
                    Err(CodecError::UnsupportedMessage(code)) => {
                        log::debug!("[Controller] ignoring message type {}", code)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        fn dispatch(&mut self, xid: u32, msg: Message) -> Result<()> {
            let sw = self.conn.as_ref().map(SwitchConnection::datapath_id);
            match msg {
                Message::Hello => log::debug!("[Controller] hello"),
                Message::EchoRequest(data) => self.transport.send_message(xid, Message::EchoReply(data))?,
                Message::EchoReply(_) => (),
                Message::FeaturesReply(feats) => {
                    let conn = SwitchConnection::new(feats.clone(), self.transport.clone());
                    log::info!(
                        "[Controller] switch {:#x} connected: {} buffers, {} tables, {} ports",
                        feats.datapath_id,
                        feats.num_buffers,
                        feats.num_tables,
                        feats.ports.len()
                    );
                    self.conn = Some(conn.clone());
                    self.controller.switch_connected(feats.datapath_id, &feats, conn);
                }
                Message::PacketIn(pkt) => match sw {
                    Some(sw) => self.controller.packet_in(sw, xid, pkt),
                    None => log::warn!("[Controller] packet_in before features reply, dropping"),
                },
                Message::PortStatus(status) => match sw {
                    Some(sw) => self.controller.port_status(sw, status),
                    None => log::debug!("[Controller] port_status before features reply"),
                },
                Message::Error(err) => self.controller.switch_error(sw, err),
                other => log::warn!(
                    "[Controller] unexpected {:?} from switch {:?}",
                    Message::msg_code_of_message(&other),
                    sw
                ),
            }
            Ok(())
        }
    }
}
