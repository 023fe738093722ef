use std::fmt;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::SwitchFeatures;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound half of a switch control channel.
///
/// Sends are fire-and-forget: nothing waits for the switch to acknowledge a message.
pub trait Transport: Send + Sync {
    /// Send `msg` to the switch under transaction id `xid`.
    fn send_message(&self, xid: u32, msg: Message) -> Result<()>;
}

/// Writes marshaled messages to the switch's TCP stream.
pub struct TcpTransport {
    stream: Mutex<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> TcpTransport {
        TcpTransport {
            stream: Mutex::new(stream),
        }
    }
}

impl Transport for TcpTransport {
    fn send_message(&self, xid: u32, msg: Message) -> Result<()> {
        let bytes = Message::marshal(xid, msg)?;
        self.stream.lock().write_all(&bytes)?;
        Ok(())
    }
}

/// Queues messages in memory instead of sending them, for driving the controller without
/// sockets.
impl Transport for Mutex<Vec<(u32, Message)>> {
    fn send_message(&self, xid: u32, msg: Message) -> Result<()> {
        self.lock().push((xid, msg));
        Ok(())
    }
}

/// Handle to a connected switch.
///
/// Clones share the transport and the transaction id sequence.
#[derive(Clone)]
pub struct SwitchConnection {
    id: u64,
    features: Arc<SwitchFeatures>,
    transport: Arc<dyn Transport>,
    next_xid: Arc<AtomicU32>,
}

impl SwitchConnection {
    pub fn new(features: SwitchFeatures, transport: Arc<dyn Transport>) -> SwitchConnection {
        SwitchConnection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            features: Arc::new(features),
            transport,
            next_xid: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn datapath_id(&self) -> u64 {
        self.features.datapath_id
    }

    /// Identifies this connection among every connection the process accepted.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn features(&self) -> &SwitchFeatures {
        &self.features
    }

    /// Send `msg` under a fresh transaction id.
    pub fn send(&self, msg: Message) -> Result<()> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.transport.send_message(xid, msg)
    }
}

impl fmt::Debug for SwitchConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchConnection")
            .field("datapath_id", &format_args!("{:#x}", self.datapath_id()))
            .field("id", &self.id)
            .field("num_tables", &self.features.num_tables)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;

    #[test]
    fn xids_increase_per_connection() {
        let (conn, sent) = connection(1);
        conn.send(crate::openflow0x01::message::Message::Hello).unwrap();
        conn.clone().send(crate::openflow0x01::message::Message::FeaturesReq).unwrap();
        let xids: Vec<u32> = sent.lock().iter().map(|(xid, _)| *xid).collect();
        assert_eq!(xids, vec![1, 2]);
    }

    #[test]
    fn connections_get_distinct_ids() {
        let (a, _) = connection(1);
        let (b, _) = connection(1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.datapath_id(), b.datapath_id());
    }
}
