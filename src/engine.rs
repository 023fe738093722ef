use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::classifier::{Flow, PacketClassifier};
use crate::config::{EngineConfig, RetirePolicy};
use crate::error::Error;
use crate::ofp_controller::openflow0x01::OF0x01Controller;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{Action, PacketIn, PacketOut, PseudoPort, SwitchFeatures};
use crate::registry::SwitchRegistry;
use crate::rules::{ResolvedPath, RuleProgrammer};
use crate::selector::{AlternationCounter, PathSelector};
use crate::switch::SwitchConnection;
use crate::topology::{Path, Topology};

/// Steps of a forwarding decision, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Classifying,
    PathSelecting,
    Installing,
    Forwarding,
    Retiring,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Idle => "idle",
            Stage::Classifying => "classifying",
            Stage::PathSelecting => "selecting a path",
            Stage::Installing => "installing",
            Stage::Forwarding => "forwarding",
            Stage::Retiring => "retiring",
        })
    }
}

/// A decision that ended without forwarding. Nothing was programmed.
#[derive(Debug, thiserror::Error)]
#[error("packet dropped while {stage}: {reason}")]
pub struct Dropped {
    pub stage: Stage,
    #[source]
    pub reason: Error,
}

/// What a completed decision did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Alternation counter tick the decision consumed.
    pub tick: u64,
    pub forwarded: Path,
    /// Installed path the packet did not take.
    pub alternate: Option<Path>,
    /// Port the packet was sent out of, if a packet-out was sent.
    pub out_port: Option<u16>,
    pub installed_hops: usize,
    pub retired_hops: usize,
}

/// Routes unmatched packets over paths computed by the topology.
///
/// Every decision installs the rules of up to two candidate paths, forwards the packet over
/// the one picked by the alternation counter and then retires rules per [`RetirePolicy`].
pub struct ForwardingEngine {
    config: EngineConfig,
    registry: RwLock<SwitchRegistry>,
    counter: AlternationCounter,
    classifier: PacketClassifier,
    selector: PathSelector,
    rules: RuleProgrammer,
}

impl ForwardingEngine {
    pub fn new(topology: Arc<dyn Topology>, config: EngineConfig) -> ForwardingEngine {
        ForwardingEngine {
            config,
            registry: RwLock::new(SwitchRegistry::new()),
            counter: AlternationCounter::new(),
            classifier: PacketClassifier::new(topology.clone()),
            selector: PathSelector::new(topology),
            rules: RuleProgrammer::new(),
        }
    }

    /// Number of completed decisions.
    pub fn decisions(&self) -> u64 {
        self.counter.current()
    }

    /// Sorted datapath ids of the connected switches.
    pub fn switches(&self) -> Vec<u64> {
        self.registry.read().switches()
    }

    /// Run a forwarding decision for a packet switch `sw` could not match.
    pub fn decide(&self, sw: u64, pkt: PacketIn) -> Result<Decision, Dropped> {
        log::trace!("[Engine] {} -> {}", Stage::Idle, Stage::Classifying);
        let flow = self.classifier.classify(sw, pkt).map_err(|reason| Dropped {
            stage: Stage::Classifying,
            reason,
        })?;

        log::trace!("[Engine] {} -> {}", Stage::Classifying, Stage::PathSelecting);
        let selection = self
            .selector
            .select(&flow, &self.counter)
            .map_err(|reason| Dropped {
                stage: Stage::PathSelecting,
                reason,
            })?;

        // sends may block on a slow switch, so no lock is held past this point
        let (paths, ingress) = {
            let registry = self.registry.read();
            let paths: Vec<ResolvedPath<'_>> = selection
                .installed
                .iter()
                .map(|path| ResolvedPath::resolve(&registry, path))
                .collect();
            (paths, registry.get(flow.switch))
        };

        log::trace!("[Engine] {} -> {}", Stage::PathSelecting, Stage::Installing);
        let installed_hops: usize = paths.iter().map(|path| self.rules.install_path(path)).sum();

        log::trace!("[Engine] {} -> {}", Stage::Installing, Stage::Forwarding);
        let forwarded = &paths[selection.forwarded];
        let out_port = self.forward(ingress, flow, forwarded.path());

        log::trace!("[Engine] {} -> {}", Stage::Forwarding, Stage::Retiring);
        let retired_hops = match self.config.retire {
            RetirePolicy::Forwarded => self.rules.retire_path(forwarded),
            RetirePolicy::All => paths.iter().map(|path| self.rules.retire_path(path)).sum(),
        };
        log::trace!("[Engine] {} -> {}", Stage::Retiring, Stage::Idle);

        Ok(Decision {
            tick: selection.tick,
            forwarded: selection.forwarded().clone(),
            alternate: selection.alternate().cloned(),
            out_port,
            installed_hops,
            retired_hops,
        })
    }

    fn forward(
        &self,
        ingress: crate::error::Result<SwitchConnection>,
        flow: Flow,
        path: &Path,
    ) -> Option<u16> {
        let Some(port) = path.egress_port(flow.switch) else {
            log::warn!(
                "[Engine] switch {:#x} is not on {}, not sending the packet",
                flow.switch,
                path
            );
            return None;
        };
        let pkt_out = PacketOut {
            output_payload: flow.payload,
            port_id: Some(flow.in_port),
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(port))],
        };
        match ingress.and_then(|conn| conn.send(Message::PacketOut(pkt_out))) {
            Ok(()) => Some(port),
            Err(e) => {
                log::warn!("[Engine] cannot send packet out of switch {:#x}: {}", flow.switch, e);
                None
            }
        }
    }
}

impl OF0x01Controller for ForwardingEngine {
    fn switch_connected(&self, sw: u64, _: &SwitchFeatures, conn: SwitchConnection) {
        let connected = {
            let mut registry = self.registry.write();
            registry.connect(conn.clone());
            registry.len()
        };
        log::info!("[Engine] switch {:#x} registered, {} connected", sw, connected);
        if self.config.flush_on_connect {
            if let Err(e) = self.rules.delete_all_rules(&conn) {
                log::warn!("[Engine] cannot flush switch {:#x}: {}", sw, e);
            }
        }
        if let Err(e) = self.rules.install_table_miss(&conn) {
            log::warn!("[Engine] cannot install table-miss rule on switch {:#x}: {}", sw, e);
        }
    }

    fn switch_disconnected(&self, sw: u64, conn_id: u64) {
        if self.registry.write().disconnect(sw, conn_id) {
            log::info!("[Engine] switch {:#x} unregistered", sw);
        }
    }

    fn packet_in(&self, sw: u64, _: u32, pkt: PacketIn) {
        match self.decide(sw, pkt) {
            Ok(d) => log::info!(
                "[Engine] decision {} at switch {:#x}: forwarded over {} (out port {:?})",
                d.tick,
                sw,
                d.forwarded,
                d.out_port
            ),
            Err(Dropped {
                reason: Error::Filtered(typ),
                ..
            }) => log::trace!("[Engine] ignoring ether-type {:#06x} from switch {:#x}", typ, sw),
            Err(dropped) if dropped.reason.is_drop() => {
                log::info!("[Engine] switch {:#x}: {}", sw, dropped)
            }
            Err(dropped) => log::warn!("[Engine] switch {:#x}: {}", sw, dropped),
        }
    }
}
