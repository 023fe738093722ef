use crate::error::{Error, Result};
use crate::openflow0x01::message::{add_flow, delete_flow, Message};
use crate::openflow0x01::{Action, Pattern, PseudoPort};
use crate::registry::SwitchRegistry;
use crate::switch::SwitchConnection;
use crate::topology::{Hop, Path};

/// Priority of the catch-all rule sending unmatched packets to the controller.
pub const TABLE_MISS_PRIORITY: u16 = 0;

/// Priority of the rules installed along a path.
pub const PATH_RULE_PRIORITY: u16 = 1;

/// A path whose hops have been looked up in the registry.
///
/// Lookups happen once, under the registry lock; programming happens later without it.
pub struct ResolvedPath<'a> {
    path: &'a Path,
    hops: Vec<(Hop, Option<SwitchConnection>)>,
}

impl<'a> ResolvedPath<'a> {
    pub fn resolve(registry: &SwitchRegistry, path: &'a Path) -> ResolvedPath<'a> {
        ResolvedPath {
            path,
            hops: path.hops.iter().map(|hop| (*hop, registry.get(hop.switch).ok())).collect(),
        }
    }

    pub fn path(&self) -> &'a Path {
        self.path
    }
}

/// Programs flow rules on switches.
///
/// Every command is sent once and not acknowledged. Installing the same rule twice leaves it
/// to the switch to replace it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleProgrammer;

impl RuleProgrammer {
    pub fn new() -> RuleProgrammer {
        RuleProgrammer
    }

    /// Install a rule forwarding packets matching `pattern` out of `out_port`.
    pub fn install_rule(
        &self,
        conn: &SwitchConnection,
        priority: u16,
        pattern: Pattern,
        out_port: PseudoPort,
        buffer_id: Option<u32>,
    ) -> Result<()> {
        let mut flow_mod = add_flow(priority, pattern, vec![Action::Output(out_port)]);
        flow_mod.apply_to_packet = buffer_id;
        conn.send(Message::FlowMod(flow_mod))
    }

    /// Install the lowest priority rule sending every packet to the controller, unbuffered.
    pub fn install_table_miss(&self, conn: &SwitchConnection) -> Result<()> {
        log::debug!("[Rules] installing table-miss rule on switch {:#x}", conn.datapath_id());
        self.install_rule(
            conn,
            TABLE_MISS_PRIORITY,
            Pattern::match_all(),
            PseudoPort::Controller(PseudoPort::NO_BUFFER),
            None,
        )
    }

    /// Delete the rules matching `pattern` that output to `out_port`. Rules with the same
    /// match but another output port stay installed.
    pub fn delete_rule(&self, conn: &SwitchConnection, pattern: Pattern, out_port: u16) -> Result<()> {
        log::debug!(
            "[Rules] deleting rule {:?} -> {:?} (port {}) on switch {:#x}",
            pattern.dl_src,
            pattern.dl_dst,
            out_port,
            conn.datapath_id()
        );
        let mut flow_mod = delete_flow(pattern);
        flow_mod.out_port = Some(PseudoPort::PhysicalPort(out_port));
        conn.send(Message::FlowMod(flow_mod))
    }

    /// Flush the whole flow table of the switch, table-miss rule included.
    pub fn delete_all_rules(&self, conn: &SwitchConnection) -> Result<()> {
        log::warn!(
            "[Rules] flushing all {} flow table(s) of switch {:#x}",
            conn.features().num_tables,
            conn.datapath_id()
        );
        conn.send(Message::FlowMod(delete_flow(Pattern::match_all())))
    }

    /// Install the rules of `path` on every switch it crosses.
    ///
    /// A hop that cannot be programmed is skipped; the others are still installed.
    /// Returns the number of hops programmed.
    pub fn install_path(&self, path: &ResolvedPath<'_>) -> usize {
        let pattern = path.path.pattern();
        self.each_hop(path, "install", |conn, port| {
            self.install_rule(conn, PATH_RULE_PRIORITY, pattern, PseudoPort::PhysicalPort(port), None)
        })
    }

    /// Delete the rules of `path` from every switch it crosses. Best effort, like
    /// [`RuleProgrammer::install_path`].
    pub fn retire_path(&self, path: &ResolvedPath<'_>) -> usize {
        let pattern = path.path.pattern();
        self.each_hop(path, "retire", |conn, port| self.delete_rule(conn, pattern, port))
    }

    fn each_hop<F>(&self, path: &ResolvedPath<'_>, what: &str, mut f: F) -> usize
    where
        F: FnMut(&SwitchConnection, u16) -> Result<()>,
    {
        let mut done = 0;
        for (hop, conn) in &path.hops {
            let res = conn
                .as_ref()
                .ok_or(Error::UnknownSwitch(hop.switch))
                .and_then(|conn| f(conn, hop.port));
            match res {
                Ok(()) => done += 1,
                Err(e) => log::warn!(
                    "[Rules] cannot {} hop ({:#x}, {}) of {}: {}",
                    what,
                    hop.switch,
                    hop.port,
                    path.path,
                    e
                ),
            }
        }
        done
    }
}
