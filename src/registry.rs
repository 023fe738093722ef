use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::switch::SwitchConnection;

/// Live switch connections keyed by datapath id.
#[derive(Debug, Default)]
pub struct SwitchRegistry {
    switches: HashMap<u64, SwitchConnection>,
}

impl SwitchRegistry {
    pub fn new() -> SwitchRegistry {
        SwitchRegistry::default()
    }

    /// Register `conn` under its datapath id, returning the connection it replaces.
    pub fn connect(&mut self, conn: SwitchConnection) -> Option<SwitchConnection> {
        let replaced = self.switches.insert(conn.datapath_id(), conn);
        if let Some(ref old) = replaced {
            log::info!(
                "[Registry] switch {:#x} reconnected, dropping connection {}",
                old.datapath_id(),
                old.id()
            );
        }
        replaced
    }

    /// Forget switch `datapath_id` if it is still registered under connection `conn_id`.
    ///
    /// A switch that already reconnected keeps its newer entry.
    pub fn disconnect(&mut self, datapath_id: u64, conn_id: u64) -> bool {
        match self.switches.get(&datapath_id) {
            Some(conn) if conn.id() == conn_id => {
                self.switches.remove(&datapath_id);
                true
            }
            Some(conn) => {
                log::debug!(
                    "[Registry] ignoring disconnect of stale connection {} for switch {:#x} (current {})",
                    conn_id,
                    datapath_id,
                    conn.id()
                );
                false
            }
            None => false,
        }
    }

    pub fn get(&self, datapath_id: u64) -> Result<SwitchConnection> {
        self.switches
            .get(&datapath_id)
            .cloned()
            .ok_or(Error::UnknownSwitch(datapath_id))
    }

    /// Sorted datapath ids of the registered switches.
    pub fn switches(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.switches.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}
