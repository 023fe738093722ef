use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::classifier::Flow;
use crate::error::{Error, Result};
use crate::topology::{Path, Topology};

/// Process-wide decision counter. Its parity picks the path a decision forwards over.
#[derive(Debug, Default)]
pub struct AlternationCounter {
    value: AtomicU64,
}

impl AlternationCounter {
    pub fn new() -> AlternationCounter {
        AlternationCounter::default()
    }

    /// Take the next tick. Concurrent callers get distinct ticks.
    pub fn tick(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of ticks taken so far.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Paths chosen for one decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Counter tick this decision consumed.
    pub tick: u64,
    /// Candidates whose rules get installed: the first two, or the only one.
    pub installed: Vec<Path>,
    /// Index into `installed` of the path the packet is forwarded over.
    pub forwarded: usize,
}

impl Selection {
    pub fn forwarded(&self) -> &Path {
        &self.installed[self.forwarded]
    }

    /// The installed candidate the packet is not forwarded over, if any.
    pub fn alternate(&self) -> Option<&Path> {
        self.installed
            .iter()
            .enumerate()
            .find(|(i, _)| *i != self.forwarded)
            .map(|(_, p)| p)
    }
}

/// Picks the paths a flow is programmed and forwarded over.
pub struct PathSelector {
    topology: Arc<dyn Topology>,
}

impl PathSelector {
    pub fn new(topology: Arc<dyn Topology>) -> PathSelector {
        PathSelector { topology }
    }

    /// Select paths for `flow`, consuming a tick of `counter` unless there is no route.
    ///
    /// With two or more candidates, the first two are installed and the one at
    /// `tick % 2` is forwarded over. A single candidate is installed and forwarded over
    /// whatever the tick.
    pub fn select(&self, flow: &Flow, counter: &AlternationCounter) -> Result<Selection> {
        let mut installed = self.topology.paths_with_ports(flow.src, flow.dst);
        if installed.is_empty() {
            return Err(Error::NoRoute {
                src: flow.src,
                dst: flow.dst,
            });
        }
        installed.truncate(2);
        let tick = counter.tick();
        let forwarded = if installed.len() == 2 { (tick % 2) as usize } else { 0 };
        Ok(Selection {
            tick,
            installed,
            forwarded,
        })
    }
}
