use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which installed paths a decision deletes after forwarding its packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RetirePolicy {
    /// Only the path the packet went over. The alternate path stays installed and keeps
    /// carrying the flow until it is flushed.
    #[default]
    Forwarded,
    /// Every installed path, so each new packet of the flow comes back to the controller.
    All,
}

/// Knobs of the forwarding engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub retire: RetirePolicy,
    /// Flush the flow table of a switch when it connects, before the table-miss rule.
    pub flush_on_connect: bool,
}

/// OpenFlow 1.0 controller forwarding over alternating paths.
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Cli {
    /// Address to accept switch connections on.
    #[clap(long, short = 'l', env = "OFP_LISTEN", default_value = "0.0.0.0:6633")]
    pub listen: SocketAddr,
    /// JSON file describing switches, links and hosts.
    #[clap(long, short = 't', env = "OFP_TOPOLOGY")]
    pub topology: PathBuf,
    /// Paths to delete once a packet has been forwarded.
    #[clap(long, short = 'r', value_enum, default_value_t = RetirePolicy::Forwarded)]
    pub retire: RetirePolicy,
    /// Delete every rule of a switch when it connects.
    #[clap(long)]
    pub flush_on_connect: bool,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retire: self.retire,
            flush_on_connect: self.flush_on_connect,
        }
    }
}
