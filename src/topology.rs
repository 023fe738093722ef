use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::openflow0x01::Pattern;
use crate::packet::MacAddr;

/// A switch together with the port a path leaves it through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub switch: u64,
    pub port: u16,
}

impl Hop {
    pub fn new(switch: u64, port: u16) -> Hop {
        Hop { switch, port }
    }
}

/// Route from host `src` to host `dst`: the switches crossed, in order, with their egress ports.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Path {
    pub src: MacAddr,
    pub hops: Vec<Hop>,
    pub dst: MacAddr,
}

impl Path {
    pub fn new(src: MacAddr, hops: Vec<Hop>, dst: MacAddr) -> Path {
        Path { src, hops, dst }
    }

    /// Port the path leaves `switch` through, if the path crosses it.
    pub fn egress_port(&self, switch: u64) -> Option<u16> {
        self.hops.iter().find(|hop| hop.switch == switch).map(|hop| hop.port)
    }

    /// Match selecting the frames this path carries.
    pub fn pattern(&self) -> Pattern {
        Pattern::between(self.src, self.dst)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.src)?;
        for hop in &self.hops {
            write!(f, " -> ({:#x}, {})", hop.switch, hop.port)?;
        }
        write!(f, " -> {}", self.dst)
    }
}

/// Network view the controller routes against.
pub trait Topology: Send + Sync {
    /// Link-layer address of the host owning `ip`, if it has been seen.
    fn host_by_ip(&self, ip: Ipv4Addr) -> Option<MacAddr>;
    /// Every candidate path from `src` to `dst`, best first. Empty when none is known.
    fn paths_with_ports(&self, src: MacAddr, dst: MacAddr) -> Vec<Path>;
}

/// Bidirectional link between two switch ports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub a: Hop,
    pub b: Hop,
}

/// Host attached to a switch port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub switch: u64,
    pub port: u16,
}

/// On-disk description of a static topology.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub switches: Vec<u64>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

/// Candidates returned per query unless [`StaticTopology::with_path_limit`] says otherwise.
pub const DEFAULT_PATH_LIMIT: usize = 4;

/// Topology fixed at startup.
///
/// Candidate paths are the loop-free switch walks from the source host's switch to the
/// destination host's switch. Parallel links yield distinct paths. Paths are ordered by
/// hop count, then by their hops, and only the first `path_limit` are returned. Walks are
/// searched one length at a time, so longer walks are never explored once enough shorter
/// ones are found.
#[derive(Debug)]
pub struct StaticTopology {
    path_limit: usize,
    graph: DiGraph<u64, u16>,
    nodes: HashMap<u64, NodeIndex>,
    hosts: HashMap<MacAddr, Host>,
    ips: HashMap<Ipv4Addr, MacAddr>,
}

impl StaticTopology {
    pub fn new(config: TopologyConfig) -> Result<StaticTopology> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for sw in config.switches {
            if nodes.insert(sw, graph.add_node(sw)).is_some() {
                return Err(Error::Topology(format!("switch {:#x} listed twice", sw)));
            }
        }
        let node = |sw: u64| {
            nodes
                .get(&sw)
                .copied()
                .ok_or_else(|| Error::Topology(format!("unknown switch {:#x}", sw)))
        };

        let mut used = HashSet::new();
        for link in &config.links {
            let (a, b) = (node(link.a.switch)?, node(link.b.switch)?);
            for end in [link.a, link.b] {
                if !used.insert(end) {
                    return Err(Error::Topology(format!(
                        "port {} of switch {:#x} is used twice",
                        end.port, end.switch
                    )));
                }
            }
            graph.add_edge(a, b, link.a.port);
            graph.add_edge(b, a, link.b.port);
        }

        let mut hosts = HashMap::new();
        let mut ips = HashMap::new();
        for host in config.hosts {
            node(host.switch)?;
            if !used.insert(Hop::new(host.switch, host.port)) {
                return Err(Error::Topology(format!(
                    "host {} sits on port {} of switch {:#x}, which is already used",
                    host.mac, host.port, host.switch
                )));
            }
            if ips.insert(host.ip, host.mac).is_some() {
                return Err(Error::Topology(format!("address {} assigned twice", host.ip)));
            }
            if let Some(dup) = hosts.insert(host.mac, host) {
                return Err(Error::Topology(format!("host {} listed twice", dup.mac)));
            }
        }

        Ok(StaticTopology {
            path_limit: DEFAULT_PATH_LIMIT,
            graph,
            nodes,
            hosts,
            ips,
        })
    }

    /// Return at most `limit` candidates per query, never fewer than one.
    pub fn with_path_limit(mut self, limit: usize) -> StaticTopology {
        self.path_limit = limit.max(1);
        self
    }

    pub fn from_json(json: &str) -> Result<StaticTopology> {
        StaticTopology::new(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &std::path::Path) -> Result<StaticTopology> {
        let json = fs::read_to_string(path)?;
        let topo = StaticTopology::from_json(&json)?;
        log::info!(
            "[Topology] loaded {} switches, {} links and {} hosts from {}",
            topo.nodes.len(),
            topo.graph.edge_count() / 2,
            topo.hosts.len(),
            path.display()
        );
        Ok(topo)
    }

    /// Collect the walks from `at` to the destination switch crossing exactly `len` switches.
    fn walk(
        &self,
        at: NodeIndex,
        dst: &Host,
        len: usize,
        visited: &mut Vec<NodeIndex>,
        hops: &mut Vec<Hop>,
        found: &mut Vec<Vec<Hop>>,
    ) {
        let switch = self.graph[at];
        if switch == dst.switch {
            if len == 1 {
                hops.push(Hop::new(switch, dst.port));
                found.push(hops.clone());
                hops.pop();
            }
            return;
        }
        if len <= 1 {
            return;
        }
        visited.push(at);
        for edge in self.graph.edges(at) {
            if visited.contains(&edge.target()) {
                continue;
            }
            hops.push(Hop::new(switch, *edge.weight()));
            self.walk(edge.target(), dst, len - 1, visited, hops, found);
            hops.pop();
        }
        visited.pop();
    }
}

impl Topology for StaticTopology {
    fn host_by_ip(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.ips.get(&ip).copied()
    }

    fn paths_with_ports(&self, src: MacAddr, dst: MacAddr) -> Vec<Path> {
        let (Some(src_host), Some(dst_host)) = (self.hosts.get(&src), self.hosts.get(&dst)) else {
            return vec![];
        };
        let (Some(&start), Some(&end)) =
            (self.nodes.get(&src_host.switch), self.nodes.get(&dst_host.switch))
        else {
            return vec![];
        };
        if !has_path_connecting(&self.graph, start, end, None) {
            return vec![];
        }

        let mut found = vec![];
        for len in 1..=self.graph.node_count() {
            let mut walks = vec![];
            self.walk(start, dst_host, len, &mut vec![], &mut vec![], &mut walks);
            walks.sort();
            found.extend(walks);
            if found.len() >= self.path_limit {
                break;
            }
        }
        found.truncate(self.path_limit);
        found.into_iter().map(|hops| Path::new(src, hops, dst)).collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Topology answering from fixed tables, counting path queries.
    #[derive(Debug, Default)]
    pub struct FixedTopology {
        pub hosts: HashMap<Ipv4Addr, MacAddr>,
        pub paths: Vec<Path>,
        pub path_queries: AtomicUsize,
    }

    impl FixedTopology {
        pub fn new(hosts: &[(Ipv4Addr, MacAddr)], paths: Vec<Path>) -> FixedTopology {
            FixedTopology {
                hosts: hosts.iter().copied().collect(),
                paths,
                path_queries: AtomicUsize::new(0),
            }
        }

        pub fn queries(&self) -> usize {
            self.path_queries.load(Ordering::SeqCst)
        }
    }

    impl Topology for FixedTopology {
        fn host_by_ip(&self, ip: Ipv4Addr) -> Option<MacAddr> {
            self.hosts.get(&ip).copied()
        }

        fn paths_with_ports(&self, src: MacAddr, dst: MacAddr) -> Vec<Path> {
            self.path_queries.fetch_add(1, Ordering::SeqCst);
            self.paths
                .iter()
                .filter(|p| p.src == src && p.dst == dst)
                .cloned()
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0, 0, 0, 0, 0, last])
    }

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

    #[test]
    fn parallel_links_give_two_ordered_paths() {
        let topo = StaticTopology::from_json(TWO_PATHS).unwrap();
        let paths = topo.paths_with_ports(mac(0xa), mac(0xb));
        assert_eq!(
            paths,
            vec![
                Path::new(
                    mac(0xa),
                    vec![Hop::new(1, 2), Hop::new(2, 3), Hop::new(3, 1)],
                    mac(0xb)
                ),
                Path::new(
                    mac(0xa),
                    vec![Hop::new(1, 2), Hop::new(2, 4), Hop::new(3, 1)],
                    mac(0xb)
                ),
            ]
        );
        let back = topo.paths_with_ports(mac(0xb), mac(0xa));
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].hops, vec![Hop::new(3, 2), Hop::new(2, 1), Hop::new(1, 1)]);
    }

    #[test]
    fn hosts_resolve_by_ip() {
        let topo = StaticTopology::from_json(TWO_PATHS).unwrap();
        assert_eq!(topo.host_by_ip(Ipv4Addr::new(10, 0, 0, 2)), Some(mac(0xb)));
        assert_eq!(topo.host_by_ip(Ipv4Addr::new(10, 0, 0, 9)), None);
        assert!(topo.paths_with_ports(mac(0xa), mac(0xc)).is_empty());
    }

    #[test]
    fn shorter_paths_come_first() {
        // triangle: 1-3 directly, or 1-2-3
        let topo = StaticTopology::new(TopologyConfig {
            switches: vec![1, 2, 3],
            links: vec![
                Link { a: Hop::new(1, 2), b: Hop::new(2, 1) },
                Link { a: Hop::new(2, 2), b: Hop::new(3, 2) },
                Link { a: Hop::new(1, 3), b: Hop::new(3, 3) },
            ],
            hosts: vec![
                Host { mac: mac(1), ip: Ipv4Addr::new(10, 0, 0, 1), switch: 1, port: 1 },
                Host { mac: mac(3), ip: Ipv4Addr::new(10, 0, 0, 3), switch: 3, port: 1 },
            ],
        })
        .unwrap();
        let paths = topo.paths_with_ports(mac(1), mac(3));
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].hops, vec![Hop::new(1, 3), Hop::new(3, 1)]);
        assert_eq!(paths[1].hops, vec![Hop::new(1, 2), Hop::new(2, 2), Hop::new(3, 1)]);
    }

    fn full_mesh(n: u64) -> StaticTopology {
        // port 1 of every switch faces its host, port j + 1 faces switch j
        let mut links = vec![];
        for i in 1..=n {
            for j in i + 1..=n {
                links.push(Link {
                    a: Hop::new(i, j as u16 + 1),
                    b: Hop::new(j, i as u16 + 1),
                });
            }
        }
        StaticTopology::new(TopologyConfig {
            switches: (1..=n).collect(),
            links,
            hosts: vec![
                Host { mac: mac(1), ip: Ipv4Addr::new(10, 0, 0, 1), switch: 1, port: 1 },
                Host { mac: mac(2), ip: Ipv4Addr::new(10, 0, 0, 2), switch: n, port: 1 },
            ],
        })
        .unwrap()
    }

    #[test]
    fn mesh_search_stops_at_the_limit() {
        let topo = full_mesh(12);
        let paths = topo.paths_with_ports(mac(1), mac(2));
        assert_eq!(paths.len(), DEFAULT_PATH_LIMIT);
        assert_eq!(paths[0].hops, vec![Hop::new(1, 13), Hop::new(12, 1)]);
        for (i, via) in (2..=4).enumerate() {
            assert_eq!(
                paths[i + 1].hops,
                vec![Hop::new(1, via as u16 + 1), Hop::new(via, 13), Hop::new(12, 1)]
            );
        }

        let two = full_mesh(12).with_path_limit(2);
        assert_eq!(two.paths_with_ports(mac(1), mac(2)), paths[..2].to_vec());
    }

    #[test]
    fn disconnected_hosts_have_no_paths() {
        let topo = StaticTopology::new(TopologyConfig {
            switches: vec![1, 2],
            links: vec![],
            hosts: vec![
                Host { mac: mac(1), ip: Ipv4Addr::new(10, 0, 0, 1), switch: 1, port: 1 },
                Host { mac: mac(2), ip: Ipv4Addr::new(10, 0, 0, 2), switch: 2, port: 1 },
            ],
        })
        .unwrap();
        assert!(topo.paths_with_ports(mac(1), mac(2)).is_empty());
    }

    #[test]
    fn hosts_on_one_switch() {
        let topo = StaticTopology::new(TopologyConfig {
            switches: vec![1],
            links: vec![],
            hosts: vec![
                Host { mac: mac(1), ip: Ipv4Addr::new(10, 0, 0, 1), switch: 1, port: 1 },
                Host { mac: mac(2), ip: Ipv4Addr::new(10, 0, 0, 2), switch: 1, port: 2 },
            ],
        })
        .unwrap();
        let paths = topo.paths_with_ports(mac(1), mac(2));
        assert_eq!(paths, vec![Path::new(mac(1), vec![Hop::new(1, 2)], mac(2))]);
    }

    #[test]
    fn rejects_inconsistent_topologies() {
        let unknown = TopologyConfig {
            switches: vec![1],
            links: vec![Link { a: Hop::new(1, 1), b: Hop::new(2, 1) }],
            hosts: vec![],
        };
        assert!(matches!(StaticTopology::new(unknown), Err(Error::Topology(_))));

        let reused = TopologyConfig {
            switches: vec![1, 2],
            links: vec![Link { a: Hop::new(1, 1), b: Hop::new(2, 1) }],
            hosts: vec![Host { mac: mac(1), ip: Ipv4Addr::new(10, 0, 0, 1), switch: 1, port: 1 }],
        };
        assert!(matches!(StaticTopology::new(reused), Err(Error::Topology(_))));

        assert!(matches!(StaticTopology::from_json("{"), Err(Error::Json(_))));
    }

    #[test]
    fn egress_port_scans_hops() {
        let path = Path::new(mac(1), vec![Hop::new(1, 2), Hop::new(2, 3)], mac(2));
        assert_eq!(path.egress_port(2), Some(3));
        assert_eq!(path.egress_port(9), None);
        assert_eq!(path.to_string(), "00:00:00:00:00:01 -> (0x1, 2) -> (0x2, 3) -> 00:00:00:00:00:02");
    }
}
