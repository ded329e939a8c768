//! Run configuration: deserialized from a YAML scenario file and overridable from the command
//! line, mirroring `shadow-shadow/src/main/core/support/configuration.rs`'s split between a
//! `serde`-deserialized file and `clap`-derived CLI flags.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::Deserialize;
use topology::Topology;

use crate::tcp_socket::CongestionVariant;

fn default_max_queue() -> usize {
    topology::DEFAULT_MAX_QUEUE
}

fn default_congestion() -> String {
    "reno".to_string()
}

/// One `host:` entry in the scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub ip: Ipv4Addr,
}

/// One `link:` entry. `loss`/`max_queue` default to spec.md §6's stated defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
    pub prop_delay: f64,
    pub bandwidth: f64,
    #[serde(default)]
    pub loss: f64,
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
    /// Whether to also install the reverse direction (spec.md §6: "a duplex link is two opposed
    /// links").
    #[serde(default)]
    pub duplex: bool,
}

/// Top-level scenario file: `stop_time`, a random seed for the link's loss rolls, the congestion
/// variant new TCP sockets default to, and the topology itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    pub stop_time: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_congestion")]
    pub congestion: String,
    pub hosts: BTreeMap<String, HostConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

#[derive(Debug, Clone, Copy)]
pub enum CongestionParseError {
    Unknown,
}

impl std::fmt::Display for CongestionParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown congestion variant (expected \"tahoe\" or \"reno\")")
    }
}

impl std::error::Error for CongestionParseError {}

pub fn parse_congestion(s: &str) -> Result<CongestionVariant, CongestionParseError> {
    match s.to_ascii_lowercase().as_str() {
        "tahoe" => Ok(CongestionVariant::Tahoe),
        "reno" => Ok(CongestionVariant::Reno),
        _ => Err(CongestionParseError::Unknown),
    }
}

impl ScenarioFile {
    /// Fold this file's `hosts`/`links` into a [`Topology`] builder.
    pub fn to_topology(&self) -> Topology {
        let mut topo = Topology::new();
        for host in self.hosts.values() {
            topo = topo.host(host.ip);
        }
        for link in &self.links {
            topo = if link.duplex {
                topo.duplex_link(link.from, link.to, link.prop_delay, link.bandwidth)
            } else {
                topo.link_with(
                    link.from,
                    link.to,
                    link.prop_delay,
                    link.bandwidth,
                    link.loss,
                    link.max_queue,
                )
            };
        }
        topo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_scenario_file() {
        let yaml = r#"
stop_time: 30.0
congestion: tahoe
hosts:
  client:
    ip: 123.0.0.0
  server:
    ip: 101.0.0.0
links:
  - from: 123.0.0.0
    to: 101.0.0.0
    prop_delay: 0.5
    bandwidth: 100000
    duplex: true
"#;
        let scenario: ScenarioFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.stop_time, Some(30.0));
        assert_eq!(scenario.hosts.len(), 2);
        assert_eq!(scenario.links.len(), 1);
        assert_eq!(scenario.links[0].max_queue, topology::DEFAULT_MAX_QUEUE);
        assert!(matches!(
            parse_congestion(&scenario.congestion),
            Ok(CongestionVariant::Tahoe)
        ));
    }

    #[test]
    fn rejects_unknown_congestion_token() {
        assert!(matches!(
            parse_congestion("vegas"),
            Err(CongestionParseError::Unknown)
        ));
    }
}
