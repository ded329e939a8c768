//! Setup-time network topology: the set of hosts and the unidirectional links between them that
//! `netsim` turns into live `Host`/`Link` objects before a run starts.
//!
//! The builder API here is grounded on the general shape of
//! `shadow-shadow/src/main/core/configuration.rs`'s `NetworkGraph`/host-config construction (build
//! up a plain data description first, validate it as a whole, then hand it to the runtime); the
//! textual DSL in [`dsl`] borrows its parser-module split (`lib.rs` driving a `parser` module that
//! returns a typed document, errors rendered with `nom_language::error::convert_error`) from
//! `shadow-shadow/src/lib/gml-parser`, the closest thing in the pack to a declarative-graph-file
//! reader, even though the surface grammar here is spec.md's own line-oriented `host`/`link`
//! syntax rather than GML.

pub mod dsl;

use std::net::Ipv4Addr;

/// A host to be created at topology setup, identified by a unique IPv4 address (spec.md §3: "ip
/// unique across hosts").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostSpec {
    pub ip: Ipv4Addr,
}

/// A unidirectional link to be created at topology setup, per spec.md §6's Topology DSL:
/// `(source_host, dest_host, prop_delay_seconds, bandwidth_bytes_per_second)` plus mutable
/// `loss`/`max_queue`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkSpec {
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
    pub prop_delay: f64,
    pub bandwidth: f64,
    pub loss: f64,
    pub max_queue: usize,
}

/// Default max queue depth for a link whose DSL declaration doesn't override it (spec.md §6:
/// "default `max_queue = 48`").
pub const DEFAULT_MAX_QUEUE: usize = 48;

/// An error discovered while validating a fully-built [`Topology`] (spec.md §7: configuration
/// errors are "surfaced immediately to caller; fatal for that call").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    DuplicateHost(Ipv4Addr),
    UnknownEndpoint { link_index: usize, ip: Ipv4Addr },
}

impl std::fmt::Display for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::DuplicateHost(ip) => write!(f, "duplicate host ip {ip}"),
            TopologyError::UnknownEndpoint { link_index, ip } => {
                write!(f, "link #{link_index} references unknown host {ip}")
            }
        }
    }
}

impl std::error::Error for TopologyError {}

/// A builder for the static network description handed to the simulator at startup. Mirrors
/// spec.md §6's Topology DSL: `Topology::new().host(ip).host(ip).link(...)`.
#[derive(Debug, Default, Clone)]
pub struct Topology {
    hosts: Vec<HostSpec>,
    links: Vec<LinkSpec>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host(mut self, ip: Ipv4Addr) -> Self {
        self.hosts.push(HostSpec { ip });
        self
    }

    /// Add a single unidirectional link with default `loss = 0.0` and `max_queue =
    /// DEFAULT_MAX_QUEUE`. Use [`Topology::link_with`] to override either.
    #[must_use]
    pub fn link(self, from: Ipv4Addr, to: Ipv4Addr, prop_delay: f64, bandwidth: f64) -> Self {
        self.link_with(from, to, prop_delay, bandwidth, 0.0, DEFAULT_MAX_QUEUE)
    }

    #[must_use]
    pub fn link_with(
        mut self,
        from: Ipv4Addr,
        to: Ipv4Addr,
        prop_delay: f64,
        bandwidth: f64,
        loss: f64,
        max_queue: usize,
    ) -> Self {
        self.links.push(LinkSpec {
            from,
            to,
            prop_delay,
            bandwidth,
            loss,
            max_queue,
        });
        self
    }

    /// Add two opposed unidirectional links sharing the same physical parameters, per spec.md §6:
    /// "A duplex link is two opposed links."
    #[must_use]
    pub fn duplex_link(self, a: Ipv4Addr, b: Ipv4Addr, prop_delay: f64, bandwidth: f64) -> Self {
        self.link(a, b, prop_delay, bandwidth)
            .link(b, a, prop_delay, bandwidth)
    }

    pub fn hosts(&self) -> &[HostSpec] {
        &self.hosts
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    /// Check the structural invariants spec.md §3 requires of a `Host` table before the runtime
    /// builds live hosts/links from this description: host IPs are unique, and every link
    /// endpoint refers to a declared host.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut seen = std::collections::HashSet::new();
        for h in &self.hosts {
            if !seen.insert(h.ip) {
                return Err(TopologyError::DuplicateHost(h.ip));
            }
        }
        for (i, link) in self.links.iter().enumerate() {
            if !seen.contains(&link.from) {
                return Err(TopologyError::UnknownEndpoint {
                    link_index: i,
                    ip: link.from,
                });
            }
            if !seen.contains(&link.to) {
                return Err(TopologyError::UnknownEndpoint {
                    link_index: i,
                    ip: link.to,
                });
            }
        }
        Ok(())
    }
}
