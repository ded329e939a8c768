//! The simulator's stateful half: hosts, links, and TCP/UDP sockets bound to one
//! [`scheduler::Scheduler`]. The pure wire-format/congestion-control pieces live in the `tcp`
//! crate; the topology description format lives in `topology`; this crate wires them together the
//! way spec.md §2's data-flow diagram describes (`sendall` → host → link → host → peer socket).

pub mod config;
pub mod host;
pub mod link;
pub mod packet;
pub mod tcp_socket;
pub mod udp;

use std::cell::Cell;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::rc::Rc;

use scheduler::Scheduler;
use simlog::eventlog::EventLog;

use host::Host;
use link::{Link, LOOPBACK_BANDWIDTH, LOOPBACK_PROP_DELAY};
use tcp_socket::CongestionVariant;
use topology::Topology;

/// A fully-built simulation: a scheduler, an event log, and the set of [`Host`]s wired up per a
/// [`Topology`] (each carrying its outbound [`Link`]s, including a loopback link to itself per
/// spec.md §4.2). Build with [`Network::build`], drive with [`Network::scheduler`]'s `spawn`/
/// `run`.
pub struct Network {
    pub scheduler: Scheduler,
    pub log: Rc<EventLog>,
    pub congestion: CongestionVariant,
    hosts: HashMap<Ipv4Addr, Rc<Host>>,
}

impl Network {
    /// Construct every `Host` (sharing one packet-id counter across the whole run, per spec.md
    /// §3's "id unique within run") and every `Link` named by `topology`, plus one loopback link
    /// per host.
    pub fn build(topology: &Topology, scheduler: Scheduler, log: Rc<EventLog>) -> Self {
        Self::build_with_congestion(topology, scheduler, log, CongestionVariant::default())
    }

    pub fn build_with_congestion(
        topology: &Topology,
        scheduler: Scheduler,
        log: Rc<EventLog>,
        congestion: CongestionVariant,
    ) -> Self {
        let next_packet_id = Rc::new(Cell::new(0u64));
        let mut hosts = HashMap::new();

        for host_spec in topology.hosts() {
            let host = Host::with_packet_ids(
                host_spec.ip,
                scheduler.clone(),
                Rc::clone(&log),
                Rc::clone(&next_packet_id),
            );
            hosts.insert(host_spec.ip, host);
        }

        for host in hosts.values() {
            let loopback = Link::new(
                scheduler.clone(),
                Rc::clone(&log),
                host.ip,
                host.ip,
                Rc::clone(host),
                LOOPBACK_PROP_DELAY,
                LOOPBACK_BANDWIDTH,
                0.0,
                topology::DEFAULT_MAX_QUEUE,
            );
            host.add_route(host.ip, loopback);
        }

        for link_spec in topology.links() {
            let src = Rc::clone(&hosts[&link_spec.from]);
            let dst = Rc::clone(&hosts[&link_spec.to]);
            let link = Link::new(
                scheduler.clone(),
                Rc::clone(&log),
                link_spec.from,
                link_spec.to,
                dst,
                link_spec.prop_delay,
                link_spec.bandwidth,
                link_spec.loss,
                link_spec.max_queue,
            );
            src.add_route(link_spec.to, link);
        }

        Self {
            scheduler,
            log,
            congestion,
            hosts,
        }
    }

    pub fn host(&self, ip: Ipv4Addr) -> Option<Rc<Host>> {
        self.hosts.get(&ip).cloned()
    }

    /// Create a TCP socket on `ip` using the network's default congestion variant.
    pub fn tcp_socket(&self, ip: Ipv4Addr) -> Option<Rc<tcp_socket::TcpSocket>> {
        self.host(ip).map(|h| h.tcp_socket(self.congestion))
    }

    /// The live outbound `Link` from `from` to `to`, if both hosts exist and a route was set up
    /// between them. Lets scenario tests mutate `loss` on a running network (spec.md §6: "mutable
    /// `loss ∈ [0,1]`").
    pub fn link(&self, from: Ipv4Addr, to: Ipv4Addr) -> Option<Rc<Link>> {
        self.host(from)?.route(to)
    }

    pub fn run(&self) {
        self.scheduler.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_wires_loopback_and_cross_host_links() {
        let a: Ipv4Addr = "123.0.0.0".parse().unwrap();
        let b: Ipv4Addr = "101.0.0.0".parse().unwrap();
        let topo = Topology::new().host(a).host(b).duplex_link(a, b, 0.5, 100_000.0);

        let scheduler = Scheduler::new();
        let log = Rc::new(EventLog::to_writer(Vec::new()));
        let net = Network::build(&topo, scheduler, log);

        let host_a = net.host(a).unwrap();
        assert!(host_a.has_route(a));
        assert!(host_a.has_route(b));
    }
}
