//! Endpoint bound to one IP: owns outbound routes and demultiplexes inbound packets to sockets
//! (spec.md §4.3).

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::rc::Rc;

use scheduler::Scheduler;
use simlog::eventlog::EventLog;

use crate::link::Link;
use crate::packet::{Packet, Payload};
use crate::tcp_socket::TcpSocket;
use crate::udp::UdpSocket;

/// Ephemeral port range for unbound client sockets: the closed interval `[32768, 65536)`, i.e.
/// ports 32768..=65535 inclusive (spec.md §6).
pub const EPHEMERAL_PORT_RANGE: std::ops::RangeInclusive<u16> = 32768..=65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    PortInUse(u16),
    NoAvailablePorts,
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::PortInUse(p) => write!(f, "port {p} already in use"),
            HostError::NoAvailablePorts => write!(f, "no available ports"),
        }
    }
}

impl std::error::Error for HostError {}

pub struct Host {
    pub ip: Ipv4Addr,
    pub(crate) scheduler: Scheduler,
    pub(crate) log: Rc<EventLog>,
    routing: RefCell<HashMap<Ipv4Addr, Rc<Link>>>,
    next_packet_id: Rc<Cell<u64>>,

    tcp_bound_ports: RefCell<HashSet<u16>>,
    tcp_listeners: RefCell<HashMap<u16, Rc<TcpSocket>>>,
    tcp_established: RefCell<HashMap<(Ipv4Addr, u16), Rc<TcpSocket>>>,

    udp_sockets: RefCell<HashMap<u16, Rc<UdpSocket>>>,
}

impl Host {
    /// A standalone host with its own private packet-id counter — fine for tests that only ever
    /// look at one host's traffic. [`crate::Network::build`] instead uses
    /// [`Host::with_packet_ids`] so every host in a run shares one counter, since spec.md §3
    /// requires packet ids to be "unique within run", not merely within a host.
    pub fn new(ip: Ipv4Addr, scheduler: Scheduler, log: Rc<EventLog>) -> Rc<Self> {
        Self::with_packet_ids(ip, scheduler, log, Rc::new(Cell::new(0)))
    }

    pub fn with_packet_ids(
        ip: Ipv4Addr,
        scheduler: Scheduler,
        log: Rc<EventLog>,
        next_packet_id: Rc<Cell<u64>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            ip,
            scheduler,
            log,
            routing: RefCell::new(HashMap::new()),
            next_packet_id,
            tcp_bound_ports: RefCell::new(HashSet::new()),
            tcp_listeners: RefCell::new(HashMap::new()),
            tcp_established: RefCell::new(HashMap::new()),
            udp_sockets: RefCell::new(HashMap::new()),
        })
    }

    pub fn add_route(&self, dest_ip: Ipv4Addr, link: Rc<Link>) {
        self.routing.borrow_mut().insert(dest_ip, link);
    }

    pub fn has_route(&self, dest_ip: Ipv4Addr) -> bool {
        self.routing.borrow().contains_key(&dest_ip)
    }

    /// The outbound `Link` this host would use to reach `dest_ip`, if any. Exposed so callers
    /// (and scenario tests) can inspect queue occupancy or mutate `loss` on a live link without
    /// going back through topology setup.
    pub fn route(&self, dest_ip: Ipv4Addr) -> Option<Rc<Link>> {
        self.routing.borrow().get(&dest_ip).cloned()
    }

    pub fn alloc_packet_id(&self) -> u64 {
        let id = self.next_packet_id.get();
        self.next_packet_id.set(id + 1);
        id
    }

    /// Reserve a specific TCP local port (spec.md §4.4.1 `bind`: "port in use" is the only
    /// failure mode).
    pub fn bind_tcp_port(&self, port: u16) -> Result<(), HostError> {
        if !self.tcp_bound_ports.borrow_mut().insert(port) {
            return Err(HostError::PortInUse(port));
        }
        Ok(())
    }

    /// Reserve the lowest unused port in `[32768, 65536)` (spec.md §4.3).
    pub fn alloc_ephemeral_tcp_port(&self) -> Result<u16, HostError> {
        for port in EPHEMERAL_PORT_RANGE {
            if self.tcp_bound_ports.borrow_mut().insert(port) {
                return Ok(port);
            }
        }
        Err(HostError::NoAvailablePorts)
    }

    pub fn listen_tcp(&self, port: u16, socket: Rc<TcpSocket>) {
        self.tcp_listeners.borrow_mut().insert(port, socket);
    }

    pub fn register_established_tcp(&self, peer: (Ipv4Addr, u16), socket: Rc<TcpSocket>) {
        self.tcp_established.borrow_mut().insert(peer, socket);
    }

    pub fn unregister_established_tcp(&self, peer: &(Ipv4Addr, u16)) {
        self.tcp_established.borrow_mut().remove(peer);
    }

    pub(crate) fn tcp_established_contains(&self, peer: &(Ipv4Addr, u16)) -> bool {
        self.tcp_established.borrow().contains_key(peer)
    }

    /// Release a local TCP port when a socket fully closes (spec.md §3: a `TcpSocket` is
    /// "destroyed when CLOSED and idle").
    pub fn release_tcp_port(&self, port: u16) {
        self.tcp_bound_ports.borrow_mut().remove(&port);
        self.tcp_listeners.borrow_mut().remove(&port);
    }

    pub fn bind_udp_port(self: &Rc<Self>, port: u16) -> Rc<UdpSocket> {
        let socket = UdpSocket::new(Rc::clone(self), port);
        self.udp_sockets.borrow_mut().insert(port, Rc::clone(&socket));
        socket
    }

    /// Create a new TCP socket bound to this host, in the `CLOSED` state (spec.md §6:
    /// `socket(domain=AF_INET, type=SOCK_STREAM)`).
    pub fn tcp_socket(self: &Rc<Self>, congestion: crate::tcp_socket::CongestionVariant) -> Rc<TcpSocket> {
        TcpSocket::new(Rc::clone(self), congestion)
    }

    /// Look up the outbound link for `packet.dst_ip` and enqueue on it, or warn and drop
    /// (spec.md §4.3).
    pub fn send(self: &Rc<Self>, packet: Packet) {
        match self.routing.borrow().get(&packet.dst_ip).cloned() {
            Some(link) => link.enqueue(packet),
            None => {
                simlog::set_current_time(self.scheduler.now().as_secs_f64());
                log::warn!(
                    "host {}: no route to {}, dropping packet {}",
                    self.ip,
                    packet.dst_ip,
                    packet.id
                );
            }
        }
    }

    /// Demultiplex an inbound packet to the right socket (spec.md §4.3).
    pub fn receive(self: &Rc<Self>, packet: Packet) {
        simlog::set_current_time(self.scheduler.now().as_secs_f64());

        if packet.dst_ip != self.ip {
            log::warn!(
                "host {}: received packet {} addressed to {}, dropping",
                self.ip,
                packet.id,
                packet.dst_ip
            );
            return;
        }

        let src_ip = packet.src_ip;
        match packet.payload {
            Payload::Tcp(seg) => self.receive_tcp(src_ip, seg),
            Payload::Udp(dgram) => self.receive_udp(src_ip, dgram),
        }
    }

    fn receive_tcp(self: &Rc<Self>, src_ip: Ipv4Addr, seg: tcp::packet::TcpSegment) {
        let peer = (src_ip, seg.src.port());
        if let Some(sock) = self.tcp_established.borrow().get(&peer).cloned() {
            sock.on_segment(seg);
            return;
        }
        if let Some(sock) = self.tcp_listeners.borrow().get(&seg.dst.port()).cloned() {
            sock.on_segment(seg);
            return;
        }
        log::debug!(
            "host {}: no tcp socket for segment from {}:{}, dropping",
            self.ip,
            src_ip,
            seg.src.port()
        );
    }

    fn receive_udp(self: &Rc<Self>, src_ip: Ipv4Addr, dgram: crate::udp::UdpDatagram) {
        let port = dgram.dst_port;
        match self.udp_sockets.borrow().get(&port) {
            Some(sock) => sock.deliver(src_ip, dgram),
            None => log::debug!("host {}: no udp socket on port {port}, dropping", self.ip),
        }
    }
}
