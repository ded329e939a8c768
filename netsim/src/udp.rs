//! Best-effort UDP delivery. spec.md §1 calls the source's UDP support "vestigial"; §9's open
//! question resolves it to "include only the delivery path (no reliability)". There is no
//! retransmission, no ordering guarantee, and no congestion control here — a datagram that's lost
//! on the link is simply gone.

use std::net::Ipv4Addr;
use std::rc::Rc;

use bytes::Bytes;

use crate::host::Host;
use crate::packet::{Packet, Payload};

#[derive(Clone, Debug)]
pub struct UdpDatagram {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Bytes,
}

/// A bound UDP endpoint. Received datagrams accumulate in `inbox` until [`UdpSocket::recv_from`]
/// drains them; there's no blocking receive since spec.md's Non-goals never ask for one on the
/// UDP path (only TCP's `recv` is specified as suspending).
pub struct UdpSocket {
    host: Rc<Host>,
    port: u16,
    inbox: std::cell::RefCell<std::collections::VecDeque<(Ipv4Addr, u16, Bytes)>>,
}

impl UdpSocket {
    pub(crate) fn new(host: Rc<Host>, port: u16) -> Rc<Self> {
        Rc::new(Self {
            host,
            port,
            inbox: Default::default(),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn send_to(&self, dst_ip: Ipv4Addr, dst_port: u16, payload: Bytes) {
        let id = self.host.alloc_packet_id();
        let packet = Packet {
            id,
            src_ip: self.host.ip,
            dst_ip,
            payload: Payload::Udp(UdpDatagram {
                src_port: self.port,
                dst_port,
                payload,
            }),
        };
        self.host.send(packet);
    }

    pub(crate) fn deliver(&self, src_ip: Ipv4Addr, dgram: UdpDatagram) {
        self.inbox
            .borrow_mut()
            .push_back((src_ip, dgram.src_port, dgram.payload));
    }

    /// Pop the oldest buffered datagram, if any.
    pub fn recv_from(&self) -> Option<(Ipv4Addr, u16, Bytes)> {
        self.inbox.borrow_mut().pop_front()
    }
}
