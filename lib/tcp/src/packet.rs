//! TCP segment wire representation.
//!
//! Grounded on `shadow-shadow/src/lib/tcp/src/lib.rs`'s `TcpFlags`/`TcpHeader` (same bitflags-
//! over-a-header shape), trimmed to the fields spec.md's data model names: `seq_num`, `ack_num`,
//! `{SYN, ACK, FIN}` flags, and a `timestamp` echoed back in the ACK for RTT sampling. We don't
//! carry over window scaling, selective acks, or ECN/CWR — spec.md's Non-goals explicitly exclude
//! SACK, and the rest isn't named by spec.md at all.

use std::net::SocketAddrV4;

use bytes::Bytes;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const SYN = 1 << 0;
        const ACK = 1 << 1;
        const FIN = 1 << 2;
    }
}

impl TcpFlags {
    /// A short token used by the stable event-log surface (`tcp-send`/`tcp-recv` kind field),
    /// e.g. `"syn"`, `"syn+ack"`, `"data"`, `"fin+ack"`.
    pub fn kind_token(&self, has_payload: bool) -> String {
        let mut parts = Vec::new();
        if self.contains(TcpFlags::SYN) {
            parts.push("syn");
        }
        if self.contains(TcpFlags::FIN) {
            parts.push("fin");
        }
        if self.contains(TcpFlags::ACK) {
            parts.push("ack");
        }
        if parts.is_empty() || (has_payload && !self.contains(TcpFlags::SYN | TcpFlags::FIN)) {
            return "data".to_string();
        }
        parts.join("+")
    }
}

/// A single TCP segment as it travels over a simulated [`Link`][crate::packet]. Exactly one of
/// {data, SYN, FIN, SYN+ACK, ACK} is meant to be interpretable per spec.md's data model, though
/// this type doesn't enforce that statically — the socket state machine is responsible for only
/// constructing sensible combinations.
#[derive(Clone, Debug)]
pub struct TcpSegment {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub seq_num: u64,
    pub ack_num: u64,
    pub flags: TcpFlags,
    /// Send-time timestamp, echoed back unchanged in the ACK so the sender can sample RTT
    /// (spec.md §9: "timestamp echo for RTT").
    pub timestamp: f64,
    pub payload: Bytes,
}

impl TcpSegment {
    /// Total on-the-wire size in bytes, including the fixed TCP + IP header overhead from
    /// spec.md §6. Used by the link model to compute transmit time.
    pub fn size_bytes(&self) -> u32 {
        crate::TCP_HEADER_BYTES + crate::IP_HEADER_BYTES + self.payload.len() as u32
    }
}
