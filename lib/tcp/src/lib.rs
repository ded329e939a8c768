//! Wire format and congestion-control building blocks shared by the simulator's TCP socket.
//!
//! This crate deliberately stays free of any scheduler or host/link dependency — it holds only
//! the pieces of TCP that are pure data transformations and so can be unit tested in isolation:
//! the packet/flags wire types, the send/receive byte buffers (sequence-number bookkeeping and
//! out-of-order reassembly), and the Tahoe/Reno congestion-window policies. The stateful socket
//! that drives these with the cooperative scheduler and a host's routing table lives in the
//! `netsim` crate, since it needs to suspend flows (`sleep`/`wait`) and call back into a `Host` to
//! actually put bytes on a `Link` — concerns this crate has no business knowing about.
//!
//! This split mirrors `shadow-shadow/src/lib/tcp`, which is written as a ["sans-I/O"] library for
//! the same reason (so the TCP implementation doesn't need to know how its caller does I/O or
//! timers). We don't carry over its `Dependencies` trait / per-state-type design, though: that
//! crate's states are separate Rust types selected via `enum_dispatch` because Shadow's TCP must
//! also support non-blocking, poll-style callers. spec.md's socket API is blocking
//! (`sendall`/`recv`/`close` suspend the calling flow), which only makes sense bound to one
//! scheduler, so the state machine itself is owned by `netsim::tcp_socket` instead.
//!
//! ["sans-I/O"]: https://sans-io.readthedocs.io

pub mod buffer;
pub mod congestion;
pub mod packet;

/// Maximum Segment Size: the largest payload a single data packet may carry. Fixed by spec.md §6
/// (sources disagreed between 1500 and 3000; the spec picks 1500).
pub const MSS: u32 = 1500;

/// TCP header overhead charged against each packet's simulated size, per spec.md §6.
pub const TCP_HEADER_BYTES: u32 = 8;

/// Base IP-layer overhead charged against each packet's simulated size, per spec.md §6.
pub const IP_HEADER_BYTES: u32 = 4;

/// Initial congestion window, per spec.md §6.
pub const INITIAL_CWND: u32 = MSS;

/// Initial slow-start threshold, per spec.md §6.
pub const INITIAL_SSTHRESH: u32 = 96_000;

/// Initial retransmission timeout, in seconds, per spec.md §6.
pub const INITIAL_RTO: f64 = 3.0;

/// Lower bound clamped onto the RTO's EWMA update so a string of very short samples can't collapse
/// it to an unschedulable (or zero) duration. Not named by spec.md; see SPEC_FULL.md §6.
pub const RTO_MIN: f64 = 0.2;

/// Upper bound clamped onto the RTO's EWMA update so a single pathological sample can't stall
/// retransmission for the rest of the run. Not named by spec.md; see SPEC_FULL.md §6.
pub const RTO_MAX: f64 = 60.0;

/// Smoothing factor for the RTO EWMA update (`rto <- (rto + 2.5*sample) / 2`), per spec.md §9.
pub fn update_rto(previous_rto: f64, sample: f64) -> f64 {
    let updated = (previous_rto + 2.5 * sample) / 2.0;
    updated.clamp(RTO_MIN, RTO_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rto_update_matches_ewma_formula() {
        // (3.0 + 2.5*1.0) / 2.0 == 2.75
        assert!((update_rto(3.0, 1.0) - 2.75).abs() < 1e-9);
    }

    #[test]
    fn rto_update_is_clamped() {
        assert_eq!(update_rto(0.01, 0.0), RTO_MIN);
        assert_eq!(update_rto(1000.0, 1000.0), RTO_MAX);
    }
}
