//! Tahoe and Reno congestion-window policies.
//!
//! Shadow's own Rust TCP crate (`shadow-shadow/src/lib/tcp`) doesn't implement congestion control
//! — Shadow still delegates that to its legacy C stack — so there's no teacher file to adapt
//! directly here. The shape of this module (a small capability trait with `on_new_ack`/
//! `on_dup_ack`/`on_timeout`, selected by a tagged variant at socket construction) instead follows
//! spec.md §9's design note verbatim ("Abstract the controller as a capability set ... Tahoe and
//! Reno are tagged variants selected at socket construction"), and the module-per-concern split
//! (`congestion.rs` separate from the socket/state-machine code) follows the same file
//! organization as `shadow-shadow/src/lib/tcp/src/{buffer,seq,window_scaling}.rs`.

use crate::MSS;

/// What the sender's congestion window / slow-start threshold should be after observing an ACK or
/// a retransmission timeout. Both [`Tahoe`] and [`Reno`] implement this; the socket owns one
/// variant for the lifetime of the connection (spec.md: "selectable (default Reno)").
pub trait CongestionController: std::fmt::Debug {
    /// A new, not-yet-acknowledged-before ACK advanced `out_ack_i` by `new_bytes`.
    fn on_new_ack(&mut self, new_bytes: u32);

    /// A duplicate ACK for `ack_num` (one that didn't advance `out_ack_i`) was received. Returns
    /// `true` if this call detected a triple-duplicate-ACK loss and the caller should retransmit
    /// the segment starting at `ack_num`.
    fn on_dup_ack(&mut self, ack_num: u64) -> bool;

    /// A retransmission timeout fired for the oldest unacknowledged segment.
    fn on_timeout(&mut self);

    fn cwnd(&self) -> u32;
    fn ssthresh(&self) -> u32;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// Shared congestion-window bookkeeping used by both [`Tahoe`] and [`Reno`]; the two differ only
/// in their `on_dup_ack`/`on_timeout` policies (and Reno's extra `FastRecovery` phase).
#[derive(Debug)]
struct Common {
    phase: Phase,
    cwnd: u32,
    ssthresh: u32,
    dup_acks_since_new_ack: u32,
    last_dup_ack_num: Option<u64>,
}

impl Common {
    fn new() -> Self {
        Self {
            phase: Phase::SlowStart,
            cwnd: crate::INITIAL_CWND,
            ssthresh: crate::INITIAL_SSTHRESH,
            dup_acks_since_new_ack: 0,
            last_dup_ack_num: None,
        }
    }

    fn grow_on_new_ack(&mut self, new_bytes: u32) {
        self.dup_acks_since_new_ack = 0;
        self.last_dup_ack_num = None;
        match self.phase {
            Phase::SlowStart => {
                self.cwnd += new_bytes;
                if self.cwnd >= self.ssthresh {
                    self.phase = Phase::CongestionAvoidance;
                }
            }
            Phase::CongestionAvoidance => {
                let increase = std::cmp::max(1, (new_bytes as u64 * MSS as u64 / self.cwnd as u64) as u32);
                self.cwnd += increase;
            }
            Phase::FastRecovery => {
                // handled by the Reno-specific caller before this is reached
            }
        }
    }

    fn after_timeout(&mut self) {
        self.ssthresh = std::cmp::max(self.cwnd / 2, MSS);
        self.cwnd = MSS;
        self.phase = Phase::SlowStart;
        self.dup_acks_since_new_ack = 0;
        self.last_dup_ack_num = None;
    }
}

/// Tahoe: loss is detected only by retransmission timeout; duplicate ACKs are ignored.
#[derive(Debug)]
pub struct Tahoe(Common);

impl Tahoe {
    pub fn new() -> Self {
        Self(Common::new())
    }
}

impl Default for Tahoe {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController for Tahoe {
    fn on_new_ack(&mut self, new_bytes: u32) {
        self.0.grow_on_new_ack(new_bytes);
    }

    fn on_dup_ack(&mut self, _ack_num: u64) -> bool {
        false
    }

    fn on_timeout(&mut self) {
        self.0.after_timeout();
    }

    fn cwnd(&self) -> u32 {
        self.0.cwnd
    }

    fn ssthresh(&self) -> u32 {
        self.0.ssthresh
    }
}

/// Reno: adds fast retransmit/fast recovery after three duplicate ACKs for the same byte.
#[derive(Debug)]
pub struct Reno(Common);

impl Reno {
    pub fn new() -> Self {
        Self(Common::new())
    }
}

impl Default for Reno {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController for Reno {
    fn on_new_ack(&mut self, new_bytes: u32) {
        if self.0.phase == Phase::FastRecovery {
            self.0.cwnd = self.0.ssthresh;
            self.0.phase = Phase::CongestionAvoidance;
            self.0.dup_acks_since_new_ack = 0;
            self.0.last_dup_ack_num = None;
        } else {
            self.0.grow_on_new_ack(new_bytes);
        }
    }

    fn on_dup_ack(&mut self, ack_num: u64) -> bool {
        if self.0.phase == Phase::FastRecovery {
            self.0.cwnd += MSS;
            return false;
        }

        if self.0.last_dup_ack_num != Some(ack_num) {
            self.0.last_dup_ack_num = Some(ack_num);
            self.0.dup_acks_since_new_ack = 0;
        }
        self.0.dup_acks_since_new_ack += 1;

        if self.0.dup_acks_since_new_ack == 3 {
            self.0.ssthresh = self.0.cwnd / 2;
            self.0.cwnd = self.0.ssthresh + 3 * MSS;
            self.0.phase = Phase::FastRecovery;
            return true;
        }
        false
    }

    fn on_timeout(&mut self) {
        self.0.ssthresh = self.0.cwnd / 2;
        self.0.cwnd = MSS;
        self.0.phase = Phase::SlowStart;
        self.0.dup_acks_since_new_ack = 0;
        self.0.last_dup_ack_num = None;
    }

    fn cwnd(&self) -> u32 {
        self.0.cwnd
    }

    fn ssthresh(&self) -> u32 {
        self.0.ssthresh
    }
}
