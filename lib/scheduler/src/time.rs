use std::fmt;
use std::ops::{Add, Sub};

/// A point in virtual simulation time, measured in fractional seconds since the start of the
/// run.
///
/// Virtual time is a 64-bit float rather than an integer nanosecond count (as a real OS clock
/// would use) because the quantities that advance it — `bytes / bandwidth`, propagation delay,
/// RTT samples — are themselves floating-point throughout the spec this scheduler implements.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VirtualTime(f64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0.0);

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    pub fn saturating_add(&self, dur: f64) -> VirtualTime {
        assert!(dur >= 0.0, "durations must be non-negative, got {dur}");
        VirtualTime(self.0 + dur)
    }
}

impl fmt::Display for VirtualTime {
    /// Formats with the fixed width expected by the stable event log surface (`%10.4f`), so log
    /// consumers that depend on column alignment keep working.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:10.4}", self.0)
    }
}

impl Add<f64> for VirtualTime {
    type Output = VirtualTime;

    fn add(self, rhs: f64) -> VirtualTime {
        self.saturating_add(rhs)
    }
}

impl Sub for VirtualTime {
    type Output = f64;

    fn sub(self, rhs: VirtualTime) -> f64 {
        self.0 - rhs.0
    }
}

// Like `shadow-shadow`'s `Event` ordering (`src/main/core/work/event.rs`), time is compared with
// a panicking total order: two virtual times should never be incomparable (NaN), so treating
// `PartialOrd` as `Ord` via `.unwrap()` just turns a logic bug into an immediate panic instead of
// silent misordering.
impl PartialOrd for VirtualTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}
