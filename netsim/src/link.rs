//! Unidirectional, bounded, lossy link between two hosts (spec.md §4.2).
//!
//! The FIFO queue-plus-single-transmitter-token shape here is a simplified sibling of
//! `shadow-shadow/src/main/host/network/queuing.rs`'s `NetworkQueue`: that type supports both a
//! min-priority and a FIFO discipline (Shadow's general-purpose packet/socket scheduling queue),
//! but a `Link` only ever needs enqueue-order FIFO (spec.md §4.2: "packets leave source in enqueue
//! order"), so this is a plain `VecDeque` rather than the teacher's `BinaryHeap`-backed
//! `QueuingDiscipline`. The busy/idle transmitter token is modeled the way spec.md §5 describes
//! it: "a state flag around a sleep", not a lock, since nothing here is preemptible.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use rand::Rng;
use scheduler::Scheduler;
use simlog::eventlog::EventLog;

use crate::host::Host;
use crate::packet::Packet;

/// Loopback links use these in place of whatever the topology specifies for cross-host links
/// (spec.md §6: "loopback bandwidth ≈ 1e9 and delay ≈ 1e-6").
pub const LOOPBACK_BANDWIDTH: f64 = 1e9;
pub const LOOPBACK_PROP_DELAY: f64 = 1e-6;

pub struct Link {
    scheduler: Scheduler,
    log: Rc<EventLog>,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    dest: Rc<Host>,
    prop_delay: f64,
    bandwidth: f64,
    max_queue: usize,
    loss: Cell<f64>,
    queue: RefCell<VecDeque<Packet>>,
    transmitting: Cell<bool>,
    sent_count: Cell<u64>,
    dropped_count: Cell<u64>,
    /// Countdown armed by [`Link::force_drop_nth_enqueue`]: when `Some(1)`, the next `enqueue`
    /// call is dropped unconditionally and the countdown clears, regardless of the `loss` roll.
    /// Scenario tests use this to force a single, specific segment to go missing (spec.md §8's S5:
    /// "forward link drops the 3rd MSS once") without depending on exact virtual-time timing.
    force_drop: Cell<Option<u64>>,
}

impl Link {
    pub fn new(
        scheduler: Scheduler,
        log: Rc<EventLog>,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        dest: Rc<Host>,
        prop_delay: f64,
        bandwidth: f64,
        loss: f64,
        max_queue: usize,
    ) -> Rc<Self> {
        Rc::new(Self {
            scheduler,
            log,
            src_ip,
            dst_ip,
            dest,
            prop_delay,
            bandwidth,
            max_queue,
            loss: Cell::new(loss),
            queue: RefCell::new(VecDeque::new()),
            transmitting: Cell::new(false),
            sent_count: Cell::new(0),
            dropped_count: Cell::new(0),
            force_drop: Cell::new(None),
        })
    }

    fn tag(&self) -> String {
        format!("{}->{}", self.src_ip, self.dst_ip)
    }

    pub fn set_loss(&self, loss: f64) {
        self.loss.set(loss);
    }

    pub fn loss(&self) -> f64 {
        self.loss.get()
    }

    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.get()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.get()
    }

    /// Force the `n`th future `enqueue` call (counting from 1, starting now) to be dropped, no
    /// matter what `loss` rolls. Deterministic alternative to timing a `set_loss` flip precisely.
    pub fn force_drop_nth_enqueue(&self, n: u64) {
        assert!(n >= 1, "n is 1-indexed");
        self.force_drop.set(Some(n));
    }

    /// spec.md §4.2's `enqueue(packet)`: loss roll, then queue-depth check, then append and
    /// (if idle) wake the transmitter.
    pub fn enqueue(self: &Rc<Self>, packet: Packet) {
        let now = self.scheduler.now().as_secs_f64();
        simlog::set_current_time(now);

        if let Some(n) = self.force_drop.get() {
            if n <= 1 {
                self.force_drop.set(None);
                self.log.record(
                    now,
                    "packet-loss",
                    format_args!("{} id={} forced", self.tag(), packet.id),
                );
                return;
            }
            self.force_drop.set(Some(n - 1));
        }

        if rand::thread_rng().gen::<f64>() < self.loss.get() {
            self.log.record(
                now,
                "packet-loss",
                format_args!("{} id={}", self.tag(), packet.id),
            );
            return;
        }

        if self.queue.borrow().len() >= self.max_queue {
            self.log.record(
                now,
                "queue-overflow",
                format_args!("{} id={}", self.tag(), packet.id),
            );
            self.dropped_count.set(self.dropped_count.get() + 1);
            return;
        }

        self.log.record(
            now,
            "queue-start",
            format_args!("{} id={}", self.tag(), packet.id),
        );
        self.queue.borrow_mut().push_back(packet);

        if !self.transmitting.get() {
            self.transmitting.set(true);
            let link = Rc::clone(self);
            self.scheduler.spawn(async move { link.transmit_loop().await });
        }
    }

    /// Drains the queue one packet at a time, holding the "link busy" token for the transmission
    /// phase only; the propagation phase of each packet is spawned off as its own flow so it can
    /// overlap with the next packet's transmission (spec.md §4.2: "pipelined").
    async fn transmit_loop(self: Rc<Self>) {
        loop {
            let packet = self.queue.borrow_mut().pop_front();
            let Some(packet) = packet else {
                self.transmitting.set(false);
                break;
            };

            let now = self.scheduler.now().as_secs_f64();
            simlog::set_current_time(now);
            self.log.record(
                now,
                "queue-end",
                format_args!("{} id={}", self.tag(), packet.id),
            );
            self.log.record(
                now,
                "transmit-start",
                format_args!("{} id={}", self.tag(), packet.id),
            );

            let transmit_time = packet.size_bytes() as f64 / self.bandwidth;
            self.scheduler.sleep(transmit_time).await;

            let now = self.scheduler.now().as_secs_f64();
            simlog::set_current_time(now);
            self.log.record(
                now,
                "transmit-end",
                format_args!("{} id={}", self.tag(), packet.id),
            );
            self.sent_count.set(self.sent_count.get() + 1);

            let link = Rc::clone(&self);
            self.scheduler.spawn(async move { link.propagate(packet).await });
        }
    }

    async fn propagate(self: Rc<Self>, packet: Packet) {
        let now = self.scheduler.now().as_secs_f64();
        simlog::set_current_time(now);
        self.log.record(
            now,
            "propagate-start",
            format_args!("{} id={}", self.tag(), packet.id),
        );

        self.scheduler.sleep(self.prop_delay).await;

        let now = self.scheduler.now().as_secs_f64();
        simlog::set_current_time(now);
        self.log.record(
            now,
            "propagate-end",
            format_args!("{} id={}", self.tag(), packet.id),
        );

        self.dest.receive(packet);
    }
}
