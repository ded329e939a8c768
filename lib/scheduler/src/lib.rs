//! Cooperative discrete-event scheduler over virtual time.
//!
//! This is the "flow" runtime described by the simulator's design: a single-threaded executor
//! that advances a virtual clock and multiplexes logical flows of control (ordinary Rust
//! `Future`s) around well-defined suspension points (`sleep`, `wait`). There is no real
//! parallelism and no wall-clock timing; a flow advances only when the scheduler decides to pop
//! the next timer off its heap and wake it.
//!
//! The source this design is modeled on (a discrete-event network simulator with a generator/
//! exception based coroutine runtime) suspends flows by throwing sentinel exceptions out of
//! Python generators. Rust has no generators on stable, but it does have `Future`, which is
//! exactly the "explicit continuation object that the scheduler stepwise advances" alternative —
//! so flows here are `Future`s spawned onto a `futures::executor::LocalPool`, and `sleep`/`wait`
//! are hand-written `Future` impls that register wakers with this crate's timer heap and
//! [`Event`] waiter lists respectively.
//!
//! Ordering guarantees (spec.md §4.1, §5): all callbacks scheduled for a given virtual time run
//! before the clock advances past it, in `(priority, insertion order)`; a `notify` wakes exactly
//! the waiters blocked at the moment it runs.

mod event;
mod heap;
mod time;

pub use event::{Event, TimeoutError};
pub use heap::TimerHandle;
pub use time::VirtualTime;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::task::Waker;

use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;

use heap::{TimerEntry, TimerHeap};

struct Inner {
    now: Cell<VirtualTime>,
    heap: RefCell<TimerHeap>,
    next_id: Cell<u64>,
    pool: RefCell<LocalPool>,
    spawner: futures::executor::LocalSpawner,
}

/// A handle to the cooperative scheduler. Cheap to clone (it's a reference-counted pointer to
/// shared state); every [`Host`][concept], [`Link`][concept], and `TcpSocket` in the simulation
/// holds one so it can read `now()`, `sleep`, or register on an [`Event`].
///
/// [concept]: https://shadow.github.io (conceptually mirrored, not an actual dependency)
#[derive(Clone)]
pub struct Scheduler(Rc<Inner>);

impl Scheduler {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self(Rc::new(Inner {
            now: Cell::new(VirtualTime::ZERO),
            heap: RefCell::new(TimerHeap::new()),
            next_id: Cell::new(0),
            pool: RefCell::new(pool),
            spawner,
        }))
    }

    pub fn now(&self) -> VirtualTime {
        self.0.now.get()
    }

    fn next_id(&self) -> u64 {
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        id
    }

    /// Register a zero-argument callback to run at `now() + delay`. Ties at the same time are
    /// broken by `(priority, insertion order)` — lower `priority` values run first.
    pub fn schedule(
        &self,
        delay: f64,
        priority: i32,
        callback: impl FnOnce() + 'static,
    ) -> TimerHandle {
        let id = self.next_id();
        let entry = TimerEntry {
            time: self.now().saturating_add(delay),
            priority,
            seq: id,
            id,
            callback: Box::new(callback),
        };
        self.0.heap.borrow_mut().push(entry);
        TimerHandle(id)
    }

    /// Remove a pending callback. Idempotent: cancelling an already-fired or already-cancelled
    /// handle is a no-op.
    pub fn cancel(&self, handle: TimerHandle) {
        self.0.heap.borrow_mut().remove(handle.0);
    }

    /// Begin a new logical flow, running it until its first suspension point.
    pub fn spawn(&self, flow: impl Future<Output = ()> + 'static) {
        self.0
            .spawner
            .spawn_local(flow)
            .expect("scheduler executor shut down");
    }

    /// Suspend the calling flow for a virtual duration `d`.
    pub fn sleep(&self, d: f64) -> Sleep {
        assert!(d >= 0.0, "sleep duration must be non-negative, got {d}");
        Sleep {
            scheduler: self.clone(),
            state: Rc::new(RefCell::new(SleepState::NotStarted)),
            delay: d,
        }
    }

    /// Create a fresh synchronization [`Event`] that flows can [`Event::wait`] on and
    /// [`Event::notify`] through.
    pub fn new_event<T: Clone + 'static>(&self) -> Event<T> {
        Event::new(self.clone())
    }

    /// Pop the earliest callback, advance `now()` to its time, and execute it; repeat until the
    /// queue is empty and no flow is able to make further progress.
    pub fn run(&self) {
        loop {
            // Let every spawned flow run until it suspends (blocks on a `Sleep`/`Wait` future
            // that hasn't resolved) or completes.
            self.0.pool.borrow_mut().run_until_stalled();

            let next = self.0.heap.borrow_mut().pop();
            match next {
                Some(entry) => {
                    assert!(entry.time >= self.now(), "virtual time moved backward");
                    self.0.now.set(entry.time);
                    (entry.callback)();
                }
                None => {
                    if self.0.heap.borrow().is_empty() {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

enum SleepState {
    NotStarted,
    Waiting { done: bool, waker: Option<Waker> },
}

/// Future returned by [`Scheduler::sleep`]. Resolves once the scheduler's clock reaches the
/// requested time.
pub struct Sleep {
    scheduler: Scheduler,
    state: Rc<RefCell<SleepState>>,
    delay: f64,
}

impl Future for Sleep {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            SleepState::NotStarted => {
                let state_handle = Rc::clone(&self.state);
                *state = SleepState::Waiting {
                    done: false,
                    waker: Some(cx.waker().clone()),
                };
                drop(state);
                self.scheduler.schedule(self.delay, 0, move || {
                    let mut state = state_handle.borrow_mut();
                    if let SleepState::Waiting { done, waker } = &mut *state {
                        *done = true;
                        if let Some(w) = waker.take() {
                            w.wake();
                        }
                    }
                });
                std::task::Poll::Pending
            }
            SleepState::Waiting { done, waker } => {
                if *done {
                    std::task::Poll::Ready(())
                } else {
                    *waker = Some(cx.waker().clone());
                    std::task::Poll::Pending
                }
            }
        }
    }
}

/// Run `f`; if it fails with a [`TimeoutError`], retry up to `n - 1` more times. If every attempt
/// times out, surface the terminal timeout. Used for the handshake and teardown retry budgets in
/// spec.md §4.4 (10 attempts) and for per-segment retransmission.
pub async fn attempt<F, Fut, T>(mut f: F, n: u32) -> Result<T, TimeoutError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TimeoutError>>,
{
    assert!(n >= 1);
    let mut last = TimeoutError;
    for _ in 0..n {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => last = e,
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn sleep_advances_virtual_time_only() {
        let sched = Scheduler::new();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let sched2 = sched.clone();
        let log2 = Rc::clone(&log);
        sched.spawn(async move {
            sched2.sleep(1.0).await;
            log2.borrow_mut().push(sched2.now().as_secs_f64());
            sched2.sleep(2.0).await;
            log2.borrow_mut().push(sched2.now().as_secs_f64());
        });

        sched.run();
        assert_eq!(*log.borrow(), vec![1.0, 3.0]);
    }

    #[test]
    fn callbacks_at_same_time_run_in_priority_then_fifo_order() {
        let sched = Scheduler::new();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let l1 = Rc::clone(&log);
        sched.schedule(1.0, 5, move || l1.borrow_mut().push("low-priority-first-fifo"));
        let l2 = Rc::clone(&log);
        sched.schedule(1.0, 1, move || l2.borrow_mut().push("high-priority"));
        let l3 = Rc::clone(&log);
        sched.schedule(1.0, 5, move || l3.borrow_mut().push("low-priority-second-fifo"));

        sched.run();
        assert_eq!(
            *log.borrow(),
            vec!["high-priority", "low-priority-first-fifo", "low-priority-second-fifo"]
        );
    }

    #[test]
    fn cancel_is_idempotent_and_prevents_firing() {
        let sched = Scheduler::new();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let handle = sched.schedule(1.0, 0, move || f.set(true));
        sched.cancel(handle);
        sched.cancel(handle);
        sched.run();
        assert!(!fired.get());
    }

    #[test]
    fn attempt_retries_until_success() {
        let sched = Scheduler::new();
        let tries = Rc::new(Cell::new(0));
        let t = Rc::clone(&tries);
        let sched2 = sched.clone();
        let done = Rc::new(Cell::new(false));
        let done2 = Rc::clone(&done);

        sched.spawn(async move {
            let result = attempt(
                || {
                    let t = Rc::clone(&t);
                    let sched2 = sched2.clone();
                    async move {
                        t.set(t.get() + 1);
                        if t.get() < 3 {
                            Err(TimeoutError)
                        } else {
                            Ok(())
                        }
                    }
                },
                5,
            )
            .await;
            assert!(result.is_ok());
            done2.set(true);
        });

        sched.run();
        assert!(done.get());
        assert_eq!(tries.get(), 3);
    }
}
