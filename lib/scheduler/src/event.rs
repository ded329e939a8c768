use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::task::Waker;

use crate::time::VirtualTime;
use crate::{Scheduler, TimerHandle};

/// A `wait(event, timeout)` that timed out before the event was ever notified.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeoutError;

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wait() timed out")
    }
}

impl std::error::Error for TimeoutError {}

enum WaiterState<T> {
    Pending(Option<Waker>),
    Notified(T),
    TimedOut,
}

/// A one-shot-per-notify rendezvous object: flows suspend on [`Event::wait`] until
/// [`Event::notify`] runs (waking every flow currently waiting, with a payload) or, if a timeout
/// was given, until that timeout elapses first.
///
/// A flow that begins waiting *after* a `notify` has already run is not retroactively woken —
/// `notify` only touches the waiters registered at the instant it's called.
pub struct Event<T: Clone + 'static> {
    scheduler: Scheduler,
    waiters: Rc<RefCell<Vec<Rc<RefCell<WaiterState<T>>>>>>,
    last_notified: Rc<Cell<Option<VirtualTime>>>,
}

impl<T: Clone + 'static> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            waiters: Rc::clone(&self.waiters),
            last_notified: Rc::clone(&self.last_notified),
        }
    }
}

impl<T: Clone + 'static> Event<T> {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            waiters: Rc::new(RefCell::new(Vec::new())),
            last_notified: Rc::new(Cell::new(None)),
        }
    }

    /// The virtual time of the most recent [`Event::notify`] call, if any.
    pub fn last_notified(&self) -> Option<VirtualTime> {
        self.last_notified.get()
    }

    /// Suspend the calling flow until the next `notify`, or until `timeout` elapses, whichever
    /// happens first.
    pub fn wait(&self, timeout: Option<f64>) -> Wait<T> {
        Wait {
            event: self.clone(),
            state: None,
            timer: None,
            timeout,
        }
    }

    /// Wake every flow currently blocked in [`Event::wait`] on this event, delivering `payload`
    /// to each. Does not suspend the caller. A flow that calls `wait` after this returns is not
    /// woken by this call.
    pub fn notify(&self, payload: T) {
        self.last_notified.set(Some(self.scheduler.now()));
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            let mut state = waiter.borrow_mut();
            if let WaiterState::Pending(waker) = &mut *state {
                let waker = waker.take();
                *state = WaiterState::Notified(payload.clone());
                drop(state);
                if let Some(w) = waker {
                    w.wake();
                }
            }
            // Already `Notified` or `TimedOut` waiters are no longer "currently waiting"; leave
            // them alone.
        }
    }
}

/// Future returned by [`Event::wait`].
pub struct Wait<T: Clone + 'static> {
    event: Event<T>,
    state: Option<Rc<RefCell<WaiterState<T>>>>,
    timer: Option<TimerHandle>,
    timeout: Option<f64>,
}

impl<T: Clone + 'static> Future for Wait<T> {
    type Output = Result<T, TimeoutError>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        if self.state.is_none() {
            let state = Rc::new(RefCell::new(WaiterState::Pending(Some(cx.waker().clone()))));
            self.event.waiters.borrow_mut().push(Rc::clone(&state));

            if let Some(timeout) = self.timeout {
                let state_handle = Rc::clone(&state);
                let timer = self.event.scheduler.schedule(timeout, 0, move || {
                    let mut state = state_handle.borrow_mut();
                    if let WaiterState::Pending(waker) = &mut *state {
                        let waker = waker.take();
                        *state = WaiterState::TimedOut;
                        drop(state);
                        if let Some(w) = waker {
                            w.wake();
                        }
                    }
                });
                self.timer = Some(timer);
            }

            self.state = Some(state);
        }

        let state = self.state.as_ref().unwrap();
        let mut guard = state.borrow_mut();
        match &mut *guard {
            WaiterState::Pending(waker) => {
                *waker = Some(cx.waker().clone());
                std::task::Poll::Pending
            }
            WaiterState::Notified(payload) => {
                let payload = payload.clone();
                drop(guard);
                if let Some(timer) = self.timer.take() {
                    self.event.scheduler.cancel(timer);
                }
                std::task::Poll::Ready(Ok(payload))
            }
            WaiterState::TimedOut => std::task::Poll::Ready(Err(TimeoutError)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn notify_wakes_current_waiters_with_payload() {
        let sched = Scheduler::new();
        let event: Event<u32> = sched.new_event();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let e1 = event.clone();
        let l1 = Rc::clone(&log);
        sched.spawn(async move {
            let v = e1.wait(None).await.unwrap();
            l1.borrow_mut().push(v);
        });

        let sched2 = sched.clone();
        let e2 = event.clone();
        sched.spawn(async move {
            sched2.sleep(1.0).await;
            e2.notify(42);
        });

        sched.run();
        assert_eq!(*log.borrow(), vec![42]);
    }

    #[test]
    fn late_waiter_does_not_see_past_notify() {
        let sched = Scheduler::new();
        let event: Event<u32> = sched.new_event();
        let log = Rc::new(StdRefCell::new(Vec::new()));

        let e2 = event.clone();
        sched.spawn(async move {
            e2.notify(1);
        });

        let e3 = event.clone();
        let l3 = Rc::clone(&log);
        let sched3 = sched.clone();
        sched.spawn(async move {
            sched3.sleep(1.0).await;
            match e3.wait(Some(1.0)).await {
                Ok(v) => l3.borrow_mut().push(v),
                Err(_) => l3.borrow_mut().push(999),
            }
        });

        sched.run();
        // the late waiter timed out (999), it did not retroactively observe notify(1)
        assert_eq!(*log.borrow(), vec![999]);
    }

    #[test]
    fn timeout_fires_when_never_notified() {
        let sched = Scheduler::new();
        let event: Event<u32> = sched.new_event();
        let result = Rc::new(Cell::new(None));
        let r = Rc::clone(&result);
        let e = event.clone();
        sched.spawn(async move {
            r.set(Some(e.wait(Some(0.5)).await.is_err()));
        });
        sched.run();
        assert_eq!(result.get(), Some(true));
    }
}
