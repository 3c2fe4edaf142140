// ============================================================================
// spark-observables - Timers
// Clock abstraction and the timeout queue behind rate limiting
// ============================================================================
//
// Rate-limited notifications and throttled evaluations wait on timeouts.
// There is no event loop here: timeouts are stored against a Clock and run
// when the host calls `run_due_timers()`. Tests swap in a ManualClock and
// advance it explicitly.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::core::context::current_context;
use crate::error::{panic_message, ReactiveError};

/// Identifies a pending timeout
pub type TimerHandle = u64;

// =============================================================================
// CLOCK
// =============================================================================

/// Source of the current time, measured from an arbitrary fixed origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Monotonic wall time.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

// =============================================================================
// TIMER QUEUE
// =============================================================================

/// Pending timeouts ordered by deadline, then by creation order.
pub struct TimerQueue {
    timers: RefCell<BTreeMap<(Duration, TimerHandle), Box<dyn FnOnce()>>>,
    deadlines: RefCell<BTreeMap<TimerHandle, Duration>>,
    next_handle: Cell<TimerHandle>,
    clock: RefCell<Rc<dyn Clock>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            timers: RefCell::new(BTreeMap::new()),
            deadlines: RefCell::new(BTreeMap::new()),
            next_handle: Cell::new(1),
            clock: RefCell::new(Rc::new(SystemClock::new())),
        }
    }

    /// Replace the clock, returning the previous one
    pub fn set_clock(&self, clock: Rc<dyn Clock>) -> Rc<dyn Clock> {
        self.clock.replace(clock)
    }

    pub fn now(&self) -> Duration {
        self.clock.borrow().now()
    }

    pub fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        let deadline = self.now() + delay;
        self.timers.borrow_mut().insert((deadline, handle), callback);
        self.deadlines.borrow_mut().insert(handle, deadline);
        handle
    }

    /// Cancel a pending timeout. Unknown or fired handles are ignored.
    pub fn clear_timeout(&self, handle: TimerHandle) {
        if let Some(deadline) = self.deadlines.borrow_mut().remove(&handle) {
            self.timers.borrow_mut().remove(&(deadline, handle));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.deadlines.borrow().len()
    }

    /// Earliest pending deadline, for hosts that sleep until it
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.borrow().keys().next().map(|(deadline, _)| *deadline)
    }

    /// Run every timeout whose deadline has passed. Returns how many ran.
    ///
    /// Timeouts created while this runs wait for the next call, even when
    /// their delay is zero.
    pub fn run_due(&self) -> usize {
        let now = self.now();
        let horizon = self.next_handle.get();
        let mut ran = 0;

        loop {
            let next = {
                let mut timers = self.timers.borrow_mut();
                let key = timers
                    .keys()
                    .find(|(deadline, handle)| *deadline <= now && *handle < horizon)
                    .copied();
                key.and_then(|key| timers.remove(&key).map(|cb| (key.1, cb)))
            };
            let Some((handle, callback)) = next else {
                break;
            };
            self.deadlines.borrow_mut().remove(&handle);
            ran += 1;

            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                current_context()
                    .report_error(ReactiveError::TaskPanicked(panic_message(&*payload)));
            }
        }

        if ran > 0 {
            tracing::trace!(ran, "ran due timers");
        }
        ran
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Run `callback` once `delay` has elapsed on the current context's clock.
pub fn set_timeout(delay: Duration, callback: impl FnOnce() + 'static) -> TimerHandle {
    current_context().timers().set_timeout(delay, Box::new(callback))
}

pub fn clear_timeout(handle: TimerHandle) {
    current_context().timers().clear_timeout(handle);
}

/// Run due timeouts on the current context.
pub fn run_due_timers() -> usize {
    current_context().timers().run_due()
}

/// Install a clock on the current context.
pub fn set_clock(clock: Rc<dyn Clock>) -> Rc<dyn Clock> {
    current_context().timers().set_clock(clock)
}

// =============================================================================
// TESTS
// =============================================================================
