// ============================================================================
// spark-observables - Limit
// Batches `change` notifications behind a deferral or rate-limit policy
// ============================================================================
//
// Once a Limiter is installed on a Subscribable, `change` goes through
// `limit_change` and `beforeChange` through `limit_before_change`. The policy
// decides when `finish` runs; `finish` re-reads the owner's settled value and
// publishes a single `change` only if it differs from the value last
// published (or a reader asked for the next change to be forced through).
//
// `beforeChange` is forwarded once per batch: the first one records the
// value the batch is compared against, later ones are swallowed until
// `finish`.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::core::subscribable::{Subscribable, SubscriptionSlot};
use crate::core::types::Event;
use crate::reactivity::scheduling::{self, TaskHandle};
use crate::reactivity::timers::{self, TimerHandle};

// =============================================================================
// TARGET
// =============================================================================

/// The value holder a Limiter publishes for.
pub(crate) trait LimitTarget<T> {
    /// Value to publish when the batch closes. Computeds re-evaluate here
    /// if a dependency changed while the notification was pending.
    fn settled_value(&self) -> Option<T>;

    /// Current value, evaluating a dirty computed first
    fn evaluated_peek(&self) -> Option<T>;
}

// =============================================================================
// POLICY
// =============================================================================

/// When a batched notification is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitPolicy {
    /// At the next task-queue flush
    Deferred,
    /// At most once per timeout, measured from the first change
    Throttle(Duration),
    /// After the timeout passes with no further change
    Debounce(Duration),
}

// =============================================================================
// LIMITER
// =============================================================================

struct LimitState<T> {
    /// Value last published (or recorded by the first `beforeChange`)
    previous: Option<T>,
    did_update: bool,
    notify_next_change: bool,
    ignore_before_change: bool,
}

pub struct Limiter<T: 'static> {
    owner: Weak<Subscribable<T>>,
    target: Weak<dyn LimitTarget<T>>,
    policy: LimitPolicy,
    trigger: Box<dyn Fn()>,
    state: RefCell<LimitState<T>>,
    pending: Cell<bool>,
    change_snapshot: RefCell<Option<Vec<Rc<SubscriptionSlot<T>>>>>,
    clone_value: fn(&T) -> T,
}

impl<T: 'static> Limiter<T> {
    pub(crate) fn new(
        owner: &Rc<Subscribable<T>>,
        target: Weak<dyn LimitTarget<T>>,
        policy: LimitPolicy,
    ) -> Rc<Self>
    where
        T: Clone,
    {
        Rc::new_cyclic(|weak: &Weak<Self>| Self {
            owner: Rc::downgrade(owner),
            target,
            policy,
            trigger: build_trigger(policy, weak.clone(), Rc::downgrade(owner)),
            state: RefCell::new(LimitState {
                previous: None,
                did_update: false,
                notify_next_change: false,
                ignore_before_change: false,
            }),
            pending: Cell::new(false),
            change_snapshot: RefCell::new(None),
            clone_value: T::clone,
        })
    }

    pub fn policy(&self) -> LimitPolicy {
        self.policy
    }

    /// A batch is open and `finish` has not run yet
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Open or extend a batch. `is_dirty` marks a dependency-dirty signal
    /// rather than an actual stored change.
    pub(crate) fn limit_change(&self, is_dirty: bool) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        {
            let mut state = self.state.borrow_mut();
            if !is_dirty || !self.pending.get() {
                state.did_update = !is_dirty;
            }
            state.ignore_before_change = true;
        }
        *self.change_snapshot.borrow_mut() = Some(owner.snapshot(Event::Change));
        self.pending.set(true);
        (self.trigger)();
    }

    pub(crate) fn limit_before_change(&self, value: Option<&T>) {
        {
            let mut state = self.state.borrow_mut();
            if state.ignore_before_change {
                return;
            }
            state.previous = value.map(self.clone_value);
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.notify_now(value, Event::BeforeChange);
        }
    }

    /// A stored change happened without going through `limit_change`
    pub(crate) fn record_update(&self) {
        self.state.borrow_mut().did_update = true;
    }

    /// Force the next `finish` to publish if the current value already
    /// differs from the last published one.
    pub(crate) fn notify_next_change_if_value_is_different(&self) {
        let (Some(owner), Some(target)) = (self.owner.upgrade(), self.target.upgrade()) else {
            return;
        };
        let Some(current) = target.evaluated_peek() else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if owner.is_different(state.previous.as_ref(), &current) {
            state.notify_next_change = true;
        }
    }

    /// Close the batch, publishing `change` if warranted.
    pub(crate) fn finish(&self) {
        self.pending.set(false);
        let (Some(owner), Some(target)) = (self.owner.upgrade(), self.target.upgrade()) else {
            return;
        };

        // May re-evaluate a computed, which can re-enter before_change and
        // record_update; no state borrow is held across it.
        let pending_value = target.settled_value();

        let publish = {
            let mut state = self.state.borrow_mut();
            let should_notify = match &pending_value {
                Some(value) => {
                    state.notify_next_change
                        || (state.did_update && owner.is_different(state.previous.as_ref(), value))
                }
                None => false,
            };
            state.did_update = false;
            state.notify_next_change = false;
            state.ignore_before_change = false;
            if should_notify {
                state.previous = pending_value.as_ref().map(self.clone_value);
            }
            should_notify
        };

        if publish {
            tracing::trace!(policy = ?self.policy, "limited change released");
            owner.notify_now(pending_value.as_ref(), Event::Change);
        }
    }

    /// Subscriber list captured when the batch opened
    pub(crate) fn take_change_snapshot(&self) -> Option<Vec<Rc<SubscriptionSlot<T>>>> {
        self.change_snapshot.borrow_mut().take()
    }
}

impl<T: 'static> fmt::Debug for Limiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("policy", &self.policy)
            .field("pending", &self.pending.get())
            .finish()
    }
}

// =============================================================================
// TRIGGERS
// =============================================================================

/// Clears a flag when dropped, including during unwinding.
struct FlagGuard<'a>(&'a Cell<bool>);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn build_trigger<T: 'static>(
    policy: LimitPolicy,
    limiter: Weak<Limiter<T>>,
    owner: Weak<Subscribable<T>>,
) -> Box<dyn Fn()> {
    let finish = move || {
        if let Some(limiter) = limiter.upgrade() {
            limiter.finish();
        }
    };

    match policy {
        LimitPolicy::Deferred => {
            let handle: Cell<Option<TaskHandle>> = Cell::new(None);
            let ignore_updates = Cell::new(false);
            Box::new(move || {
                if ignore_updates.get() {
                    return;
                }
                if let Some(previous) = handle.take() {
                    scheduling::cancel(previous);
                }
                handle.set(Some(scheduling::schedule(finish.clone())));

                ignore_updates.set(true);
                let _reset = FlagGuard(&ignore_updates);
                if let Some(owner) = owner.upgrade() {
                    owner.notify_now(None, Event::Dirty);
                }
            })
        }
        LimitPolicy::Throttle(timeout) => {
            let timer: Rc<Cell<Option<TimerHandle>>> = Rc::new(Cell::new(None));
            Box::new(move || {
                if timer.get().is_some() {
                    return;
                }
                let slot = timer.clone();
                let finish = finish.clone();
                timer.set(Some(timers::set_timeout(timeout, move || {
                    slot.set(None);
                    finish();
                })));
            })
        }
        LimitPolicy::Debounce(timeout) => {
            let timer: Cell<Option<TimerHandle>> = Cell::new(None);
            Box::new(move || {
                if let Some(previous) = timer.take() {
                    timers::clear_timeout(previous);
                }
                timer.set(Some(timers::set_timeout(timeout, finish.clone())));
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ReactiveContext;
    use crate::reactivity::scheduling::flush_tasks;
    use crate::reactivity::timers::{run_due_timers, set_clock, ManualClock};

    /// Minimal value holder wired like an observable
    struct Cell32 {
        core: Rc<Subscribable<i32>>,
        value: RefCell<i32>,
    }

    impl LimitTarget<i32> for Cell32 {
        fn settled_value(&self) -> Option<i32> {
            Some(*self.value.borrow())
        }

        fn evaluated_peek(&self) -> Option<i32> {
            Some(*self.value.borrow())
        }
    }

    impl Cell32 {
        fn new(policy: LimitPolicy) -> Rc<Self> {
            let cell = Rc::new(Self {
                core: Subscribable::new(),
                value: RefCell::new(0),
            });
            let target: Weak<dyn LimitTarget<i32>> =
                Rc::downgrade(&(cell.clone() as Rc<dyn LimitTarget<i32>>));
            let limiter = Limiter::new(&cell.core, target, policy);
            cell.core.install_limiter(limiter);
            cell
        }

        fn write(&self, value: i32) {
            let old = *self.value.borrow();
            if self.core.is_different(Some(&old), &value) {
                self.core.notify_subscribers(Some(&old), Event::BeforeChange);
                *self.value.borrow_mut() = value;
                self.core.notify_subscribers(Some(&value), Event::Change);
            }
        }
    }

    fn record(core: &Subscribable<i32>, event: Event) -> Rc<RefCell<Vec<i32>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        core.subscribe_event(event, move |v| log_clone.borrow_mut().push(*v));
        log
    }

    #[test]
    fn deferred_coalesces_until_flush() {
        let _ctx = Rc::new(ReactiveContext::new()).enter();
        let cell = Cell32::new(LimitPolicy::Deferred);
        let changes = record(&cell.core, Event::Change);
        let befores = record(&cell.core, Event::BeforeChange);
        let dirty = Rc::new(Cell::new(0));
        let dirty_clone = dirty.clone();
        cell.core.on(Event::Dirty, move || dirty_clone.set(dirty_clone.get() + 1));

        cell.write(1);
        cell.write(2);
        cell.write(3);
        assert!(changes.borrow().is_empty());
        assert_eq!(*befores.borrow(), vec![0]);
        assert_eq!(dirty.get(), 3);
        assert!(cell.core.is_notification_pending());

        flush_tasks();
        assert_eq!(*changes.borrow(), vec![3]);
        assert!(!cell.core.is_notification_pending());
    }

    #[test]
    fn deferred_skips_when_value_returns_to_start() {
        let _ctx = Rc::new(ReactiveContext::new()).enter();
        let cell = Cell32::new(LimitPolicy::Deferred);
        let changes = record(&cell.core, Event::Change);

        cell.write(5);
        cell.write(0);
        flush_tasks();
        assert!(changes.borrow().is_empty());
    }

    #[test]
    fn throttle_fires_once_per_window() {
        let _ctx = Rc::new(ReactiveContext::new()).enter();
        let clock = Rc::new(ManualClock::new());
        set_clock(clock.clone());
        let cell = Cell32::new(LimitPolicy::Throttle(Duration::from_millis(100)));
        let changes = record(&cell.core, Event::Change);

        cell.write(1);
        clock.advance(Duration::from_millis(60));
        cell.write(2);
        run_due_timers();
        assert!(changes.borrow().is_empty());

        clock.advance(Duration::from_millis(40));
        run_due_timers();
        assert_eq!(*changes.borrow(), vec![2]);
    }

    #[test]
    fn debounce_waits_for_quiet() {
        let _ctx = Rc::new(ReactiveContext::new()).enter();
        let clock = Rc::new(ManualClock::new());
        set_clock(clock.clone());
        let cell = Cell32::new(LimitPolicy::Debounce(Duration::from_millis(100)));
        let changes = record(&cell.core, Event::Change);

        cell.write(1);
        clock.advance(Duration::from_millis(60));
        cell.write(2);
        clock.advance(Duration::from_millis(60));
        run_due_timers();
        assert!(changes.borrow().is_empty());

        clock.advance(Duration::from_millis(40));
        run_due_timers();
        assert_eq!(*changes.borrow(), vec![2]);
    }
}
