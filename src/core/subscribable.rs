// ============================================================================
// spark-observables - Subscribable
// Named-event publish/subscribe with versioning
// ============================================================================
//
// Every Observable and Computed owns one Rc<Subscribable<T>>. Subscriptions
// keep only a Weak back to it, so disposing a subscription after its target
// is gone is a no-op.
//
// Notification iterates a snapshot of the subscriber list. Callbacks may
// subscribe, dispose or re-notify while it runs; disposed entries are skipped
// by flag, never removed from the snapshot.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use super::context::{report_error, with_context};
use super::types::{default_equals, Dependent, DependencyId, EqualsFn, Event};
use crate::error::{panic_message, ReactiveError};
use crate::reactivity::limit::Limiter;
use crate::reactivity::tracking::ignore;

// =============================================================================
// SUBSCRIPTION SLOTS
// =============================================================================

enum Callback<T> {
    /// Receives the notified value (skipped for value-less events)
    Value(Rc<dyn Fn(&T)>),
    /// Receives every notification of its event
    Signal(Rc<dyn Fn()>),
}

pub(crate) struct SubscriptionSlot<T> {
    callback: Callback<T>,
    disposed: Cell<bool>,
}

impl<T> SubscriptionSlot<T> {
    fn invoke(&self, value: Option<&T>) {
        if self.disposed.get() {
            return;
        }
        match &self.callback {
            Callback::Value(f) => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Callback::Signal(f) => f(),
        }
    }
}

// =============================================================================
// SUBSCRIPTION (public handle)
// =============================================================================

trait SubscriptionHandle {
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

struct SubscriptionLink<T: 'static> {
    slot: Rc<SubscriptionSlot<T>>,
    target: Weak<Subscribable<T>>,
    event: Event,
}

impl<T: 'static> SubscriptionHandle for SubscriptionLink<T> {
    fn dispose(&self) {
        if self.slot.disposed.replace(true) {
            return;
        }
        if let Some(target) = self.target.upgrade() {
            target.remove_slot(self.event, &self.slot);
        }
    }

    fn is_disposed(&self) -> bool {
        self.slot.disposed.get()
    }
}

struct CompositeHandle(Vec<Subscription>);

impl SubscriptionHandle for CompositeHandle {
    fn dispose(&self) {
        for sub in &self.0 {
            sub.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.0.iter().all(Subscription::is_disposed)
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle does NOT unsubscribe; call [`dispose`](Self::dispose).
/// Clones refer to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    handle: Rc<dyn SubscriptionHandle>,
}

impl Subscription {
    /// Group several subscriptions so they dispose together.
    pub fn combine(subscriptions: Vec<Subscription>) -> Self {
        Self {
            handle: Rc::new(CompositeHandle(subscriptions)),
        }
    }

    /// Detach the callback. Safe to call more than once.
    pub fn dispose(&self) {
        self.handle.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_disposed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// =============================================================================
// HOOKS
// =============================================================================

/// Owner callbacks around subscription changes.
///
/// Used to switch on expensive machinery (waking a pure computed, array
/// change tracking) only while someone listens.
pub trait SubscriptionHooks {
    fn before_subscription_add(&self, _event: Event) {}
    fn after_subscription_remove(&self, _event: Event) {}
}

// =============================================================================
// SUBSCRIBABLE
// =============================================================================

/// Publish/subscribe core shared by observables and computeds.
pub struct Subscribable<T: 'static> {
    /// Dependency identity, assigned on first registration
    id: Cell<Option<DependencyId>>,

    /// Bumped once per `Change` notification
    version: Cell<u64>,

    subscriptions: RefCell<HashMap<Event, Vec<Rc<SubscriptionSlot<T>>>>>,

    /// None means every write is a change
    equals: Cell<Option<EqualsFn<T>>>,

    hooks: RefCell<Option<Weak<dyn SubscriptionHooks>>>,

    /// Installed by the `deferred` / `rateLimit` extenders
    limiter: RefCell<Option<Rc<Limiter<T>>>>,

    defer_updates: Cell<bool>,

    self_ref: Weak<Subscribable<T>>,
}

impl<T: 'static> Subscribable<T> {
    /// Create a subscribable comparing values with `PartialEq`
    pub fn new() -> Rc<Self>
    where
        T: PartialEq,
    {
        Self::new_with_equals(Some(default_equals::<T>))
    }

    /// Create a subscribable with a custom comparer (None = always notify)
    pub fn new_with_equals(equals: Option<EqualsFn<T>>) -> Rc<Self> {
        Rc::new_cyclic(|self_ref| Self {
            id: Cell::new(None),
            version: Cell::new(1),
            subscriptions: RefCell::new(HashMap::new()),
            equals: Cell::new(equals),
            hooks: RefCell::new(None),
            limiter: RefCell::new(None),
            defer_updates: Cell::new(false),
            self_ref: self_ref.clone(),
        })
    }

    // =========================================================================
    // SUBSCRIBE
    // =========================================================================

    /// Subscribe to `Change` with a value callback
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_event(Event::Change, callback)
    }

    /// Subscribe to a value-carrying event
    pub fn subscribe_event(&self, event: Event, callback: impl Fn(&T) + 'static) -> Subscription {
        self.add_slot(event, Callback::Value(Rc::new(callback)))
    }

    /// Subscribe to any event without receiving its payload
    pub fn on(&self, event: Event, callback: impl Fn() + 'static) -> Subscription {
        self.add_slot(event, Callback::Signal(Rc::new(callback)))
    }

    fn add_slot(&self, event: Event, callback: Callback<T>) -> Subscription {
        let slot = Rc::new(SubscriptionSlot {
            callback,
            disposed: Cell::new(false),
        });

        if let Some(hooks) = self.hooks() {
            hooks.before_subscription_add(event);
        }

        self.subscriptions
            .borrow_mut()
            .entry(event)
            .or_default()
            .push(slot.clone());

        Subscription {
            handle: Rc::new(SubscriptionLink {
                slot,
                target: self.self_ref.clone(),
                event,
            }),
        }
    }

    fn remove_slot(&self, event: Event, slot: &Rc<SubscriptionSlot<T>>) {
        if let Some(list) = self.subscriptions.borrow_mut().get_mut(&event) {
            list.retain(|s| !Rc::ptr_eq(s, slot));
        }
        if let Some(hooks) = self.hooks() {
            hooks.after_subscription_remove(event);
        }
    }

    /// Subscribe a computed to this subscribable's changes.
    ///
    /// Deferred targets publish `Dirty` right away and `Change` later, so the
    /// dependent listens to both.
    pub fn subscribe_dependent(&self, dependent: Weak<dyn Dependent>) -> Subscription {
        if self.defer_updates.get() {
            let on_dirty = dependent.clone();
            let dirty = self.on(Event::Dirty, move || {
                if let Some(d) = on_dirty.upgrade() {
                    d.mark_dirty();
                }
            });
            let change = self.on(Event::Change, move || {
                if let Some(d) = dependent.upgrade() {
                    d.respond_to_change();
                }
            });
            Subscription::combine(vec![dirty, change])
        } else {
            self.on(Event::Change, move || {
                if let Some(d) = dependent.upgrade() {
                    d.evaluate_possibly_async();
                }
            })
        }
    }

    // =========================================================================
    // NOTIFY
    // =========================================================================

    /// Notify subscribers of `event`.
    ///
    /// With a limiter installed, `Change` and `BeforeChange` are routed
    /// through it; other events pass straight through.
    pub fn notify_subscribers(&self, value: Option<&T>, event: Event) {
        let limiter = self.limiter.borrow().clone();
        if let Some(limiter) = limiter {
            match event {
                Event::Change => return limiter.limit_change(false),
                Event::BeforeChange => return limiter.limit_before_change(value),
                _ => {}
            }
        }
        self.notify_now(value, event);
    }

    /// Notify bypassing any limiter.
    ///
    /// Dependency detection is suppressed while callbacks run: whatever a
    /// subscriber reads must not become a dependency of the computed that is
    /// currently evaluating. A panicking callback is reported to the error
    /// handler and the remaining subscribers still run.
    pub(crate) fn notify_now(&self, value: Option<&T>, event: Event) {
        if event == Event::Change {
            self.update_version();
        }

        let snapshot = if event == Event::Change {
            self.limiter
                .borrow()
                .as_ref()
                .and_then(|l| l.take_change_snapshot())
        } else {
            None
        };
        let subs = match snapshot {
            Some(subs) => subs,
            None => self.snapshot(event),
        };
        if subs.is_empty() {
            return;
        }

        ignore(|| {
            for slot in &subs {
                // One failing subscriber must not cut the others off
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| slot.invoke(value))) {
                    report_error(ReactiveError::SubscriberPanicked(panic_message(&*payload)));
                }
            }
        });
    }

    pub(crate) fn snapshot(&self, event: Event) -> Vec<Rc<SubscriptionSlot<T>>> {
        self.subscriptions
            .borrow()
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================================
    // VERSIONING
    // =========================================================================

    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub fn has_changed(&self, version: u64) -> bool {
        self.version.get() != version
    }

    pub fn update_version(&self) {
        self.version.set(self.version.get() + 1);
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn has_subscriptions_for_event(&self, event: Event) -> bool {
        self.subscriptions
            .borrow()
            .get(&event)
            .is_some_and(|list| !list.is_empty())
    }

    /// Count subscriptions for one event, or for all events except `Dirty`
    pub fn subscriptions_count(&self, event: Option<Event>) -> usize {
        let subs = self.subscriptions.borrow();
        match event {
            Some(event) => subs.get(&event).map_or(0, Vec::len),
            None => subs
                .iter()
                .filter(|(event, _)| **event != Event::Dirty)
                .map(|(_, list)| list.len())
                .sum(),
        }
    }

    /// Whether `new` counts as a change from `old` under the comparer
    pub fn is_different(&self, old: Option<&T>, new: &T) -> bool {
        match (self.equals.get(), old) {
            (Some(eq), Some(old)) => !eq(old, new),
            _ => true,
        }
    }

    pub fn equals_fn(&self) -> Option<EqualsFn<T>> {
        self.equals.get()
    }

    pub fn set_equals(&self, equals: Option<EqualsFn<T>>) {
        self.equals.set(equals);
    }

    pub fn dependency_id(&self) -> DependencyId {
        match self.id.get() {
            Some(id) => id,
            None => {
                let id = with_context(|ctx| ctx.next_dependency_id());
                self.id.set(Some(id));
                id
            }
        }
    }

    // =========================================================================
    // OWNER WIRING
    // =========================================================================

    pub fn set_hooks(&self, hooks: Weak<dyn SubscriptionHooks>) {
        *self.hooks.borrow_mut() = Some(hooks);
    }

    fn hooks(&self) -> Option<Rc<dyn SubscriptionHooks>> {
        self.hooks.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn self_weak(&self) -> Weak<Subscribable<T>> {
        self.self_ref.clone()
    }

    pub(crate) fn limiter(&self) -> Option<Rc<Limiter<T>>> {
        self.limiter.borrow().clone()
    }

    pub(crate) fn install_limiter(&self, limiter: Rc<Limiter<T>>) {
        *self.limiter.borrow_mut() = Some(limiter);
    }

    pub fn is_notification_pending(&self) -> bool {
        self.limiter
            .borrow()
            .as_ref()
            .is_some_and(|l| l.is_pending())
    }

    pub fn defers_updates(&self) -> bool {
        self.defer_updates.get()
    }

    pub(crate) fn set_defer_updates(&self, value: bool) {
        self.defer_updates.set(value);
    }
}

impl<T: 'static> fmt::Debug for Subscribable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribable")
            .field("id", &self.id.get())
            .field("version", &self.version.get())
            .field("limited", &self.limiter.borrow().is_some())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
