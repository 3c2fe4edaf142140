// ============================================================================
// spark-observables - Computed
// Cached values derived from a read function with automatic dependencies
// ============================================================================
//
// A Computed re-runs its read function inside a dependency frame and keeps
// exactly the dependencies touched by the latest run. Dependencies from the
// previous run start out as disposal candidates; reading one again reclaims
// its live subscription, and whatever is left when the run ends is
// unsubscribed.
//
// States: STALE / DIRTY mark an out-of-date cache, EVALUATING guards against
// re-entrance, DISPOSED is terminal. A PURE computed is SLEEPING while
// nobody subscribes to its `change` event: it keeps its dependency ids and
// versions but no subscriptions, and re-validates lazily on read.
//
// Borrow discipline: no RefCell borrow of the computed's state is held while
// user code (read/write/dispose-when functions, subscribers, other
// computeds) runs.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::core::constants::*;
use crate::core::context::{current_context, report_error};
use crate::core::subscribable::{Subscribable, Subscription, SubscriptionHooks};
use crate::core::types::{
    default_equals, has_ancestor_dependency, same_subscribable, AnySubscribable, Dependent,
    DependencyId, EqualsFn, Event, SubscribableKind,
};
use crate::error::{panic_message, ReactiveError};
use crate::primitives::lifetime::{EndCallbackId, Lifetime};
use crate::reactivity::extenders::{
    apply_extender, apply_named, Extender, ExtenderHost, ExtenderValue,
};
use crate::reactivity::limit::{LimitTarget, Limiter};
use crate::reactivity::timers::{clear_timeout, set_timeout, TimerHandle};
use crate::reactivity::tracking::{register_dependency, DependencyFrame, FrameGuard};

type ReadFn<T> = Rc<dyn Fn() -> T>;
type WriteFn<T> = Rc<dyn Fn(T)>;
type DisposeWhenFn = Rc<dyn Fn() -> bool>;

// =============================================================================
// DEPENDENCY TRACKING
// =============================================================================

struct TrackedDependency {
    target: Rc<dyn AnySubscribable>,
    /// None while sleeping
    subscription: Option<Subscription>,
    /// Position in the evaluation that last read it
    order: usize,
    /// Target version when it was read
    version: u64,
}

struct ComputedState<T> {
    latest_value: Option<T>,
    read: Option<ReadFn<T>>,
    write: Option<WriteFn<T>>,
    dependency_tracking: HashMap<DependencyId, TrackedDependency>,
    dependencies_count: usize,
    dispose_when: Option<DisposeWhenFn>,
    lifetime: Option<Lifetime>,
    lifetime_callback: Option<EndCallbackId>,
}

// =============================================================================
// COMPUTED INNER
// =============================================================================

pub struct ComputedInner<T: 'static> {
    core: Rc<Subscribable<T>>,
    flags: Cell<u32>,
    state: RefCell<ComputedState<T>>,
    base_equals: Option<EqualsFn<T>>,
    throttle: Cell<Option<Duration>>,
    throttle_timer: Cell<Option<TimerHandle>>,
    self_ref: Weak<ComputedInner<T>>,
}

/// Clears flag bits when dropped, including during unwinding.
struct FlagsGuard<'a> {
    flags: &'a Cell<u32>,
    bits: u32,
}

impl Drop for FlagsGuard<'_> {
    fn drop(&mut self) {
        self.flags.set(self.flags.get() & !self.bits);
    }
}

impl<T: Clone + 'static> ComputedInner<T> {
    #[inline]
    fn has(&self, flag: u32) -> bool {
        self.flags.get() & flag != 0
    }

    #[inline]
    fn set_flags(&self, flags: u32) {
        self.flags.set(self.flags.get() | flags);
    }

    #[inline]
    fn clear_flags(&self, flags: u32) {
        self.flags.set(self.flags.get() & !flags);
    }

    pub fn core(&self) -> &Rc<Subscribable<T>> {
        &self.core
    }

    fn latest(&self) -> Option<T> {
        self.state.borrow().latest_value.clone()
    }

    fn dependent(&self) -> Weak<dyn Dependent> {
        self.self_ref.clone()
    }

    // =========================================================================
    // EVALUATION
    // =========================================================================

    /// Whether a dispose-when function or a lifetime says to go away
    fn should_dispose(&self) -> bool {
        let (lifetime, dispose_when) = {
            let state = self.state.borrow();
            (state.lifetime.clone(), state.dispose_when.clone())
        };
        lifetime.is_some_and(|l| !l.is_alive()) || dispose_when.is_some_and(|f| f())
    }

    /// Re-run the read function now. Returns whether the value changed.
    fn evaluate_immediate(&self, notify_change: bool) -> bool {
        if self.has(EVALUATING) || self.has(DISPOSED) {
            return false;
        }

        if self.should_dispose() {
            if !self.has(SUPPRESS_DISPOSAL) {
                self.dispose();
                return false;
            }
        } else {
            self.clear_flags(SUPPRESS_DISPOSAL);
        }

        self.set_flags(EVALUATING);
        let _evaluating = FlagsGuard {
            flags: &self.flags,
            bits: EVALUATING,
        };
        self.evaluate_with_dependency_detection(notify_change)
    }

    fn evaluate_with_dependency_detection(&self, notify_change: bool) -> bool {
        let (read, candidates, is_initial) = {
            let mut state = self.state.borrow_mut();
            let Some(read) = state.read.clone() else {
                return false;
            };
            let is_initial = if self.has(PURE) {
                None
            } else {
                Some(state.dependencies_count == 0)
            };
            state.dependencies_count = 0;
            let candidates = std::mem::take(&mut state.dependency_tracking);
            (read, candidates, is_initial)
        };

        let frame = Rc::new(EvaluationFrame {
            computed: self.self_ref.clone(),
            disposal_candidates: RefCell::new(candidates),
            is_initial,
        });

        let new_value = {
            let _cleanup = EvaluationCleanup {
                computed: self,
                frame: frame.clone(),
            };
            let _frame = FrameGuard::begin(Some(frame.clone() as Rc<dyn DependencyFrame>));
            read()
        };

        let changed = if self.state.borrow().dependencies_count == 0 {
            // Nothing can ever trigger it again; subscribers still get the
            // final value.
            self.dispose();
            true
        } else {
            let state = self.state.borrow();
            self.core.is_different(state.latest_value.as_ref(), &new_value)
        };

        if changed {
            let sleeping = self.has(SLEEPING);
            if sleeping {
                self.core.update_version();
            } else if self.core.has_subscriptions_for_event(Event::BeforeChange)
                || self.core.limiter().is_some()
            {
                let old = self.latest();
                self.core.notify_subscribers(old.as_ref(), Event::BeforeChange);
            }

            self.state.borrow_mut().latest_value = Some(new_value.clone());
            self.core.notify_subscribers(Some(&new_value), Event::Spectate);
            if !sleeping && notify_change {
                self.core.notify_subscribers(Some(&new_value), Event::Change);
            }
            if let Some(limiter) = self.core.limiter() {
                limiter.record_update();
            }
        }

        if is_initial == Some(true) {
            let value = self.latest();
            self.core.notify_subscribers(value.as_ref(), Event::Awake);
        }

        changed
    }

    /// Change-triggered evaluation: panics are reported, not propagated.
    fn evaluate_reporting(&self, notify_change: bool) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
            self.evaluate_immediate(notify_change)
        })) {
            report_error(ReactiveError::EvaluationPanicked(panic_message(&*payload)));
        }
    }

    /// Route a change through throttling, the limiter, or evaluate now.
    fn evaluate_possibly_async_inner(&self) {
        if let Some(timeout) = self.throttle.get() {
            if let Some(previous) = self.throttle_timer.take() {
                clear_timeout(previous);
            }
            let weak = self.self_ref.clone();
            self.throttle_timer.set(Some(set_timeout(timeout, move || {
                if let Some(computed) = weak.upgrade() {
                    computed.throttle_timer.set(None);
                    computed.evaluate_reporting(true);
                }
            })));
        } else if let Some(limiter) = self.core.limiter() {
            self.eval_delayed(&limiter, true);
        } else {
            self.evaluate_reporting(true);
        }
    }

    /// Hand the change to the limiter, which evaluates when it fires.
    fn eval_delayed(&self, limiter: &Limiter<T>, is_change: bool) {
        let latest = self.latest();
        limiter.limit_before_change(latest.as_ref());

        self.set_flags(DIRTY);
        if is_change {
            self.set_flags(STALE);
        }
        limiter.limit_change(!is_change);
    }

    fn have_dependencies_changed(&self) -> bool {
        let tracked: Vec<(Rc<dyn AnySubscribable>, u64)> = self
            .state
            .borrow()
            .dependency_tracking
            .values()
            .map(|d| (d.target.clone(), d.version))
            .collect();
        let delayed = self.core.limiter().is_some();
        tracked
            .iter()
            .any(|(target, version)| (delayed && target.is_notification_pending()) || target.has_changed(*version))
    }

    fn add_dependency_tracking(
        &self,
        id: DependencyId,
        target: Rc<dyn AnySubscribable>,
        subscription: Option<Subscription>,
    ) {
        let version = target.version();
        let mut state = self.state.borrow_mut();
        let order = state.dependencies_count;
        state.dependencies_count += 1;
        state.dependency_tracking.insert(
            id,
            TrackedDependency {
                target,
                subscription,
                order,
                version,
            },
        );
    }

    // =========================================================================
    // READ
    // =========================================================================

    fn read_tracked(&self) -> Option<T> {
        if !self.has(DISPOSED) {
            if let Some(me) = self.self_ref.upgrade() {
                register_dependency(me);
            }
        }
        if self.has(DIRTY) || (self.has(SLEEPING) && self.have_dependencies_changed()) {
            self.evaluate_immediate(false);
        }
        self.latest()
    }

    fn peek_value(&self, evaluate: bool) -> Option<T> {
        let no_dependencies = self.state.borrow().dependencies_count == 0;
        if (self.has(DIRTY) && (evaluate || no_dependencies))
            || (self.has(SLEEPING) && self.have_dependencies_changed())
        {
            self.evaluate_immediate(false);
        }
        self.latest()
    }

    fn ordered_dependencies(&self) -> Vec<(DependencyId, Rc<dyn AnySubscribable>, u64)> {
        let state = self.state.borrow();
        let mut deps: Vec<_> = state
            .dependency_tracking
            .iter()
            .map(|(id, d)| (d.order, *id, d.target.clone(), d.version))
            .collect();
        deps.sort_by_key(|(order, ..)| *order);
        deps.into_iter()
            .map(|(_, id, target, version)| (id, target, version))
            .collect()
    }

    // =========================================================================
    // SLEEP / WAKE (pure computeds)
    // =========================================================================

    fn wake(&self) {
        self.clear_flags(SLEEPING);

        if self.has(STALE) || self.have_dependencies_changed() {
            {
                let mut state = self.state.borrow_mut();
                state.dependency_tracking.clear();
                state.dependencies_count = 0;
            }
            if self.evaluate_immediate(false) {
                self.core.update_version();
            }
        } else {
            // Re-subscribe in the order of the last evaluation
            for (order, (id, target, version)) in self.ordered_dependencies().into_iter().enumerate() {
                let subscription = target.subscribe_dependent(self.dependent());
                self.state.borrow_mut().dependency_tracking.insert(
                    id,
                    TrackedDependency {
                        target,
                        subscription: Some(subscription),
                        order,
                        version,
                    },
                );
            }
            // Subscribing can itself wake and re-evaluate a dependency
            if self.have_dependencies_changed() && self.evaluate_immediate(false) {
                self.core.update_version();
            }
        }

        if !self.has(DISPOSED) {
            tracing::trace!(id = ?self.core.dependency_id(), "pure computed awake");
            let value = self.latest();
            self.core.notify_subscribers(value.as_ref(), Event::Awake);
        }
    }

    fn sleep(&self) {
        let subscriptions: Vec<Subscription> = self
            .state
            .borrow_mut()
            .dependency_tracking
            .values_mut()
            .filter_map(|d| d.subscription.take())
            .collect();
        for subscription in subscriptions {
            subscription.dispose();
        }
        self.set_flags(SLEEPING);
        tracing::trace!(id = ?self.core.dependency_id(), "pure computed asleep");
        self.core.notify_subscribers(None, Event::Asleep);
    }

    // =========================================================================
    // DISPOSAL
    // =========================================================================

    pub fn dispose(&self) {
        let (subscriptions, lifetime, callback, read, dispose_when) = {
            let mut state = self.state.borrow_mut();
            let subscriptions: Vec<Subscription> = state
                .dependency_tracking
                .drain()
                .filter_map(|(_, d)| d.subscription)
                .collect();
            state.dependencies_count = 0;
            (
                subscriptions,
                state.lifetime.take(),
                state.lifetime_callback.take(),
                state.read.take(),
                state.dispose_when.take(),
            )
        };

        for subscription in subscriptions {
            subscription.dispose();
        }
        if let (Some(lifetime), Some(id)) = (lifetime, callback) {
            lifetime.remove_callback(id);
        }
        if let Some(timer) = self.throttle_timer.take() {
            clear_timeout(timer);
        }

        let was_disposed = self.has(DISPOSED);
        self.set_flags(DISPOSED);
        self.clear_flags(STALE | DIRTY | SLEEPING);
        if !was_disposed {
            tracing::trace!("computed disposed");
        }

        // Closures may own the last handles to other computeds
        drop(read);
        drop(dispose_when);
    }
}

// =============================================================================
// EVALUATION FRAME
// =============================================================================

/// Dependency frame of one evaluation.
struct EvaluationFrame<T: 'static> {
    computed: Weak<ComputedInner<T>>,
    /// Dependencies of the previous evaluation not yet read again
    disposal_candidates: RefCell<HashMap<DependencyId, TrackedDependency>>,
    is_initial: Option<bool>,
}

impl<T: Clone + 'static> DependencyFrame for EvaluationFrame<T> {
    fn record(&self, dependency: Rc<dyn AnySubscribable>, id: DependencyId) {
        let Some(computed) = self.computed.upgrade() else {
            return;
        };
        if computed.has(DISPOSED) {
            return;
        }

        if same_subscribable(&*dependency, &*computed) {
            if computed.has(PURE) {
                report_error(ReactiveError::RecursivePureComputed);
            } else {
                tracing::warn!(id, "computed read itself while evaluating; ignored");
            }
            return;
        }

        let reclaimed = self.disposal_candidates.borrow_mut().remove(&id);
        match reclaimed {
            Some(tracked) => {
                computed.add_dependency_tracking(id, tracked.target, tracked.subscription);
            }
            None => {
                let known = computed
                    .state
                    .borrow()
                    .dependency_tracking
                    .contains_key(&id);
                if !known {
                    let subscription = if computed.has(SLEEPING) {
                        None
                    } else {
                        Some(dependency.subscribe_dependent(computed.dependent()))
                    };
                    computed.add_dependency_tracking(id, dependency.clone(), subscription);
                }
            }
        }

        // Make sure a pending batched change is not swallowed by equality
        if dependency.is_notification_pending() {
            dependency.notify_next_change_if_value_is_different();
        }
    }

    fn is_initial(&self) -> Option<bool> {
        self.is_initial
    }

    fn dependencies_count(&self) -> usize {
        self.computed
            .upgrade()
            .map_or(0, |c| c.state.borrow().dependencies_count)
    }

    fn dependencies(&self) -> Vec<Rc<dyn AnySubscribable>> {
        self.computed.upgrade().map_or_else(Vec::new, |c| {
            c.ordered_dependencies()
                .into_iter()
                .map(|(_, target, _)| target)
                .collect()
        })
    }

    fn is_sleeping(&self) -> bool {
        self.computed
            .upgrade()
            .is_some_and(|c| c.has(SLEEPING))
    }
}

/// Runs after the read function returns or unwinds.
struct EvaluationCleanup<'a, T: Clone + 'static> {
    computed: &'a ComputedInner<T>,
    frame: Rc<EvaluationFrame<T>>,
}

impl<T: Clone + 'static> Drop for EvaluationCleanup<'_, T> {
    fn drop(&mut self) {
        let leftovers: Vec<Subscription> = self
            .frame
            .disposal_candidates
            .borrow_mut()
            .drain()
            .filter_map(|(_, d)| d.subscription)
            .collect();
        for subscription in leftovers {
            subscription.dispose();
        }
        self.computed.clear_flags(STALE | DIRTY);
    }
}

// =============================================================================
// TRAIT IMPLEMENTATIONS
// =============================================================================

impl<T: Clone + 'static> AnySubscribable for ComputedInner<T> {
    fn dependency_id(&self) -> DependencyId {
        self.core.dependency_id()
    }

    fn kind(&self) -> SubscribableKind {
        if self.has(PURE) {
            SubscribableKind::PureComputed
        } else {
            SubscribableKind::Computed
        }
    }

    fn is_writable(&self) -> bool {
        self.state.borrow().write.is_some()
    }

    /// A sleeping pure computed is not kept up to date, so check its
    /// dependencies before answering.
    fn version(&self) -> u64 {
        if self.has(SLEEPING) && (self.has(STALE) || self.have_dependencies_changed()) {
            self.evaluate_immediate(false);
        }
        self.core.version()
    }

    fn is_notification_pending(&self) -> bool {
        self.core.is_notification_pending()
    }

    fn notify_next_change_if_value_is_different(&self) {
        if let Some(limiter) = self.core.limiter() {
            limiter.notify_next_change_if_value_is_different();
        }
    }

    fn defers_updates(&self) -> bool {
        self.core.defers_updates()
    }

    fn subscribe_dependent(&self, dependent: Weak<dyn Dependent>) -> Subscription {
        self.core.subscribe_dependent(dependent)
    }

    fn dependencies(&self) -> Vec<Rc<dyn AnySubscribable>> {
        self.ordered_dependencies()
            .into_iter()
            .map(|(_, target, _)| target)
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Clone + 'static> Dependent for ComputedInner<T> {
    fn evaluate_possibly_async(&self) {
        self.evaluate_possibly_async_inner();
    }

    fn respond_to_change(&self) {
        if !self.core.is_notification_pending() {
            self.evaluate_possibly_async_inner();
        } else if self.has(DIRTY) {
            self.set_flags(STALE);
        }
    }

    fn mark_dirty(&self) {
        if self.has(EVALUATING) {
            return;
        }
        if let Some(limiter) = self.core.limiter() {
            self.eval_delayed(&limiter, false);
        }
    }
}

impl<T: Clone + 'static> SubscriptionHooks for ComputedInner<T> {
    fn before_subscription_add(&self, event: Event) {
        if self.has(PURE) {
            if !self.has(DISPOSED) && self.has(SLEEPING) && event == Event::Change {
                self.wake();
            }
        } else if self.has(DEFER_EVALUATION)
            && (event == Event::Change || event == Event::BeforeChange)
        {
            self.peek_value(false);
        }
    }

    fn after_subscription_remove(&self, event: Event) {
        if self.has(PURE)
            && !self.has(DISPOSED)
            && event == Event::Change
            && !self.core.has_subscriptions_for_event(Event::Change)
        {
            self.sleep();
        }
    }
}

impl<T: Clone + 'static> LimitTarget<T> for ComputedInner<T> {
    fn settled_value(&self) -> Option<T> {
        if !self.has(SLEEPING) {
            if self.has(STALE) {
                self.evaluate_immediate(false);
            } else {
                self.clear_flags(DIRTY);
            }
        }
        self.latest()
    }

    fn evaluated_peek(&self) -> Option<T> {
        self.peek_value(true)
    }
}

impl<T: Clone + 'static> ExtenderHost<T> for ComputedInner<T> {
    fn core(&self) -> &Rc<Subscribable<T>> {
        &self.core
    }

    fn limit_target(&self) -> Weak<dyn LimitTarget<T>> {
        self.self_ref.clone()
    }

    fn base_equals(&self) -> Option<EqualsFn<T>> {
        self.base_equals
    }

    fn set_throttle_evaluation(&self, timeout: Duration) -> bool {
        self.throttle.set(Some(timeout));
        true
    }
}

impl<T: 'static> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (_, tracked) in state.dependency_tracking.drain() {
            if let Some(subscription) = tracked.subscription {
                subscription.dispose();
            }
        }
        if let (Some(lifetime), Some(id)) = (state.lifetime.take(), state.lifetime_callback.take()) {
            lifetime.remove_callback(id);
        }
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Options for a computed beyond its read function.
///
/// # Example
///
/// ```
/// use spark_observables::{observable, ComputedBuilder};
///
/// let first = observable("Ada".to_string());
/// let last = observable("Lovelace".to_string());
///
/// let full = ComputedBuilder::new({
///     let (first, last) = (first.clone(), last.clone());
///     move || format!("{} {}", first.get(), last.get())
/// })
/// .write({
///     let (first, last) = (first.clone(), last.clone());
///     move |value: String| {
///         if let Some((f, l)) = value.split_once(' ') {
///             first.set(f.to_string());
///             last.set(l.to_string());
///         }
///     }
/// })
/// .build();
///
/// full.set("Grace Hopper".to_string()).unwrap();
/// assert_eq!(first.get(), "Grace");
/// assert_eq!(full.get(), "Grace Hopper");
/// ```
pub struct ComputedBuilder<T: 'static> {
    read: ReadFn<T>,
    write: Option<WriteFn<T>>,
    pure: bool,
    defer_evaluation: bool,
    dispose_when: Option<DisposeWhenFn>,
    lifetime: Option<Lifetime>,
    equals: Option<EqualsFn<T>>,
}

impl<T: Clone + 'static> ComputedBuilder<T> {
    /// Start a computed compared with PartialEq
    pub fn new(read: impl Fn() -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_equals(read, Some(default_equals::<T>))
    }

    /// Start a computed with a custom comparer (None = every evaluation notifies)
    pub fn new_with_equals(read: impl Fn() -> T + 'static, equals: Option<EqualsFn<T>>) -> Self {
        Self {
            read: Rc::new(read),
            write: None,
            pure: false,
            defer_evaluation: false,
            dispose_when: None,
            lifetime: None,
            equals,
        }
    }

    /// Accept writes through `Computed::set`
    pub fn write(mut self, write: impl Fn(T) + 'static) -> Self {
        self.write = Some(Rc::new(write));
        self
    }

    /// Sleep while nothing subscribes to `change`
    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    /// Skip the eager first evaluation
    pub fn defer_evaluation(mut self) -> Self {
        self.defer_evaluation = true;
        self
    }

    /// Dispose instead of evaluating once `predicate` returns true
    pub fn dispose_when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
        self.dispose_when = Some(Rc::new(predicate));
        self
    }

    /// Dispose when `lifetime` ends
    pub fn dispose_with(mut self, lifetime: &Lifetime) -> Self {
        self.lifetime = Some(lifetime.clone());
        self
    }

    pub fn equals(mut self, equals: Option<EqualsFn<T>>) -> Self {
        self.equals = equals;
        self
    }

    pub fn build(self) -> Computed<T> {
        let Self {
            read,
            write,
            pure,
            defer_evaluation,
            dispose_when,
            lifetime,
            equals,
        } = self;

        let mut flags = STALE | DIRTY;
        if pure {
            flags |= PURE | SLEEPING;
        } else if defer_evaluation {
            flags |= DEFER_EVALUATION;
        }
        if lifetime.is_some() {
            flags |= SUPPRESS_DISPOSAL;
        }

        let inner = Rc::new_cyclic(|self_ref: &Weak<ComputedInner<T>>| {
            let core = Subscribable::new_with_equals(equals);
            let hooks: Weak<dyn SubscriptionHooks> = self_ref.clone();
            core.set_hooks(hooks);
            ComputedInner {
                core,
                flags: Cell::new(flags),
                state: RefCell::new(ComputedState {
                    latest_value: None,
                    read: Some(read),
                    write,
                    dependency_tracking: HashMap::new(),
                    dependencies_count: 0,
                    dispose_when,
                    lifetime: lifetime.clone(),
                    lifetime_callback: None,
                }),
                base_equals: equals,
                throttle: Cell::new(None),
                throttle_timer: Cell::new(None),
                self_ref: self_ref.clone(),
            }
        });

        if current_context().defer_updates() {
            apply_extender(&*inner, Extender::Deferred);
        }

        if !pure && !defer_evaluation {
            inner.evaluate_immediate(false);
        }

        if let Some(lifetime) = lifetime {
            if lifetime.is_alive() && inner.is_active() {
                let weak = Rc::downgrade(&inner);
                let id = lifetime.on_end(move || {
                    if let Some(computed) = weak.upgrade() {
                        computed.dispose();
                    }
                });
                inner.state.borrow_mut().lifetime_callback = Some(id);
            }
        }

        Computed { inner }
    }
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn is_active(&self) -> bool {
        !self.has(DISPOSED) && (self.has(DIRTY) || self.state.borrow().dependencies_count > 0)
    }
}

// =============================================================================
// COMPUTED<T> - The public handle
// =============================================================================

/// A cached value derived from other observables and computeds.
///
/// Dropping the last handle disposes the computed. Downstream computeds
/// that read it keep it alive.
///
/// # Example
///
/// ```
/// use spark_observables::{computed, observable};
///
/// let a = observable(1);
/// let b = computed({
///     let a = a.clone();
///     move || a.get() * 2
/// });
///
/// assert_eq!(b.get(), 2);
/// a.set(5);
/// assert_eq!(b.get(), 10);
/// assert_eq!(b.dependencies_count(), 1);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    pub fn builder(read: impl Fn() -> T + 'static) -> ComputedBuilder<T>
    where
        T: PartialEq,
    {
        ComputedBuilder::new(read)
    }

    // =========================================================================
    // READ / WRITE
    // =========================================================================

    /// Current value, re-evaluating first if stale. Registers a dependency
    /// inside another computed.
    ///
    /// # Panics
    ///
    /// If the computed never produced a value: it was disposed before its
    /// first evaluation, or read itself during that evaluation. Use
    /// [`try_get`](Self::try_get) where that can happen.
    pub fn get(&self) -> T {
        self.try_get()
            .expect("computed has no value: disposed before evaluating, or read recursively")
    }

    pub fn try_get(&self) -> Option<T> {
        self.inner.read_tracked()
    }

    /// Current value without registering a dependency.
    pub fn peek(&self) -> Option<T> {
        self.inner.peek_value(false)
    }

    /// Pass `value` to the write function.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        let write = self.inner.state.borrow().write.clone();
        match write {
            Some(write) => {
                write(value);
                Ok(())
            }
            None => Err(ReactiveError::ComputedNotWritable),
        }
    }

    pub fn has_write_function(&self) -> bool {
        self.inner.state.borrow().write.is_some()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Unsubscribe from all dependencies and stop updating. Idempotent.
    ///
    /// The last value stays readable.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Can this computed still change?
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.has(DISPOSED)
    }

    pub fn is_pure(&self) -> bool {
        self.inner.has(PURE)
    }

    pub fn is_sleeping(&self) -> bool {
        self.inner.has(SLEEPING)
    }

    // =========================================================================
    // DEPENDENCIES
    // =========================================================================

    pub fn dependencies_count(&self) -> usize {
        self.inner.state.borrow().dependencies_count
    }

    /// Dependencies in the order the last evaluation read them
    pub fn dependencies(&self) -> Vec<Rc<dyn AnySubscribable>> {
        AnySubscribable::dependencies(&*self.inner)
    }

    /// Whether `target` is a direct or indirect dependency
    pub fn has_ancestor_dependency(&self, target: &dyn AnySubscribable) -> bool {
        has_ancestor_dependency(&*self.inner, target)
    }

    // =========================================================================
    // SUBSCRIBE / EXTEND
    // =========================================================================

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.core.subscribe(callback)
    }

    pub fn subscribe_event(&self, event: Event, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.core.subscribe_event(event, callback)
    }

    pub fn on(&self, event: Event, callback: impl Fn() + 'static) -> Subscription {
        self.inner.core.on(event, callback)
    }

    pub fn subscriptions_count(&self, event: Option<Event>) -> usize {
        self.inner.core.subscriptions_count(event)
    }

    /// Apply an extender. `Extender::Throttle` delays re-evaluation until
    /// dependencies stop changing for the timeout.
    pub fn extend(&self, extender: Extender) -> &Self {
        apply_extender(&*self.inner, extender);
        self
    }

    pub fn extend_named(&self, name: &str, value: ExtenderValue) -> &Self {
        apply_named(&*self.inner, name, value);
        self
    }

    // =========================================================================
    // VERSIONING / IDENTITY
    // =========================================================================

    pub fn version(&self) -> u64 {
        AnySubscribable::version(&*self.inner)
    }

    pub fn has_changed(&self, version: u64) -> bool {
        AnySubscribable::has_changed(&*self.inner, version)
    }

    pub fn is_notification_pending(&self) -> bool {
        self.inner.core.is_notification_pending()
    }

    pub fn as_subscribable(&self) -> Rc<dyn AnySubscribable> {
        self.inner.clone()
    }

    pub fn inner(&self) -> &Rc<ComputedInner<T>> {
        &self.inner
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: fmt::Debug + Clone + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &self.inner.state.borrow().latest_value)
            .field("flags", &self.inner.flags.get())
            .field("dependencies", &self.dependencies_count())
            .finish()
    }
}

// =============================================================================
// CREATION FUNCTIONS
// =============================================================================

/// Create a computed that evaluates now and re-evaluates on change.
pub fn computed<T>(read: impl Fn() -> T + 'static) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    ComputedBuilder::new(read).build()
}

/// Create a pure computed: evaluated on demand, subscribed to its
/// dependencies only while something subscribes to it.
///
/// # Example
///
/// ```
/// use spark_observables::{observable, pure_computed};
///
/// let a = observable(1);
/// let doubled = pure_computed({
///     let a = a.clone();
///     move || a.get() * 2
/// });
/// assert!(doubled.is_sleeping());
/// assert_eq!(a.subscriptions_count(None), 0);
///
/// let sub = doubled.subscribe(|_| {});
/// assert!(!doubled.is_sleeping());
/// assert_eq!(a.subscriptions_count(None), 1);
///
/// sub.dispose();
/// assert!(doubled.is_sleeping());
/// ```
pub fn pure_computed<T>(read: impl Fn() -> T + 'static) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    ComputedBuilder::new(read).pure().build()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{ReactiveContext, ReactiveOptions};
    use crate::primitives::observable::observable;
    use crate::reactivity::scheduling::flush_tasks;
    use crate::reactivity::timers::{run_due_timers, set_clock, ManualClock};
    use crate::reactivity::tracking::computed_context;

    fn counter() -> (Rc<Cell<usize>>, impl Fn() + Clone + 'static) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, move || c.set(c.get() + 1))
    }

    fn isolated() -> crate::core::context::ContextGuard {
        Rc::new(ReactiveContext::new()).enter()
    }

    #[test]
    fn evaluates_eagerly_and_tracks() {
        let a = observable(1);
        let (runs, bump) = counter();
        let b = computed({
            let a = a.clone();
            move || {
                bump();
                a.get() * 2
            }
        });
        assert_eq!(runs.get(), 1);
        assert_eq!(b.get(), 2);
        a.set(5);
        assert_eq!(runs.get(), 2);
        assert_eq!(b.get(), 10);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn dependency_set_follows_latest_evaluation() {
        let flag = observable(true);
        let x = observable(1);
        let y = observable(2);
        let c = computed({
            let (flag, x, y) = (flag.clone(), x.clone(), y.clone());
            move || if flag.get() { x.get() } else { y.get() }
        });

        assert_eq!(c.dependencies_count(), 2);
        assert_eq!(x.subscriptions_count(None), 1);
        assert_eq!(y.subscriptions_count(None), 0);

        flag.set(false);
        assert_eq!(c.get(), 2);
        assert_eq!(x.subscriptions_count(None), 0);
        assert_eq!(y.subscriptions_count(None), 1);
    }

    #[test]
    fn reclaimed_dependencies_keep_their_subscription() {
        let a = observable(1);
        let b = observable(1);
        let c = computed({
            let (a, b) = (a.clone(), b.clone());
            move || a.get() + b.get()
        });
        let ids: Vec<_> = c.dependencies().iter().map(|d| d.dependency_id()).collect();
        a.set(2);
        let after: Vec<_> = c.dependencies().iter().map(|d| d.dependency_id()).collect();
        assert_eq!(ids, after);
        assert_eq!(a.subscriptions_count(None), 1);
    }

    #[test]
    fn zero_dependencies_disposes() {
        let c = computed(|| 42);
        assert!(!c.is_active());
        assert!(c.is_disposed());
        assert_eq!(c.get(), 42);
    }

    #[test]
    fn equal_result_does_not_notify() {
        let a = observable(1);
        let parity = computed({
            let a = a.clone();
            move || a.get() % 2
        });
        let (notes, bump) = counter();
        parity.subscribe(move |_| bump());

        a.set(3);
        assert_eq!(notes.get(), 0);
        a.set(4);
        assert_eq!(notes.get(), 1);
    }

    #[test]
    fn writing_own_dependency_does_not_recurse() {
        let a = observable(0);
        let (runs, bump) = counter();
        let c = computed({
            let a = a.clone();
            move || {
                bump();
                let v = a.get();
                if v < 5 {
                    a.set(v + 1);
                }
                v
            }
        });
        assert_eq!(runs.get(), 1);
        assert_eq!(c.get(), 0);
        assert_eq!(a.peek(), 1);

        a.set(10);
        assert_eq!(c.get(), 10);
    }

    #[test]
    fn self_read_is_ignored() {
        let a = observable(1);
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let c = computed({
            let (a, slot) = (a.clone(), slot.clone());
            move || {
                let own = slot.borrow().as_ref().and_then(|c| c.try_get()).unwrap_or(0);
                a.get() + own
            }
        });
        *slot.borrow_mut() = Some(c.clone());
        a.set(2);
        assert_eq!(c.get(), 3);
        assert_eq!(c.dependencies_count(), 1);
        slot.borrow_mut().take();
    }

    #[test]
    fn write_without_write_function_fails() {
        let a = observable(1);
        let c = computed({
            let a = a.clone();
            move || a.get()
        });
        assert_eq!(c.set(3), Err(ReactiveError::ComputedNotWritable));
        assert!(!c.has_write_function());
    }

    #[test]
    fn defer_evaluation_waits_for_first_read() {
        let a = observable(1);
        let (runs, bump) = counter();
        let c = ComputedBuilder::new({
            let a = a.clone();
            move || {
                bump();
                a.get()
            }
        })
        .defer_evaluation()
        .build();

        assert_eq!(runs.get(), 0);
        assert!(c.is_active());
        assert_eq!(c.get(), 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn defer_evaluation_evaluates_on_subscribe() {
        let a = observable(1);
        let (runs, bump) = counter();
        let c = ComputedBuilder::new({
            let a = a.clone();
            move || {
                bump();
                a.get()
            }
        })
        .defer_evaluation()
        .build();

        c.subscribe(|_| {});
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn pure_sleeps_and_wakes() {
        let a = observable(1);
        let (runs, bump) = counter();
        let c = pure_computed({
            let a = a.clone();
            move || {
                bump();
                a.get() + 1
            }
        });
        assert_eq!(runs.get(), 0);
        assert!(c.is_sleeping());

        assert_eq!(c.get(), 2);
        assert_eq!(runs.get(), 1);
        assert_eq!(a.subscriptions_count(None), 0);

        // Unchanged dependencies: no re-evaluation on read
        assert_eq!(c.get(), 2);
        assert_eq!(runs.get(), 1);

        a.set(5);
        assert_eq!(c.get(), 6);
        assert_eq!(runs.get(), 2);

        let sub = c.subscribe(|_| {});
        assert!(!c.is_sleeping());
        assert_eq!(runs.get(), 2);
        assert_eq!(a.subscriptions_count(None), 1);

        sub.dispose();
        assert!(c.is_sleeping());
        assert_eq!(a.subscriptions_count(None), 0);
    }

    #[test]
    fn awake_and_asleep_events() {
        let a = observable(1);
        let c = pure_computed({
            let a = a.clone();
            move || a.get()
        });
        let log = Rc::new(RefCell::new(Vec::new()));
        for (event, tag) in [(Event::Awake, "awake"), (Event::Asleep, "asleep")] {
            let log = log.clone();
            c.on(event, move || log.borrow_mut().push(tag));
        }
        let sub = c.subscribe(|_| {});
        sub.dispose();
        assert_eq!(*log.borrow(), vec!["awake", "asleep"]);
    }

    #[test]
    fn recursive_pure_computed_is_reported() {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let errors_clone = errors.clone();
        let _ctx = Rc::new(ReactiveContext::with_options(ReactiveOptions {
            defer_updates: false,
            on_error: Some(Rc::new(move |e: &ReactiveError| {
                errors_clone.borrow_mut().push(e.clone())
            })),
        }))
        .enter();

        let a = observable(1);
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let c = pure_computed({
            let (a, slot) = (a.clone(), slot.clone());
            move || {
                if let Some(me) = slot.borrow().as_ref() {
                    let _ = me.try_get();
                }
                a.get()
            }
        });
        *slot.borrow_mut() = Some(c.clone());
        assert_eq!(c.get(), 1);
        assert_eq!(*errors.borrow(), vec![ReactiveError::RecursivePureComputed]);
        slot.borrow_mut().take();
    }

    #[test]
    fn dispose_when_stops_updates() {
        let a = observable(1);
        let done = observable(false);
        let c = ComputedBuilder::new({
            let a = a.clone();
            move || a.get()
        })
        .dispose_when({
            let done = done.clone();
            move || done.peek()
        })
        .build();

        a.set(2);
        assert_eq!(c.get(), 2);
        done.set(true);
        a.set(3);
        assert!(c.is_disposed());
        assert_eq!(c.get(), 2);
        assert_eq!(a.subscriptions_count(None), 0);
    }

    #[test]
    fn lifetime_disposal_is_suppressed_until_alive() {
        let a = observable(1);
        let lifetime = Lifetime::new();
        let c = ComputedBuilder::new({
            let a = a.clone();
            move || a.get()
        })
        .dispose_with(&lifetime)
        .build();

        assert!(c.is_active());
        assert_eq!(lifetime.callbacks_count(), 1);
        lifetime.end();
        assert!(c.is_disposed());
        assert_eq!(a.subscriptions_count(None), 0);
    }

    #[test]
    fn lifetime_never_seen_alive_does_not_dispose() {
        let a = observable(1);
        let lifetime = Lifetime::new();
        lifetime.end();
        let (runs, bump) = counter();
        let c = ComputedBuilder::new({
            let a = a.clone();
            move || {
                bump();
                a.get()
            }
        })
        .dispose_with(&lifetime)
        .build();

        a.set(2);
        assert_eq!(runs.get(), 2);
        assert!(!c.is_disposed());
        assert_eq!(lifetime.callbacks_count(), 0);
    }

    #[test]
    fn dropping_last_handle_unsubscribes() {
        let a = observable(1);
        {
            let _c = computed({
                let a = a.clone();
                move || a.get()
            });
            assert_eq!(a.subscriptions_count(None), 1);
        }
        assert_eq!(a.subscriptions_count(None), 0);
    }

    #[test]
    fn chain_notifies_downstream() {
        let a = observable(1);
        let b = computed({
            let a = a.clone();
            move || a.get() + 1
        });
        let c = computed({
            let b = b.clone();
            move || b.get() * 10
        });
        a.set(2);
        assert_eq!(c.get(), 30);
        assert!(c.has_ancestor_dependency(&*a.as_subscribable()));
        assert!(!b.has_ancestor_dependency(&*c.as_subscribable()));
    }

    #[test]
    fn panicking_reevaluation_is_reported() {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let errors_clone = errors.clone();
        let _ctx = Rc::new(ReactiveContext::with_options(ReactiveOptions {
            defer_updates: false,
            on_error: Some(Rc::new(move |e: &ReactiveError| {
                errors_clone.borrow_mut().push(e.clone())
            })),
        }))
        .enter();

        let a = observable(1);
        let c = computed({
            let a = a.clone();
            move || {
                let v = a.get();
                if v == 2 {
                    panic!("two is not allowed");
                }
                v
            }
        });
        a.set(2);
        assert_eq!(
            *errors.borrow(),
            vec![ReactiveError::EvaluationPanicked("two is not allowed".into())]
        );
        // Tracking survived the panic
        assert_eq!(c.dependencies_count(), 1);
        a.set(3);
        assert_eq!(c.get(), 3);
    }

    #[test]
    fn computed_context_describes_evaluation() {
        let a = observable(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _c = computed({
            let (a, seen) = (a.clone(), seen.clone());
            move || {
                let before = computed_context::dependencies_count();
                let v = a.get();
                seen.borrow_mut().push((
                    computed_context::is_initial(),
                    before,
                    computed_context::dependencies_count(),
                ));
                v
            }
        });
        a.set(2);
        assert_eq!(
            *seen.borrow(),
            vec![
                (Some(true), Some(0), Some(1)),
                (Some(false), Some(0), Some(1)),
            ]
        );
    }

    #[test]
    fn deferred_computed_coalesces() {
        let _ctx = isolated();
        let a = observable(1);
        let b = observable(1);
        let (runs, bump) = counter();
        let sum = computed({
            let (a, b) = (a.clone(), b.clone());
            move || {
                bump();
                a.get() + b.get()
            }
        });
        sum.extend(Extender::Deferred);
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        sum.subscribe(move |v| log_clone.borrow_mut().push(*v));

        a.set(2);
        b.set(3);
        assert!(log.borrow().is_empty());
        flush_tasks();
        assert_eq!(*log.borrow(), vec![5]);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn throttled_evaluation_waits() {
        let _ctx = isolated();
        let clock = Rc::new(ManualClock::new());
        set_clock(clock.clone());

        let a = observable(1);
        let (runs, bump) = counter();
        let c = computed({
            let a = a.clone();
            move || {
                bump();
                a.get()
            }
        });
        c.extend(Extender::Throttle(Duration::from_millis(30)));

        a.set(2);
        a.set(3);
        assert_eq!(runs.get(), 1);
        assert_eq!(c.peek(), Some(1));

        clock.advance(Duration::from_millis(30));
        run_due_timers();
        assert_eq!(runs.get(), 2);
        assert_eq!(c.peek(), Some(3));
    }

    fn disposed_before_first_evaluation() -> Computed<i32> {
        let a = observable(1);
        let c = ComputedBuilder::new(move || a.get())
            .defer_evaluation()
            .build();
        c.dispose();
        c
    }

    #[test]
    fn try_get_on_never_evaluated_disposed_computed_is_none() {
        let c = disposed_before_first_evaluation();
        assert!(c.is_disposed());
        assert_eq!(c.try_get(), None);
        assert_eq!(c.peek(), None);
    }

    #[test]
    #[should_panic(expected = "computed has no value")]
    fn get_on_never_evaluated_disposed_computed_panics() {
        let c = disposed_before_first_evaluation();
        let _ = c.get();
    }
}
