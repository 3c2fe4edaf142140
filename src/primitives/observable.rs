// ============================================================================
// spark-observables - Observable
// A single mutable value cell with equality-gated notification
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::core::context::current_context;
use crate::core::subscribable::{Subscribable, Subscription};
use crate::core::types::{
    default_equals, AnySubscribable, Dependent, DependencyId, EqualsFn, Event, SubscribableKind,
};
use crate::primitives::computed::{Computed, ComputedBuilder};
use crate::reactivity::extenders::{
    apply_extender, apply_named, Extender, ExtenderHost, ExtenderValue,
};
use crate::reactivity::limit::LimitTarget;
use crate::reactivity::timers::{clear_timeout, set_timeout, TimerHandle};
use crate::reactivity::tracking::register_dependency;

// =============================================================================
// INNER
// =============================================================================

pub struct ObservableInner<T: 'static> {
    core: Rc<Subscribable<T>>,
    value: RefCell<T>,
    base_equals: Option<EqualsFn<T>>,
    kind: SubscribableKind,
    self_ref: Weak<ObservableInner<T>>,
}

impl<T: Clone + 'static> ObservableInner<T> {
    fn new(value: T, equals: Option<EqualsFn<T>>, kind: SubscribableKind) -> Rc<Self> {
        let inner = Rc::new_cyclic(|self_ref| Self {
            core: Subscribable::new_with_equals(equals),
            value: RefCell::new(value),
            base_equals: equals,
            kind,
            self_ref: self_ref.clone(),
        });
        if current_context().defer_updates() {
            apply_extender(&*inner, Extender::Deferred);
        }
        inner
    }

    pub fn core(&self) -> &Rc<Subscribable<T>> {
        &self.core
    }
}

impl<T: Clone + 'static> AnySubscribable for ObservableInner<T> {
    fn dependency_id(&self) -> DependencyId {
        self.core.dependency_id()
    }

    fn kind(&self) -> SubscribableKind {
        self.kind
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn version(&self) -> u64 {
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

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Clone + 'static> LimitTarget<T> for ObservableInner<T> {
    fn settled_value(&self) -> Option<T> {
        Some(self.value.borrow().clone())
    }

    fn evaluated_peek(&self) -> Option<T> {
        Some(self.value.borrow().clone())
    }
}

impl<T: Clone + 'static> ExtenderHost<T> for ObservableInner<T> {
    fn core(&self) -> &Rc<Subscribable<T>> {
        &self.core
    }

    fn limit_target(&self) -> Weak<dyn LimitTarget<T>> {
        self.self_ref.clone()
    }

    fn base_equals(&self) -> Option<EqualsFn<T>> {
        self.base_equals
    }
}

// =============================================================================
// OBSERVABLE<T> - The public handle
// =============================================================================

/// A reactive value cell.
///
/// Reading with [`get`](Self::get) inside a computed makes the computed
/// depend on this observable. Writing a value the comparer considers equal
/// is a no-op: no `beforeChange`, no `change`.
///
/// # Example
///
/// ```
/// use spark_observables::observable;
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let name = observable(String::from("Ada"));
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let seen_clone = seen.clone();
/// name.subscribe(move |v| seen_clone.borrow_mut().push(v.clone()));
///
/// name.set("Ada".to_string());
/// name.set("Grace".to_string());
/// assert_eq!(*seen.borrow(), vec!["Grace".to_string()]);
/// ```
pub struct Observable<T: 'static> {
    inner: Rc<ObservableInner<T>>,
}

impl<T: 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Create an observable compared with PartialEq.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_equals(value, Some(default_equals::<T>))
    }

    /// Create an observable with a custom comparer (None = every write notifies).
    pub fn new_with_equals(value: T, equals: Option<EqualsFn<T>>) -> Self {
        Self {
            inner: ObservableInner::new(value, equals, SubscribableKind::Observable),
        }
    }

    pub(crate) fn new_array(value: T, equals: Option<EqualsFn<T>>) -> Self {
        Self {
            inner: ObservableInner::new(value, equals, SubscribableKind::ObservableArray),
        }
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Current value. Registers a dependency inside a computed.
    pub fn get(&self) -> T {
        register_dependency(self.as_subscribable());
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value. Registers a dependency inside a computed.
    ///
    /// `f` must not write to this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        register_dependency(self.as_subscribable());
        f(&self.inner.value.borrow())
    }

    /// Current value without registering a dependency.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    // =========================================================================
    // WRITE
    // =========================================================================

    /// Store `value` if it differs from the current one.
    ///
    /// Returns whether anything was stored.
    pub fn set(&self, value: T) -> bool {
        let different = {
            let current = self.inner.value.borrow();
            self.inner.core.is_different(Some(&current), &value)
        };
        if !different {
            return false;
        }
        self.value_will_mutate();
        *self.inner.value.borrow_mut() = value;
        self.value_has_mutated();
        true
    }

    /// Mutate the value in place. Always notifies.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_observables::observable;
    ///
    /// let tags = observable(vec!["a"]);
    /// tags.update(|v| v.push("b"));
    /// assert_eq!(tags.peek(), vec!["a", "b"]);
    /// ```
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.value_will_mutate();
        f(&mut self.inner.value.borrow_mut());
        self.value_has_mutated();
    }

    /// Mutate in place without notifying; the caller publishes around it.
    pub(crate) fn mutate_silently<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.value.borrow_mut())
    }

    /// Publish `beforeChange` with the value about to be replaced.
    pub fn value_will_mutate(&self) {
        let core = &self.inner.core;
        if core.has_subscriptions_for_event(Event::BeforeChange) || core.limiter().is_some() {
            let old = self.peek();
            core.notify_subscribers(Some(&old), Event::BeforeChange);
        }
    }

    /// Publish `spectate` then `change` for the current value.
    pub fn value_has_mutated(&self) {
        let value = self.peek();
        let core = &self.inner.core;
        core.notify_subscribers(Some(&value), Event::Spectate);
        core.notify_subscribers(Some(&value), Event::Change);
    }

    // =========================================================================
    // SUBSCRIBE
    // =========================================================================

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.core.subscribe(callback)
    }

    pub fn subscribe_event(&self, event: Event, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.core.subscribe_event(event, callback)
    }

    /// Listen for any event, including value-less ones like `dirty`
    pub fn on(&self, event: Event, callback: impl Fn() + 'static) -> Subscription {
        self.inner.core.on(event, callback)
    }

    pub fn subscriptions_count(&self, event: Option<Event>) -> usize {
        self.inner.core.subscriptions_count(event)
    }

    pub fn has_subscriptions_for_event(&self, event: Event) -> bool {
        self.inner.core.has_subscriptions_for_event(event)
    }

    // =========================================================================
    // EXTEND
    // =========================================================================

    /// Apply an extender, returning self for chaining.
    ///
    /// `Extender::Throttle` is not meaningful on a plain observable and is
    /// reported; use [`throttle`](Self::throttle) instead.
    pub fn extend(&self, extender: Extender) -> &Self {
        apply_extender(&*self.inner, extender);
        self
    }

    /// Apply an extender by key. Unknown keys are reported and skipped.
    pub fn extend_named(&self, name: &str, value: ExtenderValue) -> &Self {
        apply_named(&*self.inner, name, value);
        self
    }

    /// A writable computed that reads through to this observable and
    /// applies writes only after `timeout` passes without another write.
    pub fn throttle(&self, timeout: Duration) -> Computed<T>
    where
        T: PartialEq,
    {
        let source = self.clone();
        let target = self.clone();
        let pending: Rc<Cell<Option<TimerHandle>>> = Rc::new(Cell::new(None));
        ComputedBuilder::new(move || source.get())
            .write(move |value: T| {
                if let Some(handle) = pending.take() {
                    clear_timeout(handle);
                }
                let target = target.clone();
                pending.set(Some(set_timeout(timeout, move || {
                    target.set(value);
                })));
            })
            .build()
    }

    // =========================================================================
    // VERSIONING / IDENTITY
    // =========================================================================

    pub fn version(&self) -> u64 {
        self.inner.core.version()
    }

    pub fn has_changed(&self, version: u64) -> bool {
        self.inner.core.has_changed(version)
    }

    pub fn is_notification_pending(&self) -> bool {
        self.inner.core.is_notification_pending()
    }

    pub fn defers_updates(&self) -> bool {
        self.inner.core.defers_updates()
    }

    /// Type-erased handle, as stored in a computed's dependency list
    pub fn as_subscribable(&self) -> Rc<dyn AnySubscribable> {
        self.inner.clone()
    }

    pub fn inner(&self) -> &Rc<ObservableInner<T>> {
        &self.inner
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: fmt::Debug + Clone + 'static> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.version())
            .finish()
    }
}

// =============================================================================
// CREATION FUNCTIONS
// =============================================================================

/// Create an observable.
///
/// # Example
///
/// ```
/// use spark_observables::observable;
///
/// let count = observable(0);
/// assert!(count.set(5));
/// assert!(!count.set(5));
/// assert_eq!(count.get(), 5);
/// ```
pub fn observable<T>(value: T) -> Observable<T>
where
    T: Clone + PartialEq + 'static,
{
    Observable::new(value)
}

/// Create an observable with a custom comparer (None = every write notifies).
pub fn observable_with_equals<T>(value: T, equals: Option<EqualsFn<T>>) -> Observable<T>
where
    T: Clone + 'static,
{
    Observable::new_with_equals(value, equals)
}

// =============================================================================
// TESTS
// =============================================================================
