// ============================================================================
// spark-observables - ObservableArray
// An observable Vec with mutators and `arrayChange` edit scripts
// ============================================================================
//
// Mutators run as: beforeChange, mutate in place, spectate, change. While
// something subscribes to `arrayChange`, a tracker keeps a copy of the
// contents last published and emits the edit script from there to the
// current contents after each change notification.
//
// push/pop/shift/unshift/splice know their own edit script, so the tracker
// caches it instead of diffing. The cache only applies when exactly one
// mutation is pending; a deferred array that batched several mutations gets
// a full diff.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::rc::{Rc, Weak};

use crate::collections::diff::{compare_arrays, find_moves, ArrayChange, CompareOptions};
use crate::core::subscribable::{Subscribable, Subscription, SubscriptionHooks};
use crate::core::types::{default_equals, AnySubscribable, Event};
use crate::primitives::observable::Observable;
use crate::reactivity::extenders::{Extender, ExtenderValue};

/// Items that `destroy` flags instead of removing.
pub trait Destroyable {
    fn mark_destroyed(&mut self);

    fn is_destroyed(&self) -> bool;
}

// =============================================================================
// ARRAY CHANGE TRACKER
// =============================================================================

/// A mutation whose edit script is known without diffing.
enum KnownOperation<'a, U> {
    Push(&'a [U]),
    Unshift(&'a [U]),
    Pop,
    Shift,
    Splice {
        start: usize,
        delete_count: usize,
        items: &'a [U],
    },
}

struct TrackerState<U> {
    tracking: bool,
    previous: Vec<U>,
    cached_diff: Option<Vec<ArrayChange<U>>>,
    change_subscription: Option<Subscription>,
    spectate_subscription: Option<Subscription>,
}

struct ArrayTracker<U: 'static> {
    array: Observable<Vec<U>>,
    channel: Rc<Subscribable<Vec<ArrayChange<U>>>>,
    options: Cell<CompareOptions>,
    pending_changes: Cell<usize>,
    state: RefCell<TrackerState<U>>,
    self_ref: Weak<ArrayTracker<U>>,
}

impl<U: Clone + PartialEq + 'static> ArrayTracker<U> {
    fn new(array: Observable<Vec<U>>) -> Rc<Self> {
        Rc::new_cyclic(|self_ref: &Weak<Self>| {
            let channel = Subscribable::new_with_equals(None);
            let hooks: Weak<dyn SubscriptionHooks> = self_ref.clone();
            channel.set_hooks(hooks);
            Self {
                array,
                channel,
                options: Cell::new(CompareOptions {
                    sparse: true,
                    dont_limit_moves: false,
                }),
                pending_changes: Cell::new(0),
                state: RefCell::new(TrackerState {
                    tracking: false,
                    previous: Vec::new(),
                    cached_diff: None,
                    change_subscription: None,
                    spectate_subscription: None,
                }),
                self_ref: self_ref.clone(),
            }
        })
    }

    fn start_tracking(&self) {
        if self.state.borrow().tracking {
            // Consume pending changes so the new subscriber starts clean
            self.notify_changes();
            return;
        }

        let spectate = self.array.on(Event::Spectate, {
            let tracker = self.self_ref.clone();
            move || {
                if let Some(t) = tracker.upgrade() {
                    t.pending_changes.set(t.pending_changes.get() + 1);
                }
            }
        });
        let change = self.array.on(Event::Change, {
            let tracker = self.self_ref.clone();
            move || {
                if let Some(t) = tracker.upgrade() {
                    t.notify_changes();
                }
            }
        });

        let previous = self.array.peek();
        let mut state = self.state.borrow_mut();
        state.tracking = true;
        state.previous = previous;
        state.cached_diff = None;
        state.spectate_subscription = Some(spectate);
        state.change_subscription = Some(change);
        tracing::trace!("array change tracking started");
    }

    fn stop_tracking(&self) {
        let (change, spectate) = {
            let mut state = self.state.borrow_mut();
            state.tracking = false;
            state.previous = Vec::new();
            state.cached_diff = None;
            (
                state.change_subscription.take(),
                state.spectate_subscription.take(),
            )
        };
        for subscription in [change, spectate].into_iter().flatten() {
            subscription.dispose();
        }
        self.pending_changes.set(0);
        tracing::trace!("array change tracking stopped");
    }

    fn notify_changes(&self) {
        if self.pending_changes.get() == 0 {
            return;
        }
        let current = self.array.peek();
        let changes = if self.channel.has_subscriptions_for_event(Event::ArrayChange) {
            self.changes_to(&current)
        } else {
            Vec::new()
        };
        {
            let mut state = self.state.borrow_mut();
            state.previous = current;
            state.cached_diff = None;
        }
        self.pending_changes.set(0);

        if !changes.is_empty() {
            self.channel
                .notify_subscribers(Some(&changes), Event::ArrayChange);
        }
    }

    fn changes_to(&self, current: &[U]) -> Vec<ArrayChange<U>> {
        let mut state = self.state.borrow_mut();
        match &state.cached_diff {
            Some(diff) if self.pending_changes.get() <= 1 => diff.clone(),
            _ => {
                let diff = compare_arrays(&state.previous, current, self.options.get());
                state.cached_diff = Some(diff.clone());
                diff
            }
        }
    }

    /// Record the edit script of `operation` on `raw`, taken before it runs.
    fn cache_diff_for_known_operation(&self, raw: &[U], operation: KnownOperation<'_, U>) {
        if !self.state.borrow().tracking || self.pending_changes.get() > 0 {
            return;
        }

        let len = raw.len();
        let mut diff = Vec::new();
        match operation {
            KnownOperation::Push(items) => {
                diff.extend(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| ArrayChange::added(item.clone(), len + i)),
                );
            }
            KnownOperation::Unshift(items) => {
                diff.extend(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| ArrayChange::added(item.clone(), i)),
                );
            }
            KnownOperation::Pop => {
                if let Some(last) = raw.last() {
                    diff.push(ArrayChange::deleted(last.clone(), len - 1));
                }
            }
            KnownOperation::Shift => {
                if let Some(first) = raw.first() {
                    diff.push(ArrayChange::deleted(first.clone(), 0));
                }
            }
            KnownOperation::Splice {
                start,
                delete_count,
                items,
            } => {
                let start = start.min(len);
                let end_delete = start.saturating_add(delete_count).min(len);
                let end_add = start + items.len();
                let mut deletions = Vec::new();
                let mut additions = Vec::new();
                for index in start..end_delete.max(end_add) {
                    if index < end_delete {
                        deletions.push(diff.len());
                        diff.push(ArrayChange::deleted(raw[index].clone(), index));
                    }
                    if index < end_add {
                        additions.push(diff.len());
                        diff.push(ArrayChange::added(items[index - start].clone(), index));
                    }
                }
                find_moves(&mut diff, &deletions, &additions, None);
            }
        }
        self.state.borrow_mut().cached_diff = Some(diff);
    }
}

impl<U: Clone + PartialEq + 'static> SubscriptionHooks for ArrayTracker<U> {
    fn before_subscription_add(&self, event: Event) {
        if event == Event::ArrayChange {
            self.start_tracking();
        }
    }

    fn after_subscription_remove(&self, event: Event) {
        if event == Event::ArrayChange && !self.channel.has_subscriptions_for_event(Event::ArrayChange)
        {
            self.stop_tracking();
        }
    }
}

// =============================================================================
// OBSERVABLE ARRAY
// =============================================================================

/// An observable holding a `Vec<U>`, with array mutators.
///
/// # Example
///
/// ```
/// use spark_observables::{observable_array, ArrayChange, ChangeStatus};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let items = observable_array(vec!["a", "b"]);
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let log_clone = log.clone();
/// items.subscribe_array_change(move |changes| {
///     log_clone.borrow_mut().extend(changes.iter().cloned());
/// });
///
/// items.push("c");
/// assert_eq!(*log.borrow(), vec![ArrayChange::added("c", 2)]);
/// assert_eq!(items.peek(), vec!["a", "b", "c"]);
/// ```
pub struct ObservableArray<U: 'static> {
    observable: Observable<Vec<U>>,
    tracker: Rc<ArrayTracker<U>>,
}

impl<U: 'static> Clone for ObservableArray<U> {
    fn clone(&self) -> Self {
        Self {
            observable: self.observable.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<U: Clone + PartialEq + 'static> ObservableArray<U> {
    pub fn new(values: Vec<U>) -> Self {
        let observable = Observable::new_array(values, Some(default_equals::<Vec<U>>));
        let tracker = ArrayTracker::new(observable.clone());
        Self {
            observable,
            tracker,
        }
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Current contents. Registers a dependency inside a computed.
    pub fn get(&self) -> Vec<U> {
        self.observable.get()
    }

    pub fn peek(&self) -> Vec<U> {
        self.observable.peek()
    }

    /// Borrow the contents. Registers a dependency inside a computed.
    pub fn with<R>(&self, f: impl FnOnce(&[U]) -> R) -> R {
        self.observable.with(|v| f(v))
    }

    pub fn len(&self) -> usize {
        self.with(|v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.with(|v| v.is_empty())
    }

    pub fn index_of(&self, item: &U) -> Option<usize> {
        self.with(|v| v.iter().position(|x| x == item))
    }

    pub fn slice(&self, range: Range<usize>) -> Vec<U> {
        self.with(|v| {
            let end = range.end.min(v.len());
            let start = range.start.min(end);
            v[start..end].to_vec()
        })
    }

    /// Sorted copy; the array itself is untouched
    pub fn sorted(&self) -> Vec<U>
    where
        U: Ord,
    {
        let mut copy = self.get();
        copy.sort();
        copy
    }

    pub fn sorted_by(&self, compare: impl FnMut(&U, &U) -> Ordering) -> Vec<U> {
        let mut copy = self.get();
        copy.sort_by(compare);
        copy
    }

    /// Reversed copy; the array itself is untouched
    pub fn reversed(&self) -> Vec<U> {
        let mut copy = self.get();
        copy.reverse();
        copy
    }

    // =========================================================================
    // WRITE
    // =========================================================================

    /// Replace the whole contents if they differ.
    pub fn set(&self, values: Vec<U>) -> bool {
        self.observable.set(values)
    }

    /// Publish around an in-place mutation.
    fn mutate<R>(
        &self,
        operation: Option<KnownOperation<'_, U>>,
        f: impl FnOnce(&mut Vec<U>) -> R,
    ) -> R {
        self.observable.value_will_mutate();
        if let Some(operation) = operation {
            self.observable
                .peek_with(|raw| self.tracker.cache_diff_for_known_operation(raw, operation));
        }
        let result = self.observable.mutate_silently(f);
        self.observable.value_has_mutated();
        result
    }

    /// Append an item, returning the new length
    pub fn push(&self, item: U) -> usize {
        self.push_all(vec![item])
    }

    pub fn push_all(&self, items: Vec<U>) -> usize {
        self.mutate(Some(KnownOperation::Push(&items)), |v| {
            v.extend(items.iter().cloned());
            v.len()
        })
    }

    pub fn pop(&self) -> Option<U> {
        self.mutate(Some(KnownOperation::Pop), |v| v.pop())
    }

    pub fn shift(&self) -> Option<U> {
        self.mutate(Some(KnownOperation::Shift), |v| {
            if v.is_empty() {
                None
            } else {
                Some(v.remove(0))
            }
        })
    }

    /// Prepend an item, returning the new length
    pub fn unshift(&self, item: U) -> usize {
        self.unshift_all(vec![item])
    }

    pub fn unshift_all(&self, items: Vec<U>) -> usize {
        self.mutate(Some(KnownOperation::Unshift(&items)), |v| {
            v.splice(0..0, items.iter().cloned());
            v.len()
        })
    }

    /// Remove `delete_count` items at `start` and insert `items` there.
    /// Out-of-range bounds are clamped. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<U>) -> Vec<U> {
        let operation = KnownOperation::Splice {
            start,
            delete_count,
            items: &items,
        };
        self.mutate(Some(operation), |v| {
            let start = start.min(v.len());
            let end = start.saturating_add(delete_count).min(v.len());
            v.splice(start..end, items.iter().cloned()).collect()
        })
    }

    pub fn sort(&self)
    where
        U: Ord,
    {
        self.mutate(None, |v| v.sort());
    }

    pub fn sort_by(&self, compare: impl FnMut(&U, &U) -> Ordering) {
        self.mutate(None, |v| v.sort_by(compare));
    }

    pub fn reverse(&self) {
        self.mutate(None, |v| v.reverse());
    }

    /// Replace the first item equal to `old` with `new`
    pub fn replace(&self, old: &U, new: U) {
        if let Some(index) = self.observable.peek_with(|v| v.iter().position(|x| x == old)) {
            self.mutate(None, |v| v[index] = new);
        }
    }

    // =========================================================================
    // REMOVE / DESTROY
    // =========================================================================

    fn matching_indices(&self, predicate: impl Fn(&U) -> bool) -> Vec<usize> {
        self.observable.peek_with(|v| {
            v.iter()
                .enumerate()
                .filter(|(_, item)| predicate(item))
                .map(|(i, _)| i)
                .collect()
        })
    }

    /// Remove every item equal to `item`, returning them
    pub fn remove(&self, item: &U) -> Vec<U> {
        self.remove_by(|x| x == item)
    }

    /// Remove every item matching `predicate`, returning them.
    /// Nothing is published when nothing matches.
    pub fn remove_by(&self, predicate: impl Fn(&U) -> bool) -> Vec<U> {
        let indices = self.matching_indices(predicate);
        if indices.is_empty() {
            return Vec::new();
        }
        self.mutate(None, |v| {
            indices
                .iter()
                .rev()
                .map(|&i| v.remove(i))
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect()
        })
    }

    /// Remove everything, returning the old contents
    pub fn remove_all(&self) -> Vec<U> {
        self.mutate(None, std::mem::take)
    }

    /// Remove every item equal to one of `items`
    pub fn remove_all_of(&self, items: &[U]) -> Vec<U> {
        self.remove_by(|x| items.contains(x))
    }

    /// Flag every item equal to `item` as destroyed
    pub fn destroy(&self, item: &U)
    where
        U: Destroyable,
    {
        self.destroy_by(|x| x == item);
    }

    /// Flag matching items as destroyed. Always publishes.
    pub fn destroy_by(&self, predicate: impl Fn(&U) -> bool)
    where
        U: Destroyable,
    {
        let indices = self.matching_indices(predicate);
        self.mutate(None, |v| {
            for i in indices {
                v[i].mark_destroyed();
            }
        });
    }

    pub fn destroy_all(&self)
    where
        U: Destroyable,
    {
        self.destroy_by(|_| true);
    }

    pub fn destroy_all_of(&self, items: &[U])
    where
        U: Destroyable,
    {
        self.destroy_by(|x| items.contains(x));
    }

    // =========================================================================
    // SUBSCRIBE / EXTEND
    // =========================================================================

    pub fn subscribe(&self, callback: impl Fn(&Vec<U>) + 'static) -> Subscription {
        self.observable.subscribe(callback)
    }

    pub fn subscribe_event(
        &self,
        event: Event,
        callback: impl Fn(&Vec<U>) + 'static,
    ) -> Subscription {
        self.observable.subscribe_event(event, callback)
    }

    pub fn on(&self, event: Event, callback: impl Fn() + 'static) -> Subscription {
        if event == Event::ArrayChange {
            return self.tracker.channel.on(event, callback);
        }
        self.observable.on(event, callback)
    }

    /// Receive the edit script of each published change
    pub fn subscribe_array_change(
        &self,
        callback: impl Fn(&Vec<ArrayChange<U>>) + 'static,
    ) -> Subscription {
        self.tracker
            .channel
            .subscribe_event(Event::ArrayChange, callback)
    }

    /// Options for the edit scripts; entries are always sparse.
    pub fn track_array_changes(&self, options: CompareOptions) -> &Self {
        self.tracker.options.set(CompareOptions {
            sparse: true,
            ..options
        });
        self
    }

    pub fn subscriptions_count(&self, event: Option<Event>) -> usize {
        match event {
            Some(Event::ArrayChange) => self.tracker.channel.subscriptions_count(event),
            Some(_) => self.observable.subscriptions_count(event),
            None => {
                self.observable.subscriptions_count(None)
                    + self.tracker.channel.subscriptions_count(None)
            }
        }
    }

    pub fn has_subscriptions_for_event(&self, event: Event) -> bool {
        self.subscriptions_count(Some(event)) > 0
    }

    pub fn extend(&self, extender: Extender) -> &Self {
        self.observable.extend(extender);
        self
    }

    pub fn extend_named(&self, name: &str, value: ExtenderValue) -> &Self {
        self.observable.extend_named(name, value);
        self
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    /// The underlying observable
    pub fn as_observable(&self) -> &Observable<Vec<U>> {
        &self.observable
    }

    pub fn as_subscribable(&self) -> Rc<dyn AnySubscribable> {
        self.observable.as_subscribable()
    }

    pub fn version(&self) -> u64 {
        self.observable.version()
    }
}

impl<U: fmt::Debug + Clone + 'static> fmt::Debug for ObservableArray<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableArray")
            .field("items", &self.observable.peek_with(|v| v.clone()))
            .field("tracking", &self.tracker.state.borrow().tracking)
            .finish()
    }
}

/// Create an observable array.
pub fn observable_array<U>(values: Vec<U>) -> ObservableArray<U>
where
    U: Clone + PartialEq + 'static,
{
    ObservableArray::new(values)
}

// =============================================================================
// TESTS
// =============================================================================
