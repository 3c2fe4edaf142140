// ============================================================================
// spark-observables - Type Definitions
// Events, equality functions and the type-erased graph traits
// ============================================================================

use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};

use super::subscribable::Subscription;

// =============================================================================
// EVENTS
// =============================================================================

/// Named notification channels on a subscribable.
///
/// `Change`, `BeforeChange`, `Spectate` and `Awake` carry the current value
/// and reach both value subscribers and signal subscribers. `Dirty` and
/// `Asleep` carry no value and only reach signal subscribers (see
/// [`Subscribable::on`](crate::Subscribable::on)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The value changed (the default event)
    Change,
    /// The value is about to change; payload is the old value
    BeforeChange,
    /// The value was stored, fired even when `Change` is deferred
    Spectate,
    /// A deferred change is pending
    Dirty,
    /// A computed finished its first evaluation or woke up
    Awake,
    /// A pure computed lost its last subscriber
    Asleep,
    /// An observable array published an edit script
    ArrayChange,
    /// Application-defined event
    Custom(&'static str),
}

impl Event {
    /// Parse an event name such as `"beforeChange"`.
    pub fn from_name(name: &'static str) -> Self {
        match name {
            "change" => Event::Change,
            "beforeChange" => Event::BeforeChange,
            "spectate" => Event::Spectate,
            "dirty" => Event::Dirty,
            "awake" => Event::Awake,
            "asleep" => Event::Asleep,
            "arrayChange" => Event::ArrayChange,
            other => Event::Custom(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Change => "change",
            Event::BeforeChange => "beforeChange",
            Event::Spectate => "spectate",
            Event::Dirty => "dirty",
            Event::Awake => "awake",
            Event::Asleep => "asleep",
            Event::ArrayChange => "arrayChange",
            Event::Custom(name) => name,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// EQUALITY
// =============================================================================

/// Equality function type for comparing values
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Default equality using PartialEq
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

// =============================================================================
// TYPE-ERASED GRAPH TRAITS
// =============================================================================
//
// Dependency tracking does not need the value type. A computed records its
// dependencies as Rc<dyn AnySubscribable> and is notified through
// Weak<dyn Dependent>, so observables and computeds of any T can sit in the
// same dependency map.
// =============================================================================

/// Process-unique identity handed out on first dependency registration.
pub type DependencyId = u64;

/// What kind of reactive value sits behind a type-erased handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribableKind {
    Observable,
    ObservableArray,
    Computed,
    PureComputed,
}

impl SubscribableKind {
    pub fn is_computed(&self) -> bool {
        matches!(self, SubscribableKind::Computed | SubscribableKind::PureComputed)
    }
}

/// Type-erased view of anything that can act as a dependency.
///
/// Implemented by observables, observable arrays and computeds.
pub trait AnySubscribable: Any {
    /// Stable identity used as the key of a computed's dependency map
    fn dependency_id(&self) -> DependencyId;

    fn kind(&self) -> SubscribableKind;

    /// Whether writes are accepted (observables, writable computeds)
    fn is_writable(&self) -> bool;

    /// Current version. A sleeping pure computed re-evaluates first if any
    /// of its dependencies moved on.
    fn version(&self) -> u64;

    fn has_changed(&self, version: u64) -> bool {
        self.version() != version
    }

    /// A rate-limited or deferred change has not been published yet
    fn is_notification_pending(&self) -> bool;

    /// Called when a pending subscribable is read during an evaluation, so
    /// the eventual notification is not swallowed by equality.
    fn notify_next_change_if_value_is_different(&self);

    /// Whether the `deferred` extender is active
    fn defers_updates(&self) -> bool;

    /// Subscribe a computed to this value's change (and dirty) events.
    fn subscribe_dependent(&self, dependent: Weak<dyn Dependent>) -> Subscription;

    /// Dependencies in evaluation order (empty for plain observables)
    fn dependencies(&self) -> Vec<Rc<dyn AnySubscribable>> {
        Vec::new()
    }

    /// Upcast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// The receiving side of a dependency edge.
pub trait Dependent {
    /// A non-deferred dependency changed
    fn evaluate_possibly_async(&self);

    /// A deferred dependency published its change
    fn respond_to_change(&self);

    /// A deferred dependency has a change pending
    fn mark_dirty(&self);
}

/// Pointer identity between two type-erased subscribables.
pub fn same_subscribable(a: &dyn AnySubscribable, b: &dyn AnySubscribable) -> bool {
    std::ptr::eq(
        a as *const dyn AnySubscribable as *const (),
        b as *const dyn AnySubscribable as *const (),
    )
}

/// Whether `target` is reachable through `from`'s dependency graph.
pub fn has_ancestor_dependency(from: &dyn AnySubscribable, target: &dyn AnySubscribable) -> bool {
    let dependencies = from.dependencies();
    if dependencies.iter().any(|dep| same_subscribable(&**dep, target)) {
        return true;
    }
    dependencies
        .iter()
        .any(|dep| has_ancestor_dependency(&**dep, target))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_round_trip() {
        for event in [
            Event::Change,
            Event::BeforeChange,
            Event::Spectate,
            Event::Dirty,
            Event::Awake,
            Event::Asleep,
            Event::ArrayChange,
            Event::Custom("selected"),
        ] {
            assert_eq!(Event::from_name(event.name()), event);
        }
        assert_eq!(Event::Change.to_string(), "change");
    }

    #[test]
    fn default_equality() {
        assert!(default_equals(&1, &1));
        assert!(!default_equals(&"a", &"b"));
    }

    #[test]
    fn kinds() {
        assert!(SubscribableKind::PureComputed.is_computed());
        assert!(!SubscribableKind::ObservableArray.is_computed());
    }
}
