// ============================================================================
// spark-observables - Observables, Computeds and Array Diffing
// ============================================================================
//
// The dependency-tracking core of a data-binding UI library: observable
// values, computed values that discover their dependencies while they run,
// named-event subscriptions, change batching (deferred / rate-limited
// notification) and the array diff used to reconcile rendered lists.
//
// Everything is single-threaded. Each thread has a current ReactiveContext
// holding the dependency-frame stack, task queue, timers and error handler;
// `ReactiveContext::enter` swaps in a fresh one for an isolated graph.
// ============================================================================

pub mod collections;
pub mod core;
pub mod error;
pub mod primitives;
pub mod reactivity;

mod macros;

// Re-export core items at crate root
pub use crate::core::constants;
pub use crate::core::context::{
    current_context, is_tracking, report_error, with_context, ContextGuard, ErrorHandler,
    ReactiveContext, ReactiveOptions,
};
pub use crate::core::subscribable::{Subscribable, Subscription, SubscriptionHooks};
pub use crate::core::types::{
    default_equals, AnySubscribable, Dependent, DependencyId, EqualsFn, Event, SubscribableKind,
};
pub use error::ReactiveError;

// Primitives
pub use primitives::computed::{computed, pure_computed, Computed, ComputedBuilder};
pub use primitives::lifetime::{EndCallbackId, Lifetime};
pub use primitives::observable::{observable, observable_with_equals, Observable};
pub use primitives::when::when;

// Reactivity
pub use reactivity::extenders::{
    Extender, ExtenderValue, NotifyWhen, RateLimitMethod, RateLimitOptions,
};
pub use reactivity::limit::LimitPolicy;
pub use reactivity::scheduling::{
    cancel, flush_tasks, run_early, schedule, set_scheduler, ManualScheduler, TaskHandle,
    TaskScheduler,
};
pub use reactivity::timers::{
    clear_timeout, run_due_timers, set_clock, set_timeout, Clock, ManualClock, SystemClock,
    TimerHandle,
};
pub use reactivity::tracking::{computed_context, ignore};

// Collections
pub use collections::diff::{compare_arrays, find_moves, ArrayChange, ChangeStatus, CompareOptions};
pub use collections::observable_array::{observable_array, Destroyable, ObservableArray};

// =============================================================================
// TESTS
// =============================================================================
