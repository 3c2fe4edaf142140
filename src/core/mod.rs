// ============================================================================
// spark-observables - Core Module
// Fundamental types, the per-thread context and the publish/subscribe core
// ============================================================================

pub mod constants;
pub mod context;
pub mod subscribable;
pub mod types;

// Re-export commonly used items
pub use context::{current_context, is_tracking, with_context, ReactiveContext};
pub use subscribable::{Subscribable, Subscription};
pub use types::{default_equals, AnySubscribable, EqualsFn, Event};
