// ============================================================================
// spark-observables - Reactivity Module
// Dependency detection, scheduling, timers and change batching
// ============================================================================

pub mod equality;
pub mod extenders;
pub mod limit;
pub mod scheduling;
pub mod timers;
pub mod tracking;

// Re-export main tracking functions
pub use tracking::{computed_context, ignore, register_dependency};

// Re-export scheduling functions
pub use scheduling::{flush_tasks, schedule};
