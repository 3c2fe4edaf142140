// ============================================================================
// spark-observables - Primitives Module
// observable, computed, lifetime, when
// ============================================================================

pub mod computed;
pub mod lifetime;
pub mod observable;
pub mod when;

// Re-export for convenience
pub use computed::{computed, pure_computed, Computed, ComputedBuilder, ComputedInner};
pub use lifetime::Lifetime;
pub use observable::{observable, Observable, ObservableInner};
pub use when::when;
