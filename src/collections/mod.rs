// ============================================================================
// spark-observables - Collections
// Array diffing and the observable array built on it
// ============================================================================
//
// `diff` is usable on its own, by list renderers reconciling old and new
// item lists. `observable_array` uses it to publish `arrayChange` edit
// scripts; simple mutations produce their script directly.
// ============================================================================

pub mod diff;
pub mod observable_array;

pub use diff::{compare_arrays, ArrayChange, ChangeStatus, CompareOptions};
pub use observable_array::{observable_array, ObservableArray};
