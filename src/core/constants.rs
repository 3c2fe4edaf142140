// ============================================================================
// spark-observables - Constants
// State flags for computed values and tuning limits for the core
// ============================================================================

// =============================================================================
// COMPUTED STATE FLAGS
// =============================================================================

/// Cached value is out of date and a dependency changed
pub const STALE: u32 = 1 << 0;

/// Cached value must be re-validated before it is read
pub const DIRTY: u32 = 1 << 1;

/// Read function is currently running
pub const EVALUATING: u32 = 1 << 2;

/// Computed was created as pure (sleeps while unobserved)
pub const PURE: u32 = 1 << 3;

/// Pure computed holds no live dependency subscriptions
pub const SLEEPING: u32 = 1 << 4;

/// Computed has been disposed (terminal)
pub const DISPOSED: u32 = 1 << 5;

/// Evaluation waits until the value is first read or subscribed
pub const DEFER_EVALUATION: u32 = 1 << 6;

/// Dispose-when checks are ignored until they first report "alive"
pub const SUPPRESS_DISPOSAL: u32 = 1 << 7;

// =============================================================================
// LIMITS
// =============================================================================

/// Number of consecutive task groups the task queue processes before it
/// assumes runaway recursion and drops the remaining tasks.
pub const MAX_TASK_GROUPS: usize = 5000;

/// Multiplier applied to the small array length to bound failed compares
/// during move detection.
pub const MOVE_COMPARE_FACTOR: usize = 10;

// =============================================================================
// TESTS
// =============================================================================
