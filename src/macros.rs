// ============================================================================
// spark-observables - Ergonomic Macros
// ============================================================================

/// Clone handles into a move closure.
///
/// Observables and computeds are cheap `Rc` handles, so read functions
/// usually capture clones of them.
///
/// # Usage
///
/// ```rust
/// use spark_observables::{cloned, computed, observable};
///
/// let a = observable(1);
/// let b = observable(2);
///
/// let sum = computed(cloned!(a, b => move || a.get() + b.get()));
/// assert_eq!(sum.get(), 3);
/// a.set(10);
/// assert_eq!(sum.get(), 12);
/// ```
#[macro_export]
macro_rules! cloned {
    ($($n:ident),+ => $e:expr) => {
        {
            $( let $n = $n.clone(); )+
            $e
        }
    };
}

/// Create a computed with automatic variable capturing.
///
/// Wraps `computed(cloned!(... => move || ...))`.
///
/// # Usage
///
/// ```rust
/// use spark_observables::{computed, observable};
///
/// let first = observable("Ada");
/// let last = observable("Lovelace");
///
/// let full = computed!(first, last => format!("{} {}", first.get(), last.get()));
/// assert_eq!(full.get(), "Ada Lovelace");
/// ```
#[macro_export]
macro_rules! computed {
    // With dependencies
    ($($deps:ident),+ => $body:expr) => {
        $crate::computed($crate::cloned!($($deps),+ => move || $body))
    };
    // No captured handles
    ($body:expr) => {
        $crate::computed(move || $body)
    };
}

/// Create a pure computed with automatic variable capturing.
///
/// # Usage
///
/// ```rust
/// use spark_observables::{observable, pure_computed};
///
/// let count = observable(2);
/// let squared = pure_computed!(count => count.get() * count.get());
/// assert!(squared.is_sleeping());
/// assert_eq!(squared.get(), 4);
/// ```
#[macro_export]
macro_rules! pure_computed {
    ($($deps:ident),+ => $body:expr) => {
        $crate::pure_computed($crate::cloned!($($deps),+ => move || $body))
    };
    ($body:expr) => {
        $crate::pure_computed(move || $body)
    };
}
