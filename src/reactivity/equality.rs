// ============================================================================
// spark-observables - Equality Comparers
// Functions usable as an observable's or computed's change comparer
// ============================================================================
//
// A comparer answers "is the new value the same as the old one?". When it
// says yes, a write is a no-op and a re-evaluation publishes nothing. A
// subscribable with no comparer at all (the `notify: always` extender)
// treats every write as a change.
//
// The default comparer is `default_equals` (PartialEq). These are the
// alternatives for values where PartialEq gives the wrong answer.
// ============================================================================

use std::rc::Rc;

pub use crate::core::types::default_equals;

// =============================================================================
// IDENTITY
// =============================================================================

/// Identity of shared values: two `Rc`s are equal only if they point at
/// the same allocation, whatever their contents.
///
/// Use for observables holding shared mutable state, where an in-place edit
/// followed by re-writing the same `Rc` must still count as "same".
///
/// # Example
/// ```
/// use spark_observables::reactivity::equality::rc_ptr_equals;
/// use std::rc::Rc;
///
/// let a = Rc::new(vec![1]);
/// let b = Rc::new(vec![1]);
/// assert!(rc_ptr_equals(&a, &a.clone()));
/// assert!(!rc_ptr_equals(&a, &b));
/// ```
pub fn rc_ptr_equals<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::ptr_eq(a, b)
}

// =============================================================================
// FLOATS
// =============================================================================

/// f64 equality where NaN equals NaN, so re-writing NaN is a no-op.
///
/// ```
/// use spark_observables::reactivity::equality::safe_equals_f64;
///
/// assert!(safe_equals_f64(&f64::NAN, &f64::NAN));
/// assert!(!safe_equals_f64(&f64::NAN, &1.0));
/// ```
pub fn safe_equals_f64(a: &f64, b: &f64) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

pub fn safe_equals_f32(a: &f32, b: &f32) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

pub fn safe_equals_option_f64(a: &Option<f64>, b: &Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => safe_equals_f64(a, b),
        _ => false,
    }
}

// =============================================================================
// CONSTANT COMPARERS
// =============================================================================

/// Every write is a change. Same effect as the `notify: always` extender,
/// but leaves a comparer installed.
pub fn never_equals<T>(_a: &T, _b: &T) -> bool {
    false
}

/// No write is ever a change. Only `value_has_mutated` can notify.
pub fn always_equals<T>(_a: &T, _b: &T) -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EqualsFn;

    #[test]
    fn rc_identity_ignores_contents() {
        let a = Rc::new(String::from("x"));
        let b = Rc::new(String::from("x"));
        assert!(rc_ptr_equals(&a, &a));
        assert!(!rc_ptr_equals(&a, &b));
    }

    #[test]
    fn nan_is_stable() {
        assert!(safe_equals_f64(&f64::NAN, &f64::NAN));
        assert!(!safe_equals_f64(&1.0, &f64::NAN));
        assert!(safe_equals_f64(&-0.0, &0.0));
        assert!(safe_equals_f32(&f32::NAN, &f32::NAN));
        assert!(safe_equals_option_f64(&Some(f64::NAN), &Some(f64::NAN)));
        assert!(!safe_equals_option_f64(&Some(1.0), &None));
    }

    #[test]
    fn constant_comparers() {
        assert!(!never_equals(&1, &1));
        assert!(always_equals(&1, &2));
        let eq: EqualsFn<u8> = never_equals;
        assert!(!eq(&3, &3));
        let eq: EqualsFn<u8> = default_equals;
        assert!(eq(&3, &3));
    }
}
