use spark_observables::reactivity::equality::{
    always_equals, never_equals, rc_ptr_equals, safe_equals_f64,
};
use spark_observables::{observable, observable_with_equals, ComputedBuilder};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn count_notifications<T: Clone + 'static>(
    obs: &spark_observables::Observable<T>,
) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    obs.subscribe({
        let count = count.clone();
        move |_| count.set(count.get() + 1)
    });
    count
}

#[test]
fn default_comparer_treats_nan_as_a_change() {
    let ratio = observable(f64::NAN);
    let count = count_notifications(&ratio);

    ratio.set(f64::NAN);
    assert_eq!(count.get(), 1);
}

#[test]
fn nan_safe_comparer_suppresses_repeated_nan() {
    let ratio = observable_with_equals(f64::NAN, Some(safe_equals_f64));
    let count = count_notifications(&ratio);

    ratio.set(f64::NAN);
    assert_eq!(count.get(), 0);
    ratio.set(0.5);
    assert_eq!(count.get(), 1);
}

#[test]
fn rc_identity_comparer_ignores_equal_contents() {
    let shared = Rc::new(RefCell::new(vec![1]));
    let list = observable_with_equals(shared.clone(), Some(rc_ptr_equals));
    let count = count_notifications(&list);

    shared.borrow_mut().push(2);
    list.set(shared.clone());
    assert_eq!(count.get(), 0);

    list.set(Rc::new(RefCell::new(vec![1, 2])));
    assert_eq!(count.get(), 1);
}

#[test]
fn constant_comparers_drive_notification() {
    let always = observable_with_equals(1, Some(never_equals));
    let never = observable_with_equals(1, Some(always_equals));
    let (always_count, never_count) = (count_notifications(&always), count_notifications(&never));

    always.set(1);
    never.set(2);
    assert_eq!(always_count.get(), 1);
    assert_eq!(never_count.get(), 0);
    assert_eq!(never.peek(), 1);

    never.value_has_mutated();
    assert_eq!(never_count.get(), 1);
}

#[test]
fn computed_uses_custom_comparer() {
    let source = observable(1.0f64);
    let ratio = ComputedBuilder::new({
        let source = source.clone();
        move || source.get() / 0.0 * 0.0
    })
    .equals(Some(safe_equals_f64))
    .build();
    let seen = Rc::new(Cell::new(0));
    ratio.subscribe({
        let seen = seen.clone();
        move |_| seen.set(seen.get() + 1)
    });

    // Every evaluation yields NaN
    source.set(2.0);
    source.set(3.0);
    assert!(ratio.peek().is_some_and(f64::is_nan));
    assert_eq!(seen.get(), 0);
}
