use spark_observables::{
    cancel, computed, flush_tasks, observable, run_due_timers, schedule, set_clock, set_scheduler,
    ContextGuard, Event, Extender, ExtenderValue, ManualClock, ManualScheduler, RateLimitOptions,
    ReactiveContext, ReactiveError, ReactiveOptions,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// Fresh context so queued tasks and timers do not leak between tests
fn isolated() -> ContextGuard {
    Rc::new(ReactiveContext::new()).enter()
}

fn isolated_with(defer_updates: bool) -> (ContextGuard, Rc<RefCell<Vec<ReactiveError>>>) {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let guard = Rc::new(ReactiveContext::with_options(ReactiveOptions {
        defer_updates,
        on_error: Some(Rc::new(move |e: &ReactiveError| sink.borrow_mut().push(e.clone()))),
    }))
    .enter();
    (guard, errors)
}

fn manual_clock() -> Rc<ManualClock> {
    let clock = Rc::new(ManualClock::new());
    set_clock(clock.clone());
    clock
}

fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |v: &T| sink.borrow_mut().push(v.clone()))
}

// =============================================================================
// DEFERRED
// =============================================================================

#[test]
fn deferred_coalesces_synchronous_writes() {
    let _ctx = isolated();
    let a = observable(0);
    a.extend(Extender::Deferred);
    let (log, record) = recorder::<i32>();
    a.subscribe(record);

    a.set(1);
    a.set(2);
    a.set(3);
    assert!(log.borrow().is_empty());
    assert!(a.is_notification_pending());

    flush_tasks();
    assert_eq!(*log.borrow(), vec![3]);
    assert!(!a.is_notification_pending());
}

#[test]
fn deferred_skips_when_value_returns() {
    let _ctx = isolated();
    let a = observable(0);
    a.extend(Extender::Deferred);
    let (log, record) = recorder::<i32>();
    a.subscribe(record);

    a.set(5);
    a.set(0);
    flush_tasks();
    assert!(log.borrow().is_empty());
}

#[test]
fn dirty_fires_synchronously() {
    let _ctx = isolated();
    let a = observable(0);
    a.extend(Extender::Deferred);
    let dirty = Rc::new(Cell::new(0));
    let dirty_clone = dirty.clone();
    a.on(Event::Dirty, move || dirty_clone.set(dirty_clone.get() + 1));

    a.set(1);
    assert_eq!(dirty.get(), 1);
}

#[test]
fn computed_follows_deferred_dependency_after_flush() {
    let _ctx = isolated();
    let a = observable(1);
    a.extend(Extender::Deferred);
    let c = computed({
        let a = a.clone();
        move || a.get() + 1
    });

    a.set(5);
    flush_tasks();
    assert_eq!(c.get(), 6);
}

#[test]
fn global_deferred_mode_batches_a_chain() {
    let (_ctx, errors) = isolated_with(true);
    let a = observable(0);
    assert!(a.defers_updates());

    let runs = Rc::new(Cell::new(0));
    let doubled = computed({
        let (a, runs) = (a.clone(), runs.clone());
        move || {
            runs.set(runs.get() + 1);
            a.get() * 2
        }
    });
    let (log, record) = recorder::<i32>();
    doubled.subscribe(record);

    a.set(1);
    a.set(2);
    assert!(log.borrow().is_empty());

    flush_tasks();
    assert_eq!(*log.borrow(), vec![4]);
    assert_eq!(runs.get(), 2);
    assert!(errors.borrow().is_empty());
}

// =============================================================================
// RATE LIMIT
// =============================================================================

#[test]
fn rate_limit_throttle_publishes_once_per_window() {
    let _ctx = isolated();
    let clock = manual_clock();
    let a = observable(0);
    a.extend(Extender::RateLimit(RateLimitOptions::throttle(
        Duration::from_millis(50),
    )));
    let (log, record) = recorder::<i32>();
    a.subscribe(record);

    a.set(1);
    clock.advance(Duration::from_millis(20));
    a.set(2);
    run_due_timers();
    assert!(log.borrow().is_empty());

    clock.advance(Duration::from_millis(30));
    run_due_timers();
    assert_eq!(*log.borrow(), vec![2]);
}

#[test]
fn rate_limit_debounce_waits_for_quiet() {
    let _ctx = isolated();
    let clock = manual_clock();
    let a = observable(0);
    a.extend_named(
        "rateLimit",
        ExtenderValue::RateLimit(RateLimitOptions::notify_when_changes_stop(
            Duration::from_millis(50),
        )),
    );
    let (log, record) = recorder::<i32>();
    a.subscribe(record);

    a.set(1);
    clock.advance(Duration::from_millis(30));
    a.set(2);
    clock.advance(Duration::from_millis(30));
    run_due_timers();
    assert!(log.borrow().is_empty());

    clock.advance(Duration::from_millis(20));
    run_due_timers();
    assert_eq!(*log.borrow(), vec![2]);
}

#[test]
fn rate_limit_replaces_deferred() {
    let _ctx = isolated();
    let a = observable(0);
    a.extend(Extender::Deferred)
        .extend(Extender::RateLimit(RateLimitOptions::throttle(Duration::ZERO)));
    assert!(!a.defers_updates());
}

// =============================================================================
// NAMED EXTENDERS
// =============================================================================

#[test]
fn notify_always_publishes_equal_writes() {
    let a = observable(1);
    a.extend_named("notify", ExtenderValue::Text("always".into()));
    let (log, record) = recorder::<i32>();
    a.subscribe(record);
    a.set(1);
    a.set(1);
    assert_eq!(*log.borrow(), vec![1, 1]);
}

#[test]
fn unknown_extender_is_reported_not_raised() {
    let (_ctx, errors) = isolated_with(false);
    let a = observable(1);
    a.extend_named("sparkle", ExtenderValue::Bool(true));
    assert_eq!(
        *errors.borrow(),
        vec![ReactiveError::UnknownExtender("sparkle".into())]
    );
    assert!(a.set(2));
}

// =============================================================================
// TASK QUEUE
// =============================================================================

#[test]
fn custom_scheduler_receives_one_flush_request() {
    let _ctx = isolated();
    let scheduler = Rc::new(ManualScheduler::new());
    set_scheduler(scheduler.clone());

    let ran = Rc::new(Cell::new(0));
    for _ in 0..3 {
        let ran = ran.clone();
        schedule(move || ran.set(ran.get() + 1));
    }
    assert!(scheduler.has_pending());
    assert!(scheduler.run_pending());
    assert_eq!(ran.get(), 3);
    assert!(!scheduler.has_pending());
}

#[test]
fn panicking_task_is_reported_and_queue_continues() {
    let (_ctx, errors) = isolated_with(false);
    let ran = Rc::new(Cell::new(false));
    let ran_clone = ran.clone();

    schedule(|| panic!("boom"));
    schedule(move || ran_clone.set(true));
    flush_tasks();

    assert!(ran.get());
    assert_eq!(*errors.borrow(), vec![ReactiveError::TaskPanicked("boom".into())]);
}

#[test]
fn cancelling_stale_handles_is_a_no_op() {
    let _ctx = isolated();
    let log = Rc::new(RefCell::new(Vec::new()));
    let push = |n: i32| {
        let log = log.clone();
        move || log.borrow_mut().push(n)
    };

    let first = schedule(push(1));
    let second = schedule(push(2));
    let third = schedule(push(3));
    cancel(second);
    cancel(second);
    flush_tasks();
    assert_eq!(*log.borrow(), vec![1, 3]);

    // Handles from the finished round must not hit the new queue
    schedule(push(4));
    schedule(push(5));
    cancel(first);
    cancel(second);
    cancel(third);
    flush_tasks();
    assert_eq!(*log.borrow(), vec![1, 3, 4, 5]);
}
