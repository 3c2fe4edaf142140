// ============================================================================
// spark-observables - When
// One-shot reaction to a predicate becoming true
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::subscribable::Subscription;
use crate::primitives::computed::{Computed, ComputedBuilder};
use crate::reactivity::extenders::{Extender, NotifyWhen};

struct WhenState {
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
    computed: RefCell<Option<Computed<bool>>>,
}

impl WhenState {
    fn fire(&self) {
        let Some(callback) = self.callback.borrow_mut().take() else {
            return;
        };
        // Dropping the computed breaks the computed -> subscription -> state cycle
        if let Some(computed) = self.computed.borrow_mut().take() {
            computed.dispose();
        }
        callback();
    }
}

/// Run `callback` once, the first time `predicate` returns true.
///
/// The predicate is tracked like a pure computed. If it is already true the
/// callback runs before `when` returns. Disposing the returned subscription
/// before that cancels the wait.
///
/// # Example
///
/// ```
/// use spark_observables::{observable, when};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let loaded = observable(false);
/// let fired = Rc::new(Cell::new(0));
///
/// let _wait = when(
///     {
///         let loaded = loaded.clone();
///         move || loaded.get()
///     },
///     {
///         let fired = fired.clone();
///         move || fired.set(fired.get() + 1)
///     },
/// );
///
/// loaded.set(true);
/// loaded.set(false);
/// loaded.set(true);
/// assert_eq!(fired.get(), 1);
/// ```
pub fn when(
    predicate: impl Fn() -> bool + 'static,
    callback: impl FnOnce() + 'static,
) -> Subscription {
    let condition = ComputedBuilder::new(predicate).pure().build();
    condition.extend(Extender::Notify(NotifyWhen::Always));

    let state = Rc::new(WhenState {
        callback: RefCell::new(Some(Box::new(callback))),
        computed: RefCell::new(Some(condition.clone())),
    });

    let subscription = condition.subscribe({
        let state = state.clone();
        move |value| {
            if *value {
                state.fire();
            }
        }
    });

    if condition.peek() == Some(true) {
        state.fire();
    }
    subscription
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::observable::observable;
    use std::cell::Cell;

    #[test]
    fn fires_immediately_when_already_true() {
        let ready = observable(true);
        let fired = Rc::new(Cell::new(false));
        let fired_clone = fired.clone();
        when(
            {
                let ready = ready.clone();
                move || ready.get()
            },
            move || fired_clone.set(true),
        );
        assert!(fired.get());
        assert_eq!(ready.subscriptions_count(None), 0);
    }

    #[test]
    fn fires_once_then_unsubscribes() {
        let n = observable(0);
        let fired = Rc::new(Cell::new(0));
        let fired_clone = fired.clone();
        when(
            {
                let n = n.clone();
                move || n.get() > 2
            },
            move || fired_clone.set(fired_clone.get() + 1),
        );
        assert_eq!(n.subscriptions_count(None), 1);

        n.set(1);
        n.set(3);
        n.set(4);
        assert_eq!(fired.get(), 1);
        assert_eq!(n.subscriptions_count(None), 0);
    }

    #[test]
    fn disposing_cancels_the_wait() {
        let n = observable(0);
        let fired = Rc::new(Cell::new(false));
        let fired_clone = fired.clone();
        let wait = when(
            {
                let n = n.clone();
                move || n.get() == 1
            },
            move || fired_clone.set(true),
        );
        wait.dispose();
        assert_eq!(n.subscriptions_count(None), 0);

        n.set(1);
        assert!(!fired.get());
    }
}
