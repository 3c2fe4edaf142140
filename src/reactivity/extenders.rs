// ============================================================================
// spark-observables - Extenders
// notify / deferred / rateLimit / throttle
// ============================================================================
//
// Extenders decorate an observable or computed after construction. Typed
// callers pass an `Extender`; callers that only have a key and a loose
// value (bindings, config files) go through `extend_named`, where an
// unknown key is reported to the error handler and skipped instead of
// failing the whole chain.
// ============================================================================

use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::core::context::report_error;
use crate::core::subscribable::Subscribable;
use crate::core::types::EqualsFn;
use crate::error::ReactiveError;
use crate::reactivity::limit::{LimitPolicy, LimitTarget, Limiter};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyWhen {
    /// Notify on every write, equal or not
    Always,
    /// Notify only when the comparer sees a difference
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitMethod {
    /// Publish at most once per timeout
    #[default]
    Throttle,
    /// Publish once writes have stopped for the timeout
    NotifyWhenChangesStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOptions {
    pub timeout: Duration,
    pub method: RateLimitMethod,
}

impl RateLimitOptions {
    pub fn throttle(timeout: Duration) -> Self {
        Self {
            timeout,
            method: RateLimitMethod::Throttle,
        }
    }

    pub fn notify_when_changes_stop(timeout: Duration) -> Self {
        Self {
            timeout,
            method: RateLimitMethod::NotifyWhenChangesStop,
        }
    }
}

/// A decoration applied with `extend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extender {
    Notify(NotifyWhen),
    /// Batch `change` until the next task flush. Cannot be turned off.
    Deferred,
    /// Batch `change` on a timer. Replaces `Deferred`.
    RateLimit(RateLimitOptions),
    /// Delay re-evaluation of a computed until its dependencies settle
    Throttle(Duration),
}

/// Loosely typed extender argument, as found in bindings and config.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtenderValue {
    Bool(bool),
    Millis(u64),
    Text(String),
    RateLimit(RateLimitOptions),
}

impl Extender {
    /// Build an extender from its string key, e.g. `"rateLimit"`.
    ///
    /// # Example
    ///
    /// ```
    /// use spark_observables::{Extender, ExtenderValue, RateLimitOptions};
    /// use std::time::Duration;
    ///
    /// let ext = Extender::parse("rateLimit", ExtenderValue::Millis(50)).unwrap();
    /// assert_eq!(
    ///     ext,
    ///     Extender::RateLimit(RateLimitOptions::throttle(Duration::from_millis(50)))
    /// );
    /// assert!(Extender::parse("bogus", ExtenderValue::Bool(true)).is_err());
    /// ```
    pub fn parse(name: &str, value: ExtenderValue) -> Result<Self, ReactiveError> {
        match (name, value) {
            ("notify", ExtenderValue::Text(text)) => Ok(Extender::Notify(if text == "always" {
                NotifyWhen::Always
            } else {
                NotifyWhen::Changed
            })),
            ("deferred", ExtenderValue::Bool(true)) => Ok(Extender::Deferred),
            ("deferred", _) => Err(ReactiveError::InvalidExtenderValue {
                extender: "deferred",
                reason: "only `true` is accepted; deferral cannot be turned off once enabled"
                    .into(),
            }),
            ("rateLimit", ExtenderValue::Millis(ms)) => Ok(Extender::RateLimit(
                RateLimitOptions::throttle(Duration::from_millis(ms)),
            )),
            ("rateLimit", ExtenderValue::RateLimit(options)) => Ok(Extender::RateLimit(options)),
            ("throttle", ExtenderValue::Millis(ms)) => {
                Ok(Extender::Throttle(Duration::from_millis(ms)))
            }
            ("notify", value) => Err(unexpected_value("notify", value)),
            ("rateLimit", value) => Err(unexpected_value("rateLimit", value)),
            ("throttle", value) => Err(unexpected_value("throttle", value)),
            (other, _) => Err(ReactiveError::UnknownExtender(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Extender::Notify(_) => "notify",
            Extender::Deferred => "deferred",
            Extender::RateLimit(_) => "rateLimit",
            Extender::Throttle(_) => "throttle",
        }
    }
}

fn unexpected_value(extender: &'static str, value: ExtenderValue) -> ReactiveError {
    ReactiveError::InvalidExtenderValue {
        extender,
        reason: format!("unexpected value {value:?}"),
    }
}

// =============================================================================
// APPLYING
// =============================================================================

/// What an extender needs from the value it decorates.
pub(crate) trait ExtenderHost<T: 'static> {
    fn core(&self) -> &Rc<Subscribable<T>>;

    fn limit_target(&self) -> Weak<dyn LimitTarget<T>>;

    /// Comparer restored by `notify: changed`
    fn base_equals(&self) -> Option<EqualsFn<T>>;

    /// Install evaluation throttling. Returns false when unsupported.
    fn set_throttle_evaluation(&self, _timeout: Duration) -> bool {
        false
    }
}

pub(crate) fn apply_extender<T: Clone + 'static>(host: &dyn ExtenderHost<T>, extender: Extender) {
    let core = host.core();
    match extender {
        Extender::Notify(NotifyWhen::Always) => core.set_equals(None),
        Extender::Notify(NotifyWhen::Changed) => core.set_equals(host.base_equals()),
        Extender::Deferred => {
            if !core.defers_updates() {
                core.set_defer_updates(true);
                install_limit(host, LimitPolicy::Deferred);
            }
        }
        Extender::RateLimit(options) => {
            core.set_defer_updates(false);
            let policy = match options.method {
                RateLimitMethod::Throttle => LimitPolicy::Throttle(options.timeout),
                RateLimitMethod::NotifyWhenChangesStop => LimitPolicy::Debounce(options.timeout),
            };
            install_limit(host, policy);
        }
        Extender::Throttle(timeout) => {
            if !host.set_throttle_evaluation(timeout) {
                report_error(ReactiveError::UnsupportedExtender("throttle"));
            }
        }
    }
}

fn install_limit<T: Clone + 'static>(host: &dyn ExtenderHost<T>, policy: LimitPolicy) {
    let core = host.core();
    let limiter = Limiter::new(core, host.limit_target(), policy);
    tracing::trace!(?policy, "limit installed");
    core.install_limiter(limiter);
}

/// Parse and apply a named extender, reporting failures instead of
/// returning them.
pub(crate) fn apply_named<T: Clone + 'static>(
    host: &dyn ExtenderHost<T>,
    name: &str,
    value: ExtenderValue,
) {
    match Extender::parse(name, value) {
        Ok(extender) => apply_extender(host, extender),
        Err(error) => {
            tracing::warn!(extender = name, %error, "extender skipped");
            report_error(error);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
