// ============================================================================
// spark-observables - Errors
// ============================================================================

use thiserror::Error;

/// Errors surfaced by the reactive core.
///
/// Only [`Computed::set`](crate::Computed::set) and extender parsing return
/// these directly. Everything raised while a notification chain or a task is
/// in flight goes to the context's error handler instead (see
/// [`ReactiveContext::report_error`](crate::ReactiveContext::report_error)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("unknown extender '{0}'")]
    UnknownExtender(String),

    #[error("invalid value for extender '{extender}': {reason}")]
    InvalidExtenderValue {
        extender: &'static str,
        reason: String,
    },

    #[error("extender '{0}' cannot be applied to this kind of value")]
    UnsupportedExtender(&'static str),

    #[error("cannot write a value to a computed unless a write function is specified")]
    ComputedNotWritable,

    #[error("a pure computed must not be read recursively")]
    RecursivePureComputed,

    #[error("'too much recursion' after processing {0} task groups")]
    TooMuchRecursion(usize),

    #[error("scheduled task panicked: {0}")]
    TaskPanicked(String),

    #[error("computed re-evaluation panicked: {0}")]
    EvaluationPanicked(String),

    #[error("subscriber callback panicked: {0}")]
    SubscriberPanicked(String),
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
