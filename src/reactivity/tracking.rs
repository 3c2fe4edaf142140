// ============================================================================
// spark-observables - Dependency Detection
// Stack of frames recording what an evaluation reads
// ============================================================================
//
// begin/end push and pop frames on the current context. A `None` frame
// suppresses detection (used by `ignore` and by notification). Reads call
// `register_dependency`, which forwards to the top frame if there is one.
//
// Frames must nest strictly, including when the code inside panics, so all
// scoped entry points here go through FrameGuard.
// ============================================================================

use std::rc::Rc;

use crate::core::context::with_context;
use crate::core::types::{AnySubscribable, DependencyId};

// =============================================================================
// FRAME
// =============================================================================

/// Receiver of dependency registrations for one evaluation.
pub trait DependencyFrame {
    /// A subscribable was read while this frame was on top
    fn record(&self, dependency: Rc<dyn AnySubscribable>, id: DependencyId);

    /// Whether the evaluation is the first one (None for pure computeds)
    fn is_initial(&self) -> Option<bool> {
        None
    }

    /// Dependencies registered so far by the owning computed
    fn dependencies_count(&self) -> usize {
        0
    }

    /// Dependencies registered so far, in read order
    fn dependencies(&self) -> Vec<Rc<dyn AnySubscribable>> {
        Vec::new()
    }

    /// Whether the owning computed is sleeping
    fn is_sleeping(&self) -> bool {
        false
    }
}

// =============================================================================
// BEGIN / END
// =============================================================================

/// Install a new frame on top of the stack.
pub fn begin(frame: Option<Rc<dyn DependencyFrame>>) {
    with_context(|ctx| ctx.begin_frame(frame));
}

/// Pop the frame installed by the matching `begin`.
pub fn end() {
    with_context(|ctx| ctx.end_frame());
}

/// Pops its frame when dropped.
pub struct FrameGuard {
    _private: (),
}

impl FrameGuard {
    pub fn begin(frame: Option<Rc<dyn DependencyFrame>>) -> Self {
        begin(frame);
        Self { _private: () }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        end();
    }
}

// =============================================================================
// REGISTER DEPENDENCY
// =============================================================================

/// Record a read of `subscribable` in the current frame, if any.
///
/// Called by `Observable::get` and `Computed::get`.
pub fn register_dependency(subscribable: Rc<dyn AnySubscribable>) {
    let frame = with_context(|ctx| ctx.current_frame());
    if let Some(frame) = frame {
        let id = subscribable.dependency_id();
        frame.record(subscribable, id);
    }
}

// =============================================================================
// IGNORE
// =============================================================================

/// Run `f` with dependency detection suppressed.
///
/// # Example
///
/// ```
/// use spark_observables::{computed, ignore, observable};
///
/// let a = observable(1);
/// let b = observable(2);
///
/// let sum = computed({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + ignore(|| b.get())
/// });
/// assert_eq!(sum.dependencies_count(), 1);
/// ```
pub fn ignore<R>(f: impl FnOnce() -> R) -> R {
    let _guard = FrameGuard::begin(None);
    f()
}

// =============================================================================
// COMPUTED CONTEXT
// =============================================================================

/// Information about the computed evaluation currently running.
///
/// Every function returns None outside an evaluation.
pub mod computed_context {
    use std::rc::Rc;

    use crate::core::context::with_context;
    use crate::core::types::AnySubscribable;

    pub fn is_initial() -> Option<bool> {
        with_context(|ctx| ctx.current_frame()).and_then(|f| f.is_initial())
    }

    pub fn dependencies_count() -> Option<usize> {
        with_context(|ctx| ctx.current_frame()).map(|f| f.dependencies_count())
    }

    pub fn dependencies() -> Option<Vec<Rc<dyn AnySubscribable>>> {
        with_context(|ctx| ctx.current_frame()).map(|f| f.dependencies())
    }

    pub fn is_sleeping() -> Option<bool> {
        with_context(|ctx| ctx.current_frame()).map(|f| f.is_sleeping())
    }
}

// =============================================================================
// TESTS
// =============================================================================
