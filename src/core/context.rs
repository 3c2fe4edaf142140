// ============================================================================
// spark-observables - Reactive Context
// The per-thread runtime: dependency frames, ids, task queue, timers, options
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::ReactiveError;
use crate::reactivity::scheduling::TaskQueue;
use crate::reactivity::timers::TimerQueue;
use crate::reactivity::tracking::DependencyFrame;

use super::types::DependencyId;

/// Callback that receives errors raised while notifications or tasks run.
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

// =============================================================================
// OPTIONS
// =============================================================================

/// Process-wide configuration consumed by the core.
#[derive(Clone, Default)]
pub struct ReactiveOptions {
    /// Apply the `deferred` extender to every observable and computed
    pub defer_updates: bool,

    /// Receives errors that must not abort an in-flight notification
    pub on_error: Option<ErrorHandler>,
}

impl fmt::Debug for ReactiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveOptions")
            .field("defer_updates", &self.defer_updates)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// =============================================================================
// REACTIVE CONTEXT
// =============================================================================

/// All mutable state shared by a reactive graph.
///
/// Each thread has a current context; [`ReactiveContext::enter`] swaps in
/// another one for a scope, which keeps independent graphs (tests, embedded
/// views) from seeing each other's frames, ids or queued tasks.
pub struct ReactiveContext {
    // =========================================================================
    // DEPENDENCY DETECTION
    // =========================================================================
    /// Frame receiving dependency registrations (None = detection suppressed)
    current_frame: RefCell<Option<Rc<dyn DependencyFrame>>>,

    /// Frames saved by `begin`, restored by `end`
    outer_frames: RefCell<Vec<Option<Rc<dyn DependencyFrame>>>>,

    /// Last dependency id handed out (ids start at 1, never reused)
    last_dependency_id: Cell<DependencyId>,

    // =========================================================================
    // SCHEDULING
    // =========================================================================
    tasks: TaskQueue,

    timers: TimerQueue,

    // =========================================================================
    // OPTIONS
    // =========================================================================
    defer_updates: Cell<bool>,

    error_handler: RefCell<Option<ErrorHandler>>,
}

impl ReactiveContext {
    /// Create a context with default options
    pub fn new() -> Self {
        Self::with_options(ReactiveOptions::default())
    }

    pub fn with_options(options: ReactiveOptions) -> Self {
        Self {
            current_frame: RefCell::new(None),
            outer_frames: RefCell::new(Vec::new()),
            last_dependency_id: Cell::new(0),
            tasks: TaskQueue::new(),
            timers: TimerQueue::new(),
            defer_updates: Cell::new(options.defer_updates),
            error_handler: RefCell::new(options.on_error),
        }
    }

    /// Make this context current on this thread until the guard drops.
    pub fn enter(self: Rc<Self>) -> ContextGuard {
        let prev = CONTEXT.with(|c| c.replace(self));
        ContextGuard { prev: Some(prev) }
    }

    // =========================================================================
    // DEPENDENCY DETECTION
    // =========================================================================

    /// Push the current frame and install `frame` (None suppresses detection)
    pub fn begin_frame(&self, frame: Option<Rc<dyn DependencyFrame>>) {
        let prev = self.current_frame.replace(frame);
        self.outer_frames.borrow_mut().push(prev);
    }

    /// Restore the frame saved by the matching `begin_frame`
    pub fn end_frame(&self) {
        let prev = self.outer_frames.borrow_mut().pop().flatten();
        self.current_frame.replace(prev);
    }

    pub fn current_frame(&self) -> Option<Rc<dyn DependencyFrame>> {
        self.current_frame.borrow().clone()
    }

    /// Depth of the frame stack (0 at top level)
    pub fn frame_depth(&self) -> usize {
        self.outer_frames.borrow().len()
    }

    pub fn next_dependency_id(&self) -> DependencyId {
        let id = self.last_dependency_id.get() + 1;
        self.last_dependency_id.set(id);
        id
    }

    // =========================================================================
    // SCHEDULING
    // =========================================================================

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    // =========================================================================
    // OPTIONS
    // =========================================================================

    pub fn defer_updates(&self) -> bool {
        self.defer_updates.get()
    }

    pub fn set_defer_updates(&self, value: bool) {
        self.defer_updates.set(value);
    }

    /// Install the error handler, returning the previous one
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) -> Option<ErrorHandler> {
        self.error_handler.replace(handler)
    }

    /// Hand an error to the configured handler, or log it.
    pub fn report_error(&self, error: ReactiveError) {
        let handler = self.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&error),
            None => tracing::error!(%error, "unhandled reactive error"),
        }
    }
}

impl Default for ReactiveContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the previously current context on drop.
pub struct ContextGuard {
    prev: Option<Rc<ReactiveContext>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            CONTEXT.with(|c| c.replace(prev));
        }
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    /// The context current on this thread
    static CONTEXT: RefCell<Rc<ReactiveContext>> = RefCell::new(Rc::new(ReactiveContext::new()));
}

/// Access the current reactive context.
///
/// The context is cloned out of the thread-local slot before `f` runs, so
/// `f` may freely re-enter `with_context`.
///
/// # Example
///
/// ```ignore
/// with_context(|ctx| ctx.set_defer_updates(true));
/// ```
pub fn with_context<R>(f: impl FnOnce(&ReactiveContext) -> R) -> R {
    let ctx = current_context();
    f(&ctx)
}

/// The context current on this thread.
pub fn current_context() -> Rc<ReactiveContext> {
    CONTEXT.with(|c| c.borrow().clone())
}

/// Report an error to the current context's handler.
pub fn report_error(error: ReactiveError) {
    with_context(|ctx| ctx.report_error(error));
}

/// Check if a dependency-detection frame is active
pub fn is_tracking() -> bool {
    with_context(|ctx| ctx.current_frame().is_some())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_ids_are_monotonic() {
        let ctx = ReactiveContext::new();
        assert_eq!(ctx.next_dependency_id(), 1);
        assert_eq!(ctx.next_dependency_id(), 2);
        assert_eq!(ctx.next_dependency_id(), 3);
    }

    #[test]
    fn frames_nest() {
        let ctx = ReactiveContext::new();
        assert_eq!(ctx.frame_depth(), 0);
        ctx.begin_frame(None);
        ctx.begin_frame(None);
        assert_eq!(ctx.frame_depth(), 2);
        ctx.end_frame();
        ctx.end_frame();
        assert_eq!(ctx.frame_depth(), 0);
        assert!(ctx.current_frame().is_none());
    }

    #[test]
    fn entered_context_is_isolated() {
        let outer_id = with_context(|ctx| ctx.next_dependency_id());
        {
            let _guard = Rc::new(ReactiveContext::new()).enter();
            assert_eq!(with_context(|ctx| ctx.next_dependency_id()), 1);
        }
        assert_eq!(with_context(|ctx| ctx.next_dependency_id()), outer_id + 1);
    }

    #[test]
    fn errors_reach_handler() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let ctx = ReactiveContext::with_options(ReactiveOptions {
            defer_updates: false,
            on_error: Some(Rc::new(move |e: &ReactiveError| {
                seen_clone.borrow_mut().push(e.clone())
            })),
        });

        ctx.report_error(ReactiveError::UnknownExtender("x".into()));
        assert_eq!(
            *seen.borrow(),
            vec![ReactiveError::UnknownExtender("x".into())]
        );
    }

    #[test]
    fn options_debug_hides_handler() {
        let options = ReactiveOptions {
            defer_updates: true,
            on_error: Some(Rc::new(|_: &ReactiveError| {})),
        };
        let text = format!("{options:?}");
        assert!(text.contains("defer_updates: true"));
        assert!(text.contains("on_error: true"));
    }
}
