// ============================================================================
// spark-observables - Task Scheduling
// Queue of deferred tasks flushed by a pluggable scheduler
// ============================================================================
//
// Deferred notifications are queued here. The first task pushed onto an
// empty queue asks the installed TaskScheduler for a flush; the scheduler
// decides when that happens (next frame, next loop turn, or - with the
// default ManualScheduler - when the host calls `flush_tasks()`).
//
// Handles are sequential, so a handle maps back to its queue index without a
// lookup table. Tasks queued while the queue is processing run in the same
// flush; each such wave is a "task group", and too many groups in one flush
// is treated as runaway recursion.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::core::constants::MAX_TASK_GROUPS;
use crate::core::context::current_context;
use crate::error::{panic_message, ReactiveError};

/// A queued unit of work
pub type Task = Box<dyn FnOnce()>;

/// Callback handed to a scheduler; running it processes the queue
pub type FlushFn = Box<dyn FnOnce()>;

/// Identifies a scheduled task for cancellation
pub type TaskHandle = u64;

// =============================================================================
// SCHEDULER
// =============================================================================

/// Decides when queued tasks are processed.
///
/// Must eventually call `flush` exactly once.
pub trait TaskScheduler {
    fn request_flush(&self, flush: FlushFn);
}

/// Holds the flush request until the host runs it.
#[derive(Default)]
pub struct ManualScheduler {
    pending: RefCell<Option<FlushFn>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the pending flush, if any. Returns whether one ran.
    pub fn run_pending(&self) -> bool {
        let flush = self.pending.borrow_mut().take();
        match flush {
            Some(flush) => {
                flush();
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }
}

impl TaskScheduler for ManualScheduler {
    fn request_flush(&self, flush: FlushFn) {
        *self.pending.borrow_mut() = Some(flush);
    }
}

// =============================================================================
// TASK QUEUE
// =============================================================================

pub struct TaskQueue {
    /// Cancelled and already-run slots are None
    queue: RefCell<Vec<Option<Task>>>,

    /// Next queue index to run; survives re-entrant processing
    next_index: Cell<usize>,

    /// Handle the next pushed task receives
    next_handle: Cell<TaskHandle>,

    scheduler: RefCell<Rc<dyn TaskScheduler>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(Vec::new()),
            next_index: Cell::new(0),
            next_handle: Cell::new(1),
            scheduler: RefCell::new(Rc::new(ManualScheduler::new())),
        }
    }

    /// Replace the scheduler, returning the previous one
    pub fn set_scheduler(&self, scheduler: Rc<dyn TaskScheduler>) -> Rc<dyn TaskScheduler> {
        self.scheduler.replace(scheduler)
    }

    pub fn scheduler(&self) -> Rc<dyn TaskScheduler> {
        self.scheduler.borrow().clone()
    }

    /// Append a task. Returns its handle and whether the queue was empty.
    pub fn push(&self, task: Task) -> (TaskHandle, bool) {
        let was_empty = {
            let mut queue = self.queue.borrow_mut();
            let was_empty = queue.is_empty();
            queue.push(Some(task));
            was_empty
        };
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        (handle, was_empty)
    }

    /// Drop a queued task. Unknown, finished or cancelled handles are ignored.
    pub fn cancel(&self, handle: TaskHandle) {
        let mut queue = self.queue.borrow_mut();
        let len = queue.len() as u64;
        let first_handle = self.next_handle.get() - len;
        if handle < first_handle {
            return;
        }
        let index = (handle - first_handle) as usize;
        if index >= self.next_index.get() && index < queue.len() {
            queue[index] = None;
        }
    }

    /// Tasks queued but not yet run or cancelled
    pub fn pending_count(&self) -> usize {
        let queue = self.queue.borrow();
        queue[self.next_index.get().min(queue.len())..]
            .iter()
            .filter(|t| t.is_some())
            .count()
    }

    /// Run queued tasks without resetting the queue.
    ///
    /// Safe to call from inside a running task.
    pub fn process(&self) {
        let mut mark = self.queue.borrow().len();
        let mut count_marks = 0;

        loop {
            let index = self.next_index.get();
            let len = self.queue.borrow().len();
            if index >= len {
                break;
            }
            self.next_index.set(index + 1);

            let task = self.queue.borrow_mut()[index].take();
            let Some(task) = task else {
                continue;
            };

            if index + 1 > mark {
                count_marks += 1;
                if count_marks >= MAX_TASK_GROUPS {
                    // Any of the remaining tasks could be feeding the recursion
                    self.next_index.set(len);
                    tracing::warn!(groups = count_marks, "task queue recursion limit hit");
                    current_context().report_error(ReactiveError::TooMuchRecursion(count_marks));
                    break;
                }
                mark = len;
            }

            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                current_context()
                    .report_error(ReactiveError::TaskPanicked(panic_message(&*payload)));
            }
        }
    }

    /// Process everything, then reset the queue for the next round.
    pub fn scheduled_process(&self) {
        let queued = self.queue.borrow().len();
        if queued > 0 {
            tracing::debug!(queued, "flushing task queue");
        }
        self.process();
        self.queue.borrow_mut().clear();
        self.next_index.set(0);
    }

    /// Drop everything queued. Returns how many tasks were discarded.
    pub fn reset(&self) -> usize {
        let mut queue = self.queue.borrow_mut();
        let discarded = queue.len().saturating_sub(self.next_index.get());
        queue.clear();
        self.next_index.set(0);
        discarded
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Queue `task` on the current context.
///
/// # Example
///
/// ```
/// use spark_observables::{flush_tasks, schedule};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let ran = Rc::new(Cell::new(false));
/// let ran_clone = ran.clone();
/// schedule(move || ran_clone.set(true));
///
/// assert!(!ran.get());
/// flush_tasks();
/// assert!(ran.get());
/// ```
pub fn schedule(task: impl FnOnce() + 'static) -> TaskHandle {
    let ctx = current_context();
    let (handle, was_empty) = ctx.tasks().push(Box::new(task));
    if was_empty {
        let weak = Rc::downgrade(&ctx);
        let scheduler = ctx.tasks().scheduler();
        scheduler.request_flush(Box::new(move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.tasks().scheduled_process();
            }
        }));
    }
    handle
}

/// Cancel a scheduled task (no-op if it already ran).
pub fn cancel(handle: TaskHandle) {
    current_context().tasks().cancel(handle);
}

/// Process all queued tasks now and reset the queue.
pub fn flush_tasks() {
    current_context().tasks().scheduled_process();
}

/// Process queued tasks now, from inside or outside a running task.
pub fn run_early() {
    current_context().tasks().process();
}

/// Install a scheduler on the current context.
pub fn set_scheduler(scheduler: Rc<dyn TaskScheduler>) -> Rc<dyn TaskScheduler> {
    current_context().tasks().set_scheduler(scheduler)
}

// =============================================================================
// TESTS
// =============================================================================
