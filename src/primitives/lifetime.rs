// ============================================================================
// spark-observables - Lifetime
//
// A handle for "the resource this computed belongs to". Ending the lifetime
// disposes every computed bound to it with `dispose_with`.
// ============================================================================
//
// A view layer creates one Lifetime per rendered node (or component), binds
// the computeds that update that node to it, and ends it when the node is
// removed. Lifetimes nest: ending a parent ends its children first.
//
// Computeds bound to a lifetime also check `is_alive()` before each
// evaluation. That check is ignored until the lifetime has been seen alive
// once, so a computed may be built before its node is attached.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Identifies a callback registered with [`Lifetime::on_end`]
pub type EndCallbackId = u64;

type EndCallback = Box<dyn FnOnce()>;

// =============================================================================
// LIFETIME INNER
// =============================================================================

struct LifetimeInner {
    alive: Cell<bool>,
    callbacks: RefCell<Vec<(EndCallbackId, EndCallback)>>,
    next_callback: Cell<EndCallbackId>,
    children: RefCell<Vec<Rc<LifetimeInner>>>,
    parent: RefCell<Option<Weak<LifetimeInner>>>,
}

impl LifetimeInner {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            alive: Cell::new(true),
            callbacks: RefCell::new(Vec::new()),
            next_callback: Cell::new(1),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(None),
        })
    }

    fn end(self: &Rc<Self>) {
        if !self.alive.replace(false) {
            return;
        }

        // Children first, then our own callbacks in registration order
        let children: Vec<_> = self.children.borrow_mut().drain(..).collect();
        for child in children {
            child.end();
        }

        let callbacks: Vec<_> = self.callbacks.borrow_mut().drain(..).collect();
        tracing::trace!(callbacks = callbacks.len(), "lifetime ended");
        for (_, callback) in callbacks {
            callback();
        }

        let parent = self.parent.borrow_mut().take();
        if let Some(parent) = parent.and_then(|p| p.upgrade()) {
            parent.children.borrow_mut().retain(|c| !Rc::ptr_eq(c, self));
        }
    }
}

// =============================================================================
// LIFETIME (public handle)
// =============================================================================

/// Resource lifetime that disposes bound computeds when it ends.
///
/// # Example
///
/// ```
/// use spark_observables::{observable, ComputedBuilder, Lifetime};
///
/// let node = Lifetime::new();
/// let text = observable("hi");
///
/// let binding = ComputedBuilder::new({
///     let text = text.clone();
///     move || text.get().len()
/// })
/// .dispose_with(&node)
/// .build();
///
/// assert!(binding.is_active());
/// node.end();
/// assert!(binding.is_disposed());
/// ```
#[derive(Clone)]
pub struct Lifetime {
    inner: Rc<LifetimeInner>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self {
            inner: LifetimeInner::new(),
        }
    }

    /// A lifetime that ends no later than this one.
    ///
    /// A child of an ended lifetime starts out ended.
    pub fn child(&self) -> Lifetime {
        let child = LifetimeInner::new();
        if self.inner.alive.get() {
            *child.parent.borrow_mut() = Some(Rc::downgrade(&self.inner));
            self.inner.children.borrow_mut().push(child.clone());
        } else {
            child.alive.set(false);
        }
        Lifetime { inner: child }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.get()
    }

    /// End the lifetime, running end callbacks. Idempotent.
    pub fn end(&self) {
        self.inner.end();
    }

    /// Run `callback` when the lifetime ends.
    ///
    /// On an already ended lifetime the callback runs immediately.
    pub fn on_end(&self, callback: impl FnOnce() + 'static) -> EndCallbackId {
        let id = self.inner.next_callback.get();
        self.inner.next_callback.set(id + 1);
        if !self.inner.alive.get() {
            callback();
            return id;
        }
        self.inner
            .callbacks
            .borrow_mut()
            .push((id, Box::new(callback)));
        id
    }

    /// Forget a callback registered with `on_end`.
    pub fn remove_callback(&self, id: EndCallbackId) {
        self.inner
            .callbacks
            .borrow_mut()
            .retain(|(cb_id, _)| *cb_id != id);
    }

    pub fn callbacks_count(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("alive", &self.is_alive())
            .field("callbacks", &self.callbacks_count())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
