//! Multi-subscriber callback registry.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback; call [`detach`](Self::detach)
/// to keep it registered for the lifetime of the publisher.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Keep the callback registered without holding on to the handle.
    pub fn detach(mut self) {
        self.unregister_fn = None;
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("id", &self.id)
            .field("registered", &self.unregister_fn.is_some())
            .finish()
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registered callbacks for one kind of event.
///
/// Callbacks run on the publishing thread, in registration order, outside
/// the registry lock, so a callback may register or unregister others.
pub struct Subscribers<T> {
    next_id: AtomicU64,
    callbacks: Arc<RwLock<Vec<(u64, Callback<T>)>>>,
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subscribers<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a callback.
    pub fn subscribe<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let callback: Callback<T> = Arc::new(callback);
        self.callbacks.write().push((id, callback));

        let callbacks = Arc::downgrade(&self.callbacks);
        CallbackHandle::new(id, move || {
            if let Some(callbacks) = callbacks.upgrade() {
                callbacks.write().retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Invoke every registered callback with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in snapshot {
            callback(value);
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Check if no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}
