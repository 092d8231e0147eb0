//! Listener registration slots

use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the currently registered listener, if any.
///
/// Replacing the listener is a single store; readers always get either a
/// fully constructed listener or nothing.
pub struct ListenerSlot<L: ?Sized> {
    current: RwLock<Option<Arc<L>>>,
}

impl<L: ?Sized> ListenerSlot<L> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Install `listener`, returning the one it replaced.
    pub fn register(&self, listener: Arc<L>) -> Option<Arc<L>> {
        self.current.write().replace(listener)
    }

    pub fn clear(&self) -> Option<Arc<L>> {
        self.current.write().take()
    }

    pub fn get(&self) -> Option<Arc<L>> {
        self.current.read().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.current.read().is_some()
    }
}

impl<L: ?Sized> Default for ListenerSlot<L> {
    fn default() -> Self {
        Self::new()
    }
}
