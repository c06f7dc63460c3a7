//! Routing table from transport handles to the tasks that own them.
//!
//! The registry has no lock of its own: it lives inside the client's lock
//! next to the client middleware list. Missing entries are normal. A
//! callback can arrive after its task already unregistered.

use crate::transport::TransportHandle;
use std::collections::HashMap;

/// Maps each live transport handle to its owner.
#[derive(Debug)]
pub(crate) struct TaskRegistry<T> {
    entries: HashMap<TransportHandle, T>,
}

impl<T: Clone> TaskRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Route `handle` to `owner`. Returns the owner previously registered
    /// for the handle, which signals a transport reusing a live handle.
    pub(crate) fn register(&mut self, handle: TransportHandle, owner: T) -> Option<T> {
        self.entries.insert(handle, owner)
    }

    /// Drop the route for `handle` if `is_owner` accepts the current entry.
    pub(crate) fn unregister(
        &mut self,
        handle: TransportHandle,
        is_owner: impl FnOnce(&T) -> bool,
    ) -> Option<T> {
        if self.entries.get(&handle).is_some_and(is_owner) {
            self.entries.remove(&handle)
        } else {
            None
        }
    }

    pub(crate) fn lookup(&self, handle: TransportHandle) -> Option<T> {
        self.entries.get(&handle).cloned()
    }

    /// Move `owner` from `old` to `new` in one step.
    pub(crate) fn transfer(
        &mut self,
        old: TransportHandle,
        new: TransportHandle,
        owner: T,
        is_owner: impl FnOnce(&T) -> bool,
    ) {
        self.unregister(old, is_owner);
        self.entries.insert(new, owner);
    }

    pub(crate) fn owners(&self) -> Vec<T> {
        self.entries.values().cloned().collect()
    }

    /// Remove every route, returning the owners.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.entries.drain().map(|(_, owner)| owner).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
