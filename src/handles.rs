//! Opaque integer handles for objects that live on the native side of the bridge.
//!
//! Foreign callers never see a Rust pointer. Each live object is registered in
//! a [`HandleTable`] under a non-zero `u64`, and every lookup goes through the
//! table:
//! - Use-after-free and double-free surface as lookup misses (`None`)
//! - Handle values come from one process-wide counter, so they are never
//!   reused within a run and never collide across tables
//!
//! The table lock covers only map mutation and lookup. Values are stored as
//! `Arc<T>`, so a removed value is dropped by the caller after the lock is
//! released and teardown of one entry never blocks lookups of others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque handle value. `0` is reserved and never issued.
pub type Handle = u64;

/// Reserved invalid handle.
pub const NULL_HANDLE: Handle = 0;

/// Process-wide handle source shared by every table.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> Handle {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Thread-safe registry mapping handles to shared objects.
pub struct HandleTable<T> {
    name: &'static str,
    entries: Mutex<HashMap<Handle, Arc<T>>>,
}

impl<T> HandleTable<T> {
    /// Create an empty table. `name` labels log events.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register `value` and return its fresh handle.
    pub fn add(&self, value: T) -> Handle {
        self.add_shared(Arc::new(value))
    }

    /// Register an already shared value.
    pub fn add_shared(&self, value: Arc<T>) -> Handle {
        let handle = next_handle();
        self.lock().insert(handle, value);
        tracing::trace!(table = self.name, handle, "handle registered");
        handle
    }

    /// Borrow the object behind `handle`.
    pub fn get(&self, handle: Handle) -> Option<Arc<T>> {
        if handle == NULL_HANDLE {
            return None;
        }
        self.lock().get(&handle).cloned()
    }

    /// Whether `handle` is currently registered.
    pub fn contains(&self, handle: Handle) -> bool {
        handle != NULL_HANDLE && self.lock().contains_key(&handle)
    }

    /// Unregister `handle`, transferring ownership to the caller for disposal.
    ///
    /// Returns `None` for unknown or already-removed handles.
    pub fn remove(&self, handle: Handle) -> Option<Arc<T>> {
        if handle == NULL_HANDLE {
            return None;
        }
        let removed = self.lock().remove(&handle);
        if removed.is_some() {
            tracing::trace!(table = self.name, handle, "handle removed");
        }
        removed
    }

    /// Unregister every handle, returning the values for disposal.
    pub fn drain(&self) -> Vec<(Handle, Arc<T>)> {
        self.lock().drain().collect()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Handle, Arc<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("name", &self.name)
            .field("live", &self.len())
            .finish()
    }
}
