// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::num::NonZeroU64;
use std::sync::Arc;

use keel_exec::sync::Mutex;

use crate::ffi::value::FfiValue;

/// Capacity of a registry's callback table.
pub const MAX_CALLBACKS: usize = 64;

/// Handle to a registered callback. Ids are monotonic from 1; zero (the
/// C-side "invalid id") cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(NonZeroU64);

impl CallbackId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

type CallbackFn = Arc<dyn Fn(&[FfiValue]) -> i64 + Send + Sync>;

struct CallbackEntry {
    id: NonZeroU64,
    callback: CallbackFn,
}

struct RegistryInner {
    entries: Vec<Option<CallbackEntry>>,
    next_id: u64,
}

/// Fixed-capacity table of guest callables reachable from native code.
///
/// State a callback needs travels inside its closure; the C-style
/// separate `user_data` pointer has no reason to exist here.
pub struct CallbackRegistry {
    inner: Mutex<RegistryInner>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_CALLBACKS);
        entries.resize_with(MAX_CALLBACKS, || None);

        Self {
            inner: Mutex::new(RegistryInner {
                entries,
                next_id: 1,
            }),
        }
    }

    /// Registers a callable; `None` once all [`MAX_CALLBACKS`] slots are
    /// active.
    pub fn register<F>(&self, callback: F) -> Option<CallbackId>
    where
        F: Fn(&[FfiValue]) -> i64 + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();

        let slot = inner.entries.iter().position(Option::is_none)?;
        let id = NonZeroU64::new(inner.next_id)?;
        inner.next_id += 1;

        inner.entries[slot] = Some(CallbackEntry {
            id,
            callback: Arc::new(callback),
        });
        Some(CallbackId(id))
    }

    /// Deactivates a callback; false for ids that are not active.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.find(id) else {
            return false;
        };

        inner.entries[slot] = None;
        true
    }

    #[must_use]
    pub fn is_registered(&self, id: CallbackId) -> bool {
        self.inner.lock().find(id).is_some()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.is_some())
            .count()
    }

    /// Runs the callback, surfacing "no such callback" as `None`.
    ///
    /// The callable is cloned out of the table before the call so a
    /// callback may itself register or unregister without deadlocking.
    #[must_use]
    pub fn invoke_i64(&self, id: CallbackId, args: &[FfiValue]) -> Option<i64> {
        let callback = {
            let inner = self.inner.lock();
            let slot = inner.find(id)?;
            Arc::clone(&inner.entries[slot].as_ref()?.callback)
        };
        Some(callback(args))
    }
}

impl RegistryInner {
    fn find(&self, id: CallbackId) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry
                .as_ref()
                .is_some_and(|entry| entry.id == id.0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_invoke_unregister() {
        let registry = CallbackRegistry::new();
        let id = registry
            .register(|args| args.first().map_or(0, |value| value.as_i64()) + 1)
            .unwrap();
        assert_eq!(id.as_u64(), 1);

        assert_eq!(registry.invoke_i64(id, &[FfiValue::I64(41)]), Some(42));
        assert!(registry.unregister(id));
        assert_eq!(registry.invoke_i64(id, &[]), None);
        assert!(!registry.unregister(id));
    }

    #[test]
    fn ids_stay_monotonic_across_reuse() {
        let registry = CallbackRegistry::new();
        let first = registry.register(|_| 1).unwrap();
        registry.unregister(first);

        let second = registry.register(|_| 2).unwrap();
        assert_eq!(second.as_u64(), 2);
        assert!(!registry.is_registered(first));
        assert!(registry.is_registered(second));
    }

    #[test]
    fn captured_state_replaces_user_data() {
        let registry = CallbackRegistry::new();
        let offset = 10i64;
        let id = registry
            .register(move |args| args[0].as_i64() + offset)
            .unwrap();

        assert_eq!(registry.invoke_i64(id, &[FfiValue::I64(5)]), Some(15));
    }

    #[test]
    fn table_exhaustion_returns_none() {
        let registry = CallbackRegistry::new();
        for _ in 0..MAX_CALLBACKS {
            assert!(registry.register(|_| 0).is_some());
        }
        assert!(registry.register(|_| 0).is_none());
        assert_eq!(registry.active_count(), MAX_CALLBACKS);
    }
}
