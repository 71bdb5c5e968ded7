//! Liveness-checked indirection between driver callbacks and the engine.
//!
//! The hardware completion callback fires on an arbitrary thread and can
//! outlive any single call frame, including one where the engine has
//! already begun teardown. The bridge therefore never hands the driver a
//! direct reference to engine state. Instead the driver-side closure holds
//! an `Arc<CallbackBridge<_>>` plus the generation number it was registered
//! under, and resolves both at callback time:
//!
//! - a `Weak` slot that only upgrades while the target is alive, and
//! - a generation counter bumped on every register/revoke, so callbacks
//!   created for an earlier configure cycle are ignored even if a new
//!   target has since been registered.
//!
//! `revoke` is called by `dispose` *before* driver teardown; a callback
//! that raced past the upgrade keeps the target alive only until it
//! returns, which is exactly the no-use-after-free guarantee required.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub struct CallbackBridge<T> {
    slot: Mutex<Weak<T>>,
    generation: AtomicU64,
}

impl<T> CallbackBridge<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Weak::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Point the bridge at `target`, returning the generation token the
    /// driver-side closure must present to resolve it.
    pub fn register(&self, target: &Arc<T>) -> u64 {
        let mut slot = self.slot.lock().unwrap();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *slot = Arc::downgrade(target);
        generation
    }

    /// Clear the slot and invalidate all outstanding generation tokens.
    pub fn revoke(&self) {
        let mut slot = self.slot.lock().unwrap();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = Weak::new();
    }

    /// Run `f` against the target if `generation` is current and the target
    /// is still alive; otherwise a no-op returning `None`.
    ///
    /// The slot lock is dropped before `f` runs, so the target may call
    /// back into the bridge freely.
    pub fn with<R>(&self, generation: u64, f: impl FnOnce(&T) -> R) -> Option<R> {
        let target = {
            let slot = self.slot.lock().unwrap();
            if self.generation.load(Ordering::Acquire) != generation {
                return None;
            }
            slot.upgrade()?
        };
        Some(f(&target))
    }
}

impl<T> Default for CallbackBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_target() {
        let bridge = CallbackBridge::new();
        let target = Arc::new(7u32);
        let generation = bridge.register(&target);
        assert_eq!(bridge.with(generation, |v| *v), Some(7));
    }

    #[test]
    fn revoked_bridge_is_a_noop() {
        let bridge = CallbackBridge::new();
        let target = Arc::new(7u32);
        let generation = bridge.register(&target);
        bridge.revoke();
        assert_eq!(bridge.with(generation, |v| *v), None);
    }

    #[test]
    fn stale_generation_is_a_noop() {
        let bridge = CallbackBridge::new();
        let first = Arc::new(1u32);
        let old = bridge.register(&first);
        let second = Arc::new(2u32);
        let new = bridge.register(&second);
        assert_eq!(bridge.with(old, |v| *v), None);
        assert_eq!(bridge.with(new, |v| *v), Some(2));
    }

    #[test]
    fn dropped_target_is_a_noop() {
        let bridge = CallbackBridge::new();
        let target = Arc::new(7u32);
        let generation = bridge.register(&target);
        drop(target);
        assert_eq!(bridge.with(generation, |v| *v), None);
    }

    #[test]
    fn target_outlives_resolution_until_callback_returns() {
        let bridge = CallbackBridge::new();
        let target = Arc::new(Mutex::new(0u32));
        let generation = bridge.register(&target);
        let alive = bridge.with(generation, |t| {
            *t.lock().unwrap() += 1;
            Arc::strong_count(&target)
        });
        // One owner here, one held by the resolution itself.
        assert_eq!(alive, Some(2));
        assert_eq!(*target.lock().unwrap(), 1);
    }
}
