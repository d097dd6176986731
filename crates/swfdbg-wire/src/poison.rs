use std::panic::Location;
use std::sync::{Mutex, MutexGuard};

/// Locking that survives a listener or responder panicking mid-update.
///
/// The guarded data here is counters, buffers and listener tables, all of
/// which stay usable after a half-finished update, so a poisoned lock is
/// logged and entered anyway.
pub(crate) trait RecoverLock<T> {
    fn lock_or_recover(&self, context: &'static str) -> MutexGuard<'_, T>;
}

impl<T> RecoverLock<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self, context: &'static str) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            let caller = Location::caller();
            tracing::error!(
                target: "swfdbg.wire",
                context,
                at = %caller,
                "lock poisoned by an earlier panic; recovering"
            );
            poisoned.into_inner()
        })
    }
}
