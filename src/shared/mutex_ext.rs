//! Usage: Mutex extension that recovers from poisoning instead of panicking.

use std::sync::{Mutex, MutexGuard};

pub(crate) trait MutexExt<T> {
    /// Locks the mutex; if a holder panicked, recovers the inner value and
    /// logs where the poisoned lock was taken.
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    mutex_type = std::any::type_name::<T>(),
                    file = loc.file(),
                    line = loc.line(),
                    column = loc.column(),
                    "mutex poisoned by a panicked holder; recovering inner value"
                );
                poisoned.into_inner()
            }
        }
    }
}
