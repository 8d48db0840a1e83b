#[cfg(feature = "loom")]
pub(crate) use loom::sync;

#[cfg(not(feature = "loom"))]
pub(crate) use std::sync;

/// Read-locks `lock`, recovering the guard if another thread panicked while holding it. Every
/// mutation of the guarded ring completes before its guard is released, so a poisoned lock still
/// protects a consistent ring.
pub(crate) fn read<T>(lock: &sync::RwLock<T>) -> sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Write-locks `lock`, recovering the guard on poisoning. See [`read`].
pub(crate) fn write<T>(lock: &sync::RwLock<T>) -> sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}
