use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a layer's state, recovering the guard if a previous holder panicked.
///
/// Layer state is only mutated by short, non-panicking critical sections,
/// so the data behind a poisoned lock is still consistent.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
