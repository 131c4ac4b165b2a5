use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod retry;
pub mod time;

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
