//! Bounded in-memory histories shared between collectors and the consumer

/// Fixed-capacity per-metric ring buffers
pub mod sample_store;

/// Counter to per-interval delta conversion
pub mod normalizer;

/// Newest-first bounded record queue
pub mod bounded_queue;

pub use bounded_queue::BoundedQueue;
pub use normalizer::{percent_or_full, CounterNormalizer, Delta};
pub use sample_store::{Sample, SampleStore};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a producer thread panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
