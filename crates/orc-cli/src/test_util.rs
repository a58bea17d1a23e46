//! Test-only helpers shared across this crate's unit tests.

use std::sync::Mutex;

/// Serializes tests that mutate process-wide environment variables.
pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
