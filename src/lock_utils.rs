//! Lock Poisoning Recovery
//!
//! The key registry, the NSEC3 salt map and the syncer's peer status table are
//! guarded by `std::sync` locks so that the query path can read them without
//! an async runtime. A panic while one of those locks is held must not take
//! the signing path down with it: the helpers here log the poisoning at ERROR
//! level and hand back the inner guard.
//!
//! Every writer in this crate replaces whole values (a full `KeyPair`, a full
//! salt string, a full peer status entry), so a recovered guard never exposes
//! a half-written entry.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

/// Acquire a Mutex, recovering from poisoning.
///
/// `what` names the protected state in the log line.
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        error!("Mutex poisoned for '{}' - recovering last written state", what);
        poisoned.into_inner()
    })
}

/// Acquire a shared read guard, recovering from poisoning.
pub fn read_lock_or_recover<'a, T>(rwlock: &'a RwLock<T>, what: &str) -> RwLockReadGuard<'a, T> {
    rwlock.read().unwrap_or_else(|poisoned| {
        error!("RwLock (read) poisoned for '{}' - recovering last written state", what);
        poisoned.into_inner()
    })
}

/// Acquire the exclusive write guard, recovering from poisoning.
pub fn write_lock_or_recover<'a, T>(
    rwlock: &'a RwLock<T>,
    what: &str,
) -> RwLockWriteGuard<'a, T> {
    rwlock.write().unwrap_or_else(|poisoned| {
        error!("RwLock (write) poisoned for '{}' - recovering last written state", what);
        poisoned.into_inner()
    })
}
