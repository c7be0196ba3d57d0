#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut data = lock!(my_mutex);
///  data.insert(key, value);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Like `lock!`, but a poisoned lock yields `Error::LockError`
///
/// ```rust, ignore
///  let body = try_lock!(self.bodies)?.get(&key).cloned();
/// ```
macro_rules! try_lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)
    };
}

/// Acquire a read lock, a poisoned lock yields `Error::LockError`
///
/// ```rust, ignore
///  let policy = try_read_lock!(self.policy)?.clone();
/// ```
macro_rules! try_read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().map_err(|_| crate::Error::LockError)
    };
}

/// Acquire a write lock, a poisoned lock yields `Error::LockError`
///
/// ```rust, ignore
///  *try_write_lock!(self.policy)? = new_policy;
/// ```
macro_rules! try_write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().map_err(|_| crate::Error::LockError)
    };
}
