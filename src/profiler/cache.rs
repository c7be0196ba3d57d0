//! Original method bodies, kept so that every ReJIT rewrites the code the method was loaded with.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    profiler::{MethodKey, ProfilerHost},
    Result,
};

/// Thread-safe map from method to its original body.
///
/// Bodies are shared as `Arc<[u8]>` so a lookup never copies them. The lock is held only for the
/// lookup or the insert, never while the host reads a body.
#[derive(Default)]
pub struct MethodBodyCache {
    bodies: Mutex<HashMap<MethodKey, Arc<[u8]>>>,
}

impl MethodBodyCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The original body of `key`.
    ///
    /// With `use_cache` a cached body is returned when present, and a body read from the host
    /// is stored. Without it the host is always asked and the cache is left alone.
    ///
    /// # Errors
    /// Returns the host's error if the body has to be read and can not be, and
    /// [`crate::Error::LockError`] if the cache lock is poisoned.
    pub fn get<H>(&self, host: &H, key: MethodKey, use_cache: bool) -> Result<Arc<[u8]>>
    where
        H: ProfilerHost + ?Sized,
    {
        if use_cache {
            let cached = try_lock!(self.bodies)?.get(&key).cloned();
            if let Some(body) = cached {
                log::trace!("Using cached body of {}", key);
                return Ok(body);
            }
        }

        let body: Arc<[u8]> = Arc::from(host.il_function_body(key)?);
        if !use_cache {
            return Ok(body);
        }

        // Another thread may have stored the body meanwhile, the first one wins
        let stored = try_lock!(self.bodies)?.entry(key).or_insert(body).clone();
        Ok(stored)
    }

    /// Evict `key`. Returns `true` if a body was cached.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the cache lock is poisoned.
    pub fn remove(&self, key: &MethodKey) -> Result<bool> {
        Ok(try_lock!(self.bodies)?.remove(key).is_some())
    }

    /// Returns `true` if a body is cached for `key`
    pub fn contains(&self, key: &MethodKey) -> bool {
        lock!(self.bodies).contains_key(key)
    }

    /// Number of cached bodies
    pub fn len(&self) -> usize {
        lock!(self.bodies).len()
    }

    /// Returns `true` if nothing is cached
    pub fn is_empty(&self) -> bool {
        lock!(self.bodies).is_empty()
    }
}
