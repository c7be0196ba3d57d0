//! Tracking of generic methods between compilation and recompilation.
//!
//! A ReJIT request names a method by module and token, and so does the callback that asks for
//! the new body. For ordinary methods the host maps that back to the compiled function. Generic
//! methods have one function per instantiation and the host refuses to pick one, so the function
//! seen when the ReJIT was requested is remembered here and handed out once when the body is
//! requested.
//!
//! When the body request arrives before a function was recorded, the method is parked as pending.
//! The next time one of its instantiations starts recompiling, the mapping is recorded and the
//! ReJIT is requested again.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use crate::{
    profiler::{FunctionId, MethodKey, ProfilerHost},
    Error, Result,
};

/// Maps method definitions of generic methods to the function they were last seen as.
///
/// The mapping and the pending set each have their own lock. Neither is held while the host is
/// called.
pub struct GenericMethodResolver<H> {
    host: Arc<H>,
    generics: Mutex<HashMap<MethodKey, FunctionId>>,
    pending: Mutex<HashSet<MethodKey>>,
}

impl<H: ProfilerHost> GenericMethodResolver<H> {
    /// Create an empty resolver
    #[must_use]
    pub fn new(host: Arc<H>) -> Self {
        GenericMethodResolver {
            host,
            generics: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Remember `function` for `key` if the host can not resolve `key` on its own.
    ///
    /// Returns `true` if a mapping was recorded.
    pub fn record_if_unresolvable(&self, function: FunctionId, key: MethodKey) -> bool {
        match self.host.function_from_token(key) {
            Err(Error::GenericMethod(_)) => match try_lock!(self.generics) {
                Ok(mut generics) => {
                    log::debug!("Recording generic method {} as {}", key, function);
                    generics.insert(key, function);
                    true
                }
                Err(error) => {
                    log::error!("Unable to record generic method {}: {}", key, error);
                    false
                }
            },
            _ => false,
        }
    }

    /// The function to use for `key`.
    ///
    /// Generic methods resolve to the recorded function, which is consumed by the lookup. Without
    /// a recorded function the method becomes pending and `None` is returned.
    pub fn resolve(&self, key: MethodKey) -> Option<FunctionId> {
        match self.host.function_from_token(key) {
            Ok(function) => Some(function),
            Err(Error::GenericMethod(_)) => match self.take_recorded(key) {
                Ok(recorded) => recorded,
                Err(error) => {
                    log::error!("Unable to resolve generic method {}: {}", key, error);
                    None
                }
            },
            Err(error) => {
                log::warn!("Unable to resolve {}: {}", key, error);
                None
            }
        }
    }

    fn take_recorded(&self, key: MethodKey) -> Result<Option<FunctionId>> {
        let recorded = try_lock!(self.generics)?.remove(&key);
        if recorded.is_none() {
            log::debug!("No function recorded for generic method {}, pending", key);
            try_lock!(self.pending)?.insert(key);
        }
        Ok(recorded)
    }

    /// Called when `function` starts recompiling.
    ///
    /// If its method is pending, the mapping is recorded and another ReJIT is requested. Returns
    /// `true` in that case.
    ///
    /// # Errors
    /// Returns an error if the host does not know `function` or rejects the ReJIT request, and
    /// [`Error::LockError`] if a lock is poisoned.
    pub fn notify_recompiled(&self, function: FunctionId) -> Result<bool> {
        let key = self.host.function_key(function)?;
        if !try_lock!(self.pending)?.remove(&key) {
            return Ok(false);
        }

        try_lock!(self.generics)?.insert(key, function);
        log::debug!("Requesting ReJIT of pending generic method {} as {}", key, function);
        self.host.request_rejit(&[key])?;
        Ok(true)
    }

    /// Returns `true` if `key` waits for one of its instantiations to recompile.
    pub fn is_pending(&self, key: MethodKey) -> bool {
        lock!(self.pending).contains(&key)
    }

    /// Number of recorded, not yet consumed mappings
    pub fn recorded_count(&self) -> usize {
        lock!(self.generics).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::Token, profiler::ModuleId, test::MockHost};

    fn key(row: u32) -> MethodKey {
        MethodKey::new(ModuleId(1), Token(0x0600_0000 | row))
    }

    #[test]
    fn plain_methods_resolve_directly() {
        let host = Arc::new(MockHost::new());
        host.add_function(FunctionId(10), key(1));
        let resolver = GenericMethodResolver::new(host);

        assert!(!resolver.record_if_unresolvable(FunctionId(10), key(1)));
        assert_eq!(resolver.resolve(key(1)), Some(FunctionId(10)));
        assert_eq!(resolver.resolve(key(1)), Some(FunctionId(10)));
        assert_eq!(resolver.recorded_count(), 0);
    }

    #[test]
    fn recorded_generic_is_consumed_once() {
        let host = Arc::new(MockHost::new());
        host.add_generic(FunctionId(20), key(2));
        let resolver = GenericMethodResolver::new(host);

        assert!(resolver.record_if_unresolvable(FunctionId(20), key(2)));
        assert_eq!(resolver.resolve(key(2)), Some(FunctionId(20)));
        assert_eq!(resolver.resolve(key(2)), None);
        assert!(resolver.is_pending(key(2)));
    }

    #[test]
    fn pending_generic_requests_rejit_on_recompile() {
        let host = Arc::new(MockHost::new());
        host.add_generic(FunctionId(30), key(3));
        let resolver = GenericMethodResolver::new(host.clone());

        assert_eq!(resolver.resolve(key(3)), None);
        assert!(resolver.is_pending(key(3)));

        assert!(resolver.notify_recompiled(FunctionId(30)).unwrap());
        assert!(!resolver.is_pending(key(3)));
        assert_eq!(host.rejits(), vec![key(3)]);

        // Not pending any more
        assert!(!resolver.notify_recompiled(FunctionId(30)).unwrap());
        assert_eq!(host.rejits().len(), 1);

        assert_eq!(resolver.resolve(key(3)), Some(FunctionId(30)));
    }

    #[test]
    fn unknown_functions() {
        let host = Arc::new(MockHost::new());
        let resolver = GenericMethodResolver::new(host);

        assert_eq!(resolver.resolve(key(4)), None);
        assert!(!resolver.is_pending(key(4)));
        assert!(matches!(
            resolver.notify_recompiled(FunctionId(40)),
            Err(Error::FunctionNotFound(FunctionId(40)))
        ));
    }

    #[test]
    fn poisoned_lock_fails_cleanly() {
        let host = Arc::new(MockHost::new());
        host.add_generic(FunctionId(50), key(5));
        let resolver = GenericMethodResolver::new(host.clone());

        std::thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = resolver.pending.lock().unwrap();
                panic!("poisoning the pending lock");
            });
            assert!(poisoner.join().is_err());
        });

        assert_eq!(resolver.resolve(key(5)), None);
        assert!(matches!(
            resolver.notify_recompiled(FunctionId(50)),
            Err(Error::LockError)
        ));
        assert!(host.rejits().is_empty());
    }
}
