//! Dispatch of the runtime's compilation callbacks.
//!
//! A method is instrumented in two steps. When it is JIT compiled for the first time the
//! [`Instrumentor`] only asks the runtime to recompile it. When the runtime then asks for the
//! ReJIT parameters, the original body is rewritten and handed back through a [`BodySink`].
//! Changing the [`InstrumentationPolicy`] reverts methods that are no longer selected and
//! requests a ReJIT of the ones that are.

use std::sync::{Arc, RwLock};

use rayon::prelude::*;

use crate::{
    metadata::method::{BodyScanner, HeaderInfoProvider},
    profiler::{
        BodySink, FunctionId, GenericMethodResolver, InstrumentationPolicy, MethodBodyCache,
        MethodKey, ProfilerHost,
    },
    rewriter::{BodyRewriter, RewriterConfig},
    Error, Result,
};

/// Outcome of [`Instrumentor::refresh`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Methods reverted to their original code
    pub reverted: usize,
    /// Methods for which a ReJIT was requested
    pub rejitted: usize,
    /// Methods selected by neither policy
    pub unchanged: usize,
}

/// What a policy change means for a single method
enum Change {
    Revert,
    Rejit,
    Keep,
}

/// Ties the rewriter to the compilation callbacks of a profiler.
///
/// # Thread Safety
///
/// All operations take `&self`. Callbacks for different methods may arrive on different threads
/// at the same time.
pub struct Instrumentor<H> {
    host: Arc<H>,
    resolver: GenericMethodResolver<H>,
    cache: MethodBodyCache,
    config: RewriterConfig,
    header_info: Box<dyn HeaderInfoProvider>,
    policy: RwLock<Arc<dyn InstrumentationPolicy>>,
}

impl<H: ProfilerHost> Instrumentor<H> {
    /// Create an instrumentor using the default [`RewriterConfig`] and [`BodyScanner`]
    #[must_use]
    pub fn new(host: Arc<H>, policy: Arc<dyn InstrumentationPolicy>) -> Self {
        Instrumentor {
            resolver: GenericMethodResolver::new(host.clone()),
            host,
            cache: MethodBodyCache::new(),
            config: RewriterConfig::default(),
            header_info: Box::new(BodyScanner),
            policy: RwLock::new(policy),
        }
    }

    /// Use `config` for every rewrite
    #[must_use]
    pub fn with_config(mut self, config: RewriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `provider` to describe bodies before they are rewritten
    #[must_use]
    pub fn with_header_info(mut self, provider: Box<dyn HeaderInfoProvider>) -> Self {
        self.header_info = provider;
        self
    }

    /// The generic method resolver
    pub fn resolver(&self) -> &GenericMethodResolver<H> {
        &self.resolver
    }

    /// The cache of original bodies
    pub fn cache(&self) -> &MethodBodyCache {
        &self.cache
    }

    /// The rewriter configuration
    pub fn config(&self) -> &RewriterConfig {
        &self.config
    }

    /// The current policy
    ///
    /// # Errors
    /// Returns [`Error::LockError`] if the policy lock is poisoned.
    pub fn policy(&self) -> Result<Arc<dyn InstrumentationPolicy>> {
        Ok(try_read_lock!(self.policy)?.clone())
    }

    /// `function` is being JIT compiled.
    ///
    /// Requests a ReJIT when the policy selects the method. Returns `true` in that case.
    ///
    /// # Errors
    /// Returns an error if the host does not know `function` or rejects the request.
    pub fn jit_compilation_started(&self, function: FunctionId) -> Result<bool> {
        let key = self.host.function_key(function)?;
        if !self.policy()?.should_instrument(key) {
            log::trace!("Not instrumenting {}", key);
            return Ok(false);
        }

        self.request_rejit(function, key)?;
        Ok(true)
    }

    /// Ask the runtime to recompile `key`, remembering `function` if `key` is generic.
    ///
    /// # Errors
    /// Returns an error if the host rejects the request.
    pub fn request_rejit(&self, function: FunctionId, key: MethodKey) -> Result<()> {
        log::debug!("Request ReJIT: [{}] {}", function, key);
        self.resolver.record_if_unresolvable(function, key);
        self.host.request_rejit(&[key])
    }

    /// `function` is being recompiled.
    ///
    /// Returns `true` if this triggered another ReJIT of a pending generic method.
    ///
    /// # Errors
    /// See [`GenericMethodResolver::notify_recompiled`].
    pub fn rejit_compilation_started(&self, function: FunctionId) -> Result<bool> {
        self.resolver.notify_recompiled(function)
    }

    /// The runtime asks for the body to recompile `key` with.
    ///
    /// Returns `Ok(true)` if a rewritten body was handed to `sink`, and `Ok(false)` if the method
    /// was skipped because its function is not known yet or its body could not be rewritten.
    ///
    /// # Errors
    /// Returns an error if the original body can not be read or `sink` refuses the new one.
    pub fn rejit_parameters<S>(&self, key: MethodKey, sink: &mut S) -> Result<bool>
    where
        S: BodySink + ?Sized,
    {
        let Some(function) = self.resolver.resolve(key) else {
            log::debug!("Skipping ReJIT of {}, function unknown", key);
            return Ok(false);
        };

        let original = self.cache.get(self.host.as_ref(), key, true)?;
        let info = match self.header_info.header_info(&original) {
            Ok(info) => info,
            Err(error) => {
                log::warn!("Skipping {}: {}", key, error);
                return Ok(false);
            }
        };

        let Some(body) = BodyRewriter::new(&original, &info, &self.config).try_rewrite() else {
            return Ok(false);
        };

        sink.set_new_body(&body)?;
        log::debug!(
            "Instrumented {} ({}): {} -> {} bytes",
            key,
            function,
            original.len(),
            body.len()
        );
        Ok(true)
    }

    /// Replace the policy and bring `loaded` methods in line with it.
    ///
    /// Methods the old policy selected and the new one does not are reverted and their cached
    /// body is dropped. Methods the new policy selects are recompiled. The work runs on a worker
    /// thread and this call returns once it is done.
    ///
    /// # Errors
    /// Returns an error if the host rejects a request, a lock is poisoned or the worker thread
    /// panicked.
    pub fn refresh(
        &self,
        policy: Arc<dyn InstrumentationPolicy>,
        loaded: &[MethodKey],
    ) -> Result<RefreshSummary> {
        let old = std::mem::replace(&mut *try_write_lock!(self.policy)?, policy.clone());
        log::info!("Instrumentation policy changed, checking {} methods", loaded.len());

        std::thread::scope(|scope| {
            scope
                .spawn(|| self.apply_policy_change(old.as_ref(), policy.as_ref(), loaded))
                .join()
                .map_err(|_| Error::Host("instrumentation refresh worker panicked".to_string()))?
        })
    }

    fn apply_policy_change(
        &self,
        old: &dyn InstrumentationPolicy,
        new: &dyn InstrumentationPolicy,
        loaded: &[MethodKey],
    ) -> Result<RefreshSummary> {
        let changes: Vec<(MethodKey, Change)> = loaded
            .par_iter()
            .map(|key| {
                let change = match (old.should_instrument(*key), new.should_instrument(*key)) {
                    (_, true) => Change::Rejit,
                    (true, false) => Change::Revert,
                    (false, false) => Change::Keep,
                };
                (*key, change)
            })
            .collect();

        let mut summary = RefreshSummary::default();
        let mut revert = Vec::new();
        let mut rejit = Vec::new();
        for (key, change) in changes {
            match change {
                Change::Revert => revert.push(key),
                Change::Rejit => rejit.push(key),
                Change::Keep => summary.unchanged += 1,
            }
        }

        if !revert.is_empty() {
            self.host.request_revert(&revert)?;
            for key in &revert {
                self.cache.remove(key)?;
            }
            log::debug!("Reverted {} methods", revert.len());
        }

        if !rejit.is_empty() {
            self.host.request_rejit(&rejit)?;
            log::debug!("Requested ReJIT of {} methods", rejit.len());
        }

        summary.reverted = revert.len();
        summary.rejitted = rejit.len();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::opcodes::*,
        metadata::token::Token,
        profiler::ModuleId,
        test::{tiny_body, MockHost},
    };

    fn key(row: u32) -> MethodKey {
        MethodKey::new(ModuleId(7), Token(0x0600_0000 | row))
    }

    fn even_rows() -> Arc<dyn InstrumentationPolicy> {
        Arc::new(|key: MethodKey| key.token.row() % 2 == 0)
    }

    fn setup() -> (Arc<MockHost>, Instrumentor<MockHost>) {
        let host = Arc::new(MockHost::new());
        let instrumentor = Instrumentor::new(host.clone(), even_rows());
        (host, instrumentor)
    }

    #[test]
    fn jit_requests_rejit_for_selected_methods() {
        let (host, instrumentor) = setup();
        host.add_function(FunctionId(1), key(1));
        host.add_function(FunctionId(2), key(2));

        assert!(!instrumentor.jit_compilation_started(FunctionId(1)).unwrap());
        assert!(instrumentor.jit_compilation_started(FunctionId(2)).unwrap());
        assert_eq!(host.rejits(), vec![key(2)]);
    }

    #[test]
    fn rejit_parameters_sets_rewritten_body() {
        let (host, instrumentor) = setup();
        host.add_function(FunctionId(2), key(2));
        host.set_body(key(2), tiny_body(&[LDARG_0, BRTRUE_S, 0x01, RET, RET]));

        let mut received = Vec::new();
        let mut sink = |body: &[u8]| -> Result<()> {
            received = body.to_vec();
            Ok(())
        };
        assert!(instrumentor.rejit_parameters(key(2), &mut sink).unwrap());
        assert_eq!(&received[12..], &[LDARG_0, BRTRUE_S, 0x02, BR_S, 0x00, NOP]);
        assert!(instrumentor.cache().contains(&key(2)));
    }

    #[test]
    fn rejit_parameters_skips_unrewritable_bodies() {
        let (host, instrumentor) = setup();
        host.add_function(FunctionId(4), key(4));
        // Two returns claimed by the scanner, but the code does not end in ret
        host.set_body(key(4), tiny_body(&[RET, RET, NOP]));

        let mut calls = 0;
        let mut sink = |_: &[u8]| -> Result<()> {
            calls += 1;
            Ok(())
        };
        assert!(!instrumentor.rejit_parameters(key(4), &mut sink).unwrap());
        assert_eq!(calls, 0);
    }

    #[test]
    fn generic_method_round_trip() {
        let (host, instrumentor) = setup();
        host.add_generic(FunctionId(6), key(6));
        host.set_body(key(6), tiny_body(&[LDC_I4_0, RET]));

        let mut sets = 0;
        let mut sink = |_: &[u8]| -> Result<()> {
            sets += 1;
            Ok(())
        };

        // Body requested before any instantiation was seen
        assert!(!instrumentor.rejit_parameters(key(6), &mut sink).unwrap());
        assert!(instrumentor.resolver().is_pending(key(6)));

        // An instantiation recompiles, the ReJIT is requested again
        assert!(instrumentor.rejit_compilation_started(FunctionId(6)).unwrap());
        assert!(instrumentor.rejit_parameters(key(6), &mut sink).unwrap());
        assert_eq!(sets, 1);
        assert_eq!(host.rejits(), vec![key(6)]);
    }

    #[test]
    fn refresh_reverts_and_rejits() {
        let (host, instrumentor) = setup();
        let loaded: Vec<MethodKey> = (1..=6).map(key).collect();

        host.add_function(FunctionId(2), key(2));
        host.set_body(key(2), tiny_body(&[RET]));
        instrumentor.cache().get(host.as_ref(), key(2), true).unwrap();

        // Old: rows 2, 4, 6. New: rows 3 to 6.
        let summary = instrumentor
            .refresh(Arc::new(|key: MethodKey| key.token.row() >= 3), &loaded)
            .unwrap();

        assert_eq!(
            summary,
            RefreshSummary {
                reverted: 1,
                rejitted: 4,
                unchanged: 1,
            }
        );
        assert_eq!(host.reverts(), vec![key(2)]);
        assert_eq!(host.rejits(), vec![key(3), key(4), key(5), key(6)]);
        assert!(!instrumentor.cache().contains(&key(2)));
        assert!(instrumentor.policy().unwrap().should_instrument(key(5)));
    }

    #[test]
    fn poisoned_policy_fails_callbacks() {
        let (host, instrumentor) = setup();
        host.add_function(FunctionId(2), key(2));

        std::thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = instrumentor.policy.write().unwrap();
                panic!("poisoning the policy lock");
            });
            assert!(poisoner.join().is_err());
        });

        assert!(matches!(
            instrumentor.jit_compilation_started(FunctionId(2)),
            Err(Error::LockError)
        ));
        assert!(matches!(
            instrumentor.refresh(even_rows(), &[key(2)]),
            Err(Error::LockError)
        ));
        assert!(host.rejits().is_empty());
        assert!(host.reverts().is_empty());
    }
}
