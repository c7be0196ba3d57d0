//! Traits implemented by the embedding profiler.
//!
//! The crate never talks to a runtime directly. Everything it needs from the profiling API is
//! expressed through [`ProfilerHost`], the place a rewritten body goes to is a [`BodySink`], and
//! the decision which methods are instrumented at all is an [`InstrumentationPolicy`].

use crate::{
    profiler::{FunctionId, MethodKey},
    Result,
};

/// Access to the runtime's profiling interface.
///
/// Implementations are called from the threads the runtime delivers callbacks on, so they must
/// be `Send + Sync`. None of the state in this crate is locked while one of these methods runs.
pub trait ProfilerHost: Send + Sync {
    /// Module and token of the method `function` was compiled from.
    ///
    /// # Errors
    /// Returns [`crate::Error::FunctionNotFound`] if the function is unknown.
    fn function_key(&self, function: FunctionId) -> Result<MethodKey>;

    /// The function compiled from `key`.
    ///
    /// # Errors
    /// Returns [`crate::Error::GenericMethod`] if `key` names a generic method. Those have one
    /// function per instantiation and can not be resolved from the definition alone.
    fn function_from_token(&self, key: MethodKey) -> Result<FunctionId>;

    /// The original method body of `key`, starting with its header.
    ///
    /// # Errors
    /// Returns an error if the body can not be read.
    fn il_function_body(&self, key: MethodKey) -> Result<Vec<u8>>;

    /// Ask the runtime to recompile `methods`.
    ///
    /// # Errors
    /// Returns an error if the request is rejected.
    fn request_rejit(&self, methods: &[MethodKey]) -> Result<()>;

    /// Ask the runtime to go back to the original code of `methods`.
    ///
    /// # Errors
    /// Returns an error if the request is rejected.
    fn request_revert(&self, methods: &[MethodKey]) -> Result<()>;
}

/// Receives the body a method is recompiled with.
pub trait BodySink {
    /// Hand `body` to the runtime.
    ///
    /// # Errors
    /// Returns an error if the runtime refuses the body.
    fn set_new_body(&mut self, body: &[u8]) -> Result<()>;
}

impl<F> BodySink for F
where
    F: FnMut(&[u8]) -> Result<()>,
{
    fn set_new_body(&mut self, body: &[u8]) -> Result<()> {
        self(body)
    }
}

/// Decides which methods are instrumented.
pub trait InstrumentationPolicy: Send + Sync {
    /// Returns `true` if `key` should be rewritten.
    fn should_instrument(&self, key: MethodKey) -> bool;
}

impl<F> InstrumentationPolicy for F
where
    F: Fn(MethodKey) -> bool + Send + Sync,
{
    fn should_instrument(&self, key: MethodKey) -> bool {
        self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::Token, profiler::ModuleId};

    #[test]
    fn closures_as_sink_and_policy() {
        let mut received = Vec::new();
        let mut sink = |body: &[u8]| -> Result<()> {
            received.extend_from_slice(body);
            Ok(())
        };
        sink.set_new_body(&[1, 2]).unwrap();
        sink.set_new_body(&[3]).unwrap();
        assert_eq!(received, vec![1, 2, 3]);

        let policy = |key: MethodKey| key.token.row() % 2 == 0;
        assert!(policy.should_instrument(MethodKey::new(ModuleId(1), Token(0x0600_0002))));
        assert!(!policy.should_instrument(MethodKey::new(ModuleId(1), Token(0x0600_0003))));
    }
}
