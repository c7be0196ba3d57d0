//! Profiler integration.
//!
//! The rewriter works on a single body. Getting that body from the runtime and back, and doing so
//! for the right methods at the right time, needs some state that outlives a single callback:
//!
//! - [`GenericMethodResolver`] - remembers which function a generic method definition stands for
//! - [`MethodBodyCache`] - original bodies, so a method is always rewritten from its source
//! - [`Instrumentor`] - dispatches the JIT and ReJIT callbacks and applies policy changes
//!
//! The runtime itself is reached through the traits in this module, implemented by the embedding
//! profiler: [`ProfilerHost`], [`BodySink`] and [`InstrumentationPolicy`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cilwrap::{
//!     metadata::token::Token,
//!     profiler::{FunctionId, Instrumentor, MethodKey, ModuleId, ProfilerHost},
//!     Error, Result,
//! };
//!
//! struct Host;
//!
//! const KEY: MethodKey = MethodKey { module: ModuleId(1), token: Token(0x0600_0001) };
//!
//! impl ProfilerHost for Host {
//!     fn function_key(&self, _: FunctionId) -> Result<MethodKey> { Ok(KEY) }
//!     fn function_from_token(&self, _: MethodKey) -> Result<FunctionId> { Ok(FunctionId(1)) }
//!     fn il_function_body(&self, _: MethodKey) -> Result<Vec<u8>> {
//!         // tiny header; ldarg.0, brfalse.s +1, ret, ret
//!         Ok(vec![0x16, 0x02, 0x2C, 0x01, 0x2A, 0x2A])
//!     }
//!     fn request_rejit(&self, _: &[MethodKey]) -> Result<()> { Ok(()) }
//!     fn request_revert(&self, _: &[MethodKey]) -> Result<()> { Ok(()) }
//! }
//!
//! let instrumentor = Instrumentor::new(Arc::new(Host), Arc::new(|_: MethodKey| true));
//! assert!(instrumentor.jit_compilation_started(FunctionId(1))?);
//!
//! let mut body = Vec::new();
//! let mut sink = |new_body: &[u8]| -> Result<()> {
//!     body = new_body.to_vec();
//!     Ok(())
//! };
//! assert!(instrumentor.rejit_parameters(KEY, &mut sink)?);
//! assert_eq!(body.len(), 12 + 6);
//! # Ok::<(), Error>(())
//! ```

mod cache;
mod host;
mod ids;
mod instrumentor;
mod resolver;

pub use cache::MethodBodyCache;
pub use host::{BodySink, InstrumentationPolicy, ProfilerHost};
pub use ids::{FunctionId, MethodKey, ModuleId};
pub use instrumentor::{Instrumentor, RefreshSummary};
pub use resolver::GenericMethodResolver;
