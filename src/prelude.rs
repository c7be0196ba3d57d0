//! # cilwrap Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilwrap library. Import this module to get quick access to the essential
//! types for rewriting method bodies and wiring the rewriter into a profiler.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilwrap operations
pub use crate::Error;

/// The result type used throughout cilwrap
pub use crate::Result;

/// Low-level parsing utilities
pub use crate::io::Parser;

// ================================================================================================
// Rewriting
// ================================================================================================

/// The single-exit rewriter and its configuration
pub use crate::rewriter::{BodyRewriter, RewriterConfig};

/// Method body structures and header summaries
pub use crate::metadata::method::{
    BodyScanner, ExceptionHandler, ExceptionHandlerFlags, HeaderInfo, HeaderInfoProvider,
    MethodBody, MethodBodyFlags,
};

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

// ================================================================================================
// Disassembly
// ================================================================================================

/// Instruction decoding and the instruction arena
pub use crate::disassembler::{
    decode_code, decode_instruction, FlowType, Instruction, InstructionId, InstructionMap, OpCode,
    Operation,
};

// ================================================================================================
// Profiler Integration
// ================================================================================================

/// Identifiers handed out by the runtime
pub use crate::profiler::{FunctionId, MethodKey, ModuleId};

/// Traits implemented by the embedding profiler
pub use crate::profiler::{BodySink, InstrumentationPolicy, ProfilerHost};

/// State kept between compilation callbacks
pub use crate::profiler::{
    GenericMethodResolver, Instrumentor, MethodBodyCache, RefreshSummary,
};
