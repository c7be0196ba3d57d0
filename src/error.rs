use thiserror::Error;

use crate::profiler::{FunctionId, MethodKey};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure the rewriter can run into is reported through this enum instead of a panic, so
/// a caller processing many methods can skip the one that failed and keep going. The host-facing
/// variants describe what a [`crate::profiler::ProfilerHost`] reported.
///
/// # Error Categories
///
/// ## Decoding Errors
/// - [`Error::InvalidOpcode`] - Unknown or reserved opcode, the decoder lost synchronization
/// - [`Error::OutOfBounds`] - Truncated instruction stream or header
/// - [`Error::Empty`] - Empty method body
///
/// ## Rewrite Errors
/// - [`Error::Malformed`] - Structural precondition violated (no trailing `ret`, bad header)
/// - [`Error::InvalidInstructions`] - Unresolvable branch targets or branch range overflow
/// - [`Error::ValidationFailed`] - The rewritten body did not survive re-decoding
///
/// ## Host Errors
/// - [`Error::GenericMethod`] - The host can not resolve a parameterized method directly
/// - [`Error::FunctionNotFound`] - The host does not know the function id
/// - [`Error::Host`] - Any other failure reported by the host
///
/// # Examples
///
/// ```rust
/// use cilwrap::{Error, rewriter::{BodyRewriter, RewriterConfig}, metadata::method::HeaderInfo};
///
/// // tiny header, 2 bytes of code: nop, nop - but the header claims 2 returns
/// let body = [0x0A, 0x00, 0x00];
/// let mut info = HeaderInfo::tiny(2);
/// info.return_count = 2;
///
/// match BodyRewriter::new(&body, &info, &RewriterConfig::default()).rewrite() {
///     Ok(_) => unreachable!(),
///     Err(Error::Malformed { message, .. }) => println!("skipped: {}", message),
///     Err(e) => println!("skipped: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the method body.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The byte at `offset` does not start a defined instruction.
    ///
    /// Two-byte opcodes are reported as `0xFEXX`.
    #[error("Invalid opcode 0x{opcode:02X} at offset 0x{offset:04X}")]
    InvalidOpcode {
        /// Offset of the offending byte within the code
        offset: usize,
        /// The opcode value that could not be classified
        opcode: u16,
    },

    /// One or more instructions were marked invalid.
    ///
    /// Raised once after a pass, when branch or switch targets could not be resolved or a
    /// short-form branch could not encode its final jump distance.
    #[error("{0} instruction(s) are invalid after rewriting")]
    InvalidInstructions(usize),

    /// The rewritten method body failed the post-rewrite self check.
    #[error("Rewritten method body failed validation - {0}")]
    ValidationFailed(String),

    /// The host can not resolve a generic (parameterized) method from its module and token.
    #[error("Method {0} is parameterized and can not be resolved directly")]
    GenericMethod(MethodKey),

    /// The host does not know the requested function.
    #[error("Function {0} is not known to the host")]
    FunctionNotFound(FunctionId),

    /// Any other error reported by the profiling host.
    #[error("{0}")]
    Host(String),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically
    /// when trying to acquire a mutex or rwlock that is in an invalid state.
    #[error("Failed to lock target")]
    LockError,
}
