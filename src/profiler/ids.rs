//! Identifiers the runtime hands to a profiler.

use std::fmt;

use crate::metadata::token::Token;

/// Runtime identifier of a compiled function.
///
/// Every instantiation of a generic method has its own `FunctionId`, while all of them share the
/// [`MethodKey`] of their definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub u64);

/// Runtime identifier of a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u64);

/// A method definition: the module it lives in and its `MethodDef` token.
///
/// ReJIT requests and the callbacks answering them identify methods this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey {
    /// Module declaring the method
    pub module: ModuleId,
    /// `MethodDef` token of the method within its module
    pub token: Token,
}

impl MethodKey {
    /// Create a new key
    #[must_use]
    pub fn new(module: ModuleId, token: Token) -> Self {
        MethodKey { module, token }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function 0x{:x}", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module 0x{:x}", self.0)
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.module, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let key = MethodKey::new(ModuleId(0x10), Token(0x0600_0002));
        assert_eq!(key.to_string(), "[module 0x10] 0x06000002");
        assert_eq!(FunctionId(255).to_string(), "function 0xff");
    }
}
