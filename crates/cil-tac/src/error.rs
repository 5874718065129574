//! Error and diagnostic types
//!
//! Fatal problems abort the compilation of one method and surface as
//! [`CompileError`]. Recoverable ones are recorded as [`Diagnostic`]s on the
//! produced method body.

use std::fmt;

use cil_bytecode::{DecodeError, Token};
use serde::Serialize;

use crate::pipeline::verify::VerifyError;

/// Fatal error while compiling a method
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    /// Branch target or fallthrough outside the instruction stream
    #[error("Instruction {index} targets {target}, which is outside the method body")]
    DanglingTarget { index: usize, target: usize },

    #[error("Stack underflow at {opcode} (instruction {index})")]
    StackUnderflow { opcode: &'static str, index: usize },

    /// Predecessors disagree on the stack depth at a join point
    #[error("Stack depth mismatch entering instruction {entry}: expected {expected}, found {found}")]
    StackMismatch { entry: usize, expected: usize, found: usize },

    /// Values left on the stack at a return
    #[error("{depth} value(s) left on the stack at {opcode} (instruction {index})")]
    UnbalancedStack { opcode: &'static str, index: usize, depth: usize },

    #[error("Unsupported opcode {opcode} at instruction {index} (offset {offset:#06x})")]
    UnsupportedOpcode { opcode: &'static str, index: usize, offset: u32 },

    /// Operand kind does not match the opcode
    #[error("Malformed operand for {opcode} at instruction {index}")]
    MalformedOperand { opcode: &'static str, index: usize },

    /// Neither the method nor its call-site signature could be resolved
    #[error("Cannot determine the signature of method {token} called at instruction {index}")]
    UnknownCallShape { token: Token, index: usize },

    /// Block re-translation exceeded the configured bound
    #[error("Stack-merge fixpoint did not converge after {visits} visits of block at instruction {entry}")]
    FixpointDiverged { entry: usize, visits: usize },

    /// The worker compiling the method panicked before reporting
    #[error("Compilation of method {token} was interrupted")]
    Interrupted { token: Token },
}

/// Failure to produce a method body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Method {0} not found")]
    NotFound(Token),

    /// Abstract, extern or runtime-implemented method
    #[error("Method {0} has no IL body")]
    NoBody(Token),

    #[error("Cannot read body of method {token}: {message}")]
    Malformed { token: Token, message: String },
}

/// Kind of a recoverable problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    /// Type token resolved to the unknown sentinel
    UnresolvedType,
    /// Field token resolved to the unknown sentinel
    UnresolvedField,
    /// Method resolved from its call-site signature only
    UnresolvedMethod,
    /// String token could not be resolved
    UnresolvedString,
    /// A structural rewrite did not match and was skipped
    PatternSkipped,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::UnresolvedType => "unresolved type",
            DiagnosticKind::UnresolvedField => "unresolved field",
            DiagnosticKind::UnresolvedMethod => "unresolved method",
            DiagnosticKind::UnresolvedString => "unresolved string",
            DiagnosticKind::PatternSkipped => "pattern skipped",
        };
        f.write_str(s)
    }
}

/// A recoverable problem attached to a compiled method.
///
/// Statements touching an unresolved member are unreliable for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Instruction index the problem was found at
    pub instruction: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, instruction: usize, message: impl Into<String>) -> Self {
        Diagnostic { kind, instruction, message: message.into() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at instruction {}: {}", self.kind, self.instruction, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_opcode_message() {
        let err = CompileError::UnsupportedOpcode { opcode: "cpblk", index: 3, offset: 0x12 };
        assert_eq!(err.to_string(), "Unsupported opcode cpblk at instruction 3 (offset 0x0012)");
    }

    #[test]
    fn test_decode_error_converts() {
        let err: CompileError = DecodeError::UnexpectedEnd(4).into();
        assert!(matches!(err, CompileError::Decode(DecodeError::UnexpectedEnd(4))));
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::new(DiagnosticKind::UnresolvedField, 5, "token 0x04000009");
        assert_eq!(d.to_string(), "unresolved field at instruction 5: token 0x04000009");
    }
}
