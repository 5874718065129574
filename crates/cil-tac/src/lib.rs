//! CIL to three-address code
//!
//! This crate turns decoded CIL method bodies into a three-address code IR
//! for static analysis:
//! - **Analysis**: control-flow graph and the symbolic evaluation stack (`analysis` module)
//! - **IR**: values, expressions, statements and exception scopes (`ir` module)
//! - **Metadata**: token resolution behind a shared registry (`metadata` module)
//! - **Pipeline**: block translation, stack-merge fixpoint, finally inlining,
//!   leave lowering and verification (`pipeline` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use cil_tac::{compile_method, CompilerConfig, MetadataRegistry, MetadataTable};
//!
//! let tac = compile_method(&source, &table, &MetadataRegistry::new(), &CompilerConfig::default())?;
//! println!("{}", tac);
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Control-flow graph and evaluation stack
pub mod analysis;

/// Method bodies and body providers
pub mod body;

/// Pipeline configuration
pub mod config;

/// Errors and diagnostics
pub mod error;

/// Three-address code IR
pub mod ir;

/// Types, members and token resolution
pub mod metadata;

/// Translation and rewriting passes
pub mod pipeline;

// ============================================================================
// Re-exports
// ============================================================================

pub use body::{InMemoryProvider, MethodBody, MethodBodyProvider, MethodSource};
pub use config::CompilerConfig;
pub use error::{CompileError, Diagnostic, DiagnosticKind, ProviderError};
pub use ir::{EhScope, MethodTac, ScopeKind, Stmt, Value};
pub use metadata::{
    FieldRef, GenericContext, MetadataRegistry, MetadataResolver, MetadataTable, MethodRef, MethodSig,
    TacType,
};
pub use pipeline::{compile_method, compile_methods, VerifyError};
