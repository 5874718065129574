//! Compiled method bodies

use serde::Serialize;

use super::scope::EhScope;
use super::stmt::Stmt;
use super::value::Variables;
use crate::error::Diagnostic;

/// Three-address code for one method
#[derive(Debug, Clone, Serialize)]
pub struct MethodTac {
    /// Display name of the method
    pub name: String,
    /// Statement sequence; branch targets index into it
    pub stmts: Vec<Stmt>,
    /// Exception scopes in statement coordinates
    pub scopes: Vec<EhScope>,
    /// Types of locals, parameters, temporaries and merge variables
    pub vars: Variables,
    /// Recoverable problems met while compiling
    pub diagnostics: Vec<Diagnostic>,
    /// Set once structured exits have been lowered to plain jumps
    pub leaves_lowered: bool,
}

impl MethodTac {
    /// Number of statements
    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Number of statements equal to `stmt`
    pub fn count(&self, stmt: &Stmt) -> usize {
        self.stmts.iter().filter(|s| *s == stmt).count()
    }

    /// Serialize to pretty JSON for external tooling
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
