//! Three-address code IR
//!
//! Closed sum types for values, expressions and statements; the evaluation
//! stack only ever holds [`Value`]s.

pub mod display;
pub mod expr;
pub mod method;
pub mod scope;
pub mod stmt;
pub mod value;

pub use expr::{BinaryOp, CallExpr, Expr, LValue, RuntimeHandle, UnaryOp};
pub use method::MethodTac;
pub use scope::{EhScope, ScopeKind};
pub use stmt::{Condition, Stmt};
pub use value::{Constant, Value, Variables};
