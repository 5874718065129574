//! TAC statements

use serde::Serialize;

use super::expr::{BinaryOp, CallExpr, Expr, LValue};
use super::value::Value;

/// Comparison guarding a conditional branch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Condition {
    /// Comparison operator
    pub op: BinaryOp,
    pub left: Value,
    pub right: Value,
    /// Unsigned or unordered comparison
    pub unsigned: bool,
}

impl Condition {
    /// Build a signed/ordered comparison
    pub fn new(op: BinaryOp, left: Value, right: Value) -> Self {
        Condition { op, left, right, unsigned: false }
    }

    /// Operand values
    pub fn reads(&self) -> [&Value; 2] {
        [&self.left, &self.right]
    }
}

/// A single TAC statement.
///
/// Branch targets are instruction indices while a block is being translated
/// and statement indices once the method body has been composed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Stmt {
    /// `lhs = rhs`
    Assign { lhs: LValue, rhs: Expr },
    /// Call whose result, if any, is discarded
    Call(CallExpr),
    /// Conditional branch
    If { cond: Condition, target: usize },
    /// Unconditional branch
    Goto(usize),
    /// Structured exit from a protected region
    Leave(usize),
    /// Return, with a value for non-void methods
    Return(Option<Value>),
    Throw(Value),
    Rethrow,
    /// End of a finally handler
    EndFinally,
    /// End of a fault handler
    EndFault,
    /// End of a filter block with its verdict
    EndFilter(Value),
}

impl Stmt {
    /// Shorthand for a variable assignment
    pub fn assign(lhs: Value, rhs: Expr) -> Self {
        Stmt::Assign { lhs: LValue::Var(lhs), rhs }
    }

    /// Branch target, if the statement is a branch
    pub fn target(&self) -> Option<usize> {
        match self {
            Stmt::If { target, .. } | Stmt::Goto(target) | Stmt::Leave(target) => Some(*target),
            _ => None,
        }
    }

    /// Mutable branch target
    pub fn target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Stmt::If { target, .. } | Stmt::Goto(target) | Stmt::Leave(target) => Some(target),
            _ => None,
        }
    }

    /// Whether the statement transfers control to a target
    pub fn is_branch(&self) -> bool {
        self.target().is_some()
    }

    /// Whether execution can continue with the next statement
    pub fn falls_through(&self) -> bool {
        matches!(self, Stmt::Assign { .. } | Stmt::Call(_) | Stmt::If { .. })
    }

    /// Values read by the statement
    pub fn reads(&self) -> Vec<&Value> {
        match self {
            Stmt::Assign { lhs, rhs } => {
                let mut reads = lhs.reads();
                reads.extend(rhs.reads());
                reads
            }
            Stmt::Call(call) => call.args.iter().collect(),
            Stmt::If { cond, .. } => cond.reads().to_vec(),
            Stmt::Return(v) => v.iter().collect(),
            Stmt::Throw(v) | Stmt::EndFilter(v) => vec![v],
            Stmt::Goto(_) | Stmt::Leave(_) | Stmt::Rethrow | Stmt::EndFinally | Stmt::EndFault => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Constant;

    #[test]
    fn test_targets() {
        let mut s = Stmt::If {
            cond: Condition::new(BinaryOp::Eq, Value::Local(0), Value::Const(Constant::I4(0))),
            target: 4,
        };
        assert_eq!(s.target(), Some(4));
        *s.target_mut().unwrap() = 9;
        assert_eq!(s.target(), Some(9));
        assert!(s.falls_through());
        assert!(!Stmt::Goto(1).falls_through());
        assert_eq!(Stmt::Return(None).target(), None);
    }

    #[test]
    fn test_reads() {
        let s = Stmt::assign(Value::Temp(0), Expr::Value(Value::Local(1)));
        assert_eq!(s.reads(), vec![&Value::Local(1)]);
        assert!(Stmt::Rethrow.reads().is_empty());
    }
}
