//! Values: the operands that live on the evaluation stack

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

use crate::metadata::TacType;

/// Literal constant
#[derive(Debug, Clone, Serialize)]
pub enum Constant {
    /// Null reference, typed by the sink it flows into
    Null(TacType),
    Bool(bool),
    I4(i32),
    I8(i64),
    R4(f32),
    R8(f64),
    Str(Arc<str>),
}

impl Constant {
    /// Static type of the constant
    pub fn ty(&self) -> TacType {
        match self {
            Constant::Null(t) => t.clone(),
            Constant::Bool(_) => TacType::Bool,
            Constant::I4(_) => TacType::I4,
            Constant::I8(_) => TacType::I8,
            Constant::R4(_) => TacType::R4,
            Constant::R8(_) => TacType::R8,
            Constant::Str(_) => TacType::String,
        }
    }
}

// Floats compare by bit pattern so that structural equality of stack
// snapshots is reflexive (NaN == NaN).
impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Null(a), Constant::Null(b)) => a == b,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::I4(a), Constant::I4(b)) => a == b,
            (Constant::I8(a), Constant::I8(b)) => a == b,
            (Constant::R4(a), Constant::R4(b)) => a.to_bits() == b.to_bits(),
            (Constant::R8(a), Constant::R8(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Null(t) => t.hash(state),
            Constant::Bool(b) => b.hash(state),
            Constant::I4(v) => v.hash(state),
            Constant::I8(v) => v.hash(state),
            Constant::R4(v) => v.to_bits().hash(state),
            Constant::R8(v) => v.to_bits().hash(state),
            Constant::Str(s) => s.hash(state),
        }
    }
}

/// An operand: a variable or a constant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Value {
    /// Declared local variable
    Local(u16),
    /// Parameter (index 0 is the receiver of instance methods)
    Param(u16),
    /// Compiler temporary
    Temp(u32),
    /// Merge pseudo-variable for a stack slot at a join point
    Merge(u32),
    /// Literal
    Const(Constant),
}

impl Value {
    /// Whether this value can be assigned to
    pub fn is_variable(&self) -> bool {
        !matches!(self, Value::Const(_))
    }

    /// Merge variable id, if this is one
    pub fn as_merge(&self) -> Option<u32> {
        match self {
            Value::Merge(m) => Some(*m),
            _ => None,
        }
    }
}

/// Type table for all variables of a method
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Variables {
    /// Declared locals in declaration order
    pub locals: Vec<TacType>,
    /// Parameters, receiver first for instance methods
    pub params: Vec<TacType>,
    /// Temporaries by id
    pub temps: Vec<TacType>,
    /// Merge variables by id
    pub merges: Vec<TacType>,
}

impl Variables {
    /// Build the table for a method's declared locals and parameters
    pub fn new(locals: Vec<TacType>, params: Vec<TacType>) -> Self {
        Variables { locals, params, temps: Vec::new(), merges: Vec::new() }
    }

    /// Static type of `value`; out-of-range variables are `Unknown`
    pub fn type_of(&self, value: &Value) -> TacType {
        let lookup = |table: &[TacType], i: usize| table.get(i).cloned().unwrap_or(TacType::Unknown);
        match value {
            Value::Local(i) => lookup(&self.locals, *i as usize),
            Value::Param(i) => lookup(&self.params, *i as usize),
            Value::Temp(i) => lookup(&self.temps, *i as usize),
            Value::Merge(i) => lookup(&self.merges, *i as usize),
            Value::Const(c) => c.ty(),
        }
    }

    /// Allocate a new temporary
    pub fn new_temp(&mut self, ty: TacType) -> u32 {
        self.temps.push(ty);
        self.temps.len() as u32 - 1
    }

    /// Allocate a new merge variable
    pub fn new_merge(&mut self, ty: TacType) -> u32 {
        self.merges.push(ty);
        self.merges.len() as u32 - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_constants_compare_by_bits() {
        assert_eq!(Constant::R8(f64::NAN), Constant::R8(f64::NAN));
        assert_ne!(Constant::R4(0.0), Constant::R4(-0.0));
        assert_ne!(Constant::I4(1), Constant::I8(1));
    }

    #[test]
    fn test_type_of() {
        let mut vars = Variables::new(vec![TacType::String], vec![TacType::I4]);
        let t = vars.new_temp(TacType::Bool);
        assert_eq!(vars.type_of(&Value::Local(0)), TacType::String);
        assert_eq!(vars.type_of(&Value::Param(0)), TacType::I4);
        assert_eq!(vars.type_of(&Value::Temp(t)), TacType::Bool);
        assert_eq!(vars.type_of(&Value::Local(5)), TacType::Unknown);
        assert_eq!(vars.type_of(&Value::Const(Constant::Str("x".into()))), TacType::String);
    }
}
