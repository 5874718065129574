//! Expressions and assignable locations

use std::sync::Arc;

use serde::Serialize;

use super::value::{Value, Variables};
use crate::metadata::{FieldRef, MethodRef, TacType};

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Bitwise complement
    Not,
    /// Throw if not a finite float, otherwise pass through
    CkFinite,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    /// Whether the operator yields a boolean
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Whether the operator works bitwise
    pub fn is_bitwise(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    /// Whether the operator is a shift
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    /// Source-like operator symbol
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// A method invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CallExpr {
    /// Callee
    pub method: Arc<MethodRef>,
    /// Arguments, receiver first for instance calls
    pub args: Vec<Value>,
    /// Dispatched through `callvirt`
    pub virtual_call: bool,
}

/// Operand of `ldtoken`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum RuntimeHandle {
    Type(TacType),
    Field(Arc<FieldRef>),
    Method(Arc<MethodRef>),
}

/// Right-hand side of an assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Expr {
    /// Plain copy
    Value(Value),
    /// Instance field read
    Field { object: Value, field: Arc<FieldRef> },
    /// Static field read
    StaticField(Arc<FieldRef>),
    /// Address of an instance (`object` set) or static field
    FieldAddr { object: Option<Value>, field: Arc<FieldRef>, managed: bool },
    /// Array element read
    ArrayElem { array: Value, index: Value, elem: TacType },
    /// Address of an array element
    ArrayElemAddr { array: Value, index: Value, elem: TacType },
    /// Array length
    ArrayLength(Value),
    /// Load through a pointer
    Deref { addr: Value, ty: TacType },
    /// Managed address of a local or parameter
    AddrOf(Value),
    /// Call with a result
    Call(CallExpr),
    /// Numeric conversion or reference cast
    Cast { value: Value, to: TacType, checked: bool, unsigned: bool },
    /// Object construction
    NewObj { ctor: Arc<MethodRef>, args: Vec<Value> },
    /// Array allocation
    NewArray { elem: TacType, length: Value },
    /// Size of a value type in bytes
    SizeOf(TacType),
    /// Unary operation
    Unary { op: UnaryOp, operand: Value, ty: TacType },
    /// Binary operation
    Binary { op: BinaryOp, left: Value, right: Value, checked: bool, unsigned: bool, ty: TacType },
    /// Box a value type
    Box { value: Value, ty: TacType },
    /// Unbox to a managed reference (`any` false) or to the value (`any` true)
    Unbox { value: Value, ty: TacType, any: bool },
    /// Type test yielding the reference or null
    IsInst { value: Value, ty: TacType },
    /// Runtime handle
    LoadToken(RuntimeHandle),
    /// Function pointer, looked up on `object` for virtual methods
    FunctionPointer { method: Arc<MethodRef>, object: Option<Value> },
    /// Zero-initialized value
    Default(TacType),
    /// Exception object on entry to a catch or filter block
    CaughtException(TacType),
}

impl Expr {
    /// Static type of the expression
    pub fn ty(&self, vars: &Variables) -> TacType {
        match self {
            Expr::Value(v) => vars.type_of(v),
            Expr::Field { field, .. } | Expr::StaticField(field) => field.field_type.clone(),
            Expr::FieldAddr { field, managed: true, .. } => field.field_type.clone().by_ref(),
            Expr::FieldAddr { field, managed: false, .. } => field.field_type.clone().pointer_to(),
            Expr::ArrayElem { elem, .. } => elem.clone(),
            Expr::ArrayElemAddr { elem, .. } => elem.clone().by_ref(),
            Expr::ArrayLength(_) => TacType::UIntPtr,
            Expr::Deref { ty, .. } => ty.clone(),
            Expr::AddrOf(v) => vars.type_of(v).by_ref(),
            Expr::Call(call) => call.method.sig.return_type.clone(),
            Expr::Cast { to, .. } => to.clone(),
            Expr::NewObj { ctor, .. } => ctor.declaring_type.clone(),
            Expr::NewArray { elem, .. } => elem.clone().array_of(),
            Expr::SizeOf(_) => TacType::U4,
            Expr::Unary { ty, .. } | Expr::Binary { ty, .. } => ty.clone(),
            Expr::Box { .. } => TacType::Object,
            Expr::Unbox { ty, any: true, .. } => ty.clone(),
            Expr::Unbox { ty, any: false, .. } => ty.clone().by_ref(),
            Expr::IsInst { ty, .. } => ty.clone(),
            Expr::LoadToken(_) => TacType::RuntimeHandle,
            Expr::FunctionPointer { .. } => TacType::IntPtr,
            Expr::Default(ty) | Expr::CaughtException(ty) => ty.clone(),
        }
    }

    /// Values read by the expression
    pub fn reads(&self) -> Vec<&Value> {
        match self {
            Expr::Value(v) | Expr::Field { object: v, .. } | Expr::ArrayLength(v)
            | Expr::Deref { addr: v, .. } | Expr::AddrOf(v) | Expr::Cast { value: v, .. }
            | Expr::NewArray { length: v, .. } | Expr::Unary { operand: v, .. }
            | Expr::Box { value: v, .. } | Expr::Unbox { value: v, .. }
            | Expr::IsInst { value: v, .. } => vec![v],
            Expr::FieldAddr { object, .. } | Expr::FunctionPointer { object, .. } => object.iter().collect(),
            Expr::ArrayElem { array, index, .. } | Expr::ArrayElemAddr { array, index, .. } => vec![array, index],
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Call(call) => call.args.iter().collect(),
            Expr::NewObj { args, .. } => args.iter().collect(),
            Expr::StaticField(_) | Expr::SizeOf(_) | Expr::LoadToken(_)
            | Expr::Default(_) | Expr::CaughtException(_) => Vec::new(),
        }
    }
}

/// Assignable location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum LValue {
    /// Local, parameter, temporary or merge variable
    Var(Value),
    /// Instance field
    Field { object: Value, field: Arc<FieldRef> },
    /// Static field
    StaticField(Arc<FieldRef>),
    /// Array element
    ArrayElem { array: Value, index: Value, elem: TacType },
    /// Store through a pointer
    Deref { addr: Value, ty: TacType },
}

impl LValue {
    /// Declared type of the location
    pub fn ty(&self, vars: &Variables) -> TacType {
        match self {
            LValue::Var(v) => vars.type_of(v),
            LValue::Field { field, .. } | LValue::StaticField(field) => field.field_type.clone(),
            LValue::ArrayElem { elem, .. } => elem.clone(),
            LValue::Deref { ty, .. } => ty.clone(),
        }
    }

    /// Values read to compute the location (not the location itself)
    pub fn reads(&self) -> Vec<&Value> {
        match self {
            LValue::Var(_) | LValue::StaticField(_) => Vec::new(),
            LValue::Field { object, .. } => vec![object],
            LValue::ArrayElem { array, index, .. } => vec![array, index],
            LValue::Deref { addr, .. } => vec![addr],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Constant;
    use crate::metadata::MethodSig;

    #[test]
    fn test_expr_types() {
        let mut vars = Variables::new(vec![TacType::I4], vec![]);
        let t = vars.new_temp(TacType::String.array_of());
        let elem = Expr::ArrayElem { array: Value::Temp(t), index: Value::Local(0), elem: TacType::String };
        assert_eq!(elem.ty(&vars), TacType::String);
        assert_eq!(Expr::AddrOf(Value::Local(0)).ty(&vars), TacType::I4.by_ref());
        assert_eq!(
            Expr::Unbox { value: Value::Temp(t), ty: TacType::I4, any: false }.ty(&vars),
            TacType::I4.by_ref()
        );
    }

    #[test]
    fn test_call_type_and_reads() {
        let vars = Variables::default();
        let m = Arc::new(MethodRef::new(
            TacType::class("Math"),
            "Max",
            MethodSig::new(false, vec![TacType::I4, TacType::I4], TacType::I4),
        ));
        let call = Expr::Call(CallExpr {
            method: m,
            args: vec![Value::Const(Constant::I4(1)), Value::Local(0)],
            virtual_call: false,
        });
        assert_eq!(call.ty(&vars), TacType::I4);
        assert_eq!(call.reads().len(), 2);
    }
}
