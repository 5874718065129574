//! Display formatting for TAC IR

use std::fmt;

use super::expr::{CallExpr, Expr, LValue, RuntimeHandle, UnaryOp};
use super::method::MethodTac;
use super::scope::{EhScope, ScopeKind};
use super::stmt::{Condition, Stmt};
use super::value::{Constant, Value};

fn write_list(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    Ok(())
}

fn op_suffix(checked: bool, unsigned: bool) -> &'static str {
    match (checked, unsigned) {
        (false, false) => "",
        (true, false) => ".ovf",
        (false, true) => ".un",
        (true, true) => ".ovf.un",
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null(_) => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::I4(v) => write!(f, "{}", v),
            Constant::I8(v) => write!(f, "{}L", v),
            Constant::R4(v) => write!(f, "{}f", v),
            Constant::R8(v) => write!(f, "{}d", v),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(i) => write!(f, "l{}", i),
            Value::Param(i) => write!(f, "a{}", i),
            Value::Temp(i) => write!(f, "t{}", i),
            Value::Merge(i) => write!(f, "m{}", i),
            Value::Const(c) => write!(f, "{}", c),
        }
    }
}

impl fmt::Display for CallExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kw = if self.virtual_call { "callvirt" } else { "call" };
        write!(f, "{} {}(", kw, self.method)?;
        write_list(f, &self.args)?;
        write!(f, ")")
    }
}

impl fmt::Display for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeHandle::Type(t) => write!(f, "{}", t),
            RuntimeHandle::Field(field) => write!(f, "{}", field),
            RuntimeHandle::Method(m) => write!(f, "{}", m),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value(v) => write!(f, "{}", v),
            Expr::Field { object, field } => write!(f, "{}.{}", object, field.name),
            Expr::StaticField(field) => write!(f, "{}", field),
            Expr::FieldAddr { object: Some(o), field, .. } => write!(f, "&{}.{}", o, field.name),
            Expr::FieldAddr { object: None, field, .. } => write!(f, "&{}", field),
            Expr::ArrayElem { array, index, .. } => write!(f, "{}[{}]", array, index),
            Expr::ArrayElemAddr { array, index, .. } => write!(f, "&{}[{}]", array, index),
            Expr::ArrayLength(a) => write!(f, "len({})", a),
            Expr::Deref { addr, .. } => write!(f, "*{}", addr),
            Expr::AddrOf(v) => write!(f, "&{}", v),
            Expr::Call(call) => write!(f, "{}", call),
            Expr::Cast { value, to, checked, unsigned } => {
                write!(f, "conv{}({}, {})", op_suffix(*checked, *unsigned), to, value)
            }
            Expr::NewObj { ctor, args } => {
                write!(f, "new {}(", ctor.declaring_type)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::NewArray { elem, length } => write!(f, "new {}[{}]", elem, length),
            Expr::SizeOf(t) => write!(f, "sizeof({})", t),
            Expr::Unary { op: UnaryOp::Neg, operand, .. } => write!(f, "-{}", operand),
            Expr::Unary { op: UnaryOp::Not, operand, .. } => write!(f, "~{}", operand),
            Expr::Unary { op: UnaryOp::CkFinite, operand, .. } => write!(f, "ckfinite({})", operand),
            Expr::Binary { op, left, right, checked, unsigned, .. } => {
                write!(f, "{} {}{} {}", left, op.symbol(), op_suffix(*checked, *unsigned), right)
            }
            Expr::Box { value, ty } => write!(f, "box<{}>({})", ty, value),
            Expr::Unbox { value, ty, any: false } => write!(f, "unbox<{}>({})", ty, value),
            Expr::Unbox { value, ty, any: true } => write!(f, "unbox.any<{}>({})", ty, value),
            Expr::IsInst { value, ty } => write!(f, "{} as {}", value, ty),
            Expr::LoadToken(h) => write!(f, "token({})", h),
            Expr::FunctionPointer { method, object: None } => write!(f, "ftn({})", method),
            Expr::FunctionPointer { method, object: Some(o) } => write!(f, "virtftn({}, {})", o, method),
            Expr::Default(t) => write!(f, "default({})", t),
            Expr::CaughtException(t) => write!(f, "caught {}", t),
        }
    }
}

impl fmt::Display for LValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LValue::Var(v) => write!(f, "{}", v),
            LValue::Field { object, field } => write!(f, "{}.{}", object, field.name),
            LValue::StaticField(field) => write!(f, "{}", field),
            LValue::ArrayElem { array, index, .. } => write!(f, "{}[{}]", array, index),
            LValue::Deref { addr, .. } => write!(f, "*{}", addr),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{} {}", self.left, self.op.symbol(), op_suffix(false, self.unsigned), self.right)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign { lhs, rhs } => write!(f, "{} = {}", lhs, rhs),
            Stmt::Call(call) => write!(f, "{}", call),
            Stmt::If { cond, target } => write!(f, "if {} goto {}", cond, target),
            Stmt::Goto(t) => write!(f, "goto {}", t),
            Stmt::Leave(t) => write!(f, "leave {}", t),
            Stmt::Return(None) => write!(f, "return"),
            Stmt::Return(Some(v)) => write!(f, "return {}", v),
            Stmt::Throw(v) => write!(f, "throw {}", v),
            Stmt::Rethrow => write!(f, "rethrow"),
            Stmt::EndFinally => write!(f, "endfinally"),
            Stmt::EndFault => write!(f, "endfault"),
            Stmt::EndFilter(v) => write!(f, "endfilter {}", v),
        }
    }
}

impl fmt::Display for EhScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "try [{}, {}) ", self.try_begin, self.try_end)?;
        match &self.kind {
            ScopeKind::Catch(t) => write!(f, "catch {} ", t)?,
            ScopeKind::Filter { filter_begin } => write!(f, "filter [{}, {}) ", filter_begin, self.handler_begin)?,
            ScopeKind::Finally => write!(f, "finally ")?,
            ScopeKind::Fault => write!(f, "fault ")?,
        }
        write!(f, "[{}, {})", self.handler_begin, self.handler_end)
    }
}

impl fmt::Display for MethodTac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {}", self.name)?;
        for scope in &self.scopes {
            writeln!(f, "  {}", scope)?;
        }
        for (i, stmt) in self.stmts.iter().enumerate() {
            writeln!(f, "{}: {}", i, stmt)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;
    use crate::metadata::{MethodRef, MethodSig, TacType};
    use std::sync::Arc;

    #[test]
    fn test_display_assign_binary() {
        let s = Stmt::assign(
            Value::Temp(2),
            Expr::Binary {
                op: BinaryOp::Add,
                left: Value::Local(0),
                right: Value::Const(Constant::I4(1)),
                checked: true,
                unsigned: false,
                ty: TacType::I4,
            },
        );
        assert_eq!(s.to_string(), "t2 = l0 +.ovf 1");
    }

    #[test]
    fn test_display_if_and_call() {
        let cond = Condition::new(BinaryOp::Eq, Value::Param(0), Value::Merge(1));
        assert_eq!(Stmt::If { cond, target: 7 }.to_string(), "if a0 == m1 goto 7");

        let m = Arc::new(MethodRef::new(
            TacType::class("Console"),
            "WriteLine",
            MethodSig::new(false, vec![TacType::String], TacType::Void),
        ));
        let call = Stmt::Call(CallExpr {
            method: m,
            args: vec![Value::Const(Constant::Str("hi".into()))],
            virtual_call: false,
        });
        assert_eq!(call.to_string(), "call Console::WriteLine(\"hi\")");
    }

    #[test]
    fn test_display_scope() {
        let s = EhScope::new(ScopeKind::Finally, 0..3, 3..5);
        assert_eq!(s.to_string(), "try [0, 3) finally [3, 5)");
        let c = EhScope::new(ScopeKind::Catch(TacType::class("System.Exception")), 0..3, 3..5);
        assert_eq!(c.to_string(), "try [0, 3) catch System.Exception [3, 5)");
    }
}
