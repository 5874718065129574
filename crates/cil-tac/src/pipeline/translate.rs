//! Block translator
//!
//! Replays the instructions of one basic block over a symbolic evaluation
//! stack, starting from the block's entry snapshot, and emits TAC
//! statements. Translation is a pure function of the entry snapshot: running
//! it again with the same snapshot yields the same statements and reuses the
//! same temporaries.
//!
//! Branch targets in the emitted statements are instruction indices; the
//! body builder maps them to statement indices when it composes the method.

use std::sync::Arc;

use cil_bytecode::{Instruction, Opcode, Operand, Token};

use super::array_init;
use crate::analysis::{BasicBlock, EvalStack};
use crate::error::{CompileError, Diagnostic, DiagnosticKind};
use crate::ir::{
    BinaryOp, CallExpr, Condition, Constant, EhScope, Expr, LValue, RuntimeHandle, ScopeKind, Stmt,
    UnaryOp, Value, Variables,
};
use crate::metadata::{FieldRef, GenericContext, MetadataRegistry, MetadataResolver, MethodRef, TacType, TypeCategory};

/// Per-method inputs shared by every block translation
pub struct TranslationContext<'a> {
    pub resolver: &'a dyn MetadataResolver,
    pub registry: &'a MetadataRegistry,
    pub generics: &'a GenericContext,
    /// Declared return type of the method
    pub return_type: TacType,
    /// Exception scopes in instruction coordinates
    pub scopes: &'a [EhScope],
    /// Expand `InitializeArray` calls into element stores
    pub inline_array_initializers: bool,
}

/// Result of translating one block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutput {
    /// Statements with instruction-index branch targets
    pub stmts: Vec<Stmt>,
    /// Stack contents at the block exit, bottom first
    pub exit_stack: Vec<Value>,
    /// Types of the exit values at the time of translation
    pub exit_types: Vec<TacType>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Translate `block` starting from `entry`.
///
/// `temps` holds the temporaries this block allocated on earlier
/// translations; they are reused in order and new ones appended.
pub fn translate_block(
    cx: &TranslationContext<'_>,
    instrs: &[Instruction],
    block: &BasicBlock,
    entry: Vec<Value>,
    vars: &mut Variables,
    temps: &mut Vec<u32>,
) -> Result<BlockOutput, CompileError> {
    let mut translator = BlockTranslator {
        cx,
        vars,
        temps,
        next_temp: 0,
        stack: EvalStack::from_snapshot(entry),
        stmts: Vec::new(),
        diagnostics: Vec::new(),
    };

    if let Some(exception) = &block.incoming_exception {
        let t = translator.temp(exception.clone());
        translator.stmts.push(Stmt::assign(t.clone(), Expr::CaughtException(exception.clone())));
        translator.stack.push(t);
    }

    for instr in &instrs[block.instrs()] {
        translator.translate(instr)?;
    }

    let exit_stack = translator.stack.snapshot();
    let exit_types = exit_stack.iter().map(|v| translator.vars.type_of(v)).collect();
    Ok(BlockOutput {
        stmts: translator.stmts,
        exit_stack,
        exit_types,
        diagnostics: translator.diagnostics,
    })
}

struct BlockTranslator<'t, 'a> {
    cx: &'t TranslationContext<'a>,
    vars: &'t mut Variables,
    temps: &'t mut Vec<u32>,
    next_temp: usize,
    stack: EvalStack,
    stmts: Vec<Stmt>,
    diagnostics: Vec<Diagnostic>,
}

impl<'t, 'a> BlockTranslator<'t, 'a> {
    fn translate(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        use Opcode::*;

        let name = instr.opcode.name();
        let index = instr.index;

        if let Some((op, checked, unsigned)) = arithmetic(instr.opcode) {
            let right = self.stack.pop(name, index)?;
            let left = self.stack.pop(name, index)?;
            let ty = binary_type(op, &self.vars.type_of(&left), &self.vars.type_of(&right));
            self.push_expr(Expr::Binary { op, left, right, checked, unsigned, ty });
            return Ok(());
        }
        if let Some((to, checked, unsigned)) = conversion(instr.opcode) {
            let value = self.stack.pop(name, index)?;
            self.push_expr(Expr::Cast { value, to, checked, unsigned });
            return Ok(());
        }
        if let Some((op, unsigned)) = branch_comparison(instr.opcode) {
            let right = self.stack.pop(name, index)?;
            let left = self.stack.pop(name, index)?;
            let (left, right) = self.coerce_pair(left, right);
            let target = self.target(instr)?;
            self.stmts.push(Stmt::If { cond: Condition { op, left, right, unsigned }, target });
            return Ok(());
        }

        match instr.opcode.long_form() {
            Nop | Break => {}
            // Prefixes only annotate the next instruction
            Volatile | Unaligned | Tail | Constrained | Readonly | No => {}

            Cpblk | Initblk | Calli | Jmp | Arglist | Localloc | Mkrefany | Refanyval
            | Refanytype => {
                return Err(CompileError::UnsupportedOpcode { opcode: name, index, offset: instr.offset });
            }

            // Constants
            Ldnull => self.stack.push(Value::Const(Constant::Null(TacType::Null))),
            LdcI4M1 => self.stack.push(Value::Const(Constant::I4(-1))),
            LdcI4_0 | LdcI4_1 | LdcI4_2 | LdcI4_3 | LdcI4_4 | LdcI4_5 | LdcI4_6 | LdcI4_7 | LdcI4_8 => {
                let n = short_slot(instr.opcode, LdcI4_0) as i32;
                self.stack.push(Value::Const(Constant::I4(n)));
            }
            LdcI4S | LdcI4 => match instr.operand {
                Operand::Int32(n) => self.stack.push(Value::Const(Constant::I4(n))),
                _ => return Err(malformed(instr)),
            },
            LdcI8 => match instr.operand {
                Operand::Int64(n) => self.stack.push(Value::Const(Constant::I8(n))),
                _ => return Err(malformed(instr)),
            },
            LdcR4 => match instr.operand {
                Operand::Float32(x) => self.stack.push(Value::Const(Constant::R4(x))),
                _ => return Err(malformed(instr)),
            },
            LdcR8 => match instr.operand {
                Operand::Float64(x) => self.stack.push(Value::Const(Constant::R8(x))),
                _ => return Err(malformed(instr)),
            },
            Ldstr => {
                let token = self.token(instr)?;
                let lookup = self.cx.registry.resolve_string(self.cx.resolver, self.cx.generics, token);
                if !lookup.resolved {
                    self.diagnose(DiagnosticKind::UnresolvedString, index, format!("string token {}", token));
                }
                self.stack.push(Value::Const(Constant::Str(lookup.value)));
            }

            // Locals and parameters
            Ldarg0 | Ldarg1 | Ldarg2 | Ldarg3 => self.stack.push(Value::Param(short_slot(instr.opcode, Ldarg0))),
            Ldloc0 | Ldloc1 | Ldloc2 | Ldloc3 => self.stack.push(Value::Local(short_slot(instr.opcode, Ldloc0))),
            Ldarg => self.stack.push(Value::Param(var_operand(instr)?)),
            Ldloc => self.stack.push(Value::Local(var_operand(instr)?)),
            Stloc0 | Stloc1 | Stloc2 | Stloc3 => {
                let slot = short_slot(instr.opcode, Stloc0);
                self.store_var(Value::Local(slot), name, index)?;
            }
            Stloc => self.store_var(Value::Local(var_operand(instr)?), name, index)?,
            Starg => self.store_var(Value::Param(var_operand(instr)?), name, index)?,
            Ldarga | Ldloca => {
                let var = match instr.opcode.long_form() {
                    Ldarga => Value::Param(var_operand(instr)?),
                    _ => Value::Local(var_operand(instr)?),
                };
                self.spill(&var);
                self.push_expr(Expr::AddrOf(var));
            }

            // Stack manipulation
            Dup => {
                let value = self.stack.pop(name, index)?;
                self.stack.push(value.clone());
                self.stack.push(value);
            }
            Pop => {
                self.stack.pop(name, index)?;
            }

            // Unary arithmetic
            Neg | Not => {
                let operand = self.stack.pop(name, index)?;
                let ty = self.vars.type_of(&operand).stack_type();
                let op = if instr.opcode == Neg { UnaryOp::Neg } else { UnaryOp::Not };
                self.push_expr(Expr::Unary { op, operand, ty });
            }
            Ckfinite => {
                let operand = self.stack.pop(name, index)?;
                let ty = self.vars.type_of(&operand);
                self.push_expr(Expr::Unary { op: UnaryOp::CkFinite, operand, ty });
            }

            // Comparisons producing a value
            Ceq | Cgt | CgtUn | Clt | CltUn => {
                let (op, unsigned) = match instr.opcode {
                    Ceq => (BinaryOp::Eq, false),
                    Cgt => (BinaryOp::Gt, false),
                    CgtUn => (BinaryOp::Gt, true),
                    Clt => (BinaryOp::Lt, false),
                    _ => (BinaryOp::Lt, true),
                };
                let right = self.stack.pop(name, index)?;
                let left = self.stack.pop(name, index)?;
                let (left, right) = self.coerce_pair(left, right);
                self.push_expr(Expr::Binary { op, left, right, checked: false, unsigned, ty: TacType::Bool });
            }

            // Control flow
            Br => {
                let target = self.target(instr)?;
                self.stmts.push(Stmt::Goto(target));
            }
            Brtrue | Brfalse => {
                let value = self.stack.pop(name, index)?;
                let falsy = falsy(&self.vars.type_of(&value));
                let op = if instr.opcode.long_form() == Brtrue { BinaryOp::Ne } else { BinaryOp::Eq };
                let target = self.target(instr)?;
                self.stmts.push(Stmt::If { cond: Condition::new(op, value, Value::Const(falsy)), target });
            }
            Switch => {
                let value = self.stack.pop(name, index)?;
                let targets = match &instr.operand {
                    Operand::Switch(targets) => targets.clone(),
                    _ => return Err(malformed(instr)),
                };
                for (case, target) in targets.into_iter().enumerate() {
                    let cond = Condition::new(BinaryOp::Eq, value.clone(), Value::Const(Constant::I4(case as i32)));
                    self.stmts.push(Stmt::If { cond, target });
                }
            }
            Leave => {
                self.stack.clear();
                let target = self.target(instr)?;
                self.stmts.push(Stmt::Leave(target));
            }
            Ret => {
                let value = if self.cx.return_type == TacType::Void {
                    None
                } else {
                    let value = self.stack.pop(name, index)?;
                    let return_type = self.cx.return_type.clone();
                    Some(self.coerce(value, &return_type))
                };
                if !self.stack.is_empty() {
                    return Err(CompileError::UnbalancedStack { opcode: name, index, depth: self.stack.depth() });
                }
                self.stmts.push(Stmt::Return(value));
            }
            // Throwing discards whatever else is on the stack
            Throw => {
                let value = self.stack.pop(name, index)?;
                self.stack.clear();
                self.stmts.push(Stmt::Throw(value));
            }
            Rethrow => {
                self.stack.clear();
                self.stmts.push(Stmt::Rethrow);
            }
            Endfinally => {
                self.stack.clear();
                let in_fault = innermost_handler(self.cx.scopes, index).map_or(false, EhScope::is_fault);
                self.stmts.push(if in_fault { Stmt::EndFault } else { Stmt::EndFinally });
            }
            Endfilter => {
                let value = self.stack.pop(name, index)?;
                self.stack.clear();
                self.stmts.push(Stmt::EndFilter(value));
            }

            // Indirect access
            LdindI1 | LdindU1 | LdindI2 | LdindU2 | LdindI4 | LdindU4 | LdindI8 | LdindI | LdindR4 | LdindR8
            | LdindRef => {
                let addr = self.stack.pop(name, index)?;
                let ty = indirect_type(instr.opcode).unwrap_or_else(|| pointee(&self.vars.type_of(&addr)));
                self.push_expr(Expr::Deref { addr, ty });
            }
            StindRef | StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindI => {
                let value = self.stack.pop(name, index)?;
                let addr = self.stack.pop(name, index)?;
                self.spill_vars();
                let ty = indirect_type(instr.opcode)
                    .unwrap_or_else(|| pointee(&self.vars.type_of(&addr)));
                let rhs = self.coerce_expr(value, &ty);
                self.stmts.push(Stmt::Assign { lhs: LValue::Deref { addr, ty }, rhs });
            }
            Ldobj => {
                let ty = self.resolve_type(instr)?;
                let addr = self.stack.pop(name, index)?;
                self.push_expr(Expr::Deref { addr, ty });
            }
            Stobj => {
                let ty = self.resolve_type(instr)?;
                let value = self.stack.pop(name, index)?;
                let addr = self.stack.pop(name, index)?;
                self.spill_vars();
                let rhs = self.coerce_expr(value, &ty);
                self.stmts.push(Stmt::Assign { lhs: LValue::Deref { addr, ty }, rhs });
            }
            Cpobj => {
                let ty = self.resolve_type(instr)?;
                let src = self.stack.pop(name, index)?;
                let dst = self.stack.pop(name, index)?;
                let copy = self.materialize(Expr::Deref { addr: src, ty: ty.clone() });
                self.spill_vars();
                self.stmts.push(Stmt::Assign { lhs: LValue::Deref { addr: dst, ty }, rhs: Expr::Value(copy) });
            }
            Initobj => {
                let ty = self.resolve_type(instr)?;
                let addr = self.stack.pop(name, index)?;
                self.spill_vars();
                self.stmts.push(Stmt::Assign {
                    lhs: LValue::Deref { addr, ty: ty.clone() },
                    rhs: Expr::Default(ty),
                });
            }

            // Fields
            Ldfld => {
                let field = self.resolve_field(instr)?;
                let object = self.stack.pop(name, index)?;
                self.push_expr(Expr::Field { object, field });
            }
            Ldflda => {
                let field = self.resolve_field(instr)?;
                let object = self.stack.pop(name, index)?;
                let managed = !is_unmanaged_address(&self.vars.type_of(&object));
                self.push_expr(Expr::FieldAddr { object: Some(object), field, managed });
            }
            Stfld => {
                let field = self.resolve_field(instr)?;
                let value = self.stack.pop(name, index)?;
                let object = self.stack.pop(name, index)?;
                let rhs = self.coerce_expr(value, &field.field_type);
                self.stmts.push(Stmt::Assign { lhs: LValue::Field { object, field }, rhs });
            }
            Ldsfld => {
                let field = self.resolve_field(instr)?;
                self.push_expr(Expr::StaticField(field));
            }
            Ldsflda => {
                let field = self.resolve_field(instr)?;
                self.push_expr(Expr::FieldAddr { object: None, field, managed: true });
            }
            Stsfld => {
                let field = self.resolve_field(instr)?;
                let value = self.stack.pop(name, index)?;
                let rhs = self.coerce_expr(value, &field.field_type);
                self.stmts.push(Stmt::Assign { lhs: LValue::StaticField(field), rhs });
            }

            // Arrays
            Newarr => {
                let elem = self.resolve_type(instr)?;
                let length = self.stack.pop(name, index)?;
                self.push_expr(Expr::NewArray { elem, length });
            }
            Ldlen => {
                let array = self.stack.pop(name, index)?;
                self.push_expr(Expr::ArrayLength(array));
            }
            LdelemI1 | LdelemU1 | LdelemI2 | LdelemU2 | LdelemI4 | LdelemU4 | LdelemI8 | LdelemI | LdelemR4
            | LdelemR8 | LdelemRef | Ldelem => {
                let explicit = if instr.opcode == Ldelem { Some(self.resolve_type(instr)?) } else { None };
                let index_value = self.stack.pop(name, index)?;
                let array = self.stack.pop(name, index)?;
                let elem = explicit
                    .or_else(|| element_type(instr.opcode))
                    .unwrap_or_else(|| pointee(&self.vars.type_of(&array)));
                self.push_expr(Expr::ArrayElem { array, index: index_value, elem });
            }
            Ldelema => {
                let elem = self.resolve_type(instr)?;
                let index_value = self.stack.pop(name, index)?;
                let array = self.stack.pop(name, index)?;
                self.push_expr(Expr::ArrayElemAddr { array, index: index_value, elem });
            }
            StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemRef | Stelem => {
                let explicit = if instr.opcode == Stelem { Some(self.resolve_type(instr)?) } else { None };
                let value = self.stack.pop(name, index)?;
                let index_value = self.stack.pop(name, index)?;
                let array = self.stack.pop(name, index)?;
                let elem = explicit
                    .or_else(|| element_type(instr.opcode))
                    .unwrap_or_else(|| pointee(&self.vars.type_of(&array)));
                let rhs = self.coerce_expr(value, &elem);
                self.stmts.push(Stmt::Assign { lhs: LValue::ArrayElem { array, index: index_value, elem }, rhs });
            }

            // Calls and objects
            Call | Callvirt => {
                let method = self.resolve_method(instr)?;
                if self.cx.inline_array_initializers && array_init::is_initialize_array(&method) {
                    // Match on the uncoerced operands; a skipped rewrite restores them
                    let raw = self.stack.pop_n(method.arg_count(), name, index)?;
                    match array_init::expand(&self.stmts, self.vars, &raw) {
                        Ok(stores) => {
                            self.stmts.extend(stores);
                            return Ok(());
                        }
                        Err(reason) => {
                            self.diagnose(DiagnosticKind::PatternSkipped, index, reason);
                            for value in raw {
                                self.stack.push(value);
                            }
                        }
                    }
                }
                let args = self.pop_args(&method, name, index)?;
                let call = CallExpr { method: method.clone(), args, virtual_call: instr.opcode == Callvirt };
                if method.sig.return_type == TacType::Void {
                    self.stmts.push(Stmt::Call(call));
                } else {
                    self.push_expr(Expr::Call(call));
                }
            }
            Newobj => {
                let ctor = self.resolve_method(instr)?;
                let n = ctor.sig.params.len();
                let raw = self.stack.pop_n(n, name, index)?;
                let args: Vec<Value> = raw
                    .into_iter()
                    .zip(ctor.sig.params.clone())
                    .map(|(arg, ty)| self.coerce(arg, &ty))
                    .collect();
                self.push_expr(Expr::NewObj { ctor, args });
            }
            Ldftn => {
                let method = self.resolve_method(instr)?;
                self.push_expr(Expr::FunctionPointer { method, object: None });
            }
            Ldvirtftn => {
                let method = self.resolve_method(instr)?;
                let object = self.stack.pop(name, index)?;
                self.push_expr(Expr::FunctionPointer { method, object: Some(object) });
            }
            Castclass => {
                let to = self.resolve_type(instr)?;
                let value = self.stack.pop(name, index)?;
                self.push_expr(Expr::Cast { value, to, checked: true, unsigned: false });
            }
            Isinst => {
                let ty = self.resolve_type(instr)?;
                let value = self.stack.pop(name, index)?;
                self.push_expr(Expr::IsInst { value, ty });
            }
            Box => {
                let ty = self.resolve_type(instr)?;
                let value = self.stack.pop(name, index)?;
                let value = self.coerce(value, &ty);
                self.push_expr(Expr::Box { value, ty });
            }
            Unbox | UnboxAny => {
                let ty = self.resolve_type(instr)?;
                let value = self.stack.pop(name, index)?;
                self.push_expr(Expr::Unbox { value, ty, any: instr.opcode == UnboxAny });
            }
            Sizeof => {
                let ty = self.resolve_type(instr)?;
                self.push_expr(Expr::SizeOf(ty));
            }
            Ldtoken => {
                let token = self.token(instr)?;
                let handle = if token.is_field() {
                    RuntimeHandle::Field(self.resolve_field(instr)?)
                } else if token.is_method() {
                    RuntimeHandle::Method(self.resolve_method(instr)?)
                } else {
                    RuntimeHandle::Type(self.resolve_type(instr)?)
                };
                self.push_expr(Expr::LoadToken(handle));
            }

            // Everything else was handled by the table lookups above
            _ => return Err(CompileError::UnsupportedOpcode { opcode: name, index, offset: instr.offset }),
        }
        Ok(())
    }

    /// Allocate the next temporary of this block
    fn temp(&mut self, ty: TacType) -> Value {
        let id = match self.temps.get(self.next_temp) {
            Some(&id) => {
                self.vars.temps[id as usize] = ty;
                id
            }
            None => {
                let id = self.vars.new_temp(ty);
                self.temps.push(id);
                id
            }
        };
        self.next_temp += 1;
        Value::Temp(id)
    }

    /// Reduce `expr` to a value, assigning it to a temporary if needed
    fn materialize(&mut self, expr: Expr) -> Value {
        match expr {
            Expr::Value(v) => v,
            expr => {
                let t = self.temp(expr.ty(self.vars));
                self.stmts.push(Stmt::assign(t.clone(), expr));
                t
            }
        }
    }

    fn push_expr(&mut self, expr: Expr) {
        let value = self.materialize(expr);
        self.stack.push(value);
    }

    /// Copy stale stack reads of `var` into a temporary before `var` changes
    fn spill(&mut self, var: &Value) {
        if self.stack.contains(var) {
            let t = self.temp(self.vars.type_of(var));
            self.stmts.push(Stmt::assign(t.clone(), Expr::Value(var.clone())));
            self.stack.replace(var, &t);
        }
    }

    fn store_var(&mut self, var: Value, name: &'static str, index: usize) -> Result<(), CompileError> {
        let value = self.stack.pop(name, index)?;
        self.spill(&var);
        let ty = self.vars.type_of(&var);
        let rhs = self.coerce_expr(value, &ty);
        self.stmts.push(Stmt::Assign { lhs: LValue::Var(var), rhs });
        Ok(())
    }

    /// Convert `value` for a sink of type `sink`
    fn coerce_expr(&self, value: Value, sink: &TacType) -> Expr {
        match &value {
            Value::Const(Constant::Null(_)) => return Expr::Value(Value::Const(Constant::Null(sink.clone()))),
            Value::Const(Constant::I4(n)) if *sink == TacType::Bool => {
                return Expr::Value(Value::Const(Constant::Bool(*n != 0)));
            }
            // Integer literals already fit any sink with the same stack type
            Value::Const(c @ (Constant::I4(_) | Constant::I8(_))) if sink.stack_type() == c.ty() => {
                return Expr::Value(value);
            }
            _ => {}
        }
        let ty = self.vars.type_of(&value);
        if needs_cast(&ty, sink) {
            Expr::Cast { value, to: sink.clone(), checked: false, unsigned: false }
        } else {
            Expr::Value(value)
        }
    }

    fn coerce(&mut self, value: Value, sink: &TacType) -> Value {
        let expr = self.coerce_expr(value, sink);
        self.materialize(expr)
    }

    /// Bring the operands of a comparison to a common type.
    ///
    /// Only widens: a null literal takes the type of the other side, a
    /// `float32` meeting a `float64` and an `int32` meeting a native int are
    /// converted to the wider type, and everything else is compared as is.
    fn coerce_pair(&mut self, left: Value, right: Value) -> (Value, Value) {
        let (lt, rt) = (self.vars.type_of(&left), self.vars.type_of(&right));
        if is_null_literal(&left) {
            return (Value::Const(Constant::Null(rt)), right);
        }
        if is_null_literal(&right) {
            return (left, Value::Const(Constant::Null(lt)));
        }
        match comparison_type(&lt, &rt) {
            Some(common) => (self.widen(left, &lt, &common), self.widen(right, &rt, &common)),
            None => (left, right),
        }
    }

    fn widen(&mut self, value: Value, ty: &TacType, to: &TacType) -> Value {
        if ty == to || (!ty.is_float() && ty.stack_type() == *to) {
            return value;
        }
        self.materialize(Expr::Cast { value, to: to.clone(), checked: false, unsigned: false })
    }

    /// Copy every local and parameter still on the stack into a temporary.
    ///
    /// An indirect store may write any variable whose address was taken.
    fn spill_vars(&mut self) {
        let mut vars: Vec<Value> = Vec::new();
        for value in self.stack.snapshot() {
            if matches!(value, Value::Local(_) | Value::Param(_)) && !vars.contains(&value) {
                vars.push(value);
            }
        }
        for var in &vars {
            self.spill(var);
        }
    }

    /// Pop call arguments, receiver first, coercing declared parameters
    fn pop_args(&mut self, method: &MethodRef, name: &'static str, index: usize) -> Result<Vec<Value>, CompileError> {
        let raw = self.stack.pop_n(method.arg_count(), name, index)?;
        let skip = usize::from(method.sig.has_this);
        let mut args = Vec::with_capacity(raw.len());
        for (i, arg) in raw.into_iter().enumerate() {
            match i.checked_sub(skip).and_then(|p| method.sig.params.get(p)) {
                Some(ty) => args.push(self.coerce(arg, ty)),
                None => args.push(arg),
            }
        }
        Ok(args)
    }

    fn diagnose(&mut self, kind: DiagnosticKind, index: usize, message: String) {
        self.diagnostics.push(Diagnostic::new(kind, index, message));
    }

    fn token(&self, instr: &Instruction) -> Result<Token, CompileError> {
        instr.token().ok_or_else(|| malformed(instr))
    }

    fn target(&self, instr: &Instruction) -> Result<usize, CompileError> {
        instr.target().ok_or_else(|| malformed(instr))
    }

    fn resolve_type(&mut self, instr: &Instruction) -> Result<TacType, CompileError> {
        let token = self.token(instr)?;
        let lookup = self.cx.registry.resolve_type(self.cx.resolver, self.cx.generics, token);
        if !lookup.resolved {
            self.diagnose(DiagnosticKind::UnresolvedType, instr.index, format!("type token {}", token));
        }
        Ok(lookup.value)
    }

    fn resolve_field(&mut self, instr: &Instruction) -> Result<Arc<FieldRef>, CompileError> {
        let token = self.token(instr)?;
        let lookup = self.cx.registry.resolve_field(self.cx.resolver, self.cx.generics, token);
        if !lookup.resolved {
            self.diagnose(DiagnosticKind::UnresolvedField, instr.index, format!("field token {}", token));
        }
        Ok(lookup.value)
    }

    fn resolve_method(&mut self, instr: &Instruction) -> Result<Arc<MethodRef>, CompileError> {
        let token = self.token(instr)?;
        let lookup = self
            .cx
            .registry
            .resolve_method(self.cx.resolver, self.cx.generics, token)
            .ok_or(CompileError::UnknownCallShape { token, index: instr.index })?;
        if !lookup.resolved {
            self.diagnose(
                DiagnosticKind::UnresolvedMethod,
                instr.index,
                format!("method token {}, using its call-site signature", token),
            );
        }
        Ok(lookup.value)
    }
}

fn malformed(instr: &Instruction) -> CompileError {
    CompileError::MalformedOperand { opcode: instr.opcode.name(), index: instr.index }
}

/// Slot encoded in a short-form opcode such as `ldloc.2`, relative to `base`
fn short_slot(opcode: Opcode, base: Opcode) -> u16 {
    u16::from(opcode.encoding().1 - base.encoding().1)
}

fn var_operand(instr: &Instruction) -> Result<u16, CompileError> {
    match instr.operand {
        Operand::Var(n) => Ok(n),
        _ => Err(malformed(instr)),
    }
}

/// Operator, overflow check and signedness of an arithmetic opcode
fn arithmetic(opcode: Opcode) -> Option<(BinaryOp, bool, bool)> {
    use Opcode::*;
    let entry = match opcode {
        Add => (BinaryOp::Add, false, false),
        AddOvf => (BinaryOp::Add, true, false),
        AddOvfUn => (BinaryOp::Add, true, true),
        Sub => (BinaryOp::Sub, false, false),
        SubOvf => (BinaryOp::Sub, true, false),
        SubOvfUn => (BinaryOp::Sub, true, true),
        Mul => (BinaryOp::Mul, false, false),
        MulOvf => (BinaryOp::Mul, true, false),
        MulOvfUn => (BinaryOp::Mul, true, true),
        Div => (BinaryOp::Div, false, false),
        DivUn => (BinaryOp::Div, false, true),
        Rem => (BinaryOp::Rem, false, false),
        RemUn => (BinaryOp::Rem, false, true),
        And => (BinaryOp::And, false, false),
        Or => (BinaryOp::Or, false, false),
        Xor => (BinaryOp::Xor, false, false),
        Shl => (BinaryOp::Shl, false, false),
        Shr => (BinaryOp::Shr, false, false),
        ShrUn => (BinaryOp::Shr, false, true),
        _ => return None,
    };
    Some(entry)
}

/// Target type, overflow check and source signedness of a conversion opcode
fn conversion(opcode: Opcode) -> Option<(TacType, bool, bool)> {
    use Opcode::*;
    let entry = match opcode {
        ConvI1 => (TacType::I1, false, false),
        ConvI2 => (TacType::I2, false, false),
        ConvI4 => (TacType::I4, false, false),
        ConvI8 => (TacType::I8, false, false),
        ConvR4 => (TacType::R4, false, false),
        ConvR8 => (TacType::R8, false, false),
        ConvU1 => (TacType::U1, false, false),
        ConvU2 => (TacType::U2, false, false),
        ConvU4 => (TacType::U4, false, false),
        ConvU8 => (TacType::U8, false, false),
        ConvI => (TacType::IntPtr, false, false),
        ConvU => (TacType::UIntPtr, false, false),
        ConvRUn => (TacType::R8, false, true),
        ConvOvfI1 => (TacType::I1, true, false),
        ConvOvfI2 => (TacType::I2, true, false),
        ConvOvfI4 => (TacType::I4, true, false),
        ConvOvfI8 => (TacType::I8, true, false),
        ConvOvfU1 => (TacType::U1, true, false),
        ConvOvfU2 => (TacType::U2, true, false),
        ConvOvfU4 => (TacType::U4, true, false),
        ConvOvfU8 => (TacType::U8, true, false),
        ConvOvfI => (TacType::IntPtr, true, false),
        ConvOvfU => (TacType::UIntPtr, true, false),
        ConvOvfI1Un => (TacType::I1, true, true),
        ConvOvfI2Un => (TacType::I2, true, true),
        ConvOvfI4Un => (TacType::I4, true, true),
        ConvOvfI8Un => (TacType::I8, true, true),
        ConvOvfU1Un => (TacType::U1, true, true),
        ConvOvfU2Un => (TacType::U2, true, true),
        ConvOvfU4Un => (TacType::U4, true, true),
        ConvOvfU8Un => (TacType::U8, true, true),
        ConvOvfIUn => (TacType::IntPtr, true, true),
        ConvOvfUUn => (TacType::UIntPtr, true, true),
        _ => return None,
    };
    Some(entry)
}

/// Comparison and signedness of a two-operand conditional branch
fn branch_comparison(opcode: Opcode) -> Option<(BinaryOp, bool)> {
    use Opcode::*;
    let entry = match opcode.long_form() {
        Beq => (BinaryOp::Eq, false),
        Bge => (BinaryOp::Ge, false),
        Bgt => (BinaryOp::Gt, false),
        Ble => (BinaryOp::Le, false),
        Blt => (BinaryOp::Lt, false),
        BneUn => (BinaryOp::Ne, true),
        BgeUn => (BinaryOp::Ge, true),
        BgtUn => (BinaryOp::Gt, true),
        BleUn => (BinaryOp::Le, true),
        BltUn => (BinaryOp::Lt, true),
        _ => return None,
    };
    Some(entry)
}

/// Fixed access type of typed `ldind`/`stind`; `None` for the `.ref` forms
fn indirect_type(opcode: Opcode) -> Option<TacType> {
    use Opcode::*;
    match opcode {
        LdindI1 | StindI1 => Some(TacType::I1),
        LdindU1 => Some(TacType::U1),
        LdindI2 | StindI2 => Some(TacType::I2),
        LdindU2 => Some(TacType::U2),
        LdindI4 | StindI4 => Some(TacType::I4),
        LdindU4 => Some(TacType::U4),
        LdindI8 | StindI8 => Some(TacType::I8),
        LdindI | StindI => Some(TacType::IntPtr),
        LdindR4 | StindR4 => Some(TacType::R4),
        LdindR8 | StindR8 => Some(TacType::R8),
        _ => None,
    }
}

/// Fixed element type of typed `ldelem`/`stelem`
fn element_type(opcode: Opcode) -> Option<TacType> {
    use Opcode::*;
    match opcode {
        LdelemI1 | StelemI1 => Some(TacType::I1),
        LdelemU1 => Some(TacType::U1),
        LdelemI2 | StelemI2 => Some(TacType::I2),
        LdelemU2 => Some(TacType::U2),
        LdelemI4 | StelemI4 => Some(TacType::I4),
        LdelemU4 => Some(TacType::U4),
        LdelemI8 | StelemI8 => Some(TacType::I8),
        LdelemI | StelemI => Some(TacType::IntPtr),
        LdelemR4 | StelemR4 => Some(TacType::R4),
        LdelemR8 | StelemR8 => Some(TacType::R8),
        _ => None,
    }
}

/// Element or pointee type, `object` when unknown
fn pointee(ty: &TacType) -> TacType {
    ty.element().cloned().unwrap_or(TacType::Object)
}

fn is_unmanaged_address(ty: &TacType) -> bool {
    (ty.category() == TypeCategory::Pointer && !ty.is_managed()) || matches!(ty, TacType::IntPtr | TacType::UIntPtr)
}

/// Result type of a binary operation
fn binary_type(op: BinaryOp, left: &TacType, right: &TacType) -> TacType {
    if op.is_comparison() {
        return TacType::Bool;
    }
    if op.is_shift() {
        return left.stack_type();
    }
    let wide = matches!(
        left,
        TacType::I4
            | TacType::U4
            | TacType::I8
            | TacType::U8
            | TacType::IntPtr
            | TacType::UIntPtr
            | TacType::R4
            | TacType::R8
    );
    if left == right && (wide || op.is_bitwise()) {
        return left.clone();
    }
    // Pointer arithmetic keeps the pointer type
    if left.is_pointer() && right.is_integer() {
        return left.clone();
    }
    if right.is_pointer() && left.is_integer() && op == BinaryOp::Add {
        return right.clone();
    }
    let (l, r) = (left.stack_type(), right.stack_type());
    if l == r {
        l
    } else {
        l.lub(&r)
    }
}

fn is_null_literal(value: &Value) -> bool {
    matches!(value, Value::Const(Constant::Null(_)))
}

/// Wider type two comparison operands meet at, `None` when they compare as is
fn comparison_type(left: &TacType, right: &TacType) -> Option<TacType> {
    if left == right {
        return None;
    }
    if left.is_float() && right.is_float() {
        return Some(TacType::R8);
    }
    match (left.stack_type(), right.stack_type()) {
        (TacType::IntPtr, TacType::I4) | (TacType::I4, TacType::IntPtr) => Some(TacType::IntPtr),
        _ => None,
    }
}

/// Value a `brtrue`/`brfalse` operand of type `ty` is compared against
fn falsy(ty: &TacType) -> Constant {
    if ty.is_reference() || ty.is_pointer() || ty.is_generic_param() {
        return Constant::Null(ty.clone());
    }
    match ty {
        TacType::Bool => Constant::Bool(false),
        TacType::R4 => Constant::R4(0.0),
        TacType::R8 => Constant::R8(0.0),
        other => match other.stack_type() {
            TacType::I8 => Constant::I8(0),
            _ => Constant::I4(0),
        },
    }
}

fn needs_cast(from: &TacType, to: &TacType) -> bool {
    if from == to || from.is_generic_param() || to.is_generic_param() {
        return false;
    }
    if matches!(from, TacType::Unknown | TacType::Null) || *to == TacType::Unknown {
        return false;
    }
    !(*to == TacType::Object && from.is_reference())
}

/// Handler scope with the smallest handler range containing `index`
fn innermost_handler(scopes: &[EhScope], index: usize) -> Option<&EhScope> {
    scopes
        .iter()
        .filter(|s| s.in_handler(index) && matches!(s.kind, ScopeKind::Finally | ScopeKind::Fault))
        .min_by_key(|s| s.handler_end - s.handler_begin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cil_bytecode::{InstructionStream, Opcode as Op};

    use crate::analysis::build_cfg;
    use crate::metadata::{MetadataTable, MethodSig};

    struct Fixture {
        table: MetadataTable,
        registry: MetadataRegistry,
        generics: GenericContext,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                table: MetadataTable::new(),
                registry: MetadataRegistry::new(),
                generics: GenericContext::default(),
            }
        }

        fn run(
            &self,
            ops: Vec<(Op, Operand)>,
            vars: &mut Variables,
            entry: Vec<Value>,
            return_type: TacType,
        ) -> Result<BlockOutput, CompileError> {
            let stream = InstructionStream::from_ops(ops);
            let cfg = build_cfg(&stream, &[]).unwrap();
            let cx = TranslationContext {
                resolver: &self.table,
                registry: &self.registry,
                generics: &self.generics,
                return_type,
                scopes: &[],
                inline_array_initializers: true,
            };
            let mut temps = Vec::new();
            translate_block(&cx, stream.as_slice(), &cfg.blocks[0], entry, vars, &mut temps)
        }
    }

    #[test]
    fn test_add_materializes_temp() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::I4], vec![TacType::I4]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::LdcI4_1, Operand::None),
                    (Op::Add, Operand::None),
                    (Op::Stloc0, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        let text: Vec<String> = out.stmts.iter().map(|s| s.to_string()).collect();
        assert_eq!(text, vec!["t0 = a0 + 1", "l0 = t0", "return"]);
        assert_eq!(vars.temps, vec![TacType::I4]);
    }

    #[test]
    fn test_null_is_retyped_at_store() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::String], vec![]);
        let out = fx
            .run(
                vec![(Op::Ldnull, Operand::None), (Op::Stloc0, Operand::None), (Op::Ret, Operand::None)],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(
            out.stmts[0],
            Stmt::assign(Value::Local(0), Expr::Value(Value::Const(Constant::Null(TacType::String))))
        );
    }

    #[test]
    fn test_store_to_narrower_local_casts() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::U1], vec![TacType::I4]);
        let out = fx
            .run(
                vec![(Op::Ldarg0, Operand::None), (Op::Stloc0, Operand::None), (Op::Ret, Operand::None)],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert!(matches!(
            &out.stmts[0],
            Stmt::Assign { rhs: Expr::Cast { to: TacType::U1, checked: false, .. }, .. }
        ));
    }

    #[test]
    fn test_brtrue_on_reference_compares_with_null() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::Object]);
        let out = fx
            .run(
                vec![(Op::Ldarg0, Operand::None), (Op::Brtrue, Operand::Target(0)), (Op::Ret, Operand::None)],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(
            out.stmts,
            vec![Stmt::If {
                cond: Condition::new(BinaryOp::Ne, Value::Param(0), Value::Const(Constant::Null(TacType::Object))),
                target: 0,
            }]
        );
    }

    #[test]
    fn test_brfalse_on_bool_compares_with_false() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::Bool]);
        let out = fx
            .run(
                vec![(Op::Ldarg0, Operand::None), (Op::Brfalse, Operand::Target(0)), (Op::Ret, Operand::None)],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(out.stmts[0].to_string(), "if a0 == false goto 0");
    }

    #[test]
    fn test_stloc_spills_stale_read() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::I4], vec![]);
        let out = fx
            .run(
                vec![
                    (Op::Ldloc0, Operand::None),
                    (Op::LdcI4_5, Operand::None),
                    (Op::Stloc0, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::I4,
            )
            .unwrap();
        let text: Vec<String> = out.stmts.iter().map(|s| s.to_string()).collect();
        assert_eq!(text, vec!["t0 = l0", "l0 = 5", "return t0"]);
    }

    #[test]
    fn test_unbalanced_return() {
        let fx = Fixture::new();
        let mut vars = Variables::default();
        let err = fx
            .run(vec![(Op::LdcI4_1, Operand::None), (Op::Ret, Operand::None)], &mut vars, vec![], TacType::Void)
            .unwrap_err();
        assert_eq!(err, CompileError::UnbalancedStack { opcode: "ret", index: 1, depth: 1 });
    }

    #[test]
    fn test_unsupported_opcode_reports_position() {
        let fx = Fixture::new();
        let mut vars = Variables::default();
        let err = fx
            .run(
                vec![
                    (Op::Nop, Operand::None),
                    (Op::Localloc, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![Value::Const(Constant::I4(8))],
                TacType::Void,
            )
            .unwrap_err();
        assert_eq!(err, CompileError::UnsupportedOpcode { opcode: "localloc", index: 1, offset: 1 });
    }

    #[test]
    fn test_unresolved_field_degrades() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::Object]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::Ldfld, Operand::Token(Token::new(Token::FIELD, 42))),
                    (Op::Pop, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::UnresolvedField);
        assert_eq!(vars.temps, vec![TacType::Unknown]);
    }

    #[test]
    fn test_call_coerces_arguments() {
        let mut fx = Fixture::new();
        let callee = fx.table.add_method(MethodRef::new(
            TacType::class("Console"),
            "Write",
            MethodSig::new(false, vec![TacType::Object, TacType::Bool], TacType::Void),
        ));
        let mut vars = Variables::new(vec![], vec![TacType::String]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::LdcI4_1, Operand::None),
                    (Op::Call, Operand::Token(callee)),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(out.stmts[0].to_string(), "call Console::Write(a0, true)");
    }

    fn lines(out: &BlockOutput) -> Vec<String> {
        out.stmts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_float_compared_with_double_widens() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::Bool], vec![TacType::R4]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::LdcR8, Operand::Float64(0.1)),
                    (Op::Ceq, Operand::None),
                    (Op::Stloc0, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(lines(&out), vec!["t0 = conv(double, a0)", "t1 = t0 == 0.1d", "l0 = t1", "return"]);
    }

    #[test]
    fn test_bool_compared_with_int_literal_keeps_literal() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::Bool], vec![TacType::Bool]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::LdcI4_2, Operand::None),
                    (Op::Cgt, Operand::None),
                    (Op::Stloc0, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(
            out.stmts[0],
            Stmt::assign(
                Value::Temp(0),
                Expr::Binary {
                    op: BinaryOp::Gt,
                    left: Value::Param(0),
                    right: Value::Const(Constant::I4(2)),
                    checked: false,
                    unsigned: false,
                    ty: TacType::Bool,
                }
            )
        );
    }

    #[test]
    fn test_unsigned_compare_of_double_and_float() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::Bool], vec![TacType::R8, TacType::R4]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::Ldarg1, Operand::None),
                    (Op::CgtUn, Operand::None),
                    (Op::Stloc0, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(lines(&out), vec!["t0 = conv(double, a1)", "t1 = a0 >.un t0", "l0 = t1", "return"]);
    }

    #[test]
    fn test_branch_on_null_takes_reference_type() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::String]);
        let out = fx
            .run(
                vec![
                    (Op::Ldnull, Operand::None),
                    (Op::Ldarg0, Operand::None),
                    (Op::Beq, Operand::Target(0)),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(
            out.stmts,
            vec![Stmt::If {
                cond: Condition {
                    op: BinaryOp::Eq,
                    left: Value::Const(Constant::Null(TacType::String)),
                    right: Value::Param(0),
                    unsigned: false,
                },
                target: 0,
            }]
        );
    }

    #[test]
    fn test_unsigned_branch_on_reference_and_null() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::Object]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::Ldnull, Operand::None),
                    (Op::BneUn, Operand::Target(0)),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(
            out.stmts,
            vec![Stmt::If {
                cond: Condition {
                    op: BinaryOp::Ne,
                    left: Value::Param(0),
                    right: Value::Const(Constant::Null(TacType::Object)),
                    unsigned: true,
                },
                target: 0,
            }]
        );
    }

    #[test]
    fn test_native_int_branch_widens_int32() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::IntPtr, TacType::I4]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::Ldarg1, Operand::None),
                    (Op::BltUn, Operand::Target(0)),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(out.stmts[0].to_string(), "t0 = conv(nint, a1)");
        assert_eq!(
            out.stmts[1],
            Stmt::If {
                cond: Condition { op: BinaryOp::Lt, left: Value::Param(0), right: Value::Temp(0), unsigned: true },
                target: 0,
            }
        );
        assert_eq!(vars.temps, vec![TacType::IntPtr]);
    }

    #[test]
    fn test_same_stack_type_compares_without_casts() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::U1, TacType::I4]);
        let out = fx
            .run(
                vec![
                    (Op::Ldarg0, Operand::None),
                    (Op::Ldarg1, Operand::None),
                    (Op::Bge, Operand::Target(0)),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(lines(&out), vec!["if a0 >= a1 goto 0"]);
    }

    #[test]
    fn test_indirect_store_spills_stale_reads() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![TacType::I4, TacType::I4.by_ref(), TacType::I4], vec![]);
        let out = fx
            .run(
                vec![
                    (Op::LdlocaS, Operand::Var(0)),
                    (Op::Stloc1, Operand::None),
                    (Op::Ldloc0, Operand::None),
                    (Op::Ldloc1, Operand::None),
                    (Op::LdcI4_5, Operand::None),
                    (Op::StindI4, Operand::None),
                    (Op::Stloc2, Operand::None),
                    (Op::Ret, Operand::None),
                ],
                &mut vars,
                vec![],
                TacType::Void,
            )
            .unwrap();
        assert_eq!(lines(&out), vec!["t0 = &l0", "l1 = t0", "t1 = l0", "*l1 = 5", "l2 = t1", "return"]);
    }

    #[test]
    fn test_retranslation_reuses_temps() {
        let fx = Fixture::new();
        let mut vars = Variables::new(vec![], vec![TacType::I4]);
        let stream = InstructionStream::from_ops(vec![
            (Op::Ldarg0, Operand::None),
            (Op::Dup, Operand::None),
            (Op::Mul, Operand::None),
            (Op::Ret, Operand::None),
        ]);
        let cfg = build_cfg(&stream, &[]).unwrap();
        let cx = TranslationContext {
            resolver: &fx.table,
            registry: &fx.registry,
            generics: &fx.generics,
            return_type: TacType::I4,
            scopes: &[],
            inline_array_initializers: true,
        };
        let mut temps = Vec::new();
        let first = translate_block(&cx, stream.as_slice(), &cfg.blocks[0], vec![], &mut vars, &mut temps).unwrap();
        let second = translate_block(&cx, stream.as_slice(), &cfg.blocks[0], vec![], &mut vars, &mut temps).unwrap();
        assert_eq!(first, second);
        assert_eq!(vars.temps.len(), 1);
    }
}
