//! Array-initializer inlining
//!
//! Compilers initialize constant arrays with
//! `newarr T; dup; ldtoken <rva field>; call RuntimeHelpers::InitializeArray`.
//! When the shape matches, the call is replaced by one constant store per
//! element so later passes see the actual values.

use crate::ir::{Constant, Expr, LValue, RuntimeHandle, Stmt, Value, Variables};
use crate::metadata::{MethodRef, NamedKind, TacType};

/// Whether `method` is `RuntimeHelpers.InitializeArray`
pub fn is_initialize_array(method: &MethodRef) -> bool {
    method.name == "InitializeArray"
        && matches!(&method.declaring_type, TacType::Named(n) if n.name.ends_with("RuntimeHelpers"))
}

/// Build the element stores replacing an `InitializeArray(array, handle)`
/// call, looking up the definitions of both arguments in `stmts`.
///
/// Returns the reason on any shape mismatch.
pub fn expand(stmts: &[Stmt], vars: &Variables, args: &[Value]) -> Result<Vec<Stmt>, String> {
    let [array, handle] = args else {
        return Err(format!("expected two arguments, found {}", args.len()));
    };

    let (elem, length) = match definition(stmts, array) {
        Some(Expr::NewArray { elem, length: Value::Const(Constant::I4(n)) }) if *n >= 0 => (elem.clone(), *n as usize),
        Some(Expr::NewArray { .. }) => return Err(format!("array {} has no constant length", array)),
        _ => return Err(format!("{} is not a fresh array", array)),
    };
    if vars.type_of(array) != elem.clone().array_of() {
        return Err(format!("{} does not hold a {} array", array, elem));
    }

    let data = match definition(stmts, handle) {
        Some(Expr::LoadToken(RuntimeHandle::Field(field))) => match &field.initial_data {
            Some(data) => data,
            None => return Err(format!("field {} has no initial data", field)),
        },
        _ => return Err(format!("{} is not a field handle", handle)),
    };

    let size = element_size(&elem).ok_or_else(|| format!("element type {} is not primitive", elem))?;
    if data.len() < size * length {
        return Err(format!("initial data holds {} bytes, {} needed", data.len(), size * length));
    }

    let stores = data
        .chunks_exact(size)
        .take(length)
        .enumerate()
        .filter_map(|(i, bytes)| {
            let value = decode_element(&elem, bytes)?;
            Some(Stmt::Assign {
                lhs: LValue::ArrayElem {
                    array: array.clone(),
                    index: Value::Const(Constant::I4(i as i32)),
                    elem: elem.clone(),
                },
                rhs: Expr::Value(Value::Const(value)),
            })
        })
        .collect();
    Ok(stores)
}

/// Most recent assignment to `value` in the statement list
fn definition<'s>(stmts: &'s [Stmt], value: &Value) -> Option<&'s Expr> {
    stmts.iter().rev().find_map(|stmt| match stmt {
        Stmt::Assign { lhs: LValue::Var(v), rhs } if v == value => Some(rhs),
        _ => None,
    })
}

fn element_size(elem: &TacType) -> Option<usize> {
    match elem {
        TacType::Bool | TacType::I1 | TacType::U1 => Some(1),
        TacType::Char | TacType::I2 | TacType::U2 => Some(2),
        TacType::I4 | TacType::U4 | TacType::R4 => Some(4),
        TacType::I8 | TacType::U8 | TacType::R8 => Some(8),
        TacType::Named(n) => match &n.kind {
            NamedKind::Enum(underlying) => element_size(underlying),
            _ => None,
        },
        _ => None,
    }
}

/// Decode one little-endian element; `bytes` has exactly the element size
fn decode_element(elem: &TacType, bytes: &[u8]) -> Option<Constant> {
    let constant = match elem {
        TacType::Bool => Constant::Bool(bytes[0] != 0),
        TacType::I1 => Constant::I4(bytes[0] as i8 as i32),
        TacType::U1 => Constant::I4(bytes[0] as i32),
        TacType::I2 => Constant::I4(i16::from_le_bytes(bytes.try_into().ok()?) as i32),
        TacType::Char | TacType::U2 => Constant::I4(u16::from_le_bytes(bytes.try_into().ok()?) as i32),
        TacType::I4 | TacType::U4 => Constant::I4(i32::from_le_bytes(bytes.try_into().ok()?)),
        TacType::I8 | TacType::U8 => Constant::I8(i64::from_le_bytes(bytes.try_into().ok()?)),
        TacType::R4 => Constant::R4(f32::from_le_bytes(bytes.try_into().ok()?)),
        TacType::R8 => Constant::R8(f64::from_le_bytes(bytes.try_into().ok()?)),
        TacType::Named(n) => match &n.kind {
            NamedKind::Enum(underlying) => return decode_element(underlying, bytes),
            _ => return None,
        },
        _ => return None,
    };
    Some(constant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::metadata::FieldRef;

    fn setup(data: Vec<u8>, length: i32) -> (Vec<Stmt>, Variables) {
        let mut vars = Variables::default();
        let arr = vars.new_temp(TacType::I2.array_of());
        let tok = vars.new_temp(TacType::RuntimeHandle);
        let field = FieldRef::new(TacType::class("<PrivateImplementationDetails>"), "blob", TacType::Unknown, true)
            .with_initial_data(data);
        let stmts = vec![
            Stmt::assign(
                Value::Temp(arr),
                Expr::NewArray { elem: TacType::I2, length: Value::Const(Constant::I4(length)) },
            ),
            Stmt::assign(Value::Temp(tok), Expr::LoadToken(RuntimeHandle::Field(Arc::new(field)))),
        ];
        (stmts, vars)
    }

    #[test]
    fn test_expand_short_array() {
        let (stmts, vars) = setup(vec![1, 0, 0xFF, 0xFF, 7, 0], 3);
        let stores = expand(&stmts, &vars, &[Value::Temp(0), Value::Temp(1)]).unwrap();
        assert_eq!(stores.len(), 3);
        assert_eq!(
            stores[1],
            Stmt::Assign {
                lhs: LValue::ArrayElem {
                    array: Value::Temp(0),
                    index: Value::Const(Constant::I4(1)),
                    elem: TacType::I2,
                },
                rhs: Expr::Value(Value::Const(Constant::I4(-1))),
            }
        );
    }

    #[test]
    fn test_short_data_is_rejected() {
        let (stmts, vars) = setup(vec![1, 0], 3);
        let err = expand(&stmts, &vars, &[Value::Temp(0), Value::Temp(1)]).unwrap_err();
        assert!(err.contains("2 bytes"), "{}", err);
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        let (stmts, vars) = setup(vec![], 0);
        assert!(expand(&stmts, &vars, &[Value::Temp(0)]).is_err());
    }
}
