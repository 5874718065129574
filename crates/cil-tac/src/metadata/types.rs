//! Static types of TAC values

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Classification used to pick reference and dereference representations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeCategory {
    /// Built-in numeric, boolean or character type
    Primitive,
    /// Enumeration backed by a primitive
    Enum,
    /// User-defined value type
    Struct,
    /// Single-dimensional array
    Array,
    /// Reference type
    Class,
    /// Managed or unmanaged pointer
    Pointer,
}

/// Shape of a named type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum NamedKind {
    /// Reference type
    Class,
    /// Value type
    Struct,
    /// Enumeration with its underlying primitive
    Enum(TacType),
}

/// A type defined in metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NamedType {
    /// Fully qualified name
    pub name: String,
    /// Class, struct or enum
    pub kind: NamedKind,
    /// Instantiation arguments for generic types
    pub generic_args: Vec<TacType>,
}

/// Static type of a TAC value or expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum TacType {
    /// No value
    Void,
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    /// Native int
    IntPtr,
    /// Native unsigned int
    UIntPtr,
    R4,
    R8,
    String,
    Object,
    /// Class, struct or enum from metadata
    Named(Arc<NamedType>),
    /// Single-dimensional, zero-based array
    Array(Box<TacType>),
    /// Unmanaged pointer
    Pointer(Box<TacType>),
    /// Managed reference
    ByRef(Box<TacType>),
    /// Generic parameter of the declaring type
    TypeVar(u16),
    /// Generic parameter of the method
    MethodVar(u16),
    /// Type of `ldnull` before it reaches a typed sink
    Null,
    /// Runtime type, field or method handle
    RuntimeHandle,
    /// Placeholder for metadata that could not be resolved
    Unknown,
}

/// Generic arguments in scope for token resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct GenericContext {
    /// Arguments of the declaring type
    pub type_args: Vec<TacType>,
    /// Arguments of the method
    pub method_args: Vec<TacType>,
}

impl GenericContext {
    /// Whether no generic arguments are in scope
    pub fn is_empty(&self) -> bool {
        self.type_args.is_empty() && self.method_args.is_empty()
    }
}

impl TacType {
    /// Build a reference type
    pub fn class(name: impl Into<String>) -> Self {
        TacType::Named(Arc::new(NamedType {
            name: name.into(),
            kind: NamedKind::Class,
            generic_args: Vec::new(),
        }))
    }

    /// Build a value type
    pub fn value_type(name: impl Into<String>) -> Self {
        TacType::Named(Arc::new(NamedType {
            name: name.into(),
            kind: NamedKind::Struct,
            generic_args: Vec::new(),
        }))
    }

    /// Build an enum type over `underlying`
    pub fn enumeration(name: impl Into<String>, underlying: TacType) -> Self {
        TacType::Named(Arc::new(NamedType {
            name: name.into(),
            kind: NamedKind::Enum(underlying),
            generic_args: Vec::new(),
        }))
    }

    /// Array of `self`
    pub fn array_of(self) -> Self {
        TacType::Array(Box::new(self))
    }

    /// Managed reference to `self`
    pub fn by_ref(self) -> Self {
        TacType::ByRef(Box::new(self))
    }

    /// Unmanaged pointer to `self`
    pub fn pointer_to(self) -> Self {
        TacType::Pointer(Box::new(self))
    }

    /// Classify the type
    pub fn category(&self) -> TypeCategory {
        match self {
            TacType::Bool | TacType::Char
            | TacType::I1 | TacType::U1 | TacType::I2 | TacType::U2
            | TacType::I4 | TacType::U4 | TacType::I8 | TacType::U8
            | TacType::IntPtr | TacType::UIntPtr | TacType::R4 | TacType::R8 => TypeCategory::Primitive,
            TacType::Named(n) => match n.kind {
                NamedKind::Class => TypeCategory::Class,
                NamedKind::Struct => TypeCategory::Struct,
                NamedKind::Enum(_) => TypeCategory::Enum,
            },
            TacType::Array(_) => TypeCategory::Array,
            TacType::Pointer(_) | TacType::ByRef(_) => TypeCategory::Pointer,
            TacType::Void | TacType::String | TacType::Object | TacType::TypeVar(_)
            | TacType::MethodVar(_) | TacType::Null | TacType::RuntimeHandle
            | TacType::Unknown => TypeCategory::Class,
        }
    }

    /// Whether values of this type are tracked by the garbage collector.
    ///
    /// Unmanaged pointers and native integers are not; managed references
    /// and object references are.
    pub fn is_managed(&self) -> bool {
        match self {
            TacType::Pointer(_) | TacType::IntPtr | TacType::UIntPtr => false,
            TacType::ByRef(_) => true,
            other => other.is_reference(),
        }
    }

    /// Whether this is an object reference (including `null`)
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TacType::String | TacType::Object | TacType::Array(_) | TacType::Null
        ) || matches!(self, TacType::Named(n) if n.kind == NamedKind::Class)
    }

    /// Whether this is a pointer of either kind
    pub fn is_pointer(&self) -> bool {
        matches!(self, TacType::Pointer(_) | TacType::ByRef(_))
    }

    /// Whether this is an integer type (including bool and char)
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TacType::Bool | TacType::Char
                | TacType::I1 | TacType::U1 | TacType::I2 | TacType::U2
                | TacType::I4 | TacType::U4 | TacType::I8 | TacType::U8
                | TacType::IntPtr | TacType::UIntPtr
        )
    }

    /// Whether this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, TacType::R4 | TacType::R8)
    }

    /// Whether this type is an open generic parameter
    pub fn is_generic_param(&self) -> bool {
        matches!(self, TacType::TypeVar(_) | TacType::MethodVar(_))
    }

    /// Element type of arrays and pointee type of pointers
    pub fn element(&self) -> Option<&TacType> {
        match self {
            TacType::Array(e) | TacType::Pointer(e) | TacType::ByRef(e) => Some(e),
            _ => None,
        }
    }

    /// Type as it appears on the evaluation stack.
    ///
    /// Small integers widen to `I4`, enums to their underlying stack type.
    pub fn stack_type(&self) -> TacType {
        match self {
            TacType::Bool | TacType::Char
            | TacType::I1 | TacType::U1 | TacType::I2 | TacType::U2
            | TacType::I4 | TacType::U4 => TacType::I4,
            TacType::I8 | TacType::U8 => TacType::I8,
            TacType::UIntPtr | TacType::IntPtr => TacType::IntPtr,
            TacType::R4 | TacType::R8 => TacType::R8,
            TacType::Named(n) => match &n.kind {
                NamedKind::Enum(underlying) => underlying.stack_type(),
                _ => self.clone(),
            },
            other => other.clone(),
        }
    }

    /// Least upper bound of two types meeting at a join point
    pub fn lub(&self, other: &TacType) -> TacType {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (TacType::Unknown, _) | (_, TacType::Unknown) => TacType::Unknown,
            (TacType::Null, t) | (t, TacType::Null) if t.is_reference() || t.is_pointer() => t.clone(),
            (a, b) if a.is_reference() && b.is_reference() => TacType::Object,
            (a, b) if a.is_pointer() && b.is_pointer() => TacType::IntPtr,
            _ => {
                let (a, b) = (self.stack_type(), other.stack_type());
                if a == b {
                    return a;
                }
                match (a, b) {
                    (TacType::IntPtr, t) | (t, TacType::IntPtr) if t.is_integer() => TacType::IntPtr,
                    _ => TacType::Unknown,
                }
            }
        }
    }

    /// Replace generic parameters with the arguments in `ctx`.
    ///
    /// Parameters without a corresponding argument are left open.
    pub fn substitute(&self, ctx: &GenericContext) -> TacType {
        match self {
            TacType::TypeVar(i) => ctx.type_args.get(*i as usize).cloned().unwrap_or_else(|| self.clone()),
            TacType::MethodVar(i) => ctx.method_args.get(*i as usize).cloned().unwrap_or_else(|| self.clone()),
            TacType::Array(e) => TacType::Array(Box::new(e.substitute(ctx))),
            TacType::Pointer(e) => TacType::Pointer(Box::new(e.substitute(ctx))),
            TacType::ByRef(e) => TacType::ByRef(Box::new(e.substitute(ctx))),
            TacType::Named(n) if !n.generic_args.is_empty() => TacType::Named(Arc::new(NamedType {
                name: n.name.clone(),
                kind: n.kind.clone(),
                generic_args: n.generic_args.iter().map(|a| a.substitute(ctx)).collect(),
            })),
            other => other.clone(),
        }
    }
}

impl fmt::Display for TacType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TacType::Void => write!(f, "void"),
            TacType::Bool => write!(f, "bool"),
            TacType::Char => write!(f, "char"),
            TacType::I1 => write!(f, "sbyte"),
            TacType::U1 => write!(f, "byte"),
            TacType::I2 => write!(f, "short"),
            TacType::U2 => write!(f, "ushort"),
            TacType::I4 => write!(f, "int"),
            TacType::U4 => write!(f, "uint"),
            TacType::I8 => write!(f, "long"),
            TacType::U8 => write!(f, "ulong"),
            TacType::IntPtr => write!(f, "nint"),
            TacType::UIntPtr => write!(f, "nuint"),
            TacType::R4 => write!(f, "float"),
            TacType::R8 => write!(f, "double"),
            TacType::String => write!(f, "string"),
            TacType::Object => write!(f, "object"),
            TacType::Named(n) => {
                write!(f, "{}", n.name)?;
                if !n.generic_args.is_empty() {
                    write!(f, "<")?;
                    for (i, a) in n.generic_args.iter().enumerate() {
                        if i > 0 { write!(f, ", ")?; }
                        write!(f, "{}", a)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TacType::Array(e) => write!(f, "{}[]", e),
            TacType::Pointer(e) => write!(f, "{}*", e),
            TacType::ByRef(e) => write!(f, "{}&", e),
            TacType::TypeVar(i) => write!(f, "!{}", i),
            TacType::MethodVar(i) => write!(f, "!!{}", i),
            TacType::Null => write!(f, "null"),
            TacType::RuntimeHandle => write!(f, "handle"),
            TacType::Unknown => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category() {
        assert_eq!(TacType::I4.category(), TypeCategory::Primitive);
        assert_eq!(TacType::class("System.Exception").category(), TypeCategory::Class);
        assert_eq!(TacType::value_type("Point").category(), TypeCategory::Struct);
        assert_eq!(TacType::enumeration("Color", TacType::I4).category(), TypeCategory::Enum);
        assert_eq!(TacType::I4.array_of().category(), TypeCategory::Array);
        assert_eq!(TacType::I4.by_ref().category(), TypeCategory::Pointer);
    }

    #[test]
    fn test_is_managed() {
        assert!(TacType::I4.by_ref().is_managed());
        assert!(!TacType::I4.pointer_to().is_managed());
        assert!(TacType::String.is_managed());
        assert!(!TacType::I4.is_managed());
    }

    #[test]
    fn test_lub_integers() {
        assert_eq!(TacType::I4.lub(&TacType::I4), TacType::I4);
        assert_eq!(TacType::Bool.lub(&TacType::I4), TacType::I4);
        assert_eq!(TacType::I2.lub(&TacType::U1), TacType::I4);
        assert_eq!(TacType::I8.lub(&TacType::U8), TacType::I8);
        assert_eq!(TacType::R4.lub(&TacType::R8), TacType::R8);
        assert_eq!(TacType::I4.lub(&TacType::I8), TacType::Unknown);
    }

    #[test]
    fn test_lub_references() {
        let ex = TacType::class("System.Exception");
        assert_eq!(TacType::Null.lub(&TacType::String), TacType::String);
        assert_eq!(ex.lub(&TacType::Null), ex);
        assert_eq!(TacType::String.lub(&ex), TacType::Object);
        assert_eq!(TacType::I4.lub(&TacType::String), TacType::Unknown);
    }

    #[test]
    fn test_substitute() {
        let ctx = GenericContext { type_args: vec![TacType::String], method_args: vec![TacType::I8] };
        assert_eq!(TacType::TypeVar(0).array_of().substitute(&ctx), TacType::String.array_of());
        assert_eq!(TacType::MethodVar(0).substitute(&ctx), TacType::I8);
        assert_eq!(TacType::MethodVar(3).substitute(&ctx), TacType::MethodVar(3));
    }

    #[test]
    fn test_display() {
        assert_eq!(TacType::I4.array_of().to_string(), "int[]");
        assert_eq!(TacType::value_type("Point").by_ref().to_string(), "Point&");
        assert_eq!(TacType::MethodVar(1).to_string(), "!!1");
    }
}
