//! Resolved fields, methods and signatures

use std::fmt;

use serde::Serialize;

use super::types::{GenericContext, TacType};

/// A resolved field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldRef {
    /// Simple name
    pub name: String,
    /// Type that declares the field
    pub declaring_type: TacType,
    /// Declared type of the field
    pub field_type: TacType,
    /// Whether the field is static
    pub is_static: bool,
    /// Initial data for fields mapped to an RVA (array initializer blobs)
    #[serde(skip)]
    pub initial_data: Option<Vec<u8>>,
    /// Set on the sentinel produced for an unresolvable token
    pub unknown: bool,
}

impl FieldRef {
    /// Build a field
    pub fn new(declaring_type: TacType, name: impl Into<String>, field_type: TacType, is_static: bool) -> Self {
        FieldRef {
            name: name.into(),
            declaring_type,
            field_type,
            is_static,
            initial_data: None,
            unknown: false,
        }
    }

    /// Attach RVA initial data
    pub fn with_initial_data(mut self, data: Vec<u8>) -> Self {
        self.initial_data = Some(data);
        self
    }

    /// Sentinel for an unresolvable field token
    pub fn unknown(description: impl fmt::Display) -> Self {
        FieldRef {
            name: format!("<unknown field {}>", description),
            declaring_type: TacType::Unknown,
            field_type: TacType::Unknown,
            is_static: false,
            initial_data: None,
            unknown: true,
        }
    }

    /// Apply generic arguments to the declared types
    pub fn substitute(&self, ctx: &GenericContext) -> Self {
        FieldRef {
            declaring_type: self.declaring_type.substitute(ctx),
            field_type: self.field_type.substitute(ctx),
            ..self.clone()
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unknown {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}::{}", self.declaring_type, self.name)
        }
    }
}

/// Call-site signature: enough to know the stack effect of a call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MethodSig {
    /// Whether an implicit receiver is passed
    pub has_this: bool,
    /// Parameter types, excluding the receiver
    pub params: Vec<TacType>,
    /// Return type (`Void` for none)
    pub return_type: TacType,
}

impl MethodSig {
    /// Build a signature
    pub fn new(has_this: bool, params: Vec<TacType>, return_type: TacType) -> Self {
        MethodSig { has_this, params, return_type }
    }
}

/// A resolved method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MethodRef {
    /// Simple name (`.ctor` for constructors)
    pub name: String,
    /// Type that declares the method
    pub declaring_type: TacType,
    /// Signature
    pub sig: MethodSig,
    /// Set when only the call-site signature could be resolved
    pub unknown: bool,
}

impl MethodRef {
    /// Build a method
    pub fn new(declaring_type: TacType, name: impl Into<String>, sig: MethodSig) -> Self {
        MethodRef { name: name.into(), declaring_type, sig, unknown: false }
    }

    /// Sentinel built from a call-site signature when the member itself is unresolvable
    pub fn from_signature(description: impl fmt::Display, sig: MethodSig) -> Self {
        MethodRef {
            name: format!("<unknown method {}>", description),
            declaring_type: TacType::Unknown,
            sig,
            unknown: true,
        }
    }

    /// Whether this is an instance constructor
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    /// Number of stack values a call consumes, receiver included
    pub fn arg_count(&self) -> usize {
        self.sig.params.len() + usize::from(self.sig.has_this)
    }

    /// Apply generic arguments to the signature
    pub fn substitute(&self, ctx: &GenericContext) -> Self {
        MethodRef {
            declaring_type: self.declaring_type.substitute(ctx),
            sig: MethodSig {
                has_this: self.sig.has_this,
                params: self.sig.params.iter().map(|p| p.substitute(ctx)).collect(),
                return_type: self.sig.return_type.substitute(ctx),
            },
            ..self.clone()
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unknown {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}::{}", self.declaring_type, self.name)
        }
    }
}
