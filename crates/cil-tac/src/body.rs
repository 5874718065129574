//! Method bodies as handed to the compiler

use std::sync::Arc;

use cil_bytecode::{RawEhClause, Token};
use rustc_hash::FxHashMap;

use crate::error::ProviderError;
use crate::metadata::{GenericContext, MethodRef, TacType, TypeCategory};

/// Raw IL body of a method
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Encoded instructions
    pub code: Vec<u8>,
    /// Declared maximum stack depth
    pub max_stack: u16,
    /// Exception clauses in byte offsets
    pub clauses: Vec<RawEhClause>,
    /// Local variable types in declaration order
    pub locals: Vec<TacType>,
}

/// Everything needed to compile one method
#[derive(Debug, Clone)]
pub struct MethodSource {
    /// The method being compiled
    pub method: Arc<MethodRef>,
    /// Generic arguments in scope for its tokens
    pub generics: GenericContext,
    pub body: MethodBody,
}

impl MethodSource {
    pub fn new(method: MethodRef, body: MethodBody) -> Self {
        MethodSource { method: Arc::new(method), generics: GenericContext::default(), body }
    }

    /// Parameter types in argument order.
    ///
    /// Instance methods get the receiver at index 0; value-type receivers
    /// are passed by managed reference.
    pub fn param_types(&self) -> Vec<TacType> {
        let sig = &self.method.sig;
        let mut params = Vec::with_capacity(sig.params.len() + 1);
        if sig.has_this {
            let this = self.method.declaring_type.substitute(&self.generics);
            params.push(match this.category() {
                TypeCategory::Struct | TypeCategory::Enum | TypeCategory::Primitive => this.by_ref(),
                _ => this,
            });
        }
        params.extend(sig.params.iter().map(|p| p.substitute(&self.generics)));
        params
    }

    /// Declared return type
    pub fn return_type(&self) -> TacType {
        self.method.sig.return_type.substitute(&self.generics)
    }

    /// Display name used in output and logs
    pub fn display_name(&self) -> String {
        self.method.to_string()
    }
}

/// Source of method bodies by token
pub trait MethodBodyProvider: Send + Sync {
    /// Body and signature of the method behind `token`
    fn method_source(&self, token: Token) -> Result<MethodSource, ProviderError>;
}

/// Provider over a fixed set of bodies
#[derive(Debug, Default, Clone)]
pub struct InMemoryProvider {
    methods: FxHashMap<Token, MethodSource>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method body under `token`
    pub fn insert(&mut self, token: Token, source: MethodSource) {
        self.methods.insert(token, source);
    }
}

impl MethodBodyProvider for InMemoryProvider {
    fn method_source(&self, token: Token) -> Result<MethodSource, ProviderError> {
        self.methods.get(&token).cloned().ok_or(ProviderError::NotFound(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MethodSig;

    #[test]
    fn test_param_types_with_receiver() {
        let m = MethodRef::new(
            TacType::value_type("Point"),
            "Scale",
            MethodSig::new(true, vec![TacType::I4], TacType::Void),
        );
        let src = MethodSource::new(m, MethodBody::default());
        assert_eq!(src.param_types(), vec![TacType::value_type("Point").by_ref(), TacType::I4]);
    }

    #[test]
    fn test_param_types_static_generic() {
        let m = MethodRef::new(
            TacType::class("Util"),
            "Id",
            MethodSig::new(false, vec![TacType::MethodVar(0)], TacType::MethodVar(0)),
        );
        let mut src = MethodSource::new(m, MethodBody::default());
        src.generics.method_args = vec![TacType::String];
        assert_eq!(src.param_types(), vec![TacType::String]);
        assert_eq!(src.return_type(), TacType::String);
    }

    #[test]
    fn test_in_memory_provider_not_found() {
        let p = InMemoryProvider::new();
        let tok = Token::new(Token::METHOD_DEF, 1);
        assert_eq!(p.method_source(tok).unwrap_err(), ProviderError::NotFound(tok));
    }
}
