//! In-memory metadata tables

use cil_bytecode::Token;
use rustc_hash::FxHashMap;

use super::members::{FieldRef, MethodRef, MethodSig};
use super::registry::MetadataResolver;
use super::types::{GenericContext, TacType};

/// Resolver backed by token maps filled in ahead of time.
///
/// Generic parameters in stored entries are substituted with the context
/// supplied at resolution time.
#[derive(Debug, Default, Clone)]
pub struct MetadataTable {
    types: FxHashMap<Token, TacType>,
    fields: FxHashMap<Token, FieldRef>,
    methods: FxHashMap<Token, MethodRef>,
    signatures: FxHashMap<Token, MethodSig>,
    strings: FxHashMap<Token, String>,
    next_row: FxHashMap<u8, u32>,
}

impl MetadataTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self, table: u8) -> Token {
        let row = self.next_row.entry(table).or_insert(0);
        *row += 1;
        Token::new(table, *row)
    }

    /// Register a type under a fresh TypeRef token
    pub fn add_type(&mut self, ty: TacType) -> Token {
        let token = self.allocate(Token::TYPE_REF);
        self.types.insert(token, ty);
        token
    }

    /// Register a field under a fresh Field token
    pub fn add_field(&mut self, field: FieldRef) -> Token {
        let token = self.allocate(Token::FIELD);
        self.fields.insert(token, field);
        token
    }

    /// Register a method under a fresh MemberRef token
    pub fn add_method(&mut self, method: MethodRef) -> Token {
        let token = self.allocate(Token::MEMBER_REF);
        self.methods.insert(token, method);
        token
    }

    /// Register a user string under a fresh string token
    pub fn add_string(&mut self, s: impl Into<String>) -> Token {
        let token = self.allocate(Token::USER_STRING);
        self.strings.insert(token, s.into());
        token
    }

    /// Register a bare call-site signature for `token`
    pub fn add_signature(&mut self, token: Token, sig: MethodSig) {
        self.signatures.insert(token, sig);
    }

    /// Register a type under an explicit token
    pub fn insert_type(&mut self, token: Token, ty: TacType) {
        self.types.insert(token, ty);
    }

    /// Register a field under an explicit token
    pub fn insert_field(&mut self, token: Token, field: FieldRef) {
        self.fields.insert(token, field);
    }

    /// Register a method under an explicit token
    pub fn insert_method(&mut self, token: Token, method: MethodRef) {
        self.methods.insert(token, method);
    }
}

impl MetadataResolver for MetadataTable {
    fn resolve_type(&self, ctx: &GenericContext, token: Token) -> Option<TacType> {
        self.types.get(&token).map(|t| t.substitute(ctx))
    }

    fn resolve_field(&self, ctx: &GenericContext, token: Token) -> Option<FieldRef> {
        self.fields.get(&token).map(|f| f.substitute(ctx))
    }

    fn resolve_method(&self, ctx: &GenericContext, token: Token) -> Option<MethodRef> {
        self.methods.get(&token).map(|m| m.substitute(ctx))
    }

    fn resolve_string(&self, _ctx: &GenericContext, token: Token) -> Option<String> {
        self.strings.get(&token).cloned()
    }

    fn resolve_signature(&self, ctx: &GenericContext, token: Token) -> Option<MethodSig> {
        self.signatures
            .get(&token)
            .cloned()
            .or_else(|| self.methods.get(&token).map(|m| m.substitute(ctx).sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_allocated_per_table() {
        let mut table = MetadataTable::new();
        let t1 = table.add_type(TacType::String);
        let t2 = table.add_type(TacType::Object);
        let s1 = table.add_string("hi");
        assert_eq!(t1, Token::new(Token::TYPE_REF, 1));
        assert_eq!(t2, Token::new(Token::TYPE_REF, 2));
        assert_eq!(s1, Token::new(Token::USER_STRING, 1));
    }

    #[test]
    fn test_signature_derived_from_method() {
        let mut table = MetadataTable::new();
        let tok = table.add_method(MethodRef::new(
            TacType::class("C"),
            "M",
            MethodSig::new(false, vec![TacType::TypeVar(0)], TacType::Void),
        ));
        let ctx = GenericContext { type_args: vec![TacType::I8], method_args: vec![] };
        let sig = table.resolve_signature(&ctx, tok).unwrap();
        assert_eq!(sig.params, vec![TacType::I8]);
        assert!(table.resolve_signature(&ctx, Token::new(Token::MEMBER_REF, 99)).is_none());
    }
}
