//! Shared metadata registry
//!
//! Caches token resolutions per generic context and hands out arena handles.
//! Every distinct `(token, context)` pair is resolved at most once; failures
//! are cached as "unknown" sentinels so later lookups report them again
//! without hitting the resolver.

use std::hash::Hash;
use std::sync::Arc;

use cil_bytecode::Token;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::members::{FieldRef, MethodRef, MethodSig};
use super::types::{GenericContext, TacType};

/// Token resolution against a module's metadata.
///
/// Implementations must not panic on bad tokens; `None` means "cannot resolve".
pub trait MetadataResolver: Send + Sync {
    /// Resolve a TypeDef/TypeRef/TypeSpec token
    fn resolve_type(&self, ctx: &GenericContext, token: Token) -> Option<TacType>;

    /// Resolve a Field or field MemberRef token
    fn resolve_field(&self, ctx: &GenericContext, token: Token) -> Option<FieldRef>;

    /// Resolve a MethodDef/MethodSpec or method MemberRef token
    fn resolve_method(&self, ctx: &GenericContext, token: Token) -> Option<MethodRef>;

    /// Resolve a user string token
    fn resolve_string(&self, ctx: &GenericContext, token: Token) -> Option<String>;

    /// Decode the call-site signature behind a method token
    fn resolve_signature(&self, ctx: &GenericContext, token: Token) -> Option<MethodSig>;
}

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
            pub struct $name(pub u32);
        )*
    };
}

define_handle! {
    /// Index of a resolved type in the registry
    TypeHandle;
    /// Index of a resolved field in the registry
    FieldHandle;
    /// Index of a resolved method in the registry
    MethodHandle;
    /// Index of a resolved user string in the registry
    StringHandle;
}

/// Result of a resolve-or-insert call
#[derive(Debug, Clone)]
pub struct Lookup<H, T> {
    /// Arena handle
    pub handle: H,
    /// The resolved value, or the sentinel
    pub value: T,
    /// False when `value` is an unknown sentinel
    pub resolved: bool,
}

/// Number of cached entries per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub types: usize,
    pub fields: usize,
    pub methods: usize,
    pub strings: usize,
}

struct Table<K, T> {
    entries: Vec<(T, bool)>,
    index: FxHashMap<K, u32>,
}

impl<K, T> Default for Table<K, T> {
    fn default() -> Self {
        Table { entries: Vec::new(), index: FxHashMap::default() }
    }
}

impl<K: Hash + Eq, T: Clone> Table<K, T> {
    fn get(&self, key: &K) -> Option<(u32, T, bool)> {
        let &id = self.index.get(key)?;
        let (value, resolved) = &self.entries[id as usize];
        Some((id, value.clone(), *resolved))
    }

    fn insert(&mut self, key: K, value: T, resolved: bool) -> (u32, T, bool) {
        // Another thread may have won the race; its entry stands
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        let id = self.entries.len() as u32;
        self.entries.push((value.clone(), resolved));
        self.index.insert(key, id);
        (id, value, resolved)
    }
}

type Key = (Token, GenericContext);

#[derive(Default)]
struct RegistryInner {
    types: Table<Key, TacType>,
    fields: Table<Key, Arc<FieldRef>>,
    methods: Table<Key, Arc<MethodRef>>,
    strings: Table<Token, Arc<str>>,
}

/// Registry of resolved metadata shared by all method compilations
#[derive(Default)]
pub struct MetadataRegistry {
    inner: RwLock<RegistryInner>,
}

impl MetadataRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a type token, caching the result
    pub fn resolve_type(
        &self,
        resolver: &dyn MetadataResolver,
        ctx: &GenericContext,
        token: Token,
    ) -> Lookup<TypeHandle, TacType> {
        let key = (token, ctx.clone());
        let cached = self.inner.read().types.get(&key);
        let (id, value, resolved) = match cached {
            Some(hit) => hit,
            None => {
                let (value, resolved) = match resolver.resolve_type(ctx, token) {
                    Some(ty) => (ty, true),
                    None => (TacType::Unknown, false),
                };
                self.inner.write().types.insert(key, value, resolved)
            }
        };
        Lookup { handle: TypeHandle(id), value, resolved }
    }

    /// Resolve a field token, caching the result
    pub fn resolve_field(
        &self,
        resolver: &dyn MetadataResolver,
        ctx: &GenericContext,
        token: Token,
    ) -> Lookup<FieldHandle, Arc<FieldRef>> {
        let key = (token, ctx.clone());
        let cached = self.inner.read().fields.get(&key);
        let (id, value, resolved) = match cached {
            Some(hit) => hit,
            None => {
                let (value, resolved) = match resolver.resolve_field(ctx, token) {
                    Some(field) => (Arc::new(field), true),
                    None => (Arc::new(FieldRef::unknown(token)), false),
                };
                self.inner.write().fields.insert(key, value, resolved)
            }
        };
        Lookup { handle: FieldHandle(id), value, resolved }
    }

    /// Resolve a method token, caching the result.
    ///
    /// Falls back to the call-site signature when the method itself cannot be
    /// resolved. Returns `None` only if neither is available; that outcome
    /// is not cached.
    pub fn resolve_method(
        &self,
        resolver: &dyn MetadataResolver,
        ctx: &GenericContext,
        token: Token,
    ) -> Option<Lookup<MethodHandle, Arc<MethodRef>>> {
        let key = (token, ctx.clone());
        let cached = self.inner.read().methods.get(&key);
        let (id, value, resolved) = match cached {
            Some(hit) => hit,
            None => {
                let (value, resolved) = match resolver.resolve_method(ctx, token) {
                    Some(method) => (Arc::new(method), true),
                    None => {
                        let sig = resolver.resolve_signature(ctx, token)?;
                        (Arc::new(MethodRef::from_signature(token, sig)), false)
                    }
                };
                self.inner.write().methods.insert(key, value, resolved)
            }
        };
        Some(Lookup { handle: MethodHandle(id), value, resolved })
    }

    /// Resolve a user string token, caching the result
    pub fn resolve_string(
        &self,
        resolver: &dyn MetadataResolver,
        ctx: &GenericContext,
        token: Token,
    ) -> Lookup<StringHandle, Arc<str>> {
        let cached = self.inner.read().strings.get(&token);
        let (id, value, resolved) = match cached {
            Some(hit) => hit,
            None => {
                let (value, resolved): (Arc<str>, bool) = match resolver.resolve_string(ctx, token) {
                    Some(s) => (s.into(), true),
                    None => (format!("<unknown string {}>", token).into(), false),
                };
                self.inner.write().strings.insert(token, value, resolved)
            }
        };
        Lookup { handle: StringHandle(id), value, resolved }
    }

    /// Type behind a handle
    pub fn ty(&self, handle: TypeHandle) -> Option<TacType> {
        self.inner.read().types.entries.get(handle.0 as usize).map(|(t, _)| t.clone())
    }

    /// Field behind a handle
    pub fn field(&self, handle: FieldHandle) -> Option<Arc<FieldRef>> {
        self.inner.read().fields.entries.get(handle.0 as usize).map(|(f, _)| f.clone())
    }

    /// Method behind a handle
    pub fn method(&self, handle: MethodHandle) -> Option<Arc<MethodRef>> {
        self.inner.read().methods.entries.get(handle.0 as usize).map(|(m, _)| m.clone())
    }

    /// String behind a handle
    pub fn string(&self, handle: StringHandle) -> Option<Arc<str>> {
        self.inner.read().strings.entries.get(handle.0 as usize).map(|(s, _)| s.clone())
    }

    /// Entry counts
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        RegistryStats {
            types: inner.types.entries.len(),
            fields: inner.fields.entries.len(),
            methods: inner.methods.entries.len(),
            strings: inner.strings.entries.len(),
        }
    }
}
