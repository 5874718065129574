//! Metadata model and token resolution
//!
//! Token resolution itself is delegated to a [`MetadataResolver`]; the
//! [`MetadataRegistry`] caches results and turns failures into sentinels.

pub mod members;
pub mod registry;
pub mod table;
pub mod types;

pub use members::{FieldRef, MethodRef, MethodSig};
pub use registry::{
    FieldHandle, Lookup, MetadataRegistry, MetadataResolver, MethodHandle, RegistryStats,
    StringHandle, TypeHandle,
};
pub use table::MetadataTable;
pub use types::{GenericContext, NamedKind, NamedType, TacType, TypeCategory};
