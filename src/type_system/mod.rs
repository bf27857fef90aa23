//! Boundary to the polymorphic type system that plugins declare into.
//!
//! The catalog never needs runtime type identity itself: it declares each
//! advertised type by name, with its bases and aliases, and asks the type
//! system for lookups and factories. [`InMemoryTypeRegistry`] is the default
//! implementation; hosts with their own reflection layer implement
//! [`TypeSystem`] instead.

mod declared;
mod registry;

use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

pub use declared::DeclaredType;
pub(crate) use declared::KEY_TYPES;
pub use registry::InMemoryTypeRegistry;

/// Identity of a declared type. Cheap to clone, compared by name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(Arc<str>);

impl TypeHandle {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHandle({})", self.0)
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TypeHandle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TypeHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Alternate name for a type.
///
/// With a `base`, the alias only resolves through
/// [`TypeSystem::find_derived_type_by_name`] under that base; without one it
/// is global.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeAlias {
    pub base: Option<String>,
    pub name: String,
}

impl TypeAlias {
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            base: None,
            name: name.into(),
        }
    }

    pub fn under(base: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            base: Some(base.into()),
            name: name.into(),
        }
    }
}

/// Creates instances of a type once the code providing it has loaded.
pub trait TypeFactory: Send + Sync {
    fn create(&self) -> Box<dyn Any + Send>;
}

impl<F> TypeFactory for F
where
    F: Fn() -> Box<dyn Any + Send> + Send + Sync,
{
    fn create(&self) -> Box<dyn Any + Send> {
        self()
    }
}

/// Type-identity registry the catalog declares plugin types into.
///
/// Declarations are idempotent: declaring a known type again merges the new
/// bases and aliases into the existing entry.
pub trait TypeSystem: Send + Sync {
    fn declare_type(&self, name: &str, bases: &[String], aliases: &[TypeAlias]) -> TypeHandle;

    /// Looks up a type by its name or a global alias.
    fn find_type_by_name(&self, name: &str) -> Option<TypeHandle>;

    /// Looks up `name` as a type derived from `base`, or as an alias
    /// registered under `base`.
    fn find_derived_type_by_name(&self, base: &TypeHandle, name: &str) -> Option<TypeHandle>;

    /// Direct bases of `ty`.
    fn bases(&self, ty: &TypeHandle) -> Vec<TypeHandle>;

    /// True if `ty` is `base` or derives from it, directly or transitively.
    fn is_a(&self, ty: &TypeHandle, base: &TypeHandle) -> bool;

    /// Every type deriving from `base`, excluding `base`, sorted by name.
    fn all_derived_types(&self, base: &TypeHandle) -> Vec<TypeHandle>;

    fn set_factory(&self, ty: &TypeHandle, factory: Arc<dyn TypeFactory>);

    fn factory(&self, ty: &TypeHandle) -> Option<Arc<dyn TypeFactory>>;
}
