use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;

use super::{TypeAlias, TypeFactory, TypeHandle, TypeSystem};

#[derive(Debug)]
struct TypeRecord {
    handle: TypeHandle,
    bases: Vec<TypeHandle>,
}

/// Concurrent in-process [`TypeSystem`].
#[derive(Default)]
pub struct InMemoryTypeRegistry {
    types: DashMap<TypeHandle, TypeRecord>,
    aliases: DashMap<String, TypeHandle>,
    derived_aliases: DashMap<(TypeHandle, String), TypeHandle>,
    factories: DashMap<TypeHandle, Arc<dyn TypeFactory>>,
}

impl InMemoryTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn ensure(&self, name: &str) -> TypeHandle {
        if let Some(record) = self.types.get(name) {
            return record.handle.clone();
        }
        let handle = TypeHandle::new(name);
        self.types
            .entry(handle.clone())
            .or_insert_with(|| TypeRecord {
                handle: handle.clone(),
                bases: Vec::new(),
            })
            .handle
            .clone()
    }
}

impl std::fmt::Debug for InMemoryTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTypeRegistry")
            .field("types", &self.types.len())
            .field("aliases", &(self.aliases.len() + self.derived_aliases.len()))
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl TypeSystem for InMemoryTypeRegistry {
    fn declare_type(&self, name: &str, bases: &[String], aliases: &[TypeAlias]) -> TypeHandle {
        // Bases are declared first so no shard lock is held across entries.
        let base_handles: Vec<TypeHandle> = bases
            .iter()
            .filter(|base| base.as_str() != name)
            .map(|base| self.ensure(base))
            .collect();

        let handle = self.ensure(name);
        if let Some(mut record) = self.types.get_mut(name) {
            for base in base_handles {
                if !record.bases.contains(&base) {
                    record.bases.push(base);
                }
            }
        }

        for alias in aliases {
            match &alias.base {
                None => {
                    if let Some(previous) = self.aliases.insert(alias.name.clone(), handle.clone())
                        && previous != handle
                    {
                        tracing::warn!(
                            alias = %alias.name,
                            previous = %previous,
                            current = %handle,
                            "Type alias redefined"
                        );
                    }
                }
                Some(base) => {
                    let base = self.ensure(base);
                    self.derived_aliases
                        .insert((base, alias.name.clone()), handle.clone());
                }
            }
        }

        handle
    }

    fn find_type_by_name(&self, name: &str) -> Option<TypeHandle> {
        if let Some(record) = self.types.get(name) {
            return Some(record.handle.clone());
        }
        self.aliases.get(name).map(|handle| handle.value().clone())
    }

    fn find_derived_type_by_name(&self, base: &TypeHandle, name: &str) -> Option<TypeHandle> {
        if let Some(found) = self.find_type_by_name(name)
            && self.is_a(&found, base)
        {
            return Some(found);
        }
        self.derived_aliases
            .get(&(base.clone(), name.to_string()))
            .map(|handle| handle.value().clone())
    }

    fn bases(&self, ty: &TypeHandle) -> Vec<TypeHandle> {
        self.types
            .get(ty)
            .map(|record| record.bases.clone())
            .unwrap_or_default()
    }

    fn is_a(&self, ty: &TypeHandle, base: &TypeHandle) -> bool {
        if ty == base {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([ty.clone()]);
        while let Some(current) = queue.pop_front() {
            for parent in self.bases(&current) {
                if &parent == base {
                    return true;
                }
                if seen.insert(parent.clone()) {
                    queue.push_back(parent);
                }
            }
        }
        false
    }

    fn all_derived_types(&self, base: &TypeHandle) -> Vec<TypeHandle> {
        let all: Vec<TypeHandle> = self.types.iter().map(|r| r.handle.clone()).collect();
        let mut derived: Vec<TypeHandle> = all
            .into_iter()
            .filter(|ty| ty != base && self.is_a(ty, base))
            .collect();
        derived.sort();
        derived
    }

    fn set_factory(&self, ty: &TypeHandle, factory: Arc<dyn TypeFactory>) {
        self.factories.insert(ty.clone(), factory);
    }

    fn factory(&self, ty: &TypeHandle) -> Option<Arc<dyn TypeFactory>> {
        self.factories.get(ty).map(|f| f.value().clone())
    }
}
