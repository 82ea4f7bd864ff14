//! Type-keyed dependency container.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::lifecycle::error::ProvisionError;

/// Identifies a dependency by its Rust type.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Provisioned values, at most one per type.
#[derive(Default, Clone)]
pub struct Container {
    values: HashMap<TypeKey, Value>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing any earlier value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(TypeKey::of::<T>(), Arc::new(value));
    }

    pub(crate) fn insert_raw(&mut self, key: TypeKey, value: Value) {
        self.values.insert(key, value);
    }

    pub(crate) fn get_raw(&self, key: &TypeKey) -> Option<Value> {
        self.values.get(key).cloned()
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeKey::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Like [`get`](Self::get), but a missing value is an error.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ProvisionError> {
        self.get::<T>().ok_or_else(|| ProvisionError::MissingDependency {
            provider: "container".to_string(),
            dependency: std::any::type_name::<T>(),
        })
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.values.contains_key(key)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &TypeKey> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
