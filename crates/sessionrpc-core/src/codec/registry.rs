//! Named type registry used by the codec.
//!
//! Maps a type tag (the name written on the wire) to the Rust type it stands
//! for and to a constructor that rebuilds that type from its JSON form.

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Constructor = fn(Value) -> Result<Box<dyn Any + Send>>;

struct RegisteredType {
    tag: String,
    type_id: TypeId,
    type_name: &'static str,
    construct: Constructor,
}

fn construct<T>(value: Value) -> Result<Box<dyn Any + Send>>
where
    T: DeserializeOwned + Send + 'static,
{
    let typed: T = serde_json::from_value(value)?;
    Ok(Box::new(typed))
}

/// Mapping from type tag to constructible type.
///
/// Cloning is cheap; entries are shared.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    by_tag: HashMap<String, Arc<RegisteredType>>,
    by_id: HashMap<TypeId, Arc<RegisteredType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `tag`.
    ///
    /// Registering the same type under the same tag twice is a no-op. Reusing a
    /// tag for another type, or giving a type a second tag, is an error.
    pub fn register<T>(&mut self, tag: impl Into<String>) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let tag = tag.into();
        let type_id = TypeId::of::<T>();

        if let Some(existing) = self.by_tag.get(&tag) {
            if existing.type_id == type_id {
                return Ok(());
            }
            return Err(RpcError::DuplicateTypeTag { tag });
        }
        if self.by_id.contains_key(&type_id) {
            return Err(RpcError::DuplicateTypeTag { tag });
        }

        let entry = Arc::new(RegisteredType {
            tag: tag.clone(),
            type_id,
            type_name: std::any::type_name::<T>(),
            construct: construct::<T>,
        });
        self.by_tag.insert(tag, entry.clone());
        self.by_id.insert(type_id, entry);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T>(mut self, tag: impl Into<String>) -> Result<Self>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.register::<T>(tag)?;
        Ok(self)
    }

    /// Copy every entry of `other` into this registry.
    pub fn extend(&mut self, other: &TypeRegistry) -> Result<()> {
        for entry in other.by_tag.values() {
            match self.by_tag.get(&entry.tag) {
                Some(existing) if existing.type_id == entry.type_id => continue,
                Some(_) => {
                    return Err(RpcError::DuplicateTypeTag {
                        tag: entry.tag.clone(),
                    })
                }
                None => {}
            }
            if self.by_id.contains_key(&entry.type_id) {
                return Err(RpcError::DuplicateTypeTag {
                    tag: entry.tag.clone(),
                });
            }
            self.by_tag.insert(entry.tag.clone(), entry.clone());
            self.by_id.insert(entry.type_id, entry.clone());
        }
        Ok(())
    }

    /// Tag under which `T` is registered.
    pub fn tag_of<T: 'static>(&self) -> Option<&str> {
        self.by_id
            .get(&TypeId::of::<T>())
            .map(|entry| entry.tag.as_str())
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// Rust type name registered for `tag`, for diagnostics.
    pub fn type_name(&self, tag: &str) -> Option<&'static str> {
        self.by_tag.get(tag).map(|entry| entry.type_name)
    }

    /// Rebuild the registered type for `tag` from its JSON form.
    ///
    /// Returns `None` when the tag is unknown.
    pub fn construct(&self, tag: &str, value: Value) -> Option<Result<Box<dyn Any + Send>>> {
        self.by_tag.get(tag).map(|entry| (entry.construct)(value))
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.by_tag.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}
