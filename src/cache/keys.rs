//! Cache key definitions.

use std::any::TypeId;
use std::fmt;

use crate::domain::types::EntityId;

/// Identifies one cache entry: a handler type plus an optional object id.
///
/// Singleton handlers (one instance per process, e.g. the node tree) use
/// `object_id = None`; per-entity handlers carry the entity's id. At most
/// one live handler exists per key at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    type_id: TypeId,
    type_name: &'static str,
    object_id: Option<EntityId>,
}

impl HandlerKey {
    pub fn new<H: 'static>(object_id: Option<EntityId>) -> Self {
        Self {
            type_id: TypeId::of::<H>(),
            type_name: short_type_name::<H>(),
            object_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn object_id(&self) -> Option<EntityId> {
        self.object_id
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object_id {
            Some(object_id) => write!(f, "{}#{}", self.type_name, object_id),
            None => f.write_str(self.type_name),
        }
    }
}

/// Last segment of a type path, for keys and log lines.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
