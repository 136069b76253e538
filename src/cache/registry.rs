//! Explicit handler registry.
//!
//! Maps a handler type to its constructor. Every cacheable handler is
//! registered once at startup by the composition root; the store refuses to
//! build unregistered types. Constructors capture their repository handles,
//! so construction itself is cheap and synchronous; the expensive load
//! happens in the handler's `initialize`.

use std::any::TypeId;
use std::collections::HashMap;

use tracing::warn;

use super::handler::CacheHandler;
use super::keys::short_type_name;

type BuildFn = Box<dyn Fn() -> Box<dyn CacheHandler> + Send + Sync>;

struct Registration {
    type_name: &'static str,
    build: BuildFn,
}

#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<TypeId, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register handler type `H` with its constructor. Re-registering a
    /// type replaces the previous constructor.
    pub fn register<H, F>(&mut self, build: F) -> &mut Self
    where
        H: CacheHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let type_name = short_type_name::<H>();
        let previous = self.factories.insert(
            TypeId::of::<H>(),
            Registration {
                type_name,
                build: Box::new(move || Box::new(build())),
            },
        );
        if previous.is_some() {
            warn!(handler = type_name, "cache handler registered twice");
        }
        self
    }

    pub fn is_registered<H: 'static>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<H>())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub(crate) fn construct(&self, type_id: TypeId) -> Option<(&'static str, Box<dyn CacheHandler>)> {
        self.factories
            .get(&type_id)
            .map(|registration| (registration.type_name, (registration.build)()))
    }
}
