//! Kind registry and redb table definitions.
//!
//! The registry is a plain value built at startup and handed to the store.
//! The store creates one table per registered kind and refuses to touch any
//! other. Each table uses `&str` keys (`{namespace}/{name}`) and `&[u8]`
//! values (JSON-serialized objects).

use std::collections::BTreeSet;

use redb::TableDefinition;

use crate::error::{StateError, StateResult};
use crate::resource::{Kind, Resource};

/// The set of kinds a store serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindRegistry {
    kinds: BTreeSet<Kind>,
}

impl KindRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every kind the controller uses.
    pub fn standard() -> Self {
        Self::new()
            .register::<crate::WebUi>()
            .register::<crate::Workload>()
            .register::<crate::ContentStore>()
    }

    /// Register the kind of `R`.
    pub fn register<R: Resource>(mut self) -> Self {
        self.kinds.insert(R::KIND);
        self
    }

    pub fn contains(&self, kind: Kind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = Kind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Table definition for a registered kind.
    pub fn table(
        &self,
        kind: Kind,
    ) -> StateResult<TableDefinition<'static, &'static str, &'static [u8]>> {
        if !self.contains(kind) {
            return Err(StateError::UnregisteredKind(kind));
        }
        Ok(TableDefinition::new(kind.table_name()))
    }
}
