//! webui-state: the resource store behind the web UI controller.
//!
//! Backed by [redb](https://docs.rs/redb), provides versioned CRUD for the
//! three resource kinds the controller deals with: the user-authored
//! [`WebUi`] and the two children generated from it, [`Workload`] and
//! [`ContentStore`].
//!
//! # Architecture
//!
//! Every kind lives in its own redb table, created from an explicit
//! [`KindRegistry`] handed to the store at open time. Values are
//! JSON-serialized into `&[u8]` columns under `{namespace}/{name}` keys, so
//! a namespace is a key-prefix scan.
//!
//! Writes are single-object transactions. The store assigns
//! `resource_version` on create and bumps it on update; an update carrying a
//! stale version fails with [`StateError::Conflict`]. Every committed write is
//! broadcast as a [`ChangeEvent`] to subscribers.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks and blocking workers.

pub mod error;
pub mod registry;
pub mod resource;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use registry::KindRegistry;
pub use resource::{ChangeEvent, ChangeOp, Kind, Resource, ResourceStore};
pub use store::StateStore;
pub use types::*;
