//! The seam between resource types and the store that persists them.
//!
//! A [`Resource`] is anything with [`ObjectMeta`] that serializes to JSON and
//! belongs to exactly one [`Kind`]. The [`ResourceStore`] contract is what the
//! controller programs against; [`StateStore`](crate::StateStore) is the redb
//! implementation.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StateResult;
use crate::types::{ObjectKey, ObjectMeta};

/// The resource kinds known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// User-authored desired state.
    WebUi,
    /// Generated workload running the web server.
    Workload,
    /// Generated content store holding the page payload.
    ContentStore,
}

impl Kind {
    /// Every kind, in registration order.
    pub const ALL: [Kind; 3] = [Kind::WebUi, Kind::Workload, Kind::ContentStore];

    /// Name of the redb table holding objects of this kind.
    pub fn table_name(self) -> &'static str {
        match self {
            Kind::WebUi => "webuis",
            Kind::Workload => "workloads",
            Kind::ContentStore => "content_stores",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::WebUi => "webui",
            Kind::Workload => "workload",
            Kind::ContentStore => "contentstore",
        };
        f.write_str(name)
    }
}

/// A storable object of a single kind.
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: Kind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// The `(namespace, name)` identity of this object.
    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }
}

/// Keyed, versioned CRUD over resources.
///
/// Not-found, already-exists and version conflicts are reported as distinct
/// [`StateError`](crate::StateError) variants so callers can branch on them.
pub trait ResourceStore: Send + Sync {
    /// Fetch one object. Absent objects are `StateError::NotFound`.
    fn get<R: Resource>(&self, key: &ObjectKey) -> StateResult<R>;

    /// All objects of a kind, ordered by key.
    fn list<R: Resource>(&self) -> StateResult<Vec<R>>;

    /// All objects of a kind in one namespace.
    fn list_namespaced<R: Resource>(&self, namespace: &str) -> StateResult<Vec<R>> {
        Ok(self
            .list::<R>()?
            .into_iter()
            .filter(|r| r.metadata().namespace == namespace)
            .collect())
    }

    /// Insert a new object. Fails with `AlreadyExists` if the key is taken.
    /// Returns the object as stored, with its assigned version.
    fn create<R: Resource>(&self, object: &R) -> StateResult<R>;

    /// Replace an existing object. The caller's `resource_version` must match
    /// the stored one, otherwise `Conflict`.
    fn update<R: Resource>(&self, object: &R) -> StateResult<R>;

    /// Remove an object. Fails with `NotFound` if it is absent.
    fn delete<R: Resource>(&self, key: &ObjectKey) -> StateResult<()>;
}

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
}

/// Notification that an object's state may have changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: Kind,
    pub key: ObjectKey,
    pub op: ChangeOp,
}
