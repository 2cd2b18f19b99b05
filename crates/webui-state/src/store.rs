//! StateStore: redb-backed resource persistence.
//!
//! Implements [`ResourceStore`] over one table per registered kind. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::registry::KindRegistry;
use crate::resource::{ChangeEvent, ChangeOp, Resource, ResourceStore};
use crate::types::ObjectKey;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Capacity of the change broadcast. Slow subscribers beyond this lag and
/// are expected to resync.
const EVENT_BUFFER: usize = 1024;

type KindTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Thread-safe resource store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    registry: Arc<KindRegistry>,
    events: broadcast::Sender<ChangeEvent>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path, registry: &KindRegistry) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db, registry)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(registry: &KindRegistry) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db, registry)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database, registry: &KindRegistry) -> StateResult<Self> {
        if registry.is_empty() {
            return Err(StateError::Open("no resource kinds registered".to_string()));
        }
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let store = Self {
            db: Arc::new(db),
            registry: Arc::new(registry.clone()),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create a table for every registered kind if it doesn't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for kind in self.registry.kinds() {
            txn.open_table(self.registry.table(kind)?)
                .map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The kinds this store serves.
    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Subscribe to change events for every committed write.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    fn publish<R: Resource>(&self, key: ObjectKey, op: ChangeOp) {
        // Sending only fails when nobody is subscribed.
        let _ = self.events.send(ChangeEvent {
            kind: R::KIND,
            key,
            op,
        });
    }

    /// Run `f` against the kind's table in one write transaction. Commits on
    /// `Ok`, aborts on `Err`.
    fn write<T>(
        &self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
        f: impl FnOnce(&mut KindTable<'_>) -> StateResult<T>,
    ) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = {
            let mut table = txn.open_table(definition).map_err(map_err!(Table))?;
            f(&mut table)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }
}

impl ResourceStore for StateStore {
    fn get<R: Resource>(&self, key: &ObjectKey) -> StateResult<R> {
        let definition = self.registry.table(R::KIND)?;
        let table_key = key.table_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(definition).map_err(map_err!(Table))?;
        match table.get(table_key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()),
            None => Err(StateError::NotFound {
                kind: R::KIND,
                key: table_key,
            }),
        }
    }

    fn list<R: Resource>(&self) -> StateResult<Vec<R>> {
        let definition = self.registry.table(R::KIND)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(definition).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn list_namespaced<R: Resource>(&self, namespace: &str) -> StateResult<Vec<R>> {
        let definition = self.registry.table(R::KIND)?;
        let prefix = format!("{namespace}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(definition).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    fn create<R: Resource>(&self, object: &R) -> StateResult<R> {
        let definition = self.registry.table(R::KIND)?;
        let key = object.key();
        let table_key = key.table_key();

        let now = epoch_secs();
        let mut stored = object.clone();
        {
            let meta = stored.metadata_mut();
            meta.resource_version = 1;
            meta.created_at = now;
            meta.updated_at = now;
        }
        let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;

        self.write(definition, |table| {
            if table
                .get(table_key.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::AlreadyExists {
                    kind: R::KIND,
                    key: table_key.clone(),
                });
            }
            table
                .insert(table_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            Ok(())
        })?;

        debug!(kind = %R::KIND, %key, "object created");
        self.publish::<R>(key, ChangeOp::Created);
        Ok(stored)
    }

    fn update<R: Resource>(&self, object: &R) -> StateResult<R> {
        let definition = self.registry.table(R::KIND)?;
        let key = object.key();
        let table_key = key.table_key();
        let expected = object.metadata().resource_version;

        let stored = self.write(definition, |table| {
            let current: R = match table.get(table_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => {
                    return Err(StateError::NotFound {
                        kind: R::KIND,
                        key: table_key.clone(),
                    });
                }
            };
            let found = current.metadata().resource_version;
            if found != expected {
                return Err(StateError::Conflict {
                    kind: R::KIND,
                    key: table_key.clone(),
                    expected,
                    found,
                });
            }

            let mut stored = object.clone();
            {
                let meta = stored.metadata_mut();
                meta.resource_version = found.saturating_add(1);
                meta.created_at = current.metadata().created_at;
                meta.updated_at = epoch_secs();
            }
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(table_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            Ok(stored)
        })?;

        debug!(
            kind = %R::KIND,
            %key,
            version = stored.metadata().resource_version,
            "object updated"
        );
        self.publish::<R>(key, ChangeOp::Updated);
        Ok(stored)
    }

    fn delete<R: Resource>(&self, key: &ObjectKey) -> StateResult<()> {
        let definition = self.registry.table(R::KIND)?;
        let table_key = key.table_key();

        self.write(definition, |table| {
            let existed = table
                .remove(table_key.as_str())
                .map_err(map_err!(Write))?
                .is_some();
            if existed {
                Ok(())
            } else {
                Err(StateError::NotFound {
                    kind: R::KIND,
                    key: table_key.clone(),
                })
            }
        })?;

        debug!(kind = %R::KIND, %key, "object deleted");
        self.publish::<R>(key.clone(), ChangeOp::Deleted);
        Ok(())
    }
}

fn decode<R: Resource>(bytes: &[u8]) -> StateResult<R> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;
    use crate::types::*;
    use std::collections::BTreeMap;

    fn test_store() -> StateStore {
        StateStore::open_in_memory(&KindRegistry::standard()).unwrap()
    }

    fn test_webui(namespace: &str, name: &str) -> WebUi {
        WebUi::new(
            namespace,
            name,
            WebUiSpec {
                contents: "<h1>hi</h1>".to_string(),
                image: "nginx:1".to_string(),
                replicas: 2,
            },
        )
    }

    fn test_content_store(namespace: &str, name: &str) -> ContentStore {
        ContentStore {
            metadata: ObjectMeta::new(namespace, name),
            data: BTreeMap::from([("index.html".to_string(), "<p>x</p>".to_string())]),
        }
    }

    // ── CRUD ───────────────────────────────────────────────────────

    #[test]
    fn create_and_get() {
        let store = test_store();
        let created = store.create(&test_webui("x", "a")).unwrap();
        assert_eq!(created.metadata.resource_version, 1);
        assert!(created.metadata.created_at > 0);

        let fetched: WebUi = store.get(&ObjectKey::new("x", "a")).unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = test_store();
        let err = store.get::<WebUi>(&ObjectKey::new("x", "nope")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn create_twice_is_already_exists() {
        let store = test_store();
        store.create(&test_webui("x", "a")).unwrap();
        let err = store.create(&test_webui("x", "a")).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn update_bumps_version_and_keeps_created_at() {
        let store = test_store();
        let created = store.create(&test_webui("x", "a")).unwrap();

        let mut changed = created.clone();
        changed.spec.replicas = 5;
        let updated = store.update(&changed).unwrap();

        assert_eq!(updated.metadata.resource_version, 2);
        assert_eq!(updated.metadata.created_at, created.metadata.created_at);
        let fetched: WebUi = store.get(&created.key()).unwrap();
        assert_eq!(fetched.spec.replicas, 5);
    }

    #[test]
    fn update_with_stale_version_conflicts() {
        let store = test_store();
        let created = store.create(&test_webui("x", "a")).unwrap();

        let mut first = created.clone();
        first.spec.replicas = 3;
        store.update(&first).unwrap();

        let mut stale = created;
        stale.spec.replicas = 4;
        let err = store.update(&stale).unwrap_err();
        assert!(matches!(
            err,
            StateError::Conflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
        let fetched: WebUi = store.get(&stale.key()).unwrap();
        assert_eq!(fetched.spec.replicas, 3);
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = test_store();
        let err = store.update(&test_webui("x", "ghost")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn delete_then_delete_again() {
        let store = test_store();
        store.create(&test_content_store("x", "webui-a")).unwrap();
        let key = ObjectKey::new("x", "webui-a");

        store.delete::<ContentStore>(&key).unwrap();
        assert!(store.delete::<ContentStore>(&key).unwrap_err().is_not_found());
        assert!(store.get::<ContentStore>(&key).unwrap_err().is_not_found());
    }

    #[test]
    fn kinds_are_isolated() {
        let store = test_store();
        store.create(&test_content_store("x", "a")).unwrap();
        assert!(store.get::<WebUi>(&ObjectKey::new("x", "a")).unwrap_err().is_not_found());
    }

    #[test]
    fn list_and_list_namespaced() {
        let store = test_store();
        store.create(&test_webui("ns1", "a")).unwrap();
        store.create(&test_webui("ns1", "b")).unwrap();
        store.create(&test_webui("ns2", "c")).unwrap();
        // "ns1" must not match "ns10/..." keys.
        store.create(&test_webui("ns10", "d")).unwrap();

        assert_eq!(store.list::<WebUi>().unwrap().len(), 4);
        let ns1 = store.list_namespaced::<WebUi>("ns1").unwrap();
        assert_eq!(ns1.len(), 2);
        assert!(ns1.iter().all(|w| w.metadata.namespace == "ns1"));
    }

    // ── Registry ───────────────────────────────────────────────────

    #[test]
    fn unregistered_kind_is_rejected() {
        let registry = KindRegistry::new().register::<WebUi>();
        let store = StateStore::open_in_memory(&registry).unwrap();
        let err = store
            .create(&test_content_store("x", "a"))
            .unwrap_err();
        assert!(matches!(err, StateError::UnregisteredKind(Kind::ContentStore)));
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_registry_fails_to_open() {
        let result = StateStore::open_in_memory(&KindRegistry::new());
        assert!(matches!(result, Err(StateError::Open(_))));
    }

    // ── Change events ──────────────────────────────────────────────

    #[test]
    fn committed_writes_are_broadcast() {
        let store = test_store();
        let mut events = store.subscribe();

        let created = store.create(&test_webui("x", "a")).unwrap();
        store.update(&created).unwrap();
        store.delete::<WebUi>(&created.key()).unwrap();

        let ops: Vec<ChangeOp> = (0..3).map(|_| events.try_recv().unwrap().op).collect();
        assert_eq!(ops, vec![ChangeOp::Created, ChangeOp::Updated, ChangeOp::Deleted]);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn failed_writes_are_not_broadcast() {
        let store = test_store();
        store.create(&test_webui("x", "a")).unwrap();
        let mut events = store.subscribe();

        assert!(store.create(&test_webui("x", "a")).is_err());
        assert!(store.delete::<WebUi>(&ObjectKey::new("x", "b")).is_err());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn events_carry_kind_and_key() {
        let store = test_store();
        let mut events = store.subscribe();
        store.create(&test_content_store("x", "webui-a")).unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, Kind::ContentStore);
        assert_eq!(event.key, ObjectKey::new("x", "webui-a"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");
        let registry = KindRegistry::standard();

        {
            let store = StateStore::open(&db_path, &registry).unwrap();
            store.create(&test_webui("prod", "site")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path, &registry).unwrap();
        let webui: WebUi = store.get(&ObjectKey::new("prod", "site")).unwrap();
        assert_eq!(webui.metadata.resource_version, 1);
        assert_eq!(webui.spec.image, "nginx:1");
    }

    #[test]
    fn empty_store_operations() {
        let store = test_store();
        assert!(store.list::<WebUi>().unwrap().is_empty());
        assert!(store.list::<Workload>().unwrap().is_empty());
        assert!(store.list_namespaced::<ContentStore>("any").unwrap().is_empty());
    }
}
