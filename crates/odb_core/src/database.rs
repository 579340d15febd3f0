//! Object database facade.

use crate::config::Options;
use crate::error::{OdbError, OdbResult};
use crate::keyspace;
use crate::table::{
    FreeContentFn, LoaderFn, PersistedTable, TableHandlers, TableInfo, TableRegistry,
};
use crate::transaction::relation::{RelationFactory, RelationRegistry};
use crate::transaction::ObjectTransaction;
use crate::types::{Oid, TableId};
use odb_codec::{vuint, Reader};
use odb_kv::{KvStore, KvTransaction};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// The owner of all cross-transaction state: the key-value engine
/// handle, the table and relation registries, and the monotonic oid and
/// dictionary-id allocators.
///
/// # Opening a database
///
/// ```rust,ignore
/// use odb_core::{ObjectDb, Options};
/// use odb_kv::MemoryKvStore;
/// use std::sync::Arc;
///
/// let db = ObjectDb::new(Arc::new(MemoryKvStore::new()), Options::default())?;
/// db.register_table::<User>("User", 1, vec![], handlers)?;
///
/// let tr = db.start_transaction()?;
/// ```
pub struct ObjectDb {
    kv: Arc<dyn KvStore>,
    options: Options,
    registry: TableRegistry,
    relations: RelationRegistry,
    last_oid: AtomicU64,
    dict_counter: AtomicU64,
}

impl ObjectDb {
    /// Opens an object database over `kv`.
    ///
    /// Recovers the oid allocator, the dictionary-id counter, and the
    /// persisted schema bindings (table names, versions, singleton oids)
    /// from the committed store, so re-registered types bind to their
    /// original table ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot provide a snapshot or the
    /// schema rows are corrupted.
    pub fn new(kv: Arc<dyn KvStore>, options: Options) -> OdbResult<Arc<Self>> {
        let recovered = Self::recover(&kv)?;
        debug!(
            tables = recovered.persisted.len(),
            last_oid = recovered.last_oid,
            "object database opened"
        );
        Ok(Arc::new(Self {
            kv,
            options,
            registry: TableRegistry::new(recovered.persisted),
            relations: RelationRegistry::new(),
            last_oid: AtomicU64::new(recovered.last_oid),
            dict_counter: AtomicU64::new(recovered.dict_counter),
        }))
    }

    /// Registers a table binding type `T` to `name`.
    ///
    /// `version_descriptor` is the opaque schema blob persisted per
    /// version; `handlers` are the serializers a code generator would
    /// emit for the current version.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::InvalidOperation`] if the type or name is
    /// already registered.
    pub fn register_table<T: 'static>(
        &self,
        name: &str,
        client_type_version: u32,
        version_descriptor: Vec<u8>,
        handlers: TableHandlers,
    ) -> OdbResult<Arc<TableInfo>> {
        self.registry.register(
            name,
            TypeId::of::<T>(),
            type_name::<T>(),
            client_type_version,
            version_descriptor,
            handlers,
        )
    }

    /// Registers the loader (and optional free-content traversal) for an
    /// older schema version of `T`, so objects written by earlier
    /// clients stay readable.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::UnknownType`] if `T` is not registered.
    pub fn register_table_version<T: 'static>(
        &self,
        version: u32,
        loader: Arc<LoaderFn>,
        free_content: Option<Arc<FreeContentFn>>,
    ) -> OdbResult<()> {
        let table = self
            .registry
            .by_type(TypeId::of::<T>())
            .ok_or_else(|| OdbError::unknown_type(type_name::<T>()))?;
        table.add_version(version, loader, free_content);
        Ok(())
    }

    /// Starts a writing object transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if another writing transaction is active.
    pub fn start_transaction(self: &Arc<Self>) -> OdbResult<ObjectTransaction> {
        let kv = self.kv.start_transaction()?;
        Ok(ObjectTransaction::new(Arc::clone(self), kv))
    }

    /// Starts a read-only object transaction over the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot provide a snapshot.
    pub fn start_read_only_transaction(self: &Arc<Self>) -> OdbResult<ObjectTransaction> {
        let kv = self.kv.start_read_only_transaction()?;
        Ok(ObjectTransaction::new(Arc::clone(self), kv))
    }

    /// Returns the database options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns the table registry.
    #[must_use]
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Returns the highest oid handed out so far.
    #[must_use]
    pub fn last_allocated_oid(&self) -> Oid {
        Oid::new(self.last_oid.load(Ordering::SeqCst))
    }

    pub(crate) fn allocate_oid(&self) -> Oid {
        Oid::new(self.last_oid.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn dictionary_counter(&self) -> u64 {
        self.dict_counter.load(Ordering::SeqCst)
    }

    pub(crate) fn commit_dictionary_counter(&self, value: u64) {
        self.dict_counter.fetch_max(value, Ordering::SeqCst);
    }

    /// Declares a relation constructor for type `R` - the seam where a
    /// generated relation implementation plugs in. Declared constructors
    /// become usable through `init_relation` or, when permitted,
    /// through auto-registration on first `get_relation`.
    pub fn declare_relation<R: 'static>(
        &self,
        constructor: impl Fn(&ObjectTransaction) -> OdbResult<std::rc::Rc<dyn std::any::Any>>
            + Send
            + Sync
            + 'static,
    ) {
        self.relations
            .declare(TypeId::of::<R>(), type_name::<R>(), Arc::new(constructor));
    }

    /// Registers the declared constructor of `type_id` under `name` and
    /// returns the ready factory.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::RelationShapeInvalid`] if no constructor was
    /// declared for the type.
    pub fn init_relation(&self, name: &str, type_id: TypeId) -> OdbResult<RelationFactory> {
        self.relations.init(name, type_id)
    }

    pub(crate) fn relation_factory(&self, type_id: TypeId) -> Option<RelationFactory> {
        self.relations.factory(type_id)
    }

    pub(crate) fn auto_register_relation(&self, type_id: TypeId) -> OdbResult<RelationFactory> {
        if !self.options.auto_register_relations {
            return Err(OdbError::AutoRegistrationForbidden {
                type_name: self.relations.type_name(type_id),
            });
        }
        self.relations.auto_register(type_id)
    }

    /// Returns the types of every initialized relation.
    #[must_use]
    pub fn relation_types(&self) -> Vec<TypeId> {
        self.relations.registered_types()
    }

    fn recover(kv: &Arc<dyn KvStore>) -> OdbResult<Recovered> {
        let mut tr = kv.start_read_only_transaction()?;

        let mut names: HashMap<u32, String> = HashMap::new();
        for (key, value) in scan_prefix(tr.as_mut(), keyspace::TABLE_NAMES) {
            let (table_id, _) = vuint::decode(&key[keyspace::TABLE_NAMES.len()..])?;
            let name = Reader::new(&value).read_string()?;
            names.insert(table_id as u32, name);
        }

        let mut versions: HashMap<u32, u32> = HashMap::new();
        for (key, _) in scan_prefix(tr.as_mut(), keyspace::TABLE_VERSIONS) {
            let rest = &key[keyspace::TABLE_VERSIONS.len()..];
            let (table_id, consumed) = vuint::decode(rest)?;
            let (version, _) = vuint::decode(&rest[consumed..])?;
            let slot = versions.entry(table_id as u32).or_insert(0);
            *slot = (*slot).max(version as u32);
        }

        let mut singletons: HashMap<u32, u64> = HashMap::new();
        for (key, value) in scan_prefix(tr.as_mut(), keyspace::TABLE_SINGLETONS) {
            let (table_id, _) = vuint::decode(&key[keyspace::TABLE_SINGLETONS.len()..])?;
            let (oid, _) = vuint::decode(&value)?;
            singletons.insert(table_id as u32, oid);
        }

        let mut last_oid = 0;
        if tr.find_last_key(keyspace::ALL_OBJECTS) {
            if let Some(oid) = tr.get_key().and_then(keyspace::oid_from_key) {
                last_oid = oid.as_u64();
            }
        }
        for oid in singletons.values() {
            last_oid = last_oid.max(*oid);
        }

        let mut dict_counter = 1;
        if tr.find_last_key(keyspace::ALL_DICTIONARIES) {
            if let Some(key) = tr.get_key() {
                let (dict_id, _) = vuint::decode(&key[keyspace::ALL_DICTIONARIES.len()..])?;
                dict_counter = dict_id + 1;
            }
        }

        let persisted = names
            .into_iter()
            .map(|(id, name)| {
                (
                    name,
                    PersistedTable {
                        id: TableId::new(id),
                        last_version: versions.get(&id).copied().unwrap_or(0),
                        singleton_oid: singletons.get(&id).copied().unwrap_or(0),
                    },
                )
            })
            .collect();

        Ok(Recovered {
            persisted,
            last_oid,
            dict_counter,
        })
    }
}

struct Recovered {
    persisted: HashMap<String, PersistedTable>,
    last_oid: u64,
    dict_counter: u64,
}

fn scan_prefix(tr: &mut dyn KvTransaction, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut rows = Vec::new();
    let mut more = tr.find_first_key(prefix);
    while more {
        if let (Some(key), Some(value)) = (tr.get_key(), tr.get_value()) {
            rows.push((key.to_vec(), value));
        }
        more = tr.find_next_key(prefix);
    }
    rows
}

impl fmt::Debug for ObjectDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDb")
            .field("last_allocated_oid", &self.last_allocated_oid())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
