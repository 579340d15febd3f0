//! Table metadata and per-type handler registration.

mod registry;

pub use registry::TableRegistry;
pub(crate) use registry::PersistedTable;

use crate::error::{OdbError, OdbResult};
use crate::object::ObjRef;
use crate::transaction::inline::{ObjectReader, ObjectWriter};
use crate::transaction::ObjectTransaction;
use crate::types::{Oid, TableId};
use parking_lot::{Mutex, RwLock};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Creates a blank instance of the table's type.
pub type CreatorFn = dyn Fn() -> ObjRef + Send + Sync;
/// Populates a freshly created object with its defaults.
pub type InitializerFn = dyn Fn(&ObjectTransaction, &ObjRef) -> OdbResult<()> + Send + Sync;
/// Serializes an object's fields into a payload writer.
pub type SaverFn = dyn Fn(&mut ObjectWriter<'_>, &ObjRef) -> OdbResult<()> + Send + Sync;
/// Deserializes an object's fields from a payload reader.
pub type LoaderFn = dyn Fn(&mut ObjectReader<'_, '_>, &ObjRef) -> OdbResult<()> + Send + Sync;
/// Structural traversal collecting the dictionary ids a stored object
/// owns, without materializing it.
pub type FreeContentFn = dyn Fn(&mut ObjectReader<'_, '_>, &mut Vec<u64>) -> OdbResult<()> + Send + Sync;

/// The per-type serialization functions a code generator would emit,
/// registered as opaque closures.
#[derive(Clone)]
pub struct TableHandlers {
    pub(crate) creator: Arc<CreatorFn>,
    pub(crate) initializer: Option<Arc<InitializerFn>>,
    pub(crate) saver: Arc<SaverFn>,
    pub(crate) loader: Arc<LoaderFn>,
    pub(crate) free_content: Option<Arc<FreeContentFn>>,
}

impl TableHandlers {
    /// Creates a handler set from the three mandatory functions.
    pub fn new(
        creator: impl Fn() -> ObjRef + Send + Sync + 'static,
        saver: impl Fn(&mut ObjectWriter<'_>, &ObjRef) -> OdbResult<()> + Send + Sync + 'static,
        loader: impl Fn(&mut ObjectReader<'_, '_>, &ObjRef) -> OdbResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            creator: Arc::new(creator),
            initializer: None,
            saver: Arc::new(saver),
            loader: Arc::new(loader),
            free_content: None,
        }
    }

    /// Adds an initializer run when a fresh object is created through
    /// the transaction (new objects and fresh singletons).
    #[must_use]
    pub fn with_initializer(
        mut self,
        initializer: impl Fn(&ObjectTransaction, &ObjRef) -> OdbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Adds a free-content traversal for the current version.
    #[must_use]
    pub fn with_free_content(
        mut self,
        free_content: impl Fn(&mut ObjectReader<'_, '_>, &mut Vec<u64>) -> OdbResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.free_content = Some(Arc::new(free_content));
        self
    }
}

impl fmt::Debug for TableHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHandlers")
            .field("has_initializer", &self.initializer.is_some())
            .field("has_free_content", &self.free_content.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) struct VersionHandlers {
    pub loader: Arc<LoaderFn>,
    pub free_content: Option<Arc<FreeContentFn>>,
}

/// Singleton content bytes cached under the transaction number they were
/// read at. Writers invalidate the slot at `transaction_number + 1` when
/// they overwrite or delete the singleton, so no later snapshot can see
/// the stale buffer.
pub struct SingletonContentCache {
    slot: Mutex<(u64, Option<Vec<u8>>)>,
}

impl SingletonContentCache {
    fn new() -> Self {
        Self {
            slot: Mutex::new((0, None)),
        }
    }

    /// Returns the cached bytes if they were cached at exactly
    /// `transaction_number`.
    #[must_use]
    pub fn get(&self, transaction_number: u64) -> Option<Vec<u8>> {
        let slot = self.slot.lock();
        if slot.0 == transaction_number {
            slot.1.clone()
        } else {
            None
        }
    }

    /// Caches `bytes` for `transaction_number`.
    pub fn cache(&self, transaction_number: u64, bytes: Vec<u8>) {
        *self.slot.lock() = (transaction_number, Some(bytes));
    }

    /// Forgets any cached bytes, pinning the slot to
    /// `transaction_number` with no content.
    pub fn invalidate(&self, transaction_number: u64) {
        *self.slot.lock() = (transaction_number, None);
    }
}

/// Metadata and handlers of one registered table.
///
/// Shared across transactions; the slots mutated at commit
/// (`last_persisted_version`, `need_store_singleton_oid`) and the lazily
/// resolved `singleton_oid` are atomics.
pub struct TableInfo {
    id: TableId,
    name: String,
    client_type: TypeId,
    client_type_name: &'static str,
    client_type_version: u32,
    version_descriptor: Vec<u8>,
    last_persisted_version: AtomicU32,
    need_store_singleton_oid: AtomicBool,
    singleton_oid: AtomicU64,
    handlers: TableHandlers,
    versions: RwLock<HashMap<u32, VersionHandlers>>,
    singleton_content: SingletonContentCache,
}

impl TableInfo {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: TableId,
        name: String,
        client_type: TypeId,
        client_type_name: &'static str,
        client_type_version: u32,
        version_descriptor: Vec<u8>,
        last_persisted_version: u32,
        singleton_oid: u64,
        handlers: TableHandlers,
    ) -> Self {
        let mut versions = HashMap::new();
        versions.insert(
            client_type_version,
            VersionHandlers {
                loader: Arc::clone(&handlers.loader),
                free_content: handlers.free_content.clone(),
            },
        );
        Self {
            id,
            name,
            client_type,
            client_type_name,
            client_type_version,
            version_descriptor,
            last_persisted_version: AtomicU32::new(last_persisted_version),
            need_store_singleton_oid: AtomicBool::new(false),
            singleton_oid: AtomicU64::new(singleton_oid),
            handlers,
            versions: RwLock::new(versions),
            singleton_content: SingletonContentCache::new(),
        }
    }

    /// Returns the table id.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the `TypeId` of the client type.
    #[must_use]
    pub fn client_type(&self) -> TypeId {
        self.client_type
    }

    /// Returns the client type's name, for diagnostics.
    #[must_use]
    pub fn client_type_name(&self) -> &'static str {
        self.client_type_name
    }

    /// Returns the schema version of the registered client type.
    #[must_use]
    pub fn client_type_version(&self) -> u32 {
        self.client_type_version
    }

    /// Returns the opaque descriptor persisted per schema version.
    #[must_use]
    pub fn version_descriptor(&self) -> &[u8] {
        &self.version_descriptor
    }

    /// Returns the schema version last persisted to the store, zero if
    /// never persisted.
    #[must_use]
    pub fn last_persisted_version(&self) -> u32 {
        self.last_persisted_version.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_persisted_version(&self, version: u32) {
        self.last_persisted_version.store(version, Ordering::Release);
    }

    /// Returns `true` if the singleton oid still awaits persistence.
    #[must_use]
    pub fn need_store_singleton_oid(&self) -> bool {
        self.need_store_singleton_oid.load(Ordering::Acquire)
    }

    pub(crate) fn set_need_store_singleton_oid(&self, value: bool) {
        self.need_store_singleton_oid.store(value, Ordering::Release);
    }

    /// Returns the singleton oid, zero while unresolved.
    #[must_use]
    pub fn singleton_oid(&self) -> Oid {
        Oid::new(self.singleton_oid.load(Ordering::Acquire))
    }

    pub(crate) fn set_singleton_oid(&self, oid: Oid) {
        self.singleton_oid.store(oid.as_u64(), Ordering::Release);
    }

    /// Returns the per-transaction-number singleton content cache.
    #[must_use]
    pub fn singleton_content(&self) -> &SingletonContentCache {
        &self.singleton_content
    }

    pub(crate) fn creator(&self) -> Arc<CreatorFn> {
        Arc::clone(&self.handlers.creator)
    }

    pub(crate) fn initializer(&self) -> Option<Arc<InitializerFn>> {
        self.handlers.initializer.clone()
    }

    pub(crate) fn saver(&self) -> Arc<SaverFn> {
        Arc::clone(&self.handlers.saver)
    }

    /// Returns the loader registered for `version`.
    pub(crate) fn loader(&self, version: u32) -> OdbResult<Arc<LoaderFn>> {
        self.versions
            .read()
            .get(&version)
            .map(|v| Arc::clone(&v.loader))
            .ok_or_else(|| {
                OdbError::corrupted(format!(
                    "no loader for table {} version {version}",
                    self.name
                ))
            })
    }

    /// Returns the free-content traversal for `version`, if one was
    /// registered.
    pub(crate) fn free_content(&self, version: u32) -> Option<Arc<FreeContentFn>> {
        self.versions
            .read()
            .get(&version)
            .and_then(|v| v.free_content.clone())
    }

    pub(crate) fn add_version(
        &self,
        version: u32,
        loader: Arc<LoaderFn>,
        free_content: Option<Arc<FreeContentFn>>,
    ) {
        self.versions.write().insert(
            version,
            VersionHandlers {
                loader,
                free_content,
            },
        );
    }
}

impl fmt::Debug for TableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("client_type_version", &self.client_type_version)
            .field("last_persisted_version", &self.last_persisted_version())
            .field("singleton_oid", &self.singleton_oid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::new_ref;

    fn noop_handlers() -> TableHandlers {
        TableHandlers::new(|| new_ref(0u32), |_, _| Ok(()), |_, _| Ok(()))
    }

    fn table(version: u32, last_persisted: u32) -> TableInfo {
        TableInfo::new(
            TableId::new(1),
            "items".into(),
            TypeId::of::<u32>(),
            "u32",
            version,
            vec![1, 2],
            last_persisted,
            0,
            noop_handlers(),
        )
    }

    #[test]
    fn current_version_loader_is_preregistered() {
        let t = table(2, 0);
        assert!(t.loader(2).is_ok());
        assert!(t.loader(1).is_err());
    }

    #[test]
    fn older_versions_can_be_added() {
        let t = table(2, 0);
        t.add_version(1, Arc::new(|_, _| Ok(())), None);
        assert!(t.loader(1).is_ok());
        assert!(t.free_content(1).is_none());
    }

    #[test]
    fn singleton_content_cache_is_keyed_by_transaction_number() {
        let t = table(1, 0);
        let cache = t.singleton_content();
        assert!(cache.get(5).is_none());

        cache.cache(5, vec![1, 2, 3]);
        assert_eq!(cache.get(5), Some(vec![1, 2, 3]));
        assert!(cache.get(6).is_none());

        cache.invalidate(6);
        assert!(cache.get(5).is_none());
        assert!(cache.get(6).is_none());
    }

    #[test]
    fn commit_mutated_slots() {
        let t = table(3, 1);
        assert_eq!(t.last_persisted_version(), 1);
        t.set_last_persisted_version(3);
        assert_eq!(t.last_persisted_version(), 3);

        assert!(!t.need_store_singleton_oid());
        t.set_need_store_singleton_oid(true);
        assert!(t.need_store_singleton_oid());

        t.set_singleton_oid(Oid::new(9));
        assert_eq!(t.singleton_oid(), Oid::new(9));
    }
}
