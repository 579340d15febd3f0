//! The object transaction manager.

pub mod enumerate;
pub mod inline;
pub mod relation;

use crate::database::ObjectDb;
use crate::error::{OdbError, OdbResult};
use crate::keyspace;
use crate::object::{downcast_ref, type_id_of, Indirection, ObjRef, ObjectCache};
use crate::table::TableInfo;
use crate::transaction::enumerate::ObjectIter;
use crate::transaction::inline::{ObjectReader, ObjectWriter};
use crate::transaction::relation::{RelationChain, RelationFactory};
use crate::types::{ObjectMetadata, ObjectState, Oid, TableId, INLINE_SENTINEL};
use odb_codec::{vuint, Reader, Writer};
use odb_kv::{KvResult, KvTransaction};
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on commit drain rounds; surfaces saver callbacks that
/// keep re-enqueueing each other instead of reaching a fixpoint.
const COMMIT_DRAIN_LIMIT: u32 = 1_000_000;

/// One unit of work against the object store.
///
/// A transaction resolves objects by oid through its identity cache,
/// tracks mutated objects in a dirty set, and flushes everything to the
/// key-value engine at [`ObjectTransaction::commit`]. Dropping an
/// uncommitted transaction discards all pending writes.
///
/// A transaction is single-threaded by construction (`Rc`-based object
/// handles make it `!Send`); the owning [`ObjectDb`] hands out at most
/// one writing transaction at a time, while read-only transactions
/// observe the snapshot taken at their creation.
pub struct ObjectTransaction {
    db: Arc<ObjectDb>,
    kv: RefCell<Option<Box<dyn KvTransaction>>>,
    cache: RefCell<ObjectCache>,
    dirty: RefCell<Option<BTreeMap<u64, ObjRef>>>,
    updated_tables: RefCell<BTreeSet<TableId>>,
    persisted_tables: RefCell<BTreeSet<TableId>>,
    relations: RefCell<RelationChain>,
    /// Cursor guard: bumped by every operation that may move the engine
    /// cursor, checked by resumable scans before relative reads.
    cursor_generation: Cell<u64>,
    local_dict: Cell<u64>,
    transaction_number: u64,
    read_only: bool,
}

impl ObjectTransaction {
    pub(crate) fn new(db: Arc<ObjectDb>, kv: Box<dyn KvTransaction>) -> Self {
        let transaction_number = kv.transaction_number();
        let read_only = kv.is_read_only();
        let local_dict = db.dictionary_counter();
        Self {
            db,
            kv: RefCell::new(Some(kv)),
            cache: RefCell::new(ObjectCache::new()),
            dirty: RefCell::new(None),
            updated_tables: RefCell::new(BTreeSet::new()),
            persisted_tables: RefCell::new(BTreeSet::new()),
            relations: RefCell::new(RelationChain::default()),
            cursor_generation: Cell::new(0),
            local_dict: Cell::new(local_dict),
            transaction_number,
            read_only,
        }
    }

    /// Returns the owning database.
    #[must_use]
    pub fn db(&self) -> &Arc<ObjectDb> {
        &self.db
    }

    /// Returns `true` for read-only transactions.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the engine snapshot number of this transaction.
    #[must_use]
    pub fn transaction_number(&self) -> u64 {
        self.transaction_number
    }

    // --- lookup ---------------------------------------------------------

    /// Resolves an object by oid.
    ///
    /// Returns the identical handle for repeated lookups within one
    /// transaction. `None` for the unassigned oid, unknown oids, and
    /// oids deleted in this transaction.
    ///
    /// # Errors
    ///
    /// Propagates engine and decode errors.
    pub fn get(&self, oid: Oid) -> OdbResult<Option<ObjRef>> {
        if !oid.is_assigned() {
            return Ok(None);
        }
        if let Some(obj) = self.cache.borrow_mut().get_by_oid(oid) {
            return Ok(Some(obj));
        }
        let key = keyspace::all_objects_key(oid);
        self.bump_cursor_generation();
        let value = self.with_kv(|kv| {
            if kv.find_exact(&key) {
                kv.get_value()
            } else {
                None
            }
        })?;
        match value {
            Some(bytes) => self.materialize(oid, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the oid of a live object, unassigned if the object was
    /// never stored in this transaction.
    #[must_use]
    pub fn get_oid(&self, obj: &ObjRef) -> Oid {
        self.cache
            .borrow()
            .metadata(obj)
            .map_or(Oid::UNASSIGNED, |meta| meta.id)
    }

    /// Returns `(key_len, value_len)` of the stored content of `oid`.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn get_storage_size(&self, oid: Oid) -> OdbResult<Option<(u32, u32)>> {
        let key = keyspace::all_objects_key(oid);
        self.with_kv(|kv| kv.storage_size(&key))
    }

    // --- creation & store -----------------------------------------------

    /// Creates a fresh, not-yet-stored object of table type `T`.
    ///
    /// The object carries unassigned-dirty metadata; it is only
    /// persisted once [`ObjectTransaction::store`] assigns it an oid.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::UnknownType`] if `T` is not registered.
    pub fn new_object<T: 'static>(&self) -> OdbResult<ObjRef> {
        self.new_object_dyn(TypeId::of::<T>())
    }

    /// Type-erased form of [`ObjectTransaction::new_object`].
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::UnknownType`] if the type is not registered.
    pub fn new_object_dyn(&self, client_type: TypeId) -> OdbResult<ObjRef> {
        let table = self.table_for_type(client_type)?;
        let obj = (*table.creator())();
        if let Some(init) = table.initializer() {
            (*init)(self, &obj)?;
        }
        self.cache
            .borrow_mut()
            .set_metadata(&obj, ObjectMetadata::dirty(Oid::UNASSIGNED));
        Ok(obj)
    }

    /// Marks an object for persistence at commit, allocating its oid on
    /// first store. Storing an already-dirty object is a no-op; storing
    /// a deleted object returns its oid without resurrecting it. An
    /// indirection stores its target (binding the indirection's oid) or
    /// passes through the oid it already carries.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::UnknownType`] for unregistered types and
    /// [`OdbError::InvalidStorage`] for non-storable values.
    pub fn store(&self, obj: &ObjRef) -> OdbResult<Oid> {
        if let Some(ind) = downcast_ref::<Indirection>(obj) {
            let oid = ind.oid();
            if oid.is_assigned() {
                return Ok(oid);
            }
            let target = ind.target();
            drop(ind);
            let Some(target) = target else {
                return Err(OdbError::InvalidStorage {
                    type_name: "Indirection".into(),
                });
            };
            let oid = self.store(&target)?;
            if let Some(ind) = downcast_ref::<Indirection>(obj) {
                ind.set_oid(oid);
            }
            return Ok(oid);
        }
        self.store_inner(obj)
    }

    fn store_inner(&self, obj: &ObjRef) -> OdbResult<Oid> {
        let table = self.table_for_object(obj)?;
        let existing = self.cache.borrow().metadata(obj);
        match existing {
            Some(meta) if meta.state == ObjectState::Deleted => Ok(meta.id),
            Some(meta) if meta.id.is_assigned() => {
                if meta.state != ObjectState::Dirty {
                    self.cache
                        .borrow_mut()
                        .set_metadata(obj, ObjectMetadata::dirty(meta.id));
                    self.mark_table_updated(&table);
                    self.enqueue_dirty(meta.id, obj);
                }
                Ok(meta.id)
            }
            _ => {
                let oid = self.db.allocate_oid();
                self.cache
                    .borrow_mut()
                    .insert(oid, obj, ObjectMetadata::dirty(oid));
                self.mark_table_updated(&table);
                self.enqueue_dirty(oid, obj);
                Ok(oid)
            }
        }
    }

    /// Stores an object and writes its content to the engine
    /// immediately instead of waiting for commit. The schema rows of
    /// every pending table are flushed along with it.
    ///
    /// # Errors
    ///
    /// As [`ObjectTransaction::store`], plus engine write errors.
    pub fn store_and_flush(&self, obj: &ObjRef) -> OdbResult<Oid> {
        let oid = self.store(obj)?;
        let pending = self
            .dirty
            .borrow()
            .as_ref()
            .and_then(|map| map.get(&oid.as_u64()).cloned());
        if let Some(target) = pending {
            self.store_object_content(oid, &target)?;
            self.remove_dirty(oid);
            self.cache
                .borrow_mut()
                .set_metadata(&target, ObjectMetadata::read(oid));
        }
        self.persist_schema()?;
        Ok(oid)
    }

    /// Decides whether an object referenced from another object's
    /// payload is written by oid or inline.
    ///
    /// Returns the oid when the object has a stored copy, otherwise
    /// [`INLINE_SENTINEL`] telling the caller to inline it.
    /// `force_inline` erases an existing stored copy first. With
    /// `auto_register` an unregistered type is an error instead of
    /// falling back to inlining.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::UnknownType`] when `auto_register` is set and
    /// the type has no registered table.
    pub fn store_if_not_inlined(
        &self,
        obj: &ObjRef,
        auto_register: bool,
        force_inline: bool,
    ) -> OdbResult<u64> {
        if let Some(ind) = downcast_ref::<Indirection>(obj) {
            let oid = ind.oid();
            if oid.is_assigned() {
                return Ok(oid.as_u64());
            }
            let target = ind.target();
            drop(ind);
            return match target {
                Some(target) => self.store_if_not_inlined(&target, auto_register, force_inline),
                None => Ok(INLINE_SENTINEL),
            };
        }
        let client_type = type_id_of(obj);
        if self.db.registry().by_type(client_type).is_none() {
            if auto_register {
                return Err(OdbError::UnknownType {
                    type_name: format!("{client_type:?}"),
                });
            }
            return Ok(INLINE_SENTINEL);
        }
        let meta = self.cache.borrow().metadata(obj);
        match meta {
            Some(meta) if meta.state == ObjectState::Deleted => Ok(INLINE_SENTINEL),
            Some(meta) if meta.id.is_assigned() => {
                if force_inline {
                    self.delete_object(obj)?;
                    Ok(INLINE_SENTINEL)
                } else {
                    Ok(meta.id.as_u64())
                }
            }
            _ => Ok(INLINE_SENTINEL),
        }
    }

    // --- singleton ------------------------------------------------------

    /// Resolves the per-table root object of `T`, materializing it from
    /// the cached singleton buffer or the store, or creating it fresh as
    /// a dirty object on first access.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::SingletonTypeMismatch`] when the stored
    /// singleton belongs to a different table.
    pub fn singleton<T: 'static>(&self) -> OdbResult<ObjRef> {
        self.singleton_dyn(TypeId::of::<T>())
    }

    /// Type-erased form of [`ObjectTransaction::singleton`].
    ///
    /// # Errors
    ///
    /// As [`ObjectTransaction::singleton`].
    pub fn singleton_dyn(&self, client_type: TypeId) -> OdbResult<ObjRef> {
        let table = self.table_for_type(client_type)?;
        let oid = self.singleton_oid(&table)?;

        if let Some(obj) = self.cache.borrow_mut().get_by_oid(oid) {
            if type_id_of(&obj) != table.client_type() {
                return Err(OdbError::SingletonTypeMismatch {
                    oid: oid.as_u64(),
                    table_name: table.name().to_owned(),
                });
            }
            return Ok(obj);
        }

        let content = match table.singleton_content().get(self.transaction_number) {
            Some(bytes) => Some(bytes),
            None => {
                let key = keyspace::all_objects_key(oid);
                self.bump_cursor_generation();
                let value = self.with_kv(|kv| {
                    if kv.find_exact(&key) {
                        kv.get_value()
                    } else {
                        None
                    }
                })?;
                if let Some(bytes) = &value {
                    table
                        .singleton_content()
                        .cache(self.transaction_number, bytes.clone());
                }
                value
            }
        };

        if let Some(bytes) = content {
            let stored_table = Reader::new(&bytes).read_vu32()?;
            if stored_table != table.id().as_u32() {
                return Err(OdbError::SingletonTypeMismatch {
                    oid: oid.as_u64(),
                    table_name: table.name().to_owned(),
                });
            }
            return self.materialize(oid, &bytes);
        }

        // First materialization: a fresh dirty root. The table leaves
        // the updated set so the mutation path re-adds it after the
        // singleton oid flag is in place.
        let obj = (*table.creator())();
        if let Some(init) = table.initializer() {
            (*init)(self, &obj)?;
        }
        self.cache
            .borrow_mut()
            .insert(oid, &obj, ObjectMetadata::dirty(oid));
        self.enqueue_dirty(oid, &obj);
        self.updated_tables.borrow_mut().remove(&table.id());
        self.mark_table_updated(&table);
        Ok(obj)
    }

    fn singleton_oid(&self, table: &Arc<TableInfo>) -> OdbResult<Oid> {
        let current = table.singleton_oid();
        if current.is_assigned() {
            return Ok(current);
        }
        let key = keyspace::table_singletons_key(table.id());
        self.bump_cursor_generation();
        let value = self.with_kv(|kv| {
            if kv.find_exact(&key) {
                kv.get_value()
            } else {
                None
            }
        })?;
        if let Some(bytes) = value {
            let (oid, _) = vuint::decode(&bytes)?;
            let oid = Oid::new(oid);
            table.set_singleton_oid(oid);
            return Ok(oid);
        }
        let oid = self.db.allocate_oid();
        table.set_singleton_oid(oid);
        table.set_need_store_singleton_oid(true);
        Ok(oid)
    }

    /// Returns the client types of every table with a singleton,
    /// persisted or pending in memory.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn singleton_types(&self) -> OdbResult<Vec<TypeId>> {
        self.bump_cursor_generation();
        let ids = self.with_kv(|kv| {
            let mut ids = Vec::new();
            let mut more = kv.find_first_key(keyspace::TABLE_SINGLETONS);
            while more {
                if let Some(key) = kv.get_key() {
                    if let Ok((table_id, _)) =
                        vuint::decode(&key[keyspace::TABLE_SINGLETONS.len()..])
                    {
                        if let Ok(table_id) = u32::try_from(table_id) {
                            ids.push(table_id);
                        }
                    }
                }
                more = kv.find_next_key(keyspace::TABLE_SINGLETONS);
            }
            ids
        })?;
        let registry = self.db.registry();
        let mut out = Vec::new();
        for table_id in ids {
            if let Some(table) = registry.by_id(TableId::new(table_id)) {
                out.push(table.client_type());
            }
        }
        for table in registry.tables() {
            if table.singleton_oid().is_assigned() && !out.contains(&table.client_type()) {
                out.push(table.client_type());
            }
        }
        Ok(out)
    }

    // --- enumeration ----------------------------------------------------

    /// Enumerates all objects in oid order, optionally filtered to one
    /// table type.
    #[must_use]
    pub fn enumerate(&self, filter: Option<TypeId>) -> ObjectIter<'_> {
        ObjectIter::new(self, filter)
    }

    /// Enumerates the objects of table type `T` in oid order.
    #[must_use]
    pub fn enumerate_of<T: 'static>(&self) -> ObjectIter<'_> {
        ObjectIter::new(self, Some(TypeId::of::<T>()))
    }

    // --- delete ---------------------------------------------------------

    /// Deletes an object. Unknown objects get a deleted stub that
    /// suppresses later stores within this transaction; indirections
    /// delegate to their oid or unwrap to their target.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn delete_object(&self, obj: &ObjRef) -> OdbResult<()> {
        if let Some(ind) = downcast_ref::<Indirection>(obj) {
            let oid = ind.oid();
            let target = ind.target();
            drop(ind);
            if oid.is_assigned() {
                return self.delete_oid(oid);
            }
            if let Some(target) = target {
                return self.delete_object(&target);
            }
            return Ok(());
        }
        let meta = self.cache.borrow().metadata(obj);
        match meta {
            Some(meta) if meta.state == ObjectState::Deleted => Ok(()),
            Some(meta) if meta.id.is_assigned() => self.delete_assigned(meta.id, Some(obj)),
            _ => {
                self.cache
                    .borrow_mut()
                    .set_metadata(obj, ObjectMetadata::deleted(Oid::UNASSIGNED));
                Ok(())
            }
        }
    }

    /// Deletes the object stored under `oid`.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn delete_oid(&self, oid: Oid) -> OdbResult<()> {
        if !oid.is_assigned() {
            return Ok(());
        }
        let obj = self.cache.borrow_mut().get_by_oid(oid);
        self.delete_assigned(oid, obj.as_ref())
    }

    fn delete_assigned(&self, oid: Oid, obj: Option<&ObjRef>) -> OdbResult<()> {
        let key = keyspace::all_objects_key(oid);
        self.bump_cursor_generation();
        let stored = self.with_kv(|kv| {
            if kv.find_exact(&key) {
                kv.get_value()
            } else {
                None
            }
        })?;

        if let Some(bytes) = &stored {
            self.free_owned_dictionaries(bytes)?;
            let table_id = TableId::new(Reader::new(bytes).read_vu32()?);
            if let Some(table) = self.db.registry().by_id(table_id) {
                if table.singleton_oid() == oid {
                    table
                        .singleton_content()
                        .invalidate(self.transaction_number + 1);
                }
            }
            self.bump_cursor_generation();
            self.with_kv(|kv| -> KvResult<()> {
                if kv.find_exact(&key) {
                    kv.erase_current()?;
                }
                Ok(())
            })??;
        } else if let Some(obj) = obj {
            // Never flushed; only the singleton cache may know the oid.
            if let Ok(table) = self.table_for_object(obj) {
                if table.singleton_oid() == oid {
                    table
                        .singleton_content()
                        .invalidate(self.transaction_number + 1);
                }
            }
        }

        {
            let mut cache = self.cache.borrow_mut();
            cache.remove_oid(oid);
            if let Some(obj) = obj {
                cache.set_metadata(obj, ObjectMetadata::deleted(oid));
            }
        }
        self.remove_dirty(oid);
        Ok(())
    }

    fn free_owned_dictionaries(&self, bytes: &[u8]) -> OdbResult<()> {
        let mut input = Reader::new(bytes);
        let table_id = TableId::new(input.read_vu32()?);
        let version = input.read_vu32()?;
        let Some(table) = self.db.registry().by_id(table_id) else {
            return Ok(());
        };
        let Some(free) = table.free_content(version) else {
            return Ok(());
        };
        let mut dict_ids = Vec::new();
        {
            let mut reader = ObjectReader::new(self, &mut input);
            (*free)(&mut reader, &mut dict_ids)?;
        }
        for dict_id in dict_ids {
            self.bump_cursor_generation();
            self.with_kv(|kv| kv.erase_prefix(&keyspace::dictionary_prefix(dict_id)))??;
        }
        Ok(())
    }

    /// Deletes every object matching the filter (all objects for
    /// `None`). Deletion during the underlying enumeration is safe; the
    /// cursor guard repositions the scan after each erase.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn delete_all(&self, filter: Option<TypeId>) -> OdbResult<()> {
        let mut iter = self.enumerate(filter);
        while let Some(obj) = iter.next() {
            self.delete_object(&obj?)?;
        }
        Ok(())
    }

    /// Typed form of [`ObjectTransaction::delete_all`].
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn delete_all_of<T: 'static>(&self) -> OdbResult<()> {
        self.delete_all(Some(TypeId::of::<T>()))
    }

    /// Erases all object, dictionary, and relation content wholesale,
    /// keeping the schema rows. Transaction-local state is reset.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn delete_all_data(&self) -> OdbResult<()> {
        debug!("erasing all object data");
        self.bump_cursor_generation();
        self.with_kv(|kv| -> KvResult<()> {
            kv.erase_prefix(keyspace::ALL_OBJECTS)?;
            kv.erase_prefix(keyspace::ALL_DICTIONARIES)?;
            kv.erase_prefix(keyspace::ALL_RELATIONS_PK)?;
            kv.erase_prefix(keyspace::ALL_RELATIONS_SK)?;
            Ok(())
        })??;
        self.cache.borrow_mut().clear();
        *self.dirty.borrow_mut() = None;
        self.updated_tables.borrow_mut().clear();
        for table in self.db.registry().tables() {
            table
                .singleton_content()
                .invalidate(self.transaction_number + 1);
        }
        Ok(())
    }

    // --- relations ------------------------------------------------------

    /// Returns the transaction-bound relation instance of type `R`,
    /// creating it through the owner's factory on first use.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::AutoRegistrationForbidden`] or
    /// [`OdbError::RelationShapeInvalid`] when the factory cannot be
    /// resolved.
    pub fn get_relation<R: 'static>(&self) -> OdbResult<Rc<R>> {
        self.get_relation_dyn(TypeId::of::<R>())?
            .downcast::<R>()
            .map_err(|_| OdbError::corrupted("relation instance has unexpected type"))
    }

    /// Type-erased form of [`ObjectTransaction::get_relation`].
    ///
    /// # Errors
    ///
    /// As [`ObjectTransaction::get_relation`].
    pub fn get_relation_dyn(&self, type_id: TypeId) -> OdbResult<Rc<dyn Any>> {
        loop {
            if let Some(instance) = self.relations.borrow_mut().lookup(type_id) {
                return Ok(instance);
            }
            let factory = match self.db.relation_factory(type_id) {
                Some(factory) => factory,
                None => self.db.auto_register_relation(type_id)?,
            };
            let instance = (*factory)(self)?;
            self.relations.borrow_mut().insert(type_id, instance);
        }
    }

    /// Registers the declared relation constructor of `type_id` under
    /// `name` on the owner and returns the factory.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::RelationShapeInvalid`] if no constructor was
    /// declared.
    pub fn init_relation(&self, name: &str, type_id: TypeId) -> OdbResult<RelationFactory> {
        self.db.init_relation(name, type_id)
    }

    /// Returns the types of every initialized relation.
    #[must_use]
    pub fn relation_types(&self) -> Vec<TypeId> {
        self.db.relation_types()
    }

    // --- commit ---------------------------------------------------------

    /// Commits the transaction: drains the dirty set to the engine
    /// (savers may enqueue further objects; the drain loops to a
    /// fixpoint), persists pending schema rows, flushes the dictionary
    /// counter, and commits the engine transaction. The engine
    /// transaction is released in all outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::CommitDrainOverflow`] if the drain never
    /// converges; propagates engine and serialization errors.
    pub fn commit(&self) -> OdbResult<()> {
        let mut rounds = 0u32;
        let mut written = 0usize;
        while let Some(batch) = self.take_dirty() {
            if batch.is_empty() {
                break;
            }
            rounds += 1;
            if rounds > COMMIT_DRAIN_LIMIT {
                return Err(OdbError::CommitDrainOverflow);
            }
            for (oid, obj) in &batch {
                self.store_object_content(Oid::new(*oid), obj)?;
                written += 1;
            }
        }
        self.persist_schema()?;
        self.db.commit_dictionary_counter(self.local_dict.get());

        let kv = self
            .kv
            .borrow_mut()
            .take()
            .ok_or_else(|| OdbError::invalid_operation("transaction already committed"))?;
        if !self.read_only {
            kv.commit()?;
        }

        for table_id in std::mem::take(&mut *self.persisted_tables.borrow_mut()) {
            if let Some(table) = self.db.registry().by_id(table_id) {
                table.set_last_persisted_version(table.client_type_version());
                table.set_need_store_singleton_oid(false);
            }
        }
        debug!(objects = written, rounds, "object transaction committed");
        Ok(())
    }

    fn store_object_content(&self, oid: Oid, obj: &ObjRef) -> OdbResult<()> {
        let meta = self
            .cache
            .borrow()
            .metadata(obj)
            .ok_or(OdbError::MissingMetadata)?;
        if meta.state == ObjectState::Deleted {
            return Ok(());
        }
        let table = self.table_for_object(obj)?;
        let mut payload = Writer::new();
        payload.write_vu32(table.id().as_u32());
        payload.write_vu32(table.client_type_version());
        {
            let mut writer = ObjectWriter::new(self, &mut payload);
            let saver = table.saver();
            (*saver)(&mut writer, obj)?;
        }
        if table.singleton_oid() == oid {
            table
                .singleton_content()
                .invalidate(self.transaction_number + 1);
        }
        self.put_kv(&keyspace::all_objects_key(oid), payload.as_bytes())
    }

    /// Writes the pending schema rows: table name on first persistence,
    /// the version descriptor when the persisted version lags, and the
    /// singleton oid when flagged. Read-only transactions skip this.
    fn persist_schema(&self) -> OdbResult<()> {
        if self.read_only {
            self.updated_tables.borrow_mut().clear();
            return Ok(());
        }
        loop {
            let drained = std::mem::take(&mut *self.updated_tables.borrow_mut());
            if drained.is_empty() {
                return Ok(());
            }
            for table_id in drained {
                let table = self.db.registry().by_id(table_id).ok_or_else(|| {
                    OdbError::corrupted(format!("updated table {table_id} vanished"))
                })?;
                debug!(table = table.name(), "persisting table schema");
                if table.last_persisted_version() == 0 {
                    let mut name = Writer::new();
                    name.write_string(table.name());
                    self.put_kv(&keyspace::table_names_key(table_id), name.as_bytes())?;
                }
                if table.last_persisted_version() != table.client_type_version() {
                    self.put_kv(
                        &keyspace::table_versions_key(table_id, table.client_type_version()),
                        table.version_descriptor(),
                    )?;
                }
                if table.need_store_singleton_oid() {
                    self.put_kv(
                        &keyspace::table_singletons_key(table_id),
                        &vuint::encode(table.singleton_oid().as_u64()),
                    )?;
                }
                self.persisted_tables.borrow_mut().insert(table_id);
            }
        }
    }

    // --- counters -------------------------------------------------------

    /// Hands out the next dictionary id from the transaction-local
    /// counter; the counter is flushed to the owner at commit.
    pub fn allocate_dictionary_id(&self) -> u64 {
        let id = self.local_dict.get();
        self.local_dict.set(id + 1);
        id
    }

    /// Reads the user commit counter of the underlying snapshot.
    ///
    /// # Errors
    ///
    /// Fails after the transaction has committed.
    pub fn commit_ulong(&self) -> OdbResult<u64> {
        self.with_kv(|kv| kv.commit_ulong())
    }

    /// Sets the user commit counter published at commit.
    ///
    /// # Errors
    ///
    /// Fails after the transaction has committed.
    pub fn set_commit_ulong(&self, value: u64) -> OdbResult<()> {
        self.with_kv(|kv| kv.set_commit_ulong(value))
    }

    /// Asks the engine to cycle its transaction log after the next
    /// commit.
    ///
    /// # Errors
    ///
    /// Fails after the transaction has committed.
    pub fn next_commit_temporary_close_log(&self) -> OdbResult<()> {
        self.with_kv(|kv| kv.next_commit_temporary_close_log())
    }

    /// Sweeps reclaimed weak entries out of the identity cache.
    pub fn compact_cache(&self) {
        self.cache.borrow_mut().compact();
    }

    // --- internals ------------------------------------------------------

    pub(crate) fn with_kv<R>(
        &self,
        f: impl FnOnce(&mut dyn KvTransaction) -> R,
    ) -> OdbResult<R> {
        let mut kv = self.kv.borrow_mut();
        let kv = kv
            .as_deref_mut()
            .ok_or_else(|| OdbError::invalid_operation("transaction already finished"))?;
        Ok(f(kv))
    }

    pub(crate) fn put_kv(&self, key: &[u8], value: &[u8]) -> OdbResult<()> {
        self.bump_cursor_generation();
        self.with_kv(|kv| kv.create_or_update(key, value))??;
        Ok(())
    }

    pub(crate) fn cursor_generation(&self) -> u64 {
        self.cursor_generation.get()
    }

    pub(crate) fn bump_cursor_generation(&self) {
        self.cursor_generation.set(self.cursor_generation.get() + 1);
    }

    pub(crate) fn cached_by_oid(&self, oid: Oid) -> Option<ObjRef> {
        self.cache.borrow_mut().get_by_oid(oid)
    }

    /// Decodes the payload header and runs the version's loader,
    /// inserting the object into the identity cache *before* the loader
    /// so cyclic references can resolve it.
    pub(crate) fn materialize(&self, oid: Oid, bytes: &[u8]) -> OdbResult<ObjRef> {
        let mut input = Reader::new(bytes);
        let table_id = TableId::new(input.read_vu32()?);
        let version = input.read_vu32()?;
        let table = self
            .db
            .registry()
            .by_id(table_id)
            .ok_or(OdbError::UnknownTypeId {
                table_id: table_id.as_u32(),
            })?;
        let obj = (*table.creator())();
        self.cache
            .borrow_mut()
            .insert(oid, &obj, ObjectMetadata::read(oid));
        let loader = table.loader(version)?;
        let mut reader = ObjectReader::new(self, &mut input);
        reader.register_object(&obj);
        (*loader)(&mut reader, &obj)?;
        Ok(obj)
    }

    pub(crate) fn table_for_object(&self, obj: &ObjRef) -> OdbResult<Arc<TableInfo>> {
        let client_type = type_id_of(obj);
        if client_type == TypeId::of::<Indirection>() {
            return Err(OdbError::InvalidStorage {
                type_name: "Indirection".into(),
            });
        }
        self.table_for_type(client_type)
    }

    fn table_for_type(&self, client_type: TypeId) -> OdbResult<Arc<TableInfo>> {
        self.db
            .registry()
            .by_type(client_type)
            .ok_or_else(|| OdbError::UnknownType {
                type_name: format!("{client_type:?}"),
            })
    }

    /// Queues a table for schema persistence when its persisted version
    /// lags or its singleton oid awaits storage.
    pub(crate) fn mark_table_updated(&self, table: &Arc<TableInfo>) {
        if self.read_only {
            return;
        }
        if table.last_persisted_version() != table.client_type_version()
            || table.need_store_singleton_oid()
        {
            self.updated_tables.borrow_mut().insert(table.id());
        }
    }

    fn enqueue_dirty(&self, oid: Oid, obj: &ObjRef) {
        self.dirty
            .borrow_mut()
            .get_or_insert_with(BTreeMap::new)
            .insert(oid.as_u64(), Rc::clone(obj));
    }

    fn remove_dirty(&self, oid: Oid) {
        if let Some(map) = self.dirty.borrow_mut().as_mut() {
            map.remove(&oid.as_u64());
        }
    }

    fn take_dirty(&self) -> Option<BTreeMap<u64, ObjRef>> {
        self.dirty.borrow_mut().take()
    }

    /// Dirty objects with `after < oid <= limit` in oid order, filtered
    /// by table type. The enumeration tail merge.
    pub(crate) fn dirty_tail(
        &self,
        after: u64,
        limit: u64,
        filter: Option<TypeId>,
    ) -> Vec<ObjRef> {
        if limit <= after {
            return Vec::new();
        }
        let dirty = self.dirty.borrow();
        let Some(map) = dirty.as_ref() else {
            return Vec::new();
        };
        map.range((Bound::Excluded(after), Bound::Included(limit)))
            .filter(|(_, obj)| filter.map_or(true, |f| type_id_of(obj) == f))
            .map(|(_, obj)| Rc::clone(obj))
            .collect()
    }
}

impl fmt::Debug for ObjectTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTransaction")
            .field("transaction_number", &self.transaction_number)
            .field("read_only", &self.read_only)
            .field("cache", &self.cache.borrow())
            .field(
                "dirty",
                &self.dirty.borrow().as_ref().map_or(0, BTreeMap::len),
            )
            .finish_non_exhaustive()
    }
}
