//! Lazy enumeration of all objects in oid order.

use crate::error::{OdbError, OdbResult};
use crate::keyspace;
use crate::object::{type_id_of, ObjRef};
use crate::transaction::ObjectTransaction;
use crate::types::Oid;
use odb_codec::Reader;
use odb_kv::FindResult;
use std::any::TypeId;

/// Lazy, single-pass iterator over every object whose table type
/// matches the filter (all objects for `None`), in strictly increasing
/// oid order.
///
/// The store scan is protected by the transaction's cursor guard: when
/// an interleaved operation moves the engine cursor, the next step
/// re-seeks to the successor of the last visited oid. After the store is
/// exhausted, dirty objects with larger oids are merged in - these are
/// objects created in this transaction and not yet flushed.
///
/// Restart only by re-invoking `enumerate`; resuming a partially
/// consumed iterator after dropping it is undefined.
pub struct ObjectIter<'a> {
    tr: &'a ObjectTransaction,
    filter: Option<TypeId>,
    generation: u64,
    last_oid: u64,
    started: bool,
    dirty_tail: Option<std::vec::IntoIter<ObjRef>>,
}

impl<'a> ObjectIter<'a> {
    pub(crate) fn new(tr: &'a ObjectTransaction, filter: Option<TypeId>) -> Self {
        Self {
            tr,
            filter,
            generation: tr.cursor_generation(),
            last_oid: 0,
            started: false,
            dirty_tail: None,
        }
    }

    /// Advances the store cursor by one key, recovering from cursor
    /// invalidation by re-seeking the successor of the last visited oid.
    fn step(&mut self) -> OdbResult<Option<(Oid, Vec<u8>)>> {
        let started = self.started;
        let invalidated = started && self.tr.cursor_generation() != self.generation;
        let reseek_key = keyspace::all_objects_key(Oid::new(self.last_oid + 1));

        let row = self.tr.with_kv(|kv| {
            let found = if !started {
                kv.find_first_key(keyspace::ALL_OBJECTS)
            } else if !invalidated {
                kv.find_next_key(keyspace::ALL_OBJECTS)
            } else {
                match kv.find(keyspace::ALL_OBJECTS, &reseek_key) {
                    FindResult::Exact => true,
                    // Landed before the target (or before the whole
                    // prefix): one step forward reaches the successor.
                    FindResult::Previous | FindResult::NotFound => {
                        kv.find_next_key(keyspace::ALL_OBJECTS)
                    }
                }
            };
            if !found {
                return None;
            }
            let oid = kv.get_key().and_then(keyspace::oid_from_key)?;
            let value = kv.get_value()?;
            Some((oid, value))
        })?;

        self.started = true;
        self.tr.bump_cursor_generation();
        self.generation = self.tr.cursor_generation();
        Ok(row)
    }

    /// Builds the dirty tail: not-yet-flushed objects with oids past the
    /// store scan, bounded by the owner's allocator at this moment.
    fn build_dirty_tail(&mut self) {
        let limit = self.tr.db().last_allocated_oid().as_u64();
        let tail = self.tr.dirty_tail(self.last_oid, limit, self.filter);
        self.dirty_tail = Some(tail.into_iter());
    }

    fn matches(&self, obj: &ObjRef) -> bool {
        self.filter.map_or(true, |f| type_id_of(obj) == f)
    }
}

impl Iterator for ObjectIter<'_> {
    type Item = OdbResult<ObjRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tail) = &mut self.dirty_tail {
                return tail.next().map(Ok);
            }

            let row = match self.step() {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let Some((oid, value)) = row else {
                self.build_dirty_tail();
                continue;
            };
            self.last_oid = oid.as_u64();

            // Live objects short-circuit the loader.
            if let Some(obj) = self.tr.cached_by_oid(oid) {
                if self.matches(&obj) {
                    return Some(Ok(obj));
                }
                continue;
            }

            // Filter on the table before materializing anything.
            let mut header = Reader::new(&value);
            let table_id = match header.read_vu32() {
                Ok(id) => crate::types::TableId::new(id),
                Err(e) => return Some(Err(e.into())),
            };
            let Some(table) = self.tr.db().registry().by_id(table_id) else {
                return Some(Err(OdbError::UnknownTypeId {
                    table_id: table_id.as_u32(),
                }));
            };
            if let Some(filter) = self.filter {
                if table.client_type() != filter {
                    continue;
                }
            }

            return Some(self.tr.materialize(oid, &value));
        }
    }
}
