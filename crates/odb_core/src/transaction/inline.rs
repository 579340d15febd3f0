//! Inline object (de)serialization contexts.
//!
//! Savers and loaders never see the key-value engine; they talk to these
//! contexts, which add object-graph awareness (inline nesting, by-oid
//! references, cyclic back references) on top of the raw payload codec.

use crate::error::{OdbError, OdbResult};
use crate::object::ObjRef;
use crate::transaction::ObjectTransaction;
use crate::types::{Oid, TableId, INLINE_SENTINEL};
use odb_codec::{Reader, Writer};
use std::rc::Rc;

/// Payload writer handed to savers.
///
/// An object is written inline as `[vu32 table_id, vu32 version,
/// <saver output>]`; a reference is written as its oid, with
/// [`INLINE_SENTINEL`] followed by the inline form when the target has
/// no stored copy, and zero for a null reference.
pub struct ObjectWriter<'a> {
    tr: &'a ObjectTransaction,
    out: &'a mut Writer,
}

impl<'a> ObjectWriter<'a> {
    pub(crate) fn new(tr: &'a ObjectTransaction, out: &'a mut Writer) -> Self {
        Self { tr, out }
    }

    /// Returns the transaction this writer serializes for.
    #[must_use]
    pub fn transaction(&self) -> &ObjectTransaction {
        self.tr
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.out.write_u8(value);
    }

    /// Writes a varint.
    pub fn write_vuint(&mut self, value: u64) {
        self.out.write_vuint(value);
    }

    /// Writes a 32-bit unsigned integer as a varint.
    pub fn write_vu32(&mut self, value: u32) {
        self.out.write_vu32(value);
    }

    /// Writes a boolean byte.
    pub fn write_bool(&mut self, value: bool) {
        self.out.write_bool(value);
    }

    /// Writes a length-prefixed string.
    pub fn write_string(&mut self, value: &str) {
        self.out.write_string(value);
    }

    /// Writes a length-prefixed byte run.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.out.write_bytes(value);
    }

    /// Writes an object id.
    pub fn write_oid(&mut self, oid: Oid) {
        self.out.write_vuint(oid.as_u64());
    }

    /// Embeds `obj` inline: table id, schema version, then the saver
    /// output. The table is marked for schema persistence.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::UnknownType`] for unregistered types and
    /// [`OdbError::InvalidStorage`] for values that are not storable
    /// objects.
    pub fn write_inline_object(&mut self, obj: &ObjRef) -> OdbResult<()> {
        let table = self.tr.table_for_object(obj)?;
        self.out.write_vu32(table.id().as_u32());
        self.out.write_vu32(table.client_type_version());
        let saver = table.saver();
        (*saver)(self, obj)?;
        self.tr.mark_table_updated(&table);
        Ok(())
    }

    /// Writes `obj` by reference: its oid when it has a stored copy,
    /// otherwise [`INLINE_SENTINEL`] followed by the inline form. `None`
    /// writes a null reference.
    ///
    /// # Errors
    ///
    /// Propagates store and serialization errors.
    pub fn write_object_reference(&mut self, obj: Option<&ObjRef>) -> OdbResult<()> {
        let Some(obj) = obj else {
            self.out.write_vuint(0);
            return Ok(());
        };
        let oid = self.tr.store_if_not_inlined(obj, false, false)?;
        self.out.write_vuint(oid);
        if oid == INLINE_SENTINEL {
            self.write_inline_object(obj)?;
        }
        Ok(())
    }
}

/// Payload reader handed to loaders and free-content traversals.
///
/// Objects read inline are registered with the context *before* their
/// loader runs, so cyclic structures can resolve back references to
/// objects still being loaded.
pub struct ObjectReader<'a, 'b> {
    tr: &'a ObjectTransaction,
    input: &'a mut Reader<'b>,
    registered: Vec<ObjRef>,
    depth: usize,
}

impl<'a, 'b> ObjectReader<'a, 'b> {
    pub(crate) fn new(tr: &'a ObjectTransaction, input: &'a mut Reader<'b>) -> Self {
        Self {
            tr,
            input,
            registered: Vec::new(),
            depth: 0,
        }
    }

    /// Returns the transaction this reader materializes into.
    #[must_use]
    pub fn transaction(&self) -> &ObjectTransaction {
        self.tr
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> OdbResult<u8> {
        Ok(self.input.read_u8()?)
    }

    /// Reads a varint.
    pub fn read_vuint(&mut self) -> OdbResult<u64> {
        Ok(self.input.read_vuint()?)
    }

    /// Reads a 32-bit unsigned integer.
    pub fn read_vu32(&mut self) -> OdbResult<u32> {
        Ok(self.input.read_vu32()?)
    }

    /// Reads a boolean byte.
    pub fn read_bool(&mut self) -> OdbResult<bool> {
        Ok(self.input.read_bool()?)
    }

    /// Reads a length-prefixed string.
    pub fn read_string(&mut self) -> OdbResult<String> {
        Ok(self.input.read_string()?)
    }

    /// Reads a length-prefixed byte run.
    pub fn read_bytes(&mut self) -> OdbResult<Vec<u8>> {
        Ok(self.input.read_bytes()?.to_vec())
    }

    /// Reads an object id.
    pub fn read_oid(&mut self) -> OdbResult<Oid> {
        Ok(Oid::new(self.input.read_vuint()?))
    }

    /// Skips one varint. Free-content traversals use this to step over
    /// fields they do not collect.
    pub fn skip_vuint(&mut self) -> OdbResult<()> {
        Ok(self.input.skip_vuint()?)
    }

    /// Skips a length-prefixed field (string or byte run).
    pub fn skip_bytes(&mut self) -> OdbResult<()> {
        self.input.read_bytes()?;
        Ok(())
    }

    /// Returns `true` once the payload is exhausted.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.input.is_eof()
    }

    /// Registers an object with the context, making it addressable as a
    /// back reference while (and after) its loader runs.
    pub(crate) fn register_object(&mut self, obj: &ObjRef) {
        self.registered.push(Rc::clone(obj));
    }

    /// Resolves a cyclic back reference by registration index.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::Corrupted`] for an index that was never
    /// registered.
    pub fn back_ref(&self, index: u64) -> OdbResult<ObjRef> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.registered.get(i))
            .cloned()
            .ok_or_else(|| OdbError::corrupted(format!("dangling back reference {index}")))
    }

    /// Reads an object embedded inline: table id, schema version, then
    /// the version's loader output.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::UnknownTypeId`] for an unknown table id.
    pub fn read_inline_object(&mut self) -> OdbResult<ObjRef> {
        let table_id = TableId::new(self.input.read_vu32()?);
        let version = self.input.read_vu32()?;
        let table = self
            .tr
            .db()
            .registry()
            .by_id(table_id)
            .ok_or(OdbError::UnknownTypeId {
                table_id: table_id.as_u32(),
            })?;
        let obj = (*table.creator())();
        self.register_object(&obj);
        self.depth += 1;
        let loader = table.loader(version)?;
        let result = (*loader)(self, &obj);
        self.depth -= 1;
        result?;
        Ok(obj)
    }

    /// Reads an object reference written by
    /// [`ObjectWriter::write_object_reference`].
    ///
    /// # Errors
    ///
    /// Propagates load errors; a reference to a missing oid reads as
    /// `None`.
    pub fn read_object_reference(&mut self) -> OdbResult<Option<ObjRef>> {
        let oid = self.input.read_vuint()?;
        match oid {
            0 => Ok(None),
            INLINE_SENTINEL => self.read_inline_object().map(Some),
            oid => self.tr.get(Oid::new(oid)),
        }
    }
}
