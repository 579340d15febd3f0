//! Global registry of table metadata and type-to-name bindings.

use crate::error::{OdbError, OdbResult};
use crate::table::{TableHandlers, TableInfo};
use crate::types::TableId;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Schema facts recovered from the store at open time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PersistedTable {
    pub id: TableId,
    pub last_version: u32,
    pub singleton_oid: u64,
}

struct Inner {
    by_type: HashMap<TypeId, Arc<TableInfo>>,
    by_id: HashMap<u32, Arc<TableInfo>>,
    persisted: HashMap<String, PersistedTable>,
    next_table_id: u32,
}

/// Registry binding client types to tables.
///
/// Registration is the seam where generated serializers plug in: a type
/// registered under a name that already exists in the store is bound to
/// the persisted table id, so committed data stays readable across
/// database opens.
pub struct TableRegistry {
    inner: RwLock<Inner>,
}

impl TableRegistry {
    pub(crate) fn new(persisted: HashMap<String, PersistedTable>) -> Self {
        let next_table_id = persisted
            .values()
            .map(|p| p.id.as_u32())
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            inner: RwLock::new(Inner {
                by_type: HashMap::new(),
                by_id: HashMap::new(),
                persisted,
                next_table_id,
            }),
        }
    }

    /// Registers a table for a client type.
    ///
    /// # Errors
    ///
    /// Returns [`OdbError::InvalidOperation`] if the type or the name is
    /// already registered.
    pub(crate) fn register(
        &self,
        name: &str,
        client_type: TypeId,
        client_type_name: &'static str,
        client_type_version: u32,
        version_descriptor: Vec<u8>,
        handlers: TableHandlers,
    ) -> OdbResult<Arc<TableInfo>> {
        let mut inner = self.inner.write();
        if inner.by_type.contains_key(&client_type) {
            return Err(OdbError::invalid_operation(format!(
                "type {client_type_name} is already registered"
            )));
        }
        if inner
            .by_id
            .values()
            .any(|table| table.name() == name)
        {
            return Err(OdbError::invalid_operation(format!(
                "table name {name} is already registered"
            )));
        }
        let (id, last_version, singleton_oid) = match inner.persisted.get(name) {
            Some(p) => (p.id, p.last_version, p.singleton_oid),
            None => {
                let id = TableId::new(inner.next_table_id);
                inner.next_table_id += 1;
                (id, 0, 0)
            }
        };
        let table = Arc::new(TableInfo::new(
            id,
            name.to_owned(),
            client_type,
            client_type_name,
            client_type_version,
            version_descriptor,
            last_version,
            singleton_oid,
            handlers,
        ));
        inner.by_type.insert(client_type, Arc::clone(&table));
        inner.by_id.insert(id.as_u32(), Arc::clone(&table));
        Ok(table)
    }

    /// Looks up the table registered for a client type.
    #[must_use]
    pub fn by_type(&self, client_type: TypeId) -> Option<Arc<TableInfo>> {
        self.inner.read().by_type.get(&client_type).cloned()
    }

    /// Looks up a table by its id.
    #[must_use]
    pub fn by_id(&self, table_id: TableId) -> Option<Arc<TableInfo>> {
        self.inner.read().by_id.get(&table_id.as_u32()).cloned()
    }

    /// Returns every registered table.
    #[must_use]
    pub fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.inner.read().by_id.values().cloned().collect()
    }
}

impl fmt::Debug for TableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TableRegistry")
            .field("tables", &inner.by_id.len())
            .field("next_table_id", &inner.next_table_id)
            .finish_non_exhaustive()
    }
}
