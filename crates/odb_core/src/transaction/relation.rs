//! Per-transaction relation instances and the owner's factory registry.

use crate::error::{OdbError, OdbResult};
use crate::transaction::ObjectTransaction;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Builds one relation instance bound to a transaction.
pub type RelationConstructorFn =
    dyn Fn(&ObjectTransaction) -> OdbResult<Rc<dyn Any>> + Send + Sync;

/// A ready-to-use relation factory.
pub type RelationFactory = Arc<RelationConstructorFn>;

/// Chain length at which lookups stop walking links and promote the
/// whole chain into a hash index. Most transactions touch fewer
/// relations than this.
pub(crate) const LINEAR_SEARCH_LIMIT: usize = 4;

struct Link {
    type_id: TypeId,
    instance: Rc<dyn Any>,
    next: Option<Box<Link>>,
}

/// Per-transaction chain of relation instances.
///
/// New entries are prepended to a singly-linked list; once a lookup
/// walks [`LINEAR_SEARCH_LIMIT`] links the chain is rehashed into a map
/// and the list is abandoned for good.
#[derive(Default)]
pub(crate) struct RelationChain {
    head: Option<Box<Link>>,
    index: Option<HashMap<TypeId, Rc<dyn Any>>>,
}

impl RelationChain {
    /// Returns the cached instance for `type_id`, promoting the chain to
    /// a hash index when the walk gets long enough.
    pub fn lookup(&mut self, type_id: TypeId) -> Option<Rc<dyn Any>> {
        if let Some(index) = &self.index {
            return index.get(&type_id).cloned();
        }
        let mut hops = 0;
        let mut link = self.head.as_deref();
        while let Some(current) = link {
            hops += 1;
            if current.type_id == type_id {
                let instance = Rc::clone(&current.instance);
                if hops >= LINEAR_SEARCH_LIMIT {
                    self.promote();
                }
                return Some(instance);
            }
            link = current.next.as_deref();
        }
        None
    }

    /// Records a freshly created instance. Exactly one entry is added
    /// per creation.
    pub fn insert(&mut self, type_id: TypeId, instance: Rc<dyn Any>) {
        if let Some(index) = &mut self.index {
            index.insert(type_id, instance);
            return;
        }
        self.head = Some(Box::new(Link {
            type_id,
            instance,
            next: self.head.take(),
        }));
    }

    fn promote(&mut self) {
        let mut index = HashMap::new();
        let mut link = self.head.take();
        while let Some(current) = link {
            index.insert(current.type_id, current.instance);
            link = current.next;
        }
        self.index = Some(index);
    }

    #[cfg(test)]
    fn is_promoted(&self) -> bool {
        self.index.is_some()
    }
}

impl fmt::Debug for RelationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationChain")
            .field("promoted", &self.index.is_some())
            .finish_non_exhaustive()
    }
}

struct Declared {
    type_name: &'static str,
    constructor: RelationFactory,
}

/// The owner's registry of relation constructors and initialized
/// factories, shared by every transaction.
pub(crate) struct RelationRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    declared: HashMap<TypeId, Declared>,
    factories: HashMap<TypeId, RelationFactory>,
    names: HashMap<String, TypeId>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn declare(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        constructor: RelationFactory,
    ) {
        self.inner.write().declared.insert(
            type_id,
            Declared {
                type_name,
                constructor,
            },
        );
    }

    pub fn init(&self, name: &str, type_id: TypeId) -> OdbResult<RelationFactory> {
        let mut inner = self.inner.write();
        let Some(declared) = inner.declared.get(&type_id) else {
            return Err(OdbError::RelationShapeInvalid {
                type_name: format!("{type_id:?}"),
            });
        };
        let factory = Arc::clone(&declared.constructor);
        inner.factories.insert(type_id, Arc::clone(&factory));
        inner.names.insert(name.to_owned(), type_id);
        Ok(factory)
    }

    pub fn factory(&self, type_id: TypeId) -> Option<RelationFactory> {
        self.inner.read().factories.get(&type_id).cloned()
    }

    /// Registers a declared constructor on first use, under the type's
    /// own name.
    pub fn auto_register(&self, type_id: TypeId) -> OdbResult<RelationFactory> {
        let mut inner = self.inner.write();
        let Some(declared) = inner.declared.get(&type_id) else {
            return Err(OdbError::RelationShapeInvalid {
                type_name: format!("{type_id:?}"),
            });
        };
        let factory = Arc::clone(&declared.constructor);
        let name = declared.type_name.to_owned();
        inner.factories.insert(type_id, Arc::clone(&factory));
        inner.names.insert(name, type_id);
        Ok(factory)
    }

    pub fn type_name(&self, type_id: TypeId) -> String {
        self.inner
            .read()
            .declared
            .get(&type_id)
            .map_or_else(|| format!("{type_id:?}"), |d| d.type_name.to_owned())
    }

    pub fn registered_types(&self) -> Vec<TypeId> {
        self.inner.read().factories.keys().copied().collect()
    }
}
