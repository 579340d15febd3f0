//! Object handles and reference identity.

mod cache;

pub use cache::{ObjectCache, SMALL_CACHE_LIMIT};

use crate::error::OdbResult;
use crate::transaction::ObjectTransaction;
use crate::types::Oid;
use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

/// Shared handle to a live object of any registered table type.
///
/// Reference identity (the allocation address of the shared cell) is what
/// ties a handle to its transaction metadata; cloning the handle never
/// changes identity.
pub type ObjRef = Rc<RefCell<dyn Any>>;

/// Weak counterpart of [`ObjRef`], used by the large-mode identity cache.
pub type ObjWeak = Weak<RefCell<dyn Any>>;

/// Wraps a value into a fresh object handle.
#[must_use]
pub fn new_ref<T: 'static>(value: T) -> ObjRef {
    Rc::new(RefCell::new(value))
}

/// Returns the concrete runtime type of the value behind a handle.
///
/// # Panics
///
/// Panics if the handle is currently mutably borrowed.
#[must_use]
pub fn type_id_of(obj: &ObjRef) -> std::any::TypeId {
    (*obj.borrow()).type_id()
}

/// Borrows a typed view of an object handle.
///
/// Returns `None` if the handle holds a different type.
#[must_use]
pub fn downcast_ref<T: 'static>(obj: &ObjRef) -> Option<Ref<'_, T>> {
    Ref::filter_map(obj.borrow(), <dyn Any>::downcast_ref::<T>).ok()
}

/// Mutably borrows a typed view of an object handle.
///
/// Returns `None` if the handle holds a different type.
#[must_use]
pub fn downcast_mut<T: 'static>(obj: &ObjRef) -> Option<RefMut<'_, T>> {
    RefMut::filter_map(obj.borrow_mut(), <dyn Any>::downcast_mut::<T>).ok()
}

/// Identity key of an object handle.
///
/// The address is only ever compared, never dereferenced; large-mode
/// cache entries pair it with a weak handle so stale addresses are
/// detected before reuse can alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjKey(*const ());

impl ObjKey {
    /// Returns the identity key of `obj`.
    #[must_use]
    pub fn of(obj: &ObjRef) -> Self {
        Self(Rc::as_ptr(obj).cast())
    }
}

/// A lazy by-reference handle to another stored object.
///
/// An indirection with an assigned oid is a pointer kept by oid; its
/// target is fetched on first access. One with an unassigned oid wraps a
/// not-yet-stored target object, which store and delete treat as the
/// value itself.
#[derive(Default)]
pub struct Indirection {
    oid: Cell<u64>,
    target: RefCell<Option<ObjRef>>,
}

impl std::fmt::Debug for Indirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indirection")
            .field("oid", &self.oid.get())
            .field("materialized", &self.target.borrow().is_some())
            .finish()
    }
}

impl Indirection {
    /// Creates an indirection pointing at an already-stored oid.
    #[must_use]
    pub fn by_oid(oid: Oid) -> Self {
        Self {
            oid: Cell::new(oid.as_u64()),
            target: RefCell::new(None),
        }
    }

    /// Creates an indirection wrapping a not-yet-stored object.
    #[must_use]
    pub fn from_object(target: ObjRef) -> Self {
        Self {
            oid: Cell::new(0),
            target: RefCell::new(Some(target)),
        }
    }

    /// Returns the oid this indirection points at, zero if unassigned.
    #[must_use]
    pub fn oid(&self) -> Oid {
        Oid::new(self.oid.get())
    }

    pub(crate) fn set_oid(&self, oid: Oid) {
        self.oid.set(oid.as_u64());
    }

    /// Returns the materialized target, if any, without touching the
    /// store.
    #[must_use]
    pub fn target(&self) -> Option<ObjRef> {
        self.target.borrow().clone()
    }

    /// Returns the target, fetching it by oid on first access.
    ///
    /// # Errors
    ///
    /// Propagates load errors from the store.
    pub fn resolve(&self, tr: &ObjectTransaction) -> OdbResult<Option<ObjRef>> {
        if let Some(target) = self.target.borrow().clone() {
            return Ok(Some(target));
        }
        let oid = self.oid();
        if !oid.is_assigned() {
            return Ok(None);
        }
        let loaded = tr.get(oid)?;
        *self.target.borrow_mut() = loaded.clone();
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_is_stable_across_clones() {
        let a = new_ref(42u32);
        let b = Rc::clone(&a);
        assert_eq!(ObjKey::of(&a), ObjKey::of(&b));

        let c = new_ref(42u32);
        assert_ne!(ObjKey::of(&a), ObjKey::of(&c));
    }

    #[test]
    fn downcast_checks_type() {
        let obj = new_ref(String::from("hi"));
        assert!(downcast_ref::<String>(&obj).is_some());
        assert!(downcast_ref::<u32>(&obj).is_none());

        downcast_mut::<String>(&obj).unwrap().push('!');
        assert_eq!(&*downcast_ref::<String>(&obj).unwrap(), "hi!");
    }

    #[test]
    fn indirection_wrapping_object_has_no_oid() {
        let target = new_ref(5u32);
        let ind = Indirection::from_object(Rc::clone(&target));
        assert!(!ind.oid().is_assigned());
        assert!(Rc::ptr_eq(&ind.target().unwrap(), &target));
    }
}
