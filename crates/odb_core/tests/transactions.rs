//! End-to-end object transaction scenarios.

use odb_core::{
    downcast_mut, downcast_ref, new_ref, ObjRef, ObjectDb, OdbError, OdbResult, Oid, Options,
    TableHandlers, INLINE_SENTINEL,
};
use odb_kv::MemoryKvStore;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq)]
struct Foo {
    x: u32,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Root {
    counter: u64,
    note: String,
}

fn foo_handlers() -> TableHandlers {
    TableHandlers::new(
        || new_ref(Foo::default()),
        |w, obj| {
            let x = downcast_ref::<Foo>(obj)
                .ok_or_else(|| OdbError::corrupted("not a Foo"))?
                .x;
            w.write_vu32(x);
            Ok(())
        },
        |r, obj| {
            let x = r.read_vu32()?;
            downcast_mut::<Foo>(obj)
                .ok_or_else(|| OdbError::corrupted("not a Foo"))?
                .x = x;
            Ok(())
        },
    )
}

fn root_handlers() -> TableHandlers {
    TableHandlers::new(
        || new_ref(Root::default()),
        |w, obj| {
            let (counter, note) = {
                let root = downcast_ref::<Root>(obj)
                    .ok_or_else(|| OdbError::corrupted("not a Root"))?;
                (root.counter, root.note.clone())
            };
            w.write_vuint(counter);
            w.write_string(&note);
            Ok(())
        },
        |r, obj| {
            let counter = r.read_vuint()?;
            let note = r.read_string()?;
            let mut root =
                downcast_mut::<Root>(obj).ok_or_else(|| OdbError::corrupted("not a Root"))?;
            root.counter = counter;
            root.note = note;
            Ok(())
        },
    )
}

fn register_all(db: &Arc<ObjectDb>) {
    db.register_table::<Foo>("Foo", 1, vec![], foo_handlers())
        .unwrap();
    db.register_table::<Root>("Root", 1, vec![], root_handlers())
        .unwrap();
}

fn open() -> (Arc<MemoryKvStore>, Arc<ObjectDb>) {
    let store = Arc::new(MemoryKvStore::new());
    let db = ObjectDb::new(store.clone(), Options::default()).unwrap();
    register_all(&db);
    (store, db)
}

fn foo(x: u32) -> ObjRef {
    new_ref(Foo { x })
}

fn foo_value(obj: &ObjRef) -> u32 {
    downcast_ref::<Foo>(obj).unwrap().x
}

/// Scenario A: a stored object is visible to a later reader with its
/// field values intact and oid 1.
#[test]
fn store_commit_enumerate() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        let obj = tr.new_object::<Foo>().unwrap();
        downcast_mut::<Foo>(&obj).unwrap().x = 7;
        let oid = tr.store(&obj).unwrap();
        assert_eq!(oid, Oid::new(1));
        tr.commit().unwrap();
    }

    let tr = db.start_read_only_transaction().unwrap();
    let foos: Vec<ObjRef> = tr
        .enumerate_of::<Foo>()
        .collect::<OdbResult<Vec<_>>>()
        .unwrap();
    assert_eq!(foos.len(), 1);
    assert_eq!(foo_value(&foos[0]), 7);
    assert_eq!(tr.get_oid(&foos[0]), Oid::new(1));
}

/// Scenario B: the singleton keeps its logical content and its oid
/// across writer transactions.
#[test]
fn singleton_is_stable_across_transactions() {
    let (_, db) = open();
    let oid = {
        let tr = db.start_transaction().unwrap();
        let root = tr.singleton::<Root>().unwrap();
        {
            let mut root = downcast_mut::<Root>(&root).unwrap();
            root.counter = 3;
            root.note = "hello".into();
        }
        let oid = tr.get_oid(&root);
        tr.commit().unwrap();
        oid
    };

    let tr = db.start_transaction().unwrap();
    let root = tr.singleton::<Root>().unwrap();
    {
        let read = downcast_ref::<Root>(&root).unwrap();
        assert_eq!(read.counter, 3);
        assert_eq!(read.note, "hello");
    }
    assert_eq!(tr.get_oid(&root), oid);
}

/// Scenario C: identity lookups keep returning the same handles after
/// the identity cache promotes to weak mode on the 31st insertion.
#[test]
fn large_mode_promotion_is_transparent() {
    let (_, db) = open();
    let tr = db.start_transaction().unwrap();

    let retained: Vec<(Oid, ObjRef)> = (0..31)
        .map(|i| {
            let obj = foo(i);
            let oid = tr.store(&obj).unwrap();
            (oid, obj)
        })
        .collect();

    for (oid, obj) in &retained {
        let got = tr.get(*oid).unwrap().unwrap();
        assert!(Rc::ptr_eq(&got, obj));
    }
}

/// Scenario D: an object stored and deleted in the same transaction is
/// gone after commit.
#[test]
fn delete_before_commit_is_final() {
    let (_, db) = open();
    let oid = {
        let tr = db.start_transaction().unwrap();
        let obj = foo(1);
        let oid = tr.store(&obj).unwrap();
        tr.delete_object(&obj).unwrap();
        tr.commit().unwrap();
        oid
    };

    let tr = db.start_read_only_transaction().unwrap();
    assert!(tr.get(oid).unwrap().is_none());
    assert_eq!(tr.enumerate_of::<Foo>().count(), 0);
}

/// Scenario E: an object created while an enumerator is mid-walk is
/// yielded exactly once, through the dirty tail merge.
#[test]
fn enumerator_sees_mid_walk_insert_once() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        tr.store(&foo(10)).unwrap();
        tr.store(&foo(20)).unwrap();
        tr.commit().unwrap();
    }

    let tr = db.start_transaction().unwrap();
    let mut iter = tr.enumerate_of::<Foo>();
    let first = iter.next().unwrap().unwrap();
    assert_eq!(foo_value(&first), 10);

    tr.store(&foo(30)).unwrap();

    let values: Vec<u32> = std::iter::once(Ok(first))
        .chain(iter)
        .map(|obj| foo_value(&obj.unwrap()))
        .collect();
    assert_eq!(values, vec![10, 20, 30]);
}

/// Scenario F: the inline decision protocol.
#[test]
fn store_if_not_inlined_sentinel() {
    let (_, db) = open();
    let tr = db.start_transaction().unwrap();

    let unregistered = new_ref(3.5f64);
    assert_eq!(
        tr.store_if_not_inlined(&unregistered, false, false).unwrap(),
        INLINE_SENTINEL
    );

    let stored = foo(1);
    let oid = tr.store(&stored).unwrap();
    assert_eq!(
        tr.store_if_not_inlined(&stored, false, false).unwrap(),
        oid.as_u64()
    );
    assert_eq!(
        tr.store_if_not_inlined(&stored, false, true).unwrap(),
        INLINE_SENTINEL
    );
    assert!(tr.get(oid).unwrap().is_none());
}

/// Invariant 2: enumeration yields every committed oid exactly once
/// plus every uncommitted new oid, in strictly increasing order.
#[test]
fn enumeration_is_exactly_once_in_oid_order() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        for i in 0..5 {
            tr.store(&foo(i)).unwrap();
        }
        tr.commit().unwrap();
    }

    let tr = db.start_transaction().unwrap();
    // Touch one committed object so it is cached, and add two
    // uncommitted ones.
    let cached = tr.get(Oid::new(2)).unwrap().unwrap();
    tr.store(&cached).unwrap();
    tr.store(&foo(100)).unwrap();
    tr.store(&foo(101)).unwrap();

    let oids: Vec<u64> = tr
        .enumerate(None)
        .map(|obj| tr.get_oid(&obj.unwrap()).as_u64())
        .collect();
    assert_eq!(oids, vec![1, 2, 3, 4, 5, 6, 7]);
}

/// Deleting ahead of the cursor mid-enumeration: the cursor guard
/// re-seeks and the deleted object is skipped.
#[test]
fn enumeration_survives_interleaved_deletes() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        for i in 0..3 {
            tr.store(&foo(i)).unwrap();
        }
        tr.commit().unwrap();
    }

    let tr = db.start_transaction().unwrap();
    let mut iter = tr.enumerate_of::<Foo>();
    let first = iter.next().unwrap().unwrap();
    assert_eq!(foo_value(&first), 0);

    tr.delete_oid(Oid::new(2)).unwrap();

    let rest: Vec<u32> = iter.map(|obj| foo_value(&obj.unwrap())).collect();
    assert_eq!(rest, vec![2]);
}

/// `delete_all` tolerates deletion during its own enumeration.
#[test]
fn delete_all_removes_every_object() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        for i in 0..10 {
            tr.store(&foo(i)).unwrap();
        }
        tr.commit().unwrap();
    }
    {
        let tr = db.start_transaction().unwrap();
        tr.delete_all_of::<Foo>().unwrap();
        tr.commit().unwrap();
    }
    let tr = db.start_read_only_transaction().unwrap();
    assert_eq!(tr.enumerate(None).count(), 0);
}

/// Invariant 4: after a delete, neither `get` nor enumeration sees the
/// object, already before commit.
#[test]
fn deleted_objects_are_invisible_within_the_transaction() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        tr.store(&foo(1)).unwrap();
        tr.store(&foo(2)).unwrap();
        tr.commit().unwrap();
    }

    let tr = db.start_transaction().unwrap();
    tr.delete_oid(Oid::new(1)).unwrap();
    assert!(tr.get(Oid::new(1)).unwrap().is_none());
    let values: Vec<u32> = tr
        .enumerate_of::<Foo>()
        .map(|obj| foo_value(&obj.unwrap()))
        .collect();
    assert_eq!(values, vec![2]);
}

/// Invariant 7: re-registering against an existing store binds the same
/// table ids, keeps data readable, and does not re-persist the schema.
#[test]
fn schema_survives_reopen_without_re_persisting() {
    let store = Arc::new(MemoryKvStore::new());
    {
        let db = ObjectDb::new(store.clone(), Options::default()).unwrap();
        register_all(&db);
        let tr = db.start_transaction().unwrap();
        tr.store(&foo(7)).unwrap();
        tr.commit().unwrap();
    }
    let rows_after_first = store.committed_len();

    {
        let db = ObjectDb::new(store.clone(), Options::default()).unwrap();
        register_all(&db);
        let tr = db.start_transaction().unwrap();
        // Same schema version: only the object row may change.
        let obj = tr.get(Oid::new(1)).unwrap().unwrap();
        assert_eq!(foo_value(&obj), 7);
        downcast_mut::<Foo>(&obj).unwrap().x = 8;
        tr.store(&obj).unwrap();
        tr.commit().unwrap();
    }
    assert_eq!(store.committed_len(), rows_after_first);

    let db = ObjectDb::new(store, Options::default()).unwrap();
    register_all(&db);
    let tr = db.start_read_only_transaction().unwrap();
    let obj = tr.get(Oid::new(1)).unwrap().unwrap();
    assert_eq!(foo_value(&obj), 8);
}

/// Oid allocation resumes past committed objects after reopen.
#[test]
fn oid_allocation_resumes_after_reopen() {
    let store = Arc::new(MemoryKvStore::new());
    {
        let db = ObjectDb::new(store.clone(), Options::default()).unwrap();
        register_all(&db);
        let tr = db.start_transaction().unwrap();
        tr.store(&foo(1)).unwrap();
        tr.store(&foo(2)).unwrap();
        tr.commit().unwrap();
    }

    let db = ObjectDb::new(store, Options::default()).unwrap();
    register_all(&db);
    let tr = db.start_transaction().unwrap();
    assert_eq!(tr.store(&foo(3)).unwrap(), Oid::new(3));
}

/// Readers opened before a commit keep their snapshot.
#[test]
fn readers_are_snapshot_isolated() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        tr.store(&foo(1)).unwrap();
        tr.commit().unwrap();
    }

    let reader = db.start_read_only_transaction().unwrap();

    {
        let tr = db.start_transaction().unwrap();
        let obj = tr.get(Oid::new(1)).unwrap().unwrap();
        downcast_mut::<Foo>(&obj).unwrap().x = 99;
        tr.store(&obj).unwrap();
        tr.store(&foo(2)).unwrap();
        tr.commit().unwrap();
    }

    let obj = reader.get(Oid::new(1)).unwrap().unwrap();
    assert_eq!(foo_value(&obj), 1);
    assert_eq!(reader.enumerate_of::<Foo>().count(), 1);

    let fresh = db.start_read_only_transaction().unwrap();
    assert_eq!(fresh.enumerate_of::<Foo>().count(), 2);
}

/// Storage size reports the stored key and value lengths.
#[test]
fn storage_size_of_committed_object() {
    let (_, db) = open();
    {
        let tr = db.start_transaction().unwrap();
        tr.store(&foo(300)).unwrap();
        tr.commit().unwrap();
    }
    let tr = db.start_read_only_transaction().unwrap();
    let (key_len, value_len) = tr.get_storage_size(Oid::new(1)).unwrap().unwrap();
    // Prefix byte + one-byte oid; table id + version + vu32(300).
    assert_eq!(key_len, 2);
    assert_eq!(value_len, 4);
    assert!(tr.get_storage_size(Oid::new(9)).unwrap().is_none());
}
