//! Two-tier object identity cache.
//!
//! Small transactions keep strong references in plain maps; once the
//! working set outgrows [`SMALL_CACHE_LIMIT`] the cache promotes itself
//! to weak references so large scans do not retain every object they
//! touch. There is no demotion.

use crate::object::{ObjKey, ObjRef, ObjWeak};
use crate::types::{ObjectMetadata, Oid};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Maximum entry count of the small (strong) mode.
pub const SMALL_CACHE_LIMIT: usize = 30;

/// Large-mode insertions between opportunistic dead-entry sweeps.
const COMPACT_EVERY: usize = 64;

struct LargeEntry {
    holder: ObjWeak,
    meta: ObjectMetadata,
}

/// An oid binding in large mode: the weak handle plus the identity key
/// it was created for, so the metadata side can be pruned after the
/// object is gone.
struct LargeSlot {
    key: ObjKey,
    holder: ObjWeak,
}

enum Mode {
    Small {
        by_oid: HashMap<u64, ObjRef>,
        meta: HashMap<ObjKey, (ObjRef, ObjectMetadata)>,
    },
    Large {
        by_oid: HashMap<u64, LargeSlot>,
        meta: HashMap<ObjKey, LargeEntry>,
    },
}

/// Identity cache mapping oid to live object and object to metadata.
///
/// All lookups treat a reclaimed weak entry as absent; sweeping dead
/// entries is an optimization, never required for correctness.
pub struct ObjectCache {
    mode: Mode,
    large_inserts: usize,
}

impl ObjectCache {
    /// Creates an empty cache in small mode.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: Mode::Small {
                by_oid: HashMap::new(),
                meta: HashMap::new(),
            },
            large_inserts: 0,
        }
    }

    /// Returns the live object bound to `oid`, or `None` if absent or
    /// reclaimed. A dead weak entry is pruned on the way out.
    pub fn get_by_oid(&mut self, oid: Oid) -> Option<ObjRef> {
        match &mut self.mode {
            Mode::Small { by_oid, .. } => by_oid.get(&oid.as_u64()).cloned(),
            Mode::Large { by_oid, meta } => {
                let slot = by_oid.get(&oid.as_u64())?;
                match slot.holder.upgrade() {
                    Some(obj) => Some(obj),
                    None => {
                        let key = slot.key;
                        by_oid.remove(&oid.as_u64());
                        meta.remove(&key);
                        None
                    }
                }
            }
        }
    }

    /// Returns the transaction metadata of `obj`, if any.
    #[must_use]
    pub fn metadata(&self, obj: &ObjRef) -> Option<ObjectMetadata> {
        let key = ObjKey::of(obj);
        match &self.mode {
            Mode::Small { meta, .. } => meta.get(&key).map(|(_, m)| *m),
            Mode::Large { meta, .. } => meta
                .get(&key)
                // A dead holder means the slot belonged to a reclaimed
                // object whose address was reused.
                .filter(|entry| entry.holder.strong_count() > 0)
                .map(|entry| entry.meta),
        }
    }

    /// Inserts or overwrites the metadata of `obj` without binding an
    /// oid. Used for unassigned objects and deleted stubs.
    pub fn set_metadata(&mut self, obj: &ObjRef, metadata: ObjectMetadata) {
        let key = ObjKey::of(obj);
        match &mut self.mode {
            Mode::Small { meta, .. } => {
                meta.insert(key, (Rc::clone(obj), metadata));
            }
            Mode::Large { meta, .. } => {
                meta.insert(
                    key,
                    LargeEntry {
                        holder: Rc::downgrade(obj),
                        meta: metadata,
                    },
                );
            }
        }
    }

    /// Binds `oid` to `obj` and `obj` to `metadata`, promoting to large
    /// mode when the small map outgrows [`SMALL_CACHE_LIMIT`].
    pub fn insert(&mut self, oid: Oid, obj: &ObjRef, metadata: ObjectMetadata) {
        let mut promote = false;
        let mut sweep = false;
        match &mut self.mode {
            Mode::Small { by_oid, meta } => {
                by_oid.insert(oid.as_u64(), Rc::clone(obj));
                meta.insert(ObjKey::of(obj), (Rc::clone(obj), metadata));
                promote = by_oid.len() > SMALL_CACHE_LIMIT;
            }
            Mode::Large { by_oid, meta } => {
                let key = ObjKey::of(obj);
                by_oid.insert(
                    oid.as_u64(),
                    LargeSlot {
                        key,
                        holder: Rc::downgrade(obj),
                    },
                );
                meta.insert(
                    key,
                    LargeEntry {
                        holder: Rc::downgrade(obj),
                        meta: metadata,
                    },
                );
                self.large_inserts += 1;
                sweep = self.large_inserts >= COMPACT_EVERY;
            }
        }
        if promote {
            self.promote();
        }
        if sweep {
            self.compact();
        }
    }

    /// Unbinds `oid` from the cache. Metadata entries are untouched.
    pub fn remove_oid(&mut self, oid: Oid) {
        match &mut self.mode {
            Mode::Small { by_oid, .. } => {
                by_oid.remove(&oid.as_u64());
            }
            Mode::Large { by_oid, .. } => {
                by_oid.remove(&oid.as_u64());
            }
        }
    }

    /// Sweeps entries whose object has been reclaimed. Large mode only;
    /// a no-op in small mode.
    pub fn compact(&mut self) {
        if let Mode::Large { by_oid, meta } = &mut self.mode {
            by_oid.retain(|_, slot| slot.holder.strong_count() > 0);
            meta.retain(|_, entry| entry.holder.strong_count() > 0);
            self.large_inserts = 0;
        }
    }

    /// Returns `true` once the cache has promoted to weak references.
    #[must_use]
    pub fn is_large(&self) -> bool {
        matches!(self.mode, Mode::Large { .. })
    }

    /// Number of oid bindings, counting not-yet-reclaimed weak entries.
    #[must_use]
    pub fn oid_count(&self) -> usize {
        match &self.mode {
            Mode::Small { by_oid, .. } => by_oid.len(),
            Mode::Large { by_oid, .. } => by_oid.len(),
        }
    }

    /// Drops every entry, returning the cache to an empty small mode.
    pub fn clear(&mut self) {
        self.mode = Mode::Small {
            by_oid: HashMap::new(),
            meta: HashMap::new(),
        };
        self.large_inserts = 0;
    }

    fn promote(&mut self) {
        let Mode::Small { by_oid, meta } = &mut self.mode else {
            return;
        };
        trace!(entries = by_oid.len(), "identity cache promoted to weak mode");
        let weak_by_oid = by_oid
            .drain()
            .map(|(oid, obj)| {
                (
                    oid,
                    LargeSlot {
                        key: ObjKey::of(&obj),
                        holder: Rc::downgrade(&obj),
                    },
                )
            })
            .collect();
        let weak_meta = meta
            .drain()
            .map(|(key, (obj, metadata))| {
                (
                    key,
                    LargeEntry {
                        holder: Rc::downgrade(&obj),
                        meta: metadata,
                    },
                )
            })
            .collect();
        self.mode = Mode::Large {
            by_oid: weak_by_oid,
            meta: weak_meta,
        };
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("large", &self.is_large())
            .field("oid_count", &self.oid_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::new_ref;

    fn fill(cache: &mut ObjectCache, count: u64) -> Vec<ObjRef> {
        (1..=count)
            .map(|i| {
                let obj = new_ref(i);
                cache.insert(Oid::new(i), &obj, ObjectMetadata::read(Oid::new(i)));
                obj
            })
            .collect()
    }

    #[test]
    fn small_mode_lookup() {
        let mut cache = ObjectCache::new();
        let objs = fill(&mut cache, 3);
        assert!(!cache.is_large());

        let hit = cache.get_by_oid(Oid::new(2)).unwrap();
        assert!(Rc::ptr_eq(&hit, &objs[1]));
        assert_eq!(
            cache.metadata(&objs[1]).unwrap(),
            ObjectMetadata::read(Oid::new(2))
        );
        assert!(cache.get_by_oid(Oid::new(9)).is_none());
    }

    #[test]
    fn promotion_is_transparent() {
        let mut cache = ObjectCache::new();
        let objs = fill(&mut cache, SMALL_CACHE_LIMIT as u64 + 1);
        assert!(cache.is_large());

        // Every retained object is still found by oid and keeps its
        // metadata after the switch.
        for (i, obj) in objs.iter().enumerate() {
            let oid = Oid::new(i as u64 + 1);
            let hit = cache.get_by_oid(oid).unwrap();
            assert!(Rc::ptr_eq(&hit, obj));
            assert_eq!(cache.metadata(obj).unwrap().id, oid);
        }
    }

    #[test]
    fn no_demotion_after_promotion() {
        let mut cache = ObjectCache::new();
        let objs = fill(&mut cache, SMALL_CACHE_LIMIT as u64 + 1);
        drop(objs);
        cache.compact();
        assert!(cache.is_large());
        assert_eq!(cache.oid_count(), 0);
    }

    #[test]
    fn reclaimed_entries_read_as_absent() {
        let mut cache = ObjectCache::new();
        let mut objs = fill(&mut cache, SMALL_CACHE_LIMIT as u64 + 1);
        let dropped = objs.pop().unwrap();
        let oid = Oid::new(SMALL_CACHE_LIMIT as u64 + 1);
        drop(dropped);

        assert!(cache.get_by_oid(oid).is_none());
        // The dead entry was pruned on access.
        assert_eq!(cache.oid_count(), SMALL_CACHE_LIMIT);
    }

    #[test]
    fn compact_sweeps_dead_entries() {
        let mut cache = ObjectCache::new();
        let objs = fill(&mut cache, SMALL_CACHE_LIMIT as u64 + 5);
        drop(objs);
        cache.compact();
        assert_eq!(cache.oid_count(), 0);
    }

    #[test]
    fn metadata_only_entries_need_no_oid() {
        let mut cache = ObjectCache::new();
        let obj = new_ref(0u8);
        cache.set_metadata(&obj, ObjectMetadata::dirty(Oid::UNASSIGNED));
        assert_eq!(
            cache.metadata(&obj).unwrap(),
            ObjectMetadata::dirty(Oid::UNASSIGNED)
        );
        assert_eq!(cache.oid_count(), 0);
    }

    #[test]
    fn metadata_only_entries_survive_promotion() {
        let mut cache = ObjectCache::new();
        let stub = new_ref(99u64);
        cache.set_metadata(&stub, ObjectMetadata::deleted(Oid::UNASSIGNED));
        let _objs = fill(&mut cache, SMALL_CACHE_LIMIT as u64 + 1);
        assert!(cache.is_large());
        assert_eq!(
            cache.metadata(&stub).unwrap(),
            ObjectMetadata::deleted(Oid::UNASSIGNED)
        );
    }

    #[test]
    fn remove_oid_keeps_metadata() {
        let mut cache = ObjectCache::new();
        let obj = new_ref(1u8);
        cache.insert(Oid::new(1), &obj, ObjectMetadata::read(Oid::new(1)));
        cache.remove_oid(Oid::new(1));
        assert!(cache.get_by_oid(Oid::new(1)).is_none());
        assert!(cache.metadata(&obj).is_some());
    }

    #[test]
    fn clear_resets_to_small_mode() {
        let mut cache = ObjectCache::new();
        let _objs = fill(&mut cache, SMALL_CACHE_LIMIT as u64 + 1);
        assert!(cache.is_large());
        cache.clear();
        assert!(!cache.is_large());
        assert_eq!(cache.oid_count(), 0);
    }
}
