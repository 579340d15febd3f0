//! Key-space layout of the object layer.
//!
//! Every key starts with a single prefix byte followed by varint-encoded
//! components, so keys of one kind sort together and in numeric order.

use crate::types::{Oid, TableId};
use odb_codec::vuint;

/// Prefix for object content keyed by object id.
pub const ALL_OBJECTS: &[u8] = &[1];
/// Prefix for table id to table name bindings.
pub const TABLE_NAMES: &[u8] = &[2];
/// Prefix for per-version table descriptors.
pub const TABLE_VERSIONS: &[u8] = &[3];
/// Prefix for table id to singleton object id bindings.
pub const TABLE_SINGLETONS: &[u8] = &[4];
/// Prefix for dictionary content keyed by dictionary id.
pub const ALL_DICTIONARIES: &[u8] = &[5];
/// Prefix for relation primary-key rows.
pub const ALL_RELATIONS_PK: &[u8] = &[6];
/// Prefix for relation secondary-key rows.
pub const ALL_RELATIONS_SK: &[u8] = &[7];

/// Builds the object content key for `oid`.
#[must_use]
pub fn all_objects_key(oid: Oid) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + vuint::MAX_LEN);
    key.extend_from_slice(ALL_OBJECTS);
    vuint::encode_into(&mut key, oid.as_u64());
    key
}

/// Builds the table name key for `table_id`.
#[must_use]
pub fn table_names_key(table_id: TableId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + vuint::MAX_LEN);
    key.extend_from_slice(TABLE_NAMES);
    vuint::encode_into(&mut key, u64::from(table_id.as_u32()));
    key
}

/// Builds the version descriptor key for `(table_id, version)`.
#[must_use]
pub fn table_versions_key(table_id: TableId, version: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 2 * vuint::MAX_LEN);
    key.extend_from_slice(TABLE_VERSIONS);
    vuint::encode_into(&mut key, u64::from(table_id.as_u32()));
    vuint::encode_into(&mut key, u64::from(version));
    key
}

/// Builds the singleton oid key for `table_id`.
#[must_use]
pub fn table_singletons_key(table_id: TableId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + vuint::MAX_LEN);
    key.extend_from_slice(TABLE_SINGLETONS);
    vuint::encode_into(&mut key, u64::from(table_id.as_u32()));
    key
}

/// Builds the content prefix owned by dictionary `dict_id`.
#[must_use]
pub fn dictionary_prefix(dict_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + vuint::MAX_LEN);
    key.extend_from_slice(ALL_DICTIONARIES);
    vuint::encode_into(&mut key, dict_id);
    key
}

/// Decodes the oid from an object content key.
///
/// Returns `None` if the key does not carry the `ALL_OBJECTS` prefix.
#[must_use]
pub fn oid_from_key(key: &[u8]) -> Option<Oid> {
    let rest = key.strip_prefix(ALL_OBJECTS)?;
    vuint::decode(rest).ok().map(|(oid, _)| Oid::new(oid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_sort_in_oid_order() {
        let a = all_objects_key(Oid::new(127));
        let b = all_objects_key(Oid::new(128));
        let c = all_objects_key(Oid::new(70_000));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn prefixes_are_distinct() {
        let prefixes = [
            ALL_OBJECTS,
            TABLE_NAMES,
            TABLE_VERSIONS,
            TABLE_SINGLETONS,
            ALL_DICTIONARIES,
            ALL_RELATIONS_PK,
            ALL_RELATIONS_SK,
        ];
        for (i, a) in prefixes.iter().enumerate() {
            for b in &prefixes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn oid_roundtrips_through_key() {
        let key = all_objects_key(Oid::new(42));
        assert_eq!(oid_from_key(&key), Some(Oid::new(42)));
        assert_eq!(oid_from_key(&table_names_key(TableId::new(1))), None);
    }

    #[test]
    fn version_key_embeds_both_components() {
        let key = table_versions_key(TableId::new(3), 2);
        assert_eq!(key[0], TABLE_VERSIONS[0]);
        assert_eq!(&key[1..], &[3, 2]);
    }
}
