//! Key layout of the persisted database.
//!
//! Every key starts with one prefix byte naming its record family, followed
//! by order-preserving integers from [`objdb_codec::vuint`]:
//!
//! | prefix | key                                 | value                          |
//! |--------|-------------------------------------|--------------------------------|
//! | `0x00` | `table_id`                          | table name                     |
//! | `0x01` | `table_id version`                  | CBOR version schema            |
//! | `0x02` | `table_id`                          | singleton oid                  |
//! | `0x03` | `oid`                               | `table_id version fields…`     |
//! | `0x04` | `dict_id entry-key`                 | entry value                    |
//! | `0x05` | `relation_id pk…`                   | `version value fields…`        |
//! | `0x06` | `relation_id index sk… pk…`         | empty                          |
//! | `0x07` | `relation_id`                       | relation name                  |
//! | `0x08` | `relation_id version`               | CBOR version schema            |
//! | `0x09` | counter tag                         | counter value                  |

use crate::error::{CoreError, CoreResult};
use crate::types::{DictId, Oid, TableId};
use objdb_codec::{read_vuint, ByteWriter};

/// Table name records.
pub const TABLE_NAMES: u8 = 0x00;
/// Table version schema records.
pub const TABLE_VERSIONS: u8 = 0x01;
/// Singleton oid records.
pub const SINGLETONS: u8 = 0x02;
/// Object rows.
pub const OBJECTS: u8 = 0x03;
/// Nested dictionary entries.
pub const DICTIONARIES: u8 = 0x04;
/// Relation primary-key rows.
pub const RELATION_ROWS: u8 = 0x05;
/// Relation secondary-key entries.
pub const RELATION_SECONDARY: u8 = 0x06;
/// Relation name records.
pub const RELATION_NAMES: u8 = 0x07;
/// Relation version schema records.
pub const RELATION_VERSIONS: u8 = 0x08;
/// Allocation counters.
pub const COUNTERS: u8 = 0x09;

/// Counter tag of the last allocated object id.
pub const LAST_OID_COUNTER: u8 = 0x00;
/// Counter tag of the last allocated dictionary id.
pub const LAST_DICT_COUNTER: u8 = 0x01;

fn key(prefix: u8, ids: &[u64]) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(1 + ids.len() * 3);
    writer.write_u8(prefix);
    for id in ids {
        writer.write_vuint(*id);
    }
    writer.into_bytes()
}

/// Key of a table or relation name record.
#[must_use]
pub fn name_key(prefix: u8, id: TableId) -> Vec<u8> {
    key(prefix, &[u64::from(id.as_u32())])
}

/// Key of a version schema record.
#[must_use]
pub fn version_key(prefix: u8, id: TableId, version: u32) -> Vec<u8> {
    key(prefix, &[u64::from(id.as_u32()), u64::from(version)])
}

/// Key of a singleton oid record.
#[must_use]
pub fn singleton_key(id: TableId) -> Vec<u8> {
    key(SINGLETONS, &[u64::from(id.as_u32())])
}

/// Key of an object row.
#[must_use]
pub fn object_key(oid: Oid) -> Vec<u8> {
    key(OBJECTS, &[oid.as_u64()])
}

/// Prefix of one nested dictionary's entries.
#[must_use]
pub fn dictionary_prefix(id: DictId) -> Vec<u8> {
    key(DICTIONARIES, &[id.as_u64()])
}

/// Prefix of one relation's primary-key rows.
#[must_use]
pub fn relation_rows_prefix(id: TableId) -> Vec<u8> {
    key(RELATION_ROWS, &[u64::from(id.as_u32())])
}

/// Prefix of one secondary index of a relation.
#[must_use]
pub fn secondary_index_prefix(id: TableId, index: u32) -> Vec<u8> {
    key(
        RELATION_SECONDARY,
        &[u64::from(id.as_u32()), u64::from(index)],
    )
}

/// Prefix of every secondary index of a relation.
#[must_use]
pub fn secondary_prefix(id: TableId) -> Vec<u8> {
    key(RELATION_SECONDARY, &[u64::from(id.as_u32())])
}

/// Key of an allocation counter.
#[must_use]
pub fn counter_key(tag: u8) -> Vec<u8> {
    vec![COUNTERS, tag]
}

/// Reads the integer ids following the prefix byte of `key`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFormat`] if `key` does not start with
/// `prefix` followed by `count` integers.
pub fn parse_ids(key: &[u8], prefix: u8, count: usize) -> CoreResult<Vec<u64>> {
    if key.first() != Some(&prefix) {
        return Err(CoreError::invalid_format(format!(
            "key does not start with prefix {prefix:#04x}"
        )));
    }
    let mut pos = 1;
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let (value, len) = read_vuint(&key[pos..])?;
        ids.push(value);
        pos += len;
    }
    Ok(ids)
}

/// Extracts the object id from an object row key.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFormat`] for keys outside the object prefix.
pub fn oid_from_key(key: &[u8]) -> CoreResult<Oid> {
    let ids = parse_ids(key, OBJECTS, 1)?;
    Ok(Oid::new(ids[0]))
}

/// Extracts a table id, failing when it exceeds 32 bits.
pub(crate) fn table_id_from(value: u64) -> CoreResult<TableId> {
    u32::try_from(value)
        .map(TableId::new)
        .map_err(|_| CoreError::invalid_format(format!("table id {value} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn object_keys_sort_by_oid() {
        assert!(object_key(Oid::new(2)) < object_key(Oid::new(10)));
        assert!(object_key(Oid::new(127)) < object_key(Oid::new(128)));
        assert_eq!(object_key(Oid::new(5)), vec![OBJECTS, 5]);
    }

    #[test]
    fn oid_roundtrip_through_key() {
        let key = object_key(Oid::new(300_000));
        assert_eq!(oid_from_key(&key).unwrap(), Oid::new(300_000));
        assert!(oid_from_key(&[TABLE_NAMES, 1]).is_err());
    }

    #[test]
    fn version_keys_share_table_prefix() {
        let table = TableId::new(4);
        let prefix = name_key(TABLE_VERSIONS, table);
        assert!(version_key(TABLE_VERSIONS, table, 1).starts_with(&prefix));
        assert_eq!(
            parse_ids(&version_key(TABLE_VERSIONS, table, 9), TABLE_VERSIONS, 2).unwrap(),
            vec![4, 9]
        );
    }

    proptest! {
        #[test]
        fn dictionary_prefixes_do_not_nest(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            prop_assume!(a != b);
            let pa = dictionary_prefix(DictId::new(a));
            let pb = dictionary_prefix(DictId::new(b));
            prop_assert!(!pa.starts_with(&pb));
            prop_assert!(!pb.starts_with(&pa));
        }

        #[test]
        fn relation_prefixes_do_not_nest(a in 0u32..100_000, b in 0u32..100_000) {
            prop_assume!(a != b);
            let pa = relation_rows_prefix(TableId::new(a));
            let pb = relation_rows_prefix(TableId::new(b));
            prop_assert!(!pa.starts_with(&pb));
        }
    }
}
