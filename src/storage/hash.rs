//! Content hashing for rows, hash sets and snapshots.
//!
//! All digests are git object ids: a row digest is the blob id of the row's
//! canonical encoding (see [`crate::storage::blob`]), which makes hashing and
//! storage addressing agree by construction.

use std::collections::{BTreeMap, BTreeSet};

use git2::{ObjectType, Oid};

use crate::storage::blob;
use crate::storage::error::StorageResult;
use crate::storage::types::{ColumnMap, Digest, TableName};

/// digest of arbitrary bytes, identical to the blob id git would assign them
pub fn hash_bytes(bytes: &[u8]) -> StorageResult<Digest> {
    let oid = Oid::hash_object(ObjectType::Blob, bytes)?;
    Ok(Digest::new(oid))
}

/// digest of one row
///
/// Column order never matters. Values are hashed as given, so callers must
/// hand in normalized values (the catalog does this on every write).
pub fn hash_row(table: &TableName, columns: &ColumnMap) -> StorageResult<Digest> {
    let bytes = blob::encode_row(table, columns)?;
    hash_bytes(&bytes)
}

/// digest of a set of digests; order and duplicates are irrelevant
pub fn hash_set<'a, I>(hashes: I) -> StorageResult<Digest>
where
    I: IntoIterator<Item = &'a Digest>,
{
    let unique: BTreeSet<&Digest> = hashes.into_iter().collect();
    let mut listing = String::with_capacity(unique.len() * 41);
    for hash in unique {
        listing.push_str(&hash.to_string());
        listing.push('\n');
    }
    hash_bytes(listing.as_bytes())
}

/// digest of a whole snapshot: one `hash_set` line per non-empty table
pub fn tree_digest(tables: &BTreeMap<TableName, BTreeSet<Digest>>) -> StorageResult<Digest> {
    let mut listing = String::new();
    for (table, rows) in tables {
        if rows.is_empty() {
            continue;
        }
        listing.push_str(&format!("{} {}\n", table, hash_set(rows)?));
    }
    hash_bytes(listing.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn users() -> TableName {
        TableName::new("users").unwrap()
    }

    fn row(pairs: &[(&str, Value)]) -> ColumnMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_row_hash_matches_git_blob_id() {
        let columns = row(&[("name", json!("Yumin"))]);
        let digest = hash_row(&users(), &columns).unwrap();

        let bytes = blob::encode_row(&users(), &columns).unwrap();
        let oid = Oid::hash_object(ObjectType::Blob, &bytes).unwrap();
        assert_eq!(digest.raw(), oid);
    }

    #[test]
    fn test_row_hash_is_value_sensitive() {
        let a = hash_row(&users(), &row(&[("name", json!("Darby"))])).unwrap();
        let b = hash_row(&users(), &row(&[("name", json!("Darby😜"))])).unwrap();
        let c = hash_row(&users(), &row(&[("name", json!("Darby"))])).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_row_hash_is_table_sensitive() {
        let columns = row(&[("id", json!(1))]);
        let a = hash_row(&users(), &columns).unwrap();
        let b = hash_row(&TableName::new("orders").unwrap(), &columns).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_row_hash_distinguishes_types() {
        let text = hash_row(&users(), &row(&[("active", json!("true"))])).unwrap();
        let boolean = hash_row(&users(), &row(&[("active", json!(true))])).unwrap();
        assert_ne!(text, boolean);
    }

    #[test]
    fn test_tree_digest_ignores_empty_tables() {
        let digest = hash_row(&users(), &row(&[("name", json!("Gomez"))])).unwrap();

        let mut with_empty = BTreeMap::new();
        with_empty.insert(users(), BTreeSet::from([digest]));
        with_empty.insert(TableName::new("orders").unwrap(), BTreeSet::new());

        let mut without = BTreeMap::new();
        without.insert(users(), BTreeSet::from([digest]));

        assert_eq!(tree_digest(&with_empty).unwrap(), tree_digest(&without).unwrap());
        assert_ne!(tree_digest(&without).unwrap(), tree_digest(&BTreeMap::new()).unwrap());
    }

    proptest! {
        #[test]
        fn prop_hash_set_ignores_order_and_duplicates(seeds in proptest::collection::vec(any::<u32>(), 1..24)) {
            let digests: Vec<Digest> = seeds
                .iter()
                .map(|s| hash_bytes(&s.to_le_bytes()).unwrap())
                .collect();

            let mut shuffled = digests.clone();
            shuffled.reverse();
            shuffled.extend(digests.iter().take(3).copied());

            prop_assert_eq!(hash_set(&digests).unwrap(), hash_set(&shuffled).unwrap());
        }

        #[test]
        fn prop_row_hash_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
        ) {
            let forward: ColumnMap = entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let mut backward = ColumnMap::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }

            prop_assert_eq!(hash_row(&users(), &forward).unwrap(), hash_row(&users(), &backward).unwrap());
        }
    }
}
