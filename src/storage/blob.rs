//! Blob encoding for row payloads.
//!
//! Each row is stored as one git blob holding a compact JSON document. The
//! encoding is canonical: columns live in a `BTreeMap` and serde_json's
//! object map is ordered, so the same row always produces the same bytes and
//! therefore the same blob id.
//!
//! The format stored in git:
//! ```text
//! {"_table":"users","columns":{"id":1,"name":"Yumin"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{ColumnMap, Digest, TableName};

/// A row as read back from the row store.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEntry {
    /// digest of the canonical encoding, also the blob id
    pub hash: Digest,
    /// table the row belongs to
    pub table: TableName,
    /// column values
    pub columns: ColumnMap,
}

impl RowEntry {
    /// get a column value by name
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.columns.get(column)
    }
}

/// borrowed view used for encoding, so hashing never clones a row
#[derive(Serialize)]
struct RowBlobRef<'a> {
    #[serde(rename = "_table")]
    table: &'a str,
    columns: &'a ColumnMap,
}

#[derive(Deserialize)]
struct RowBlob {
    #[serde(rename = "_table")]
    table: String,
    columns: ColumnMap,
}

/// encode a row into its canonical bytes
pub fn encode_row(table: &TableName, columns: &ColumnMap) -> StorageResult<Vec<u8>> {
    let blob = RowBlobRef {
        table: table.as_str(),
        columns,
    };
    Ok(serde_json::to_vec(&blob)?)
}

/// decode a stored blob, tagging failures with the digest it was read under
pub fn decode_row(bytes: &[u8], hash: Digest) -> StorageResult<RowEntry> {
    let blob: RowBlob = serde_json::from_slice(bytes).map_err(|e| StorageError::CorruptedData {
        hash,
        reason: format!("payload is not a row document: {}", e),
    })?;

    let table = TableName::new(blob.table).map_err(|e| StorageError::CorruptedData {
        hash,
        reason: format!("stored table name is invalid: {}", e),
    })?;

    Ok(RowEntry {
        hash,
        table,
        columns: blob.columns,
    })
}

/// write raw bytes as a blob, returning its id
pub fn write_blob(repo: &git2::Repository, bytes: &[u8]) -> StorageResult<Digest> {
    let oid = repo.blob(bytes)?;
    Ok(Digest::new(oid))
}

/// read a blob's content, `None` when the object database has no such blob
pub fn read_blob(repo: &git2::Repository, hash: Digest) -> StorageResult<Option<Vec<u8>>> {
    match repo.find_blob(hash.raw()) {
        Ok(blob) => Ok(Some(blob.content().to_vec())),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(value: serde_json::Value) -> ColumnMap {
        match value {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_encoding_format() {
        let table = TableName::new("users").unwrap();
        let bytes = encode_row(&table, &columns(json!({"name": "Yumin", "id": 1}))).unwrap();

        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"_table":"users","columns":{"id":1,"name":"Yumin"}}"#
        );
    }

    #[test]
    fn test_nested_json_is_sorted() {
        let table = TableName::new("docs").unwrap();
        let a = encode_row(&table, &columns(json!({"body": {"b": 1, "a": 2}}))).unwrap();
        let b = encode_row(&table, &columns(json!({"body": {"a": 2, "b": 1}}))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let digest = Digest::from_hex("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();

        let err = decode_row(b"not json", digest).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedData { .. }));

        let err = decode_row(br#"{"_table":"bad name","columns":{}}"#, digest).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedData { .. }));
    }

    #[test]
    fn test_decode_keeps_columns() {
        let digest = Digest::from_hex("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();
        let entry = decode_row(br#"{"_table":"users","columns":{"name":"Gomez"}}"#, digest).unwrap();

        assert_eq!(entry.table.as_str(), "users");
        assert_eq!(entry.get("name"), Some(&json!("Gomez")));
        assert_eq!(entry.hash, digest);
    }
}
