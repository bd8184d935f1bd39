pub mod adapter;
pub mod schema;

use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::ToSql;
use std::fmt;
use thiserror::Error;

pub use adapter::{CollectionDef, CollectionInfo, DocumentStore, IndexDef, Tx, TxMode, Upgrade};
pub use schema::{open_store, SchemaLayout, DB_NAME, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store version changed from {expected} to {found}; the handle must be reopened")]
    StaleHandle { expected: i64, found: i64 },
    #[error("unknown collection {0}")]
    UnknownCollection(String),
    #[error("collection {0} is not declared in this transaction")]
    OutOfScope(String),
    #[error("write to {0} inside a read-only transaction")]
    ReadOnly(String),
    #[error("record in {collection} has no usable key at {key_path}")]
    MissingKey { collection: String, key_path: String },
    #[error("record {key} already exists in {collection}")]
    DuplicateKey { collection: String, key: Key },
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("schema conflict: {0}")]
    SchemaConflict(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Primary key of a record: auto-assigned integers or natural text keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(value) => Some(*value),
            Key::Text(_) => None,
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Key::Int(value) => serde_json::Value::from(*value),
            Key::Text(value) => serde_json::Value::from(value.as_str()),
        }
    }

    pub(crate) fn from_sql(value: SqlValue) -> Option<Self> {
        match value {
            SqlValue::Integer(value) => Some(Key::Int(value)),
            SqlValue::Text(value) => Some(Key::Text(value)),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(value) => write!(f, "{value}"),
            Key::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl From<chrono::NaiveDate> for Key {
    fn from(value: chrono::NaiveDate) -> Self {
        Key::Text(value.format("%Y-%m-%d").to_string())
    }
}

impl ToSql for Key {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Key::Int(value) => value.to_sql(),
            Key::Text(value) => value.to_sql(),
        }
    }
}
