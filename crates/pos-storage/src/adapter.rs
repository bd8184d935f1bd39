use crate::{Key, StorageError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const META_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS _pos_collections (
    name TEXT PRIMARY KEY,
    key_path TEXT NOT NULL,
    auto_increment INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS _pos_indexes (
    collection TEXT NOT NULL,
    name TEXT NOT NULL,
    field TEXT NOT NULL,
    PRIMARY KEY (collection, name)
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub field: String,
}

impl IndexDef {
    pub fn on(field: &str) -> Self {
        Self {
            name: field.to_string(),
            field: field.to_string(),
        }
    }
}

/// Declared shape of a collection: where its key lives and what is indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDef {
    pub name: String,
    pub key_path: String,
    pub auto_increment: bool,
    pub indexes: Vec<IndexDef>,
}

impl CollectionDef {
    pub fn keyed(name: &str, key_path: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    pub fn auto(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: "id".to_string(),
            auto_increment: true,
            indexes: Vec::new(),
        }
    }

    pub fn indexed(mut self, fields: &[&str]) -> Self {
        self.indexes.extend(fields.iter().map(|field| IndexDef::on(field)));
        self
    }
}

/// A collection as it exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub key_path: String,
    pub auto_increment: bool,
    pub indexed_fields: BTreeSet<String>,
}

impl CollectionInfo {
    fn table(&self) -> String {
        table_name(&self.name)
    }
}

fn table_name(collection: &str) -> String {
    format!("\"col_{collection}\"")
}

fn check_identifier(value: &str) -> Result<(), StorageError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if !valid {
        return Err(StorageError::InvalidIdentifier(value.to_string()));
    }
    Ok(())
}

fn load_catalog(conn: &Connection) -> Result<BTreeMap<String, CollectionInfo>, StorageError> {
    let mut catalog = BTreeMap::new();
    let mut statement =
        conn.prepare("SELECT name, key_path, auto_increment FROM _pos_collections ORDER BY name")?;
    let rows = statement.query_map([], |row| {
        Ok(CollectionInfo {
            name: row.get(0)?,
            key_path: row.get(1)?,
            auto_increment: row.get::<_, i64>(2)? != 0,
            indexed_fields: BTreeSet::new(),
        })
    })?;
    for row in rows {
        let info = row?;
        catalog.insert(info.name.clone(), info);
    }

    let mut statement = conn.prepare("SELECT collection, field FROM _pos_indexes")?;
    let rows = statement.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (collection, field) = row?;
        if let Some(info) = catalog.get_mut(&collection) {
            info.indexed_fields.insert(field);
        }
    }
    Ok(catalog)
}

fn read_version(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Schema-changing view handed to the upgrade callback of [`DocumentStore::open`].
/// Everything done through it commits together with the version bump.
pub struct Upgrade<'a> {
    conn: &'a Connection,
    old_version: i64,
    new_version: i64,
}

impl Upgrade<'_> {
    pub fn old_version(&self) -> i64 {
        self.old_version
    }

    pub fn new_version(&self) -> i64 {
        self.new_version
    }

    pub fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StorageError> {
        Ok(load_catalog(self.conn)?.remove(name))
    }

    /// Creates the collection and its indexes if missing. Returns whether it
    /// was created. An existing collection is never rewritten, only given
    /// any indexes it lacks.
    pub fn ensure_collection(&self, def: &CollectionDef) -> Result<bool, StorageError> {
        check_identifier(&def.name)?;
        let created = match self.collection(&def.name)? {
            Some(_) => false,
            None => {
                let columns = if def.auto_increment {
                    "pk INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL"
                } else {
                    "pk NOT NULL PRIMARY KEY, doc TEXT NOT NULL"
                };
                self.conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {} ({columns});",
                    table_name(&def.name)
                ))?;
                self.conn.execute(
                    "INSERT INTO _pos_collections (name, key_path, auto_increment) VALUES (?1, ?2, ?3)",
                    params![def.name, def.key_path, def.auto_increment as i64],
                )?;
                info!(event = "collection_created", collection = %def.name, key_path = %def.key_path);
                true
            }
        };
        for index in &def.indexes {
            self.ensure_index(&def.name, index)?;
        }
        Ok(created)
    }

    pub fn ensure_index(&self, collection: &str, index: &IndexDef) -> Result<(), StorageError> {
        check_identifier(&index.name)?;
        check_identifier(&index.field)?;
        if self.collection(collection)?.is_none() {
            return Err(StorageError::UnknownCollection(collection.to_string()));
        }
        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{collection}_{name}\" ON {table} (json_extract(doc, '$.{field}'));",
            name = index.name,
            table = table_name(collection),
            field = index.field,
        ))?;
        self.conn.execute(
            "INSERT OR IGNORE INTO _pos_indexes (collection, name, field) VALUES (?1, ?2, ?3)",
            params![collection, index.name, index.field],
        )?;
        Ok(())
    }
}

/// Transactional document store over a single SQLite connection.
///
/// Records are JSON documents addressed by collection and primary key. Each
/// call to [`DocumentStore::run_transaction`] is its own unit of work; nothing
/// is shared between calls except the connection itself.
pub struct DocumentStore {
    conn: Connection,
    path: Option<PathBuf>,
    version: i64,
    catalog: BTreeMap<String, CollectionInfo>,
    stale: bool,
}

impl DocumentStore {
    /// Opens (or creates) the store at `path`, or an in-memory store for
    /// `None`, and runs `upgrade` inside the opening transaction.
    pub fn open<F>(path: Option<&Path>, version: i64, upgrade: F) -> Result<Self, StorageError>
    where
        F: FnOnce(&Upgrade<'_>) -> Result<(), StorageError>,
    {
        let mut conn = match path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(META_SCHEMA)?;

        let found = read_version(&conn)?;
        if found > version {
            return Err(StorageError::UnsupportedSchemaVersion {
                found,
                supported: version,
            });
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        upgrade(&Upgrade {
            conn: &tx,
            old_version: found,
            new_version: version,
        })?;
        if found < version {
            tx.pragma_update(None, "user_version", version)?;
            info!(event = "schema_upgrade", from = found, to = version);
        }
        tx.commit()?;

        let catalog = load_catalog(&conn)?;
        Ok(Self {
            conn,
            path: path.map(Path::to_path_buf),
            version,
            catalog,
            stale: false,
        })
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.catalog.keys().cloned().collect()
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionInfo> {
        self.catalog.get(name)
    }

    /// Runs `body` in one transaction over `collections`. Commits when the
    /// body returns `Ok`, rolls back when it returns `Err`.
    pub fn run_transaction<T, E, F>(
        &mut self,
        collections: &[&str],
        mode: TxMode,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Tx<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.ensure_current()?;

        let mut scope = BTreeMap::new();
        for name in collections {
            let info = self
                .catalog
                .get(*name)
                .ok_or_else(|| StorageError::UnknownCollection(name.to_string()))?;
            scope.insert(info.name.clone(), info.clone());
        }

        let behavior = match mode {
            TxMode::ReadOnly => TransactionBehavior::Deferred,
            TxMode::ReadWrite => TransactionBehavior::Immediate,
        };
        let tx = self
            .conn
            .transaction_with_behavior(behavior)
            .map_err(StorageError::from)?;
        let outcome = body(&Tx {
            conn: &tx,
            scope,
            mode,
        });
        match outcome {
            Ok(value) => {
                tx.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(err) => {
                debug!(event = "transaction_rollback", collections = ?collections);
                tx.rollback().map_err(StorageError::from)?;
                Err(err)
            }
        }
    }

    /// Fails once the on-disk version moved away from the one this handle
    /// was opened with; the handle stays invalid from then on.
    fn ensure_current(&mut self) -> Result<(), StorageError> {
        let found = if self.stale {
            read_version(&self.conn).unwrap_or(self.version)
        } else {
            read_version(&self.conn)?
        };
        if self.stale || found != self.version {
            if !self.stale {
                warn!(event = "stale_handle", expected = self.version, found = found);
            }
            self.stale = true;
            return Err(StorageError::StaleHandle {
                expected: self.version,
                found,
            });
        }
        Ok(())
    }

    /// Closes the connection and deletes the backing file with its WAL
    /// siblings. An in-memory store simply goes away.
    pub fn destroy(self) -> Result<(), StorageError> {
        let path = self.path.clone();
        self.conn
            .close()
            .map_err(|(_, err)| StorageError::Sqlite(err))?;
        if let Some(path) = path {
            for candidate in [
                path.clone(),
                sibling(&path, "-wal"),
                sibling(&path, "-shm"),
                sibling(&path, "-journal"),
            ] {
                match std::fs::remove_file(&candidate) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Per-transaction accessors, limited to the collections the transaction
/// declared.
pub struct Tx<'t> {
    conn: &'t Connection,
    scope: BTreeMap<String, CollectionInfo>,
    mode: TxMode,
}

impl Tx<'_> {
    fn info(&self, collection: &str) -> Result<&CollectionInfo, StorageError> {
        self.scope
            .get(collection)
            .ok_or_else(|| StorageError::OutOfScope(collection.to_string()))
    }

    fn writable(&self, collection: &str) -> Result<&CollectionInfo, StorageError> {
        let info = self.info(collection)?;
        if self.mode == TxMode::ReadOnly {
            return Err(StorageError::ReadOnly(collection.to_string()));
        }
        Ok(info)
    }

    pub fn get(&self, collection: &str, key: impl Into<Key>) -> Result<Option<Value>, StorageError> {
        let info = self.info(collection)?;
        let key: Key = key.into();
        let raw: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT doc FROM {} WHERE pk = ?1", info.table()),
                [&key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| decode(info, key, &raw)).transpose()
    }

    pub fn get_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: impl Into<Key>,
    ) -> Result<Option<T>, StorageError> {
        self.get(collection, key)?
            .map(|doc| serde_json::from_value(doc).map_err(StorageError::from))
            .transpose()
    }

    /// Every record of the collection in key order.
    pub fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        let info = self.info(collection)?;
        self.select(info, &format!("SELECT pk, doc FROM {} ORDER BY pk", info.table()), &[])
    }

    pub fn get_all_as<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StorageError> {
        typed(self.get_all(collection)?)
    }

    /// Records whose top-level `field` equals `value`. Uses the secondary
    /// index when the collection has one on `field`, otherwise scans.
    pub fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StorageError> {
        let info = self.info(collection)?;
        check_identifier(field)?;
        if info.indexed_fields.contains(field) {
            let (predicate, param) = match json_to_sql(value) {
                Some(param) => ("= ?1", param),
                None => ("IS NULL", SqlValue::Null),
            };
            let sql = format!(
                "SELECT pk, doc FROM {} WHERE json_extract(doc, '$.{field}') {predicate} ORDER BY pk",
                info.table()
            );
            let params: Vec<&dyn rusqlite::ToSql> = if matches!(param, SqlValue::Null) {
                Vec::new()
            } else {
                vec![&param as &dyn rusqlite::ToSql]
            };
            return self.select(info, &sql, &params);
        }

        Ok(self
            .get_all(collection)?
            .into_iter()
            .filter(|doc| doc.get(field).unwrap_or(&Value::Null) == value)
            .collect())
    }

    pub fn query_by_field_as<T: DeserializeOwned>(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<T>, StorageError> {
        typed(self.query_by_field(collection, field, value)?)
    }

    pub fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let info = self.info(collection)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", info.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Inserts or replaces. Auto-increment collections assign a key when the
    /// document carries none.
    pub fn put(&self, collection: &str, doc: &Value) -> Result<Key, StorageError> {
        let info = self.writable(collection)?;
        let raw = serde_json::to_string(doc)?;
        match record_key(info, doc)? {
            Some(key) => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO {} (pk, doc) VALUES (?1, ?2)
                         ON CONFLICT(pk) DO UPDATE SET doc = excluded.doc",
                        info.table()
                    ),
                    params![key, raw],
                )?;
                Ok(key)
            }
            None => self.insert_auto(info, &raw),
        }
    }

    pub fn put_as<T: Serialize>(&self, collection: &str, record: &T) -> Result<Key, StorageError> {
        self.put(collection, &serde_json::to_value(record)?)
    }

    /// Inserts; fails with [`StorageError::DuplicateKey`] if the key exists.
    pub fn add(&self, collection: &str, doc: &Value) -> Result<Key, StorageError> {
        let info = self.writable(collection)?;
        let raw = serde_json::to_string(doc)?;
        match record_key(info, doc)? {
            Some(key) => {
                let inserted = self.conn.execute(
                    &format!("INSERT INTO {} (pk, doc) VALUES (?1, ?2)", info.table()),
                    params![key, raw],
                );
                match inserted {
                    Ok(_) => Ok(key),
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        Err(StorageError::DuplicateKey {
                            collection: collection.to_string(),
                            key,
                        })
                    }
                    Err(err) => Err(err.into()),
                }
            }
            None => self.insert_auto(info, &raw),
        }
    }

    pub fn add_as<T: Serialize>(&self, collection: &str, record: &T) -> Result<Key, StorageError> {
        self.add(collection, &serde_json::to_value(record)?)
    }

    pub fn delete(&self, collection: &str, key: impl Into<Key>) -> Result<bool, StorageError> {
        let info = self.writable(collection)?;
        let key: Key = key.into();
        let changes = self.conn.execute(
            &format!("DELETE FROM {} WHERE pk = ?1", info.table()),
            [&key],
        )?;
        Ok(changes > 0)
    }

    fn insert_auto(&self, info: &CollectionInfo, raw: &str) -> Result<Key, StorageError> {
        self.conn.execute(
            &format!("INSERT INTO {} (doc) VALUES (?1)", info.table()),
            [raw],
        )?;
        Ok(Key::Int(self.conn.last_insert_rowid()))
    }

    fn select(
        &self,
        info: &CollectionInfo,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Value>, StorageError> {
        let mut statement = self.conn.prepare(sql)?;
        let rows = statement.query_map(params, |row| {
            Ok((row.get::<_, SqlValue>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (pk, raw) = row?;
            let key = Key::from_sql(pk).ok_or_else(|| StorageError::MissingKey {
                collection: info.name.clone(),
                key_path: info.key_path.clone(),
            })?;
            docs.push(decode(info, key, &raw)?);
        }
        Ok(docs)
    }
}

fn typed<T: DeserializeOwned>(docs: Vec<Value>) -> Result<Vec<T>, StorageError> {
    docs.into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(StorageError::from))
        .collect()
}

fn record_key(info: &CollectionInfo, doc: &Value) -> Result<Option<Key>, StorageError> {
    let missing = || StorageError::MissingKey {
        collection: info.name.clone(),
        key_path: info.key_path.clone(),
    };
    if !doc.is_object() {
        return Err(missing());
    }
    match doc.get(&info.key_path) {
        Some(Value::Number(number)) => number.as_i64().map(Key::Int).map(Some).ok_or_else(missing),
        Some(Value::String(text)) if !info.auto_increment => Ok(Some(Key::Text(text.clone()))),
        None | Some(Value::Null) if info.auto_increment => Ok(None),
        _ => Err(missing()),
    }
}

/// Parses a stored document and writes its primary key back at the key path.
fn decode(info: &CollectionInfo, key: Key, raw: &str) -> Result<Value, StorageError> {
    let mut doc: Value = serde_json::from_str(raw)?;
    if let Value::Object(map) = &mut doc {
        map.insert(info.key_path.clone(), key.to_json());
    }
    Ok(doc)
}

fn json_to_sql(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(SqlValue::Integer(*flag as i64)),
        Value::Number(number) => Some(match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        }),
        Value::String(text) => Some(SqlValue::Text(text.clone())),
        other => Some(SqlValue::Text(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn notes_schema(up: &Upgrade<'_>) -> Result<(), StorageError> {
        up.ensure_collection(&CollectionDef::auto("notes").indexed(&["day"]))?;
        up.ensure_collection(&CollectionDef::keyed("pages", "date"))?;
        Ok(())
    }

    fn open_memory() -> DocumentStore {
        DocumentStore::open(None, 1, notes_schema).expect("open store")
    }

    #[test]
    fn open_creates_collections_and_sets_version() {
        let store = open_memory();
        assert_eq!(store.collection_names(), vec!["notes", "pages"]);
        let notes = store.collection("notes").expect("notes");
        assert!(notes.auto_increment);
        assert!(notes.indexed_fields.contains("day"));
        assert_eq!(store.collection("pages").expect("pages").key_path, "date");
    }

    #[test]
    fn auto_keys_are_assigned_and_injected_on_read() {
        let mut store = open_memory();
        let key = store
            .run_transaction(&["notes"], TxMode::ReadWrite, |tx| {
                tx.put("notes", &json!({"day": "2024-01-01", "text": "a"}))
            })
            .expect("put");
        assert_eq!(key, Key::Int(1));

        let doc = store
            .run_transaction(&["notes"], TxMode::ReadOnly, |tx| tx.get("notes", 1))
            .expect("get")
            .expect("present");
        assert_eq!(doc["id"], 1);
        assert_eq!(doc["text"], "a");
    }

    #[test]
    fn add_rejects_existing_key_but_put_overwrites() {
        let mut store = open_memory();
        store
            .run_transaction(&["pages"], TxMode::ReadWrite, |tx| {
                tx.add("pages", &json!({"date": "2024-01-01", "v": 1}))
            })
            .expect("first add");

        let err = store
            .run_transaction(&["pages"], TxMode::ReadWrite, |tx| {
                tx.add("pages", &json!({"date": "2024-01-01", "v": 2}))
            })
            .expect_err("duplicate add");
        assert!(matches!(err, StorageError::DuplicateKey { .. }));

        store
            .run_transaction(&["pages"], TxMode::ReadWrite, |tx| {
                tx.put("pages", &json!({"date": "2024-01-01", "v": 3}))
            })
            .expect("put");
        let docs = store
            .run_transaction(&["pages"], TxMode::ReadOnly, |tx| tx.get_all("pages"))
            .expect("all");
        assert_eq!(docs, vec![json!({"date": "2024-01-01", "v": 3})]);
    }

    #[test]
    fn failed_body_rolls_back_every_write() {
        let mut store = open_memory();
        let result: Result<(), StorageError> =
            store.run_transaction(&["notes", "pages"], TxMode::ReadWrite, |tx| {
                tx.put("notes", &json!({"day": "2024-01-01"}))?;
                tx.put("pages", &json!({"date": "2024-01-01"}))?;
                Err(StorageError::SchemaConflict("boom".to_string()))
            });
        assert!(result.is_err());

        let counts = store
            .run_transaction(&["notes", "pages"], TxMode::ReadOnly, |tx| {
                Ok::<_, StorageError>((tx.count("notes")?, tx.count("pages")?))
            })
            .expect("counts");
        assert_eq!(counts, (0, 0));
    }

    #[test]
    fn scope_and_mode_are_enforced() {
        let mut store = open_memory();
        let err = store
            .run_transaction(&["notes"], TxMode::ReadOnly, |tx| {
                tx.put("notes", &json!({"day": "x"}))
            })
            .expect_err("read-only write");
        assert!(matches!(err, StorageError::ReadOnly(_)));

        let err = store
            .run_transaction(&["notes"], TxMode::ReadWrite, |tx| tx.get_all("pages"))
            .expect_err("undeclared collection");
        assert!(matches!(err, StorageError::OutOfScope(_)));

        let err = store
            .run_transaction(&["ghosts"], TxMode::ReadOnly, |tx| tx.count("ghosts"))
            .expect_err("unknown collection");
        assert!(matches!(err, StorageError::UnknownCollection(_)));
    }

    #[test]
    fn query_by_field_agrees_between_index_and_scan() {
        let mut store = open_memory();
        store
            .run_transaction(&["notes", "pages"], TxMode::ReadWrite, |tx| {
                for (day, tag) in [("2024-01-01", 1), ("2024-01-02", 2), ("2024-01-01", 2)] {
                    tx.put("notes", &json!({"day": day, "tag": tag}))?;
                }
                tx.put("pages", &json!({"date": "2024-01-01", "tag": 2}))?;
                tx.put("pages", &json!({"date": "2024-01-02", "tag": 3}))?;
                Ok::<_, StorageError>(())
            })
            .expect("seed");

        let (by_index, by_scan, pages) = store
            .run_transaction(&["notes", "pages"], TxMode::ReadOnly, |tx| {
                Ok::<_, StorageError>((
                    tx.query_by_field("notes", "day", &json!("2024-01-01"))?,
                    tx.query_by_field("notes", "tag", &json!(2))?,
                    tx.query_by_field("pages", "tag", &json!(2))?,
                ))
            })
            .expect("query");

        fn ids(docs: &[Value]) -> Vec<Value> {
            docs.iter().map(|doc| doc["id"].clone()).collect()
        }
        assert_eq!(ids(&by_index), vec![json!(1), json!(3)]);
        assert_eq!(ids(&by_scan), vec![json!(2), json!(3)]);
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn reopening_is_idempotent() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let mut store = DocumentStore::open(Some(file.path()), 1, notes_schema).expect("open");
            store
                .run_transaction(&["notes"], TxMode::ReadWrite, |tx| {
                    tx.put("notes", &json!({"day": "2024-01-01"}))
                })
                .expect("put");
        }
        let mut store = DocumentStore::open(Some(file.path()), 1, notes_schema).expect("reopen");
        let count = store
            .run_transaction(&["notes"], TxMode::ReadOnly, |tx| tx.count("notes"))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn newer_on_disk_version_is_refused() {
        let file = NamedTempFile::new().expect("temp db");
        DocumentStore::open(Some(file.path()), 2, notes_schema).expect("open v2");
        let err = DocumentStore::open(Some(file.path()), 1, notes_schema)
            .err()
            .expect("v1 must refuse v2 data");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion {
                found: 2,
                supported: 1
            }
        ));
    }

    #[test]
    fn version_change_underneath_invalidates_handle() {
        let file = NamedTempFile::new().expect("temp db");
        let mut old = DocumentStore::open(Some(file.path()), 1, notes_schema).expect("open v1");
        let _new = DocumentStore::open(Some(file.path()), 2, notes_schema).expect("open v2");

        let err = old
            .run_transaction(&["notes"], TxMode::ReadOnly, |tx| tx.count("notes"))
            .expect_err("stale handle");
        assert!(matches!(
            err,
            StorageError::StaleHandle {
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn destroy_removes_the_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("store.db");
        let store = DocumentStore::open(Some(&path), 1, notes_schema).expect("open");
        assert!(path.exists());
        store.destroy().expect("destroy");
        assert!(!path.exists());
    }
}
