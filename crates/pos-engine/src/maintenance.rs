use crate::{Engine, EngineError};
use chrono::{DateTime, Utc};
use pos_core::{
    CalendarBlock, DayTemplate, FinanceCategory, FinanceTransaction, GatekeeperItem, JournalEntry,
    Settings, VaultSnapshot, SETTINGS_ID,
};
use pos_storage::schema::{
    CALENDAR_BLOCKS, DAY_TEMPLATES, FINANCE_CATEGORIES, FINANCE_TRANSACTIONS, GATEKEEPER_ITEMS,
    JOURNAL_ENTRIES, SETTINGS, VAULT_NAMES,
};
use pos_storage::TxMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMeta {
    pub exported_at: DateTime<Utc>,
    pub db_name: String,
    pub db_version: i64,
    pub build_id: String,
}

/// Whole-store dump: `{ meta, stores: { <collection>: [record, ...] } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub meta: ExportMeta,
    pub stores: BTreeMap<String, Vec<Value>>,
}

impl ExportPayload {
    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| EngineError::Invalid(format!("export payload: {err}")))
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        serde_json::from_str(raw)
            .map_err(|err| EngineError::Invalid(format!("import payload: {err}")))
    }

    pub fn record_count(&self) -> usize {
        self.stores.values().map(Vec::len).sum()
    }
}

/// What an import wrote and what it left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Records written per target collection.
    pub written: BTreeMap<String, usize>,
    /// Stores with no matching collection.
    pub skipped_stores: Vec<String>,
    /// Records that were not keyed objects of their collection's shape.
    pub skipped_records: usize,
}

impl ImportReport {
    pub fn total_written(&self) -> usize {
        self.written.values().sum()
    }
}

/// Checks that `record` reads back as the type stored in `collection`.
/// Collections without a known type, such as a legacy vault, accept any
/// keyed object.
fn check_shape(collection: &str, vault: &str, record: &Value) -> Result<(), EngineError> {
    fn shape<T: DeserializeOwned>(record: &Value) -> Result<(), serde_json::Error> {
        T::deserialize(record).map(|_| ())
    }

    let checked = match collection {
        SETTINGS => {
            let settings = Settings::deserialize(record).map_err(invalid)?;
            if settings.id != SETTINGS_ID {
                return Err(EngineError::Invalid(format!(
                    "settings record {} is not {SETTINGS_ID}",
                    settings.id
                )));
            }
            Ok(())
        }
        JOURNAL_ENTRIES => shape::<JournalEntry>(record),
        CALENDAR_BLOCKS => shape::<CalendarBlock>(record),
        DAY_TEMPLATES => shape::<DayTemplate>(record),
        FINANCE_CATEGORIES => shape::<FinanceCategory>(record),
        FINANCE_TRANSACTIONS => shape::<FinanceTransaction>(record),
        GATEKEEPER_ITEMS => shape::<GatekeeperItem>(record),
        name if name == vault => shape::<VaultSnapshot>(record),
        _ => Ok(()),
    };
    checked.map_err(invalid)
}

fn invalid(err: serde_json::Error) -> EngineError {
    EngineError::Invalid(err.to_string())
}

impl Engine {
    /// Every record of every collection, plus meta.
    pub fn export_all(&mut self) -> Result<ExportPayload, EngineError> {
        let names = self.store.collection_names();
        let scope: Vec<&str> = names.iter().map(String::as_str).collect();
        let stores = self.store.run_transaction(&scope, TxMode::ReadOnly, |tx| {
            let mut stores = BTreeMap::new();
            for name in &names {
                stores.insert(name.clone(), tx.get_all(name)?);
            }
            Ok::<_, EngineError>(stores)
        })?;

        let payload = ExportPayload {
            meta: ExportMeta {
                exported_at: self.clock.now_utc(),
                db_name: self.config.db_name.clone(),
                db_version: self.store.version(),
                build_id: self.config.build_id.clone(),
            },
            stores,
        };
        info!(
            event = "export_complete",
            collections = payload.stores.len(),
            records = payload.record_count()
        );
        Ok(payload)
    }

    /// Upserts every record into its collection in one transaction. Nothing
    /// is deleted first. A store lands in the collection of the same name;
    /// a vault store whose name has no collection here lands in the current
    /// vault collection. Records that do not fit their collection's shape are
    /// skipped and counted.
    pub fn import_all(&mut self, payload: &ExportPayload) -> Result<ImportReport, EngineError> {
        let mut report = ImportReport::default();
        let mut plan: Vec<(String, &Vec<Value>)> = Vec::new();
        for (store, records) in &payload.stores {
            let target = if self.store.collection(store).is_some() {
                store.clone()
            } else if VAULT_NAMES.contains(&store.as_str()) {
                self.vault.collection().to_string()
            } else {
                warn!(event = "import_skipped_store", store = %store, records = records.len());
                report.skipped_stores.push(store.clone());
                continue;
            };
            plan.push((target, records));
        }

        let mut scope: Vec<&str> = plan.iter().map(|(target, _)| target.as_str()).collect();
        scope.push(SETTINGS);
        scope.sort_unstable();
        scope.dedup();
        let keys: BTreeMap<String, Option<String>> = plan
            .iter()
            .filter_map(|(target, _)| {
                let info = self.store.collection(target)?;
                let required = (!info.auto_increment).then(|| info.key_path.clone());
                Some((target.clone(), required))
            })
            .collect();
        let vault = self.vault.collection().to_string();

        let (written, skipped) = self.store.run_transaction(&scope, TxMode::ReadWrite, |tx| {
            let mut written: BTreeMap<String, usize> = BTreeMap::new();
            let mut skipped = 0;
            for (target, records) in &plan {
                let required = keys.get(target).cloned().flatten();
                for record in records.iter() {
                    let keyed = match (record.as_object(), &required) {
                        (None, _) => false,
                        (Some(_), None) => true,
                        (Some(doc), Some(key_path)) => {
                            doc.get(key_path).is_some_and(|key| !key.is_null())
                        }
                    };
                    if !keyed {
                        skipped += 1;
                        continue;
                    }
                    if let Err(err) = check_shape(target, &vault, record) {
                        debug!(event = "import_skipped_record", collection = %target, error = %err);
                        skipped += 1;
                        continue;
                    }
                    tx.put(target, record)?;
                    *written.entry(target.clone()).or_insert(0) += 1;
                }
            }
            // Settings that cannot be read back must not commit.
            tx.get_as::<Settings>(SETTINGS, SETTINGS_ID)?;
            Ok::<_, EngineError>((written, skipped))
        })?;
        report.written = written;
        report.skipped_records = skipped;

        let today = self.clock.today();
        self.day.reload(&mut self.store, today)?;
        info!(
            event = "import_complete",
            written = report.total_written(),
            skipped_stores = report.skipped_stores.len(),
            skipped_records = report.skipped_records
        );
        Ok(report)
    }

    /// Closes the store and deletes it for good. Callers confirm first.
    pub fn reset_db(self) -> Result<(), EngineError> {
        let db = self.config.describe_db();
        self.store.destroy()?;
        warn!(event = "store_reset", db = %db);
        Ok(())
    }
}
