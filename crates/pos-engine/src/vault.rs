use crate::{Engine, EngineError};
use chrono::{DateTime, NaiveDate, Utc};
use pos_core::calendar::sort_blocks;
use pos_core::finance::month_key;
use pos_core::{CalendarBlock, FinanceTransaction, JournalEntry, MonthlySummary, VaultSnapshot};
use pos_storage::schema::{CALENDAR_BLOCKS, FINANCE_TRANSACTIONS, JOURNAL_ENTRIES};
use pos_storage::{StorageError, Tx, TxMode};
use serde_json::json;
use tracing::{info, warn};

/// Sole writer of the vault collection. The collection name is decided once
/// by the schema migration and handed in here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEngine {
    collection: String,
}

impl VaultEngine {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Assembles the snapshot of `day` from live records and adds it.
    /// Fails with `Already` if a snapshot for `day` exists; nothing is
    /// overwritten.
    pub fn capture(
        &self,
        tx: &Tx<'_>,
        day: NaiveDate,
        closed_at: DateTime<Utc>,
    ) -> Result<VaultSnapshot, EngineError> {
        if tx.get(&self.collection, day)?.is_some() {
            warn!(event = "snapshot_exists", day = %day, collection = %self.collection);
            return Err(EngineError::Already);
        }
        let journal = tx
            .get_as::<JournalEntry>(JOURNAL_ENTRIES, day)?
            .unwrap_or_else(|| JournalEntry::with_defaults(day));
        let mut blocks: Vec<CalendarBlock> =
            tx.query_by_field_as(CALENDAR_BLOCKS, "date", &json!(day))?;
        sort_blocks(&mut blocks);
        let month = month_key(day);
        let transactions: Vec<FinanceTransaction> =
            tx.query_by_field_as(FINANCE_TRANSACTIONS, "month", &json!(month))?;
        let finance = MonthlySummary::from_transactions(&transactions);

        let snapshot = VaultSnapshot::assemble(&journal, &blocks, month, finance, closed_at);
        tx.add_as(&self.collection, &snapshot)?;
        info!(
            event = "snapshot_written",
            day = %day,
            collection = %self.collection,
            performance_pct = snapshot.performance.pct,
            blocks = snapshot.blocks.len()
        );
        Ok(snapshot)
    }

    pub fn get(&self, tx: &Tx<'_>, day: NaiveDate) -> Result<Option<VaultSnapshot>, StorageError> {
        tx.get_as(&self.collection, day)
    }

    /// Newest day first.
    pub fn list(&self, tx: &Tx<'_>) -> Result<Vec<VaultSnapshot>, StorageError> {
        let mut snapshots: Vec<VaultSnapshot> = tx.get_all_as(&self.collection)?;
        snapshots.sort_by(|a, b| b.day_key.cmp(&a.day_key));
        Ok(snapshots)
    }
}

impl Engine {
    pub fn vault_collection(&self) -> &str {
        self.vault.collection()
    }

    pub fn list_vault(&mut self) -> Result<Vec<VaultSnapshot>, EngineError> {
        let vault = self.vault.clone();
        Ok(self
            .store
            .run_transaction(&[vault.collection()], TxMode::ReadOnly, |tx| vault.list(tx))?)
    }

    pub fn get_vault_snapshot(&mut self, day: NaiveDate) -> Result<Option<VaultSnapshot>, EngineError> {
        let vault = self.vault.clone();
        Ok(self
            .store
            .run_transaction(&[vault.collection()], TxMode::ReadOnly, |tx| vault.get(tx, day))?)
    }
}
