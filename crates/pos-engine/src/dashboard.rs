use crate::{Engine, EngineError};
use chrono::NaiveDate;
use pos_core::calendar::{next_block, sort_blocks};
use pos_core::finance::month_key;
use pos_core::{
    BlockTime, CalendarBlock, DayStatus, FinanceTransaction, GatekeeperItem, GatekeeperStatus,
    JournalEntry, MonthlySummary, Performance, VaultSnapshot,
};
use pos_storage::schema::{CALENDAR_BLOCKS, FINANCE_TRANSACTIONS, GATEKEEPER_ITEMS, JOURNAL_ENTRIES};
use pos_storage::TxMode;
use serde::Serialize;
use serde_json::json;

/// Everything the home screen shows, read in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySnapshot {
    pub day_key: NaiveDate,
    pub status: DayStatus,
    pub can_edit_morning: bool,
    pub can_check_todos: bool,
    pub can_edit_evening: bool,
    pub is_read_only: bool,
    pub journal: JournalEntry,
    pub performance: Performance,
    pub blocks: Vec<CalendarBlock>,
    pub next_block: Option<CalendarBlock>,
    pub month: String,
    pub finance: MonthlySummary,
    pub eligible_gatekeeper_items: usize,
    /// Only present once the day is closed; read from the vault, never
    /// recomputed.
    pub vault: Option<VaultSnapshot>,
}

impl Engine {
    /// Read-only: a day without a journal page shows the empty defaults and
    /// nothing is written.
    pub fn get_today_snapshot(&mut self) -> Result<TodaySnapshot, EngineError> {
        let day = self.today();
        let status = self.get_day_status();
        let now = self.clock.now_utc();
        let time_of_day = BlockTime::from_time(self.clock.time_of_day());
        let month = month_key(day);
        let vault = self.vault.clone();
        let collections = [
            JOURNAL_ENTRIES,
            CALENDAR_BLOCKS,
            FINANCE_TRANSACTIONS,
            GATEKEEPER_ITEMS,
            vault.collection(),
        ];

        let snapshot = self.store.run_transaction(&collections, TxMode::ReadOnly, |tx| {
            let journal = tx
                .get_as::<JournalEntry>(JOURNAL_ENTRIES, day)?
                .unwrap_or_else(|| JournalEntry::with_defaults(day));
            let mut blocks: Vec<CalendarBlock> =
                tx.query_by_field_as(CALENDAR_BLOCKS, "date", &json!(day))?;
            sort_blocks(&mut blocks);
            let transactions: Vec<FinanceTransaction> =
                tx.query_by_field_as(FINANCE_TRANSACTIONS, "month", &json!(month))?;
            let locked: Vec<GatekeeperItem> =
                tx.query_by_field_as(GATEKEEPER_ITEMS, "status", &json!(GatekeeperStatus::Locked))?;
            let archived = if status == DayStatus::Closed {
                vault.get(tx, day)?
            } else {
                None
            };

            Ok::<_, EngineError>(TodaySnapshot {
                day_key: day,
                status,
                can_edit_morning: status.can_edit_morning(),
                can_check_todos: status.can_check_todos(),
                can_edit_evening: status.can_edit_evening(),
                is_read_only: status.is_read_only(),
                performance: journal.performance(),
                journal,
                next_block: next_block(&blocks, time_of_day).cloned(),
                blocks,
                month: month.clone(),
                finance: MonthlySummary::from_transactions(&transactions),
                eligible_gatekeeper_items: locked.iter().filter(|item| item.is_eligible(now)).count(),
                vault: archived,
            })
        })?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use pos_core::{EntryType, ManualClock};
    use std::sync::Arc;

    fn engine() -> Engine {
        let clock = ManualClock::at("2024-03-14T10:00:00+01:00").expect("clock");
        Engine::open_with_clock(EngineConfig::in_memory(), Arc::new(clock)).expect("engine")
    }

    #[test]
    fn fresh_day_snapshot_writes_nothing() {
        let mut engine = engine();
        let snapshot = engine.get_today_snapshot().expect("snapshot");
        assert_eq!(snapshot.status, DayStatus::Morning);
        assert!(snapshot.can_edit_morning && !snapshot.is_read_only);
        assert_eq!(snapshot.journal, JournalEntry::with_defaults(snapshot.day_key));
        assert_eq!(snapshot.month, "2024-03");
        assert!(snapshot.vault.is_none());
        assert!(engine.list_journal_days().expect("days").is_empty());
    }

    #[test]
    fn closed_day_snapshot_carries_the_archive() {
        let mut engine = engine();
        let day = engine.get_settings().current_day_key;
        engine.add_todo("write").expect("todo");
        engine.add_block(day, "09:00", "10:00", "past").expect("block");
        engine.add_block(day, "11:00", "12:00", "upcoming").expect("block");
        let salary = engine.add_category(EntryType::Income, "Salary").expect("category");
        engine
            .add_transaction(day, EntryType::Income, salary.id.expect("id"), 100.0, "")
            .expect("income");

        let open = engine.get_today_snapshot().expect("snapshot");
        assert_eq!(open.next_block.map(|block| block.title), Some("upcoming".to_string()));
        assert_eq!(open.finance.income, 100.0);

        engine.complete_morning().expect("morning");
        engine.toggle_todo_done(0).expect("toggle");
        engine.start_evening().expect("evening");
        engine.close_day().expect("close");

        let closed = engine.get_today_snapshot().expect("snapshot");
        assert!(closed.is_read_only);
        let archive = closed.vault.expect("vault snapshot");
        assert_eq!(archive.day_key, day);
        assert_eq!(archive.performance.pct, 100);
        assert_eq!(archive.blocks.len(), 2);
    }
}
