use crate::calendar::{BlockTime, CalendarBlock};
use crate::finance::MonthlySummary;
use crate::journal::{JournalEntry, Performance};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockSummary {
    pub start: BlockTime,
    pub end: BlockTime,
    pub title: String,
}

impl From<&CalendarBlock> for BlockSummary {
    fn from(block: &CalendarBlock) -> Self {
        Self {
            start: block.start,
            end: block.end,
            title: block.title.clone(),
        }
    }
}

/// Immutable, self-contained record of a closed day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VaultSnapshot {
    pub day_key: NaiveDate,
    pub closed_at: DateTime<Utc>,
    pub performance: Performance,
    pub todos_done: usize,
    pub todos_total: usize,
    pub blocks: Vec<BlockSummary>,
    pub looking_forward: String,
    pub planning: String,
    pub reflection: String,
    pub rating: Option<u8>,
    pub gratitude: String,
    pub month: String,
    pub finance: MonthlySummary,
}

impl VaultSnapshot {
    /// Copies everything out of the live records so later edits to them
    /// cannot reach the archived day.
    pub fn assemble(
        journal: &JournalEntry,
        blocks: &[CalendarBlock],
        month: String,
        finance: MonthlySummary,
        closed_at: DateTime<Utc>,
    ) -> Self {
        let performance = journal.performance();
        Self {
            day_key: journal.date,
            closed_at,
            performance,
            todos_done: performance.done,
            todos_total: performance.total,
            blocks: blocks.iter().map(BlockSummary::from).collect(),
            looking_forward: journal.morning.looking_forward.clone(),
            planning: journal.morning.planning.clone(),
            reflection: journal.evening.reflection.clone(),
            rating: journal.evening.rating,
            gratitude: journal.evening.gratitude.clone(),
            month,
            finance,
        }
    }
}
