pub mod calendar;
pub mod clock;
pub mod day;
pub mod finance;
pub mod gatekeeper;
pub mod journal;
pub mod vault;

use thiserror::Error;

pub use calendar::{BlockTime, CalendarBlock, DayTemplate, TemplateBlock};
pub use clock::{Clock, ManualClock, SystemClock};
pub use day::{DayStatus, Settings, UiSettings, SETTINGS_ID};
pub use finance::{EntryType, FinanceCategory, FinanceTransaction, MonthlySummary, TxSource};
pub use gatekeeper::{GatekeeperItem, GatekeeperStatus};
pub use journal::{EveningJournal, JournalEntry, MorningJournal, Performance, Todo};
pub use vault::{BlockSummary, VaultSnapshot};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("invalid time {value:?}, expected HH:MM")]
    InvalidTime { value: String },
    #[error("block must end after it starts: {start} -> {end}")]
    InvalidTimeRange { start: String, end: String },
    #[error("{field} must be a finite number greater than zero")]
    InvalidAmount { field: &'static str },
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error("todo index {index} out of range for {len} todos")]
    TodoIndex { index: usize, len: usize },
    #[error("invalid month {0:?}, expected YYYY-MM")]
    InvalidMonth(String),
}

pub(crate) fn require_text(value: &str, field: &'static str) -> Result<(), ContractError> {
    if value.trim().is_empty() {
        return Err(ContractError::EmptyField { field });
    }
    Ok(())
}

pub(crate) fn require_positive(value: f64, field: &'static str) -> Result<(), ContractError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ContractError::InvalidAmount { field });
    }
    Ok(())
}

/// Rounds `part / whole` to the nearest whole percent.
pub fn round_pct(part: f64, whole: f64) -> i64 {
    if whole == 0.0 {
        return 0;
    }
    (part / whole * 100.0).round() as i64
}
