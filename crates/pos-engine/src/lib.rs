pub mod calendar;
pub mod config;
pub mod dashboard;
pub mod day_state;
pub mod finance;
pub mod gatekeeper;
pub mod journal;
pub mod maintenance;
pub mod vault;

use chrono::{DateTime, Utc};
use pos_core::{Clock, ContractError, DayStatus, Settings, SystemClock, UiSettings};
use pos_storage::{open_store, DocumentStore, Key, SchemaLayout, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use config::EngineConfig;
pub use dashboard::TodaySnapshot;
pub use day_state::DayStateMachine;
pub use finance::CategoryTotal;
pub use gatekeeper::GatekeeperView;
pub use maintenance::{ExportMeta, ExportPayload, ImportReport};
pub use vault::VaultEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not allowed while the day is {0}")]
    Status(DayStatus),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("gatekeeper item stays locked until {0}")]
    Locked(DateTime<Utc>),
    #[error("already recorded and cannot change")]
    Already,
    #[error("{collection} record {key} not found")]
    NotFound {
        collection: &'static str,
        key: String,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Stable tag callers can branch on.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Status(_) => "status",
            EngineError::Invalid(_) => "invalid",
            EngineError::Locked(_) => "locked",
            EngineError::Already => "already",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Storage(_) => "storage",
        }
    }

    pub(crate) fn not_found(collection: &'static str, key: impl ToString) -> Self {
        EngineError::NotFound {
            collection,
            key: key.to_string(),
        }
    }
}

/// Auto-increment collections always hand back integer keys.
pub(crate) fn int_key(key: Key) -> Result<i64, EngineError> {
    key.as_int()
        .ok_or_else(|| EngineError::Invalid(format!("expected a numeric key, got {key}")))
}

impl From<ContractError> for EngineError {
    fn from(err: ContractError) -> Self {
        EngineError::Invalid(err.to_string())
    }
}

/// The day-state engine: one store, one day-state machine, one vault.
pub struct Engine {
    store: DocumentStore,
    layout: SchemaLayout,
    day: DayStateMachine,
    vault: VaultEngine,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Opens the store, migrates it, and brings the day state up to today.
    pub fn open_with_clock(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let (mut store, layout) = open_store(config.db_path.as_deref())?;
        let day = DayStateMachine::init(&mut store, clock.today())?;
        let vault = VaultEngine::new(layout.vault.clone());
        info!(
            event = "engine_open",
            db = %config.describe_db(),
            day = %day.settings().current_day_key,
            status = %day.status()
        );
        Ok(Self {
            store,
            layout,
            day,
            vault,
            clock,
            config,
        })
    }

    /// Drops the current handle and acquires a fresh one, e.g. after
    /// [`StorageError::StaleHandle`]. In-memory stores cannot be reopened.
    pub fn reopen(&mut self) -> Result<(), EngineError> {
        if self.config.db_path.is_none() {
            return Err(EngineError::Invalid(
                "an in-memory store cannot be reopened".to_string(),
            ));
        }
        let (mut store, layout) = open_store(self.config.db_path.as_deref())?;
        self.day = DayStateMachine::init(&mut store, self.clock.today())?;
        self.vault = VaultEngine::new(layout.vault.clone());
        self.store = store;
        self.layout = layout;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &SchemaLayout {
        &self.layout
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Rolls the day over if the calendar moved on. Returns whether it did.
    pub fn ensure_today_state(&mut self) -> Result<bool, EngineError> {
        let today = self.clock.today();
        Ok(self.day.ensure_today(&mut self.store, today)?)
    }

    pub fn get_settings(&self) -> &Settings {
        self.day.settings()
    }

    pub fn put_settings(&mut self, ui: UiSettings) -> Result<Settings, EngineError> {
        Ok(self.day.put_ui(&mut self.store, ui)?)
    }

    pub fn get_day_status(&self) -> DayStatus {
        self.day.status()
    }

    pub fn can_edit_morning(&self) -> bool {
        self.day.status().can_edit_morning()
    }

    pub fn can_check_todos(&self) -> bool {
        self.day.status().can_check_todos()
    }

    pub fn can_edit_evening(&self) -> bool {
        self.day.status().can_edit_evening()
    }

    pub fn is_read_only(&self) -> bool {
        self.day.status().is_read_only()
    }

    pub fn complete_morning(&mut self) -> Result<bool, EngineError> {
        let at = self.clock.now_utc();
        self.day.complete_morning(&mut self.store, at)
    }

    pub fn start_evening(&mut self) -> Result<bool, EngineError> {
        let at = self.clock.now_utc();
        self.day.start_evening(&mut self.store, at)
    }

    /// Archives the day into the vault and closes it, atomically.
    pub fn close_day(&mut self) -> Result<bool, EngineError> {
        let at = self.clock.now_utc();
        self.day.close_day(&mut self.store, &self.vault, at)
    }

    pub(crate) fn today(&self) -> chrono::NaiveDate {
        self.day.settings().current_day_key
    }

    pub(crate) fn require_phase(&self, allowed: bool, operation: &'static str) -> Result<(), EngineError> {
        if allowed {
            return Ok(());
        }
        let status = self.day.status();
        warn!(event = "phase_violation", operation = operation, status = %status);
        Err(EngineError::Status(status))
    }
}
