use crate::vault::VaultEngine;
use crate::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use pos_core::{DayStatus, Settings, UiSettings, SETTINGS_ID};
use pos_storage::schema::{CALENDAR_BLOCKS, FINANCE_TRANSACTIONS, JOURNAL_ENTRIES, SETTINGS};
use pos_storage::{DocumentStore, StorageError, Tx, TxMode};
use tracing::{info, warn};

/// Owner of the settings record and the morning → execution → evening →
/// closed cycle.
///
/// Holds the last persisted copy of [`Settings`]; every mutation is written
/// first and only then adopted, so the copy never runs ahead of the store.
#[derive(Debug, Clone)]
pub struct DayStateMachine {
    settings: Settings,
}

impl DayStateMachine {
    /// Loads the settings record, creating it on first run and rolling it
    /// over when `today` differs from the stored day.
    pub fn init(store: &mut DocumentStore, today: NaiveDate) -> Result<Self, StorageError> {
        let settings = store.run_transaction(&[SETTINGS], TxMode::ReadWrite, |tx| {
            let stored = tx.get_as::<Settings>(SETTINGS, SETTINGS_ID)?;
            let settings = match stored {
                None => {
                    let settings = Settings::fresh(today);
                    tx.put_as(SETTINGS, &settings)?;
                    info!(event = "settings_created", day = %today);
                    settings
                }
                Some(settings) => roll_if_needed(tx, settings, today)?,
            };
            Ok::<_, StorageError>(settings)
        })?;
        Ok(Self { settings })
    }

    /// Same check as [`DayStateMachine::init`] for an already running session.
    pub fn ensure_today(
        &mut self,
        store: &mut DocumentStore,
        today: NaiveDate,
    ) -> Result<bool, StorageError> {
        if self.settings.current_day_key == today {
            return Ok(false);
        }
        let fresh = Self::init(store, today)?;
        self.settings = fresh.settings;
        Ok(true)
    }

    /// Re-reads the record, e.g. after an import replaced it.
    pub fn reload(&mut self, store: &mut DocumentStore, today: NaiveDate) -> Result<(), StorageError> {
        self.settings = Self::init(store, today)?.settings;
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn status(&self) -> DayStatus {
        self.settings.day_status
    }

    pub fn put_ui(&mut self, store: &mut DocumentStore, ui: UiSettings) -> Result<Settings, StorageError> {
        let mut next = self.settings.clone();
        next.ui = ui;
        store.run_transaction(&[SETTINGS], TxMode::ReadWrite, |tx| {
            let mut stored = tx
                .get_as::<Settings>(SETTINGS, SETTINGS_ID)?
                .unwrap_or_else(|| self.settings.clone());
            stored.ui = next.ui.clone();
            tx.put_as(SETTINGS, &stored)?;
            next = stored;
            Ok::<_, StorageError>(())
        })?;
        self.settings = next.clone();
        Ok(next)
    }

    pub fn complete_morning(
        &mut self,
        store: &mut DocumentStore,
        at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        self.transition(store, DayStatus::Morning, at, &[], |_, _| Ok(()))
    }

    pub fn start_evening(
        &mut self,
        store: &mut DocumentStore,
        at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        self.transition(store, DayStatus::Execution, at, &[], |_, _| Ok(()))
    }

    /// Writes the day's vault snapshot and closes the day in one transaction.
    /// If the snapshot cannot be written the day stays in the evening.
    pub fn close_day(
        &mut self,
        store: &mut DocumentStore,
        vault: &VaultEngine,
        at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let collections = [
            JOURNAL_ENTRIES,
            CALENDAR_BLOCKS,
            FINANCE_TRANSACTIONS,
            vault.collection(),
        ];
        self.transition(store, DayStatus::Evening, at, &collections, |tx, settings| {
            vault.capture(tx, settings.current_day_key, at).map(|_| ())
        })
    }

    /// Moves `from -> from.next()` if the stored record is in `from`, running
    /// `side_effect` inside the same transaction.
    fn transition<F>(
        &mut self,
        store: &mut DocumentStore,
        from: DayStatus,
        at: DateTime<Utc>,
        extra: &[&str],
        side_effect: F,
    ) -> Result<bool, EngineError>
    where
        F: FnOnce(&Tx<'_>, &Settings) -> Result<(), EngineError>,
    {
        let mut collections = vec![SETTINGS];
        collections.extend_from_slice(extra);
        let cached = self.settings.clone();

        let next = store.run_transaction(
            &collections,
            TxMode::ReadWrite,
            |tx| -> Result<Result<Settings, DayStatus>, EngineError> {
                let mut settings = tx
                    .get_as::<Settings>(SETTINGS, SETTINGS_ID)?
                    .unwrap_or(cached);
                if !settings.advance_from(from, at) {
                    return Ok(Err(settings.day_status));
                }
                side_effect(tx, &settings)?;
                tx.put_as(SETTINGS, &settings)?;
                Ok(Ok(settings))
            },
        )?;

        match next {
            Ok(settings) => {
                info!(
                    event = "phase_transition",
                    day = %settings.current_day_key,
                    from = %from,
                    to = %settings.day_status
                );
                self.settings = settings;
                Ok(true)
            }
            Err(actual) => {
                warn!(event = "phase_violation", expected = %from, status = %actual);
                Ok(false)
            }
        }
    }
}

fn roll_if_needed(
    tx: &Tx<'_>,
    mut settings: Settings,
    today: NaiveDate,
) -> Result<Settings, StorageError> {
    if settings.current_day_key == today {
        return Ok(settings);
    }
    let previous = settings.current_day_key;
    let previous_status = settings.day_status;
    settings.roll_over(today);
    tx.put_as(SETTINGS, &settings)?;
    info!(
        event = "day_rollover",
        from = %previous,
        to = %today,
        previous_status = %previous_status
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pos_storage::open_store;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn stored(store: &mut DocumentStore) -> Settings {
        store
            .run_transaction(&[SETTINGS], TxMode::ReadOnly, |tx| {
                tx.get_as::<Settings>(SETTINGS, SETTINGS_ID)
            })
            .expect("read settings")
            .expect("settings exist")
    }

    #[test]
    fn init_creates_exactly_one_settings_record() {
        let (mut store, _) = open_store(None).expect("open store");
        DayStateMachine::init(&mut store, day(1)).expect("init");
        DayStateMachine::init(&mut store, day(1)).expect("init again");
        let count = store
            .run_transaction(&[SETTINGS], TxMode::ReadOnly, |tx| tx.count(SETTINGS))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn transitions_are_persisted_before_adopted() {
        let (mut store, _) = open_store(None).expect("open store");
        let mut machine = DayStateMachine::init(&mut store, day(1)).expect("init");

        assert!(machine.complete_morning(&mut store, at(9)).expect("complete"));
        assert!(!machine.complete_morning(&mut store, at(10)).expect("repeat"));
        assert_eq!(machine.status(), DayStatus::Execution);
        assert_eq!(stored(&mut store).day_status, DayStatus::Execution);
        assert_eq!(stored(&mut store).morning_completed_at, Some(at(9)));
    }

    #[test]
    fn closed_day_only_leaves_through_rollover() {
        let (mut store, layout) = open_store(None).expect("open store");
        let vault = VaultEngine::new(layout.vault);
        let mut machine = DayStateMachine::init(&mut store, day(1)).expect("init");
        machine.complete_morning(&mut store, at(9)).expect("morning");
        machine.start_evening(&mut store, at(18)).expect("evening");
        assert!(machine.close_day(&mut store, &vault, at(21)).expect("close"));
        assert!(!machine.complete_morning(&mut store, at(22)).expect("no reopen"));

        assert!(!machine.ensure_today(&mut store, day(1)).expect("same day"));
        assert!(machine.ensure_today(&mut store, day(2)).expect("next day"));
        let settings = stored(&mut store);
        assert_eq!(settings.current_day_key, day(2));
        assert_eq!(settings.day_status, DayStatus::Morning);
        assert!(settings.day_closed_at.is_none());
        assert_eq!(machine.settings(), &settings);
    }

    #[test]
    fn put_ui_keeps_day_state() {
        let (mut store, _) = open_store(None).expect("open store");
        let mut machine = DayStateMachine::init(&mut store, day(1)).expect("init");
        machine.complete_morning(&mut store, at(9)).expect("morning");

        let updated = machine
            .put_ui(
                &mut store,
                UiSettings {
                    start_screen: "journal".to_string(),
                    debug: true,
                },
            )
            .expect("put ui");
        assert_eq!(updated.day_status, DayStatus::Execution);
        assert_eq!(stored(&mut store).ui.start_screen, "journal");
    }
}
