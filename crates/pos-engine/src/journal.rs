use crate::{Engine, EngineError};
use chrono::NaiveDate;
use pos_core::{ContractError, EveningJournal, JournalEntry, MorningJournal, Performance};
use pos_storage::schema::JOURNAL_ENTRIES;
use pos_storage::{StorageError, TxMode};

/// `done / total` of the entry's todos, rounded to a whole percent.
pub fn compute_performance_from_journal(entry: &JournalEntry) -> Performance {
    entry.performance()
}

impl Engine {
    /// The page for `date`, created with empty defaults on first read.
    pub fn get_journal(&mut self, date: NaiveDate) -> Result<JournalEntry, EngineError> {
        Ok(self
            .store
            .run_transaction(&[JOURNAL_ENTRIES], TxMode::ReadWrite, |tx| {
                if let Some(entry) = tx.get_as::<JournalEntry>(JOURNAL_ENTRIES, date)? {
                    return Ok(entry);
                }
                let entry = JournalEntry::with_defaults(date);
                tx.put_as(JOURNAL_ENTRIES, &entry)?;
                Ok::<_, StorageError>(entry)
            })?)
    }

    pub fn today_journal(&mut self) -> Result<JournalEntry, EngineError> {
        let today = self.today();
        self.get_journal(today)
    }

    /// Days that have a journal page, newest first.
    pub fn list_journal_days(&mut self) -> Result<Vec<NaiveDate>, EngineError> {
        let mut days: Vec<NaiveDate> = self
            .store
            .run_transaction(&[JOURNAL_ENTRIES], TxMode::ReadOnly, |tx| {
                tx.get_all_as::<JournalEntry>(JOURNAL_ENTRIES)
            })?
            .into_iter()
            .map(|entry| entry.date)
            .collect();
        days.sort_by(|a, b| b.cmp(a));
        Ok(days)
    }

    pub fn save_morning_journal(&mut self, morning: MorningJournal) -> Result<JournalEntry, EngineError> {
        self.require_phase(self.can_edit_morning(), "save_morning_journal")?;
        morning.validate()?;
        self.edit_today(|entry| {
            entry.morning = MorningJournal {
                todos: morning
                    .todos
                    .into_iter()
                    .map(|mut todo| {
                        todo.text = todo.text.trim().to_string();
                        todo
                    })
                    .collect(),
                ..morning
            };
            Ok(())
        })
        .map(|(_, entry)| entry)
    }

    pub fn save_evening_journal(&mut self, evening: EveningJournal) -> Result<JournalEntry, EngineError> {
        self.require_phase(self.can_edit_evening(), "save_evening_journal")?;
        evening.validate()?;
        self.edit_today(|entry| {
            entry.evening = evening;
            Ok(())
        })
        .map(|(_, entry)| entry)
    }

    /// Appends a todo to today's morning list and returns its index.
    pub fn add_todo(&mut self, text: &str) -> Result<usize, EngineError> {
        self.require_phase(self.can_edit_morning(), "add_todo")?;
        self.edit_today(|entry| entry.add_todo(text))
            .map(|(index, _)| index)
    }

    pub fn remove_todo(&mut self, index: usize) -> Result<JournalEntry, EngineError> {
        self.require_phase(self.can_edit_morning(), "remove_todo")?;
        self.edit_today(|entry| entry.remove_todo(index).map(|_| ()))
            .map(|(_, entry)| entry)
    }

    pub fn update_todo_text(&mut self, index: usize, text: &str) -> Result<JournalEntry, EngineError> {
        self.require_phase(self.can_edit_morning(), "update_todo_text")?;
        self.edit_today(|entry| entry.rename_todo(index, text))
            .map(|(_, entry)| entry)
    }

    /// Flips a todo while the day is executing. Returns the new done flag.
    pub fn toggle_todo_done(&mut self, index: usize) -> Result<bool, EngineError> {
        self.require_phase(self.can_check_todos(), "toggle_todo_done")?;
        self.edit_today(|entry| entry.toggle_todo(index))
            .map(|(done, _)| done)
    }

    pub fn today_performance(&mut self) -> Result<Performance, EngineError> {
        Ok(compute_performance_from_journal(&self.today_journal()?))
    }

    /// Read-modify-write of today's page in one transaction. A failed edit
    /// leaves the stored page untouched.
    fn edit_today<R, F>(&mut self, edit: F) -> Result<(R, JournalEntry), EngineError>
    where
        F: FnOnce(&mut JournalEntry) -> Result<R, ContractError>,
    {
        let today = self.today();
        self.store
            .run_transaction(&[JOURNAL_ENTRIES], TxMode::ReadWrite, |tx| {
                let mut entry = tx
                    .get_as::<JournalEntry>(JOURNAL_ENTRIES, today)?
                    .unwrap_or_else(|| JournalEntry::with_defaults(today));
                let outcome = edit(&mut entry)?;
                tx.put_as(JOURNAL_ENTRIES, &entry)?;
                Ok::<_, EngineError>((outcome, entry))
            })
    }
}
