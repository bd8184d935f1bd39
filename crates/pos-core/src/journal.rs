use crate::{require_text, round_pct, ContractError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

impl Todo {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MorningJournal {
    #[serde(default)]
    pub looking_forward: String,
    #[serde(default)]
    pub planning: String,
    #[serde(default)]
    pub todos: Vec<Todo>,
}

impl MorningJournal {
    pub fn validate(&self) -> Result<(), ContractError> {
        for todo in &self.todos {
            require_text(&todo.text, "todo text")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EveningJournal {
    #[serde(default)]
    pub reflection: String,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub gratitude: String,
}

impl EveningJournal {
    pub fn validate(&self) -> Result<(), ContractError> {
        match self.rating {
            Some(rating) if !(1..=5).contains(&rating) => Err(ContractError::InvalidRating(rating)),
            _ => Ok(()),
        }
    }
}

/// One journal page per calendar day, keyed by `date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub morning: MorningJournal,
    #[serde(default)]
    pub evening: EveningJournal,
}

impl JournalEntry {
    /// A fully populated, empty page for `date`.
    pub fn with_defaults(date: NaiveDate) -> Self {
        Self {
            date,
            morning: MorningJournal::default(),
            evening: EveningJournal::default(),
        }
    }

    pub fn add_todo(&mut self, text: &str) -> Result<usize, ContractError> {
        require_text(text, "todo text")?;
        self.morning.todos.push(Todo::new(text.trim()));
        Ok(self.morning.todos.len() - 1)
    }

    pub fn toggle_todo(&mut self, index: usize) -> Result<bool, ContractError> {
        let todo = self.todo_mut(index)?;
        todo.done = !todo.done;
        Ok(todo.done)
    }

    pub fn remove_todo(&mut self, index: usize) -> Result<Todo, ContractError> {
        self.todo_mut(index)?;
        Ok(self.morning.todos.remove(index))
    }

    pub fn rename_todo(&mut self, index: usize, text: &str) -> Result<(), ContractError> {
        require_text(text, "todo text")?;
        self.todo_mut(index)?.text = text.trim().to_string();
        Ok(())
    }

    pub fn performance(&self) -> Performance {
        Performance::from_todos(&self.morning.todos)
    }

    fn todo_mut(&mut self, index: usize) -> Result<&mut Todo, ContractError> {
        let len = self.morning.todos.len();
        self.morning
            .todos
            .get_mut(index)
            .ok_or(ContractError::TodoIndex { index, len })
    }
}

/// Share of the day's todos that got done.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Performance {
    pub pct: i64,
    pub done: usize,
    pub total: usize,
}

impl Performance {
    pub fn from_todos(todos: &[Todo]) -> Self {
        let total = todos.len();
        let done = todos.iter().filter(|todo| todo.done).count();
        Self {
            pct: round_pct(done as f64, total as f64),
            done,
            total,
        }
    }
}
