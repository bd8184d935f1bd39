use crate::{require_positive, require_text, round_pct, ContractError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Income,
    Expense,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Income => "income",
            EntryType::Expense => "expense",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "income" => Ok(EntryType::Income),
            "expense" => Ok(EntryType::Expense),
            other => Err(format!("Unknown entry type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxSource {
    Manual,
    Gatekeeper,
}

impl Default for TxSource {
    fn default() -> Self {
        Self::Manual
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinanceCategory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub name: String,
    #[serde(default)]
    pub order: i64,
}

impl FinanceCategory {
    pub fn validate(&self) -> Result<(), ContractError> {
        require_text(&self.name, "category name")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinanceTransaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub month: String,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub category_id: i64,
    pub amount: f64,
    #[serde(default)]
    pub source: TxSource,
    #[serde(default)]
    pub note: String,
}

impl FinanceTransaction {
    pub fn new(
        date: NaiveDate,
        kind: EntryType,
        category_id: i64,
        amount: f64,
        note: impl Into<String>,
    ) -> Result<Self, ContractError> {
        require_positive(amount, "amount")?;
        Ok(Self {
            id: None,
            date,
            month: month_key(date),
            kind,
            category_id,
            amount,
            source: TxSource::Manual,
            note: note.into(),
        })
    }

    /// Re-derives `month` from `date` and checks the amount.
    pub fn normalize(&mut self) -> Result<(), ContractError> {
        require_positive(self.amount, "amount")?;
        self.month = month_key(self.date);
        Ok(())
    }
}

/// `YYYY-MM` of a date.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

pub fn parse_month(value: &str) -> Result<String, ContractError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        .map(month_key)
        .map_err(|_| ContractError::InvalidMonth(value.to_string()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub income: f64,
    pub expense: f64,
    pub remaining: f64,
    pub remaining_pct: i64,
    pub spent_pct: i64,
}

impl MonthlySummary {
    pub fn from_totals(income: f64, expense: f64) -> Self {
        let remaining = income - expense;
        let (remaining_pct, spent_pct) = if income > 0.0 {
            (
                round_pct(remaining, income).max(0),
                round_pct(expense, income).clamp(0, 100),
            )
        } else {
            (0, 0)
        };
        Self {
            income,
            expense,
            remaining,
            remaining_pct,
            spent_pct,
        }
    }

    pub fn from_transactions<'a>(
        transactions: impl IntoIterator<Item = &'a FinanceTransaction>,
    ) -> Self {
        let (mut income, mut expense) = (0.0, 0.0);
        for tx in transactions {
            match tx.kind {
                EntryType::Income => income += tx.amount,
                EntryType::Expense => expense += tx.amount,
            }
        }
        Self::from_totals(income, expense)
    }
}

/// Total per category id, split by entry type.
pub fn category_totals<'a>(
    transactions: impl IntoIterator<Item = &'a FinanceTransaction>,
) -> BTreeMap<(EntryType, i64), f64> {
    let mut totals = BTreeMap::new();
    for tx in transactions {
        *totals.entry((tx.kind, tx.category_id)).or_insert(0.0) += tx.amount;
    }
    totals
}
