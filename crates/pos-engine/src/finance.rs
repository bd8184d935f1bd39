use crate::{int_key, Engine, EngineError};
use chrono::NaiveDate;
use pos_core::finance::{category_totals, parse_month};
use pos_core::{EntryType, FinanceCategory, FinanceTransaction, MonthlySummary};
use pos_storage::schema::{FINANCE_CATEGORIES, FINANCE_TRANSACTIONS, GATEKEEPER_ITEMS};
use pos_storage::{StorageError, Tx, TxMode};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

/// Per-category sum for one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub category_id: i64,
    /// `None` when the category record no longer exists.
    pub name: Option<String>,
    pub total: f64,
}

/// Loads category `id` and checks it books entries of `kind`.
pub(crate) fn require_category(
    tx: &Tx<'_>,
    id: i64,
    kind: EntryType,
) -> Result<FinanceCategory, EngineError> {
    let category = tx
        .get_as::<FinanceCategory>(FINANCE_CATEGORIES, id)?
        .ok_or_else(|| EngineError::not_found(FINANCE_CATEGORIES, id))?;
    if category.kind != kind {
        return Err(EngineError::Invalid(format!(
            "category {id} books {} entries, not {kind}",
            category.kind
        )));
    }
    Ok(category)
}

fn month_transactions(tx: &Tx<'_>, month: &str) -> Result<Vec<FinanceTransaction>, StorageError> {
    let mut transactions: Vec<FinanceTransaction> =
        tx.query_by_field_as(FINANCE_TRANSACTIONS, "month", &json!(month))?;
    transactions.sort_by_key(|t| (t.date, t.id));
    Ok(transactions)
}

impl Engine {
    /// New categories go to the end of their type's ordering.
    pub fn add_category(&mut self, kind: EntryType, name: &str) -> Result<FinanceCategory, EngineError> {
        let mut category = FinanceCategory {
            id: None,
            kind,
            name: name.trim().to_string(),
            order: 0,
        };
        category.validate()?;
        self.store
            .run_transaction(&[FINANCE_CATEGORIES], TxMode::ReadWrite, |tx| {
                let siblings: Vec<FinanceCategory> =
                    tx.query_by_field_as(FINANCE_CATEGORIES, "type", &json!(kind))?;
                category.order = siblings.iter().map(|c| c.order + 1).max().unwrap_or(0);
                category.id = Some(int_key(tx.add_as(FINANCE_CATEGORIES, &category)?)?);
                Ok::<_, EngineError>(())
            })?;
        Ok(category)
    }

    pub fn rename_category(&mut self, id: i64, name: &str) -> Result<FinanceCategory, EngineError> {
        let name = name.trim().to_string();
        self.store
            .run_transaction(&[FINANCE_CATEGORIES], TxMode::ReadWrite, |tx| {
                let mut category = tx
                    .get_as::<FinanceCategory>(FINANCE_CATEGORIES, id)?
                    .ok_or_else(|| EngineError::not_found(FINANCE_CATEGORIES, id))?;
                category.name = name;
                category.validate()?;
                tx.put_as(FINANCE_CATEGORIES, &category)?;
                Ok::<_, EngineError>(category)
            })
    }

    pub fn get_category(&mut self, id: i64) -> Result<Option<FinanceCategory>, EngineError> {
        Ok(self
            .store
            .run_transaction(&[FINANCE_CATEGORIES], TxMode::ReadOnly, |tx| {
                tx.get_as(FINANCE_CATEGORIES, id)
            })?)
    }

    /// Categories ordered by type, then position. `kind` narrows to one type.
    pub fn list_categories(&mut self, kind: Option<EntryType>) -> Result<Vec<FinanceCategory>, EngineError> {
        let mut categories: Vec<FinanceCategory> = self
            .store
            .run_transaction(&[FINANCE_CATEGORIES], TxMode::ReadOnly, |tx| match kind {
                Some(kind) => tx.query_by_field_as(FINANCE_CATEGORIES, "type", &json!(kind)),
                None => tx.get_all_as(FINANCE_CATEGORIES),
            })?;
        categories.sort_by_key(|c| (c.kind, c.order, c.id));
        Ok(categories)
    }

    /// Refuses (`Ok(false)`) while any transaction or gatekeeper item still
    /// points at the category, and when it does not exist.
    pub fn delete_category(&mut self, id: i64) -> Result<bool, EngineError> {
        let collections = [FINANCE_CATEGORIES, FINANCE_TRANSACTIONS, GATEKEEPER_ITEMS];
        Ok(self
            .store
            .run_transaction(&collections, TxMode::ReadWrite, |tx| {
                if tx.get(FINANCE_CATEGORIES, id)?.is_none() {
                    return Ok(false);
                }
                let transactions = tx.query_by_field(FINANCE_TRANSACTIONS, "categoryId", &json!(id))?;
                let items = tx.query_by_field(GATEKEEPER_ITEMS, "categoryId", &json!(id))?;
                if !transactions.is_empty() || !items.is_empty() {
                    warn!(
                        event = "category_in_use",
                        category = id,
                        transactions = transactions.len(),
                        gatekeeper_items = items.len()
                    );
                    return Ok(false);
                }
                tx.delete(FINANCE_CATEGORIES, id)
            })?)
    }

    pub fn add_transaction(
        &mut self,
        date: NaiveDate,
        kind: EntryType,
        category_id: i64,
        amount: f64,
        note: &str,
    ) -> Result<FinanceTransaction, EngineError> {
        let mut transaction = FinanceTransaction::new(date, kind, category_id, amount, note.trim())?;
        self.store
            .run_transaction(&[FINANCE_CATEGORIES, FINANCE_TRANSACTIONS], TxMode::ReadWrite, |tx| {
                require_category(tx, category_id, kind)?;
                transaction.id = Some(int_key(tx.add_as(FINANCE_TRANSACTIONS, &transaction)?)?);
                Ok::<_, EngineError>(())
            })?;
        Ok(transaction)
    }

    /// Replaces date, type, category, amount and note. `month` is derived
    /// again and the stored `source` is kept.
    pub fn update_transaction(
        &mut self,
        mut transaction: FinanceTransaction,
    ) -> Result<FinanceTransaction, EngineError> {
        let id = transaction
            .id
            .ok_or_else(|| EngineError::Invalid("transaction id is required".to_string()))?;
        transaction.normalize()?;
        transaction.note = transaction.note.trim().to_string();
        self.store
            .run_transaction(&[FINANCE_CATEGORIES, FINANCE_TRANSACTIONS], TxMode::ReadWrite, |tx| {
                let stored = tx
                    .get_as::<FinanceTransaction>(FINANCE_TRANSACTIONS, id)?
                    .ok_or_else(|| EngineError::not_found(FINANCE_TRANSACTIONS, id))?;
                require_category(tx, transaction.category_id, transaction.kind)?;
                transaction.source = stored.source;
                tx.put_as(FINANCE_TRANSACTIONS, &transaction)?;
                Ok::<_, EngineError>(())
            })?;
        Ok(transaction)
    }

    pub fn delete_transaction(&mut self, id: i64) -> Result<bool, EngineError> {
        Ok(self
            .store
            .run_transaction(&[FINANCE_TRANSACTIONS], TxMode::ReadWrite, |tx| {
                tx.delete(FINANCE_TRANSACTIONS, id)
            })?)
    }

    pub fn get_transaction(&mut self, id: i64) -> Result<Option<FinanceTransaction>, EngineError> {
        Ok(self
            .store
            .run_transaction(&[FINANCE_TRANSACTIONS], TxMode::ReadOnly, |tx| {
                tx.get_as(FINANCE_TRANSACTIONS, id)
            })?)
    }

    /// Transactions of `month` (`YYYY-MM`) by date.
    pub fn list_transactions_for_month(&mut self, month: &str) -> Result<Vec<FinanceTransaction>, EngineError> {
        let month = parse_month(month)?;
        Ok(self
            .store
            .run_transaction(&[FINANCE_TRANSACTIONS], TxMode::ReadOnly, |tx| {
                month_transactions(tx, &month)
            })?)
    }

    pub fn get_monthly_summary(&mut self, month: &str) -> Result<MonthlySummary, EngineError> {
        let transactions = self.list_transactions_for_month(month)?;
        Ok(MonthlySummary::from_transactions(&transactions))
    }

    /// Totals of `month` per category, incomes first, biggest first.
    pub fn category_breakdown(&mut self, month: &str) -> Result<Vec<CategoryTotal>, EngineError> {
        let month = parse_month(month)?;
        let (transactions, categories) = self.store.run_transaction(
            &[FINANCE_CATEGORIES, FINANCE_TRANSACTIONS],
            TxMode::ReadOnly,
            |tx| {
                let transactions = month_transactions(tx, &month)?;
                let categories: Vec<FinanceCategory> = tx.get_all_as(FINANCE_CATEGORIES)?;
                Ok::<_, StorageError>((transactions, categories))
            },
        )?;

        let mut totals: Vec<CategoryTotal> = category_totals(&transactions)
            .into_iter()
            .map(|((kind, category_id), total)| CategoryTotal {
                kind,
                category_id,
                name: categories
                    .iter()
                    .find(|c| c.id == Some(category_id))
                    .map(|c| c.name.clone()),
                total,
            })
            .collect();
        totals.sort_by(|a, b| a.kind.cmp(&b.kind).then(b.total.total_cmp(&a.total)));
        info!(event = "category_breakdown", month = %month, categories = totals.len());
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use pos_core::{ManualClock, TxSource};
    use std::sync::Arc;

    fn engine() -> Engine {
        let clock = ManualClock::at("2024-03-20T09:00:00+00:00").expect("clock");
        Engine::open_with_clock(EngineConfig::in_memory(), Arc::new(clock)).expect("engine")
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).expect("valid date")
    }

    #[test]
    fn categories_append_to_their_type() {
        let mut engine = engine();
        let salary = engine.add_category(EntryType::Income, "Salary").expect("add");
        let rent = engine.add_category(EntryType::Expense, "Rent").expect("add");
        let food = engine.add_category(EntryType::Expense, " Food ").expect("add");
        assert_eq!((salary.order, rent.order, food.order), (0, 0, 1));
        assert_eq!(food.name, "Food");

        let expenses = engine.list_categories(Some(EntryType::Expense)).expect("list");
        let names: Vec<_> = expenses.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Rent", "Food"]);
        assert_eq!(engine.list_categories(None).expect("all").len(), 3);

        let renamed = engine.rename_category(rent.id.expect("id"), "Housing").expect("rename");
        assert_eq!(renamed.order, 0);
        assert_eq!(engine.rename_category(99, "x").expect_err("missing").reason(), "not_found");
    }

    #[test]
    fn referenced_category_cannot_be_deleted() {
        let mut engine = engine();
        let food = engine.add_category(EntryType::Expense, "Food").expect("add");
        let id = food.id.expect("id");
        let groceries = engine
            .add_transaction(date(3), EntryType::Expense, id, 42.5, "groceries")
            .expect("add tx");

        assert!(!engine.delete_category(id).expect("referenced"));
        assert!(engine.get_category(id).expect("get").is_some());

        assert!(engine.delete_transaction(groceries.id.expect("id")).expect("delete tx"));
        assert!(engine.delete_category(id).expect("unreferenced"));
        assert!(!engine.delete_category(id).expect("already gone"));
    }

    #[test]
    fn transactions_need_a_matching_category_and_positive_amount() {
        let mut engine = engine();
        let salary = engine.add_category(EntryType::Income, "Salary").expect("add");
        let id = salary.id.expect("id");

        let err = engine
            .add_transaction(date(1), EntryType::Expense, id, 10.0, "")
            .expect_err("type mismatch");
        assert_eq!(err.reason(), "invalid");
        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = engine
                .add_transaction(date(1), EntryType::Income, id, amount, "")
                .expect_err("bad amount");
            assert_eq!(err.reason(), "invalid");
        }
        let err = engine
            .add_transaction(date(1), EntryType::Income, 77, 10.0, "")
            .expect_err("missing category");
        assert_eq!(err.reason(), "not_found");
        assert!(engine.list_transactions_for_month("2024-03").expect("list").is_empty());
    }

    #[test]
    fn update_rederives_month_and_keeps_source() {
        let mut engine = engine();
        let rent = engine.add_category(EntryType::Expense, "Rent").expect("add");
        let mut tx = engine
            .add_transaction(date(31), EntryType::Expense, rent.id.expect("id"), 900.0, "")
            .expect("add");
        tx.date = NaiveDate::from_ymd_opt(2024, 4, 1).expect("date");
        tx.month = "bogus".to_string();
        tx.source = TxSource::Gatekeeper;

        let updated = engine.update_transaction(tx).expect("update");
        assert_eq!(updated.month, "2024-04");
        assert_eq!(updated.source, TxSource::Manual);
        assert!(engine.list_transactions_for_month("2024-03").expect("march").is_empty());
        assert_eq!(engine.list_transactions_for_month("2024-04").expect("april").len(), 1);
    }

    #[test]
    fn monthly_summary_and_breakdown() {
        let mut engine = engine();
        let salary = engine.add_category(EntryType::Income, "Salary").expect("add").id.expect("id");
        let rent = engine.add_category(EntryType::Expense, "Rent").expect("add").id.expect("id");
        let food = engine.add_category(EntryType::Expense, "Food").expect("add").id.expect("id");
        engine.add_transaction(date(1), EntryType::Income, salary, 1000.0, "").expect("add");
        engine.add_transaction(date(2), EntryType::Expense, rent, 200.0, "").expect("add");
        engine.add_transaction(date(9), EntryType::Expense, food, 30.0, "").expect("add");
        engine.add_transaction(date(15), EntryType::Expense, food, 20.0, "").expect("add");
        let april = NaiveDate::from_ymd_opt(2024, 4, 2).expect("date");
        engine.add_transaction(april, EntryType::Expense, rent, 500.0, "").expect("add");

        let summary = engine.get_monthly_summary("2024-03").expect("summary");
        assert_eq!(summary, MonthlySummary::from_totals(1000.0, 250.0));
        assert_eq!((summary.remaining, summary.remaining_pct, summary.spent_pct), (750.0, 75, 25));

        let breakdown = engine.category_breakdown("2024-03").expect("breakdown");
        let rows: Vec<_> = breakdown
            .iter()
            .map(|row| (row.kind, row.name.as_deref(), row.total))
            .collect();
        assert_eq!(
            rows,
            [
                (EntryType::Income, Some("Salary"), 1000.0),
                (EntryType::Expense, Some("Rent"), 200.0),
                (EntryType::Expense, Some("Food"), 50.0),
            ]
        );
        assert_eq!(engine.get_monthly_summary("March").expect_err("bad month").reason(), "invalid");
    }
}
