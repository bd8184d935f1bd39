use crate::finance::require_category;
use crate::{int_key, Engine, EngineError};
use chrono::{DateTime, Utc};
use pos_core::{EntryType, FinanceTransaction, GatekeeperItem, GatekeeperStatus, TxSource};
use pos_storage::schema::{FINANCE_CATEGORIES, FINANCE_TRANSACTIONS, GATEKEEPER_ITEMS};
use pos_storage::TxMode;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

/// An item together with what the clock says about it right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatekeeperView {
    #[serde(flatten)]
    pub item: GatekeeperItem,
    pub eligible: bool,
    pub remaining_secs: i64,
}

impl GatekeeperView {
    fn at(item: GatekeeperItem, now: DateTime<Utc>) -> Self {
        Self {
            eligible: item.is_eligible(now),
            remaining_secs: item.remaining(now).num_seconds(),
            item,
        }
    }
}

impl Engine {
    /// Parks a wished-for purchase. It unlocks after the configured delay.
    pub fn add_gatekeeper_item(
        &mut self,
        name: &str,
        price: f64,
        category_id: i64,
    ) -> Result<GatekeeperItem, EngineError> {
        let now = self.clock.now_utc();
        let mut item =
            GatekeeperItem::new(name, price, category_id, now, self.config.gatekeeper_delay())?;
        self.store
            .run_transaction(&[FINANCE_CATEGORIES, GATEKEEPER_ITEMS], TxMode::ReadWrite, |tx| {
                require_category(tx, category_id, EntryType::Expense)?;
                item.id = Some(int_key(tx.add_as(GATEKEEPER_ITEMS, &item)?)?);
                Ok::<_, EngineError>(())
            })?;
        info!(
            event = "gatekeeper_item_added",
            item = ?item.id,
            unlock_at = %item.unlock_at
        );
        Ok(item)
    }

    /// Every item ordered by unlock time, with eligibility as of now.
    pub fn list_gatekeeper_items(&mut self) -> Result<Vec<GatekeeperView>, EngineError> {
        let now = self.clock.now_utc();
        let mut items: Vec<GatekeeperItem> = self
            .store
            .run_transaction(&[GATEKEEPER_ITEMS], TxMode::ReadOnly, |tx| {
                tx.get_all_as(GATEKEEPER_ITEMS)
            })?;
        items.sort_by_key(|item| (item.unlock_at, item.id));
        Ok(items
            .into_iter()
            .map(|item| GatekeeperView::at(item, now))
            .collect())
    }

    pub fn get_gatekeeper_item(&mut self, id: i64) -> Result<Option<GatekeeperItem>, EngineError> {
        Ok(self
            .store
            .run_transaction(&[GATEKEEPER_ITEMS], TxMode::ReadOnly, |tx| {
                tx.get_as(GATEKEEPER_ITEMS, id)
            })?)
    }

    /// Drops a locked item. Purchased items are history and stay.
    pub fn delete_gatekeeper_item(&mut self, id: i64) -> Result<bool, EngineError> {
        self.store
            .run_transaction(&[GATEKEEPER_ITEMS], TxMode::ReadWrite, |tx| {
                let Some(item) = tx.get_as::<GatekeeperItem>(GATEKEEPER_ITEMS, id)? else {
                    return Ok(false);
                };
                if item.is_purchased() {
                    return Err(EngineError::Already);
                }
                Ok(tx.delete(GATEKEEPER_ITEMS, id)?)
            })
    }

    /// Marks the item purchased and books its price as an expense, both in
    /// one transaction. Fails with `Already` for a purchased item and with
    /// `Locked` before `unlockAt`. If the expense cannot be booked the item
    /// stays locked.
    pub fn purchase_gatekeeper_item(&mut self, id: i64) -> Result<FinanceTransaction, EngineError> {
        let now = self.clock.now_utc();
        let day = self.today();
        let outcome = self.store.run_transaction(
            &[FINANCE_CATEGORIES, GATEKEEPER_ITEMS, FINANCE_TRANSACTIONS],
            TxMode::ReadWrite,
            |tx| {
                let mut item = tx
                    .get_as::<GatekeeperItem>(GATEKEEPER_ITEMS, id)?
                    .ok_or_else(|| EngineError::not_found(GATEKEEPER_ITEMS, id))?;
                if item.is_purchased() {
                    return Err(EngineError::Already);
                }
                if !item.is_eligible(now) {
                    return Err(EngineError::Locked(item.unlock_at));
                }
                item.status = GatekeeperStatus::Purchased;
                item.purchased_at = Some(now);
                tx.put_as(GATEKEEPER_ITEMS, &item)?;

                require_category(tx, item.category_id, EntryType::Expense)?;
                let mut expense = FinanceTransaction::new(
                    day,
                    EntryType::Expense,
                    item.category_id,
                    item.price,
                    item.name.clone(),
                )?;
                expense.source = TxSource::Gatekeeper;
                expense.id = Some(int_key(tx.add_as(FINANCE_TRANSACTIONS, &expense)?)?);
                Ok(expense)
            },
        );

        match &outcome {
            Ok(expense) => info!(
                event = "gatekeeper_purchase",
                item = id,
                transaction = ?expense.id,
                amount = expense.amount
            ),
            Err(err @ (EngineError::Already | EngineError::Locked(_))) => {
                warn!(event = "gatekeeper_purchase_refused", item = id, reason = err.reason())
            }
            Err(_) => {}
        }
        outcome
    }

    /// Locked items whose delay has passed.
    pub fn eligible_gatekeeper_count(&mut self) -> Result<usize, EngineError> {
        let now = self.clock.now_utc();
        let locked: Vec<GatekeeperItem> = self
            .store
            .run_transaction(&[GATEKEEPER_ITEMS], TxMode::ReadOnly, |tx| {
                let locked = json!(GatekeeperStatus::Locked.as_str());
                tx.query_by_field_as(GATEKEEPER_ITEMS, "status", &locked)
            })?;
        Ok(locked.iter().filter(|item| item.is_eligible(now)).count())
    }
}
