use crate::{require_positive, require_text, ContractError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default cooling-off period before a wished-for purchase may be logged.
pub const DEFAULT_UNLOCK_DELAY_HOURS: i64 = 72;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatekeeperStatus {
    Locked,
    Purchased,
}

impl GatekeeperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatekeeperStatus::Locked => "locked",
            GatekeeperStatus::Purchased => "purchased",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatekeeperItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub price: f64,
    pub category_id: i64,
    pub created_at: DateTime<Utc>,
    pub unlock_at: DateTime<Utc>,
    pub status: GatekeeperStatus,
    #[serde(default)]
    pub purchased_at: Option<DateTime<Utc>>,
}

impl GatekeeperItem {
    pub fn new(
        name: impl Into<String>,
        price: f64,
        category_id: i64,
        created_at: DateTime<Utc>,
        delay: Duration,
    ) -> Result<Self, ContractError> {
        let name = name.into().trim().to_string();
        require_text(&name, "item name")?;
        require_positive(price, "price")?;
        Ok(Self {
            id: None,
            name,
            price,
            category_id,
            created_at,
            unlock_at: created_at + delay,
            status: GatekeeperStatus::Locked,
            purchased_at: None,
        })
    }

    pub fn is_purchased(&self) -> bool {
        self.status == GatekeeperStatus::Purchased
    }

    /// Eligibility is derived, never stored.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.is_purchased() && now >= self.unlock_at
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.unlock_at - now).max(Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unlocks_after_delay() {
        let created = Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).single().expect("ts");
        let item = GatekeeperItem::new(
            "Headphones",
            199.0,
            3,
            created,
            Duration::hours(DEFAULT_UNLOCK_DELAY_HOURS),
        )
        .expect("item");

        assert_eq!(item.unlock_at, created + Duration::hours(72));
        assert!(!item.is_eligible(created + Duration::hours(71)));
        assert_eq!(item.remaining(created + Duration::hours(71)), Duration::hours(1));
        assert!(item.is_eligible(item.unlock_at));
        assert_eq!(item.remaining(item.unlock_at + Duration::hours(5)), Duration::zero());
    }

    #[test]
    fn rejects_bad_price_and_name() {
        let now = Utc::now();
        assert!(GatekeeperItem::new("x", 0.0, 1, now, Duration::hours(1)).is_err());
        assert!(GatekeeperItem::new("x", -3.0, 1, now, Duration::hours(1)).is_err());
        assert!(GatekeeperItem::new(" ", 3.0, 1, now, Duration::hours(1)).is_err());
    }
}
