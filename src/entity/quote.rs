use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entity::RateMode;

/// Provider-advertised amount limits for a currency pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AmountBounds {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl AmountBounds {
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

/// Provider-issued exchange rate, valid until `expires_at`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub id: String,
    pub rate: Decimal,
    pub rate_mode: RateMode,
    pub expires_at: DateTime<Utc>,
    pub provider_fee: Decimal,
    pub payout_amount: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl Quote {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before the quote goes stale, zero if it already has
    pub fn time_to_expiry(&self) -> std::time::Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}
