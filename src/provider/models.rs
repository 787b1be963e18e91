// Wire models for the swap provider HTTP API
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entity::{AmountBounds, ProviderError, Quote, RateMode, SwapRequest};

#[derive(Debug, Serialize)]
pub struct BoundsParams<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub rate_mode: RateMode,
}

#[derive(Debug, Deserialize)]
pub struct BoundsResponse {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl From<BoundsResponse> for AmountBounds {
    fn from(value: BoundsResponse) -> Self {
        AmountBounds {
            min_amount: value.min_amount,
            max_amount: value.max_amount,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuoteParams<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub from_account: &'a str,
    pub to_account: &'a str,
    pub amount: Decimal,
    pub rate_mode: RateMode,
}

impl<'a> From<&'a SwapRequest> for QuoteParams<'a> {
    fn from(request: &'a SwapRequest) -> Self {
        QuoteParams {
            from: &request.from_currency,
            to: &request.to_currency,
            from_account: &request.from_account_id,
            to_account: &request.to_account_id,
            amount: request.amount,
            rate_mode: request.rate_mode,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuoteResponseBody {
    pub id: String,
    pub rate: Decimal,
    pub expires_at: DateTime<Utc>,
    pub provider_fee: Decimal,
    pub payout_amount: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl QuoteResponseBody {
    pub fn into_quote(self, rate_mode: RateMode) -> Quote {
        Quote {
            id: self.id,
            rate: self.rate,
            rate_mode,
            expires_at: self.expires_at,
            provider_fee: self.provider_fee,
            payout_amount: self.payout_amount,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
        }
    }
}

/// Error payload returned by the provider on non-success statuses
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub limit: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl ErrorResponse {
    pub fn into_provider_error(self) -> ProviderError {
        let message = self.message.unwrap_or_else(|| self.error.clone());
        match (self.error.as_str(), self.limit) {
            ("amount_too_low", minimum) => ProviderError::AmountTooLow { minimum },
            ("amount_too_high", maximum) => ProviderError::AmountTooHigh { maximum },
            ("not_enough_balance", _) => ProviderError::NotEnoughBalance {
                currency: self.currency.unwrap_or_default(),
            },
            ("not_enough_gas", _) => ProviderError::NotEnoughGas {
                currency: self.currency.unwrap_or_default(),
            },
            ("unavailable", _) => ProviderError::Unavailable(message),
            _ => ProviderError::Rejected(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BroadcastParams<'a> {
    pub swap_id: &'a str,
    pub currency: &'a str,
    /// Base64 encoded signed transaction
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastResponse {
    pub transaction_id: String,
}
