use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Failures raised by a quote provider or by local request validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Not enough {currency} to cover the swap amount")]
    NotEnoughBalance { currency: String },

    #[error("Not enough {currency} to pay the network fees")]
    NotEnoughGas { currency: String },

    /// `minimum` is absent when the provider did not report its limit
    #[error("Amount is below the provider minimum{}", limit_suffix(.minimum))]
    AmountTooLow { minimum: Option<Decimal> },

    #[error("Amount is above the provider maximum{}", limit_suffix(.maximum))]
    AmountTooHigh { maximum: Option<Decimal> },

    #[error("Invalid swap request: {0}")]
    InvalidRequest(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),
}

fn limit_suffix(limit: &Option<Decimal>) -> String {
    limit.map(|limit| format!(" of {}", limit)).unwrap_or_default()
}

/// User-facing classification of a quote failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SwapError {
    #[error("Not enough balance")]
    NotEnoughBalance,

    #[error("Not enough gas")]
    NotEnoughGas,

    #[error("Amount too low")]
    AmountTooLow,

    #[error("Amount too high")]
    AmountTooHigh,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Fieldless tag of a [`SwapError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotEnoughBalance,
    NotEnoughGas,
    AmountTooLow,
    AmountTooHigh,
    Unknown,
}

impl SwapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::NotEnoughBalance => ErrorKind::NotEnoughBalance,
            SwapError::NotEnoughGas => ErrorKind::NotEnoughGas,
            SwapError::AmountTooLow => ErrorKind::AmountTooLow,
            SwapError::AmountTooHigh => ErrorKind::AmountTooHigh,
            SwapError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl ErrorKind {
    /// Translation key shown under the amount field
    pub fn message_key(&self) -> &'static str {
        match self {
            ErrorKind::NotEnoughBalance => "swap.form.from.errors.notEnoughBalance",
            ErrorKind::NotEnoughGas => "swap.form.from.errors.notEnoughGas",
            ErrorKind::AmountTooLow => "swap.form.from.errors.exchangeAmountTooLow",
            ErrorKind::AmountTooHigh => "swap.form.from.errors.exchangeAmountTooHigh",
            ErrorKind::Unknown => "swap.form.from.errors.default",
        }
    }

    /// Whether acquiring more of the source currency would fix the error
    pub fn is_funding_error(&self) -> bool {
        matches!(self, ErrorKind::NotEnoughBalance | ErrorKind::NotEnoughGas)
    }
}
