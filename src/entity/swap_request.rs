use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entity::ProviderError;

/// How the provider prices the exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
    /// Rate can change until signing
    #[default]
    Float,
    /// Rate locked at quote time
    Fixed,
}

impl fmt::Display for RateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateMode::Float => write!(f, "FLOAT"),
            RateMode::Fixed => write!(f, "FIXED"),
        }
    }
}

impl FromStr for RateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" => Ok(RateMode::Float),
            "fixed" => Ok(RateMode::Fixed),
            _ => Err(anyhow::anyhow!("Invalid rate mode '{}'", s)),
        }
    }
}

/// What the user asked to exchange. Never mutated once a quote is requested;
/// a change in the form produces a new request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwapRequest {
    pub from_currency: String,
    pub to_currency: String,
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount: Decimal,
    pub rate_mode: RateMode,
}

impl SwapRequest {
    pub fn new(
        from_currency: &str,
        to_currency: &str,
        from_account_id: &str,
        to_account_id: &str,
        amount: Decimal,
        rate_mode: RateMode,
    ) -> Self {
        Self {
            from_currency: from_currency.to_uppercase(),
            to_currency: to_currency.to_uppercase(),
            from_account_id: from_account_id.to_string(),
            to_account_id: to_account_id.to_string(),
            amount,
            rate_mode,
        }
    }

    /// Checks the request can be sent to a provider at all
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.amount <= Decimal::ZERO {
            return Err(ProviderError::InvalidRequest(
                "Amount must be greater than zero".to_string(),
            ));
        }

        if self.from_currency.eq_ignore_ascii_case(&self.to_currency) {
            return Err(ProviderError::InvalidRequest(
                "Source and target currencies must be different".to_string(),
            ));
        }

        Ok(())
    }

    /// Currency pair in `FROM/TO` form
    pub fn pair(&self) -> String {
        format!("{}/{}", self.from_currency, self.to_currency)
    }
}
