use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entity::Quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapStatus {
    Pending,
    Finished,
    Failed,
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapStatus::Pending => write!(f, "PENDING"),
            SwapStatus::Finished => write!(f, "FINISHED"),
            SwapStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for SwapStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SwapStatus::Pending),
            "FINISHED" => Ok(SwapStatus::Finished),
            "FAILED" => Ok(SwapStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown swap status '{}'", s)),
        }
    }
}

/// A signed swap attempt as kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapHistoryEntry {
    pub swap_id: String,
    pub from_account_id: String,
    pub to_account_id: String,
    pub quote: Quote,
    pub status: SwapStatus,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SwapHistoryEntry {
    pub fn with_outcome(&self, status: SwapStatus, transaction_id: Option<String>) -> Self {
        Self {
            status,
            transaction_id,
            ..self.clone()
        }
    }
}
