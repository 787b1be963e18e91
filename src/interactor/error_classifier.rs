use log::debug;
use std::collections::HashSet;

use crate::entity::{ErrorKind, ProviderError, SwapError};

/// Known causes, first match wins
const CLASSIFICATION_ORDER: [ErrorKind; 4] = [
    ErrorKind::NotEnoughBalance,
    ErrorKind::NotEnoughGas,
    ErrorKind::AmountTooLow,
    ErrorKind::AmountTooHigh,
];

fn matches_kind(kind: ErrorKind, cause: &ProviderError) -> bool {
    match kind {
        ErrorKind::NotEnoughBalance => matches!(cause, ProviderError::NotEnoughBalance { .. }),
        ErrorKind::NotEnoughGas => matches!(cause, ProviderError::NotEnoughGas { .. }),
        ErrorKind::AmountTooLow => matches!(cause, ProviderError::AmountTooLow { .. }),
        ErrorKind::AmountTooHigh => matches!(cause, ProviderError::AmountTooHigh { .. }),
        ErrorKind::Unknown => false,
    }
}

fn to_swap_error(kind: ErrorKind, error: &anyhow::Error) -> SwapError {
    match kind {
        ErrorKind::NotEnoughBalance => SwapError::NotEnoughBalance,
        ErrorKind::NotEnoughGas => SwapError::NotEnoughGas,
        ErrorKind::AmountTooLow => SwapError::AmountTooLow,
        ErrorKind::AmountTooHigh => SwapError::AmountTooHigh,
        ErrorKind::Unknown => SwapError::Unknown(error.to_string()),
    }
}

/// Maps a raised quote failure to its user-facing category.
///
/// The whole error chain is searched, so a `ProviderError` wrapped in
/// `anyhow` context is still recognised.
pub fn classify(error: &anyhow::Error) -> SwapError {
    let causes: Vec<&ProviderError> = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ProviderError>())
        .collect();

    let kind = CLASSIFICATION_ORDER
        .iter()
        .copied()
        .find(|kind| causes.iter().any(|cause| matches_kind(*kind, cause)))
        .unwrap_or(ErrorKind::Unknown);

    debug!("Classified quote failure '{}' as {:?}", error, kind);

    to_swap_error(kind, error)
}

/// Offer to buy more of a currency, shown next to a funding error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyAffordance {
    pub currency: String,
    pub account_id: String,
}

/// Decides whether the "buy more" action accompanies an error.
///
/// Only funding errors get the action, and only for currencies the buy
/// flow supports.
pub fn buy_affordance(
    error: &SwapError,
    currency: &str,
    account_id: &str,
    buy_supported: &HashSet<String>,
) -> Option<BuyAffordance> {
    if !error.kind().is_funding_error() {
        return None;
    }

    let ticker = currency.to_uppercase();
    if !buy_supported.contains(&ticker) {
        return None;
    }

    Some(BuyAffordance {
        currency: ticker,
        account_id: account_id.to_string(),
    })
}
