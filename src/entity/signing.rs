use serde::{Deserialize, Serialize};

/// Transaction built by the device during swap initialisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSkeleton {
    pub recipient: String,
    pub amount: String,
    pub fee: String,
}

/// Output of one successful signing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningResult {
    pub signed_transaction: Vec<u8>,
    pub swap_provider_id: String,
}

/// Step of the device protocol currently running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPhase {
    OpeningApp,
    AwaitingConfirmation { swap_id: String },
    Signing { swap_id: String },
}
