/// Hardware device session failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Device session is busy with another signing request")]
    SessionBusy,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Device session is not open")]
    NotOpen,

    #[error("Wrong application open on device: {0}")]
    AppNotOpen(String),

    #[error("Device did not respond in time")]
    Timeout,

    #[error("Device transport error: {0}")]
    Transport(String),

    #[error("Unexpected device response: {0}")]
    Unexpected(String),
}

/// Failures of the open-app / init / confirm / sign sequence
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("Device setup failed: {0}")]
    Setup(DeviceError),

    #[error("Swap cancelled by user")]
    UserCancelled,

    #[error("Device disconnected while signing")]
    Disconnected,

    #[error("Signing failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    /// Submission outcome cannot be determined; the transaction may have
    /// been accepted.
    #[error("Broadcast timed out, transaction status unknown")]
    AmbiguousTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt history row: {0}")]
    Corrupt(String),
}

/// Why a flow ended in the `Failed` state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("Failed to record swap history: {0}")]
    History(String),
}

impl From<HistoryError> for FlowError {
    fn from(e: HistoryError) -> Self {
        FlowError::History(e.to_string())
    }
}

impl FlowError {
    /// Errors after which the device step can be retried with the same quote
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FlowError::Broadcast(_))
    }

    pub fn is_device_disconnected(&self) -> bool {
        matches!(
            self,
            FlowError::Device(DeviceError::Disconnected)
                | FlowError::Signing(SigningError::Disconnected)
                | FlowError::Signing(SigningError::Setup(DeviceError::Disconnected))
        )
    }

    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, FlowError::Signing(SigningError::UserCancelled))
    }
}
