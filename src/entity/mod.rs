mod device;
mod flow_error;
mod flow_state;
mod history;
mod quote;
mod signing;
mod swap_error;
mod swap_request;

pub use device::{DeviceSession, DeviceStatus};
pub use flow_error::{BroadcastError, DeviceError, FlowError, HistoryError, SigningError};
pub use flow_state::{FlowState, SummaryStep};
pub use history::{SwapHistoryEntry, SwapStatus};
pub use quote::{AmountBounds, Quote};
pub use signing::{SigningPhase, SigningResult, TransactionSkeleton};
pub use swap_error::{ErrorKind, ProviderError, SwapError};
pub use swap_request::{RateMode, SwapRequest};
