pub mod commands;
pub mod config;
pub mod device;
pub mod di;
pub mod entity;
pub mod history;
pub mod interactor;
pub mod presenter;
pub mod provider;
pub mod utils;
pub mod view;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used items
pub use crate::config::AppConfig;
pub use commands::{parse_command, ConsoleCommand, USAGE};
pub use di::ServiceContainer;
pub use entity::{
    AmountBounds, BroadcastError, DeviceError, DeviceSession, DeviceStatus, ErrorKind, FlowError,
    FlowState, HistoryError, ProviderError, Quote, RateMode, SigningError, SigningPhase,
    SigningResult, SummaryStep, SwapError, SwapHistoryEntry, SwapRequest, SwapStatus,
    TransactionSkeleton,
};
pub use interactor::{
    buy_affordance, classify, BuyAffordance, FlowDeps, SwapFlowController, SwapFlowHandle,
    UserIntent,
};
pub use presenter::{form_model, SwapFormModel, SwapPresenter, SwapPresenterImpl};
pub use view::{ConsoleSwapView, SwapView};
