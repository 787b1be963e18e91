pub mod error_classifier;
pub mod swap_flow;

pub use error_classifier::{buy_affordance, classify, BuyAffordance};
pub use swap_flow::{FlowDeps, SwapFlowController, SwapFlowHandle, UserIntent};
