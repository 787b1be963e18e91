use std::fmt;

use crate::entity::{FlowError, Quote, SwapError, SwapRequest};

/// Summary step opened over a ready quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SummaryStep {
    pub terms_accepted: bool,
}

/// Observable state of one swap flow
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FlowState {
    #[default]
    Idle,
    QuoteRequested {
        request: SwapRequest,
    },
    QuoteReady {
        request: SwapRequest,
        quote: Quote,
        summary: Option<SummaryStep>,
    },
    QuoteError {
        request: SwapRequest,
        error: SwapError,
    },
    SummaryConfirmed {
        request: SwapRequest,
        quote: Quote,
    },
    DeviceOpening {
        request: SwapRequest,
        quote: Quote,
    },
    DeviceConfirm {
        request: SwapRequest,
        quote: Quote,
        swap_id: String,
    },
    Signing {
        request: SwapRequest,
        quote: Quote,
        swap_id: String,
    },
    Broadcasting {
        request: SwapRequest,
        quote: Quote,
        swap_id: String,
    },
    Finished {
        swap_id: String,
        transaction_id: String,
    },
    BroadcastUnknown {
        swap_id: String,
    },
    Failed {
        request: SwapRequest,
        quote: Quote,
        error: FlowError,
    },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Idle => "Idle",
            FlowState::QuoteRequested { .. } => "QuoteRequested",
            FlowState::QuoteReady { .. } => "QuoteReady",
            FlowState::QuoteError { .. } => "QuoteError",
            FlowState::SummaryConfirmed { .. } => "SummaryConfirmed",
            FlowState::DeviceOpening { .. } => "DeviceOpening",
            FlowState::DeviceConfirm { .. } => "DeviceConfirm",
            FlowState::Signing { .. } => "Signing",
            FlowState::Broadcasting { .. } => "Broadcasting",
            FlowState::Finished { .. } => "Finished",
            FlowState::BroadcastUnknown { .. } => "BroadcastUnknown",
            FlowState::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Finished { .. } | FlowState::Failed { .. } | FlowState::BroadcastUnknown { .. }
        )
    }

    /// States where the device step is running
    pub fn is_device_step(&self) -> bool {
        matches!(
            self,
            FlowState::SummaryConfirmed { .. }
                | FlowState::DeviceOpening { .. }
                | FlowState::DeviceConfirm { .. }
                | FlowState::Signing { .. }
                | FlowState::Broadcasting { .. }
        )
    }

    /// Request behind the current state, if any
    pub fn request(&self) -> Option<&SwapRequest> {
        match self {
            FlowState::QuoteRequested { request }
            | FlowState::QuoteReady { request, .. }
            | FlowState::QuoteError { request, .. }
            | FlowState::SummaryConfirmed { request, .. }
            | FlowState::DeviceOpening { request, .. }
            | FlowState::DeviceConfirm { request, .. }
            | FlowState::Signing { request, .. }
            | FlowState::Broadcasting { request, .. }
            | FlowState::Failed { request, .. } => Some(request),
            FlowState::Idle | FlowState::Finished { .. } | FlowState::BroadcastUnknown { .. } => {
                None
            }
        }
    }

    pub fn quote(&self) -> Option<&Quote> {
        match self {
            FlowState::QuoteReady { quote, .. }
            | FlowState::SummaryConfirmed { quote, .. }
            | FlowState::DeviceOpening { quote, .. }
            | FlowState::DeviceConfirm { quote, .. }
            | FlowState::Signing { quote, .. }
            | FlowState::Broadcasting { quote, .. }
            | FlowState::Failed { quote, .. } => Some(quote),
            _ => None,
        }
    }

    pub fn swap_error(&self) -> Option<&SwapError> {
        match self {
            FlowState::QuoteError { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn flow_error(&self) -> Option<&FlowError> {
        match self {
            FlowState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
