pub mod broadcast_service;
pub mod models;
pub mod quote_service;

pub use broadcast_service::{BroadcastService, Broadcaster, HttpBroadcaster};
pub use quote_service::{HttpQuoteProvider, QuoteProvider, QuoteResponse, QuoteService};
