use async_trait::async_trait;

use crate::entity::{HistoryError, SwapHistoryEntry};

mod memory;
mod postgres;

pub use memory::InMemoryHistoryStore;
pub use postgres::PgHistoryStore;

/// Read access to past swaps, handed to detail views
#[async_trait]
pub trait HistoryReader: Send + Sync {
    /// All entries, newest first
    async fn list(&self) -> Result<Vec<SwapHistoryEntry>, HistoryError>;

    async fn get(&self, swap_id: &str) -> Result<Option<SwapHistoryEntry>, HistoryError>;
}

/// Append-only swap history keyed by swap id.
///
/// Recording an id that already exists updates its status and
/// transaction id; the original creation time is kept. Nothing is ever
/// deleted.
#[async_trait]
pub trait HistoryStore: HistoryReader {
    async fn record(&self, entry: &SwapHistoryEntry) -> Result<(), HistoryError>;
}
