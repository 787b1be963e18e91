use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use crate::entity::{HistoryError, SwapHistoryEntry};
use crate::history::{HistoryReader, HistoryStore};

/// History kept in process memory
#[derive(Default)]
pub struct InMemoryHistoryStore {
    // insertion order, oldest first
    entries: RwLock<Vec<SwapHistoryEntry>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryReader for InMemoryHistoryStore {
    async fn list(&self) -> Result<Vec<SwapHistoryEntry>, HistoryError> {
        let entries = self.entries.read().await;
        let mut listed: Vec<SwapHistoryEntry> = entries.iter().rev().cloned().collect();
        // stable: equal timestamps keep newest-inserted first
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listed)
    }

    async fn get(&self, swap_id: &str) -> Result<Option<SwapHistoryEntry>, HistoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.swap_id == swap_id).cloned())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn record(&self, entry: &SwapHistoryEntry) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().await;

        match entries.iter_mut().find(|e| e.swap_id == entry.swap_id) {
            Some(existing) => {
                debug!(
                    "Updating swap {} status {} -> {}",
                    entry.swap_id, existing.status, entry.status
                );
                existing.status = entry.status;
                existing.transaction_id = entry.transaction_id.clone();
            }
            None => {
                debug!("Recording swap {} as {}", entry.swap_id, entry.status);
                entries.push(entry.clone());
            }
        }

        Ok(())
    }
}
