use async_trait::async_trait;
use log::info;
use sqlx::types::Json;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;

use crate::entity::{HistoryError, Quote, SwapHistoryEntry, SwapStatus};
use crate::history::{HistoryReader, HistoryStore};

/// Swap history in the `swap_history` table
pub struct PgHistoryStore {
    pool: Arc<PgPool>,
}

impl PgHistoryStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn entry_from_row(row: &PgRow) -> Result<SwapHistoryEntry, HistoryError> {
        let status: String = row.try_get("status")?;
        let quote: Json<Quote> = row.try_get("quote")?;

        Ok(SwapHistoryEntry {
            swap_id: row.try_get("swap_id")?,
            from_account_id: row.try_get("from_account_id")?,
            to_account_id: row.try_get("to_account_id")?,
            quote: quote.0,
            status: status
                .parse::<SwapStatus>()
                .map_err(|e| HistoryError::Corrupt(e.to_string()))?,
            transaction_id: row.try_get("transaction_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl HistoryReader for PgHistoryStore {
    async fn list(&self) -> Result<Vec<SwapHistoryEntry>, HistoryError> {
        let rows = sqlx::query("SELECT * FROM swap_history ORDER BY created_at DESC, id DESC")
            .fetch_all(&*self.pool)
            .await?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn get(&self, swap_id: &str) -> Result<Option<SwapHistoryEntry>, HistoryError> {
        let row = sqlx::query("SELECT * FROM swap_history WHERE swap_id = $1")
            .bind(swap_id)
            .fetch_optional(&*self.pool)
            .await?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn record(&self, entry: &SwapHistoryEntry) -> Result<(), HistoryError> {
        sqlx::query(
            "INSERT INTO swap_history \
             (swap_id, from_account_id, to_account_id, quote, status, transaction_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (swap_id) DO UPDATE \
             SET status = EXCLUDED.status, transaction_id = EXCLUDED.transaction_id",
        )
        .bind(&entry.swap_id)
        .bind(&entry.from_account_id)
        .bind(&entry.to_account_id)
        .bind(Json(&entry.quote))
        .bind(entry.status.to_string())
        .bind(&entry.transaction_id)
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await?;

        info!("Recorded swap {} as {}", entry.swap_id, entry.status);

        Ok(())
    }
}
