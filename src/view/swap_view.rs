use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::commands::USAGE;
use crate::entity::{DeviceSession, SwapHistoryEntry};
use crate::presenter::SwapFormModel;
use crate::utils::shorten_id;

#[async_trait]
pub trait SwapView: Send + Sync {
    async fn display_form(&self, model: &SwapFormModel) -> Result<()>;
    async fn display_history(&self, entries: &[SwapHistoryEntry]) -> Result<()>;
    async fn display_device(&self, session: &DeviceSession) -> Result<()>;
    async fn display_usage(&self) -> Result<()>;
    async fn display_error(&self, message: &str) -> Result<()>;
}

// English text for the form error keys
fn message_text(key: &str) -> &'static str {
    match key {
        "swap.form.from.errors.notEnoughBalance" => "Not enough balance for this swap",
        "swap.form.from.errors.notEnoughGas" => "Not enough funds to pay the network fee",
        "swap.form.from.errors.exchangeAmountTooLow" => "Amount is below the provider minimum",
        "swap.form.from.errors.exchangeAmountTooHigh" => "Amount is above the provider maximum",
        _ => "Something went wrong, please try again",
    }
}

pub fn render_form(model: &SwapFormModel) -> String {
    let mut lines = vec![format!("[{}]", model.step)];

    if model.loading {
        lines.push("  ...".to_string());
    }

    if let Some(quote) = &model.quote {
        lines.push(format!("  send     {}", quote.send));
        lines.push(format!("  receive  {} ({})", quote.receive, quote.rate_mode));
        lines.push(format!("  rate     {}", quote.rate));
        lines.push(format!("  fee      {}", quote.fee));
        let seconds = (quote.expires_at - Utc::now()).num_seconds().max(0);
        lines.push(format!("  quote    {} expires in {}s", shorten_id(&quote.quote_id), seconds));
    }

    if model.summary_open {
        let mark = if model.terms_accepted { "x" } else { " " };
        lines.push(format!("  [{}] I accept the provider terms of use", mark));
    }

    if let Some(prompt) = &model.device_prompt {
        lines.push(format!("  device: {}", prompt));
    }

    if let Some(swap_id) = &model.swap_id {
        lines.push(format!("  swap id  {}", swap_id));
    }
    if let Some(transaction_id) = &model.transaction_id {
        lines.push(format!("  tx id    {}", transaction_id));
    }

    if let Some(error) = &model.error {
        let text = match error.message_key {
            Some(key) => message_text(key).to_string(),
            None => error.message.clone(),
        };
        lines.push(format!("  error: {}", text));
        if let Some(buy) = &error.buy {
            lines.push(format!("  buy more {} for account {}", buy.currency, buy.account_id));
        }
        if error.retry_available {
            lines.push("  type 'retry' to try again".to_string());
        }
    }

    if model.continue_enabled {
        lines.push("  type 'continue' to proceed".to_string());
    }

    lines.join("\n")
}

pub struct ConsoleSwapView {
    out: Mutex<Stdout>,
}

impl ConsoleSwapView {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn write(&self, text: &str) -> Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }
}

impl Default for ConsoleSwapView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapView for ConsoleSwapView {
    async fn display_form(&self, model: &SwapFormModel) -> Result<()> {
        self.write(&render_form(model)).await
    }

    async fn display_history(&self, entries: &[SwapHistoryEntry]) -> Result<()> {
        if entries.is_empty() {
            return self.write("No swaps yet").await;
        }

        let lines: Vec<String> = entries
            .iter()
            .map(|entry| {
                format!(
                    "{}  {:<8}  {}  {} -> {}  payout {}  tx {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.status.to_string(),
                    shorten_id(&entry.swap_id),
                    entry.from_account_id,
                    entry.to_account_id,
                    entry.quote.payout_amount.normalize(),
                    entry
                        .transaction_id
                        .as_deref()
                        .map(shorten_id)
                        .unwrap_or_else(|| "-".to_string()),
                )
            })
            .collect();

        self.write(&lines.join("\n")).await
    }

    async fn display_device(&self, session: &DeviceSession) -> Result<()> {
        let text = match &session.device_id {
            Some(device_id) => format!("Device {} ({})", device_id, session.status),
            None => format!("Device {}", session.status),
        };
        self.write(&text).await
    }

    async fn display_usage(&self) -> Result<()> {
        self.write(USAGE).await
    }

    async fn display_error(&self, message: &str) -> Result<()> {
        self.write(&format!("error: {}", message)).await
    }
}
