use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

// Parse a positive decimal amount as typed by the user
pub fn parse_amount(input: &str) -> Result<Decimal> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^\d+(?:[.,]\d+)?$").unwrap();
    }

    let input = input.trim();
    if !RE.is_match(input) {
        return Err(anyhow!("Invalid amount: {}", input));
    }

    let amount = Decimal::from_str(&input.replace(',', "."))
        .map_err(|e| anyhow!("Invalid amount {}: {}", input, e))?;

    if amount <= Decimal::ZERO {
        return Err(anyhow!("Amount must be greater than zero"));
    }

    Ok(amount)
}

// Format amount with the precision usual for the currency
pub fn format_amount(amount: Decimal, currency: &str) -> String {
    let precision = match currency.to_uppercase().as_str() {
        "BTC" | "LTC" | "BCH" => 8,
        "USDT" | "USDC" | "DAI" => 2,
        _ => 6,
    };
    format!("{} {}", amount.round_dp(precision).normalize(), currency.to_uppercase())
}

// Shorten swap or transaction id for display
pub fn shorten_id(id: &str) -> String {
    if id.chars().count() <= 16 {
        return id.to_string();
    }

    let start: String = id.chars().take(8).collect();
    let end: String = id
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    format!("{}...{}", start, end)
}
