use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;

use crate::entity::{RateMode, SwapRequest};
use crate::interactor::UserIntent;
use crate::utils::parse_amount;

/// One line typed into the console
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Intent(UserIntent),
    History,
    Device,
    Help,
    Quit,
}

pub const USAGE: &str = "\
Commands:
  quote <amount> <from> <to> [float|fixed] [from_account to_account]
  continue          open the summary, then start the device step
  accept | decline  provider terms on the summary
  cancel | retry | reset
  history           past swaps, newest first
  device            device session status
  quit";

// Default account used when none is given for a currency
fn default_account(currency: &str) -> String {
    format!("{}-main", currency.to_lowercase())
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand> {
    lazy_static! {
        static ref QUOTE_RE: Regex = Regex::new(
            r"(?i)^quote\s+(\S+)\s+([a-z0-9]+)\s+([a-z0-9]+)(?:\s+(float|fixed))?(?:\s+(\S+)\s+(\S+))?$"
        )
        .unwrap();
    }

    let line = line.trim();
    let keyword = line
        .split_whitespace()
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default();

    let command = match keyword.as_str() {
        "quote" => {
            let captures = QUOTE_RE
                .captures(line)
                .ok_or_else(|| anyhow!("Usage: quote <amount> <from> <to> [float|fixed] [from_account to_account]"))?;

            let amount = parse_amount(&captures[1])?;
            let from = &captures[2];
            let to = &captures[3];
            let rate_mode = match captures.get(4) {
                Some(mode) => mode.as_str().parse::<RateMode>()?,
                None => RateMode::Float,
            };
            let (from_account, to_account) = match (captures.get(5), captures.get(6)) {
                (Some(a), Some(b)) => (a.as_str().to_string(), b.as_str().to_string()),
                _ => (default_account(from), default_account(to)),
            };

            ConsoleCommand::Intent(UserIntent::UpdateRequest(SwapRequest::new(
                from,
                to,
                &from_account,
                &to_account,
                amount,
                rate_mode,
            )))
        }
        "continue" | "c" => ConsoleCommand::Intent(UserIntent::Continue),
        "accept" => ConsoleCommand::Intent(UserIntent::AcceptTerms(true)),
        "decline" => ConsoleCommand::Intent(UserIntent::AcceptTerms(false)),
        "cancel" => ConsoleCommand::Intent(UserIntent::Cancel),
        "retry" => ConsoleCommand::Intent(UserIntent::Retry),
        "reset" => ConsoleCommand::Intent(UserIntent::Reset),
        "history" => ConsoleCommand::History,
        "device" => ConsoleCommand::Device,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "" => return Err(anyhow!("Empty command")),
        other => return Err(anyhow!("Unknown command: {}", other)),
    };

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_quote_with_defaults() {
        let command = parse_command("quote 0.2 btc eth").unwrap();
        assert_eq!(
            command,
            ConsoleCommand::Intent(UserIntent::UpdateRequest(SwapRequest::new(
                "BTC",
                "ETH",
                "btc-main",
                "eth-main",
                dec!(0.2),
                RateMode::Float
            )))
        );
    }

    #[test]
    fn test_parse_quote_with_mode_and_accounts() {
        let ConsoleCommand::Intent(UserIntent::UpdateRequest(request)) =
            parse_command("QUOTE 1.5 ETH BTC fixed eth-ledger btc-ledger").unwrap()
        else {
            panic!("expected a request");
        };
        assert_eq!(request.rate_mode, RateMode::Fixed);
        assert_eq!(request.from_account_id, "eth-ledger");
        assert_eq!(request.to_account_id, "btc-ledger");
        assert_eq!(request.amount, dec!(1.5));
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(
            parse_command("accept").unwrap(),
            ConsoleCommand::Intent(UserIntent::AcceptTerms(true))
        );
        assert_eq!(
            parse_command(" Cancel ").unwrap(),
            ConsoleCommand::Intent(UserIntent::Cancel)
        );
        assert_eq!(parse_command("history").unwrap(), ConsoleCommand::History);
        assert_eq!(parse_command("exit").unwrap(), ConsoleCommand::Quit);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_command("").is_err());
        assert!(parse_command("swap 1 BTC ETH").is_err());
        assert!(parse_command("quote abc BTC ETH").is_err());
        assert!(parse_command("quote 1 BTC").is_err());
    }
}
