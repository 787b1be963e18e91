use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entity::{RateMode, TransactionSkeleton};

/// Requests sent to the hardware device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceCommand {
    GetDeviceInfo,
    OpenApp {
        name: String,
    },
    InitSwap {
        quote_id: String,
        from_currency: String,
        to_currency: String,
        from_account: String,
        to_account: String,
        amount: Decimal,
        payout_amount: Decimal,
        provider_fee: Decimal,
        rate_mode: RateMode,
    },
    AwaitConfirmation {
        swap_id: String,
    },
    SignTransaction {
        swap_id: String,
        transaction: TransactionSkeleton,
    },
    /// Returns the device application to its idle screen
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceResponse {
    DeviceInfo {
        device_id: String,
    },
    AppOpened {
        name: String,
    },
    AppNotOpen {
        current: String,
    },
    SwapInitialized {
        swap_id: String,
        transaction: TransactionSkeleton,
    },
    Confirmed,
    Rejected,
    Signed {
        /// Base64 encoded signed transaction
        payload: String,
    },
    Ack,
    Error {
        message: String,
    },
}

/// Out-of-band notifications from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEvent {
    Connected,
    Disconnected,
}

/// One line of the bridge protocol
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<DeviceCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<DeviceResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<DeviceEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let envelope = Envelope {
            id: Some(7),
            command: Some(DeviceCommand::OpenApp {
                name: "Exchange".to_string(),
            }),
            response: None,
            event: None,
        };
        let line = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            line,
            r#"{"id":7,"command":{"type":"open_app","name":"Exchange"}}"#
        );
    }

    #[test]
    fn test_event_line_parses() {
        let envelope: Envelope = serde_json::from_str(r#"{"event":"disconnected"}"#).unwrap();
        assert_eq!(envelope.event, Some(DeviceEvent::Disconnected));
        assert!(envelope.id.is_none());

        let envelope: Envelope =
            serde_json::from_str(r#"{"id":3,"response":{"type":"confirmed"}}"#).unwrap();
        assert_eq!(envelope.response, Some(DeviceResponse::Confirmed));
    }
}
