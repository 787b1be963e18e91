use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceStatus {
    #[default]
    Disconnected,
    Opening,
    Open,
    Error,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Disconnected => write!(f, "DISCONNECTED"),
            DeviceStatus::Opening => write!(f, "OPENING"),
            DeviceStatus::Open => write!(f, "OPEN"),
            DeviceStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Snapshot of the hardware device connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSession {
    pub status: DeviceStatus,
    pub device_id: Option<String>,
}

impl DeviceSession {
    pub fn is_open(&self) -> bool {
        self.status == DeviceStatus::Open
    }
}
