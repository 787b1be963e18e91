use async_trait::async_trait;
use base64::Engine;
use log::{debug, info};
use std::sync::Mutex;
use tokio::sync::{broadcast, watch};

use crate::device::protocol::{DeviceCommand, DeviceEvent, DeviceResponse};
use crate::device::transport::DeviceTransport;
use crate::entity::{DeviceError, TransactionSkeleton};

/// What the emulated user does when asked to review a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    Approve,
    Reject,
    /// Waits for [`EmulatedDevice::confirm`] or [`EmulatedDevice::reject`]
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignMode {
    Immediate,
    /// Never answers until aborted or disconnected
    Hang,
    Fail(String),
}

struct EmulatorState {
    connected: bool,
    responsive: bool,
    device_id: String,
    current_app: String,
    confirm_mode: ConfirmMode,
    sign_mode: SignMode,
    decision: Option<bool>,
    aborted: bool,
    waiting: bool,
    swap_counter: u64,
    commands: Vec<DeviceCommand>,
}

/// In-process stand-in for a hardware wallet.
///
/// Used by the `emulator` device address and by tests; behaves like the
/// bridge, including out-of-band disconnects.
pub struct EmulatedDevice {
    state: Mutex<EmulatorState>,
    events: broadcast::Sender<DeviceEvent>,
    interrupt: watch::Sender<u64>,
}

enum Wait {
    Done(Result<DeviceResponse, DeviceError>),
    Pending,
}

impl EmulatedDevice {
    pub fn new(device_id: &str, current_app: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        let (interrupt, _) = watch::channel(0);
        Self {
            state: Mutex::new(EmulatorState {
                connected: true,
                responsive: true,
                device_id: device_id.to_string(),
                current_app: current_app.to_string(),
                confirm_mode: ConfirmMode::Approve,
                sign_mode: SignMode::Immediate,
                decision: None,
                aborted: false,
                waiting: false,
                swap_counter: 0,
                commands: Vec::new(),
            }),
            events,
            interrupt,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EmulatorState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    fn wake(&self) {
        self.interrupt.send_modify(|n| *n += 1);
    }

    pub fn set_confirm_mode(&self, mode: ConfirmMode) {
        self.with_state(|s| s.confirm_mode = mode);
    }

    pub fn set_sign_mode(&self, mode: SignMode) {
        self.with_state(|s| s.sign_mode = mode);
    }

    pub fn set_current_app(&self, name: &str) {
        self.with_state(|s| s.current_app = name.to_string());
    }

    /// Stops answering device info requests, as a locked or sleeping device
    pub fn set_responsive(&self, responsive: bool) {
        self.with_state(|s| s.responsive = responsive);
        self.wake();
    }

    pub fn confirm(&self) {
        self.with_state(|s| s.decision = Some(true));
        self.wake();
    }

    pub fn reject(&self) {
        self.with_state(|s| s.decision = Some(false));
        self.wake();
    }

    /// Unplugs the device, failing whatever it was doing
    pub fn disconnect(&self) {
        info!("Emulated device disconnected");
        self.with_state(|s| {
            s.connected = false;
            s.waiting = false;
        });
        self.wake();
        let _ = self.events.send(DeviceEvent::Disconnected);
    }

    pub fn reconnect(&self) {
        self.with_state(|s| s.connected = true);
        let _ = self.events.send(DeviceEvent::Connected);
    }

    /// True while a confirmation or signature is pending on the device
    pub fn is_waiting(&self) -> bool {
        self.with_state(|s| s.waiting)
    }

    /// Commands received so far, oldest first
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.with_state(|s| s.commands.clone())
    }

    /// Polls `check` until it resolves, re-checking after every interrupt
    async fn wait_until(
        &self,
        mut check: impl FnMut(&mut EmulatorState) -> Wait,
    ) -> Result<DeviceResponse, DeviceError> {
        let mut interrupt = self.interrupt.subscribe();
        loop {
            interrupt.borrow_and_update();
            if let Wait::Done(result) = self.with_state(|s| {
                if !s.connected {
                    s.waiting = false;
                    return Wait::Done(Err(DeviceError::Disconnected));
                }
                let outcome = check(s);
                s.waiting = matches!(outcome, Wait::Pending);
                outcome
            }) {
                return result;
            }
            if interrupt.changed().await.is_err() {
                return Err(DeviceError::Disconnected);
            }
        }
    }

    fn signed_payload(swap_id: &str, transaction: &TransactionSkeleton) -> String {
        let raw = format!(
            "signed:{}:{}:{}:{}",
            swap_id, transaction.recipient, transaction.amount, transaction.fee
        );
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    }
}

#[async_trait]
impl DeviceTransport for EmulatedDevice {
    async fn send(&self, command: DeviceCommand) -> Result<DeviceResponse, DeviceError> {
        debug!("Emulated device received {:?}", command);
        let connected = self.with_state(|s| {
            s.commands.push(command.clone());
            s.connected
        });
        if !connected {
            return Err(DeviceError::Disconnected);
        }

        match command {
            DeviceCommand::GetDeviceInfo => {
                self.wait_until(|s| {
                    if s.responsive {
                        Wait::Done(Ok(DeviceResponse::DeviceInfo {
                            device_id: s.device_id.clone(),
                        }))
                    } else {
                        Wait::Pending
                    }
                })
                .await
            }
            DeviceCommand::OpenApp { name } => Ok(self.with_state(|s| {
                if s.current_app == name {
                    DeviceResponse::AppOpened { name }
                } else {
                    DeviceResponse::AppNotOpen {
                        current: s.current_app.clone(),
                    }
                }
            })),
            DeviceCommand::InitSwap {
                quote_id,
                to_account,
                amount,
                provider_fee,
                ..
            } => Ok(self.with_state(|s| {
                s.aborted = false;
                s.decision = None;
                s.swap_counter += 1;
                DeviceResponse::SwapInitialized {
                    swap_id: format!("{}-{}", quote_id, s.swap_counter),
                    transaction: TransactionSkeleton {
                        recipient: to_account,
                        amount: amount.to_string(),
                        fee: provider_fee.to_string(),
                    },
                }
            })),
            DeviceCommand::AwaitConfirmation { .. } => {
                self.wait_until(|s| {
                    if s.aborted {
                        s.aborted = false;
                        return Wait::Done(Ok(DeviceResponse::Rejected));
                    }
                    match (s.confirm_mode, s.decision.take()) {
                        (ConfirmMode::Approve, _) | (ConfirmMode::Manual, Some(true)) => {
                            Wait::Done(Ok(DeviceResponse::Confirmed))
                        }
                        (ConfirmMode::Reject, _) | (ConfirmMode::Manual, Some(false)) => {
                            Wait::Done(Ok(DeviceResponse::Rejected))
                        }
                        (ConfirmMode::Manual, None) => Wait::Pending,
                    }
                })
                .await
            }
            DeviceCommand::SignTransaction {
                swap_id,
                transaction,
            } => {
                self.wait_until(|s| {
                    if s.aborted {
                        s.aborted = false;
                        return Wait::Done(Ok(DeviceResponse::Error {
                            message: "Aborted".to_string(),
                        }));
                    }
                    match &s.sign_mode {
                        SignMode::Immediate => Wait::Done(Ok(DeviceResponse::Signed {
                            payload: Self::signed_payload(&swap_id, &transaction),
                        })),
                        SignMode::Fail(message) => Wait::Done(Ok(DeviceResponse::Error {
                            message: message.clone(),
                        })),
                        SignMode::Hang => Wait::Pending,
                    }
                })
                .await
            }
            DeviceCommand::Abort => {
                self.with_state(|s| {
                    if s.waiting {
                        s.aborted = true;
                    }
                });
                self.wake();
                Ok(DeviceResponse::Ack)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}
