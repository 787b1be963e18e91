use log::{debug, info, warn};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::device::protocol::{DeviceCommand, DeviceEvent, DeviceResponse};
use crate::device::transport::DeviceTransport;
use crate::entity::{DeviceError, DeviceSession, DeviceStatus};

const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the hardware device connection.
///
/// Status moves DISCONNECTED → OPENING → OPEN → (ERROR | DISCONNECTED) and is
/// only ever written here; everyone else watches it through
/// [`DeviceSessionController::subscribe`].
pub struct DeviceSessionController {
    transport: Arc<dyn DeviceTransport>,
    status: watch::Sender<DeviceSession>,
    signing_lock: Arc<tokio::sync::Mutex<()>>,
    open_timeout: Duration,
    interaction_timeout: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSessionController {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        open_timeout: Duration,
        interaction_timeout: Duration,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(DeviceSession::default());
        Arc::new(Self {
            transport,
            status,
            signing_lock: Arc::new(tokio::sync::Mutex::new(())),
            open_timeout,
            interaction_timeout,
            watcher: Mutex::new(None),
        })
    }

    pub fn session(&self) -> DeviceSession {
        self.status.borrow().clone()
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSession> {
        self.status.subscribe()
    }

    /// True while a signing session holds the device
    pub fn is_busy(&self) -> bool {
        self.signing_lock.try_lock().is_err()
    }

    fn set_status(&self, status: DeviceStatus, device_id: Option<String>) {
        self.status.send_modify(|session| {
            if session.status != status {
                info!("Device session {} -> {}", session.status, status);
            }
            session.status = status;
            session.device_id = device_id;
        });
    }

    pub(crate) fn mark_disconnected(&self) {
        if self.status() != DeviceStatus::Disconnected {
            self.set_status(DeviceStatus::Disconnected, None);
        }
    }

    pub(crate) fn mark_error(&self) {
        let device_id = self.session().device_id;
        self.set_status(DeviceStatus::Error, device_id);
    }

    /// Listens for out-of-band disconnects for the lifetime of the controller
    fn ensure_watcher(self: &Arc<Self>) {
        let mut watcher = match self.watcher.lock() {
            Ok(watcher) => watcher,
            Err(poisoned) => poisoned.into_inner(),
        };
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let mut events = self.transport.subscribe();
        let controller: Weak<Self> = Arc::downgrade(self);
        *watcher = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DeviceEvent::Disconnected) => match controller.upgrade() {
                        Some(controller) => controller.mark_disconnected(),
                        None => break,
                    },
                    Ok(DeviceEvent::Connected) => debug!("Device transport connected"),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} device events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Opens the device session, waiting until the device reports ready.
    ///
    /// A no-op when the session is already open.
    pub async fn connect(self: &Arc<Self>) -> Result<(), DeviceError> {
        if self.status() == DeviceStatus::Open {
            return Ok(());
        }

        self.ensure_watcher();
        self.set_status(DeviceStatus::Opening, None);

        let reply = tokio::time::timeout(
            self.open_timeout,
            self.transport.send(DeviceCommand::GetDeviceInfo),
        )
        .await;

        match reply {
            Ok(Ok(DeviceResponse::DeviceInfo { device_id })) => {
                info!("Device {} ready", device_id);
                self.set_status(DeviceStatus::Open, Some(device_id));
                Ok(())
            }
            Ok(Ok(other)) => {
                self.set_status(DeviceStatus::Error, None);
                Err(DeviceError::Unexpected(format!("{:?}", other)))
            }
            Ok(Err(DeviceError::Disconnected)) => {
                self.set_status(DeviceStatus::Disconnected, None);
                Err(DeviceError::Disconnected)
            }
            Ok(Err(e)) => {
                warn!("Failed to open device session: {}", e);
                self.set_status(DeviceStatus::Error, None);
                Err(e)
            }
            Err(_) => {
                warn!("Device did not become ready within {:?}", self.open_timeout);
                self.set_status(DeviceStatus::Error, None);
                Err(DeviceError::Timeout)
            }
        }
    }

    /// Takes the device for one signing exchange.
    ///
    /// Only one session may exist at a time; a second request fails with
    /// [`DeviceError::SessionBusy`] instead of queueing.
    pub fn acquire(self: &Arc<Self>) -> Result<SigningSession, DeviceError> {
        if self.status() != DeviceStatus::Open {
            return Err(DeviceError::NotOpen);
        }

        let guard = self
            .signing_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| DeviceError::SessionBusy)?;

        Ok(SigningSession {
            controller: self.clone(),
            _guard: guard,
        })
    }
}

/// Exclusive use of an open device. Dropping it frees the device.
pub struct SigningSession {
    controller: Arc<DeviceSessionController>,
    _guard: OwnedMutexGuard<()>,
}

impl SigningSession {
    /// Sends one command, failing fast if the device goes away meanwhile
    pub async fn send(&self, command: DeviceCommand) -> Result<DeviceResponse, DeviceError> {
        let mut status = self.controller.subscribe();
        if !status.borrow_and_update().is_open() {
            return Err(DeviceError::Disconnected);
        }

        let timeout = self.controller.interaction_timeout;
        let exchange = tokio::time::timeout(timeout, self.controller.transport.send(command));

        tokio::select! {
            reply = exchange => match reply {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(DeviceError::Disconnected)) => {
                    self.controller.mark_disconnected();
                    Err(DeviceError::Disconnected)
                }
                Ok(Err(DeviceError::Transport(message))) => {
                    self.controller.mark_error();
                    Err(DeviceError::Transport(message))
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(DeviceError::Timeout),
            },
            _ = status.wait_for(|session| !session.is_open()) => Err(DeviceError::Disconnected),
        }
    }

    /// Best-effort reset of the device app after an interrupted exchange
    pub async fn abort(&self) {
        if !self.controller.session().is_open() {
            return;
        }

        match tokio::time::timeout(
            ABORT_TIMEOUT,
            self.controller.transport.send(DeviceCommand::Abort),
        )
        .await
        {
            Ok(Ok(_)) => debug!("Device exchange aborted"),
            Ok(Err(e)) => warn!("Failed to abort device exchange: {}", e),
            Err(_) => warn!("Device did not acknowledge abort"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::emulator::EmulatedDevice;

    fn controller(device: Arc<EmulatedDevice>) -> Arc<DeviceSessionController> {
        DeviceSessionController::new(device, Duration::from_secs(2), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_connect_opens_session() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        let controller = controller(device);
        assert_eq!(controller.status(), DeviceStatus::Disconnected);

        controller.connect().await.unwrap();

        let session = controller.session();
        assert_eq!(session.status, DeviceStatus::Open);
        assert_eq!(session.device_id.as_deref(), Some("nano-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_into_error() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        device.set_responsive(false);
        let controller = controller(device);

        assert_eq!(controller.connect().await, Err(DeviceError::Timeout));
        assert_eq!(controller.status(), DeviceStatus::Error);
    }

    #[tokio::test]
    async fn test_second_session_is_busy() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        let controller = controller(device);
        controller.connect().await.unwrap();

        let first = controller.acquire().unwrap();
        assert!(controller.is_busy());
        assert!(matches!(controller.acquire(), Err(DeviceError::SessionBusy)));

        drop(first);
        assert!(!controller.is_busy());
        assert!(controller.acquire().is_ok());
    }

    #[tokio::test]
    async fn test_acquire_requires_open_session() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        let controller = controller(device);
        assert!(matches!(controller.acquire(), Err(DeviceError::NotOpen)));
    }

    #[tokio::test]
    async fn test_out_of_band_disconnect_closes_session() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        let controller = controller(device.clone());
        controller.connect().await.unwrap();

        let mut status = controller.subscribe();
        device.disconnect();

        status
            .wait_for(|session| session.status == DeviceStatus::Disconnected)
            .await
            .unwrap();
        assert!(controller.session().device_id.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        let controller = controller(device.clone());
        controller.connect().await.unwrap();

        let mut status = controller.subscribe();
        device.disconnect();
        status
            .wait_for(|session| session.status == DeviceStatus::Disconnected)
            .await
            .unwrap();

        device.reconnect();
        controller.connect().await.unwrap();
        assert_eq!(controller.status(), DeviceStatus::Open);
    }
}
