use base64::Engine;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::device::protocol::{DeviceCommand, DeviceResponse};
use crate::device::session::{DeviceSessionController, SigningSession};
use crate::entity::{
    DeviceError, Quote, SigningError, SigningPhase, SigningResult, SwapRequest,
    TransactionSkeleton,
};

enum StepFailure {
    Cancelled,
    Device(DeviceError),
}

/// Drives the device through open-app, init, confirm and sign.
pub struct SigningCoordinator {
    session: Arc<DeviceSessionController>,
    app_name: String,
}

impl SigningCoordinator {
    pub fn new(session: Arc<DeviceSessionController>, app_name: &str) -> Self {
        Self {
            session,
            app_name: app_name.to_string(),
        }
    }

    /// Runs one signing attempt against an open session.
    ///
    /// `cancel` may fire at any point. The device is then told to abort
    /// and the session is released back to OPEN; a signature that was
    /// already on its way is dropped.
    pub async fn sign(
        &self,
        request: &SwapRequest,
        quote: &Quote,
        cancel: &CancellationToken,
        on_phase: &(dyn Fn(SigningPhase) + Send + Sync),
    ) -> Result<SigningResult, SigningError> {
        if cancel.is_cancelled() {
            return Err(SigningError::UserCancelled);
        }

        let session = self.session.acquire().map_err(SigningError::Setup)?;
        let result = self
            .run_protocol(&session, request, quote, cancel, on_phase)
            .await;

        if let Err(e) = &result {
            if *e != SigningError::Disconnected {
                debug!("Signing interrupted ({}), resetting device", e);
                session.abort().await;
            }
        }

        result
    }

    async fn step(
        &self,
        session: &SigningSession,
        command: DeviceCommand,
        cancel: &CancellationToken,
    ) -> Result<DeviceResponse, StepFailure> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepFailure::Cancelled),
            response = session.send(command) => match response {
                Ok(DeviceResponse::Error { message }) => {
                    Err(StepFailure::Device(DeviceError::Unexpected(message)))
                }
                Ok(response) => Ok(response),
                Err(e) => Err(StepFailure::Device(e)),
            },
        }
    }

    async fn run_protocol(
        &self,
        session: &SigningSession,
        request: &SwapRequest,
        quote: &Quote,
        cancel: &CancellationToken,
        on_phase: &(dyn Fn(SigningPhase) + Send + Sync),
    ) -> Result<SigningResult, SigningError> {
        let setup_failure = |failure: StepFailure| match failure {
            StepFailure::Cancelled => SigningError::UserCancelled,
            StepFailure::Device(e) => SigningError::Setup(e),
        };

        on_phase(SigningPhase::OpeningApp);
        let open_app = DeviceCommand::OpenApp {
            name: self.app_name.clone(),
        };
        match self.step(session, open_app, cancel).await.map_err(setup_failure)? {
            DeviceResponse::AppOpened { name } if name == self.app_name => {}
            DeviceResponse::AppOpened { name } | DeviceResponse::AppNotOpen { current: name } => {
                warn!("Expected {} app on device, found {}", self.app_name, name);
                return Err(SigningError::Setup(DeviceError::AppNotOpen(name)));
            }
            other => {
                return Err(SigningError::Setup(DeviceError::Unexpected(format!(
                    "{:?}",
                    other
                ))))
            }
        }

        let init = DeviceCommand::InitSwap {
            quote_id: quote.id.clone(),
            from_currency: request.from_currency.clone(),
            to_currency: request.to_currency.clone(),
            from_account: request.from_account_id.clone(),
            to_account: request.to_account_id.clone(),
            amount: request.amount,
            payout_amount: quote.payout_amount,
            provider_fee: quote.provider_fee,
            rate_mode: quote.rate_mode,
        };
        let (swap_id, transaction) =
            match self.step(session, init, cancel).await.map_err(setup_failure)? {
                DeviceResponse::SwapInitialized {
                    swap_id,
                    transaction,
                } => (swap_id, transaction),
                other => {
                    return Err(SigningError::Setup(DeviceError::Unexpected(format!(
                        "{:?}",
                        other
                    ))))
                }
            };
        info!("Swap {} initialised on device", swap_id);

        on_phase(SigningPhase::AwaitingConfirmation {
            swap_id: swap_id.clone(),
        });
        self.await_confirmation(session, &swap_id, cancel).await?;

        on_phase(SigningPhase::Signing {
            swap_id: swap_id.clone(),
        });
        let payload = self.sign_transaction(session, &swap_id, transaction, cancel).await?;

        Ok(SigningResult {
            signed_transaction: payload,
            swap_provider_id: swap_id,
        })
    }

    async fn await_confirmation(
        &self,
        session: &SigningSession,
        swap_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SigningError> {
        let command = DeviceCommand::AwaitConfirmation {
            swap_id: swap_id.to_string(),
        };

        match self.step(session, command, cancel).await {
            Ok(DeviceResponse::Confirmed) => {
                info!("Swap {} confirmed on device", swap_id);
                Ok(())
            }
            Ok(_) | Err(StepFailure::Cancelled) => Err(SigningError::UserCancelled),
            Err(StepFailure::Device(DeviceError::Disconnected)) => Err(SigningError::Disconnected),
            Err(StepFailure::Device(e)) => {
                warn!("Confirmation of swap {} failed: {}", swap_id, e);
                Err(SigningError::UserCancelled)
            }
        }
    }

    async fn sign_transaction(
        &self,
        session: &SigningSession,
        swap_id: &str,
        transaction: TransactionSkeleton,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SigningError> {
        let command = DeviceCommand::SignTransaction {
            swap_id: swap_id.to_string(),
            transaction,
        };

        match self.step(session, command, cancel).await {
            Ok(DeviceResponse::Signed { payload }) => base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map_err(|e| SigningError::Failed(format!("Invalid signed payload: {}", e))),
            Ok(other) => Err(SigningError::Failed(format!("{:?}", other))),
            Err(StepFailure::Cancelled) => {
                debug!("Discarding signature of swap {} after cancel", swap_id);
                Err(SigningError::UserCancelled)
            }
            Err(StepFailure::Device(DeviceError::Disconnected)) => Err(SigningError::Disconnected),
            Err(StepFailure::Device(e)) => Err(SigningError::Failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::emulator::{ConfirmMode, EmulatedDevice, SignMode};
    use crate::entity::{DeviceStatus, RateMode};
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::time::Duration;

    fn fixtures() -> (SwapRequest, Quote) {
        let request = SwapRequest::new("BTC", "ETH", "acc-btc", "acc-eth", dec!(0.2), RateMode::Float);
        let quote = Quote {
            id: "q-1".to_string(),
            rate: dec!(16),
            rate_mode: RateMode::Float,
            expires_at: Utc::now() + ChronoDuration::minutes(5),
            provider_fee: dec!(0.0005),
            payout_amount: dec!(3.2),
            min_amount: dec!(0.001),
            max_amount: dec!(10),
        };
        (request, quote)
    }

    async fn open(device: Arc<EmulatedDevice>) -> (Arc<DeviceSessionController>, SigningCoordinator) {
        let session =
            DeviceSessionController::new(device, Duration::from_secs(2), Duration::from_secs(600));
        session.connect().await.unwrap();
        let coordinator = SigningCoordinator::new(session.clone(), "Exchange");
        (session, coordinator)
    }

    #[tokio::test]
    async fn test_sign_happy_path_reports_phases() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        let (session, coordinator) = open(device).await;
        let (request, quote) = fixtures();
        let phases = Mutex::new(Vec::new());

        let result = coordinator
            .sign(&request, &quote, &CancellationToken::new(), &|phase| {
                phases.lock().unwrap().push(phase)
            })
            .await
            .unwrap();

        assert_eq!(result.swap_provider_id, "q-1-1");
        assert!(String::from_utf8(result.signed_transaction)
            .unwrap()
            .starts_with("signed:q-1-1:acc-eth"));
        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                SigningPhase::OpeningApp,
                SigningPhase::AwaitingConfirmation {
                    swap_id: "q-1-1".to_string()
                },
                SigningPhase::Signing {
                    swap_id: "q-1-1".to_string()
                },
            ]
        );
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_wrong_app_is_setup_error() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Bitcoin"));
        let (_, coordinator) = open(device).await;
        let (request, quote) = fixtures();

        let result = coordinator
            .sign(&request, &quote, &CancellationToken::new(), &|_| {})
            .await;
        assert_eq!(
            result,
            Err(SigningError::Setup(DeviceError::AppNotOpen(
                "Bitcoin".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_rejection_on_device_is_user_cancelled() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        device.set_confirm_mode(ConfirmMode::Reject);
        let (_, coordinator) = open(device).await;
        let (request, quote) = fixtures();

        let result = coordinator
            .sign(&request, &quote, &CancellationToken::new(), &|_| {})
            .await;
        assert_eq!(result, Err(SigningError::UserCancelled));
    }

    #[tokio::test]
    async fn test_cancel_during_confirmation_releases_session() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        device.set_confirm_mode(ConfirmMode::Manual);
        let (session, coordinator) = open(device.clone()).await;
        let (request, quote) = fixtures();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let result = coordinator
            .sign(&request, &quote, &cancel, &move |phase| {
                if matches!(phase, SigningPhase::AwaitingConfirmation { .. }) {
                    trigger.cancel();
                }
            })
            .await;

        assert_eq!(result, Err(SigningError::UserCancelled));
        assert_eq!(session.status(), DeviceStatus::Open);
        assert!(!session.is_busy());
        assert_eq!(device.commands().last(), Some(&DeviceCommand::Abort));
    }

    #[tokio::test]
    async fn test_signing_failure_after_confirmation() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        device.set_sign_mode(SignMode::Fail("Secure element error".to_string()));
        let (_, coordinator) = open(device).await;
        let (request, quote) = fixtures();

        let result = coordinator
            .sign(&request, &quote, &CancellationToken::new(), &|_| {})
            .await;
        assert!(matches!(result, Err(SigningError::Failed(_))));
    }

    #[tokio::test]
    async fn test_disconnect_while_signing() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        device.set_sign_mode(SignMode::Hang);
        let (session, coordinator) = open(device.clone()).await;
        let (request, quote) = fixtures();

        let unplug = device.clone();
        let handle = tokio::spawn(async move {
            while !unplug.is_waiting() || unplug.commands().len() < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            unplug.disconnect();
        });

        let result = coordinator
            .sign(&request, &quote, &CancellationToken::new(), &|_| {})
            .await;
        handle.await.unwrap();

        assert_eq!(result, Err(SigningError::Disconnected));
        assert_eq!(session.status(), DeviceStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_concurrent_signing_is_busy() {
        let device = Arc::new(EmulatedDevice::new("nano-1", "Exchange"));
        let (session, coordinator) = open(device).await;
        let (request, quote) = fixtures();

        let _held = session.acquire().unwrap();
        let result = coordinator
            .sign(&request, &quote, &CancellationToken::new(), &|_| {})
            .await;
        assert_eq!(result, Err(SigningError::Setup(DeviceError::SessionBusy)));
    }
}
