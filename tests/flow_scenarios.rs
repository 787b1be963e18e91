mod common;

use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{request, BroadcastMode, Harness};
use swap_flow::device::{ConfirmMode, DeviceCommand, SignMode, SigningCoordinator};
use swap_flow::history::HistoryReader;
use swap_flow::{
    form_model, DeviceError, DeviceStatus, FlowState, ProviderError, SigningError, SummaryStep,
    SwapError, SwapStatus, UserIntent,
};

fn buy_supported() -> HashSet<String> {
    ["BTC", "ETH"].iter().map(|s| s.to_string()).collect()
}

/// Drives a fresh flow to an accepted summary for 0.2 BTC -> ETH
async fn accepted_summary(h: &Harness) {
    h.flow
        .send(UserIntent::UpdateRequest(request(dec!(0.2))))
        .unwrap();
    h.wait("QuoteReady").await;
    h.flow.send(UserIntent::Continue).unwrap();
    h.flow.send(UserIntent::AcceptTerms(true)).unwrap();
    h.wait_until(|state| {
        matches!(
            state,
            FlowState::QuoteReady {
                summary: Some(SummaryStep {
                    terms_accepted: true
                }),
                ..
            }
        )
    })
    .await;
}

#[tokio::test]
async fn test_float_swap_happy_path() {
    let h = Harness::new();
    let supported = buy_supported();

    assert!(!form_model(&h.flow.state(), &supported).continue_enabled);

    h.flow
        .send(UserIntent::UpdateRequest(request(dec!(0.2))))
        .unwrap();
    let ready = h.wait("QuoteReady").await;
    let quote = ready.quote().unwrap().clone();
    assert_eq!(quote.payout_amount, dec!(3.2));
    assert!(form_model(&ready, &supported).continue_enabled);

    h.flow.send(UserIntent::Continue).unwrap();
    let summary = h
        .wait_until(|state| matches!(state, FlowState::QuoteReady { summary: Some(_), .. }))
        .await;
    assert!(!form_model(&summary, &supported).continue_enabled);

    h.flow.send(UserIntent::AcceptTerms(true)).unwrap();
    let accepted = h
        .wait_until(|state| {
            matches!(
                state,
                FlowState::QuoteReady {
                    summary: Some(SummaryStep {
                        terms_accepted: true
                    }),
                    ..
                }
            )
        })
        .await;
    assert!(form_model(&accepted, &supported).continue_enabled);

    h.flow.send(UserIntent::Continue).unwrap();
    let finished = h.wait("Finished").await;
    let FlowState::Finished {
        swap_id,
        transaction_id,
    } = finished
    else {
        unreachable!()
    };
    assert_eq!(transaction_id, "tx-123");

    let entry = h.history.get(&swap_id).await.unwrap().unwrap();
    assert_eq!(entry.status, SwapStatus::Finished);
    assert_eq!(entry.transaction_id.as_deref(), Some("tx-123"));
    assert_eq!(entry.quote, quote);
    assert_eq!(entry.from_account_id, "btc-main");
    assert_eq!(h.session.status(), DeviceStatus::Open);
}

#[tokio::test]
async fn test_amount_below_minimum_is_classified() {
    let h = Harness::new();

    h.flow
        .send(UserIntent::UpdateRequest(request(dec!(0.0001))))
        .unwrap();
    let state = h.wait("QuoteError").await;

    assert_eq!(state.swap_error(), Some(&SwapError::AmountTooLow));
    assert_eq!(h.provider.quote_calls.load(Ordering::SeqCst), 0);

    let model = form_model(&state, &buy_supported());
    let error = model.error.unwrap();
    assert_eq!(
        error.message_key,
        Some("swap.form.from.errors.exchangeAmountTooLow")
    );
    assert!(error.buy.is_none());
    assert!(!model.continue_enabled);
}

#[tokio::test]
async fn test_balance_error_offers_buy_action() {
    let h = Harness::new();
    h.provider.failures.lock().unwrap().insert(
        dec!(5),
        ProviderError::NotEnoughBalance {
            currency: "BTC".to_string(),
        },
    );

    h.flow
        .send(UserIntent::UpdateRequest(request(dec!(5))))
        .unwrap();
    let state = h.wait("QuoteError").await;
    assert_eq!(state.swap_error(), Some(&SwapError::NotEnoughBalance));

    let buy = form_model(&state, &buy_supported()).error.unwrap().buy.unwrap();
    assert_eq!(buy.currency, "BTC");
    assert_eq!(buy.account_id, "btc-main");
}

#[tokio::test]
async fn test_disconnect_while_signing_fails_without_history() {
    let h = Harness::new();
    h.device.set_sign_mode(SignMode::Hang);
    accepted_summary(&h).await;

    h.flow.send(UserIntent::Continue).unwrap();
    h.wait("Signing").await;
    h.device.disconnect();

    let failed = h.wait("Failed").await;
    assert!(failed.flow_error().unwrap().is_device_disconnected());
    assert!(h.history.list().await.unwrap().is_empty());
    assert_eq!(h.broadcaster.calls.load(Ordering::SeqCst), 0);

    let mut status = h.session.subscribe();
    status
        .wait_for(|session| session.status == DeviceStatus::Disconnected)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_broadcast_timeout_leaves_pending_entry() {
    let h = Harness::new();
    *h.broadcaster.mode.lock().unwrap() = BroadcastMode::Hang;
    accepted_summary(&h).await;

    h.flow.send(UserIntent::Continue).unwrap();
    let state = h.wait("BroadcastUnknown").await;
    let FlowState::BroadcastUnknown { swap_id } = state else {
        unreachable!()
    };

    let entries = h.history.list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].swap_id, swap_id);
    assert_eq!(entries[0].status, SwapStatus::Pending);
    assert!(entries[0].transaction_id.is_none());

    // never resubmitted
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.broadcaster.calls.load(Ordering::SeqCst), 1);
    assert!(!h.flow.state().is_device_step());

    // retry is not offered for an unknown outcome
    h.flow.send(UserIntent::Retry).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.flow.state().name(), "BroadcastUnknown");
}

#[tokio::test]
async fn test_rejected_broadcast_marks_entry_failed() {
    let h = Harness::new();
    *h.broadcaster.mode.lock().unwrap() = BroadcastMode::Reject("fee too low".to_string());
    accepted_summary(&h).await;

    h.flow.send(UserIntent::Continue).unwrap();
    let failed = h.wait("Failed").await;
    assert!(!failed.flow_error().unwrap().is_recoverable());

    let entries = h.history.list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, SwapStatus::Failed);
}

#[tokio::test]
async fn test_superseded_quote_is_never_applied() {
    let h = Harness::new();
    h.provider
        .delays
        .lock()
        .unwrap()
        .insert(dec!(0.1), Duration::from_millis(300));

    h.flow
        .send(UserIntent::UpdateRequest(request(dec!(0.1))))
        .unwrap();
    h.flow
        .send(UserIntent::UpdateRequest(request(dec!(0.2))))
        .unwrap();

    let ready = h.wait("QuoteReady").await;
    assert_eq!(ready.request().unwrap().amount, dec!(0.2));
    assert_eq!(ready.quote().unwrap().payout_amount, dec!(3.2));

    // the slow response for 0.1 lands after this point
    tokio::time::sleep(Duration::from_millis(500)).await;
    let state = h.flow.state();
    assert_eq!(state.name(), "QuoteReady");
    assert_eq!(state.quote().unwrap().payout_amount, dec!(3.2));
    assert_eq!(h.provider.quote_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_on_device_confirm_keeps_session_open() {
    let h = Harness::new();
    h.device.set_confirm_mode(ConfirmMode::Manual);

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        let mut status = h.session.subscribe();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = status.borrow_and_update().status;
                seen.lock().unwrap().push(current);
            }
        });
    }

    accepted_summary(&h).await;
    h.flow.send(UserIntent::Continue).unwrap();
    h.wait("DeviceConfirm").await;
    assert!(h.session.is_busy());

    h.flow.send(UserIntent::Cancel).unwrap();
    let state = h.wait("QuoteReady").await;
    assert!(matches!(state, FlowState::QuoteReady { summary: None, .. }));

    while h.session.is_busy() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.session.status(), DeviceStatus::Open);
    assert!(!seen.lock().unwrap().contains(&DeviceStatus::Error));
    assert_eq!(h.device.commands().last(), Some(&DeviceCommand::Abort));
    assert!(h.history.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_signing_request_is_busy() {
    let h = Harness::new();
    h.device.set_confirm_mode(ConfirmMode::Manual);
    accepted_summary(&h).await;

    h.flow.send(UserIntent::Continue).unwrap();
    let confirm = h.wait("DeviceConfirm").await;

    let other = SigningCoordinator::new(h.session.clone(), "Exchange");
    let result = other
        .sign(
            confirm.request().unwrap(),
            confirm.quote().unwrap(),
            &CancellationToken::new(),
            &|_| {},
        )
        .await;
    assert_eq!(result, Err(SigningError::Setup(DeviceError::SessionBusy)));

    h.device.confirm();
    h.wait("Finished").await;
}
