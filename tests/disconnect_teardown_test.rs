//! Connection-loss behavior: forced session teardown, registration drop,
//! automatic reconnection with re-registration, and the terminal Failed
//! state once the attempt budget is exhausted.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use softphone_core::client::recovery::RetryConfig;
use softphone_core::{
    CallState, ClientError, ClientEvent, ConnectionState, DisconnectReason, MediaOptions,
    RegistrationState, SessionSignal, TerminationReason, TransportEvent,
};

use common::{
    registered_client, test_config, wait_for_call_state, wait_for_connection_state,
    wait_for_registration_state, wait_until,
};

fn fast_reconnect_config() -> softphone_core::ClientConfig {
    test_config().with_reconnect(RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        use_jitter: false,
    })
}

#[tokio::test]
async fn connection_loss_fails_sessions_and_recovers_registration() {
    let h = registered_client(fast_reconnect_config()).await;

    // An established call is up when the connection drops.
    let call_id = h
        .client
        .originate("sip:bob@example.com", MediaOptions::audio_only())
        .await
        .unwrap();
    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::Accepted })
        .await
        .unwrap();
    wait_for_call_state(&h.client, &call_id, CallState::Established).await;
    assert_eq!(h.transport.register_calls.load(Ordering::SeqCst), 1);

    h.events_tx
        .send(TransportEvent::Disconnected {
            reason: DisconnectReason::Error { details: "socket closed".into() },
        })
        .await
        .unwrap();

    // The session is forced to Terminated with the connection-loss reason
    // and its media is released exactly once.
    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;
    let info = h.client.get_call(&call_id).unwrap();
    assert_eq!(info.termination, Some(TerminationReason::ConnectionLost));
    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);

    // Registration drops immediately, then the supervisor reconnects and
    // the binding is restored automatically.
    wait_until("re-registration after reconnect", || {
        h.transport.register_calls.load(Ordering::SeqCst) >= 2
    })
    .await;
    wait_for_connection_state(&h.client, ConnectionState::Connected).await;
    wait_for_registration_state(&h.client, RegistrationState::Registered).await;
}

#[tokio::test]
async fn exhausted_reconnects_park_in_failed_until_explicit_connect() {
    let h = registered_client(fast_reconnect_config()).await;
    let mut events = h.client.subscribe_events();

    h.transport.fail_connect.store(true, Ordering::SeqCst);
    h.events_tx
        .send(TransportEvent::Disconnected {
            reason: DisconnectReason::Error { details: "socket closed".into() },
        })
        .await
        .unwrap();

    wait_for_connection_state(&h.client, ConnectionState::Failed).await;

    // The terminal failure is surfaced as an error event.
    wait_until("terminal connection error event", || {
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::ClientError { error: ClientError::ConnectionFailed { .. }, .. } =
                event
            {
                return true;
            }
        }
        false
    })
    .await;

    // While Failed, origination fails fast and is never queued.
    let err = h
        .client
        .originate("sip:bob@example.com", MediaOptions::audio_only())
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::NotConnected);

    // Explicit caller intervention recovers the connection.
    h.transport.fail_connect.store(false, Ordering::SeqCst);
    h.client.connect().await.unwrap();
    assert_eq!(h.client.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn explicit_disconnect_does_not_reconnect() {
    let h = registered_client(fast_reconnect_config()).await;
    let connects_before = h.transport.connect_calls.load(Ordering::SeqCst);

    h.client.disconnect().await.unwrap();
    assert_eq!(h.client.connection_state().await, ConnectionState::Disconnected);
    assert_eq!(h.client.registration_state().await, RegistrationState::Unregistered);

    // The transport confirms the close; no reconnect attempt may follow.
    h.events_tx
        .send(TransportEvent::Disconnected { reason: DisconnectReason::Requested })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), connects_before);
    assert_eq!(h.client.connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn registration_failure_leaves_established_sessions_intact() {
    let h = registered_client(test_config().with_register_expires(1)).await;

    let call_id = h
        .client
        .originate("sip:bob@example.com", MediaOptions::audio_only())
        .await
        .unwrap();
    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::Accepted })
        .await
        .unwrap();
    wait_for_call_state(&h.client, &call_id, CallState::Established).await;

    // The next renewal (due at 80% of the 1s lease) is refused.
    h.transport.fail_register.store(true, Ordering::SeqCst);
    wait_for_registration_state(&h.client, RegistrationState::RegistrationFailed).await;

    // The call survives the registration hiccup.
    assert_eq!(h.client.get_call(&call_id).unwrap().state, CallState::Established);
    assert_eq!(h.media.released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn renewal_happens_before_the_lease_expires() {
    let h = registered_client(test_config().with_register_expires(1)).await;
    // first exchange plus at least one renewal within ~1.2s
    wait_until("registration renewal", || {
        h.transport.register_calls.load(Ordering::SeqCst) >= 2
    })
    .await;
    assert_eq!(h.client.registration_state().await, RegistrationState::Registered);
}
