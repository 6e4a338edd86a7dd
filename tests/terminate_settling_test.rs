//! Watchdog behavior: teardown and establishment always settle locally
//! within their bounds, with exactly one terminal transition.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use softphone_core::{
    CallState, ClientError, ClientEvent, MediaOptions, SessionSignal, SignalMessage,
    TerminationReason, TransportEvent,
};

use common::{registered_client, test_config, wait_for_call_state};

#[tokio::test]
async fn hangup_settles_without_remote_acknowledgment() {
    let config = test_config().with_terminate_timeout(Duration::from_millis(100));
    let h = registered_client(config).await;
    let mut events = h.client.subscribe_events();

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

    // Hang up; the remote never acknowledges.
    h.client.terminate(&call_id).await.unwrap();
    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;

    let info = h.client.get_call(&call_id).unwrap();
    assert_eq!(info.termination, Some(TerminationReason::LocalHangup));
    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);

    // Exactly one Terminated event for the transition.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut terminated_events = 0;
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::CallStateChanged { info, .. } = event {
            if info.call_id == call_id && info.new_state == CallState::Terminated {
                terminated_events += 1;
            }
        }
    }
    assert_eq!(terminated_events, 1);

    let err = h.client.terminate(&call_id).await.unwrap_err();
    assert_eq!(err, ClientError::SessionEnded { call_id });
}

#[tokio::test]
async fn unanswered_outgoing_calls_time_out() {
    let config = test_config().with_establish_timeout(Duration::from_millis(100));
    let h = registered_client(config).await;

    let call_id = h
        .client
        .originate("sip:nobody@example.com", MediaOptions::audio_only())
        .await
        .unwrap();
    assert_eq!(h.client.get_call(&call_id).unwrap().state, CallState::Establishing);

    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;
    let info = h.client.get_call(&call_id).unwrap();
    assert_eq!(info.termination, Some(TerminationReason::Timeout));
    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);

    // The withdrawal was signaled to the remote.
    assert!(h
        .transport
        .sent_messages()
        .iter()
        .any(|m| matches!(m, SignalMessage::Cancel { call_id: id } if *id == call_id)));
}

#[tokio::test]
async fn a_late_answer_does_not_beat_the_establish_timeout() {
    let config = test_config().with_establish_timeout(Duration::from_millis(50));
    let h = registered_client(config).await;

    let call_id = h
        .client
        .originate("sip:slow@example.com", MediaOptions::audio_only())
        .await
        .unwrap();
    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;

    // The accept arrives after the watchdog already settled the session.
    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::Accepted })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let info = h.client.get_call(&call_id).unwrap();
    assert_eq!(info.state, CallState::Terminated);
    assert!(info.connected_at.is_none());
    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_settles_every_session() {
    let config = test_config().with_terminate_timeout(Duration::from_millis(100));
    let h = registered_client(config).await;

    let ringing = h
        .client
        .originate("sip:bob@example.com", MediaOptions::audio_only())
        .await
        .unwrap();
    let established = h
        .client
        .originate("sip:carol@example.com", MediaOptions::audio_only())
        .await
        .unwrap();
    h.events_tx
        .send(TransportEvent::SessionSignal {
            call_id: established,
            signal: SessionSignal::Accepted,
        })
        .await
        .unwrap();
    wait_for_call_state(&h.client, &established, CallState::Established).await;

    h.client.stop().await.unwrap();

    assert!(h.client.active_calls().is_empty());
    assert_eq!(h.client.get_call(&ringing).unwrap().state, CallState::Terminated);
    assert_eq!(h.client.get_call(&established).unwrap().state, CallState::Terminated);
    assert_eq!(h.media.released.load(Ordering::SeqCst), 2);
}
