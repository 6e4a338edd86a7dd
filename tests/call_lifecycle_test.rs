//! Full outgoing call lifecycle: originate, remote accept, in-call controls,
//! hangup with remote acknowledgment, and the ordering of emitted events.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_test::assert_ok;

use softphone_core::{
    CallState, ClientError, ClientEvent, MediaOptions, SessionSignal, SignalMessage,
    TerminationReason, TransportEvent,
};

use common::{registered_client, test_config, wait_for_call_state, wait_until};

#[tokio::test]
async fn outgoing_call_establishes_and_terminates_cleanly() {
    let h = registered_client(test_config()).await;
    let mut events = h.client.subscribe_events();

    // Originate: session is stored in Establishing and the offer goes out.
    let call_id = h
        .client
        .originate("sip:bob@example.com", MediaOptions::audio_only())
        .await
        .expect("originate");
    assert_eq!(h.client.get_call(&call_id).unwrap().state, CallState::Establishing);
    assert_eq!(h.media.acquired.load(Ordering::SeqCst), 1);

    // Remote accepts: Established, media attached before the transition.
    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::Accepted })
        .await
        .unwrap();
    wait_for_call_state(&h.client, &call_id, CallState::Established).await;
    assert_eq!(h.media.attached.load(Ordering::SeqCst), 1);
    let info = h.client.get_call(&call_id).unwrap();
    assert!(info.connected_at.is_some());

    // Hold flips on and off across two calls.
    assert!(h.client.toggle_hold(&call_id).await.unwrap());
    assert!(h.client.is_on_hold(&call_id).unwrap());
    assert!(!h.client.toggle_hold(&call_id).await.unwrap());
    assert!(!h.client.is_on_hold(&call_id).unwrap());

    // Mute is local-only.
    assert!(h.client.toggle_mute(&call_id).await.unwrap());
    assert!(h.client.is_muted(&call_id).unwrap());

    // DTMF goes out on the signaling path.
    h.client.send_dtmf(&call_id, "12#").await.unwrap();
    assert!(h
        .transport
        .sent_messages()
        .iter()
        .any(|m| matches!(m, SignalMessage::Dtmf { digits, .. } if digits == "12#")));

    // Hangup: Terminating until the remote acknowledges.
    assert_ok!(h.client.terminate(&call_id).await);
    assert_eq!(h.client.get_call(&call_id).unwrap().state, CallState::Terminating);
    assert!(h
        .transport
        .sent_messages()
        .iter()
        .any(|m| matches!(m, SignalMessage::Bye { call_id: id } if *id == call_id)));

    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::TerminateAck })
        .await
        .unwrap();
    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;

    let info = h.client.get_call(&call_id).unwrap();
    assert_eq!(info.termination, Some(TerminationReason::LocalHangup));
    assert!(h.client.active_calls().is_empty());
    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);

    // Controls on a terminated session report an invalid state.
    let err = h.client.toggle_hold(&call_id).await.unwrap_err();
    assert_eq!(err, ClientError::InvalidSessionState { call_id, state: CallState::Terminated });
    let err = h.client.send_dtmf(&call_id, "1").await.unwrap_err();
    assert_eq!(err, ClientError::InvalidSessionState { call_id, state: CallState::Terminated });

    // Per-session events arrived in transition order.
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::CallStateChanged { info, .. } = event {
            if info.call_id == call_id {
                states.push(info.new_state);
            }
        }
    }
    assert_eq!(
        states,
        vec![
            CallState::Establishing,
            CallState::Established,
            CallState::Terminating,
            CallState::Terminated,
        ]
    );
}

#[tokio::test]
async fn remote_rejection_terminates_the_session() {
    let h = registered_client(test_config()).await;
    let call_id = h
        .client
        .originate("sip:busy@example.com", MediaOptions::audio_only())
        .await
        .unwrap();

    h.events_tx
        .send(TransportEvent::SessionSignal {
            call_id,
            signal: SessionSignal::Rejected { reason: Some("486 Busy Here".into()) },
        })
        .await
        .unwrap();

    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;
    let info = h.client.get_call(&call_id).unwrap();
    assert_eq!(info.termination, Some(TerminationReason::RemoteRejected));
    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remote_hangup_releases_media_exactly_once() {
    let h = registered_client(test_config()).await;
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

    // Remote hangs up; a duplicate of the same signal must be harmless.
    for _ in 0..2 {
        h.events_tx
            .send(TransportEvent::SessionSignal {
                call_id,
                signal: SessionSignal::Terminated { reason: Some("bye".into()) },
            })
            .await
            .unwrap();
    }
    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;
    wait_until("duplicate signal to drain", || {
        h.media.released.load(Ordering::SeqCst) >= 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.client.get_call(&call_id).unwrap().termination,
        Some(TerminationReason::RemoteHangup)
    );
}

#[tokio::test]
async fn cancelling_before_answer_settles_to_terminated() {
    let h = registered_client(test_config()).await;
    let call_id = h
        .client
        .originate("sip:bob@example.com", MediaOptions::audio_only())
        .await
        .unwrap();

    // Local cancel while still Establishing sends a cancel, not a bye.
    h.client.terminate(&call_id).await.unwrap();
    assert!(h
        .transport
        .sent_messages()
        .iter()
        .any(|m| matches!(m, SignalMessage::Cancel { call_id: id } if *id == call_id)));

    // The remote's ack settles the session with the cancellation reason.
    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::TerminateAck })
        .await
        .unwrap();
    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;
    assert_eq!(
        h.client.get_call(&call_id).unwrap().termination,
        Some(TerminationReason::Cancelled)
    );
    assert_eq!(h.media.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_stale_accept_after_cancel_does_not_revive_the_session() {
    let h = registered_client(test_config()).await;
    let call_id = h
        .client
        .originate("sip:bob@example.com", MediaOptions::audio_only())
        .await
        .unwrap();

    h.client.terminate(&call_id).await.unwrap();
    // The remote answered at the same moment we cancelled.
    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::Accepted })
        .await
        .unwrap();
    h.events_tx
        .send(TransportEvent::SessionSignal { call_id, signal: SessionSignal::TerminateAck })
        .await
        .unwrap();

    wait_for_call_state(&h.client, &call_id, CallState::Terminated).await;
    let info = h.client.get_call(&call_id).unwrap();
    assert_eq!(info.state, CallState::Terminated);
    assert!(info.connected_at.is_none(), "cancelled call must never report as connected");
}
