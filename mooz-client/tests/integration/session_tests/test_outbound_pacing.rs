use mooz_client::{SessionConfig, SessionError, SignalingSession};
use mooz_core::Message;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::integration::init_tracing;
use crate::utils::{FlakyRelay, StalledRelay, fast_config, id, shared_relay};

#[tokio::test]
async fn test_sent_offer_is_drained_once() {
    init_tracing();

    let (relay, shared) = shared_relay();
    let session = SignalingSession::with_id(id("sender"), shared, SessionConfig::default());
    let peer = id("peer-42");

    session
        .send_value(json!({"type": "offer", "sdp": "v=0..."}), &peer)
        .expect("Failed to send");
    session.flush().await.expect("Failed to flush");

    assert_eq!(
        relay.drain(&peer),
        vec![json!({"type": "offer", "sdp": "v=0...", "from": "sender"})]
    );
    assert!(relay.drain(&peer).is_empty());
}

#[tokio::test]
async fn test_pacing_keeps_call_order_across_batches() {
    init_tracing();

    let (relay, shared) = shared_relay();
    let config = SessionConfig {
        batch_size: 3,
        flush_interval: Duration::from_millis(2),
        ..fast_config()
    };
    let session = SignalingSession::with_id(id("sender"), shared, config);
    let peer = id("peer");

    for n in 0..20 {
        session.send_value(json!({"n": n}), &peer).unwrap();
    }
    session.flush().await.unwrap();

    let seen: Vec<i64> = relay
        .drain(&peer)
        .iter()
        .map(|m| m["n"].as_i64().unwrap())
        .collect();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_typed_messages_are_stamped() {
    let (relay, shared) = shared_relay();
    let session = SignalingSession::with_id(id("guest"), shared, fast_config());

    session.send(Message::JoinRoom, &id("host")).unwrap();
    session.flush().await.unwrap();

    assert_eq!(
        relay.drain(&id("host")),
        vec![json!({"type": "joinroom", "from": "guest"})]
    );
}

#[tokio::test]
async fn test_non_object_payload_is_rejected() {
    let (_relay, shared) = shared_relay();
    let session = SignalingSession::with_id(id("sender"), shared, fast_config());

    let err = session.send_value(json!([1, 2, 3]), &id("peer")).unwrap_err();
    assert!(matches!(err, SessionError::NotAnObject));
}

#[tokio::test]
async fn test_transient_failures_are_retried_in_order() {
    init_tracing();

    let (relay, _) = shared_relay();
    let flaky = Arc::new(FlakyRelay::new(relay.clone(), 2));
    let session = SignalingSession::with_id(id("sender"), flaky.clone(), fast_config());
    let peer = id("peer");

    for n in 0..3 {
        session.send_value(json!({"n": n}), &peer).unwrap();
    }
    session.flush().await.unwrap();

    let seen: Vec<i64> = relay
        .drain(&peer)
        .iter()
        .map(|m| m["n"].as_i64().unwrap())
        .collect();
    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_undeliverable_message_does_not_block_later_ones() {
    init_tracing();

    let (relay, _) = shared_relay();
    let flaky = Arc::new(FlakyRelay::new(relay.clone(), 0));
    let config = SessionConfig {
        max_send_attempts: 3,
        ..fast_config()
    };
    let session = SignalingSession::with_id(id("sender"), flaky.clone(), config);
    let peer = id("peer");

    session.send_value(json!({"poison": true}), &peer).unwrap();
    session.send_value(json!({"n": 1}), &peer).unwrap();
    session.flush().await.unwrap();

    assert_eq!(relay.drain(&peer), vec![json!({"n": 1, "from": "sender"})]);
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_stalled_send_gives_way_to_later_ones() {
    init_tracing();

    let (relay, _) = shared_relay();
    let stalled = Arc::new(StalledRelay::new(relay.clone()));
    let config = SessionConfig {
        max_send_attempts: 2,
        send_timeout: Duration::from_millis(20),
        ..fast_config()
    };
    let session = SignalingSession::with_id(id("sender"), stalled, config);
    let peer = id("peer");

    session.send_value(json!({"stall": true}), &peer).unwrap();
    session.send_value(json!({"n": 1}), &peer).unwrap();
    tokio::time::timeout(Duration::from_secs(5), session.flush())
        .await
        .expect("Pacer stuck behind a stalled send")
        .unwrap();

    assert_eq!(relay.drain(&peer), vec![json!({"n": 1, "from": "sender"})]);
}

#[tokio::test]
async fn test_closed_session_refuses_sends() {
    let (relay, shared) = shared_relay();
    let session = SignalingSession::with_id(id("sender"), shared, fast_config());

    session.close();
    assert!(session.is_closed());

    let err = session.send_value(json!({"n": 1}), &id("peer")).unwrap_err();
    assert!(matches!(err, SessionError::Closed));
    assert!(matches!(session.flush().await, Err(SessionError::Closed)));
    assert_eq!(relay.queued(&id("peer")), 0);
}
