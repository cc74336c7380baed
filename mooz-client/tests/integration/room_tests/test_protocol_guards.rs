use mooz_client::{Phase, Role, SignalingSession};
use mooz_core::Message;
use std::time::Duration;

use super::Participant;
use crate::integration::init_tracing;
use crate::utils::{fast_config, id, shared_relay, wait_until};

#[tokio::test]
async fn test_room_reply_only_from_room_owner() {
    init_tracing();

    let (_relay, shared) = shared_relay();
    let room = id("absent-host");
    let guest = Participant::join("guest", &room, &shared);

    let mallory = SignalingSession::with_id(id("mallory"), shared.clone(), fast_config());
    mallory
        .send(
            Message::RoomReply {
                should_call: vec![id("victim")],
            },
            guest.id(),
        )
        .unwrap();
    mallory.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(guest.handle.peers().await.unwrap().is_empty());
    assert!(guest.factory.transports().is_empty());

    let owner = SignalingSession::with_id(room.clone(), shared.clone(), fast_config());
    owner
        .send(
            Message::RoomReply {
                should_call: vec![room.clone(), guest.id().clone(), id("other")],
            },
            guest.id(),
        )
        .unwrap();

    wait_until("calls to the room members", || {
        guest.factory.transports().len() == 2
    })
    .await;
    let peers = guest.handle.peers().await.unwrap();
    let ids: Vec<_> = peers.iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec![room.clone(), id("other")]);
    assert!(peers.iter().all(|p| p.role == Role::Initiator));
    assert!(peers.iter().all(|p| p.phase == Phase::AwaitingRemote));
}

#[tokio::test]
async fn test_guest_ignores_join_requests() {
    init_tracing();

    let (relay, shared) = shared_relay();
    let guest = Participant::join("guest", &id("room"), &shared);

    let stranger = SignalingSession::with_id(id("stranger"), shared.clone(), fast_config());
    stranger.send(Message::JoinRoom, guest.id()).unwrap();
    stranger.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(relay.drain(&id("stranger")).is_empty());
    assert!(guest.handle.peers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signal_without_negotiation_is_dropped() {
    init_tracing();

    let (_relay, shared) = shared_relay();
    let host = Participant::host("host", &shared);

    let stranger = SignalingSession::with_id(id("stranger"), shared.clone(), fast_config());
    stranger
        .send(
            Message::Signal {
                data: mooz_core::SignalData::Answer { sdp: "v=0".into() },
            },
            host.id(),
        )
        .unwrap();
    stranger.flush().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(host.handle.peers().await.unwrap().is_empty());
    assert!(host.factory.transports().is_empty());
}
