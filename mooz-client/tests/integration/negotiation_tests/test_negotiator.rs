use mooz_client::{
    LinkId, NegotiationError, Negotiator, NegotiatorUpdate, PeerTransport, Phase, SdpKind,
    SignalingSession, TransportEvent, TransportFactory,
};
use mooz_core::{IceCandidate, Id, SignalData};
use mooz_server::MemoryRelay;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::integration::init_tracing;
use crate::utils::{FakeFactory, FakeTransport, Op, fast_config, id, shared_relay};

fn candidate(name: &str) -> SignalData {
    SignalData::IceCandidate {
        candidate: IceCandidate {
            candidate: name.to_owned(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        },
    }
}

struct Fixture {
    relay: MemoryRelay,
    session: SignalingSession,
    factory: FakeFactory,
    events: mpsc::Receiver<TransportEvent>,
    link: LinkId,
    transport: Arc<dyn PeerTransport>,
}

impl Fixture {
    async fn new(factory: FakeFactory) -> Self {
        let (relay, shared) = shared_relay();
        let session = SignalingSession::with_id(id("me"), shared, fast_config());
        let (tx, events) = mpsc::channel(64);
        let link = LinkId::next();
        let transport = factory.create(link, &[], tx).await.unwrap();
        Self {
            relay,
            session,
            factory,
            events,
            link,
            transport,
        }
    }

    fn fake(&self) -> Arc<FakeTransport> {
        self.factory.transports()[0].clone()
    }

    async fn sent_to(&self, peer: &Id) -> Vec<Value> {
        self.session.flush().await.unwrap();
        self.relay.drain(peer)
    }

    async fn feed_events(&mut self, negotiator: &mut Negotiator) -> Vec<NegotiatorUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Ok(Some(update)) = negotiator.handle_event(event).await {
                updates.push(update);
            }
        }
        updates
    }
}

#[tokio::test]
async fn test_candidates_wait_for_remote_description() {
    init_tracing();

    let mut fx = Fixture::new(FakeFactory::new()).await;
    let caller = id("caller");
    let mut negotiator = Negotiator::responder(
        fx.link,
        Some(caller.clone()),
        fx.transport.clone(),
        fx.session.clone(),
    );
    assert_eq!(negotiator.phase(), Phase::AwaitingRemote);

    negotiator.handle_signal(&caller, candidate("c1")).await.unwrap();
    negotiator.handle_signal(&caller, candidate("c2")).await.unwrap();
    assert!(fx.fake().ops().is_empty());

    negotiator
        .handle_signal(&caller, SignalData::Offer { sdp: "v=0 remote".into() })
        .await
        .unwrap();
    assert_eq!(negotiator.phase(), Phase::Negotiating);

    assert_eq!(
        fx.fake().ops(),
        vec![
            Op::SetRemote(SdpKind::Offer),
            Op::AddCandidate("c1".into()),
            Op::AddCandidate("c2".into()),
            Op::CreateAnswer,
            Op::SetLocal(SdpKind::Answer),
        ]
    );

    negotiator.handle_signal(&caller, candidate("c3")).await.unwrap();
    assert_eq!(fx.fake().ops().last(), Some(&Op::AddCandidate("c3".into())));

    let sent = fx.sent_to(&caller).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "signal");
    assert_eq!(sent[0]["data"]["type"], "answer");

    let updates = fx.feed_events(&mut negotiator).await;
    assert!(matches!(updates[0], NegotiatorUpdate::Connected));
    assert_eq!(negotiator.phase(), Phase::Connected);
}

#[tokio::test]
async fn test_unbound_responder_holds_local_candidates() {
    init_tracing();

    let mut fx = Fixture::new(FakeFactory::new()).await;
    let caller = id("caller");
    let mut negotiator =
        Negotiator::responder(fx.link, None, fx.transport.clone(), fx.session.clone());

    let early = IceCandidate {
        candidate: "early".into(),
        sdp_mid: None,
        sdp_m_line_index: None,
        username_fragment: None,
    };
    negotiator
        .handle_event(TransportEvent::CandidateGenerated(fx.link, early))
        .await
        .unwrap();
    assert!(fx.sent_to(&caller).await.is_empty());

    negotiator
        .handle_signal(&caller, SignalData::Offer { sdp: "v=0 remote".into() })
        .await
        .unwrap();
    assert_eq!(negotiator.peer(), Some(&caller));

    let sent = fx.sent_to(&caller).await;
    assert_eq!(
        sent[0],
        json!({
            "type": "signal",
            "from": "me",
            "data": {"type": "icecandidate", "candidate": {"candidate": "early"}}
        })
    );
    assert_eq!(sent[1]["data"]["type"], "answer");

    fx.feed_events(&mut negotiator).await;
    let sent = fx.sent_to(&caller).await;
    assert_eq!(
        sent[0]["data"]["candidate"]["candidate"],
        FakeTransport::candidate_name(fx.link)
    );
}

#[tokio::test]
async fn test_other_senders_are_ignored_once_bound() {
    init_tracing();

    let fx = Fixture::new(FakeFactory::new()).await;
    let caller = id("caller");
    let mut negotiator = Negotiator::responder(
        fx.link,
        Some(caller.clone()),
        fx.transport.clone(),
        fx.session.clone(),
    );

    negotiator
        .handle_signal(&id("intruder"), SignalData::Offer { sdp: "v=0 evil".into() })
        .await
        .unwrap();

    assert!(fx.fake().ops().is_empty());
    assert_eq!(negotiator.phase(), Phase::AwaitingRemote);
}

#[tokio::test]
async fn test_initiator_offer_then_answer() {
    init_tracing();

    let mut fx = Fixture::new(FakeFactory::new()).await;
    let callee = id("callee");
    let mut negotiator =
        Negotiator::initiator(fx.link, callee.clone(), fx.transport.clone(), fx.session.clone());
    assert_eq!(negotiator.phase(), Phase::Idle);

    negotiator.start().await.unwrap();
    assert_eq!(negotiator.phase(), Phase::AwaitingRemote);

    let sent = fx.sent_to(&callee).await;
    assert_eq!(sent[0]["data"]["type"], "offer");

    negotiator
        .handle_signal(&callee, SignalData::Answer { sdp: "v=0 answer".into() })
        .await
        .unwrap();
    assert_eq!(negotiator.phase(), Phase::Negotiating);

    // a second answer changes nothing
    negotiator
        .handle_signal(&callee, SignalData::Answer { sdp: "v=0 again".into() })
        .await
        .unwrap();
    let remote_sets = fx
        .fake()
        .ops()
        .iter()
        .filter(|op| matches!(op, Op::SetRemote(_)))
        .count();
    assert_eq!(remote_sets, 1);

    let updates = fx.feed_events(&mut negotiator).await;
    assert!(matches!(updates[0], NegotiatorUpdate::Connected));
    assert!(matches!(&updates[1], NegotiatorUpdate::Track(t) if t.kind == "video"));
    assert_eq!(negotiator.remote_tracks().len(), 1);
}

#[tokio::test]
async fn test_rejected_answer_fails_negotiation() {
    init_tracing();

    let fx = Fixture::new(FakeFactory::rejecting()).await;
    let callee = id("callee");
    let mut negotiator =
        Negotiator::initiator(fx.link, callee.clone(), fx.transport.clone(), fx.session.clone());
    negotiator.start().await.unwrap();

    let err = negotiator
        .handle_signal(&callee, SignalData::Answer { sdp: "v=0 answer".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::Transport(_)));
    assert_eq!(negotiator.phase(), Phase::Failed);

    // a failed negotiator stays inert
    negotiator.handle_signal(&callee, candidate("late")).await.unwrap();
    assert!(!fx.fake().ops().contains(&Op::AddCandidate("late".into())));
}

#[tokio::test]
async fn test_disconnect_fails_negotiation() {
    let fx = Fixture::new(FakeFactory::new()).await;
    let mut negotiator =
        Negotiator::initiator(fx.link, id("callee"), fx.transport.clone(), fx.session.clone());

    let err = negotiator
        .handle_event(TransportEvent::Disconnected(fx.link))
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::Failed(_)));
    assert!(negotiator.is_failed());
}

#[tokio::test]
async fn test_deadline_runs_only_while_waiting_on_a_peer() {
    init_tracing();

    let fx = Fixture::new(FakeFactory::new()).await;
    let mut unbound =
        Negotiator::responder(fx.link, None, fx.transport.clone(), fx.session.clone());
    assert!(unbound.deadline().is_none());

    unbound
        .handle_signal(&id("caller"), SignalData::Offer { sdp: "v=0 remote".into() })
        .await
        .unwrap();
    assert!(unbound.deadline().is_some());

    let mut caller = Negotiator::initiator(
        fx.link,
        id("absent"),
        fx.transport.clone(),
        fx.session.clone(),
    );
    assert!(caller.deadline().is_none());
    caller.start().await.unwrap();
    assert!(caller.deadline().is_some());

    let err = caller.expire();
    assert!(matches!(err, NegotiationError::Failed(_)));
    assert_eq!(caller.phase(), Phase::Failed);
    assert!(caller.deadline().is_none());
}
