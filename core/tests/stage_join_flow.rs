//! End-to-end exercise of `PlayDispatcher::route` against a registered Stage
//! type: CreateStage bootstraps the Stage, GetOrCreateStage against the same
//! id is a no-op, and JoinStage runs an Actor all the way through
//! `onAuthenticate`/`onJoinStage` and into the Stage's actor map. Drives the
//! same public entry point `node_dispatch::NodeDispatch` hands packets to,
//! rather than poking at `Stage` internals directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use playhouse_core::mesh::MeshTransport;
use playhouse_core::request_cache::RequestCache;
use playhouse_core::senders::ActorSender;
use playhouse_core::stage::actor::{ActorFactory, BoxFuture, IActor, IStage, StageFactory};
use playhouse_core::stage::PlayDispatcher;
use protocol::base_commands::{
    CreateStageReq, GetOrCreateStageReq, JoinStageReq, CreateStagePacket,
    MSG_CREATE_STAGE, MSG_GET_OR_CREATE_STAGE, MSG_JOIN_STAGE,
};
use protocol::{AccountId, Nid, Payload, RoutePacket};

const SERVICE_ID: u32 = 7;
const STAGE_TYPE: &str = "lobby";

struct RecordingStage {
    joins: Arc<AtomicUsize>,
}

impl IStage for RecordingStage {
    fn on_create<'a>(&'a mut self, _payload: &'a Payload) -> BoxFuture<'a, (bool, Option<Payload>)> {
        Box::pin(async { (true, None) })
    }

    fn on_join_stage<'a>(&'a mut self, _actor: &'a mut dyn IActor, _sender: &'a ActorSender) -> BoxFuture<'a, bool> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { true })
    }

    fn on_dispatch_actor<'a>(&'a mut self, _actor: &'a mut dyn IActor, _packet: &'a protocol::ClientPacket) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

struct RecordingActor;

impl IActor for RecordingActor {
    fn on_authenticate<'a>(&'a mut self, _auth_payload: &'a Payload, sender: &'a ActorSender) -> BoxFuture<'a, bool> {
        sender.set_account_id(AccountId::from("player-1"));
        Box::pin(async { true })
    }
}

fn create_stage_packet(from: Nid, stage_id: i64) -> RoutePacket {
    let req = CreateStageReq {
        stage_type: STAGE_TYPE.to_string(),
        stage_id,
        payload_id: String::new(),
        payload: Payload::Empty,
    };
    let mut packet = RoutePacket::with_typed_payload(from, SERVICE_ID, MSG_CREATE_STAGE, stage_id, &req).unwrap();
    packet.route_header.is_base = true;
    packet
}

fn get_or_create_stage_packet(from: Nid, stage_id: i64) -> RoutePacket {
    let req = GetOrCreateStageReq {
        stage_type: STAGE_TYPE.to_string(),
        stage_id,
        create: CreateStagePacket { payload_id: String::new(), payload: Payload::Empty },
        join: None,
    };
    let mut packet = RoutePacket::with_typed_payload(from, SERVICE_ID, MSG_GET_OR_CREATE_STAGE, stage_id, &req).unwrap();
    packet.route_header.is_base = true;
    packet
}

fn join_stage_packet(from: Nid, stage_id: i64) -> RoutePacket {
    let req = JoinStageReq {
        auth_payload_id: String::new(),
        auth_payload: Payload::Empty,
        session_nid: from,
        sid: 42,
    };
    let mut packet = RoutePacket::with_typed_payload(from, SERVICE_ID, MSG_JOIN_STAGE, stage_id, &req).unwrap();
    packet.route_header.is_base = true;
    packet
}

/// Polls `f` until it returns `true` or the deadline passes, since Stage
/// turns run on a spawned consumer task rather than inline with `route`.
async fn wait_until(mut f: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !f() {
        assert!(tokio::time::Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn create_join_and_duplicate_get_or_create_flow() {
    let self_nid = Nid::new(1, 1);
    let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Arc::new(MeshTransport::bind(self_nid, "inproc://stage-join-flow", inbound_tx).unwrap());
    let request_cache = Arc::new(RequestCache::new());
    let dispatcher = Arc::new(PlayDispatcher::new(self_nid, SERVICE_ID, transport, request_cache, Duration::from_secs(5), 1));

    let joins = Arc::new(AtomicUsize::new(0));
    let stage_factory: StageFactory = {
        let joins = joins.clone();
        Arc::new(move || Box::new(RecordingStage { joins: joins.clone() }) as Box<dyn IStage>)
    };
    let actor_factory: ActorFactory = Arc::new(|| Box::new(RecordingActor) as Box<dyn IActor>);
    dispatcher.register_stage_type(STAGE_TYPE, stage_factory, actor_factory);

    let peer = Nid::new(2, 1);
    let stage_id = 100;

    dispatcher.route(create_stage_packet(peer, stage_id));
    wait_until(|| dispatcher.stage_count() == 1).await;

    // A GetOrCreateStage against the now-existing id must not spawn a second Stage.
    dispatcher.route(get_or_create_stage_packet(peer, stage_id));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dispatcher.stage_count(), 1);

    dispatcher.route(join_stage_packet(peer, stage_id));
    wait_until(|| joins.load(Ordering::SeqCst) == 1).await;
    wait_until(|| dispatcher.actor_count() == 1).await;
}

#[tokio::test]
async fn packet_for_unknown_stage_is_dropped_without_creating_one() {
    let self_nid = Nid::new(1, 2);
    let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Arc::new(MeshTransport::bind(self_nid, "inproc://stage-join-flow-unknown", inbound_tx).unwrap());
    let request_cache = Arc::new(RequestCache::new());
    let dispatcher = Arc::new(PlayDispatcher::new(self_nid, SERVICE_ID, transport, request_cache, Duration::from_secs(5), 1));

    dispatcher.route(join_stage_packet(Nid::new(2, 1), 999));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dispatcher.stage_count(), 0);
}
