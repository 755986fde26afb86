//! Exercises this binary's own wiring path — `NodeOptions` parsed from TOML
//! text the same way `main` reads its config file, then handed to
//! `PlayNode::bootstrap` — end to end, plus one Stage registered and routed
//! through exactly as an embedder would before calling `run`.

use std::sync::Arc;

use playhouse_core::bootstrap::{play::in_memory_registry, NodeOptions, PlayNode};
use playhouse_core::stage::actor::{ActorFactory, BoxFuture, IActor, IStage, StageFactory};
use protocol::base_commands::{CreateStageReq, MSG_CREATE_STAGE};
use protocol::{Nid, Payload, RoutePacket};

struct EmptyStage;

impl IStage for EmptyStage {
    fn on_create<'a>(&'a mut self, _payload: &'a Payload) -> BoxFuture<'a, (bool, Option<Payload>)> {
        Box::pin(async { (true, None) })
    }

    fn on_join_stage<'a>(&'a mut self, _actor: &'a mut dyn IActor, _sender: &'a playhouse_core::senders::ActorSender) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn on_dispatch_actor<'a>(&'a mut self, _actor: &'a mut dyn IActor, _packet: &'a protocol::ClientPacket) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

struct EmptyActor;

impl IActor for EmptyActor {
    fn on_authenticate<'a>(&'a mut self, _auth_payload: &'a Payload, _sender: &'a playhouse_core::senders::ActorSender) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
}

#[tokio::test]
async fn bootstraps_from_toml_and_routes_a_create_stage() {
    let options = NodeOptions::from_toml_str(
        r#"
        service_id = 11
        server_id = 1
        bind_endpoint = "tcp://127.0.0.1:0"
        "#,
    )
    .unwrap();

    let node = PlayNode::bootstrap(&options, in_memory_registry());
    assert_eq!(node.self_nid, options.self_nid());

    let stage_factory: StageFactory = Arc::new(|| Box::new(EmptyStage) as Box<dyn IStage>);
    let actor_factory: ActorFactory = Arc::new(|| Box::new(EmptyActor) as Box<dyn IActor>);
    node.register_stage_type("smoke", stage_factory, actor_factory);

    let req = CreateStageReq {
        stage_type: "smoke".to_string(),
        stage_id: 1,
        payload_id: String::new(),
        payload: Payload::Empty,
    };
    let mut packet = RoutePacket::with_typed_payload(Nid::new(2, 1), options.service_id, MSG_CREATE_STAGE, 1, &req).unwrap();
    packet.route_header.is_base = true;
    node.dispatcher.route(packet);

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while node.dispatcher.stage_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "stage was never created");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
