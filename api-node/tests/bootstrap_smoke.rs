//! Exercises this binary's own wiring path — `NodeOptions` parsed from TOML
//! text, a controller that registers one handler, then `ApiNode::bootstrap`
//! — and confirms a packet addressed to that handler reaches it.

use std::sync::{Arc, Mutex};

use playhouse_core::api::{IApiController, IHandlerRegister};
use playhouse_core::bootstrap::{api::in_memory_registry, ApiNode, NodeOptions};
use protocol::{Nid, Payload, RoutePacket};

struct RecordingController {
    seen: Arc<Mutex<Vec<String>>>,
}

impl IApiController for RecordingController {
    fn handles(&self, register: &mut dyn IHandlerRegister) {
        let seen = self.seen.clone();
        register.register(
            "@Ping@",
            Arc::new(move |_packet, _sender| {
                seen.lock().unwrap().push("@Ping@".to_string());
                Box::pin(async {})
            }),
        );
    }
}

#[tokio::test]
async fn bootstraps_from_toml_and_dispatches_to_registered_handler() {
    let options = NodeOptions::from_toml_str(
        r#"
        service_id = 12
        server_id = 1
        bind_endpoint = "tcp://127.0.0.1:0"
        "#,
    )
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let controller = RecordingController { seen: seen.clone() };
    let node = ApiNode::bootstrap(&options, in_memory_registry(), &controller);
    assert_eq!(node.self_nid, options.self_nid());

    let mut packet = RoutePacket::of(Nid::new(2, 1), options.service_id, "@Ping@", 0, Payload::Empty);
    packet.route_header.is_base = true;
    node.dispatcher.route(packet);

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while seen.lock().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "handler was never invoked");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
