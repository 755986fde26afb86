//! API Dispatcher: stateless request/response handling on an API node
//!.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use protocol::{ClientPacket, ErrorCode, Nid, RoutePacket};
use tracing::warn;

use crate::discovery::ServerInfoCenter;
use crate::mesh::MeshTransport;
use crate::request_cache::RequestCache;
use crate::senders::context::{SenderCore, with_current_header};
use crate::senders::{ApiSender, ISender};
use crate::stage::actor::BoxFuture;

pub type ApiHandler = Arc<dyn Fn(ClientPacket, Arc<ApiSender>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Where a host's `IApiController` registers its `msgId -> handler` table
/// at startup.
pub trait IHandlerRegister: Send {
    fn register(&mut self, msg_id: &str, handler: ApiHandler);
}

/// Game-supplied: one implementation per API node, wiring every message id
/// it answers for.
pub trait IApiController: Send + Sync {
    fn handles(&self, register: &mut dyn IHandlerRegister);
}

pub struct ApiDispatcher {
    self_nid: Nid,
    service_id: u32,
    transport: Arc<MeshTransport>,
    request_cache: Arc<RequestCache>,
    request_timeout: Duration,
    server_info: Arc<ServerInfoCenter>,
    handlers: DashMap<String, ApiHandler>,
}

impl ApiDispatcher {
    pub fn new(
        self_nid: Nid,
        service_id: u32,
        transport: Arc<MeshTransport>,
        request_cache: Arc<RequestCache>,
        request_timeout: Duration,
        server_info: Arc<ServerInfoCenter>,
    ) -> Self {
        Self {
            self_nid,
            service_id,
            transport,
            request_cache,
            request_timeout,
            server_info,
            handlers: DashMap::new(),
        }
    }

    fn build_sender(&self) -> ApiSender {
        let core = SenderCore::new(
            self.self_nid,
            self.service_id,
            self.transport.clone(),
            self.request_cache.clone(),
            self.request_timeout,
        );
        ApiSender::new(core, self.server_info.clone())
    }

    /// Routes a non-reply, non-system packet addressed to this API node.
    /// Spawns one task per packet so a slow or panicking handler never
    /// blocks another's dispatch.
    pub fn route(self: &Arc<Self>, packet: RoutePacket) {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.handle(packet).await });
    }

    async fn handle(&self, packet: RoutePacket) {
        let header = packet.route_header.clone();
        let msg_id = header.msg_id().to_string();
        let msg_seq = header.msg_seq();

        let Some(handler) = self.handlers.get(&msg_id).map(|h| h.clone()) else {
            warn!(msg_id, "no API handler registered");
            if msg_seq > 0 {
                self.reply_unrouted(&header, ErrorCode::NotRegisteredMessage);
            }
            return;
        };

        let client_packet = ClientPacket {
            msg_id: msg_id.clone(),
            msg_seq,
            stage_id: header.stage_id(),
            error_code: header.error_code(),
            payload: packet.payload,
        };
        let sender = Arc::new(self.build_sender());

        let result = AssertUnwindSafe(with_current_header(header.clone(), async {
            handler(client_packet, sender).await
        }))
        .catch_unwind()
        .await;

        if let Err(panic) = result {
            let message = panic_message(&panic);
            warn!(msg_id, error = %message, "API handler panicked");
            if msg_seq > 0 {
                self.reply_unrouted(&header, ErrorCode::UncheckedContentsError);
            }
        }
    }

    fn reply_unrouted(&self, source: &protocol::RouteHeader, error_code: ErrorCode) {
        let reply = RoutePacket::reply_of(self.self_nid, self.service_id, source, error_code, None);
        self.transport.send(source.from, reply);
    }
}

impl IHandlerRegister for ApiDispatcher {
    fn register(&mut self, msg_id: &str, handler: ApiHandler) {
        self.handlers.insert(msg_id.to_string(), handler);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
