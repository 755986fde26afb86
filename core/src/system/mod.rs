//! System Dispatcher: host-registered handlers for cluster-control traffic
//! (`isSystem` packets). Structurally the same
//! request/response shape as the API Dispatcher, just addressed by
//! `isSystem` instead of node type, and with no Stage or client involved.

pub mod panel;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use protocol::{ErrorCode, Nid, RoutePacket};
use tracing::warn;

use crate::mesh::MeshTransport;
use crate::stage::actor::BoxFuture;

pub type SystemHandler = Arc<dyn Fn(RoutePacket) -> BoxFuture<'static, ()> + Send + Sync>;

/// Where a host registers its `msgId -> handler` table for cluster-control
/// messages (shutdown, admin pause/resume, etc) at startup.
pub trait ISystemRegister: Send {
    fn register(&mut self, msg_id: &str, handler: SystemHandler);
}

pub struct SystemDispatcher {
    self_nid: Nid,
    service_id: u32,
    transport: Arc<MeshTransport>,
    handlers: DashMap<String, SystemHandler>,
}

impl SystemDispatcher {
    pub fn new(self_nid: Nid, service_id: u32, transport: Arc<MeshTransport>) -> Self {
        Self {
            self_nid,
            service_id,
            transport,
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, msg_id: impl Into<String>, handler: SystemHandler) {
        self.handlers.insert(msg_id.into(), handler);
    }

    /// Routes a system packet. Spawns one task per packet so a slow handler
    /// never blocks mesh dispatch of unrelated traffic.
    pub fn route(self: &Arc<Self>, packet: RoutePacket) {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.handle(packet).await });
    }

    async fn handle(&self, packet: RoutePacket) {
        let header = packet.route_header.clone();
        let msg_id = header.msg_id().to_string();
        let msg_seq = header.msg_seq();

        let Some(handler) = self.handlers.get(&msg_id).map(|h| h.clone()) else {
            warn!(msg_id, "no system handler registered");
            if msg_seq > 0 {
                self.reply(&header, ErrorCode::NotRegisteredMessage);
            }
            return;
        };

        let result = AssertUnwindSafe(handler(packet)).catch_unwind().await;
        if let Err(panic) = result {
            let message = panic_message(&panic);
            warn!(msg_id, error = %message, "system handler panicked");
            if msg_seq > 0 {
                self.reply(&header, ErrorCode::UncheckedContentsError);
            }
        }
    }

    fn reply(&self, source: &protocol::RouteHeader, error_code: ErrorCode) {
        let reply = RoutePacket::reply_of(self.self_nid, self.service_id, source, error_code, None);
        self.transport.send(source.from, reply);
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
