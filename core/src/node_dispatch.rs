//! Node Dispatch Entry: the single inbound consumer every node runs on top
//! of its `MeshTransport`. Classifies each received
//! `RoutePacket` and hands it to exactly one of: the request cache (a
//! reply to something we're awaiting), the client session registry (a push
//! meant for a socket this node terminates), the system dispatcher, or the
//! node-type-specific dispatcher (`Play` or `Api`).

use std::sync::Arc;

use protocol::RoutePacket;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use crate::client_edge::ClientSessionRegistry;
use crate::request_cache::RequestCache;
use crate::stage::PlayDispatcher;
use crate::system::SystemDispatcher;

/// One node hosts exactly one of these roles; which applies decides the final branch of dispatch.
pub enum NodeRole {
    Play(Arc<PlayDispatcher>),
    Api(Arc<crate::api::ApiDispatcher>),
}

pub struct NodeDispatch {
    request_cache: Arc<RequestCache>,
    system: Arc<SystemDispatcher>,
    client_sessions: Option<Arc<ClientSessionRegistry>>,
    role: NodeRole,
}

impl NodeDispatch {
    pub fn new(
        request_cache: Arc<RequestCache>,
        system: Arc<SystemDispatcher>,
        client_sessions: Option<Arc<ClientSessionRegistry>>,
        role: NodeRole,
    ) -> Self {
        Self {
            request_cache,
            system,
            client_sessions,
            role,
        }
    }

    /// Drains `inbound_rx` for the lifetime of the node. Each branch either
    /// resolves synchronously (reply correlation, client push) or spawns its
    /// own task (system/Play/Api dispatch), so this loop never blocks on a
    /// single packet's handler.
    pub async fn run(self: Arc<Self>, mut inbound_rx: UnboundedReceiver<RoutePacket>) {
        while let Some(packet) = inbound_rx.recv().await {
            self.dispatch(packet);
        }
    }

    fn dispatch(&self, packet: RoutePacket) {
        let header = &packet.route_header;

        if header.is_backend && header.is_reply {
            self.request_cache.on_reply(packet);
            return;
        }

        if header.is_to_client {
            let sid = header.sid;
            let frame = match packet.payload {
                protocol::Payload::Bytes(bytes) => bytes,
                protocol::Payload::Empty => bytes::Bytes::new(),
            };
            if let Some(sessions) = &self.client_sessions {
                if !sessions.deliver(sid, frame) {
                    warn!(sid, "isToClient packet for a session no longer live on this node");
                }
            } else {
                warn!(sid, "isToClient packet received on a node with no client edge");
            }
            return;
        }

        if header.is_system {
            self.system.route(packet);
            return;
        }

        match &self.role {
            NodeRole::Play(dispatcher) => dispatcher.route(packet),
            NodeRole::Api(dispatcher) => dispatcher.route(packet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_edge::ClientSessionRegistry;
    use crate::mesh::MeshTransport;
    use protocol::{Header, Nid, Payload, RouteHeader};
    use std::time::Duration;

    fn sample_header(is_backend: bool, is_reply: bool, is_to_client: bool, is_system: bool) -> RouteHeader {
        RouteHeader {
            header: Header::new(1, "Echo", 0),
            from: Nid::new(1, 1),
            sid: 42,
            account_id: String::new(),
            is_system,
            is_base: false,
            is_backend,
            is_reply,
            is_to_client,
        }
    }

    fn sample_packet(header: RouteHeader) -> RoutePacket {
        RoutePacket { route_header: header, payload: Payload::Empty }
    }

    fn test_dispatch() -> (Arc<NodeDispatch>, Arc<RequestCache>, Arc<ClientSessionRegistry>) {
        let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = Arc::new(MeshTransport::bind(Nid::new(9, 9), "inproc://node-dispatch-test", inbound_tx).unwrap());
        let request_cache = Arc::new(RequestCache::new());
        let system = Arc::new(SystemDispatcher::new(Nid::new(9, 9), 1, transport.clone()));
        let sessions = Arc::new(ClientSessionRegistry::new());
        let dispatch = Arc::new(NodeDispatch::new(
            request_cache.clone(),
            system,
            Some(sessions.clone()),
            NodeRole::Play(Arc::new(PlayDispatcher::new(Nid::new(9, 9), 1, transport, request_cache.clone(), Duration::from_secs(1), 1))),
        ));
        (dispatch, request_cache, sessions)
    }

    #[tokio::test]
    async fn backend_reply_goes_to_request_cache() {
        let (dispatch, request_cache, _sessions) = test_dispatch();
        let seq = request_cache.next_sequence();
        let rx = request_cache.put(seq, Duration::from_secs(5));
        let mut header = sample_header(true, true, false, false);
        header.header.msg_seq = seq;
        dispatch.dispatch(sample_packet(header));
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, crate::request_cache::ReplyOutcome::Packet(_)));
    }

    #[tokio::test]
    async fn to_client_packet_is_delivered_by_sid() {
        let (dispatch, _request_cache, sessions) = test_dispatch();
        let (sid, mut rx) = sessions.allocate(8);
        let mut header = sample_header(false, false, true, false);
        header.sid = sid;
        dispatch.dispatch(sample_packet(header));
        let frame = rx.recv().await.unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn to_client_packet_for_dead_session_is_dropped_without_panic() {
        let (dispatch, _request_cache, _sessions) = test_dispatch();
        let header = sample_header(false, false, true, false);
        dispatch.dispatch(sample_packet(header));
    }
}
