//! Client Edge: session bookkeeping and the TCP/WebSocket listeners that
//! terminate client sockets. Framing is transport-specific
//! ([`tcp`], [`ws`]); everything else here is shared.

pub mod tcp;
pub mod ws;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use protocol::base_commands::{DisconnectNotice, JoinStageReq, JoinStageRes, MSG_DISCONNECT_NOTICE, MSG_JOIN_STAGE};
use protocol::client_packet::MAX_BODY_SIZE;
use protocol::{AccountId, ClientPacket, ErrorCode, Nid, Payload, PlayHouseError, RoutePacket, SessionId};
use tokio::sync::mpsc;
use tracing::warn;

use crate::mesh::MeshTransport;
use crate::request_cache::RequestCache;
use crate::senders::context::SenderCore;

/// Options a host sets once at node startup.
#[derive(Debug, Clone)]
pub struct ClientEdgeConfig {
    pub service_id: u32,
    pub self_nid: Nid,
    /// `msgId` a freshly-connected socket's first frame must carry to be
    /// treated as an authentication attempt (anything else before that is
    /// rejected, except the heartbeat).
    pub authenticate_msg_id: String,
    pub idle_timeout: Duration,
    /// Expected cadence of client-sent heartbeats. Used as the read timeout
    /// while a session is still `Connected` (pre-authentication): a socket
    /// that hasn't sent anything within one heartbeat interval before it
    /// even authenticates is held to a tighter bound than `idle_timeout`,
    /// which governs eviction once a session is `Authenticated`.
    pub heart_beat_interval: Duration,
    pub request_timeout: Duration,
    /// Approximates a byte-based send high-water mark (`sendHighWatermark`)
    /// as a bounded channel depth, since the outbound channel here carries
    /// whole encoded frames rather than raw bytes.
    pub outbound_channel_depth: usize,
}

impl Default for ClientEdgeConfig {
    fn default() -> Self {
        Self {
            service_id: 0,
            self_nid: Nid::new(0, 0),
            authenticate_msg_id: "Authenticate".to_string(),
            idle_timeout: Duration::from_millis(30_000),
            heart_beat_interval: Duration::from_millis(10_000),
            request_timeout: Duration::from_millis(30_000),
            outbound_channel_depth: 1024,
        }
    }
}

/// Tracks every session live on this node so `isToClient` traffic can be handed off to the right socket's writer task purely by
/// `sid`, with no notion of "local vs remote" beyond that lookup.
#[derive(Default)]
pub struct ClientSessionRegistry {
    sessions: DashMap<SessionId, mpsc::Sender<Bytes>>,
    next_sid: AtomicI64,
}

impl ClientSessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_sid: AtomicI64::new(1),
        }
    }

    pub(crate) fn allocate(&self, depth: usize) -> (SessionId, mpsc::Receiver<Bytes>) {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(depth);
        self.sessions.insert(sid, tx);
        (sid, rx)
    }

    pub(crate) fn remove(&self, sid: SessionId) {
        self.sessions.remove(&sid);
    }

    /// Delivers a client-frame's bytes to `sid`'s writer task. Used by node
    /// dispatch for inbound `isToClient` packets; returns
    /// `false` if the session is no longer live on this node.
    pub fn deliver(&self, sid: SessionId, frame: Bytes) -> bool {
        let Some(tx) = self.sessions.get(&sid).map(|e| e.clone()) else {
            return false;
        };
        tx.try_send(frame).is_ok()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Shared driver behind both transports: authenticates the first frame into
/// a `JoinStage`, then forwards everything else as actor traffic to the
/// Stage the client joined.
pub struct ClientEdge {
    config: ClientEdgeConfig,
    transport: Arc<MeshTransport>,
    request_cache: Arc<RequestCache>,
    pub sessions: Arc<ClientSessionRegistry>,
}

impl ClientEdge {
    pub fn new(config: ClientEdgeConfig, transport: Arc<MeshTransport>, request_cache: Arc<RequestCache>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            request_cache,
            sessions: Arc::new(ClientSessionRegistry::new()),
        })
    }

    pub fn config(&self) -> &ClientEdgeConfig {
        &self.config
    }

    fn sender_core(&self) -> SenderCore {
        SenderCore::new(
            self.config.self_nid,
            self.config.service_id,
            self.transport.clone(),
            self.request_cache.clone(),
            self.config.request_timeout,
        )
    }

    /// Registers a fresh connection and returns the `(sid, outbound_rx)` pair
    /// the transport-specific writer task drains.
    pub fn open_session(&self) -> (SessionId, mpsc::Receiver<Bytes>) {
        self.sessions.allocate(self.config.outbound_channel_depth)
    }

    /// Unregisters `sid` and, if it had already joined a Stage, notifies that
    /// Stage of the disconnect. `binding` is `None` for a
    /// socket that closed before ever authenticating.
    pub fn close_session(&self, sid: SessionId, binding: Option<(AccountId, i64)>) {
        self.sessions.remove(sid);
        if let Some((account_id, stage_id)) = binding {
            self.disconnect_notice(&account_id, stage_id);
        } else {
            warn!(sid, "closing unauthenticated session");
        }
    }

    /// First authenticated frame from a newly-connected socket: turns it into
    /// a `JoinStageReq` against `frame.stage_id` and awaits the Stage's
    /// verdict. On success returns the account id the Stage settled on.
    pub async fn authenticate(
        &self,
        frame: &ClientPacket,
        session_nid: Nid,
        sid: SessionId,
    ) -> Result<AccountId, ErrorCode> {
        let req = JoinStageReq {
            auth_payload_id: frame.msg_id.clone(),
            auth_payload: frame.payload.clone(),
            session_nid,
            sid,
        };
        let payload = Payload::encode(&req).map_err(|_| ErrorCode::InvalidParameter)?;
        let packet = RoutePacket::stage_of(
            self.config.self_nid,
            self.config.service_id,
            MSG_JOIN_STAGE,
            frame.stage_id,
            AccountId::new(),
            payload,
            true,
            true,
        );

        let core = self.sender_core();
        let reply = core
            .request(self.config.self_nid, packet)
            .await
            .map_err(|e| e.error_code())?;

        if reply.route_header.error_code() != ErrorCode::Success.code() {
            return Err(ErrorCode::from_code(reply.route_header.error_code()).unwrap_or(ErrorCode::AuthenticationFailed));
        }
        let res: JoinStageRes = reply.decode_payload().map_err(|_| ErrorCode::SystemError)?;
        if !res.ok || res.account_id.is_empty() {
            return Err(ErrorCode::AuthenticationFailed);
        }
        Ok(res.account_id)
    }

    /// Routes an authenticated frame into the owning Stage as actor traffic.
    /// Fire-and-forget: any reply the game wants to send back travels through
    /// `ActorSender::send_to_client`, not through this request's reply slot.
    pub fn dispatch_frame(&self, frame: ClientPacket, account_id: &AccountId, sid: SessionId) {
        let mut packet = RoutePacket::stage_of(
            self.config.self_nid,
            self.config.service_id,
            frame.msg_id,
            frame.stage_id,
            account_id.clone(),
            frame.payload,
            false,
            true,
        );
        // Carried through so a game handler that wants to correlate its
        // `sendToClient` answer with this request can read it back off the
        // `ClientPacket` the Stage hands it.
        packet.route_header.header.msg_seq = frame.msg_seq;
        packet.route_header.sid = sid;
        self.transport.send(self.config.self_nid, packet);
    }

    pub fn disconnect_notice(&self, account_id: &AccountId, stage_id: i64) {
        let notice = DisconnectNotice { account_id: account_id.clone() };
        let payload = match Payload::encode(&notice) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode DisconnectNotice");
                return;
            }
        };
        let packet = RoutePacket::stage_of(
            self.config.self_nid,
            self.config.service_id,
            MSG_DISCONNECT_NOTICE,
            stage_id,
            account_id.clone(),
            payload,
            true,
            true,
        );
        self.transport.send(self.config.self_nid, packet);
    }
}

pub(crate) fn reject_oversized(len: usize) -> Result<(), PlayHouseError> {
    if len > MAX_BODY_SIZE {
        return Err(PlayHouseError::PayloadTooLarge(len, MAX_BODY_SIZE));
    }
    Ok(())
}

/// Builds the payload-less heartbeat echo both transports send straight back
/// to the writer task, never touching a Stage: same `msg_id`/`msg_seq` as the
/// client's `@Heart@Beat@`, success error code, empty body.
pub(crate) fn heartbeat_reply(msg_seq: u16) -> Option<Bytes> {
    let reply = ClientPacket::new(protocol::client_packet::MSG_HEARTBEAT, msg_seq, 0, Payload::Empty);
    match reply.encode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "failed to encode heartbeat reply");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_cache::RequestCache;

    #[test]
    fn allocate_assigns_distinct_growing_sids() {
        let registry = ClientSessionRegistry::new();
        let (first, _rx1) = registry.allocate(4);
        let (second, _rx2) = registry.allocate(4);
        assert!(second > first);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn deliver_reaches_the_right_session_and_leaves_others_untouched() {
        let registry = ClientSessionRegistry::new();
        let (sid_a, mut rx_a) = registry.allocate(4);
        let (_sid_b, mut rx_b) = registry.allocate(4);

        assert!(registry.deliver(sid_a, Bytes::from_static(b"hello")));
        assert_eq!(rx_a.try_recv().unwrap(), Bytes::from_static(b"hello"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn deliver_to_unknown_sid_reports_failure_without_panic() {
        let registry = ClientSessionRegistry::new();
        assert!(!registry.deliver(999, Bytes::from_static(b"lost")));
    }

    #[test]
    fn remove_drops_the_session_and_updates_len() {
        let registry = ClientSessionRegistry::new();
        let (sid, _rx) = registry.allocate(4);
        assert_eq!(registry.len(), 1);
        registry.remove(sid);
        assert!(registry.is_empty());
        assert!(!registry.deliver(sid, Bytes::from_static(b"gone")));
    }

    #[test]
    fn heartbeat_reply_echoes_msg_seq_with_an_empty_body() {
        let reply = heartbeat_reply(42).unwrap();
        let decoded = ClientPacket::decode(reply).unwrap();
        assert_eq!(decoded.msg_id, protocol::client_packet::MSG_HEARTBEAT);
        assert_eq!(decoded.msg_seq, 42);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn close_session_without_binding_just_drops_the_socket() {
        let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = Arc::new(
            MeshTransport::bind(Nid::new(1, 1), "inproc://client-edge-test", inbound_tx).unwrap(),
        );
        let request_cache = Arc::new(RequestCache::new());
        let edge = ClientEdge::new(ClientEdgeConfig::default(), transport, request_cache);
        let (sid, _rx) = edge.open_session();
        edge.close_session(sid, None);
        assert!(edge.sessions.is_empty());
    }
}
