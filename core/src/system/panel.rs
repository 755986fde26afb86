//! Minimal operator status snapshot. Not part of the game protocol: no client or
//! peer ever reads this, it just gives an operator a way to see live
//! stage/session/peer counts without attaching a debugger, the same spirit
//! as `enlist_handler`'s plain-text room listing.

use std::sync::Arc;

use crate::client_edge::ClientSessionRegistry;
use crate::discovery::ServerInfoCenter;
use crate::stage::actor::BoxFuture;
use crate::stage::PlayDispatcher;

#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub nid: String,
    pub stage_count: usize,
    pub actor_count: u32,
    pub client_session_count: usize,
    pub known_peer_count: usize,
}

impl std::fmt::Display for NodeSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "nid: {:<12} stages: {:<6} actors: {:<6} client sessions: {:<6} known peers: {}",
            self.nid, self.stage_count, self.actor_count, self.client_session_count, self.known_peer_count,
        )
    }
}

/// Game hosts never implement this; it exists purely so the admin route can
/// be assembled once in bootstrap without hard-coding a Play node's fields.
pub trait ISystemPanel: Send + Sync {
    fn snapshot<'a>(&'a self) -> BoxFuture<'a, NodeSnapshot>;
}

/// Default panel a Play node wires up for itself.
pub struct PlaySystemPanel {
    nid: protocol::Nid,
    dispatcher: Arc<PlayDispatcher>,
    client_sessions: Option<Arc<ClientSessionRegistry>>,
    server_info: Arc<ServerInfoCenter>,
}

impl PlaySystemPanel {
    pub fn new(
        nid: protocol::Nid,
        dispatcher: Arc<PlayDispatcher>,
        client_sessions: Option<Arc<ClientSessionRegistry>>,
        server_info: Arc<ServerInfoCenter>,
    ) -> Self {
        Self { nid, dispatcher, client_sessions, server_info }
    }
}

impl ISystemPanel for PlaySystemPanel {
    fn snapshot<'a>(&'a self) -> BoxFuture<'a, NodeSnapshot> {
        Box::pin(async move {
            let known_peer_count = self.server_info.get_servers().await.len();
            NodeSnapshot {
                nid: self.nid.to_string(),
                stage_count: self.dispatcher.stage_count(),
                actor_count: self.dispatcher.actor_count(),
                client_session_count: self.client_sessions.as_ref().map(|s| s.len()).unwrap_or(0),
                known_peer_count,
            }
        })
    }
}
