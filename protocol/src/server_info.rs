//! Node metadata exchanged through discovery.

use serde::{Deserialize, Serialize};

use crate::ids::Nid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    Play,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Running,
    Pause,
    Disable,
}

/// Snapshot of a node as seen by the mesh. `last_update_millis` is stamped
/// by the receiving [`crate::ids::StageIdGenerator`]'s clock source, not the
/// sender's, so skew between nodes never appears in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub bind_endpoint: String,
    pub nid: Nid,
    pub service_id: u32,
    pub service_type: ServiceType,
    pub state: ServerState,
    pub actor_count: u32,
    pub last_update_millis: i64,
}

impl ServerInfo {
    pub fn is_routable(&self) -> bool {
        matches!(self.state, ServerState::Running)
    }
}
