//! [`Header`] and [`RouteHeader`] — the wire envelope for every message that
//! crosses the mesh.

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, Nid};

/// Application-level header. `msg_id` must be at most 255 UTF-8 bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub service_id: u32,
    pub msg_id: String,
    pub msg_seq: u16,
    pub error_code: u16,
    pub stage_id: i64,
}

impl Header {
    pub fn new(service_id: u32, msg_id: impl Into<String>, stage_id: i64) -> Self {
        Self {
            service_id,
            msg_id: msg_id.into(),
            msg_seq: 0,
            error_code: 0,
            stage_id,
        }
    }
}

/// Mesh-level header. `from` is filled in by the receiver from the
/// transport identity frame and must never be trusted from the wire bytes —
/// see [`RouteHeader::stamp_sender`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteHeader {
    pub header: Header,
    /// Sender NID. Overwritten on receive by the router-socket identity frame.
    pub from: Nid,
    pub sid: i64,
    pub account_id: AccountId,
    pub is_system: bool,
    pub is_base: bool,
    pub is_backend: bool,
    pub is_reply: bool,
    pub is_to_client: bool,
}

impl RouteHeader {
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_seq(&self) -> u16 {
        self.header.msg_seq
    }

    pub fn stage_id(&self) -> i64 {
        self.header.stage_id
    }

    pub fn error_code(&self) -> u16 {
        self.header.error_code
    }

    /// Overrides `from` with the identity carried by the transport's router
    /// frame. Called exactly once, by the mesh receive loop, never by
    /// application code.
    pub fn stamp_sender(&mut self, sender: Nid) {
        self.from = sender;
    }
}
