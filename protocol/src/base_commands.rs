//! Framework-level (`is_base`) request/response payloads dispatched by
//! `BaseStageCmdHandler`. These are ordinary postcard-encoded
//! payloads carried inside a [`crate::route_packet::RoutePacket`].

use serde::{Deserialize, Serialize};

use crate::ids::Nid;
use crate::payload::Payload;

pub const MSG_CREATE_STAGE: &str = "@CreateStage@";
pub const MSG_GET_OR_CREATE_STAGE: &str = "@GetOrCreateStage@";
pub const MSG_JOIN_STAGE: &str = "@JoinStage@";
pub const MSG_DISCONNECT_NOTICE: &str = "@DisconnectNotice@";
pub const MSG_RECONNECT_NOTICE: &str = "@ReconnectNotice@";
pub const MSG_DESTROY_STAGE: &str = "@DestroyStage@";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStageReq {
    pub stage_type: String,
    pub stage_id: i64,
    pub payload_id: String,
    #[serde(with = "payload_bytes")]
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStageRes {
    pub ok: bool,
    pub payload_id: String,
    #[serde(with = "payload_bytes")]
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOrCreateStageReq {
    pub stage_type: String,
    pub stage_id: i64,
    pub create: CreateStagePacket,
    /// Advisory only: the existing-stage path does not consume this.
    pub join: Option<JoinStagePacket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStagePacket {
    pub payload_id: String,
    #[serde(with = "payload_bytes")]
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinStagePacket {
    pub auth_payload_id: String,
    #[serde(with = "payload_bytes")]
    pub auth_payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOrCreateStageRes {
    pub ok: bool,
    pub is_created: bool,
    pub payload_id: String,
    #[serde(with = "payload_bytes")]
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinStageReq {
    pub auth_payload_id: String,
    #[serde(with = "payload_bytes")]
    pub auth_payload: Payload,
    pub session_nid: Nid,
    pub sid: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinStageRes {
    pub ok: bool,
    /// The account id the Actor settled on in `onAuthenticate`, so the client
    /// edge can stamp it onto every subsequent packet for this session
    /// without the Stage having to push it back out-of-band.
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectNotice {
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectNotice {
    pub account_id: String,
    pub new_session_nid: Nid,
    pub new_sid: i64,
    /// Re-submitted auth payload from the new socket; `onAuthenticate` runs
    /// again against it.
    pub auth_payload_id: String,
    #[serde(with = "payload_bytes")]
    pub auth_payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectRes {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyStage;

/// `serde(with = ...)` shim so `Payload` (which wraps `Bytes`, chosen for
/// cheap zero-copy sharing, not for a derivable serde impl) can sit inside
/// postcard-encoded structs as a plain byte vector.
mod payload_bytes {
    use super::Payload;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(p: &Payload, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(p.as_slice())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Payload, D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(d)?;
        Ok(if bytes.is_empty() {
            Payload::Empty
        } else {
            Payload::from(bytes)
        })
    }
}
