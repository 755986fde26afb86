//! [`RoutePacket`] — the transport-level message and its factory functions
//!. `timer_of` / `async_post_of` are deliberately not factories
//! here: they never cross the wire, so they live as a plain Rust enum next
//! to the stage event loop (`playhouse_core::stage::Envelope`) instead of
//! being serialized RoutePackets wrapped around a callback.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ErrorCode;
use crate::header::{Header, RouteHeader};
use crate::ids::{AccountId, Nid};
use crate::payload::Payload;

/// Transport-level message: header plus its exclusively-owned payload.
/// Created by a sender, consumed exactly once by its receiver.
#[derive(Debug, Clone)]
pub struct RoutePacket {
    pub route_header: RouteHeader,
    pub payload: Payload,
}

impl RoutePacket {
    /// Wraps an application payload for a fresh outbound packet directed at
    /// a Stage, an API node, or the current request's origin — the caller
    /// fills in `from`/`sid`/`account_id` via the more specific factories
    /// below, or builds `RouteHeader` by hand for lower-level use.
    pub fn of(
        from: Nid,
        service_id: u32,
        msg_id: impl Into<String>,
        stage_id: i64,
        payload: Payload,
    ) -> Self {
        RoutePacket {
            route_header: RouteHeader {
                header: Header::new(service_id, msg_id, stage_id),
                from,
                sid: 0,
                account_id: AccountId::new(),
                is_system: false,
                is_base: false,
                is_backend: true,
                is_reply: false,
                is_to_client: false,
            },
            payload: payload,
        }
    }

    pub fn with_typed_payload<T: Serialize>(
        from: Nid,
        service_id: u32,
        msg_id: impl Into<String>,
        stage_id: i64,
        value: &T,
    ) -> Result<Self, postcard::Error> {
        Ok(Self::of(from, service_id, msg_id, stage_id, Payload::encode(value)?))
    }

    /// Builds the reply packet for a received request. Copies `msg_seq`,
    /// `sid`, `account_id`, `is_base`, `is_backend` from the source header.
    pub fn reply_of(
        from: Nid,
        service_id: u32,
        source: &RouteHeader,
        error_code: ErrorCode,
        payload: Option<Payload>,
    ) -> Self {
        let mut header = Header::new(service_id, source.msg_id().to_string(), source.stage_id());
        header.msg_seq = source.msg_seq();
        header.error_code = error_code.code();
        RoutePacket {
            route_header: RouteHeader {
                header,
                from,
                sid: source.sid,
                account_id: source.account_id.clone(),
                is_system: source.is_system,
                is_base: source.is_base,
                is_backend: source.is_backend,
                is_reply: true,
                is_to_client: !source.is_backend,
            },
            payload: payload.unwrap_or_default(),
        }
    }

    /// For Stage-targeted server-to-server traffic.
    pub fn stage_of(
        from: Nid,
        service_id: u32,
        msg_id: impl Into<String>,
        stage_id: i64,
        account_id: AccountId,
        payload: Payload,
        is_base: bool,
        is_backend: bool,
    ) -> Self {
        let mut p = Self::of(from, service_id, msg_id, stage_id, payload);
        p.route_header.account_id = account_id;
        p.route_header.is_base = is_base;
        p.route_header.is_backend = is_backend;
        p
    }

    /// For API-targeted traffic (no stage id).
    pub fn api_of(
        from: Nid,
        service_id: u32,
        msg_id: impl Into<String>,
        payload: Payload,
        is_base: bool,
        is_backend: bool,
    ) -> Self {
        let mut p = Self::of(from, service_id, msg_id, 0, payload);
        p.route_header.is_base = is_base;
        p.route_header.is_backend = is_backend;
        p
    }

    /// For Play -> client push: `is_to_client` is set and the payload is
    /// expected to already be a client-frame envelope.
    pub fn client_of(
        from: Nid,
        service_id: u32,
        sid: i64,
        stage_id: i64,
        client_frame: Payload,
    ) -> Self {
        let mut p = Self::of(from, service_id, "@ClientFrame@", stage_id, client_frame);
        p.route_header.sid = sid;
        p.route_header.is_to_client = true;
        p.route_header.is_backend = false;
        p
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, postcard::Error> {
        self.payload.decode()
    }
}
