//! Client-edge wire format: the envelope exchanged
//! with TCP and WebSocket clients, distinct from the mesh's [`crate::route_packet::RoutePacket`]
//! because clients never see a [`crate::ids::Nid`] or an account id.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PlayHouseError;
use crate::payload::Payload;

pub const MSG_HEARTBEAT: &str = "@Heart@Beat@";
pub const MSG_DEBUG: &str = "@Debug@";
pub const MSG_TIMEOUT: &str = "@Timeout@";

pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;
/// Bodies at or above this size are LZ4-compressed before framing.
pub const COMPRESSION_THRESHOLD: usize = 256;

const COMPRESSION_FLAG_NONE: u8 = 0;
const COMPRESSION_FLAG_LZ4: u8 = 1;

/// One client<->server message. `msg_id` identifies the handler, `msg_seq`
/// correlates a reply with the request that caused it (0 means
/// fire-and-forget).
#[derive(Debug, Clone)]
pub struct ClientPacket {
    pub msg_id: String,
    pub msg_seq: u16,
    pub stage_id: i64,
    pub error_code: u16,
    pub payload: Payload,
}

impl ClientPacket {
    pub fn new(msg_id: impl Into<String>, msg_seq: u16, stage_id: i64, payload: Payload) -> Self {
        Self {
            msg_id: msg_id.into(),
            msg_seq,
            stage_id,
            error_code: 0,
            payload,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(MSG_HEARTBEAT, 0, 0, Payload::Empty)
    }

    /// Encodes this packet's body: does not include the outer length prefix
    /// a stream transport (TCP) needs for framing — that's added by
    /// `playhouse_core::client_edge`, which differs between TCP and WebSocket.
    pub fn encode(&self) -> Result<Bytes, PlayHouseError> {
        let body = self.payload.as_slice();
        if body.len() > MAX_BODY_SIZE {
            return Err(PlayHouseError::PayloadTooLarge(body.len(), MAX_BODY_SIZE));
        }

        let (flag, stored) = if body.len() >= COMPRESSION_THRESHOLD {
            (COMPRESSION_FLAG_LZ4, lz4_flex::compress_prepend_size(body))
        } else {
            (COMPRESSION_FLAG_NONE, body.to_vec())
        };

        let msg_id_bytes = self.msg_id.as_bytes();
        if msg_id_bytes.len() > u8::MAX as usize {
            return Err(PlayHouseError::MalformedFrame(
                "msg_id exceeds 255 bytes".into(),
            ));
        }

        let mut buf = BytesMut::with_capacity(16 + msg_id_bytes.len() + stored.len());
        buf.put_u8(msg_id_bytes.len() as u8);
        buf.put_slice(msg_id_bytes);
        buf.put_u16_le(self.msg_seq);
        buf.put_i64_le(self.stage_id);
        buf.put_u16_le(self.error_code);
        buf.put_u8(flag);
        buf.put_u32_le(stored.len() as u32);
        buf.put_slice(&stored);
        Ok(buf.freeze())
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, PlayHouseError> {
        if bytes.len() < 1 {
            return Err(PlayHouseError::MalformedFrame("empty client frame".into()));
        }
        let msg_id_len = bytes.get_u8() as usize;
        if bytes.remaining() < msg_id_len + 2 + 8 + 2 + 1 + 4 {
            return Err(PlayHouseError::MalformedFrame(
                "truncated client frame header".into(),
            ));
        }
        let msg_id = String::from_utf8(bytes.copy_to_bytes(msg_id_len).to_vec())
            .map_err(|e| PlayHouseError::MalformedFrame(e.to_string()))?;
        let msg_seq = bytes.get_u16_le();
        let stage_id = bytes.get_i64_le();
        let error_code = bytes.get_u16_le();
        let flag = bytes.get_u8();
        let body_len = bytes.get_u32_le() as usize;
        if bytes.remaining() < body_len {
            return Err(PlayHouseError::MalformedFrame(
                "truncated client frame body".into(),
            ));
        }
        let stored = bytes.copy_to_bytes(body_len);

        let payload_bytes = match flag {
            COMPRESSION_FLAG_NONE => stored,
            COMPRESSION_FLAG_LZ4 => Bytes::from(
                lz4_flex::decompress_size_prepended(&stored)
                    .map_err(|e| PlayHouseError::MalformedFrame(e.to_string()))?,
            ),
            other => {
                return Err(PlayHouseError::MalformedFrame(format!(
                    "unknown compression flag {other}"
                )));
            }
        };

        if payload_bytes.len() > MAX_BODY_SIZE {
            return Err(PlayHouseError::PayloadTooLarge(
                payload_bytes.len(),
                MAX_BODY_SIZE,
            ));
        }

        Ok(Self {
            msg_id,
            msg_seq,
            stage_id,
            error_code,
            payload: if payload_bytes.is_empty() {
                Payload::Empty
            } else {
                Payload::from_bytes(payload_bytes)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_round_trips_uncompressed() {
        let packet = ClientPacket::new("move", 7, 42, Payload::from(vec![1, 2, 3]));
        let encoded = packet.encode().unwrap();
        let decoded = ClientPacket::decode(encoded).unwrap();
        assert_eq!(decoded.msg_id, "move");
        assert_eq!(decoded.msg_seq, 7);
        assert_eq!(decoded.stage_id, 42);
        assert_eq!(decoded.payload.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn large_body_round_trips_through_lz4() {
        let body = vec![9u8; COMPRESSION_THRESHOLD * 4];
        let packet = ClientPacket::new("snapshot", 0, 1, Payload::from(body.clone()));
        let encoded = packet.encode().unwrap();
        let decoded = ClientPacket::decode(encoded).unwrap();
        assert_eq!(decoded.payload.as_slice(), body.as_slice());
    }

    #[test]
    fn oversized_body_is_rejected() {
        let body = vec![0u8; MAX_BODY_SIZE + 1];
        let packet = ClientPacket::new("huge", 0, 1, Payload::from(body));
        assert!(matches!(
            packet.encode(),
            Err(PlayHouseError::PayloadTooLarge(_, _))
        ));
    }
}
