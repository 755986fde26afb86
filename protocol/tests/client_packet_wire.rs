//! Exercises `ClientPacket` framing the way a real session does: an
//! undersized control frame next to an oversized, LZ4-compressed game-state
//! frame, then the error path a corrupted frame takes back through
//! `PlayHouseError::error_code`.

use protocol::client_packet::{COMPRESSION_THRESHOLD, MAX_BODY_SIZE};
use protocol::{ClientPacket, ErrorCode, Payload};

#[test]
fn heartbeat_round_trips_as_a_bare_control_frame() {
    let heartbeat = ClientPacket::heartbeat();
    let encoded = heartbeat.encode().unwrap();
    let decoded = ClientPacket::decode(encoded).unwrap();

    assert_eq!(decoded.msg_id, protocol::client_packet::MSG_HEARTBEAT);
    assert_eq!(decoded.msg_seq, 0);
    assert!(decoded.payload.is_empty());
}

#[test]
fn large_payload_survives_lz4_compression_round_trip() {
    // Highly repetitive so LZ4 genuinely shrinks it, proving the frame that
    // comes back out the other side is the compressed path, not the plain one.
    let body = vec![b'x'; COMPRESSION_THRESHOLD * 4];
    let packet = ClientPacket::new("@State@", 7, 100, Payload::from(body.clone()));

    let encoded = packet.encode().unwrap();
    assert!(
        encoded.len() < body.len(),
        "compressed frame ({}) should be smaller than the raw body ({})",
        encoded.len(),
        body.len()
    );

    let decoded = ClientPacket::decode(encoded).unwrap();
    assert_eq!(decoded.payload.as_slice(), &body[..]);
    assert_eq!(decoded.msg_seq, 7);
    assert_eq!(decoded.stage_id, 100);
}

#[test]
fn oversized_payload_is_rejected_before_it_ever_reaches_the_wire() {
    let body = vec![0u8; MAX_BODY_SIZE + 1];
    let packet = ClientPacket::new("@State@", 1, 0, Payload::from(body));
    let err = packet.encode().unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::PayloadTooLarge);
}

#[test]
fn truncated_frame_reports_a_malformed_frame_error() {
    let full = ClientPacket::new("@Ping@", 1, 0, Payload::from(vec![1, 2, 3, 4])).encode().unwrap();
    let truncated = full.slice(..full.len() - 2);
    let err = ClientPacket::decode(truncated).unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidParameter);
}
