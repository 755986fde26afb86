//! Wire schema shared by every PlayHouse node: ids, headers, payload
//! encoding, the framework's base stage commands, and the client-edge
//! packet format.

pub mod base_commands;
pub mod client_packet;
pub mod error;
pub mod header;
pub mod ids;
pub mod payload;
pub mod route_packet;
pub mod server_info;

pub use client_packet::ClientPacket;
pub use error::{ErrorCode, PlayHouseError};
pub use header::{Header, RouteHeader};
pub use ids::{
    AccountId, MsgSeqAllocator, Nid, NidParseError, SessionId, StageIdError, StageIdGenerator,
};
pub use payload::Payload;
pub use route_packet::RoutePacket;
pub use server_info::{ServerInfo, ServerState, ServiceType};