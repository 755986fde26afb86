//! Router-router mesh transport.

mod transport;

pub use transport::{MeshTransport, SendOp};
