//! Node bootstrap: turns a [`NodeOptions`] into a running Play or
//! Api node. Everything downstream (transport, discovery, dispatcher,
//! client edge) is assembled here in the dependency order the rest of this
//! crate is built in.

pub mod api;
pub mod options;
pub mod play;

pub use api::ApiNode;
pub use options::{NodeOptions, NodeOptionsBuilder, NodeServiceType};
pub use play::PlayNode;
