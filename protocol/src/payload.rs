//! [`Payload`] — the body a [`crate::route_packet::RoutePacket`] exclusively
//! owns.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A RoutePacket's body. `Bytes` is reference-counted, so a payload sliced
/// straight out of a received transport frame ("zero-copy") and a payload
/// built fresh by a sender share the same representation; cloning is cheap
/// either way and never mutates shared storage.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Bytes(Bytes),
}

impl Payload {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    pub fn encode<T: Serialize>(value: &T) -> Result<Self, postcard::Error> {
        let bytes = postcard::to_stdvec(value)?;
        Ok(Self::Bytes(Bytes::from(bytes)))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, postcard::Error> {
        match self {
            Payload::Empty => postcard::from_bytes(&[]),
            Payload::Bytes(b) => postcard::from_bytes(b),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Empty => &[],
            Payload::Bytes(b) => b,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty) || self.as_slice().is_empty()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}
