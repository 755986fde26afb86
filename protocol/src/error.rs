//! Stable error codes carried in replies and the error type used
//! internally to propagate them.

use serde::{Deserialize, Serialize};

/// Stable numeric error codes. These cross the wire in `RouteHeader.error_code`
/// and `ClientPacket.error_code` — never renumber an existing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    NotRegisteredMessage = 1,
    SystemError = 2,
    UncheckedContentsError = 3,
    RequestTimeout = 4,
    AuthenticationFailed = 5,
    JoinStageFailed = 6,
    NoStage = 7,
    NoServer = 8,
    ShuttingDown = 9,
    InvalidParameter = 10,
    PayloadTooLarge = 11,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::NotRegisteredMessage,
            2 => Self::SystemError,
            3 => Self::UncheckedContentsError,
            4 => Self::RequestTimeout,
            5 => Self::AuthenticationFailed,
            6 => Self::JoinStageFailed,
            7 => Self::NoStage,
            8 => Self::NoServer,
            9 => Self::ShuttingDown,
            10 => Self::InvalidParameter,
            11 => Self::PayloadTooLarge,
            _ => return None,
        })
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        Self::Success
    }
}

/// Local (non-wire) error type for operations within a single process.
#[derive(Debug, thiserror::Error)]
pub enum PlayHouseError {
    #[error("no route for nid {0}")]
    NoRoute(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("payload of {0} bytes exceeds the {1} byte limit")]
    PayloadTooLarge(usize, usize),

    #[error("remote replied with error code {0:?}")]
    Remote(ErrorCode),

    #[error("request timed out")]
    Timeout,

    #[error("node is shutting down")]
    ShuttingDown,

    #[error("serialization failure: {0}")]
    Codec(#[from] postcard::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayHouseError {
    /// Maps a local error onto the wire-stable [`ErrorCode`] used to reply
    /// to whoever is waiting on this operation.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            PlayHouseError::NoRoute(_) => ErrorCode::NoStage,
            PlayHouseError::MalformedFrame(_) => ErrorCode::InvalidParameter,
            PlayHouseError::PayloadTooLarge(_, _) => ErrorCode::PayloadTooLarge,
            PlayHouseError::Remote(code) => *code,
            PlayHouseError::Timeout => ErrorCode::RequestTimeout,
            PlayHouseError::ShuttingDown => ErrorCode::ShuttingDown,
            PlayHouseError::Codec(_) => ErrorCode::SystemError,
            PlayHouseError::Io(_) => ErrorCode::SystemError,
        }
    }
}
