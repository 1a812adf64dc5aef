// Error taxonomy for the RPC runtime
//
// The runtime signals failures from a closed set of kinds, each with a stable
// numeric code that crosses the wire in response envelopes. Errors are
// propagated, never retried inside the core; the only sender-side retries are
// the single-shot version and codec negotiation fallbacks.

use thiserror::Error;

/// Wire code for a successful call
pub const WIRE_OK: i32 = 0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("object gone: {0}")]
    ObjectGone(String),

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("interface not supported: {0}")]
    InterfaceNotSupported(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid protocol version: {0}")]
    InvalidVersion(String),

    #[error("incompatible serialization: {0}")]
    IncompatibleSerialization(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

impl RpcError {
    /// Stable wire code for this error kind
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidData(_) => 1,
            RpcError::TransportError(_) => 2,
            RpcError::ObjectNotFound(_) => 3,
            RpcError::ObjectGone(_) => 4,
            RpcError::ZoneNotFound(_) => 5,
            RpcError::InterfaceNotSupported(_) => 6,
            RpcError::MethodNotFound(_) => 7,
            RpcError::InvalidVersion(_) => 8,
            RpcError::IncompatibleSerialization(_) => 9,
            RpcError::OutOfMemory(_) => 10,
        }
    }

    /// Reconstruct an error from a wire code
    ///
    /// Returns `None` for `WIRE_OK`. Unknown codes decode as `InvalidData` so
    /// that a newer peer cannot crash an older one.
    pub fn from_wire(code: i32, context: impl Into<String>) -> Option<RpcError> {
        let context = context.into();
        match code {
            0 => None,
            1 => Some(RpcError::InvalidData(context)),
            2 => Some(RpcError::TransportError(context)),
            3 => Some(RpcError::ObjectNotFound(context)),
            4 => Some(RpcError::ObjectGone(context)),
            5 => Some(RpcError::ZoneNotFound(context)),
            6 => Some(RpcError::InterfaceNotSupported(context)),
            7 => Some(RpcError::MethodNotFound(context)),
            8 => Some(RpcError::InvalidVersion(context)),
            9 => Some(RpcError::IncompatibleSerialization(context)),
            10 => Some(RpcError::OutOfMemory(context)),
            other => Some(RpcError::InvalidData(format!(
                "unknown error code {} ({})",
                other, context
            ))),
        }
    }

    /// Wire code for a result: `WIRE_OK` on success, the error code otherwise
    pub fn wire_code<T>(result: &Result<T>) -> i32 {
        match result {
            Ok(_) => WIRE_OK,
            Err(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

// Error conversions for common error types

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::TransportError(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for RpcError {
    fn from(e: bincode::error::EncodeError) -> Self {
        RpcError::IncompatibleSerialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for RpcError {
    fn from(e: bincode::error::DecodeError) -> Self {
        RpcError::IncompatibleSerialization(e.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::IncompatibleSerialization(e.to_string())
    }
}
