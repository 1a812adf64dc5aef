// Wire codecs
//
// The codec tag is a closed set carried on every call. The core ships the
// binary codec (bincode) and the text codec (json) that version negotiation
// falls back to; the remaining tags belong to external codec implementations
// and decode locally to an incompatible-serialization error.

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Closed set of codec tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    /// Alias for the binary codec
    Default,
    Binary,
    CompressedBinary,
    Json,
    ProtocolBuffers,
}

impl CodecKind {
    /// Stable wire tag
    pub fn tag(&self) -> u8 {
        match self {
            CodecKind::Default => 0,
            CodecKind::Binary => 1,
            CodecKind::CompressedBinary => 2,
            CodecKind::Json => 3,
            CodecKind::ProtocolBuffers => 4,
        }
    }

    /// Decode a wire tag; unknown tags are reported, not guessed at
    pub fn from_tag(tag: u8) -> Result<CodecKind> {
        match tag {
            0 => Ok(CodecKind::Default),
            1 => Ok(CodecKind::Binary),
            2 => Ok(CodecKind::CompressedBinary),
            3 => Ok(CodecKind::Json),
            4 => Ok(CodecKind::ProtocolBuffers),
            other => Err(RpcError::IncompatibleSerialization(format!(
                "unknown codec tag {}",
                other
            ))),
        }
    }

    /// Whether this runtime can encode/decode the codec itself
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            CodecKind::Default | CodecKind::Binary | CodecKind::Json
        )
    }
}

impl Default for CodecKind {
    fn default() -> Self {
        CodecKind::Binary
    }
}

/// Encode a value with the given codec
pub fn encode<T: Serialize>(codec: CodecKind, value: &T) -> Result<Vec<u8>> {
    match codec {
        CodecKind::Default | CodecKind::Binary => {
            Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
        }
        CodecKind::Json => Ok(serde_json::to_vec(value)?),
        other => Err(RpcError::IncompatibleSerialization(format!(
            "codec {:?} requires an external codec implementation",
            other
        ))),
    }
}

/// Decode a value with the given codec
pub fn decode<T: DeserializeOwned>(codec: CodecKind, bytes: &[u8]) -> Result<T> {
    match codec {
        CodecKind::Default | CodecKind::Binary => {
            let (value, consumed) =
                bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
            if consumed != bytes.len() {
                return Err(RpcError::InvalidData(format!(
                    "{} trailing bytes after payload",
                    bytes.len() - consumed
                )));
            }
            Ok(value)
        }
        CodecKind::Json => Ok(serde_json::from_slice(bytes)?),
        other => Err(RpcError::IncompatibleSerialization(format!(
            "codec {:?} requires an external codec implementation",
            other
        ))),
    }
}
