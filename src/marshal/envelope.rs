// RPC envelope and payload types
//
// Every message crossing a transport is an envelope: a sender-chosen
// correlation id, the message-type fingerprint, and a codec-specific
// payload. Requests and responses additionally carry a back-channel, an
// ordered list of tagged auxiliary entries used for piggybacked
// reference-count adjustments, interface-query results and route hints.
// Unknown tags are preserved and ignored for forward compatibility.

use crate::fingerprint::fingerprint_of;
use crate::ids::{CallerZoneId, DestinationZoneId, InterfaceId, MethodId, ObjectId};
use crate::marshal::codec::CodecKind;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Outer framing for every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation tag chosen by the sender
    pub message_id: u64,
    /// Sender-side message-type fingerprint
    pub message_type: u64,
    /// Codec-specific payload
    pub data: Vec<u8>,
}

impl Envelope {
    /// Maximum frame a receiver will accept
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Encode into a length-prefixed frame for stream transports
    pub fn to_frame(&self, codec: CodecKind) -> crate::error::Result<Bytes> {
        let payload = crate::marshal::codec::encode(codec, self)?;
        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Decode one length-prefixed frame, returning the bytes consumed
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a whole frame.
    pub fn from_frame(
        codec: CodecKind,
        buffer: &[u8],
    ) -> crate::error::Result<Option<(Envelope, usize)>> {
        if buffer.len() < 4 {
            return Ok(None);
        }
        let mut prefix = &buffer[..4];
        let length = prefix.get_u32() as usize;
        if length > Self::MAX_FRAME_SIZE {
            return Err(crate::error::RpcError::InvalidData(format!(
                "frame of {} bytes exceeds the {} byte limit",
                length,
                Self::MAX_FRAME_SIZE
            )));
        }
        if buffer.len() < 4 + length {
            return Ok(None);
        }
        let envelope = crate::marshal::codec::decode(codec, &buffer[4..4 + length])?;
        Ok(Some((envelope, 4 + length)))
    }
}

/// Message-type fingerprints for the core payloads
pub mod message_types {
    use super::*;

    static CALL_REQUEST: Lazy<u64> = Lazy::new(|| fingerprint_of("canopy.CallRequest").get());
    static CALL_RESPONSE: Lazy<u64> = Lazy::new(|| fingerprint_of("canopy.CallResponse").get());
    static INIT_CHANNEL: Lazy<u64> = Lazy::new(|| fingerprint_of("canopy.InitChannel").get());
    static INIT_CHANNEL_RESPONSE: Lazy<u64> =
        Lazy::new(|| fingerprint_of("canopy.InitChannelResponse").get());

    pub fn call_request() -> u64 {
        *CALL_REQUEST
    }

    pub fn call_response() -> u64 {
        *CALL_RESPONSE
    }

    pub fn init_channel() -> u64 {
        *INIT_CHANNEL
    }

    pub fn init_channel_response() -> u64 {
        *INIT_CHANNEL_RESPONSE
    }
}

/// Payload of a `send` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Codec the argument buffer is encoded with
    pub codec: CodecKind,
    /// Sender-chosen correlation tag
    pub tag: u64,
    pub caller_zone: CallerZoneId,
    pub destination_zone: DestinationZoneId,
    pub object: ObjectId,
    pub interface: InterfaceId,
    pub method: MethodId,
    /// Codec-specific encoded arguments
    pub data: Vec<u8>,
    pub back_channel: BackChannel,
}

/// Payload of a `send` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    pub err: i32,
    pub data: Vec<u8>,
    pub back_channel: BackChannel,
}

/// One tagged auxiliary entry on a request or response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackChannelEntry {
    pub tag: u32,
    pub data: Vec<u8>,
}

/// Well-known back-channel tags
///
/// Receivers must ignore tags they do not recognize.
pub mod tags {
    /// Piggybacked reference-count adjustment
    pub const REF_ADJUST: u32 = 1;
    /// Interface descriptor answering a `try_cast`
    pub const INTERFACE_DESCRIPTOR: u32 = 2;
    /// Route-building hint for intermediaries
    pub const ROUTE_HINT: u32 = 3;
    /// The receiver's supported protocol version window
    pub const VERSION_HINT: u32 = 4;
}

/// Ordered list of tagged auxiliary entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackChannel(Vec<BackChannelEntry>);

impl BackChannel {
    /// An empty back-channel
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a raw entry
    pub fn push(&mut self, tag: u32, data: Vec<u8>) {
        self.0.push(BackChannelEntry { tag, data });
    }

    /// Entries in order
    pub fn entries(&self) -> &[BackChannelEntry] {
        &self.0
    }

    /// First entry with the given tag, if any
    pub fn find(&self, tag: u32) -> Option<&BackChannelEntry> {
        self.0.iter().find(|e| e.tag == tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Attach a version-hint entry advertising a supported window
    pub fn push_version_hint(&mut self, lowest: u64, highest: u64) {
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&lowest.to_le_bytes());
        data.extend_from_slice(&highest.to_le_bytes());
        self.push(tags::VERSION_HINT, data);
    }

    /// Read a version-hint entry, if present and well-formed
    pub fn version_hint(&self) -> Option<(u64, u64)> {
        let entry = self.find(tags::VERSION_HINT)?;
        if entry.data.len() != 16 {
            return None;
        }
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&entry.data[..8]);
        hi.copy_from_slice(&entry.data[8..]);
        Some((u64::from_le_bytes(lo), u64::from_le_bytes(hi)))
    }

    /// Attach an interface-descriptor entry answering a `try_cast`
    pub fn push_interface_descriptor(&mut self, interface: InterfaceId) {
        self.push(
            tags::INTERFACE_DESCRIPTOR,
            interface.get().to_le_bytes().to_vec(),
        );
    }

    /// Read an interface-descriptor entry, if present and well-formed
    pub fn interface_descriptor(&self) -> Option<InterfaceId> {
        let entry = self.find(tags::INTERFACE_DESCRIPTOR)?;
        let bytes: [u8; 8] = entry.data.as_slice().try_into().ok()?;
        Some(InterfaceId::new(u64::from_le_bytes(bytes)))
    }
}
