// Marshaller contract
//
// Every transport and pass-through speaks the same seven operations,
// exchanging opaque byte buffers for payloads. The fallible verbs surface
// the closed error taxonomy; `post`, `object_released` and `transport_down`
// are fire-and-forget and return once hand-off has occurred.

pub mod codec;
pub mod envelope;
pub mod handshake;
pub mod version;

use crate::error::Result;
use crate::ids::{CallerZoneId, DestinationZoneId, InterfaceId, MethodId, ObjectId, ZoneId};
use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use codec::CodecKind;
pub use envelope::{BackChannel, BackChannelEntry, CallRequest, CallResponse, Envelope};

bitflags! {
    /// Options on an `add_ref` verb
    ///
    /// Exactly one route bit means a normal count-altering add_ref that also
    /// ensures the corresponding route; both bits together mean a relay:
    /// route building only, no count change in the intermediary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AddRefFlags: u8 {
        /// Ensure a pass-through exists back toward the caller
        const BUILD_CALLER_ROUTE = 0b001;
        /// Ensure a pass-through exists toward the destination
        const BUILD_DESTINATION_ROUTE = 0b010;
        /// The reference being added is optimistic
        const OPTIMISTIC = 0b100;
    }
}

impl AddRefFlags {
    /// Both route bits set: build the route, do not alter counts
    pub fn is_relay(&self) -> bool {
        self.contains(AddRefFlags::BUILD_CALLER_ROUTE | AddRefFlags::BUILD_DESTINATION_ROUTE)
    }

    /// Whether any route-building was requested
    pub fn builds_route(&self) -> bool {
        self.intersects(AddRefFlags::BUILD_CALLER_ROUTE | AddRefFlags::BUILD_DESTINATION_ROUTE)
    }

    /// Whether the reference is optimistic
    pub fn is_optimistic(&self) -> bool {
        self.contains(AddRefFlags::OPTIMISTIC)
    }
}

/// Options on a `release` verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseFlags {
    /// Decrement the shared count
    Normal,
    /// Decrement the optimistic count
    Optimistic,
    /// Best-effort bulk release from a zone that is going down and cannot
    /// issue per-object releases
    ZoneTerminating,
}

/// Addressing and encoding context for a `send`/`post`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Protocol version the sender is speaking
    pub version: u64,
    /// Codec the argument buffer is encoded with
    pub codec: CodecKind,
    /// Sender-chosen correlation tag
    pub tag: u64,
    pub caller: CallerZoneId,
    pub destination: DestinationZoneId,
    pub object: ObjectId,
    pub interface: InterfaceId,
    pub method: MethodId,
}

/// Outcome of a `send`: remote error code, payload and back-channel
///
/// A `SendReply` is only produced when the call reached the destination and
/// came back; transport-level failures surface as `Err` on the verb instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReply {
    pub err: i32,
    pub data: Vec<u8>,
    pub back_channel: BackChannel,
}

impl SendReply {
    /// A successful reply carrying a payload
    pub fn ok(data: Vec<u8>, back_channel: BackChannel) -> Self {
        Self {
            err: crate::error::WIRE_OK,
            data,
            back_channel,
        }
    }

    /// A failed reply carrying an error code
    pub fn error(err: &crate::error::RpcError, back_channel: BackChannel) -> Self {
        Self {
            err: err.code(),
            data: Vec::new(),
            back_channel,
        }
    }

    /// Split into payload or error, keeping the back-channel either way
    pub fn into_result(self) -> (Result<Vec<u8>>, BackChannel) {
        match crate::error::RpcError::from_wire(self.err, "remote") {
            None => (Ok(self.data), self.back_channel),
            Some(e) => (Err(e), self.back_channel),
        }
    }
}

/// The six RPC verbs plus the failure notification
///
/// Implemented by transports and pass-throughs; the object-safe async form
/// follows the networking trait conventions used throughout the codebase.
#[async_trait]
pub trait Marshaller: Send + Sync {
    /// Request/response RPC
    async fn send(&self, ctx: CallContext, args: Vec<u8>, back: BackChannel)
        -> Result<SendReply>;

    /// Fire-and-forget RPC; returns once handed off
    async fn post(&self, ctx: CallContext, args: Vec<u8>, back: BackChannel);

    /// Ask whether the remote object implements an interface
    async fn try_cast(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        interface: InterfaceId,
    ) -> Result<BackChannel>;

    /// Add a remote shared or optimistic reference; returns the new count
    async fn add_ref(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        flags: AddRefFlags,
    ) -> Result<u32>;

    /// Drop a remote reference; returns the remaining count
    async fn release(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        flags: ReleaseFlags,
    ) -> Result<u32>;

    /// Notify that an object with optimistic holders was destroyed
    async fn object_released(
        &self,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
    );

    /// Notify that the path toward `failed` went down ungracefully
    async fn transport_down(&self, failed: ZoneId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;

    #[test]
    fn test_relay_detection() {
        let relay = AddRefFlags::BUILD_CALLER_ROUTE | AddRefFlags::BUILD_DESTINATION_ROUTE;
        assert!(relay.is_relay());
        assert!(relay.builds_route());

        let one_way = AddRefFlags::BUILD_CALLER_ROUTE;
        assert!(!one_way.is_relay());
        assert!(one_way.builds_route());

        let plain = AddRefFlags::empty();
        assert!(!plain.is_relay());
        assert!(!plain.builds_route());
    }

    #[test]
    fn test_optimistic_flag_is_independent_of_routing() {
        let flags = AddRefFlags::OPTIMISTIC | AddRefFlags::BUILD_DESTINATION_ROUTE;
        assert!(flags.is_optimistic());
        assert!(!flags.is_relay());
    }

    #[test]
    fn test_send_reply_round_trip() {
        let reply = SendReply::ok(vec![1, 2, 3], BackChannel::new());
        let (result, _) = reply.into_result();
        assert_eq!(result.unwrap(), vec![1, 2, 3]);

        let reply = SendReply::error(
            &RpcError::ObjectGone("o".into()),
            BackChannel::new(),
        );
        let (result, _) = reply.into_result();
        assert!(matches!(result, Err(RpcError::ObjectGone(_))));
    }
}
