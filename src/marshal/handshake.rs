// Connection handshake messages
//
// Two messages, in any codec, exchanged over any transport that requires a
// handshake. The initiator may leave the destination zone id unset to let
// the acceptor assign one; the acceptor answers with the bootstrap object it
// exposes. After a successful exchange both sides insert the peer into their
// transport registry.

use crate::error::{Result, RpcError, WIRE_OK};
use serde::{Deserialize, Serialize};

/// `init_channel` request sent by the initiating zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitChannelRequest {
    /// Zone identity of the initiator
    pub caller_zone_id: u64,
    /// Bootstrap object exposed by the initiator; 0 if none
    pub caller_object_id: u64,
    /// Requested destination zone id; 0 means "you choose"
    pub destination_zone_id: u64,
    /// Disambiguator for peer transports that multiplex several zones
    pub adjacent_zone_id: u64,
}

impl InitChannelRequest {
    /// Validate the fields a receiver must be able to rely on
    pub fn validate(&self) -> Result<()> {
        if self.caller_zone_id == 0 {
            return Err(RpcError::InvalidData(
                "init_channel without a caller zone id".into(),
            ));
        }
        Ok(())
    }
}

/// `init_channel_response` sent by the accepting zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitChannelResponse {
    pub err: i32,
    /// The assigned destination zone id when the request left it unset
    pub destination_zone_id: u64,
    /// Bootstrap object exposed by the acceptor
    pub destination_object_id: u64,
    /// Echo of the initiator's zone id
    pub caller_zone_id: u64,
}

impl InitChannelResponse {
    /// An accepting response
    pub fn accepted(destination_zone_id: u64, destination_object_id: u64, caller_zone_id: u64) -> Self {
        Self {
            err: WIRE_OK,
            destination_zone_id,
            destination_object_id,
            caller_zone_id,
        }
    }

    /// A rejecting response carrying the error's wire code
    pub fn rejected(err: &RpcError) -> Self {
        Self {
            err: err.code(),
            destination_zone_id: 0,
            destination_object_id: 0,
            caller_zone_id: 0,
        }
    }

    /// Turn the response back into a result on the initiator side
    pub fn into_result(self) -> Result<InitChannelResponse> {
        match RpcError::from_wire(self.err, "init_channel") {
            None => Ok(self),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_requires_caller_zone() {
        let bad = InitChannelRequest {
            caller_zone_id: 0,
            caller_object_id: 0,
            destination_zone_id: 0,
            adjacent_zone_id: 0,
        };
        assert!(bad.validate().is_err());

        let good = InitChannelRequest {
            caller_zone_id: 7,
            ..bad
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_rejection_round_trips_the_error() {
        let response = InitChannelResponse::rejected(&RpcError::ZoneNotFound("z".into()));
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, RpcError::ZoneNotFound(_)));
    }

    #[test]
    fn test_acceptance_passes_through() {
        let response = InitChannelResponse::accepted(2, 10, 1);
        let ok = response.into_result().unwrap();
        assert_eq!(ok.destination_zone_id, 2);
        assert_eq!(ok.destination_object_id, 10);
        assert_eq!(ok.caller_zone_id, 1);
    }
}
