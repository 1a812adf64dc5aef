// Typed identifiers for zones, objects, interfaces and methods
//
// Every identifier in the runtime is a non-zero 64-bit integer wrapped in a
// distinct newtype. Zone identifiers come in several flavours (plain,
// destination, caller, known-direction) so that routing code cannot silently
// mix up which zone a value refers to; conversions between flavours are
// explicit method calls and always visible at the call site.
//
// Zero is the reserved "unset" sentinel for all identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The "unset" sentinel value
            pub const UNSET: $name = $name(0);

            /// Wrap a raw 64-bit value
            pub const fn new(raw: u64) -> Self {
                $name(raw)
            }

            /// Get the raw 64-bit value
            pub const fn get(&self) -> u64 {
                self.0
            }

            /// Whether this identifier carries a real (non-zero) value
            pub const fn is_set(&self) -> bool {
                self.0 != 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::UNSET
            }
        }
    };
}

define_id! {
    /// Identity of an execution context (zone)
    ZoneId
}

define_id! {
    /// A zone identifier in the role of a message destination
    DestinationZoneId
}

define_id! {
    /// A zone identifier in the role of a message originator
    CallerZoneId
}

define_id! {
    /// A zone identifier naming the adjacent hop a message arrived on or
    /// should leave through
    KnownDirectionZoneId
}

define_id! {
    /// Identity of an object within its owning zone
    ObjectId
}

define_id! {
    /// 64-bit fingerprint identifying a versioned interface contract
    InterfaceId
}

define_id! {
    /// Positional method ordinal within an interface
    MethodId
}

// Explicit conversions between the zone flavours. There are deliberately no
// `From` impls: changing the role of a zone id must be spelled out.

impl ZoneId {
    /// View this zone as a message destination
    pub const fn as_destination(&self) -> DestinationZoneId {
        DestinationZoneId::new(self.0)
    }

    /// View this zone as a message originator
    pub const fn as_caller(&self) -> CallerZoneId {
        CallerZoneId::new(self.0)
    }

    /// View this zone as a routing direction
    pub const fn as_direction(&self) -> KnownDirectionZoneId {
        KnownDirectionZoneId::new(self.0)
    }
}

impl DestinationZoneId {
    /// Recover the plain zone identity
    pub const fn as_zone(&self) -> ZoneId {
        ZoneId::new(self.0)
    }

    /// Re-role this destination as a caller (used when a reply retraces a
    /// request's path)
    pub const fn as_caller(&self) -> CallerZoneId {
        CallerZoneId::new(self.0)
    }
}

impl CallerZoneId {
    /// Recover the plain zone identity
    pub const fn as_zone(&self) -> ZoneId {
        ZoneId::new(self.0)
    }

    /// Re-role this caller as a destination (used when routing a notification
    /// back toward the originator)
    pub const fn as_destination(&self) -> DestinationZoneId {
        DestinationZoneId::new(self.0)
    }
}

impl KnownDirectionZoneId {
    /// Recover the plain zone identity
    pub const fn as_zone(&self) -> ZoneId {
        ZoneId::new(self.0)
    }
}
