// Canopy - Type-safe cross-zone RPC runtime
// Core library module

pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod marshal;
pub mod proxy;
pub mod refcount;
pub mod service;
pub mod stub;
pub mod sync;
pub mod telemetry;
pub mod transport;

pub use error::{Result, RpcError};
pub use fingerprint::InterfaceSignature;
pub use ids::{
    CallerZoneId, DestinationZoneId, InterfaceId, KnownDirectionZoneId, MethodId, ObjectId,
    ZoneId,
};
pub use marshal::{AddRefFlags, CodecKind, Marshaller, ReleaseFlags};
pub use proxy::{HandleKind, RemoteHandle};
pub use refcount::{Optimistic, Strong, WeakRef};
pub use service::{ChildService, Service, ServiceObserver};
pub use stub::{InterfaceDispatch, LocalObject, RemoteObject};
pub use transport::{InprocTransport, Transport, TransportStatus};

use marshal::version::VersionWindow;
use std::time::Duration;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Implicit timeout every `send` inherits from its transport
    pub send_timeout: Duration,
    /// Liveness window after which a silent peer counts as failed
    pub heartbeat_timeout: Duration,
    /// Codec outbound calls are encoded with before any negotiation
    pub default_codec: CodecKind,
    /// Protocol versions this zone speaks
    pub versions: VersionWindow,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(5),
            default_codec: CodecKind::Binary,
            versions: VersionWindow::default(),
        }
    }
}
