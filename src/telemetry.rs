// Telemetry emission points
//
// The runtime emits lifecycle and per-verb events through a process-global
// dispatcher; sinks are supplied by the embedding application. The
// dispatcher is the only global state in the crate. A `TracingSink` is
// provided so that enabling `tracing` is enough to see the runtime work.

use crate::ids::{CallerZoneId, DestinationZoneId, InterfaceId, MethodId, ObjectId, ZoneId};
use crate::transport::TransportStatus;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

/// Which side of a transport a verb event was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbDirection {
    Outbound,
    Inbound,
}

/// The RPC verbs, for event reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbKind {
    Send,
    Post,
    TryCast,
    AddRef,
    Release,
    ObjectReleased,
    TransportDown,
}

/// Addressing fields attached to a verb event
#[derive(Debug, Clone, Copy)]
pub struct VerbEvent {
    pub direction: VerbDirection,
    pub verb: VerbKind,
    pub caller: CallerZoneId,
    pub destination: DestinationZoneId,
    pub object: ObjectId,
    pub interface: InterfaceId,
    pub method: MethodId,
}

/// Receiver for runtime events; all methods default to no-ops
#[allow(unused_variables)]
pub trait TelemetrySink: Send + Sync {
    fn on_service_created(&self, zone: ZoneId, name: &str) {}
    fn on_service_deleted(&self, zone: ZoneId) {}
    fn on_stub_created(&self, zone: ZoneId, object: ObjectId) {}
    fn on_stub_deleted(&self, zone: ZoneId, object: ObjectId) {}
    /// Per-caller-zone refcount delta on a stub; positive = add_ref
    fn on_stub_ref_delta(
        &self,
        zone: ZoneId,
        object: ObjectId,
        caller: CallerZoneId,
        shared_delta: i64,
        optimistic_delta: i64,
    ) {
    }
    fn on_proxy_created(&self, zone: ZoneId, destination: DestinationZoneId, object: ObjectId) {}
    fn on_proxy_deleted(&self, zone: ZoneId, destination: DestinationZoneId, object: ObjectId) {}
    fn on_transport_status(&self, zone: ZoneId, adjacent: ZoneId, status: TransportStatus) {}
    fn on_verb(&self, zone: ZoneId, event: &VerbEvent) {}
}

static SINKS: Lazy<RwLock<Vec<Arc<dyn TelemetrySink>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Install a process-wide `tracing` subscriber reading `RUST_LOG`
///
/// Convenience for embedders and test binaries; calling it again after a
/// subscriber exists is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Register a telemetry sink for the rest of the process lifetime
pub fn register_sink(sink: Arc<dyn TelemetrySink>) {
    SINKS.write().push(sink);
}

/// Remove all registered sinks (test support)
pub fn clear_sinks() {
    SINKS.write().clear();
}

/// Fan an event out to every registered sink
pub(crate) fn emit(f: impl Fn(&dyn TelemetrySink)) {
    for sink in SINKS.read().iter() {
        f(sink.as_ref());
    }
}

/// Sink that forwards every event to `tracing` at debug level
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn on_service_created(&self, zone: ZoneId, name: &str) {
        tracing::debug!(%zone, name, "service created");
    }

    fn on_service_deleted(&self, zone: ZoneId) {
        tracing::debug!(%zone, "service deleted");
    }

    fn on_stub_created(&self, zone: ZoneId, object: ObjectId) {
        tracing::debug!(%zone, %object, "object stub created");
    }

    fn on_stub_deleted(&self, zone: ZoneId, object: ObjectId) {
        tracing::debug!(%zone, %object, "object stub deleted");
    }

    fn on_stub_ref_delta(
        &self,
        zone: ZoneId,
        object: ObjectId,
        caller: CallerZoneId,
        shared_delta: i64,
        optimistic_delta: i64,
    ) {
        tracing::debug!(
            %zone,
            %object,
            %caller,
            shared_delta,
            optimistic_delta,
            "stub refcount delta"
        );
    }

    fn on_proxy_created(&self, zone: ZoneId, destination: DestinationZoneId, object: ObjectId) {
        tracing::debug!(%zone, %destination, %object, "object proxy created");
    }

    fn on_proxy_deleted(&self, zone: ZoneId, destination: DestinationZoneId, object: ObjectId) {
        tracing::debug!(%zone, %destination, %object, "object proxy deleted");
    }

    fn on_transport_status(&self, zone: ZoneId, adjacent: ZoneId, status: TransportStatus) {
        tracing::debug!(%zone, %adjacent, ?status, "transport status change");
    }

    fn on_verb(&self, zone: ZoneId, event: &VerbEvent) {
        tracing::debug!(
            %zone,
            direction = ?event.direction,
            verb = ?event.verb,
            caller = %event.caller,
            destination = %event.destination,
            object = %event.object,
            interface = %event.interface,
            method = %event.method,
            "verb"
        );
    }
}
