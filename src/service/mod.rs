// Per-zone service
//
// The service is the registry and lifecycle authority of its zone: local
// object stubs, service proxies toward remote zones, weak transport
// references, and the pass-through registry for traffic this zone merely
// relays. Three counters (inbound stubs, outbound proxies, pass-throughs)
// drive zone lifetime: when all of them reach zero and no hierarchical
// child is attached, the service enters amnesia and tears its transports
// down.

mod child;
mod events;

pub use child::ChildService;
pub use events::ServiceObserver;

use crate::error::{Result, RpcError};
use crate::ids::{CallerZoneId, DestinationZoneId, KnownDirectionZoneId, ObjectId, ZoneId};
use crate::marshal::handshake::{InitChannelRequest, InitChannelResponse};
use crate::proxy::{HandleKind, RemoteHandle, ServiceProxy};
use crate::stub::{LocalObject, ObjectStub};
use crate::sync::PtrCell;
use crate::telemetry;
use crate::transport::{PassThrough, Transport, TransportStatus};
use crate::RuntimeConfig;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// User-supplied setup that fabricates the first object a zone exposes
pub type BootstrapFactory = Box<dyn Fn(&Arc<Service>) -> Result<LocalObject> + Send + Sync>;

pub struct Service {
    zone: ZoneId,
    name: String,
    config: RuntimeConfig,

    /// Local object stubs by object id
    stubs: DashMap<u64, Arc<ObjectStub>>,
    /// Allocation identity to object id, for idempotent registration
    identities: DashMap<usize, ObjectId>,
    /// Service proxies by destination zone
    service_proxies: DashMap<u64, Arc<ServiceProxy>>,
    /// Transports by adjacent zone; ownership is distributed, so weak
    transports: DashMap<u64, Weak<dyn Transport>>,
    /// Pass-throughs by (destination, caller); at most one per pair
    pass_through_registry: DashMap<(u64, u64), Arc<PassThrough>>,
    /// Route for destinations with no direct transport (hierarchy: parent)
    default_route: PtrCell<dyn Transport>,
    /// Strong transport references this zone holds (child's parent link)
    retained_transports: Mutex<Vec<Arc<dyn Transport>>>,

    inbound_stubs: AtomicUsize,
    outbound_proxies: AtomicUsize,
    pass_throughs: AtomicUsize,
    /// Connected hierarchical children; a parent outlives its children
    child_links: AtomicUsize,

    next_object_id: AtomicU64,
    bootstrap_factory: Mutex<Option<BootstrapFactory>>,
    observers: RwLock<Vec<Arc<dyn ServiceObserver>>>,
    amnesia: AtomicBool,
}

impl Service {
    /// Create a service with a freshly generated zone id
    pub fn new(name: impl Into<String>, config: RuntimeConfig) -> Arc<Service> {
        let zone = loop {
            let raw: u64 = rand::random();
            if raw != 0 {
                break ZoneId::new(raw);
            }
        };
        Self::with_zone(zone, name, config)
    }

    /// Create a service for a known zone id
    pub fn with_zone(
        zone: ZoneId,
        name: impl Into<String>,
        config: RuntimeConfig,
    ) -> Arc<Service> {
        let name = name.into();
        telemetry::emit(|s| s.on_service_created(zone, &name));
        Arc::new(Service {
            zone,
            name,
            config,
            stubs: DashMap::new(),
            identities: DashMap::new(),
            service_proxies: DashMap::new(),
            transports: DashMap::new(),
            pass_through_registry: DashMap::new(),
            default_route: PtrCell::empty(),
            retained_transports: Mutex::new(Vec::new()),
            inbound_stubs: AtomicUsize::new(0),
            outbound_proxies: AtomicUsize::new(0),
            pass_throughs: AtomicUsize::new(0),
            child_links: AtomicUsize::new(0),
            next_object_id: AtomicU64::new(1),
            bootstrap_factory: Mutex::new(None),
            observers: RwLock::new(Vec::new()),
            amnesia: AtomicBool::new(false),
        })
    }

    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// (inbound stubs, outbound proxies, pass-throughs)
    pub fn counters(&self) -> (usize, usize, usize) {
        (
            self.inbound_stubs.load(Ordering::SeqCst),
            self.outbound_proxies.load(Ordering::SeqCst),
            self.pass_throughs.load(Ordering::SeqCst),
        )
    }

    pub fn is_amnesia(&self) -> bool {
        self.amnesia.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Identifier issue
    // ========================================================================

    /// Issue a zone id unused by this zone and its known neighbours
    pub fn generate_zone_id(&self) -> ZoneId {
        loop {
            let raw: u64 = rand::random();
            if raw != 0 && raw != self.zone.get() && !self.transports.contains_key(&raw) {
                return ZoneId::new(raw);
            }
        }
    }

    /// Issue an object id unique within this zone
    pub fn generate_object_id(&self) -> ObjectId {
        ObjectId::new(self.next_object_id.fetch_add(1, Ordering::SeqCst))
    }

    // ========================================================================
    // Local objects
    // ========================================================================

    /// Register a local object, returning its stub
    ///
    /// Idempotent: a second registration of the same object returns the
    /// existing stub.
    pub fn register_local_object(self: &Arc<Self>, object: &LocalObject) -> Arc<ObjectStub> {
        let identity = object.identity();
        if let Some(existing) = self.identities.get(&identity) {
            if let Some(stub) = self.stubs.get(&existing.get()) {
                return Arc::clone(&stub);
            }
        }

        let object_id = self.generate_object_id();
        let stub = Arc::new(ObjectStub::new(
            object_id,
            self.zone,
            Arc::downgrade(self),
            object,
        ));
        self.stubs.insert(object_id.get(), Arc::clone(&stub));
        self.identities.insert(identity, object_id);
        self.inbound_stubs.fetch_add(1, Ordering::SeqCst);
        telemetry::emit(|s| s.on_stub_created(self.zone, object_id));

        let weak = Arc::downgrade(self);
        object.set_destroy_hook(move || {
            if let Some(service) = weak.upgrade() {
                service.object_destroyed(object_id, identity);
            }
        });
        stub
    }

    /// Look up the stub for a local object id
    pub fn lookup_stub(&self, object: ObjectId) -> Option<Arc<ObjectStub>> {
        self.stubs.get(&object.get()).map(|s| Arc::clone(&s))
    }

    /// Drop a stub whose remote reference units have all been returned
    pub(crate) fn retire_stub(&self, object: ObjectId) {
        if let Some((_, stub)) = self.stubs.remove(&object.get()) {
            self.identities.remove(&stub.identity());
            self.inbound_stubs.fetch_sub(1, Ordering::SeqCst);
            telemetry::emit(|s| s.on_stub_deleted(self.zone, object));
            self.maybe_enter_amnesia();
        }
    }

    /// Destroy-hook entry: fan `object_released` out to optimistic holders
    fn object_destroyed(self: &Arc<Self>, object: ObjectId, identity: usize) {
        self.identities.remove(&identity);
        let Some(stub) = self.lookup_stub(object) else {
            return;
        };
        let zones = stub.optimistic_zones();
        if zones.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                zone = %self.zone,
                %object,
                "object destroyed outside a runtime; optimistic holders not notified"
            );
            return;
        };
        for target in zones {
            let service = Arc::clone(self);
            runtime.spawn(async move {
                let destination = DestinationZoneId::new(target);
                if let Some(transport) =
                    service.route_to(destination, service.zone.as_caller(), None)
                {
                    transport
                        .object_released(destination, service.zone.as_caller(), object)
                        .await;
                } else {
                    tracing::debug!(
                        zone = %service.zone,
                        %destination,
                        "no route for object_released"
                    );
                }
            });
        }
    }

    /// Inbound `object_released`: invalidate the matching proxy
    pub(crate) fn handle_object_released(&self, origin: CallerZoneId, object: ObjectId) {
        if let Some(proxy) = self
            .service_proxies
            .get(&origin.get())
            .and_then(|sp| sp.lookup_object_proxy(object))
        {
            proxy.mark_gone();
        }
        for observer in self.observers.read().iter() {
            observer.on_object_released(origin, object);
        }
    }

    /// Subscribe to object-released notifications received by this zone
    pub fn on_object_released_subscribe(&self, observer: Arc<dyn ServiceObserver>) {
        self.observers.write().push(observer);
    }

    // ========================================================================
    // Transports and routing
    // ========================================================================

    /// Register the transport that reaches an adjacent zone
    pub fn add_transport(&self, adjacent: ZoneId, transport: &Arc<dyn Transport>) {
        self.transports
            .insert(adjacent.get(), Arc::downgrade(transport));
    }

    /// The transport registered for an adjacent zone, if still alive
    pub fn get_transport(&self, adjacent: ZoneId) -> Option<Arc<dyn Transport>> {
        self.transports.get(&adjacent.get()).and_then(|w| w.upgrade())
    }

    pub fn remove_transport(&self, adjacent: ZoneId) {
        self.transports.remove(&adjacent.get());
    }

    /// Hold a strong transport reference for this zone's lifetime
    ///
    /// Used by child zones for their parent-facing transport: the parent
    /// zone must outlive the child, so the child pins the link.
    pub fn retain_transport(&self, transport: Arc<dyn Transport>) {
        self.retained_transports.lock().push(transport);
    }

    /// Route for destinations with no direct transport
    pub fn set_default_route(&self, transport: Arc<dyn Transport>) {
        self.default_route.set(transport);
    }

    /// Resolve the outbound transport toward a destination
    ///
    /// Direct hop first, then an established pass-through for the
    /// (destination, caller) pair, then the default route. A candidate that
    /// would bounce the message back where it came from is skipped.
    pub(crate) fn route_to(
        &self,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        arrived_from: Option<KnownDirectionZoneId>,
    ) -> Option<Arc<dyn Transport>> {
        let acceptable = |t: &Arc<dyn Transport>| match arrived_from {
            Some(from) => t.adjacent_zone() != from.as_zone(),
            None => true,
        };

        if let Some(direct) = self.get_transport(destination.as_zone()) {
            if acceptable(&direct) {
                return Some(direct);
            }
        }
        if let Some(pass_through) = self.lookup_pass_through(destination, caller) {
            let forward = pass_through.forward_transport();
            if acceptable(&forward) {
                return Some(forward);
            }
        }
        if let Some(fallback) = self.default_route.get() {
            if acceptable(&fallback) {
                return Some(fallback);
            }
        }
        None
    }

    /// Resolve a next hop without consulting the pass-through registry
    ///
    /// Used while a pass-through is being created, when the registry entry
    /// does not exist yet.
    pub(crate) fn direct_route(
        &self,
        destination: DestinationZoneId,
        arrived_from: Option<KnownDirectionZoneId>,
    ) -> Option<Arc<dyn Transport>> {
        let acceptable = |t: &Arc<dyn Transport>| match arrived_from {
            Some(from) => t.adjacent_zone() != from.as_zone(),
            None => true,
        };
        if let Some(direct) = self.get_transport(destination.as_zone()) {
            if acceptable(&direct) {
                return Some(direct);
            }
        }
        if let Some(fallback) = self.default_route.get() {
            if acceptable(&fallback) {
                return Some(fallback);
            }
        }
        None
    }

    // ========================================================================
    // Pass-throughs
    // ========================================================================

    /// Find or create the unique pass-through for (destination, caller)
    ///
    /// Racing creators both build a candidate; the registry decides the
    /// winner and the loser's half-built candidate is rolled back without
    /// ever becoming observable.
    pub(crate) fn ensure_pass_through(
        self: &Arc<Self>,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        forward: Arc<dyn Transport>,
        reverse: Arc<dyn Transport>,
    ) -> Result<Arc<PassThrough>> {
        let key = (destination.get(), caller.get());
        if let Some(existing) = self.pass_through_registry.get(&key) {
            return Ok(Arc::clone(&existing));
        }

        let candidate = PassThrough::link(destination, caller, forward, reverse, Arc::clone(self))?;

        match self.pass_through_registry.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(winner) => {
                // Lost the race; adopt the winner, roll the candidate back.
                candidate.unlink();
                Ok(Arc::clone(winner.get()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&candidate));
                self.pass_throughs.fetch_add(1, Ordering::SeqCst);
                Ok(candidate)
            }
        }
    }

    /// The pass-through for a (destination, caller) pair, if one exists
    pub fn lookup_pass_through(
        &self,
        destination: DestinationZoneId,
        caller: CallerZoneId,
    ) -> Option<Arc<PassThrough>> {
        self.pass_through_registry
            .get(&(destination.get(), caller.get()))
            .map(|p| Arc::clone(&p))
    }

    /// Remove a pass-through whose counts have drained
    pub(crate) fn retire_pass_through(&self, destination: DestinationZoneId, caller: CallerZoneId) {
        if self
            .pass_through_registry
            .remove(&(destination.get(), caller.get()))
            .is_some()
        {
            self.pass_throughs.fetch_sub(1, Ordering::SeqCst);
            self.maybe_enter_amnesia();
        }
    }

    /// Pass-throughs touching a zone, for the failure cascade
    pub(crate) fn pass_throughs_touching(&self, zone: ZoneId) -> Vec<Arc<PassThrough>> {
        self.pass_through_registry
            .iter()
            .filter(|entry| entry.value().touches(zone))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    // ========================================================================
    // Connection handshake
    // ========================================================================

    /// Install the setup that fabricates the first object this zone exposes
    pub fn set_bootstrap_factory(&self, factory: BootstrapFactory) {
        *self.bootstrap_factory.lock() = Some(factory);
    }

    /// Server side of the handshake for peer transports
    ///
    /// Installs the bootstrap setup and pins the transport until the
    /// initiator's `init_channel` arrives.
    pub fn attach_remote_zone(
        &self,
        _name: &str,
        transport: Arc<dyn Transport>,
        factory: BootstrapFactory,
    ) {
        self.set_bootstrap_factory(factory);
        self.retain_transport(transport);
    }

    /// Client side of the handshake: connect and fetch the bootstrap handle
    pub async fn connect_to_zone(
        self: &Arc<Self>,
        name: &str,
        transport: Arc<dyn Transport>,
        bootstrap: Option<&LocalObject>,
    ) -> Result<RemoteHandle> {
        let caller_object_id = bootstrap
            .map(|object| self.register_local_object(object).object_id())
            .unwrap_or(ObjectId::UNSET);

        let request = InitChannelRequest {
            caller_zone_id: self.zone.get(),
            caller_object_id: caller_object_id.get(),
            destination_zone_id: 0,
            adjacent_zone_id: transport.adjacent_zone().get(),
        };
        let response = transport.init_channel(request).await?.into_result()?;

        let destination = ZoneId::new(response.destination_zone_id);
        if !destination.is_set() {
            return Err(RpcError::InvalidData(
                "handshake response without a destination zone".into(),
            ));
        }
        self.add_transport(destination, &transport);

        // The acceptor now holds one shared unit on our bootstrap stub.
        if caller_object_id.is_set() {
            if let Some(stub) = self.lookup_stub(caller_object_id) {
                stub.add_ref(destination.as_caller(), false)?;
            }
        }

        let bootstrap_object = ObjectId::new(response.destination_object_id);
        if !bootstrap_object.is_set() {
            return Err(RpcError::ObjectNotFound(format!(
                "zone {} ({}) exposed no bootstrap object",
                destination, name
            )));
        }

        let service_proxy = self.service_proxy_for(destination.as_destination(), &transport);
        let object_proxy = service_proxy.object_proxy(bootstrap_object);
        Ok(RemoteHandle::granted(object_proxy, HandleKind::Strong))
    }

    /// Acceptor side of `init_channel`; invoked by the transport layer
    pub(crate) fn accept_channel(
        self: &Arc<Self>,
        request: InitChannelRequest,
        transport: Arc<dyn Transport>,
    ) -> InitChannelResponse {
        if let Err(e) = request.validate() {
            return InitChannelResponse::rejected(&e);
        }
        if request.destination_zone_id != 0 && request.destination_zone_id != self.zone.get() {
            return InitChannelResponse::rejected(&RpcError::ZoneNotFound(format!(
                "zone {} is not served here",
                request.destination_zone_id
            )));
        }

        let object = {
            let factory = self.bootstrap_factory.lock();
            match factory.as_ref() {
                Some(factory) => match factory(self) {
                    Ok(object) => object,
                    Err(e) => return InitChannelResponse::rejected(&e),
                },
                None => {
                    return InitChannelResponse::rejected(&RpcError::ObjectNotFound(
                        "no bootstrap object exposed".into(),
                    ))
                }
            }
        };

        let caller = CallerZoneId::new(request.caller_zone_id);
        let stub = self.register_local_object(&object);
        if let Err(e) = stub.add_ref(caller, false) {
            return InitChannelResponse::rejected(&e);
        }
        self.add_transport(caller.as_zone(), &transport);

        tracing::info!(
            zone = %self.zone,
            caller = %caller,
            bootstrap = %stub.object_id(),
            "accepted channel"
        );
        InitChannelResponse::accepted(
            self.zone.get(),
            stub.object_id().get(),
            request.caller_zone_id,
        )
    }

    /// Find or create the service proxy for a destination zone
    pub fn service_proxy_for(
        self: &Arc<Self>,
        destination: DestinationZoneId,
        transport: &Arc<dyn Transport>,
    ) -> Arc<ServiceProxy> {
        if let Some(existing) = self.service_proxies.get(&destination.get()) {
            return Arc::clone(&existing);
        }
        let created = ServiceProxy::new(destination, self, Arc::clone(transport));
        self.service_proxies
            .insert(destination.get(), Arc::clone(&created));
        created
    }

    /// The service proxy for a destination zone, if one exists
    pub fn lookup_service_proxy(&self, destination: DestinationZoneId) -> Option<Arc<ServiceProxy>> {
        self.service_proxies
            .get(&destination.get())
            .map(|sp| Arc::clone(&sp))
    }

    // ========================================================================
    // Zone lifetime
    // ========================================================================

    pub(crate) fn proxy_created(&self) {
        self.outbound_proxies.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn proxy_removed(&self) {
        self.outbound_proxies.fetch_sub(1, Ordering::SeqCst);
        self.maybe_enter_amnesia();
    }

    pub(crate) fn child_attached(&self) {
        self.child_links.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn child_detached(&self) {
        self.child_links.fetch_sub(1, Ordering::SeqCst);
        self.maybe_enter_amnesia();
    }

    /// Enter amnesia if all three counters are zero and no child remains
    fn maybe_enter_amnesia(&self) {
        let (stubs, proxies, pass_throughs) = self.counters();
        if stubs == 0
            && proxies == 0
            && pass_throughs == 0
            && self.child_links.load(Ordering::SeqCst) == 0
        {
            self.enter_amnesia();
        }
    }

    /// Tear the zone down: disconnect transports, drop registries
    pub fn shutdown(&self) {
        self.enter_amnesia();
    }

    fn enter_amnesia(&self) {
        if self.amnesia.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(zone = %self.zone, name = %self.name, "zone entering amnesia");

        // Signal every transport best-effort, then let go of everything.
        let mut transports: Vec<Arc<dyn Transport>> = self
            .transports
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        transports.extend(self.retained_transports.lock().drain(..));
        if let Some(fallback) = self.default_route.reset() {
            transports.push(fallback);
        }
        for transport in transports {
            transport.set_status(TransportStatus::Disconnected);
        }

        self.transports.clear();
        self.service_proxies.clear();
        telemetry::emit(|s| s.on_service_deleted(self.zone));
    }

    // ========================================================================
    // Failure cascade
    // ========================================================================

    /// Ungraceful loss of the path toward `failed`
    ///
    /// Marks service proxies non-operational, force-releases the failed
    /// zone's reference units, and cascades through every pass-through that
    /// touched the failed zone. Idempotent: a second invocation finds
    /// nothing left to do.
    pub(crate) async fn cascade_transport_down(self: &Arc<Self>, failed: ZoneId) {
        tracing::warn!(zone = %self.zone, %failed, "transport down cascade");

        if let Some(proxy) = self.service_proxies.get(&failed.get()) {
            proxy.mark_non_operational();
        }

        let stubs: Vec<Arc<ObjectStub>> = self
            .stubs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for stub in stubs {
            stub.clear_zone(failed.get());
        }

        let cascading = self.pass_throughs_touching(failed);
        futures::future::join_all(
            cascading
                .iter()
                .map(|pass_through| pass_through.cascade_transport_down(failed)),
        )
        .await;

        self.remove_transport(failed);
        self.maybe_enter_amnesia();
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (stubs, proxies, pass_throughs) = self.counters();
        f.debug_struct("Service")
            .field("zone", &self.zone)
            .field("name", &self.name)
            .field("inbound_stubs", &stubs)
            .field("outbound_proxies", &proxies)
            .field("pass_throughs", &pass_throughs)
            .field("amnesia", &self.is_amnesia())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::InterfaceId;
    use crate::refcount::Strong;
    use crate::stub::{InterfaceDispatch, RemoteObject};

    struct Inert;

    impl RemoteObject for Inert {
        fn interfaces(&self) -> Vec<InterfaceId> {
            vec![InterfaceId::new(1)]
        }

        fn dispatcher(&self, _interface: InterfaceId) -> Option<&dyn InterfaceDispatch> {
            None
        }
    }

    fn service() -> Arc<Service> {
        Service::with_zone(ZoneId::new(1), "test", RuntimeConfig::default())
    }

    #[test]
    fn test_object_ids_are_unique() {
        let service = service();
        let a = service.generate_object_id();
        let b = service.generate_object_id();
        assert_ne!(a, b);
        assert!(a.is_set() && b.is_set());
    }

    #[test]
    fn test_zone_id_generation_avoids_self() {
        let service = service();
        for _ in 0..32 {
            let zone = service.generate_zone_id();
            assert!(zone.is_set());
            assert_ne!(zone, service.zone());
        }
    }

    #[test]
    fn test_registration_is_idempotent() {
        let service = service();
        let object: LocalObject = Strong::new(Box::new(Inert));

        let first = service.register_local_object(&object);
        let second = service.register_local_object(&object);
        assert_eq!(first.object_id(), second.object_id());
        assert_eq!(service.counters().0, 1);

        let other: LocalObject = Strong::new(Box::new(Inert));
        let third = service.register_local_object(&other);
        assert_ne!(first.object_id(), third.object_id());
        assert_eq!(service.counters().0, 2);
    }

    #[test]
    fn test_lookup_stub_round_trip() {
        let service = service();
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = service.register_local_object(&object);

        let found = service.lookup_stub(stub.object_id()).unwrap();
        assert_eq!(found.object_id(), stub.object_id());
        assert!(service.lookup_stub(ObjectId::new(9999)).is_none());
    }

    #[test]
    fn test_stub_retires_when_remote_units_drain() {
        let service = service();
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = service.register_local_object(&object);

        stub.add_ref(CallerZoneId::new(2), false).unwrap();
        assert_eq!(service.counters().0, 1);

        stub.release(CallerZoneId::new(2), crate::marshal::ReleaseFlags::Normal)
            .unwrap();
        assert!(service.lookup_stub(stub.object_id()).is_none());
    }

    #[test]
    fn test_retiring_last_stub_triggers_amnesia() {
        let service = service();
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = service.register_local_object(&object);
        stub.add_ref(CallerZoneId::new(2), false).unwrap();
        assert!(!service.is_amnesia());

        stub.release(CallerZoneId::new(2), crate::marshal::ReleaseFlags::Normal)
            .unwrap();
        assert!(service.is_amnesia());
    }

    #[test]
    fn test_fresh_service_is_not_amnesiac() {
        let service = service();
        assert!(!service.is_amnesia());
        assert_eq!(service.counters(), (0, 0, 0));
    }
}
