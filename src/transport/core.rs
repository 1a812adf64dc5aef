// Shared inbound engine for transports
//
// Every concrete transport embeds a core and feeds received verbs into it.
// The core decides one of three things per message: deliver into the local
// service, forward through the direct transport for an adjacent destination,
// or relay through the pass-through registered for the (destination, caller)
// pair. Reference-count verbs additionally adjust pass-through counts on
// the way through.

use crate::error::{Result, RpcError};
use crate::ids::{CallerZoneId, DestinationZoneId, InterfaceId, MethodId, ObjectId, ZoneId};
use crate::marshal::handshake::{InitChannelRequest, InitChannelResponse};
use crate::marshal::version::VersionWindow;
use crate::marshal::{AddRefFlags, BackChannel, CallContext, ReleaseFlags, SendReply};
use crate::service::Service;
use crate::telemetry::{self, VerbDirection, VerbEvent, VerbKind};
use crate::transport::{AtomicTransportStats, Transport, TransportStats, TransportStatus};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct TransportCore {
    local_zone: ZoneId,
    adjacent_zone: AtomicU64,
    service: Weak<Service>,
    /// The transport embedding this core, for handing out `Arc<dyn Transport>`
    owner: RwLock<Weak<dyn Transport>>,
    status: RwLock<TransportStatus>,
    versions: VersionWindow,
    send_timeout: Duration,
    stats: AtomicTransportStats,
}

impl TransportCore {
    pub fn new(service: &Arc<Service>) -> Self {
        let unattached: Weak<dyn Transport> = Weak::<crate::transport::InprocTransport>::new();
        Self {
            local_zone: service.zone(),
            adjacent_zone: AtomicU64::new(0),
            service: Arc::downgrade(service),
            owner: RwLock::new(unattached),
            status: RwLock::new(TransportStatus::Connecting),
            versions: service.config().versions,
            send_timeout: service.config().send_timeout,
            stats: AtomicTransportStats::default(),
        }
    }

    /// Override the version window, for skewed-peer testing and staged rollouts
    pub fn with_versions(mut self, versions: VersionWindow) -> Self {
        self.versions = versions;
        self
    }

    pub(crate) fn set_owner(&self, owner: Weak<dyn Transport>) {
        *self.owner.write() = owner;
    }

    pub(crate) fn owner(&self) -> Option<Arc<dyn Transport>> {
        self.owner.read().upgrade()
    }

    pub fn local_zone(&self) -> ZoneId {
        self.local_zone
    }

    pub fn adjacent_zone(&self) -> ZoneId {
        ZoneId::new(self.adjacent_zone.load(Ordering::SeqCst))
    }

    pub(crate) fn set_adjacent_zone(&self, zone: ZoneId) {
        self.adjacent_zone.store(zone.get(), Ordering::SeqCst);
    }

    pub fn status(&self) -> TransportStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: TransportStatus) {
        let previous = {
            let mut guard = self.status.write();
            std::mem::replace(&mut *guard, status)
        };
        if previous != status {
            telemetry::emit(|s| {
                s.on_transport_status(self.local_zone, self.adjacent_zone(), status)
            });
        }
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.stats.record_sent(bytes);
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn versions(&self) -> VersionWindow {
        self.versions
    }

    pub(crate) fn service_ref(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    fn service(&self) -> Result<Arc<Service>> {
        self.service.upgrade().ok_or_else(|| {
            RpcError::ZoneNotFound(format!("zone {} has shut down", self.local_zone))
        })
    }

    fn check_version(&self, version: u64) -> Result<()> {
        if self.versions.supports(version) {
            Ok(())
        } else {
            Err(RpcError::InvalidVersion(format!(
                "version {} outside supported window [{}, {}]",
                version, self.versions.lowest, self.versions.highest
            )))
        }
    }

    fn emit_inbound(
        &self,
        verb: VerbKind,
        caller: CallerZoneId,
        destination: DestinationZoneId,
        object: ObjectId,
        interface: InterfaceId,
        method: MethodId,
    ) {
        let event = VerbEvent {
            direction: VerbDirection::Inbound,
            verb,
            caller,
            destination,
            object,
            interface,
            method,
        };
        telemetry::emit(|s| s.on_verb(self.local_zone, &event));
    }

    fn is_local(&self, destination: DestinationZoneId) -> bool {
        destination.as_zone() == self.local_zone
    }

    // ========================================================================
    // Inbound verbs
    // ========================================================================

    /// Inbound `send`: deliver, direct-hop or relay
    ///
    /// Always produces a reply; errors are folded into the reply's code so
    /// the caller's back-channel (version hints in particular) survives.
    pub async fn handle_send(
        &self,
        ctx: CallContext,
        args: Vec<u8>,
        back: BackChannel,
    ) -> SendReply {
        self.stats.record_received(args.len());
        self.emit_inbound(
            VerbKind::Send,
            ctx.caller,
            ctx.destination,
            ctx.object,
            ctx.interface,
            ctx.method,
        );

        if let Err(e) = self.check_version(ctx.version) {
            let mut hint = BackChannel::new();
            hint.push_version_hint(self.versions.lowest, self.versions.highest);
            return SendReply {
                err: e.code(),
                data: Vec::new(),
                back_channel: hint,
            };
        }

        let service = match self.service() {
            Ok(service) => service,
            Err(e) => return SendReply::error(&e, BackChannel::new()),
        };

        if self.is_local(ctx.destination) {
            let Some(stub) = service.lookup_stub(ctx.object) else {
                return SendReply::error(
                    &RpcError::ObjectNotFound(format!("no stub for object {}", ctx.object)),
                    BackChannel::new(),
                );
            };
            return match stub
                .dispatch_call(ctx.interface, ctx.method, ctx.codec, &args)
                .await
            {
                Ok(data) => SendReply::ok(data, BackChannel::new()),
                Err(e) => SendReply::error(&e, BackChannel::new()),
            };
        }

        let Some(next) = service.route_to(ctx.destination, ctx.caller, Some(self.adjacent_zone().as_direction()))
        else {
            return SendReply::error(
                &RpcError::ZoneNotFound(format!("no route toward zone {}", ctx.destination)),
                BackChannel::new(),
            );
        };
        match next.send(ctx, args, back).await {
            Ok(reply) => reply,
            Err(e) => SendReply::error(&e, BackChannel::new()),
        }
    }

    /// Inbound `post`: like `send` without a reply path
    pub async fn handle_post(&self, ctx: CallContext, args: Vec<u8>, back: BackChannel) {
        self.stats.record_received(args.len());
        self.emit_inbound(
            VerbKind::Post,
            ctx.caller,
            ctx.destination,
            ctx.object,
            ctx.interface,
            ctx.method,
        );

        if self.check_version(ctx.version).is_err() {
            return;
        }
        let Ok(service) = self.service() else {
            return;
        };

        if self.is_local(ctx.destination) {
            if let Some(stub) = service.lookup_stub(ctx.object) {
                if let Err(e) = stub
                    .dispatch_call(ctx.interface, ctx.method, ctx.codec, &args)
                    .await
                {
                    tracing::debug!(zone = %self.local_zone, error = %e, "post dispatch failed");
                }
            }
            return;
        }

        if let Some(next) = service.route_to(ctx.destination, ctx.caller, Some(self.adjacent_zone().as_direction()))
        {
            next.post(ctx, args, back).await;
        }
    }

    /// Inbound `try_cast`
    pub async fn handle_try_cast(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        interface: InterfaceId,
    ) -> Result<BackChannel> {
        self.emit_inbound(
            VerbKind::TryCast,
            caller,
            destination,
            object,
            interface,
            MethodId::UNSET,
        );
        self.check_version(version)?;
        let service = self.service()?;

        if self.is_local(destination) {
            let stub = service.lookup_stub(object).ok_or_else(|| {
                RpcError::ObjectNotFound(format!("no stub for object {}", object))
            })?;
            stub.try_cast(interface)?;
            let mut back = BackChannel::new();
            back.push_interface_descriptor(interface);
            return Ok(back);
        }

        let next = service
            .route_to(destination, caller, Some(self.adjacent_zone().as_direction()))
            .ok_or_else(|| {
                RpcError::ZoneNotFound(format!("no route toward zone {}", destination))
            })?;
        next.try_cast(version, destination, caller, object, interface)
            .await
    }

    /// Inbound `add_ref`: count, route-build, or both
    pub async fn handle_add_ref(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        flags: AddRefFlags,
    ) -> Result<u32> {
        self.emit_inbound(
            VerbKind::AddRef,
            caller,
            destination,
            object,
            InterfaceId::UNSET,
            MethodId::UNSET,
        );
        self.check_version(version)?;
        let service = self.service()?;

        if self.is_local(destination) {
            // A pure relay addressed to this zone has nothing left to build.
            if flags.is_relay() {
                return Ok(0);
            }
            let stub = service.lookup_stub(object).ok_or_else(|| {
                RpcError::ObjectNotFound(format!("no stub for object {}", object))
            })?;
            return stub.add_ref(caller, flags.is_optimistic());
        }

        // Intermediary: make sure the route exists when asked to, adjust the
        // pass-through's counts unless this is a pure relay, then forward.
        let arrival = self.adjacent_zone().as_direction();
        let mut pass_through = service.lookup_pass_through(destination, caller);
        if flags.builds_route() && pass_through.is_none() {
            let forward = service.direct_route(destination, Some(arrival)).ok_or_else(|| {
                RpcError::ZoneNotFound(format!("no route toward zone {}", destination))
            })?;
            let reverse = self.owner().ok_or_else(|| {
                RpcError::TransportError("transport no longer attached".into())
            })?;
            pass_through =
                Some(service.ensure_pass_through(destination, caller, forward, reverse)?);
        }

        if !flags.is_relay() {
            if let Some(pass_through) = &pass_through {
                pass_through.add_unit(flags.is_optimistic());
            }
        }

        let next = pass_through
            .as_ref()
            .map(|p| p.forward_transport())
            .or_else(|| service.direct_route(destination, Some(arrival)))
            .ok_or_else(|| {
                RpcError::ZoneNotFound(format!("no route toward zone {}", destination))
            })?;
        next.add_ref(version, destination, caller, object, flags).await
    }

    /// Inbound `release`
    pub async fn handle_release(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        flags: ReleaseFlags,
    ) -> Result<u32> {
        self.emit_inbound(
            VerbKind::Release,
            caller,
            destination,
            object,
            InterfaceId::UNSET,
            MethodId::UNSET,
        );
        self.check_version(version)?;
        let service = self.service()?;

        if self.is_local(destination) {
            let stub = service.lookup_stub(object).ok_or_else(|| {
                RpcError::ObjectNotFound(format!("no stub for object {}", object))
            })?;
            return stub.release(caller, flags);
        }

        let arrival = self.adjacent_zone().as_direction();
        let pass_through = service.lookup_pass_through(destination, caller);
        let next = pass_through
            .as_ref()
            .map(|p| p.forward_transport())
            .or_else(|| service.direct_route(destination, Some(arrival)))
            .ok_or_else(|| {
                RpcError::ZoneNotFound(format!("no route toward zone {}", destination))
            })?;

        let remaining = next.release(version, destination, caller, object, flags).await?;
        if let Some(pass_through) = pass_through {
            pass_through.remove_unit(flags);
        }
        Ok(remaining)
    }

    /// Inbound `object_released` notification
    pub async fn handle_object_released(
        &self,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
    ) {
        self.emit_inbound(
            VerbKind::ObjectReleased,
            caller,
            destination,
            object,
            InterfaceId::UNSET,
            MethodId::UNSET,
        );
        let Ok(service) = self.service() else {
            return;
        };

        if self.is_local(destination) {
            service.handle_object_released(caller, object);
            return;
        }

        // Notifications retrace a route that was built in the opposite
        // direction, so fall back to the reverse leg of the mirrored pair.
        let arrival = self.adjacent_zone().as_direction();
        let next = service
            .route_to(destination, caller, Some(arrival))
            .or_else(|| {
                service
                    .lookup_pass_through(caller.as_destination(), destination.as_caller())
                    .map(|p| p.reverse_transport())
                    .filter(|t| t.adjacent_zone() != arrival.as_zone())
            });
        if let Some(next) = next {
            next.object_released(destination, caller, object).await;
        } else {
            tracing::debug!(
                zone = %self.local_zone,
                %destination,
                %object,
                "dropping object_released with no route"
            );
        }
    }

    /// Inbound `transport_down` notification
    pub async fn handle_transport_down(&self, failed: ZoneId) {
        self.emit_inbound(
            VerbKind::TransportDown,
            CallerZoneId::UNSET,
            DestinationZoneId::UNSET,
            ObjectId::UNSET,
            InterfaceId::UNSET,
            MethodId::UNSET,
        );
        if let Some(service) = self.service.upgrade() {
            service.cascade_transport_down(failed).await;
        }
    }

    /// Inbound `init_channel` handshake request
    pub async fn handle_init_channel(&self, request: InitChannelRequest) -> InitChannelResponse {
        let Some(service) = self.service.upgrade() else {
            return InitChannelResponse::rejected(&RpcError::ZoneNotFound(format!(
                "zone {} has shut down",
                self.local_zone
            )));
        };
        let Some(owner) = self.owner() else {
            return InitChannelResponse::rejected(&RpcError::TransportError(
                "transport no longer attached".into(),
            ));
        };
        service.accept_channel(request, owner)
    }
}

impl std::fmt::Debug for TransportCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCore")
            .field("local_zone", &self.local_zone)
            .field("adjacent_zone", &self.adjacent_zone())
            .field("status", &self.status())
            .finish()
    }
}
