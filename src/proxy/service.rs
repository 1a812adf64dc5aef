// Service proxies
//
// One per destination zone per local service. Every outbound operation
// first obtains a stack-local strong reference to the transport from the
// resettable cell, so an in-flight call survives a concurrent disconnect.
// After a transport failure the proxy is marked non-operational and fails
// all traffic synchronously with a transport error.

use crate::error::{Result, RpcError};
use crate::ids::{CallerZoneId, DestinationZoneId, InterfaceId, ObjectId, ZoneId};
use crate::marshal::version::VersionWindow;
use crate::marshal::{
    AddRefFlags, BackChannel, CallContext, CodecKind, ReleaseFlags, SendReply,
};
use crate::proxy::ObjectProxy;
use crate::service::Service;
use crate::sync::PtrCell;
use crate::telemetry::{self, VerbDirection, VerbEvent, VerbKind};
use crate::transport::Transport;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub struct ServiceProxy {
    destination: DestinationZoneId,
    local_zone: ZoneId,
    service: Weak<Service>,
    transport: PtrCell<dyn Transport>,
    operational: AtomicBool,
    /// 0 until version negotiation settles on something lower than ours
    negotiated_version: AtomicU64,
    /// Set when codec negotiation fell back to the text codec
    json_fallback: AtomicBool,
    versions: VersionWindow,
    default_codec: CodecKind,
    /// Cache of object proxies for this destination, keyed by object id
    proxies: DashMap<u64, Weak<ObjectProxy>>,
}

impl ServiceProxy {
    pub(crate) fn new(
        destination: DestinationZoneId,
        service: &Arc<Service>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            destination,
            local_zone: service.zone(),
            service: Arc::downgrade(service),
            transport: PtrCell::new(transport),
            operational: AtomicBool::new(true),
            negotiated_version: AtomicU64::new(0),
            json_fallback: AtomicBool::new(false),
            versions: service.config().versions,
            default_codec: service.config().default_codec,
            proxies: DashMap::new(),
        })
    }

    pub fn destination(&self) -> DestinationZoneId {
        self.destination
    }

    pub fn local_zone(&self) -> ZoneId {
        self.local_zone
    }

    pub(crate) fn service(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    /// Fail all future traffic and release the transport reference
    pub(crate) fn mark_non_operational(&self) {
        self.operational.store(false, Ordering::SeqCst);
        self.transport.reset();
    }

    /// The supported version window negotiation works against
    pub fn versions(&self) -> VersionWindow {
        self.versions
    }

    /// The protocol version to stamp on the next call
    pub fn version(&self) -> u64 {
        match self.negotiated_version.load(Ordering::SeqCst) {
            0 => self.versions.highest,
            negotiated => negotiated,
        }
    }

    pub(crate) fn set_negotiated_version(&self, version: u64) {
        self.negotiated_version.store(version, Ordering::SeqCst);
    }

    /// The codec to encode the next call with
    pub fn codec(&self) -> CodecKind {
        if self.json_fallback.load(Ordering::SeqCst) {
            CodecKind::Json
        } else {
            self.default_codec
        }
    }

    pub(crate) fn set_json_fallback(&self) {
        self.json_fallback.store(true, Ordering::SeqCst);
    }

    fn caller(&self) -> CallerZoneId {
        self.local_zone.as_caller()
    }

    /// Stack-local strong transport reference, or a synchronous failure
    fn transport(&self) -> Result<Arc<dyn Transport>> {
        if !self.is_operational() {
            return Err(RpcError::TransportError(format!(
                "zone {} is unreachable",
                self.destination
            )));
        }
        self.transport.get().ok_or_else(|| {
            RpcError::TransportError(format!("no transport toward zone {}", self.destination))
        })
    }

    /// Find or create the object proxy for a remote object
    ///
    /// The entry lock serializes racing creators so one proxy identity
    /// exists per (destination, object) at any instant.
    pub fn object_proxy(self: &Arc<Self>, object: ObjectId) -> Arc<ObjectProxy> {
        match self.proxies.entry(object.get()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if let Some(existing) = entry.get().upgrade() {
                    return existing;
                }
                let created = ObjectProxy::new(object, Arc::clone(self));
                entry.insert(Arc::downgrade(&created));
                created
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let created = ObjectProxy::new(object, Arc::clone(self));
                slot.insert(Arc::downgrade(&created));
                created
            }
        }
    }

    /// Look up a live object proxy without creating one
    pub fn lookup_object_proxy(&self, object: ObjectId) -> Option<Arc<ObjectProxy>> {
        self.proxies.get(&object.get()).and_then(|e| e.upgrade())
    }

    pub(crate) fn forget_object_proxy(&self, object: ObjectId) {
        self.proxies
            .remove_if(&object.get(), |_, weak| weak.strong_count() == 0);
    }

    fn emit_verb(&self, verb: VerbKind, object: ObjectId, interface: InterfaceId, method: crate::ids::MethodId) {
        let event = VerbEvent {
            direction: VerbDirection::Outbound,
            verb,
            caller: self.caller(),
            destination: self.destination,
            object,
            interface,
            method,
        };
        telemetry::emit(|s| s.on_verb(self.local_zone, &event));
    }

    /// Forward a `send` through the transport
    pub async fn send(
        &self,
        ctx: CallContext,
        args: Vec<u8>,
        back: BackChannel,
    ) -> Result<SendReply> {
        let transport = self.transport()?;
        self.emit_verb(VerbKind::Send, ctx.object, ctx.interface, ctx.method);
        transport.send(ctx, args, back).await
    }

    /// Forward a `post`; silently dropped when the transport is gone
    pub async fn post(&self, ctx: CallContext, args: Vec<u8>, back: BackChannel) {
        if let Ok(transport) = self.transport() {
            self.emit_verb(VerbKind::Post, ctx.object, ctx.interface, ctx.method);
            transport.post(ctx, args, back).await;
        }
    }

    /// The version to retry a rejected control verb at, if any
    ///
    /// Control verbs carry no back-channel, so the single downgrade retry
    /// aims at the local window's floor rather than a peer-provided hint.
    fn downgrade_version(&self, attempted: u64) -> Option<u64> {
        (attempted > self.versions.lowest).then_some(self.versions.lowest)
    }

    pub async fn try_cast(&self, object: ObjectId, interface: InterfaceId) -> Result<BackChannel> {
        let transport = self.transport()?;
        self.emit_verb(VerbKind::TryCast, object, interface, crate::ids::MethodId::UNSET);
        let version = self.version();
        match transport
            .try_cast(version, self.destination, self.caller(), object, interface)
            .await
        {
            Err(RpcError::InvalidVersion(_)) if self.downgrade_version(version).is_some() => {
                let retry = self.versions.lowest;
                let back = transport
                    .try_cast(retry, self.destination, self.caller(), object, interface)
                    .await?;
                self.set_negotiated_version(retry);
                Ok(back)
            }
            other => other,
        }
    }

    pub async fn add_ref(&self, object: ObjectId, flags: AddRefFlags) -> Result<u32> {
        let transport = self.transport()?;
        self.emit_verb(
            VerbKind::AddRef,
            object,
            InterfaceId::UNSET,
            crate::ids::MethodId::UNSET,
        );
        let version = self.version();
        match transport
            .add_ref(version, self.destination, self.caller(), object, flags)
            .await
        {
            Err(RpcError::InvalidVersion(_)) if self.downgrade_version(version).is_some() => {
                let retry = self.versions.lowest;
                let count = transport
                    .add_ref(retry, self.destination, self.caller(), object, flags)
                    .await?;
                self.set_negotiated_version(retry);
                Ok(count)
            }
            other => other,
        }
    }

    pub async fn release(&self, object: ObjectId, flags: ReleaseFlags) -> Result<u32> {
        let transport = self.transport()?;
        self.emit_verb(
            VerbKind::Release,
            object,
            InterfaceId::UNSET,
            crate::ids::MethodId::UNSET,
        );
        let version = self.version();
        match transport
            .release(version, self.destination, self.caller(), object, flags)
            .await
        {
            Err(RpcError::InvalidVersion(_)) if self.downgrade_version(version).is_some() => {
                let retry = self.versions.lowest;
                let count = transport
                    .release(retry, self.destination, self.caller(), object, flags)
                    .await?;
                self.set_negotiated_version(retry);
                Ok(count)
            }
            other => other,
        }
    }

    pub async fn object_released(&self, object: ObjectId) {
        if let Ok(transport) = self.transport() {
            self.emit_verb(
                VerbKind::ObjectReleased,
                object,
                InterfaceId::UNSET,
                crate::ids::MethodId::UNSET,
            );
            transport
                .object_released(self.destination, self.caller(), object)
                .await;
        }
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("destination", &self.destination)
            .field("local_zone", &self.local_zone)
            .field("operational", &self.is_operational())
            .finish()
    }
}
