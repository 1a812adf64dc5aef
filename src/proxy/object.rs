// Object proxies
//
// The local identity of a remote object, keyed by (destination zone,
// object id) through its service proxy's cache. The proxy tracks how many
// reference units it has acquired on the remote stub and sends one matched
// release for each on destruction. The typed call path runs version and
// codec negotiation: one retry at the maximum common version, one retry in
// the text codec every implementation must accept.

use crate::error::{Result, RpcError};
use crate::ids::{InterfaceId, MethodId, ObjectId};
use crate::marshal::version::VersionWindow;
use crate::marshal::{codec, AddRefFlags, BackChannel, CallContext, CodecKind, ReleaseFlags};
use crate::proxy::ServiceProxy;
use crate::telemetry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

fn next_tag() -> u64 {
    NEXT_TAG.fetch_add(1, Ordering::Relaxed)
}

pub struct ObjectProxy {
    object_id: ObjectId,
    service_proxy: Arc<ServiceProxy>,
    /// Units acquired on the remote stub's shared count
    shared_units: AtomicU32,
    /// Units acquired on the remote stub's optimistic count
    optimistic_units: AtomicU32,
    /// Set when the destination announced the object's destruction
    gone: AtomicBool,
    /// Cached `try_cast` outcomes per interface fingerprint
    interface_cache: DashMap<u64, bool>,
}

impl ObjectProxy {
    pub(crate) fn new(object_id: ObjectId, service_proxy: Arc<ServiceProxy>) -> Arc<Self> {
        if let Some(service) = service_proxy.service() {
            service.proxy_created();
        }
        telemetry::emit(|s| {
            s.on_proxy_created(
                service_proxy.local_zone(),
                service_proxy.destination(),
                object_id,
            )
        });
        Arc::new(Self {
            object_id,
            service_proxy,
            shared_units: AtomicU32::new(0),
            optimistic_units: AtomicU32::new(0),
            gone: AtomicBool::new(false),
            interface_cache: DashMap::new(),
        })
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn service_proxy(&self) -> &Arc<ServiceProxy> {
        &self.service_proxy
    }

    /// (shared, optimistic) units this proxy holds on the remote stub
    pub fn units(&self) -> (u32, u32) {
        (
            self.shared_units.load(Ordering::SeqCst),
            self.optimistic_units.load(Ordering::SeqCst),
        )
    }

    /// Whether the destination announced the object's destruction
    pub fn is_gone(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_gone(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    /// Record a unit that was granted out-of-band (handshake bootstrap)
    pub(crate) fn note_granted_unit(&self, optimistic: bool) {
        if optimistic {
            self.optimistic_units.fetch_add(1, Ordering::SeqCst);
        } else {
            self.shared_units.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Acquire one reference unit on the remote stub
    pub(crate) async fn acquire_unit(&self, flags: AddRefFlags) -> Result<u32> {
        let count = self.service_proxy.add_ref(self.object_id, flags).await?;
        if flags.is_optimistic() {
            self.optimistic_units.fetch_add(1, Ordering::SeqCst);
        } else {
            self.shared_units.fetch_add(1, Ordering::SeqCst);
        }
        Ok(count)
    }

    /// Release one previously acquired unit
    pub(crate) async fn release_unit(&self, flags: ReleaseFlags) -> Result<u32> {
        let counter = match flags {
            ReleaseFlags::Optimistic => &self.optimistic_units,
            _ => &self.shared_units,
        };
        let had = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if had.is_err() {
            return Err(RpcError::InvalidData(format!(
                "release without outstanding unit on object {}",
                self.object_id
            )));
        }
        self.service_proxy.release(self.object_id, flags).await
    }

    /// Typed request/response call with negotiation retries
    pub async fn invoke<A, R>(
        &self,
        interface: InterfaceId,
        method: MethodId,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        if self.is_gone() {
            return Err(RpcError::ObjectGone(format!(
                "object {} was released by its zone",
                self.object_id
            )));
        }

        let local: VersionWindow = self.service_proxy.versions();
        let mut version = self.service_proxy.version();
        let mut wire_codec = self.service_proxy.codec();
        let mut retried_version = false;
        let mut retried_codec = false;

        loop {
            let payload = codec::encode(wire_codec, args)?;
            let ctx = CallContext {
                version,
                codec: wire_codec,
                tag: next_tag(),
                caller: self.service_proxy.local_zone().as_caller(),
                destination: self.service_proxy.destination(),
                object: self.object_id,
                interface,
                method,
            };
            let reply = self
                .service_proxy
                .send(ctx, payload, BackChannel::new())
                .await?;
            let (outcome, back) = reply.into_result();
            match outcome {
                Ok(data) => return codec::decode(wire_codec, &data),
                Err(RpcError::InvalidVersion(message)) if !retried_version => {
                    let remote = back
                        .version_hint()
                        .map(|(lowest, highest)| VersionWindow::new(lowest, highest));
                    match remote.and_then(|window| local.common(&window)) {
                        Some(common) => {
                            tracing::debug!(
                                object = %self.object_id,
                                from = version,
                                to = common,
                                "retrying at negotiated protocol version"
                            );
                            version = common;
                            self.service_proxy.set_negotiated_version(common);
                            retried_version = true;
                        }
                        None => return Err(RpcError::InvalidVersion(message)),
                    }
                }
                Err(RpcError::IncompatibleSerialization(_))
                    if !retried_codec && wire_codec != CodecKind::Json =>
                {
                    tracing::debug!(
                        object = %self.object_id,
                        from = ?wire_codec,
                        "falling back to text codec"
                    );
                    wire_codec = CodecKind::Json;
                    self.service_proxy.set_json_fallback();
                    retried_codec = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fire-and-forget typed call
    pub async fn post<A>(&self, interface: InterfaceId, method: MethodId, args: &A) -> Result<()>
    where
        A: Serialize + Sync,
    {
        let wire_codec = self.service_proxy.codec();
        let payload = codec::encode(wire_codec, args)?;
        let ctx = CallContext {
            version: self.service_proxy.version(),
            codec: wire_codec,
            tag: next_tag(),
            caller: self.service_proxy.local_zone().as_caller(),
            destination: self.service_proxy.destination(),
            object: self.object_id,
            interface,
            method,
        };
        self.service_proxy.post(ctx, payload, BackChannel::new()).await;
        Ok(())
    }

    /// Whether the remote object implements an interface, with caching
    pub async fn try_cast(&self, interface: InterfaceId) -> Result<bool> {
        if let Some(cached) = self.interface_cache.get(&interface.get()) {
            return Ok(*cached);
        }
        let outcome = self.service_proxy.try_cast(self.object_id, interface).await;
        let supported = match outcome {
            Ok(_) => true,
            Err(RpcError::InterfaceNotSupported(_)) => false,
            Err(e) => return Err(e),
        };
        self.interface_cache.insert(interface.get(), supported);
        Ok(supported)
    }
}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        telemetry::emit(|s| {
            s.on_proxy_deleted(
                self.service_proxy.local_zone(),
                self.service_proxy.destination(),
                self.object_id,
            )
        });
        self.service_proxy.forget_object_proxy(self.object_id);

        // Outstanding units owe the destination a matched release each. The
        // destructor cannot await, so they are flushed on the runtime when
        // one is available; a zone going down without a runtime leans on the
        // destination's transport_down accounting instead.
        let shared = self.shared_units.load(Ordering::SeqCst);
        let optimistic = self.optimistic_units.load(Ordering::SeqCst);
        if (shared > 0 || optimistic > 0) && !self.is_gone() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let service_proxy = Arc::clone(&self.service_proxy);
                let object_id = self.object_id;
                runtime.spawn(async move {
                    for _ in 0..shared {
                        let _ = service_proxy.release(object_id, ReleaseFlags::Normal).await;
                    }
                    for _ in 0..optimistic {
                        let _ = service_proxy
                            .release(object_id, ReleaseFlags::Optimistic)
                            .await;
                    }
                });
            } else {
                tracing::warn!(
                    object = %self.object_id,
                    shared,
                    optimistic,
                    "object proxy dropped outside a runtime; remote units not released"
                );
            }
        }

        if let Some(service) = self.service_proxy.service() {
            service.proxy_removed();
        }
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (shared, optimistic) = self.units();
        f.debug_struct("ObjectProxy")
            .field("object", &self.object_id)
            .field("destination", &self.service_proxy.destination())
            .field("shared_units", &shared)
            .field("optimistic_units", &optimistic)
            .field("gone", &self.is_gone())
            .finish()
    }
}
