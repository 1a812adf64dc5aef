// In-process transport
//
// Connects two zones inside one process: the hierarchy's parent/child link
// and the peer link the scenario tests drive. Each endpoint holds the other
// through a resettable pointer cell (the deliberately cyclic pair), and
// delivery is a direct call into the peer's inbound engine. Disconnection
// breaks both cells; a call already holding its stack-local peer reference
// always completes.

use crate::error::{Result, RpcError};
use crate::ids::{CallerZoneId, DestinationZoneId, InterfaceId, ObjectId, ZoneId};
use crate::marshal::handshake::{InitChannelRequest, InitChannelResponse};
use crate::marshal::version::VersionWindow;
use crate::marshal::{
    AddRefFlags, BackChannel, CallContext, Marshaller, ReleaseFlags, SendReply,
};
use crate::service::Service;
use crate::sync::PtrCell;
use crate::transport::{Transport, TransportCore, TransportStats, TransportStatus};
use async_trait::async_trait;
use std::sync::Arc;

pub struct InprocTransport {
    core: TransportCore,
    peer: PtrCell<InprocTransport>,
    pair_lock: parking_lot::Mutex<()>,
    /// Set on the endpoint living in the parent zone of a hierarchical pair
    parent_side: bool,
}

impl InprocTransport {
    /// Build a connected endpoint pair between two services
    fn pair_with(
        left: &Arc<Service>,
        right: &Arc<Service>,
        hierarchical: bool,
        left_versions: Option<VersionWindow>,
        right_versions: Option<VersionWindow>,
    ) -> (Arc<InprocTransport>, Arc<InprocTransport>) {
        let mut left_core = TransportCore::new(left);
        if let Some(versions) = left_versions {
            left_core = left_core.with_versions(versions);
        }
        let mut right_core = TransportCore::new(right);
        if let Some(versions) = right_versions {
            right_core = right_core.with_versions(versions);
        }

        let left_end = Arc::new(InprocTransport {
            core: left_core,
            peer: PtrCell::empty(),
            pair_lock: parking_lot::Mutex::new(()),
            parent_side: hierarchical,
        });
        let right_end = Arc::new(InprocTransport {
            core: right_core,
            peer: PtrCell::empty(),
            pair_lock: parking_lot::Mutex::new(()),
            parent_side: false,
        });

        left_end.peer.set(Arc::clone(&right_end));
        right_end.peer.set(Arc::clone(&left_end));
        let left_weak: std::sync::Weak<dyn Transport> =
            Arc::downgrade(&(Arc::clone(&left_end) as Arc<dyn Transport>));
        let right_weak: std::sync::Weak<dyn Transport> =
            Arc::downgrade(&(Arc::clone(&right_end) as Arc<dyn Transport>));
        left_end.core.set_owner(left_weak);
        right_end.core.set_owner(right_weak);

        // Adjacency is known up front for an in-process pair.
        left_end.core.set_adjacent_zone(right.zone());
        right_end.core.set_adjacent_zone(left.zone());
        left_end.core.set_status(TransportStatus::Connected);
        right_end.core.set_status(TransportStatus::Connected);

        if hierarchical {
            left.child_attached();
        }
        (left_end, right_end)
    }

    /// Parent/child pair; returns (parent end, child end)
    pub fn hierarchical_pair(
        parent: &Arc<Service>,
        child: &Arc<Service>,
    ) -> (Arc<InprocTransport>, Arc<InprocTransport>) {
        Self::pair_with(parent, child, true, None, None)
    }

    /// Peer pair between two independent zones
    pub fn peer_pair(
        a: &Arc<Service>,
        b: &Arc<Service>,
    ) -> (Arc<InprocTransport>, Arc<InprocTransport>) {
        Self::pair_with(a, b, false, None, None)
    }

    /// Peer pair with explicit version windows, for skewed-peer testing
    pub fn peer_pair_with_versions(
        a: &Arc<Service>,
        a_versions: VersionWindow,
        b: &Arc<Service>,
        b_versions: VersionWindow,
    ) -> (Arc<InprocTransport>, Arc<InprocTransport>) {
        Self::pair_with(a, b, false, Some(a_versions), Some(b_versions))
    }

    pub fn core(&self) -> &TransportCore {
        &self.core
    }

    /// The peer endpoint, or a transport error when disconnected
    fn connected_peer(&self) -> Result<Arc<InprocTransport>> {
        if self.core.status() == TransportStatus::Disconnected {
            return Err(RpcError::TransportError(format!(
                "transport toward zone {} is disconnected",
                self.core.adjacent_zone()
            )));
        }
        self.peer.get().ok_or_else(|| {
            RpcError::TransportError(format!(
                "transport toward zone {} is disconnected",
                self.core.adjacent_zone()
            ))
        })
    }

    /// Break the cyclic endpoint pair after a disconnect on either side
    ///
    /// The parent-side endpoint of a hierarchical pair also drops the
    /// parent's child link; `peer.reset()` makes the break idempotent.
    fn break_link(&self) {
        let was_linked = self.peer.reset().is_some();
        if was_linked && self.parent_side {
            if let Some(service) = self.core.service_ref() {
                service.child_detached();
            }
        }
    }

    /// Simulate an ungraceful transport failure, as a heartbeat detector
    /// would report it on both ends
    pub async fn fail(self: &Arc<Self>) {
        let peer = self.peer.get();

        self.core.set_status(TransportStatus::Disconnected);
        self.break_link();
        self.core
            .handle_transport_down(self.core.adjacent_zone())
            .await;

        if let Some(peer) = peer {
            peer.core.set_status(TransportStatus::Disconnected);
            peer.break_link();
            peer.core
                .handle_transport_down(peer.core.adjacent_zone())
                .await;
        }
    }
}

#[async_trait]
impl Marshaller for InprocTransport {
    async fn send(
        &self,
        ctx: CallContext,
        args: Vec<u8>,
        back: BackChannel,
    ) -> Result<SendReply> {
        let peer = self.connected_peer()?;
        self.core.record_sent(args.len());
        tokio::time::timeout(
            self.core.send_timeout(),
            peer.core.handle_send(ctx, args, back),
        )
        .await
        .map_err(|_| {
            RpcError::TransportError(format!(
                "send toward zone {} timed out",
                self.core.adjacent_zone()
            ))
        })
    }

    async fn post(&self, ctx: CallContext, args: Vec<u8>, back: BackChannel) {
        if let Ok(peer) = self.connected_peer() {
            self.core.record_sent(args.len());
            peer.core.handle_post(ctx, args, back).await;
        }
    }

    async fn try_cast(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        interface: InterfaceId,
    ) -> Result<BackChannel> {
        let peer = self.connected_peer()?;
        peer.core
            .handle_try_cast(version, destination, caller, object, interface)
            .await
    }

    async fn add_ref(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        flags: AddRefFlags,
    ) -> Result<u32> {
        let peer = self.connected_peer()?;
        peer.core
            .handle_add_ref(version, destination, caller, object, flags)
            .await
    }

    async fn release(
        &self,
        version: u64,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
        flags: ReleaseFlags,
    ) -> Result<u32> {
        let peer = self.connected_peer()?;
        peer.core
            .handle_release(version, destination, caller, object, flags)
            .await
    }

    async fn object_released(
        &self,
        destination: DestinationZoneId,
        caller: CallerZoneId,
        object: ObjectId,
    ) {
        if let Ok(peer) = self.connected_peer() {
            peer.core
                .handle_object_released(destination, caller, object)
                .await;
        }
    }

    async fn transport_down(&self, failed: ZoneId) {
        if let Some(peer) = self.peer.get() {
            peer.core.handle_transport_down(failed).await;
        }
    }
}

#[async_trait]
impl Transport for InprocTransport {
    fn local_zone(&self) -> ZoneId {
        self.core.local_zone()
    }

    fn adjacent_zone(&self) -> ZoneId {
        self.core.adjacent_zone()
    }

    fn status(&self) -> TransportStatus {
        self.core.status()
    }

    fn set_status(&self, status: TransportStatus) {
        if status != TransportStatus::Disconnected {
            self.core.set_status(status);
            return;
        }
        if self.core.status() == TransportStatus::Disconnected {
            return;
        }
        self.core.set_status(TransportStatus::Disconnected);

        // Propagate to the adjacent side best-effort, then break the cycle.
        if let Some(peer) = self.peer.get() {
            if peer.core.status() != TransportStatus::Disconnected {
                peer.core.set_status(TransportStatus::Disconnected);
            }
            peer.break_link();
        }
        self.break_link();
    }

    fn stats(&self) -> TransportStats {
        self.core.stats()
    }

    async fn init_channel(&self, request: InitChannelRequest) -> Result<InitChannelResponse> {
        let peer = self.connected_peer()?;
        Ok(peer.core.handle_init_channel(request).await)
    }

    fn pair_lock(&self) -> &parking_lot::Mutex<()> {
        &self.pair_lock
    }
}

impl std::fmt::Debug for InprocTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InprocTransport")
            .field("local_zone", &self.local_zone())
            .field("adjacent_zone", &self.adjacent_zone())
            .field("status", &self.status())
            .field("linked", &self.peer.is_set())
            .finish()
    }
}
