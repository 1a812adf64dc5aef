// Pass-throughs
//
// A pass-through is the routing node an intermediary zone keeps for traffic
// between two non-adjacent zones. It pins both adjacent transports and the
// intermediary service, so a zone that is only relaying stays alive. The
// pass-through carries its own shared and optimistic counts, distinct from
// any object's counts; when both drain it removes itself from the registry.
//
// Birth is both-or-neither: the link is taken only with both adjacent
// transports verified connected under their pair locks, and a candidate that
// loses the registry race is rolled back without ever becoming observable.

use crate::error::{Result, RpcError};
use crate::ids::{CallerZoneId, DestinationZoneId, ZoneId};
use crate::marshal::ReleaseFlags;
use crate::service::Service;
use crate::transport::{lock_pair, Transport};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub struct PassThrough {
    destination: DestinationZoneId,
    caller: CallerZoneId,
    /// Adjacent transport toward the destination
    forward: Arc<dyn Transport>,
    /// Adjacent transport toward the caller
    reverse: Arc<dyn Transport>,
    /// Keeps the intermediary zone alive while it is routing
    service: Arc<Service>,
    shared: AtomicU32,
    optimistic: AtomicU32,
    torn_down: AtomicBool,
}

impl PassThrough {
    /// Register the forward/reverse link pair and produce the pass-through
    ///
    /// Fails, leaving nothing registered, unless both transports are
    /// verified connected while their pair locks are held in ascending
    /// adjacent-zone-id order.
    pub(crate) fn link(
        destination: DestinationZoneId,
        caller: CallerZoneId,
        forward: Arc<dyn Transport>,
        reverse: Arc<dyn Transport>,
        service: Arc<Service>,
    ) -> Result<Arc<PassThrough>> {
        {
            let _guards = lock_pair(forward.as_ref(), reverse.as_ref());
            if forward.status() != crate::transport::TransportStatus::Connected {
                return Err(RpcError::TransportError(format!(
                    "forward link toward zone {} is not connected",
                    forward.adjacent_zone()
                )));
            }
            if reverse.status() != crate::transport::TransportStatus::Connected {
                return Err(RpcError::TransportError(format!(
                    "reverse link toward zone {} is not connected",
                    reverse.adjacent_zone()
                )));
            }
        }

        tracing::debug!(
            zone = %service.zone(),
            %destination,
            %caller,
            "pass-through linked"
        );
        Ok(Arc::new(PassThrough {
            destination,
            caller,
            forward,
            reverse,
            service,
            shared: AtomicU32::new(0),
            optimistic: AtomicU32::new(0),
            torn_down: AtomicBool::new(false),
        }))
    }

    /// Roll back a candidate that lost the registry race
    ///
    /// The candidate was never observable; dropping the transport and
    /// service references is the whole rollback.
    pub(crate) fn unlink(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }

    pub fn destination(&self) -> DestinationZoneId {
        self.destination
    }

    pub fn caller(&self) -> CallerZoneId {
        self.caller
    }

    pub fn forward_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.forward)
    }

    pub fn reverse_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.reverse)
    }

    /// (shared, optimistic) counts held by this pass-through
    pub fn counts(&self) -> (u32, u32) {
        (
            self.shared.load(Ordering::SeqCst),
            self.optimistic.load(Ordering::SeqCst),
        )
    }

    /// Whether this pass-through involves `zone` on either side
    pub fn touches(&self, zone: ZoneId) -> bool {
        self.destination.as_zone() == zone
            || self.caller.as_zone() == zone
            || self.forward.adjacent_zone() == zone
            || self.reverse.adjacent_zone() == zone
    }

    /// Count one transiting reference unit
    pub(crate) fn add_unit(&self, optimistic: bool) -> u32 {
        if optimistic {
            self.optimistic.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.shared.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    /// Drop one transiting reference unit; tears down on the last one
    pub(crate) fn remove_unit(&self, flags: ReleaseFlags) -> u32 {
        let remaining = match flags {
            ReleaseFlags::Normal => self
                .shared
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map(|n| n - 1)
                .unwrap_or(0),
            ReleaseFlags::Optimistic => self
                .optimistic
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .map(|n| n - 1)
                .unwrap_or(0),
            ReleaseFlags::ZoneTerminating => {
                self.shared.store(0, Ordering::SeqCst);
                self.optimistic.store(0, Ordering::SeqCst);
                0
            }
        };
        if self.counts() == (0, 0) {
            self.teardown();
        }
        remaining
    }

    /// Graceful removal once both counts have drained
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            zone = %self.service.zone(),
            destination = %self.destination,
            caller = %self.caller,
            "pass-through torn down"
        );
        self.service.retire_pass_through(self.destination, self.caller);
    }

    /// Ungraceful removal: cascade the failure to the surviving side
    ///
    /// The endpoint adjacent to the failed zone is unreachable by
    /// definition, so only the opposite endpoint is notified.
    pub(crate) async fn cascade_transport_down(&self, failed: ZoneId) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let forward_failed =
            self.forward.adjacent_zone() == failed || self.destination.as_zone() == failed;
        let survivor = if forward_failed {
            &self.reverse
        } else {
            &self.forward
        };
        survivor.transport_down(failed).await;
        self.service.retire_pass_through(self.destination, self.caller);
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PassThrough {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (shared, optimistic) = self.counts();
        f.debug_struct("PassThrough")
            .field("destination", &self.destination)
            .field("caller", &self.caller)
            .field("shared", &shared)
            .field("optimistic", &optimistic)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
