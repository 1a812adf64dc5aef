// Transport layer
//
// A transport is a bidirectional channel between two adjacent zones. The
// concrete byte-moving implementations live outside the core; what lives
// here is everything they share: the status model, traffic accounting, the
// inbound routing engine, pass-through relays for non-adjacent traffic, and
// the failure cascade. The in-process transport is the one concrete
// implementation the runtime itself provides, because the zone hierarchy is
// built on it.

mod core;
mod inproc;
mod passthrough;

pub use self::core::TransportCore;
pub use inproc::InprocTransport;
pub use passthrough::PassThrough;

use crate::error::Result;
use crate::ids::ZoneId;
use crate::marshal::handshake::{InitChannelRequest, InitChannelResponse};
use crate::marshal::Marshaller;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Channel is being established
    Connecting,
    /// Channel is up and carrying traffic
    Connected,
    /// Channel dropped and is being re-established
    Reconnecting,
    /// Channel is down; calls fail synchronously
    Disconnected,
}

/// Snapshot of a transport's traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Atomic backing for `TransportStats`
#[derive(Debug, Default)]
pub(crate) struct AtomicTransportStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl AtomicTransportStats {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// A bidirectional channel between two adjacent zones
///
/// Implementations speak the full marshaller contract and expose the status
/// and identity the routing layer needs. `pair_lock` is the per-transport
/// mutex a pass-through acquires when it must hold both of its adjacent
/// transports; acquisition is always in ascending adjacent-zone-id order.
#[async_trait]
pub trait Transport: Marshaller {
    /// The zone this transport's owning service lives in
    fn local_zone(&self) -> ZoneId;

    /// The zone on the other end of this hop
    fn adjacent_zone(&self) -> ZoneId;

    fn status(&self) -> TransportStatus;

    /// Change status; moving to `Disconnected` propagates to the adjacent
    /// zone best-effort and breaks any circular transport references
    fn set_status(&self, status: TransportStatus);

    fn stats(&self) -> TransportStats;

    /// Run the two-message connection handshake over this transport
    async fn init_channel(&self, request: InitChannelRequest) -> Result<InitChannelResponse>;

    /// Lock serializing two-transport critical sections
    fn pair_lock(&self) -> &parking_lot::Mutex<()>;
}

/// Acquire two transports' pair locks in ascending adjacent-zone-id order
///
/// The ordering rule is the runtime's only multi-lock acquisition and is
/// sufficient to exclude deadlock between racing pass-through operations.
pub(crate) fn lock_pair<'a>(
    a: &'a dyn Transport,
    b: &'a dyn Transport,
) -> (
    parking_lot::MutexGuard<'a, ()>,
    Option<parking_lot::MutexGuard<'a, ()>>,
) {
    let (first, second) = if a.adjacent_zone() <= b.adjacent_zone() {
        (a, b)
    } else {
        (b, a)
    };
    let first_guard = first.pair_lock().lock();
    // The same transport on both sides needs only one lock.
    let second_guard = if std::ptr::eq(
        first.pair_lock() as *const parking_lot::Mutex<()>,
        second.pair_lock() as *const parking_lot::Mutex<()>,
    ) {
        None
    } else {
        Some(second.pair_lock().lock())
    };
    (first_guard, second_guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{CallerZoneId, DestinationZoneId};
    use crate::service::Service;
    use crate::RuntimeConfig;
    use std::sync::Arc;

    fn three_zones() -> (
        Arc<Service>,
        Arc<Service>,
        Arc<Service>,
        Arc<dyn Transport>,
        Arc<dyn Transport>,
    ) {
        let s1 = Service::with_zone(ZoneId::new(1), "zone-1", RuntimeConfig::default());
        let s2 = Service::with_zone(ZoneId::new(2), "zone-2", RuntimeConfig::default());
        let s3 = Service::with_zone(ZoneId::new(3), "zone-3", RuntimeConfig::default());
        let (_, t12_at_2) = InprocTransport::peer_pair(&s1, &s2);
        let (t23_at_2, _) = InprocTransport::peer_pair(&s2, &s3);
        let toward_one: Arc<dyn Transport> = t12_at_2;
        let toward_three: Arc<dyn Transport> = t23_at_2;
        (s1, s2, s3, toward_one, toward_three)
    }

    #[test]
    fn test_lock_pair_orders_by_adjacent_zone() {
        let (_s1, _s2, _s3, toward_one, toward_three) = three_zones();

        // Opposite argument orders take the same lock first, so two racing
        // acquisitions can never hold one lock each and wait on the other.
        let forward = lock_pair(toward_three.as_ref(), toward_one.as_ref());
        drop(forward);
        let reversed = lock_pair(toward_one.as_ref(), toward_three.as_ref());
        drop(reversed);

        // Cross-order acquisition from two threads must not deadlock.
        let a = Arc::clone(&toward_one);
        let b = Arc::clone(&toward_three);
        let handle = std::thread::spawn(move || {
            for _ in 0..10_000 {
                let _guards = lock_pair(a.as_ref(), b.as_ref());
            }
        });
        for _ in 0..10_000 {
            let _guards = lock_pair(toward_three.as_ref(), toward_one.as_ref());
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_lock_pair_with_one_transport_takes_one_lock() {
        let (_s1, _s2, _s3, toward_one, _toward_three) = three_zones();
        let (_first, second) = lock_pair(toward_one.as_ref(), toward_one.as_ref());
        assert!(second.is_none());
    }

    #[test]
    fn test_racing_pass_through_creators_converge_on_one_winner() {
        for _ in 0..200 {
            let (_s1, s2, _s3, toward_one, toward_three) = three_zones();
            let destination = DestinationZoneId::new(3);
            let caller = CallerZoneId::new(1);

            let mut joins = Vec::new();
            for _ in 0..4 {
                let s2 = Arc::clone(&s2);
                let forward = Arc::clone(&toward_three);
                let reverse = Arc::clone(&toward_one);
                joins.push(std::thread::spawn(move || {
                    s2.ensure_pass_through(destination, caller, forward, reverse)
                        .unwrap()
                }));
            }
            let winners: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();

            // Everyone got the same registered instance and the losers left
            // no trace in the registry or the counter.
            assert_eq!(s2.counters().2, 1);
            let registered = s2.lookup_pass_through(destination, caller).unwrap();
            for winner in &winners {
                assert!(Arc::ptr_eq(winner, &registered));
            }
        }
    }

    #[test]
    fn test_pass_through_refuses_disconnected_links() {
        let (_s1, s2, _s3, toward_one, toward_three) = three_zones();
        toward_three.set_status(TransportStatus::Disconnected);

        let result = s2.ensure_pass_through(
            DestinationZoneId::new(3),
            CallerZoneId::new(1),
            Arc::clone(&toward_three),
            Arc::clone(&toward_one),
        );
        assert!(result.is_err());
        // Both-or-neither: the failed attempt left nothing registered.
        assert_eq!(s2.counters().2, 0);
        assert!(s2
            .lookup_pass_through(DestinationZoneId::new(3), CallerZoneId::new(1))
            .is_none());
    }
}
