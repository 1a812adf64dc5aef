// Object stubs
//
// One stub per marshalled object. The stub adopts remote reference units
// directly against the object's control block, so the shared count is always
// the sum of local strong handles and remote units. Units are recorded per
// caller zone; that is what lets a transport failure force-release exactly
// the references that came from the failed zone and nothing else.

use crate::error::{Result, RpcError};
use crate::ids::{CallerZoneId, InterfaceId, MethodId, ObjectId, ZoneId};
use crate::marshal::{CodecKind, ReleaseFlags};
use crate::refcount::WeakRef;
use crate::service::Service;
use crate::stub::{LocalObject, RemoteObject};
use crate::telemetry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Weak;

pub struct ObjectStub {
    object_id: ObjectId,
    zone: ZoneId,
    service: Weak<Service>,
    target: WeakRef<Box<dyn RemoteObject>>,
    /// Capability set snapshot taken at registration
    interfaces: Vec<InterfaceId>,
    /// Shared units recorded per caller zone
    shared_by_zone: DashMap<u64, u32>,
    /// Optimistic units recorded per caller zone
    optimistic_by_zone: DashMap<u64, u32>,
    remote_shared: AtomicU32,
    remote_optimistic: AtomicU32,
}

impl ObjectStub {
    pub(crate) fn new(
        object_id: ObjectId,
        zone: ZoneId,
        service: Weak<Service>,
        object: &LocalObject,
    ) -> Self {
        Self {
            object_id,
            zone,
            service,
            target: object.downgrade(),
            interfaces: object.interfaces(),
            shared_by_zone: DashMap::new(),
            optimistic_by_zone: DashMap::new(),
            remote_shared: AtomicU32::new(0),
            remote_optimistic: AtomicU32::new(0),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Allocation identity of the object, for idempotent registration
    pub(crate) fn identity(&self) -> usize {
        self.target.identity()
    }

    /// The interface fingerprints the object implements
    pub fn interfaces(&self) -> &[InterfaceId] {
        &self.interfaces
    }

    /// Whether the underlying value has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.target.is_destroyed()
    }

    /// Total remote (shared, optimistic) units currently adopted
    pub fn totals(&self) -> (u32, u32) {
        (
            self.remote_shared.load(Ordering::SeqCst),
            self.remote_optimistic.load(Ordering::SeqCst),
        )
    }

    /// Shared units recorded for one caller zone
    pub fn shared_units_from(&self, caller: CallerZoneId) -> u32 {
        self.shared_by_zone.get(&caller.get()).map(|e| *e).unwrap_or(0)
    }

    /// Optimistic units recorded for one caller zone
    pub fn optimistic_units_from(&self, caller: CallerZoneId) -> u32 {
        self.optimistic_by_zone
            .get(&caller.get())
            .map(|e| *e)
            .unwrap_or(0)
    }

    /// Zones currently holding optimistic units
    ///
    /// These are the zones that receive `object_released` when the value is
    /// destroyed gracefully.
    pub fn optimistic_zones(&self) -> Vec<u64> {
        self.optimistic_by_zone
            .iter()
            .filter(|e| *e.value() > 0)
            .map(|e| *e.key())
            .collect()
    }

    /// Adopt one remote reference unit from `caller`
    ///
    /// Returns the new total for the count that was adjusted.
    pub fn add_ref(&self, caller: CallerZoneId, optimistic: bool) -> Result<u32> {
        if optimistic {
            if self.target.is_destroyed() {
                return Err(RpcError::ObjectNotFound(format!(
                    "object {} already destroyed",
                    self.object_id
                )));
            }
            self.target.adopt_optimistic_unit();
            *self.optimistic_by_zone.entry(caller.get()).or_insert(0) += 1;
            let total = self.remote_optimistic.fetch_add(1, Ordering::SeqCst) + 1;
            telemetry::emit(|s| {
                s.on_stub_ref_delta(self.zone, self.object_id, caller, 0, 1)
            });
            Ok(total)
        } else {
            self.target.adopt_unit().ok_or_else(|| {
                RpcError::ObjectNotFound(format!(
                    "object {} already destroyed",
                    self.object_id
                ))
            })?;
            *self.shared_by_zone.entry(caller.get()).or_insert(0) += 1;
            let total = self.remote_shared.fetch_add(1, Ordering::SeqCst) + 1;
            telemetry::emit(|s| {
                s.on_stub_ref_delta(self.zone, self.object_id, caller, 1, 0)
            });
            Ok(total)
        }
    }

    /// Release one previously adopted unit from `caller`
    ///
    /// Returns the remaining total for the count that was adjusted. The stub
    /// retires itself from the service once both totals reach zero.
    pub fn release(&self, caller: CallerZoneId, flags: ReleaseFlags) -> Result<u32> {
        let remaining = match flags {
            ReleaseFlags::Normal => self.release_shared_unit(caller)?,
            ReleaseFlags::Optimistic => self.release_optimistic_unit(caller)?,
            ReleaseFlags::ZoneTerminating => {
                self.clear_zone(caller.get());
                0
            }
        };
        self.retire_if_unreferenced();
        Ok(remaining)
    }

    fn release_shared_unit(&self, caller: CallerZoneId) -> Result<u32> {
        let taken = {
            let mut entry = self.shared_by_zone.entry(caller.get()).or_insert(0);
            if *entry == 0 {
                false
            } else {
                *entry -= 1;
                true
            }
        };
        if !taken {
            return Err(RpcError::InvalidData(format!(
                "release without matching add_ref for object {} from zone {}",
                self.object_id, caller
            )));
        }
        self.target.release_unit();
        let remaining = self.remote_shared.fetch_sub(1, Ordering::SeqCst) - 1;
        telemetry::emit(|s| s.on_stub_ref_delta(self.zone, self.object_id, caller, -1, 0));
        Ok(remaining)
    }

    fn release_optimistic_unit(&self, caller: CallerZoneId) -> Result<u32> {
        let taken = {
            let mut entry = self.optimistic_by_zone.entry(caller.get()).or_insert(0);
            if *entry == 0 {
                false
            } else {
                *entry -= 1;
                true
            }
        };
        if !taken {
            return Err(RpcError::InvalidData(format!(
                "optimistic release without matching add_ref for object {} from zone {}",
                self.object_id, caller
            )));
        }
        self.target.release_optimistic_unit();
        let remaining = self.remote_optimistic.fetch_sub(1, Ordering::SeqCst) - 1;
        telemetry::emit(|s| s.on_stub_ref_delta(self.zone, self.object_id, caller, 0, -1));
        Ok(remaining)
    }

    /// Force-release every unit recorded for `zone`
    ///
    /// The forced equivalent of the releases a failed zone will never send.
    /// Returns the (shared, optimistic) unit counts that were dropped.
    pub fn clear_zone(&self, zone: u64) -> (u32, u32) {
        let shared = self
            .shared_by_zone
            .remove(&zone)
            .map(|(_, n)| n)
            .unwrap_or(0);
        for _ in 0..shared {
            self.target.release_unit();
        }
        if shared > 0 {
            self.remote_shared.fetch_sub(shared, Ordering::SeqCst);
        }

        let optimistic = self
            .optimistic_by_zone
            .remove(&zone)
            .map(|(_, n)| n)
            .unwrap_or(0);
        for _ in 0..optimistic {
            self.target.release_optimistic_unit();
        }
        if optimistic > 0 {
            self.remote_optimistic.fetch_sub(optimistic, Ordering::SeqCst);
        }

        if shared > 0 || optimistic > 0 {
            telemetry::emit(|s| {
                s.on_stub_ref_delta(
                    self.zone,
                    self.object_id,
                    CallerZoneId::new(zone),
                    -(shared as i64),
                    -(optimistic as i64),
                )
            });
        }
        self.retire_if_unreferenced();
        (shared, optimistic)
    }

    fn retire_if_unreferenced(&self) {
        let (shared, optimistic) = self.totals();
        if shared == 0 && optimistic == 0 {
            if let Some(service) = self.service.upgrade() {
                service.retire_stub(self.object_id);
            }
        }
    }

    /// Whether any remote zone still holds units on this stub
    pub fn has_remote_refs(&self) -> bool {
        let (shared, optimistic) = self.totals();
        shared > 0 || optimistic > 0
    }

    /// Answer a `try_cast` against the capability set
    pub fn try_cast(&self, interface: InterfaceId) -> Result<()> {
        if self.interfaces.contains(&interface) {
            Ok(())
        } else {
            Err(RpcError::InterfaceNotSupported(format!(
                "object {} does not implement interface {}",
                self.object_id, interface
            )))
        }
    }

    /// Dispatch an inbound call to the implementation
    pub async fn dispatch_call(
        &self,
        interface: InterfaceId,
        method: MethodId,
        codec: CodecKind,
        args: &[u8],
    ) -> Result<Vec<u8>> {
        let guard = self.target.upgrade().ok_or_else(|| {
            RpcError::ObjectNotFound(format!("object {} already destroyed", self.object_id))
        })?;
        let dispatcher = guard.dispatcher(interface).ok_or_else(|| {
            RpcError::InterfaceNotSupported(format!(
                "object {} does not implement interface {}",
                self.object_id, interface
            ))
        })?;
        dispatcher.call(method, codec, args).await
    }
}

impl std::fmt::Debug for ObjectStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (shared, optimistic) = self.totals();
        f.debug_struct("ObjectStub")
            .field("object", &self.object_id)
            .field("zone", &self.zone)
            .field("remote_shared", &shared)
            .field("remote_optimistic", &optimistic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::Strong;
    use crate::stub::InterfaceDispatch;

    struct Inert;

    impl RemoteObject for Inert {
        fn interfaces(&self) -> Vec<InterfaceId> {
            vec![InterfaceId::new(10)]
        }

        fn dispatcher(&self, _interface: InterfaceId) -> Option<&dyn InterfaceDispatch> {
            None
        }
    }

    fn stub_over(object: &LocalObject) -> ObjectStub {
        ObjectStub::new(ObjectId::new(1), ZoneId::new(1), Weak::new(), object)
    }

    #[test]
    fn test_add_ref_release_round_trip_restores_counts() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        let before = object.counts();

        stub.add_ref(CallerZoneId::new(2), false).unwrap();
        assert_eq!(object.counts().0, before.0 + 1);
        assert_eq!(stub.shared_units_from(CallerZoneId::new(2)), 1);

        let remaining = stub.release(CallerZoneId::new(2), ReleaseFlags::Normal).unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(object.counts(), before);
    }

    #[test]
    fn test_remote_units_keep_object_alive() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        stub.add_ref(CallerZoneId::new(2), false).unwrap();

        drop(object);
        assert!(!stub.is_destroyed());

        stub.release(CallerZoneId::new(2), ReleaseFlags::Normal).unwrap();
        assert!(stub.is_destroyed());
    }

    #[test]
    fn test_optimistic_units_do_not_keep_object_alive() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        stub.add_ref(CallerZoneId::new(3), true).unwrap();

        drop(object);
        assert!(stub.is_destroyed());
        assert_eq!(stub.totals(), (0, 1));
        assert_eq!(stub.optimistic_zones(), vec![3]);

        stub.release(CallerZoneId::new(3), ReleaseFlags::Optimistic).unwrap();
        assert_eq!(stub.totals(), (0, 0));
    }

    #[test]
    fn test_unbalanced_release_is_rejected() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        let err = stub
            .release(CallerZoneId::new(2), ReleaseFlags::Normal)
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidData(_)));
    }

    #[test]
    fn test_clear_zone_releases_only_that_zone() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        stub.add_ref(CallerZoneId::new(2), false).unwrap();
        stub.add_ref(CallerZoneId::new(2), false).unwrap();
        stub.add_ref(CallerZoneId::new(3), false).unwrap();

        let (shared, optimistic) = stub.clear_zone(2);
        assert_eq!((shared, optimistic), (2, 0));
        assert_eq!(stub.totals(), (1, 0));
        assert_eq!(stub.shared_units_from(CallerZoneId::new(3)), 1);
        assert!(!stub.is_destroyed());
    }

    #[test]
    fn test_zone_terminating_release_clears_the_zone() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        stub.add_ref(CallerZoneId::new(2), false).unwrap();
        stub.add_ref(CallerZoneId::new(2), true).unwrap();

        stub.release(CallerZoneId::new(2), ReleaseFlags::ZoneTerminating)
            .unwrap();
        assert_eq!(stub.totals(), (0, 0));
    }

    #[test]
    fn test_add_ref_after_destruction_fails() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        drop(object);

        assert!(matches!(
            stub.add_ref(CallerZoneId::new(2), false),
            Err(RpcError::ObjectNotFound(_))
        ));
        assert!(matches!(
            stub.add_ref(CallerZoneId::new(2), true),
            Err(RpcError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_try_cast_against_capability_set() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        assert!(stub.try_cast(InterfaceId::new(10)).is_ok());
        assert!(matches!(
            stub.try_cast(InterfaceId::new(11)),
            Err(RpcError::InterfaceNotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_after_destruction_reports_object_not_found() {
        let object: LocalObject = Strong::new(Box::new(Inert));
        let stub = stub_over(&object);
        drop(object);

        let err = stub
            .dispatch_call(InterfaceId::new(10), MethodId::new(1), CodecKind::Binary, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ObjectNotFound(_)));
    }
}
