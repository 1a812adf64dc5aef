// Graceful end-of-life scenarios: an object with an optimistic holder is
// destroyed, the holder's zone is notified proactively, and later access
// yields object-gone rather than object-not-found.

mod common;

use canopy::{
    CallerZoneId, ObjectId, RemoteHandle, RpcError, RuntimeConfig, Service, ServiceObserver,
    Transport, ZoneId,
};
use common::{calculator, calculator_interface, ADD};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Zone B hosts the object; zones A and C are its peers.
struct Triangle {
    sa: Arc<Service>,
    sb: Arc<Service>,
    sc: Arc<Service>,
    tab_at_a: Arc<canopy::InprocTransport>,
    tcb_at_c: Arc<canopy::InprocTransport>,
}

fn triangle() -> Triangle {
    let sa = Service::with_zone(ZoneId::new(1), "zone-a", RuntimeConfig::default());
    let sb = Service::with_zone(ZoneId::new(2), "zone-b", RuntimeConfig::default());
    let sc = Service::with_zone(ZoneId::new(3), "zone-c", RuntimeConfig::default());

    let (tab_at_a, tab_at_b) = canopy::InprocTransport::peer_pair(&sa, &sb);
    let (tcb_at_c, tcb_at_b) = canopy::InprocTransport::peer_pair(&sc, &sb);

    let dab_at_a: Arc<dyn Transport> = tab_at_a.clone();
    let dab_at_b: Arc<dyn Transport> = tab_at_b.clone();
    let dcb_at_c: Arc<dyn Transport> = tcb_at_c.clone();
    let dcb_at_b: Arc<dyn Transport> = tcb_at_b.clone();
    sa.add_transport(sb.zone(), &dab_at_a);
    sb.add_transport(sa.zone(), &dab_at_b);
    sc.add_transport(sb.zone(), &dcb_at_c);
    sb.add_transport(sc.zone(), &dcb_at_b);

    Triangle {
        sa,
        sb,
        sc,
        tab_at_a,
        tcb_at_c,
    }
}

struct ReleaseLog {
    hits: AtomicUsize,
}

impl ServiceObserver for ReleaseLog {
    fn on_object_released(&self, _origin: CallerZoneId, _object: ObjectId) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_optimistic_holder_is_notified_of_destruction() {
    let mesh = triangle();
    let object = calculator();
    let stub = mesh.sb.register_local_object(&object);
    let object_id = stub.object_id();

    // Zone A: one strong handle.
    let toward_b_from_a: Arc<dyn Transport> = mesh.tab_at_a.clone();
    let sp_ab = mesh
        .sa
        .service_proxy_for(mesh.sb.zone().as_destination(), &toward_b_from_a);
    let strong_a = RemoteHandle::acquire(sp_ab.object_proxy(object_id)).await.unwrap();

    // Zone C: an optimistic handle, converted from a temporary strong one.
    let toward_b_from_c: Arc<dyn Transport> = mesh.tcb_at_c.clone();
    let sp_cb = mesh
        .sc
        .service_proxy_for(mesh.sb.zone().as_destination(), &toward_b_from_c);
    let strong_c = RemoteHandle::acquire(sp_cb.object_proxy(object_id)).await.unwrap();
    let optimistic_c = strong_c.make_optimistic().await.unwrap();
    strong_c.release().await.unwrap();

    let log = Arc::new(ReleaseLog {
        hits: AtomicUsize::new(0),
    });
    mesh.sc.on_object_released_subscribe(Arc::clone(&log) as _);

    // The hosting zone's own strong reference goes away; remote units keep
    // the object alive.
    drop(object);
    assert!(!stub.is_destroyed());

    // Zone A drops the last strong reference: the object is destroyed and
    // zone C is told proactively.
    strong_a.release().await.unwrap();
    common::settle().await;

    assert!(stub.is_destroyed());
    assert_eq!(log.hits.load(Ordering::SeqCst), 1);

    // The next use through the optimistic handle is the expected outcome,
    // never the serious one.
    let err = optimistic_c
        .invoke::<(i32, i32), i32>(calculator_interface(), ADD, &(1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ObjectGone(_)));

    // Returning the optimistic unit retires the stub.
    optimistic_c.release().await.unwrap();
    assert!(mesh.sb.lookup_stub(object_id).is_none());
}

#[tokio::test]
async fn test_optimistic_access_without_notification_still_reports_gone() {
    let mesh = triangle();
    let object = calculator();
    let stub = mesh.sb.register_local_object(&object);
    let object_id = stub.object_id();

    let toward_b_from_c: Arc<dyn Transport> = mesh.tcb_at_c.clone();
    let sp_cb = mesh
        .sc
        .service_proxy_for(mesh.sb.zone().as_destination(), &toward_b_from_c);
    let strong_c = RemoteHandle::acquire(sp_cb.object_proxy(object_id)).await.unwrap();
    let optimistic_c = strong_c.make_optimistic().await.unwrap();
    strong_c.release().await.unwrap();

    // Destroyed with no notification having reached the proxy yet: the
    // wire round trip itself classifies the miss per handle flavour.
    drop(object);
    assert!(stub.is_destroyed());

    let err = optimistic_c
        .invoke::<(i32, i32), i32>(calculator_interface(), ADD, &(3, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ObjectGone(_)));

    optimistic_c.release().await.unwrap();
}

#[tokio::test]
async fn test_strong_handle_reports_object_not_found_on_missing_stub() {
    let mesh = triangle();
    let object = calculator();
    let stub = mesh.sb.register_local_object(&object);
    let object_id = stub.object_id();

    // A second exported object keeps zone B out of amnesia for the test.
    let keepalive = calculator();
    let _keepalive_stub = mesh.sb.register_local_object(&keepalive);

    let toward_b_from_a: Arc<dyn Transport> = mesh.tab_at_a.clone();
    let sp_ab = mesh
        .sa
        .service_proxy_for(mesh.sb.zone().as_destination(), &toward_b_from_a);
    let strong_a = RemoteHandle::acquire(sp_ab.object_proxy(object_id)).await.unwrap();

    // Force the stub out from under the strong holder; this is the buggy
    // path, and it must surface as the serious error.
    stub.release(mesh.sa.zone().as_caller(), canopy::ReleaseFlags::Normal)
        .unwrap();
    drop(object);

    let err = strong_a
        .invoke::<(i32, i32), i32>(calculator_interface(), ADD, &(1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ObjectNotFound(_)));

    // The proxy still believes it holds a unit; returning it now reports
    // the imbalance instead of corrupting counts.
    assert!(strong_a.release().await.is_err());
}
