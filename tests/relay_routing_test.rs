// Multi-hop routing scenarios: pass-through creation and accounting in an
// intermediary zone, relay add_refs that build routes without counting, and
// racing creators converging on a single registered pass-through.

mod common;

use canopy::marshal::version::PROTOCOL_VERSION;
use canopy::{AddRefFlags, Marshaller, RemoteHandle, Transport};
use common::{calculator, calculator_interface, chain, ADD};
use std::sync::Arc;

#[tokio::test]
async fn test_relay_counts_and_tears_down_pass_through() {
    let mesh = chain();
    let object = calculator();
    let stub = mesh.s3.register_local_object(&object);
    let object_id = stub.object_id();

    let toward_two: Arc<dyn Transport> = mesh.t12_at_1.clone();
    let sp = mesh
        .s1
        .service_proxy_for(mesh.s3.zone().as_destination(), &toward_two);
    let proxy = sp.object_proxy(object_id);

    let strong =
        RemoteHandle::acquire_with(proxy, AddRefFlags::BUILD_DESTINATION_ROUTE)
            .await
            .unwrap();

    // Calls traverse the relay end to end.
    let sum: i32 = strong
        .invoke(calculator_interface(), ADD, &(20i32, 22i32))
        .await
        .unwrap();
    assert_eq!(sum, 42);

    // Exactly one pass-through for (destination 3, caller 1) in zone 2.
    assert_eq!(mesh.s2.counters().2, 1);
    let pass_through = mesh
        .s2
        .lookup_pass_through(mesh.s3.zone().as_destination(), mesh.s1.zone().as_caller())
        .unwrap();
    assert_eq!(pass_through.counts(), (1, 0));
    assert_eq!(stub.totals(), (1, 0));

    // Converting to optimistic adds a transiting optimistic unit.
    let optimistic = strong.make_optimistic().await.unwrap();
    assert_eq!(pass_through.counts(), (1, 1));
    assert_eq!(stub.totals(), (1, 1));

    // Dropping the strong leg leaves the optimistic one routing.
    strong.release().await.unwrap();
    assert_eq!(pass_through.counts(), (0, 1));
    assert_eq!(stub.totals(), (0, 1));
    assert!(!pass_through.is_torn_down());

    // Draining the optimistic leg tears the pass-through down and the
    // intermediary's counter follows.
    optimistic.release().await.unwrap();
    assert!(pass_through.is_torn_down());
    assert_eq!(mesh.s2.counters().2, 0);
    assert!(mesh
        .s2
        .lookup_pass_through(mesh.s3.zone().as_destination(), mesh.s1.zone().as_caller())
        .is_none());
}

#[tokio::test]
async fn test_relay_add_ref_builds_route_without_counting() {
    let mesh = chain();
    let object = calculator();
    let stub = mesh.s3.register_local_object(&object);
    let object_id = stub.object_id();

    let relay = AddRefFlags::BUILD_CALLER_ROUTE | AddRefFlags::BUILD_DESTINATION_ROUTE;
    mesh.t12_at_1
        .add_ref(
            PROTOCOL_VERSION,
            mesh.s3.zone().as_destination(),
            mesh.s1.zone().as_caller(),
            object_id,
            relay,
        )
        .await
        .unwrap();

    // The route exists, but neither the intermediary nor the destination
    // counted anything.
    let pass_through = mesh
        .s2
        .lookup_pass_through(mesh.s3.zone().as_destination(), mesh.s1.zone().as_caller())
        .unwrap();
    assert_eq!(pass_through.counts(), (0, 0));
    assert_eq!(stub.totals(), (0, 0));
    assert_eq!(mesh.s2.counters().2, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_acquires_share_one_pass_through() {
    for _ in 0..32 {
        let mesh = chain();
        let object = calculator();
        let stub = mesh.s3.register_local_object(&object);
        let object_id = stub.object_id();

        let toward_two: Arc<dyn Transport> = mesh.t12_at_1.clone();
        let sp = mesh
            .s1
            .service_proxy_for(mesh.s3.zone().as_destination(), &toward_two);
        let proxy = sp.object_proxy(object_id);

        let (a, b) = tokio::join!(
            RemoteHandle::acquire_with(
                Arc::clone(&proxy),
                AddRefFlags::BUILD_DESTINATION_ROUTE
            ),
            RemoteHandle::acquire_with(
                Arc::clone(&proxy),
                AddRefFlags::BUILD_DESTINATION_ROUTE
            ),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        // One winner in the registry, both units counted on it.
        assert_eq!(mesh.s2.counters().2, 1);
        let pass_through = mesh
            .s2
            .lookup_pass_through(mesh.s3.zone().as_destination(), mesh.s1.zone().as_caller())
            .unwrap();
        assert_eq!(pass_through.counts(), (2, 0));
        assert_eq!(stub.totals(), (2, 0));

        a.release().await.unwrap();
        b.release().await.unwrap();
        assert_eq!(mesh.s2.counters().2, 0);
    }
}
