// Hierarchical echo scenarios: a child zone calling an object exposed by
// its parent over the in-process transport, reference counts driven back to
// their original state, and zone teardown through amnesia.

mod common;

use canopy::{
    ChildService, HandleKind, RemoteHandle, RpcError, RuntimeConfig, Service, Transport,
    TransportStatus, ZoneId,
};
use common::{calculator, calculator_interface, ADD, MUL};
use std::sync::Arc;

#[tokio::test]
async fn test_child_zone_invokes_parent_object() {
    let parent = Service::with_zone(ZoneId::new(1), "root", RuntimeConfig::default());
    let calc = calculator();
    let exposed = calc.clone();
    parent.set_bootstrap_factory(Box::new(move |_| Ok(exposed.clone())));

    let (child, handle) =
        ChildService::connect(&parent, "child", RuntimeConfig::default(), None)
            .await
            .unwrap();

    let sum: i32 = handle
        .invoke(calculator_interface(), ADD, &(2i32, 3i32))
        .await
        .unwrap();
    assert_eq!(sum, 5);

    let product: i32 = handle
        .invoke(calculator_interface(), MUL, &(6i32, 7i32))
        .await
        .unwrap();
    assert_eq!(product, 42);

    // The parent's stub carries exactly the child's single unit.
    let stub = parent.lookup_stub(handle.object_id()).unwrap();
    assert_eq!(stub.totals(), (1, 0));
    assert_eq!(stub.shared_units_from(child.zone().as_caller()), 1);
    assert_eq!(parent.counters().0, 1);
    assert_eq!(child.counters().1, 1);

    // Conservation: shared count = one local strong + one remote unit.
    assert_eq!(calc.counts().0, 2);

    // Releasing the handle drives every count back where it started and the
    // child zone, with nothing left to do, reaches amnesia; the parent
    // follows once its last child link breaks.
    handle.release().await.unwrap();
    common::settle().await;

    assert!(parent.lookup_stub(stub.object_id()).is_none());
    assert_eq!(calc.counts().0, 1);
    assert_eq!(parent.counters(), (0, 0, 0));
    assert_eq!(child.counters(), (0, 0, 0));
    assert!(child.is_amnesia());
    assert!(parent.is_amnesia());
}

#[tokio::test]
async fn test_cloned_handles_each_carry_a_unit() {
    let parent = Service::with_zone(ZoneId::new(1), "root", RuntimeConfig::default());
    let calc = calculator();
    let exposed = calc.clone();
    parent.set_bootstrap_factory(Box::new(move |_| Ok(exposed.clone())));

    let (child, handle) =
        ChildService::connect(&parent, "child", RuntimeConfig::default(), None)
            .await
            .unwrap();

    let stub = parent.lookup_stub(handle.object_id()).unwrap();
    let twin = handle.clone_strong().await.unwrap();
    assert_eq!(stub.totals(), (2, 0));
    assert_eq!(calc.counts().0, 3);

    // clone_strong followed by release leaves every count unchanged.
    twin.release().await.unwrap();
    assert_eq!(stub.totals(), (1, 0));
    assert_eq!(calc.counts().0, 2);
    assert_eq!(stub.shared_units_from(child.zone().as_caller()), 1);

    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_try_cast_against_remote_object() {
    let parent = Service::with_zone(ZoneId::new(1), "root", RuntimeConfig::default());
    let exposed = calculator();
    parent.set_bootstrap_factory(Box::new(move |_| Ok(exposed.clone())));

    let (_child, handle) =
        ChildService::connect(&parent, "child", RuntimeConfig::default(), None)
            .await
            .unwrap();

    assert!(handle.try_cast(calculator_interface()).await.unwrap());
    let bogus = canopy::InterfaceId::new(0x5eed);
    assert!(!handle.try_cast(bogus).await.unwrap());
    // The result is cached; a second query answers from the proxy.
    assert!(!handle.try_cast(bogus).await.unwrap());

    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_unknown_method_surfaces_method_not_found() {
    let parent = Service::with_zone(ZoneId::new(1), "root", RuntimeConfig::default());
    let exposed = calculator();
    parent.set_bootstrap_factory(Box::new(move |_| Ok(exposed.clone())));

    let (_child, handle) =
        ChildService::connect(&parent, "child", RuntimeConfig::default(), None)
            .await
            .unwrap();

    let err = handle
        .invoke::<(i32, i32), i32>(calculator_interface(), canopy::MethodId::new(99), &(1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound(_)));

    let err = handle
        .invoke::<(i32, i32), i32>(canopy::InterfaceId::new(0x5eed), ADD, &(1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InterfaceNotSupported(_)));

    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_peer_handshake_and_reverse_call() {
    let alpha = Service::with_zone(ZoneId::new(10), "alpha", RuntimeConfig::default());
    let beta = Service::with_zone(ZoneId::new(20), "beta", RuntimeConfig::default());
    let (t_at_alpha, t_at_beta) = canopy::InprocTransport::peer_pair(&alpha, &beta);

    let beta_calc = calculator();
    let exposed = beta_calc.clone();
    beta.attach_remote_zone(
        "beta",
        t_at_beta.clone(),
        Box::new(move |_| Ok(exposed.clone())),
    );

    // Alpha connects and exposes its own bootstrap upward.
    let alpha_calc = calculator();
    let handle = alpha
        .connect_to_zone("beta", t_at_alpha.clone(), Some(&alpha_calc))
        .await
        .unwrap();

    let sum: i32 = handle
        .invoke(calculator_interface(), ADD, &(4i32, 4i32))
        .await
        .unwrap();
    assert_eq!(sum, 8);

    // Beta was granted one unit on alpha's bootstrap during the handshake
    // and can call back down through it.
    let alpha_stub = alpha.register_local_object(&alpha_calc);
    assert_eq!(alpha_stub.shared_units_from(beta.zone().as_caller()), 1);

    let t_toward_alpha: Arc<dyn Transport> = t_at_beta.clone();
    let sp = beta.service_proxy_for(alpha.zone().as_destination(), &t_toward_alpha);
    let reverse = RemoteHandle::granted(
        sp.object_proxy(alpha_stub.object_id()),
        HandleKind::Strong,
    );
    let product: i32 = reverse
        .invoke(calculator_interface(), MUL, &(3i32, 5i32))
        .await
        .unwrap();
    assert_eq!(product, 15);

    reverse.release().await.unwrap();
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_graceful_disconnect_marks_both_endpoints() {
    let alpha = Service::with_zone(ZoneId::new(10), "alpha", RuntimeConfig::default());
    let beta = Service::with_zone(ZoneId::new(20), "beta", RuntimeConfig::default());
    let (t_at_alpha, t_at_beta) = canopy::InprocTransport::peer_pair(&alpha, &beta);

    assert_eq!(t_at_alpha.status(), TransportStatus::Connected);
    assert_eq!(t_at_beta.status(), TransportStatus::Connected);

    t_at_alpha.set_status(TransportStatus::Disconnected);
    assert_eq!(t_at_alpha.status(), TransportStatus::Disconnected);
    assert_eq!(t_at_beta.status(), TransportStatus::Disconnected);
}
