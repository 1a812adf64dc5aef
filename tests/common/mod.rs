// Shared fixtures for the scenario tests
//
// The calculator object stands in for what the interface compiler would
// generate: a fingerprinted interface, a dispatcher keyed by method ordinal,
// and a capability-set implementation.

#![allow(dead_code)]

use async_trait::async_trait;
use canopy::fingerprint::InterfaceSignature;
use canopy::marshal::codec;
use canopy::stub::{method_not_found, InterfaceDispatch, LocalObject, RemoteObject};
use canopy::{
    CodecKind, InterfaceId, InprocTransport, MethodId, Result, RpcError, RuntimeConfig, Service,
    Strong, Transport, ZoneId,
};
use std::sync::Arc;

pub const ADD: MethodId = MethodId::new(1);
pub const MUL: MethodId = MethodId::new(2);

pub fn calculator_interface() -> InterfaceId {
    InterfaceSignature::new(
        "demo.Calculator",
        &["add(i32,i32)->i32", "mul(i32,i32)->i32"],
    )
    .fingerprint()
}

pub struct CalculatorDispatch {
    interface: InterfaceId,
    /// Reject binary payloads, forcing the text-codec fallback
    json_only: bool,
}

#[async_trait]
impl InterfaceDispatch for CalculatorDispatch {
    async fn call(&self, method: MethodId, codec_kind: CodecKind, args: &[u8]) -> Result<Vec<u8>> {
        if self.json_only && codec_kind != CodecKind::Json {
            return Err(RpcError::IncompatibleSerialization(
                "this endpoint only accepts the text codec".into(),
            ));
        }
        match method {
            ADD => {
                let (a, b): (i32, i32) = codec::decode(codec_kind, args)?;
                codec::encode(codec_kind, &(a + b))
            }
            MUL => {
                let (a, b): (i32, i32) = codec::decode(codec_kind, args)?;
                codec::encode(codec_kind, &(a * b))
            }
            other => Err(method_not_found(self.interface, other)),
        }
    }
}

pub struct Calculator {
    dispatch: CalculatorDispatch,
}

impl Calculator {
    fn new(json_only: bool) -> Self {
        Self {
            dispatch: CalculatorDispatch {
                interface: calculator_interface(),
                json_only,
            },
        }
    }
}

impl RemoteObject for Calculator {
    fn interfaces(&self) -> Vec<InterfaceId> {
        vec![calculator_interface()]
    }

    fn dispatcher(&self, interface: InterfaceId) -> Option<&dyn InterfaceDispatch> {
        (interface == calculator_interface()).then_some(&self.dispatch as _)
    }
}

pub fn calculator() -> LocalObject {
    Strong::new(Box::new(Calculator::new(false)))
}

pub fn json_only_calculator() -> LocalObject {
    Strong::new(Box::new(Calculator::new(true)))
}

/// Three zones wired 1 - 2 - 3, transports registered on every side
pub struct Chain {
    pub s1: Arc<Service>,
    pub s2: Arc<Service>,
    pub s3: Arc<Service>,
    pub t12_at_1: Arc<InprocTransport>,
    pub t12_at_2: Arc<InprocTransport>,
    pub t23_at_2: Arc<InprocTransport>,
    pub t23_at_3: Arc<InprocTransport>,
}

pub fn chain() -> Chain {
    canopy::telemetry::init_tracing();
    let s1 = Service::with_zone(ZoneId::new(1), "zone-1", RuntimeConfig::default());
    let s2 = Service::with_zone(ZoneId::new(2), "zone-2", RuntimeConfig::default());
    let s3 = Service::with_zone(ZoneId::new(3), "zone-3", RuntimeConfig::default());

    let (t12_at_1, t12_at_2) = InprocTransport::peer_pair(&s1, &s2);
    let (t23_at_2, t23_at_3) = InprocTransport::peer_pair(&s2, &s3);

    let d12_at_1: Arc<dyn Transport> = t12_at_1.clone();
    let d12_at_2: Arc<dyn Transport> = t12_at_2.clone();
    let d23_at_2: Arc<dyn Transport> = t23_at_2.clone();
    let d23_at_3: Arc<dyn Transport> = t23_at_3.clone();
    s1.add_transport(s2.zone(), &d12_at_1);
    s2.add_transport(s1.zone(), &d12_at_2);
    s2.add_transport(s3.zone(), &d23_at_2);
    s3.add_transport(s2.zone(), &d23_at_3);

    Chain {
        s1,
        s2,
        s3,
        t12_at_1,
        t12_at_2,
        t23_at_2,
        t23_at_3,
    }
}

/// Let spawned notification tasks run
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
