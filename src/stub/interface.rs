// Interface dispatch via capability sets
//
// An object is a value plus a lookup from interface fingerprint to a typed
// dispatcher for that interface. There is no inheritance: a stub asks the
// object for the dispatcher matching the fingerprint on the wire and the
// dispatcher decodes the arguments, invokes the implementation and encodes
// the result. Generated code normally supplies both sides; the traits here
// are the contract it implements.

use crate::error::{Result, RpcError};
use crate::ids::{InterfaceId, MethodId};
use crate::marshal::CodecKind;
use crate::refcount::Strong;
use async_trait::async_trait;

/// Decodes, invokes and encodes one interface's methods
///
/// Method ids are positional ordinals within the interface; an ordinal
/// beyond the dispatcher's table must yield `MethodNotFound`.
#[async_trait]
pub trait InterfaceDispatch: Send + Sync {
    async fn call(&self, method: MethodId, codec: CodecKind, args: &[u8]) -> Result<Vec<u8>>;
}

/// An implementation instance that can be reached from other zones
pub trait RemoteObject: Send + Sync {
    /// The interface fingerprints this object implements
    fn interfaces(&self) -> Vec<InterfaceId>;

    /// The dispatcher for one interface, or `None` if unimplemented
    fn dispatcher(&self, interface: InterfaceId) -> Option<&dyn InterfaceDispatch>;
}

/// The handle type local objects are owned through
pub type LocalObject = Strong<Box<dyn RemoteObject>>;

/// Helper for dispatchers: the canonical method-miss error
pub fn method_not_found(interface: InterfaceId, method: MethodId) -> RpcError {
    RpcError::MethodNotFound(format!(
        "interface {} has no method ordinal {}",
        interface, method
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::codec;

    struct Doubler;

    #[async_trait]
    impl InterfaceDispatch for Doubler {
        async fn call(&self, method: MethodId, codec_kind: CodecKind, args: &[u8]) -> Result<Vec<u8>> {
            match method.get() {
                1 => {
                    let n: i32 = codec::decode(codec_kind, args)?;
                    codec::encode(codec_kind, &(n * 2))
                }
                _ => Err(method_not_found(InterfaceId::new(1), method)),
            }
        }
    }

    struct DoublerObject {
        dispatch: Doubler,
    }

    impl RemoteObject for DoublerObject {
        fn interfaces(&self) -> Vec<InterfaceId> {
            vec![InterfaceId::new(1)]
        }

        fn dispatcher(&self, interface: InterfaceId) -> Option<&dyn InterfaceDispatch> {
            (interface == InterfaceId::new(1)).then_some(&self.dispatch as _)
        }
    }

    #[tokio::test]
    async fn test_dispatch_through_capability_set() {
        let object: LocalObject = Strong::new(Box::new(DoublerObject { dispatch: Doubler }));
        let dispatcher = object.dispatcher(InterfaceId::new(1)).unwrap();

        let args = codec::encode(CodecKind::Binary, &21i32).unwrap();
        let reply = dispatcher
            .call(MethodId::new(1), CodecKind::Binary, &args)
            .await
            .unwrap();
        let result: i32 = codec::decode(CodecKind::Binary, &reply).unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_unknown_method_ordinal() {
        let object: LocalObject = Strong::new(Box::new(DoublerObject { dispatch: Doubler }));
        let dispatcher = object.dispatcher(InterfaceId::new(1)).unwrap();
        let err = dispatcher
            .call(MethodId::new(99), CodecKind::Binary, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(_)));
    }

    #[test]
    fn test_unknown_interface_has_no_dispatcher() {
        let object: LocalObject = Strong::new(Box::new(DoublerObject { dispatch: Doubler }));
        assert!(object.dispatcher(InterfaceId::new(2)).is_none());
    }
}
