// Remote handles
//
// The application-visible reference to a remote object. A strong handle
// keeps the object alive across zones; an optimistic handle keeps only the
// routing path alive and is obtained by converting a strong one. A dangling
// optimistic access yields object-gone, which callers of independently
// managed objects are expected to handle by dropping the handle.

use crate::error::{Result, RpcError};
use crate::ids::{InterfaceId, MethodId, ObjectId};
use crate::marshal::{AddRefFlags, ReleaseFlags};
use crate::proxy::ObjectProxy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The flavour of a remote handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Strong,
    Optimistic,
}

pub struct RemoteHandle {
    proxy: Arc<ObjectProxy>,
    kind: HandleKind,
    released: AtomicBool,
}

impl RemoteHandle {
    /// Wrap a unit that was granted out-of-band
    ///
    /// Used for handshake bootstrap objects and by generated code when a
    /// handle arrives inside another call's payload: the destination already
    /// counted the unit, so no `add_ref` is sent.
    pub fn granted(proxy: Arc<ObjectProxy>, kind: HandleKind) -> Self {
        proxy.note_granted_unit(kind == HandleKind::Optimistic);
        Self {
            proxy,
            kind,
            released: AtomicBool::new(false),
        }
    }

    /// Acquire a new strong handle on a remote object
    pub async fn acquire(proxy: Arc<ObjectProxy>) -> Result<RemoteHandle> {
        Self::acquire_with(proxy, AddRefFlags::empty()).await
    }

    /// Acquire a strong handle, requesting route building along the way
    ///
    /// The flags carry the route-building bits for intermediary zones; the
    /// optimistic bit is not valid here, since optimistic handles are only
    /// obtained by converting a strong one.
    pub async fn acquire_with(proxy: Arc<ObjectProxy>, flags: AddRefFlags) -> Result<RemoteHandle> {
        if flags.is_optimistic() {
            return Err(RpcError::InvalidData(
                "optimistic handles are converted from strong handles".into(),
            ));
        }
        proxy.acquire_unit(flags).await?;
        Ok(Self {
            proxy,
            kind: HandleKind::Strong,
            released: AtomicBool::new(false),
        })
    }

    /// Duplicate a strong handle, acquiring its own unit
    pub async fn clone_strong(&self) -> Result<RemoteHandle> {
        if self.kind != HandleKind::Strong {
            return Err(RpcError::InvalidData(
                "only strong handles can be duplicated".into(),
            ));
        }
        RemoteHandle::acquire(Arc::clone(&self.proxy)).await
    }

    /// Convert a strong handle into an optimistic one
    ///
    /// The strong handle stays valid; the optimistic handle carries its own
    /// unit and its own lifetime.
    pub async fn make_optimistic(&self) -> Result<RemoteHandle> {
        if self.kind != HandleKind::Strong {
            return Err(RpcError::InvalidData(
                "optimistic handles are converted from strong handles".into(),
            ));
        }
        self.proxy.acquire_unit(AddRefFlags::OPTIMISTIC).await?;
        Ok(Self {
            proxy: Arc::clone(&self.proxy),
            kind: HandleKind::Optimistic,
            released: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn object_id(&self) -> ObjectId {
        self.proxy.object_id()
    }

    pub fn proxy(&self) -> &Arc<ObjectProxy> {
        &self.proxy
    }

    /// Error mapping for this handle's flavour
    ///
    /// A missing stub is a serious failure for a strong handle but the
    /// expected end of life for an optimistic one.
    fn map_error(&self, err: RpcError) -> RpcError {
        match (self.kind, err) {
            (HandleKind::Optimistic, RpcError::ObjectNotFound(message)) => {
                RpcError::ObjectGone(message)
            }
            (_, other) => other,
        }
    }

    /// Typed request/response call through this handle
    pub async fn invoke<A, R>(&self, interface: InterfaceId, method: MethodId, args: &A) -> Result<R>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        if self.kind == HandleKind::Optimistic && self.proxy.is_gone() {
            return Err(RpcError::ObjectGone(format!(
                "object {} was released by its zone",
                self.proxy.object_id()
            )));
        }
        self.proxy
            .invoke(interface, method, args)
            .await
            .map_err(|e| self.map_error(e))
    }

    /// Fire-and-forget call through this handle
    pub async fn post<A>(&self, interface: InterfaceId, method: MethodId, args: &A) -> Result<()>
    where
        A: Serialize + Sync,
    {
        self.proxy.post(interface, method, args).await
    }

    /// Whether the remote object implements an interface
    pub async fn try_cast(&self, interface: InterfaceId) -> Result<bool> {
        self.proxy
            .try_cast(interface)
            .await
            .map_err(|e| self.map_error(e))
    }

    /// Release the handle's unit deterministically
    ///
    /// Preferred over relying on `Drop`, which has to spawn the release.
    pub async fn release(self) -> Result<u32> {
        self.released.store(true, Ordering::SeqCst);
        let flags = match self.kind {
            HandleKind::Strong => ReleaseFlags::Normal,
            HandleKind::Optimistic => ReleaseFlags::Optimistic,
        };
        self.proxy.release_unit(flags).await
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let proxy = Arc::clone(&self.proxy);
        let flags = match self.kind {
            HandleKind::Strong => ReleaseFlags::Normal,
            HandleKind::Optimistic => ReleaseFlags::Optimistic,
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = proxy.release_unit(flags).await;
            });
        } else {
            tracing::warn!(
                object = %proxy.object_id(),
                "remote handle dropped outside a runtime; unit not released"
            );
        }
    }
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("object", &self.proxy.object_id())
            .field("kind", &self.kind)
            .finish()
    }
}
