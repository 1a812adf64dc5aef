// Hierarchical child zones
//
// A child service is an ordinary service plus one rule: it holds a strong
// reference to its parent-facing transport for its whole life, so the
// parent zone outlives the child. Unknown destinations route upward through
// the same transport.

use crate::error::Result;
use crate::proxy::RemoteHandle;
use crate::service::Service;
use crate::stub::LocalObject;
use crate::transport::InprocTransport;
use crate::RuntimeConfig;
use std::ops::Deref;
use std::sync::Arc;

pub struct ChildService {
    inner: Arc<Service>,
}

impl ChildService {
    /// Create a child zone connected to `parent` over an in-process pair
    ///
    /// The parent must have a bootstrap factory installed; its bootstrap
    /// handle is returned alongside the child. `bootstrap` is the object the
    /// child itself exposes upward, if any.
    pub async fn connect(
        parent: &Arc<Service>,
        name: &str,
        config: RuntimeConfig,
        bootstrap: Option<&LocalObject>,
    ) -> Result<(ChildService, RemoteHandle)> {
        let child = Service::with_zone(parent.generate_zone_id(), name, config);
        let (_parent_end, child_end) = InprocTransport::hierarchical_pair(parent, &child);

        // The child pins its upward link; the parent outlives the child.
        child.retain_transport(child_end.clone());
        child.set_default_route(child_end.clone());

        let handle = child.connect_to_zone(name, child_end, bootstrap).await?;
        Ok((ChildService { inner: child }, handle))
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.inner
    }
}

impl Deref for ChildService {
    type Target = Service;

    fn deref(&self) -> &Service {
        &self.inner
    }
}

impl std::fmt::Debug for ChildService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChildService").field(&self.inner).finish()
    }
}
