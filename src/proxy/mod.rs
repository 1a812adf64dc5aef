// Client-side object representation
//
// A service proxy is the per-destination-zone gateway; object proxies hang
// off it, one per remote object, and remote handles are what applications
// actually hold. Handles come in strong and optimistic flavours; weak
// handles exist only locally, since a weak reference that crossed a zone
// would be indistinguishable from an optimistic one on the wire.

mod handle;
mod object;
mod service;

pub use handle::{HandleKind, RemoteHandle};
pub use object::ObjectProxy;
pub use service::ServiceProxy;
