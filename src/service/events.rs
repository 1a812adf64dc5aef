// Service event observers

use crate::ids::{CallerZoneId, ObjectId};

/// Observer for events a service receives from remote zones
///
/// `object_released` arrives when a remote object with optimistic holders in
/// this zone was destroyed; higher layers use it to invalidate their
/// optimistic handles proactively instead of discovering the loss on the
/// next call.
pub trait ServiceObserver: Send + Sync {
    fn on_object_released(&self, origin: CallerZoneId, object: ObjectId);
}
