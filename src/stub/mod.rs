// Server-side object representation
//
// A stub is the in-zone representative of an object that has been marshalled
// to at least one remote zone. It adopts remote reference units against the
// object's control block and dispatches inbound calls through the object's
// interface capability set.

mod interface;
mod object;

pub use interface::{method_not_found, InterfaceDispatch, LocalObject, RemoteObject};
pub use object::ObjectStub;
