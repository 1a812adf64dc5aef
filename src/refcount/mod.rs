// Reference counting for distributed object lifetime
//
// Objects are owned through a control block carrying three independent
// counts: shared (keeps the value alive), weak (keeps the block allocated)
// and optimistic (keeps routing state alive without pinning the value).
// Remote zones contribute units to these counts through the add_ref/release
// verbs; the stub layer adopts and releases those units against the same
// block the local handles use, so one invariant covers both worlds.

mod control;
mod handle;

pub use handle::{Optimistic, Strong, WeakRef};
