//! Data parallel training across processes.

mod group;
mod sync;

pub use group::ProcessGroup;
pub use sync::{Synced, wrap_for_gradient_sync};
