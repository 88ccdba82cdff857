//! The work-stealing scheduler: thread lifecycle, root submission, the
//! steal loop and the sync-wait bridge.

mod builder;
mod pool;
mod worker;

pub use builder::Builder;
pub use pool::Pool;

pub(crate) use builder::RuntimeConfig;
pub(crate) use worker::{Worker, STEAL_ATTEMPTS};
