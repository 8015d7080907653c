//! Shared concurrency primitives

mod locker;

pub use locker::{LockError, LockGuard, ServerLocks};
