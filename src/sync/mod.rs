//! Synchronization primitives not provided by `spin`.

pub mod rcu;

pub use rcu::{GracePeriod, ReadGuard};
