//! Pool lifecycle events.
//!
//! Every event is logged through `tracing` under the `leasepool::events`
//! target and broadcast to subscribers of
//! [`ResourcePool::subscribe`](crate::ResourcePool::subscribe). Events can be
//! captured by any tracing subscriber or rendered as JSON.

mod event;

pub use event::{EventBus, PoolEvent, PoolEventKind};
