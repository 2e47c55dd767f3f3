//! The resource pool: configuration, lease orchestration and shutdown.

mod config;
mod resource_pool;


pub use config::ResourcePoolConfig;
pub(crate) use resource_pool::PoolInner;
pub use resource_pool::{ResourcePool, ResourcePoolBuilder, ShutdownReport};
