pub mod pool;
pub mod tcp;

pub use pool::{ConnectionPool, PoolGuard, PoolStats};
pub use tcp::Connection;
