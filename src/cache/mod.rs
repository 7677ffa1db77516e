//! Cache plane: shared Redis pool, key layout, fenced report publication

pub mod keys;
pub mod pool;
pub mod publisher;

pub use pool::CachePool;
pub use publisher::{PublishError, ReportPublisher};
