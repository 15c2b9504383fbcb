//! Leaky-bucket rate limiting for line production.

mod bucket;
mod store;

pub use bucket::LeakyBucket;
pub use store::BucketStore;
