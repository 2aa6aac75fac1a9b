//! Resource management for storage clients.

mod pool;

pub use pool::{StoragePool, bucket_key};
