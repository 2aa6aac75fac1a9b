//! squall-core: shared infrastructure for the squall streaming job.
//!
//! - `storage/` - Cloud Storage and local filesystem abstraction
//! - `resource/` - Storage client pooling (scoped per bundle by the job)
//! - `metrics/` - Prometheus metrics infrastructure
//! - `polling` - Generic polling loop trait and runner
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Common error types

pub mod error;
pub mod metrics;
pub mod polling;
pub mod resource;
pub mod signal;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use error::{MetricsError, PipelineSetupError, StorageError};
pub use self::metrics::events::FailureKind;
pub use self::metrics::{DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics};
pub use polling::{IterationResult, PollingProcessor, random_jitter, run_polling_loop};
pub use resource::StoragePool;
pub use signal::{shutdown_signal, spawn_shutdown_handler};
pub use storage::{StorageProvider, StorageProviderRef, object_key};
pub use self::tracing::init_tracing;
