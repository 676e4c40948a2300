//! evbus Runtime - Configuration, logging and consumer orchestration.
//!
//! This crate provides:
//! - Layered configuration loading with figment (`EvbusConfig`, `ConfigLoader`)
//! - Logging setup from configuration (`LoggingBuilder`)
//! - Consumer groups running several ack loops over one handler (`ConsumerGroup`)
//! - An in-process queue with at-least-once delivery (`MemoryQueue`)
//!
//! ```ignore
//! use std::sync::Arc;
//! use evbus_core::{ConcurrencyLimitedExecutor, TypeDispatcher};
//! use evbus_runtime::{ConsumerGroup, MemoryQueue, config::load_config, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let dispatcher = TypeDispatcher::builder().on(handle_order).build()?;
//!     let executor = Arc::new(
//!         ConcurrencyLimitedExecutor::builder(dispatcher)
//!             .max_concurrent_jobs(config.executor.max_concurrent_jobs)
//!             .build(),
//!     );
//!
//!     let queue = MemoryQueue::new();
//!     let report = ConsumerGroup::with_executor(queue, executor)
//!         .settings(&config.consumers)
//!         .run_until_signal()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod group;
pub mod logging;
pub mod memory;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, EvbusConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use group::{AdapterFactory, ConsumerGroup, GroupReport, WorkerOutcome, WorkerReport};
pub use logging::{LoggingBuilder, SpanEvents};
pub use memory::{MemoryAdapter, MemoryQueue};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
