//! # evbus
//!
//! A typed in-process event bus.
//!
//! ## Overview
//!
//! evbus routes runtime-typed events to handlers, bounds how many handlers run
//! at once, and consumes external sources with receive-then-acknowledge
//! semantics so that no event is lost to a crash mid-handling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────────────┐     ┌────────────────┐
//! │ ConsumerGroup│────▶│ AckLoopServer │────▶│ ConcurrencyLimited-  │────▶│ TypeDispatcher │──▶ fns
//! │  (N workers) │     │  (per worker) │     │ Executor (optional)  │     │  first match   │
//! └──────────────┘     └───────────────┘     └──────────────────────┘     └────────────────┘
//! ```
//!
//! - **TypeDispatcher**: Picks the first registration whose event parameter fits
//! - **ConcurrencyLimitedExecutor**: Runs a handler in background tasks, at most N at once
//! - **AckLoopServer**: Receive, handle, acknowledge, one event at a time
//! - **ConsumerGroup**: Several ack loops sharing one handler, with graceful shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use evbus::prelude::*;
//!
//! struct Signup { email: String }
//!
//! async fn welcome(_ctx: Context, signup: Arc<Signup>) -> Result<(), BusError> {
//!     info!(email = %signup.email, "sending welcome mail");
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dispatcher = TypeDispatcher::builder().on(welcome).build()?;
//!
//!     let queue = MemoryQueue::new();
//!     queue.push(Signup { email: "ada@example.com".into() })?;
//!
//!     ConsumerGroup::new(queue, dispatcher).run_until_signal().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use evbus_core as core;
pub use evbus_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use evbus::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Core types
    pub use evbus_core::prelude::*;
    pub use evbus_core::{ExecutorConfig, RunState, TypeDispatcherBuilder};

    // Runtime
    pub use evbus_runtime::config::{ConfigLoader, EvbusConfig, load_config};
    pub use evbus_runtime::logging::{self, LoggingBuilder};
    pub use evbus_runtime::{ConsumerGroup, GroupReport, MemoryQueue, RuntimeError};

    // Logging macros
    pub use evbus_runtime::prelude::*;
}
