//! Integration layer - External event sources.
//!
//! This module connects the processing pipeline to the outside world:
//! - The acknowledging adapter interface over an external source
//! - The server abstraction for long-running consumers
//! - The sequential receive, handle, acknowledge loop

pub mod adapter;
pub mod server;

pub use adapter::{AckAdapter, BoxedAdapter, HandlerServer};
pub use server::{AckLoopServer, RunState};
