//! Queue Worker Example
//!
//! Feeds a stream of order events into a [`MemoryQueue`] and consumes it with
//! a consumer group. Each worker acknowledges an event once the executor has
//! admitted it; the executor runs the typed handlers with bounded
//! concurrency.
//!
//! # Routing
//!
//! ```text
//! OrderPlaced    ──▶ reserve_stock
//! OrderCancelled ──▶ release_stock
//! anything else  ──▶ audit (catch-all, logs and accepts)
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package queue-worker -- --orders 50 --workers 2
//! EVBUS_EXECUTOR__MAX_CONCURRENT_JOBS=4 cargo run --package queue-worker
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use evbus::prelude::*;
use evbus::runtime::WorkerOutcome;
use tracing::{error, info, warn};

// ============================================================================
// Events
// ============================================================================

#[derive(Debug)]
struct OrderPlaced {
    id: u64,
    amount_cents: u64,
}

#[derive(Debug)]
struct OrderCancelled {
    id: u64,
}

#[derive(Debug)]
struct Heartbeat;

// ============================================================================
// Handlers
// ============================================================================

async fn reserve_stock(_ctx: Context, order: Arc<OrderPlaced>) -> Result<(), BusError> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    info!(order = order.id, amount_cents = order.amount_cents, "Stock reserved");
    Ok(())
}

async fn release_stock(ctx: Context, order: Arc<OrderCancelled>) -> Result<(), BusError> {
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }
    if order.id % 7 == 0 {
        return Err(BusError::handler(format!(
            "order {} was already shipped",
            order.id
        )));
    }
    info!(order = order.id, "Stock released");
    Ok(())
}

async fn audit(_ctx: Context, event: BoxedEvent) -> Result<(), BusError> {
    info!(event_type = event.type_name(), "Unrouted event accepted");
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[derive(Parser, Debug)]
#[command(about = "Consume an in-memory order queue")]
struct Args {
    /// Configuration file (defaults to evbus.toml lookup).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of orders to produce.
    #[arg(long, default_value_t = 20)]
    orders: u64,

    /// Override the configured number of workers.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load()?;
    if let Some(workers) = args.workers {
        config.consumers.workers = workers;
    }
    logging::init_from_config(&config.logging);

    let dispatcher = TypeDispatcher::builder()
        .on(reserve_stock)
        .on(release_stock)
        .on(audit)
        .build()?;

    let executor = Arc::new(
        ConcurrencyLimitedExecutor::builder(dispatcher)
            .max_concurrent_jobs(config.executor.max_concurrent_jobs)
            .on_error(|_ctx, event, err| {
                error!(event_type = event.type_name(), error = %err, "Order handler failed");
            })
            .build(),
    );

    let queue = MemoryQueue::new();
    let producer = queue.clone();
    let orders = args.orders;
    tokio::spawn(async move {
        for id in 1..=orders {
            let pushed = if id % 5 == 0 {
                producer.push(OrderCancelled { id })
            } else {
                producer.push(OrderPlaced {
                    id,
                    amount_cents: id * 1_250,
                })
            };
            if let Err(err) = pushed.and_then(|()| producer.push(Heartbeat)) {
                warn!(error = %err, "Producer stopped");
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        producer.close();
    });

    let report = ConsumerGroup::with_executor(queue.clone(), executor)
        .settings(&config.consumers)
        .run_until_signal()
        .await?;

    for worker in &report.workers {
        match &worker.outcome {
            WorkerOutcome::Stopped(reason) => {
                info!(worker = worker.worker, processed = worker.processed, %reason, "Worker done")
            }
            WorkerOutcome::Failed(err) => {
                error!(worker = worker.worker, processed = worker.processed, %err, "Worker failed")
            }
            WorkerOutcome::Panicked(msg) => error!(worker = worker.worker, %msg, "Worker panicked"),
        }
    }
    info!(
        processed = report.processed(),
        left_in_queue = queue.len(),
        redelivered = queue.redelivered(),
        "Done"
    );

    Ok(())
}
