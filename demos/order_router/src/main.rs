//! Order Router Demo
//!
//! Routes a mixed stream of order, refund and junk messages arriving on one
//! queue to typed handlers.
//!
//! # Registrations
//!
//! Tried in this order, first match wins:
//!
//! ```text
//! 1. large-orders  Order   type == "order" and amount > 100   -> insured shipping
//! 2. orders        Order   (no filters)                       -> regular shipping
//! 3. refunds       Refund  strict JSON object                 -> refund desk
//! *  fallback      raw     anything else                      -> parked
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package order-router -- --orders 20
//! CONDUIT_LOGGING__LEVEL=debug cargo run --package order-router
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use conduit::logging;
use conduit::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// Command Line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "order-router", about = "Route demo order traffic through Conduit")]
struct Args {
    /// Configuration file (TOML or YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile.
    #[arg(short, long)]
    profile: Option<String>,

    /// Number of order messages to enqueue.
    #[arg(long, default_value_t = 10)]
    orders: u64,

    /// Make every n-th shipment fail once, to show redelivery. 0 disables.
    #[arg(long, default_value_t = 4)]
    fail_every: u64,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Order {
    order_id: u64,
    amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Refund {
    refund_id: u64,
    order_id: u64,
    reason: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Shared state the handlers report into.
#[derive(Debug, Default)]
struct Warehouse {
    shipped: AtomicU64,
    insured: AtomicU64,
    refunded: AtomicU64,
    parked: AtomicU64,
}

struct ShipOrder {
    warehouse: Arc<Warehouse>,
    insured: bool,
    fail_every: u64,
}

#[async_trait]
impl MessageHandler<Order, QueueMessageContext> for ShipOrder {
    async fn process(&self, order: &Order, ctx: &QueueMessageContext) -> Result<(), HandlerError> {
        if self.fail_every > 0 && order.order_id % self.fail_every == 0 && ctx.delivery_count == 1
        {
            return Err(format!("carrier unavailable for order {}", order.order_id).into());
        }

        if ctx.cancellation_token().is_cancelled() {
            warn!(order_id = order.order_id, "Shipping during shutdown");
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        self.warehouse.shipped.fetch_add(1, Ordering::Relaxed);
        if self.insured {
            self.warehouse.insured.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            order_id = order.order_id,
            amount = order.amount,
            insured = self.insured,
            attempt = ctx.delivery_count,
            "Order shipped"
        );
        Ok(())
    }
}

/// Parks anything no typed handler accepted.
struct ParkMessage {
    warehouse: Arc<Warehouse>,
}

#[async_trait]
impl FallbackHandler for ParkMessage {
    async fn process(&self, body: &[u8], ctx: &dyn Context) -> Result<(), HandlerError> {
        self.warehouse.parked.fetch_add(1, Ordering::Relaxed);
        warn!(
            message_id = %ctx.message_context().message_id,
            body = %String::from_utf8_lossy(body),
            "Parked unrecognized message"
        );
        Ok(())
    }
}

fn build_handlers(warehouse: &Arc<Warehouse>, fail_every: u64) -> Result<HandlerCollection> {
    let mut handlers = HandlerCollection::new();

    let w = Arc::clone(warehouse);
    handlers.add(
        Registration::<Order, QueueMessageContext>::builder()
            .name("large-orders")
            .filters(
                |ctx: &QueueMessageContext| ctx.property_str("type") == Some("order"),
                |order: &Order| order.amount > 100,
            )
            .factory(move || ShipOrder {
                warehouse: Arc::clone(&w),
                insured: true,
                fail_every,
            }),
    )?;

    let w = Arc::clone(warehouse);
    handlers.add(
        Registration::<Order, QueueMessageContext>::builder()
            .name("orders")
            .factory(move || ShipOrder {
                warehouse: Arc::clone(&w),
                insured: false,
                fail_every,
            }),
    )?;

    let w = Arc::clone(warehouse);
    handlers.add(
        Registration::<Refund, QueueMessageContext>::builder()
            .name("refunds")
            .serializer(JsonSerializer::strict())
            .handler(handler_fn(move |refund: Refund, _ctx: QueueMessageContext| {
                let w = Arc::clone(&w);
                async move {
                    w.refunded.fetch_add(1, Ordering::Relaxed);
                    info!(
                        refund_id = refund.refund_id,
                        order_id = refund.order_id,
                        reason = %refund.reason,
                        "Refund issued"
                    );
                    Ok::<(), HandlerError>(())
                }
            })),
    )?;

    let w = Arc::clone(warehouse);
    handlers.set_fallback(
        FallbackRegistration::builder()
            .name("park")
            .factory(move || ParkMessage {
                warehouse: Arc::clone(&w),
            }),
    )?;

    Ok(handlers)
}

// ============================================================================
// Traffic
// ============================================================================

/// Enqueues the demo traffic and returns how many messages were sent.
fn enqueue_traffic(queue: &InMemoryQueue, job_id: &str, orders: u64) -> Result<usize> {
    for order_id in 1..=orders {
        let order = Order {
            order_id,
            amount: order_id * 37 % 250,
        };
        let ctx = MessageContext::new(format!("order-{order_id}"), job_id)
            .with_property("type", "order");
        queue.send_with(serde_json::to_vec(&order)?, ctx);
    }

    queue.send_json(&Refund {
        refund_id: 1,
        order_id: 2,
        reason: "damaged in transit".to_string(),
    })?;

    queue.send("not json at all");
    queue.send("[1, 2, 3]");
    Ok(orders as usize + 3)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    let config = loader.load()?;

    logging::init_from_config(&config.logging);

    let warehouse = Arc::new(Warehouse::default());
    let router = MessageRouter::new(build_handlers(&warehouse, args.fail_every)?);
    info!(handlers = router.snapshot().len(), "Router ready");

    let queue = Arc::new(InMemoryQueue::from_config(&config.pump));
    let sent = enqueue_traffic(&queue, &config.pump.job_id, args.orders)?;

    let handle = MessagePump::new(Arc::clone(&queue), router, config.pump).spawn();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = async {
            // Every message ends up either completed or dead-lettered.
            while queue.completed().len() + queue.dead_lettered().len() < sent {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } => info!("Queue drained"),
    }

    let stats = handle.stats();
    info!(
        received = stats.received(),
        completed = stats.completed(),
        abandoned = stats.abandoned(),
        dead_lettered = stats.dead_lettered(),
        "Pump statistics"
    );
    info!(
        shipped = warehouse.shipped.load(Ordering::Relaxed),
        insured = warehouse.insured.load(Ordering::Relaxed),
        refunded = warehouse.refunded.load(Ordering::Relaxed),
        parked = warehouse.parked.load(Ordering::Relaxed),
        "Warehouse totals"
    );
    for dead in queue.dead_lettered() {
        warn!(
            message_id = %dead.message_id,
            reason = %dead.reason,
            description = %dead.description,
            "Dead-lettered"
        );
    }

    handle.shutdown().await?;
    Ok(())
}
