//! Conduit Runtime - the hosting layer around the message router.
//!
//! This crate provides:
//! - Layered configuration (`ConduitConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`)
//! - The transport boundary (`MessageSource`, `Settlement`) and an in-memory
//!   queue
//! - The message pump (`MessagePump`), which turns dispatch outcomes into
//!   settlements
//!
//! ```rust,ignore
//! use conduit_runtime::{ConfigLoader, InMemoryQueue, MessagePump, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let queue = Arc::new(InMemoryQueue::from_config(&config.pump));
//!     let handle = MessagePump::new(queue, router, config.pump).spawn();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pump;
pub mod transport;

// Re-exports
pub use config::{
    ConduitConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig, PumpConfig,
    UnmatchedAction,
};
pub use error::{RuntimeError, RuntimeResult, TransportError};
pub use logging::{LoggingBuilder, SpanEvents};
pub use pump::{MessagePump, PumpHandle, PumpStats, settlement_for};
pub use transport::{DeadLetteredMessage, InMemoryQueue, MessageSource, ReceivedMessage};

// Settlement lives in core so handlers can request one through their context.
pub use conduit_core::{MessageSettler, Settlement};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the commonly used logging macros and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
