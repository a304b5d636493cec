//! Crash-game stream observer.
//!
//! Connects to a push-based game stream, reconstructs each round's
//! lifecycle from the events it sees, aggregates wagers per participant and
//! keeps a bounded history of finalized rounds behind a small HTTP surface.
//!
//! # Architecture
//!
//! - **Event-driven**: every inbound frame is decoded into typed `StreamEvent`s
//! - **Single writer**: one watcher task owns the round state and applies
//!   events strictly in arrival order
//! - **Snapshot readers**: the query surface only sees published copies
//! - **Self-healing transport**: token refresh, handshake and reconnects with
//!   capped exponential backoff
//!
//! # Usage
//!
//! ```no_run
//! use crash_observer::{ObserverConfig, ObserverService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ObserverConfig::from_env();
//!     ObserverService::new(config).run().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod connectors;
pub mod events;
pub mod round;
pub mod service;
pub mod utils;
pub mod watchers;

// Re-export commonly used types
pub use config::{ObserverConfig, StreamConfig};
pub use events::{Envelope, RoundId, RoundStatus, StreamEvent, Wager};
pub use round::{Category, FinalizedRound, RoundSnapshot, RoundStateMachine};
pub use service::{ObserverService, ServiceError};
