//! # unomi-tracker-core
//!
//! Client library for sending visitor events to an Apache Unomi style
//! context server.
//!
//! This library provides:
//! - Domain types for events, pages, and personalization
//! - Session identity backed by a cookie jar
//! - A one-shot context bootstrap with fallback
//! - Fire-and-report event collection over HTTP
//! - Link and form instrumentation with a bounded navigation delay
//! - Configuration and logging infrastructure
//!
//! ## Lifecycle
//!
//! Events recorded before the context is loaded are queued and travel with
//! the bootstrap request. Everything afterwards goes straight to the
//! collector:
//! - **Pending:** events and personalization requests accumulate
//! - **Loading:** the single `context.json` request is in flight
//! - **Loaded:** server context (or the fallback) is available
//!
//! ## Example
//!
//! ```rust,no_run
//! use unomi_tracker_core::{BootstrapOptions, Config, PageProperties, Tracker};
//!
//! # async fn demo() -> unomi_tracker_core::Result<()> {
//! let config = Config::load()?;
//! let tracker = Tracker::from_config(config.tracker)?;
//!
//! tracker.initialize(Some(&PageProperties::default()))?;
//! tracker.load_context(BootstrapOptions::default()).await?;
//! tracker.track("signup", None).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use context::{BootstrapOptions, BootstrapState, LoadedContext};
pub use error::{Error, Result};
pub use tracker::{CollectOutcome, Tracker};
pub use types::*;

// Public modules
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod session;
pub mod shim;
pub mod tracker;
pub mod types;
