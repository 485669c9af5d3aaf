//! Event collector
//!
//! This module sends tracking events to a context server's `/eventcollector`
//! endpoint.
//!
//! ## Architecture
//!
//! The collector is fire-and-report:
//! - One HTTP attempt per call, no retry and no re-queueing
//! - A per-request timeout; responses arriving after it are discarded
//! - Failures are logged and returned, never raised into the host
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unomi_tracker_core::collector::{EventCollector, ReqwestTransport};
//! use unomi_tracker_core::config::TrackerConfig;
//! use unomi_tracker_core::Event;
//!
//! # async fn demo() -> unomi_tracker_core::Result<()> {
//! let config = TrackerConfig::default();
//! let collector = EventCollector::new(&config, Arc::new(ReqwestTransport::new()?));
//! collector.send_one(&Event::new("click", "systemscope"), "session-1").await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod transport;

pub(crate) use client::exchange;
pub use client::{select_method, EventCollector, GET_PAYLOAD_THRESHOLD};
pub use transport::{
    HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TEXT_PLAIN_UTF8,
};
