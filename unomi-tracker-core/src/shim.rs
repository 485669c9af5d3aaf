//! Command queue used before the tracker is ready
//!
//! Calls made while the real client is still loading are recorded as
//! `(method, args)` pairs and replayed in FIFO order once it is live.
//!
//! ```text
//! Queueing ──drain()──► Draining ──buffer empty──► Live
//! ```
//!
//! The transition happens exactly once. Nothing is recorded after `Queueing`.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::logging::PREFIX;

/// Method names the stub accepts by default
pub const DEFAULT_METHODS: &[&str] = &[
    "trackSubmit",
    "trackClick",
    "trackLink",
    "trackForm",
    "pageview",
    "identify",
    "reset",
    "group",
    "track",
    "ready",
    "alias",
    "debug",
    "page",
    "once",
    "off",
    "on",
    "personalize",
];

/// A call recorded before the client was live
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub method: String,
    pub args: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Queueing,
    Draining,
    Live,
}

/// Receiver of replayed commands
#[async_trait]
pub trait CommandTarget: Send + Sync {
    /// Run `method` with `args`.
    ///
    /// Returns `None` when the target has no implementation for `method`.
    async fn invoke(&self, method: &str, args: &[serde_json::Value]) -> Option<Result<()>>;
}

/// Outcome of a drain
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub invoked: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Records calls until the real client takes over
#[derive(Debug)]
pub struct CommandQueue {
    methods: Vec<String>,
    buffer: VecDeque<PendingCommand>,
    state: QueueState,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_METHODS.iter().copied())
    }
}

impl CommandQueue {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
            buffer: VecDeque::new(),
            state: QueueState::Queueing,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Record a call. Returns `self` so calls can be chained.
    pub fn record(&mut self, method: &str, args: Vec<serde_json::Value>) -> Result<&mut Self> {
        if self.state != QueueState::Queueing {
            return Err(Error::QueueClosed);
        }
        if !self.methods.iter().any(|m| m == method) {
            return Err(Error::UnknownCommand(method.to_string()));
        }
        self.buffer.push_back(PendingCommand {
            method: method.to_string(),
            args,
        });
        Ok(self)
    }

    /// Replay every recorded call against `target`, oldest first, then go live.
    ///
    /// Methods the target does not implement are skipped. Calling this again
    /// once live does nothing.
    pub async fn drain<T>(&mut self, target: &T) -> DrainReport
    where
        T: CommandTarget + ?Sized,
    {
        let mut report = DrainReport::default();
        if self.state != QueueState::Queueing {
            return report;
        }

        self.state = QueueState::Draining;
        while let Some(command) = self.buffer.pop_front() {
            match target.invoke(&command.method, &command.args).await {
                None => report.skipped += 1,
                Some(Ok(())) => report.invoked += 1,
                Some(Err(e)) => {
                    tracing::warn!(
                        method = %command.method,
                        error = %e,
                        "{} Replayed command failed",
                        PREFIX
                    );
                    report.failed += 1;
                }
            }
        }
        self.state = QueueState::Live;

        tracing::debug!(
            invoked = report.invoked,
            skipped = report.skipped,
            failed = report.failed,
            "{} Command queue drained",
            PREFIX
        );
        report
    }
}
