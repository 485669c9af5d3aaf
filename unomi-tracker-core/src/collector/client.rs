//! Event collector client for the context server
//!
//! Sends batches of events to `{url}/eventcollector`. Small payloads go out as
//! a GET with the JSON in the query string, larger ones as a `text/plain` POST;
//! both forms avoid a CORS preflight. Every call makes exactly one attempt.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::logging::PREFIX;
use crate::types::Event;

use super::transport::{HttpRequest, HttpResponse, Method, Transport};

/// Serialized payloads shorter than this many characters are sent as GET
pub const GET_PAYLOAD_THRESHOLD: usize = 100;

/// Body of a collector call
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectRequest<'a> {
    events: &'a [Event],
    session_id: &'a str,
}

/// Pick GET or POST from the serialized payload length alone.
///
/// Length is counted in characters, not UTF-8 bytes.
pub fn select_method(payload: &str) -> Method {
    if payload.chars().count() < GET_PAYLOAD_THRESHOLD {
        Method::Get
    } else {
        Method::Post
    }
}

/// Run one exchange with an optional deadline and map the outcome.
///
/// On timeout the in-flight request future is dropped, so a late response can
/// never reach the caller.
pub(crate) async fn exchange(
    transport: &dyn Transport,
    request: HttpRequest,
    timeout: Option<Duration>,
) -> Result<HttpResponse> {
    let url = request.url.clone();
    let method = request.method;

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, transport.execute(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(url = %url, "{} XML request timeout", PREFIX);
                return Err(Error::Timeout {
                    url,
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                });
            }
        },
        None => transport.execute(request).await,
    };

    let response = outcome.map_err(|e| {
        tracing::error!(url = %url, method = method.as_str(), error = %e, "{} Request failed", PREFIX);
        e
    })?;

    if !response.is_success() {
        tracing::error!(
            url = %url,
            status = response.status,
            "{} XML request error ({})",
            PREFIX,
            response.status
        );
        return Err(Error::Status {
            status: response.status,
            body: response.body,
        });
    }

    Ok(response)
}

/// Sends tracking events to the context server
#[derive(Clone)]
pub struct EventCollector {
    transport: Arc<dyn Transport>,
    base_url: String,
    timeout: Option<Duration>,
}

impl EventCollector {
    pub fn new(config: &TrackerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: config.base_url().to_string(),
            timeout: config.timeout(),
        }
    }

    /// Configured request timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Build the request for a batch without sending it
    pub fn build_request(&self, events: &[Event], session_id: &str) -> Result<HttpRequest> {
        let payload = serde_json::to_string(&CollectRequest { events, session_id })?;
        let url = format!("{}/eventcollector", self.base_url);

        Ok(match select_method(&payload) {
            Method::Get => HttpRequest::get(format!(
                "{}?payload={}",
                url,
                urlencoding::encode(&payload)
            )),
            Method::Post => HttpRequest::post(url, payload),
        })
    }

    /// Send a batch of events and return the parsed acknowledgement.
    ///
    /// An empty response body (e.g. 204) yields `Value::Null`.
    pub async fn send(&self, events: &[Event], session_id: &str) -> Result<serde_json::Value> {
        let request = self.build_request(events, session_id)?;
        tracing::debug!(
            events = events.len(),
            method = request.method.as_str(),
            "{} Sending events",
            PREFIX
        );

        let response = exchange(self.transport.as_ref(), request, self.timeout).await?;
        parse_ack(&response.body)
    }

    /// Send a single event
    pub async fn send_one(&self, event: &Event, session_id: &str) -> Result<serde_json::Value> {
        self.send(std::slice::from_ref(event), session_id).await
    }

    /// Send a batch and report through callbacks.
    ///
    /// Exactly one of the two callbacks runs, once. Nothing is returned to the caller.
    pub async fn send_with_callbacks<S, E>(
        &self,
        events: &[Event],
        session_id: &str,
        on_success: S,
        on_error: E,
    ) where
        S: FnOnce(serde_json::Value),
        E: FnOnce(Error),
    {
        match self.send(events, session_id).await {
            Ok(ack) => on_success(ack),
            Err(e) => on_error(e),
        }
    }
}

fn parse_ack(body: &str) -> Result<serde_json::Value> {
    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(body).map_err(|e| {
        tracing::error!(error = %e, "{} Unparseable collector response", PREFIX);
        Error::Parse(e.to_string())
    })
}
