//! Context bootstrap store
//!
//! Holds everything that has to wait for the first context request:
//! queued events, personalization requests and load callbacks. One
//! [`ContextStore::bootstrap`] call flushes the queues to `{url}/context.json`
//! and then settles every waiter, with server data on success and with local
//! fallbacks on failure.
//!
//! ```text
//!   Pending ──bootstrap()──► Loading ──response/failure──► Loaded { context, fallback }
//!      │                        │
//!   queue_event: buffered    queue_event: handed back (caller sends directly)
//! ```
//!
//! State changes happen under a short lock that is never held across an
//! `.await`; callbacks always run after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::collector::{exchange, HttpRequest, Transport};
use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::logging::PREFIX;
use crate::types::{ContextRequest, ContextResponse, Event, ItemRef, Personalization};

/// Called once the context is known (or has fallen back)
pub type LoadCallback = Box<dyn FnOnce(&LoadedContext) + Send>;

/// Receives the variant ids chosen for a personalization request
pub type PersonalizationCallback = Box<dyn FnOnce(Vec<String>) + Send>;

/// Result of a bootstrap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedContext {
    /// Context returned by the server, empty on fallback
    pub context: ContextResponse,
    /// True when the server could not be used
    pub fallback: bool,
}

impl LoadedContext {
    fn fallback() -> Self {
        Self {
            context: ContextResponse::default(),
            fallback: true,
        }
    }

    /// Variants for a personalization, falling back to its local default
    pub fn variants_for(&self, personalization: &Personalization) -> Vec<String> {
        if self.fallback {
            return personalization.fallback_variants();
        }
        self.context
            .personalizations
            .get(&personalization.id)
            .cloned()
            .unwrap_or_else(|| personalization.fallback_variants())
    }
}

/// Options of a bootstrap call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Do not send the queued events
    pub skip_events: bool,
    /// Ask the server to start a new session and profile
    pub invalidate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Pending,
    Loading,
    Loaded,
}

enum State {
    Pending,
    Loading,
    Loaded(Arc<LoadedContext>),
}

struct PendingPersonalization {
    personalization: Personalization,
    callback: PersonalizationCallback,
}

struct Inner {
    state: State,
    events: Vec<Event>,
    personalizations: Vec<PendingPersonalization>,
    load_callbacks: Vec<LoadCallback>,
}

/// Settles the store with the fallback when an in-flight bootstrap is dropped
struct InFlight<'a> {
    store: &'a ContextStore,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("{} Context request abandoned, execute fallback", PREFIX);
            self.store.settle(LoadedContext::fallback());
        }
    }
}

/// Buffers early tracking activity and runs the one-time context bootstrap
pub struct ContextStore {
    inner: Mutex<Inner>,
    transport: Arc<dyn Transport>,
    base_url: String,
    timeout: Option<Duration>,
    required_profile_properties: Vec<String>,
    required_session_properties: Vec<String>,
}

impl ContextStore {
    pub fn new(config: &TrackerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Pending,
                events: Vec::new(),
                personalizations: Vec::new(),
                load_callbacks: Vec::new(),
            }),
            transport,
            base_url: config.base_url().to_string(),
            timeout: config.timeout(),
            required_profile_properties: config.required_profile_properties.clone(),
            required_session_properties: config.required_session_properties.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BootstrapState {
        match self.lock().state {
            State::Pending => BootstrapState::Pending,
            State::Loading => BootstrapState::Loading,
            State::Loaded(_) => BootstrapState::Loaded,
        }
    }

    /// Context once loaded
    pub fn context(&self) -> Option<Arc<LoadedContext>> {
        match &self.lock().state {
            State::Loaded(ctx) => Some(Arc::clone(ctx)),
            _ => None,
        }
    }

    /// Number of events waiting for bootstrap
    pub fn queued_events(&self) -> usize {
        self.lock().events.len()
    }

    /// Buffer an event until bootstrap.
    ///
    /// Once the bootstrap request is out the event is handed back so the
    /// caller can send it directly.
    pub fn queue_event(&self, event: Event) -> std::result::Result<(), Event> {
        let mut inner = self.lock();
        if matches!(inner.state, State::Pending) {
            inner.events.push(event);
            Ok(())
        } else {
            Err(event)
        }
    }

    /// Run `callback` once the context is known; immediately if it already is
    pub fn register_load_callback<F>(&self, callback: F)
    where
        F: FnOnce(&LoadedContext) + Send + 'static,
    {
        let mut inner = self.lock();
        let loaded = match &inner.state {
            State::Loaded(ctx) => Some(Arc::clone(ctx)),
            _ => None,
        };
        match loaded {
            Some(ctx) => {
                drop(inner);
                tracing::info!("{} Context already loaded, calling load callback now", PREFIX);
                callback(&ctx);
            }
            None => {
                tracing::debug!("{} Context not loaded yet, registering load callback", PREFIX);
                inner.load_callbacks.push(Box::new(callback));
            }
        }
    }

    /// Ask for a personalization to be computed during bootstrap.
    ///
    /// Requests made after the bootstrap request left are too late for the
    /// server and resolve right away from the cached context or the fallback.
    pub fn register_personalization<F>(&self, personalization: Personalization, callback: F)
    where
        F: FnOnce(Vec<String>) + Send + 'static,
    {
        let mut inner = self.lock();
        let resolved = match &inner.state {
            State::Pending => None,
            State::Loading => Some(personalization.fallback_variants()),
            State::Loaded(ctx) => Some(ctx.variants_for(&personalization)),
        };
        let Some(resolved) = resolved else {
            inner.personalizations.push(PendingPersonalization {
                personalization,
                callback: Box::new(callback),
            });
            return;
        };
        drop(inner);

        tracing::error!(
            personalization = %personalization.id,
            "{} Already loaded, too late...",
            PREFIX
        );
        callback(resolved);
    }

    /// Send the one-time context request and settle all waiters.
    ///
    /// Network, status and parse failures are not returned: the store falls
    /// back to an empty context and still runs every callback. The only
    /// error is calling this twice.
    pub async fn bootstrap(
        &self,
        source: ItemRef,
        session_id: &str,
        options: BootstrapOptions,
    ) -> Result<Arc<LoadedContext>> {
        let (request, sent_events) = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return Err(Error::AlreadyBootstrapped);
            }

            let events = std::mem::take(&mut inner.events);
            if options.skip_events && !events.is_empty() {
                tracing::warn!(dropped = events.len(), "{} Skipping queued events", PREFIX);
            }
            let events = (!options.skip_events && !events.is_empty()).then_some(events);
            let personalizations: Vec<Personalization> = inner
                .personalizations
                .iter()
                .map(|p| p.personalization.clone())
                .collect();

            let body = ContextRequest {
                required_profile_properties: self.required_profile_properties.clone(),
                required_session_properties: self.required_session_properties.clone(),
                source,
                events,
                personalizations: (!personalizations.is_empty()).then_some(personalizations),
                session_id: session_id.to_string(),
            };
            let payload = serde_json::to_string(&body)?;
            let sent_events = body.events.as_ref().map_or(0, Vec::len);

            inner.state = State::Loading;
            (HttpRequest::post(self.context_url(options.invalidate), payload), sent_events)
        };

        tracing::info!(events = sent_events, "{} Context loading...", PREFIX);

        // Waiters must settle even if this future is cancelled mid-request
        let in_flight = InFlight {
            store: self,
            armed: true,
        };
        let fetched = self.fetch(request).await;
        in_flight.disarm();

        let loaded = match fetched {
            Ok(context) => LoadedContext {
                context,
                fallback: false,
            },
            Err(e) => {
                tracing::warn!(error = %e, "{} execute fallback", PREFIX);
                LoadedContext::fallback()
            }
        };

        Ok(self.settle(loaded))
    }

    /// Skip the network entirely and settle waiters with the empty context.
    ///
    /// Used when cookies are disabled.
    pub fn load_fallback(&self) -> Result<Arc<LoadedContext>> {
        {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return Err(Error::AlreadyBootstrapped);
            }
            inner.events.clear();
            inner.state = State::Loading;
        }
        tracing::warn!("{} execute fallback", PREFIX);
        Ok(self.settle(LoadedContext::fallback()))
    }

    fn context_url(&self, invalidate: bool) -> String {
        let mut url = format!("{}/context.json", self.base_url);
        if invalidate {
            url.push_str("?invalidateSession=true&invalidateProfile=true");
        }
        url
    }

    async fn fetch(&self, request: HttpRequest) -> Result<ContextResponse> {
        let response = exchange(self.transport.as_ref(), request, self.timeout).await?;
        serde_json::from_str(&response.body).map_err(|e| Error::Parse(e.to_string()))
    }

    fn settle(&self, loaded: LoadedContext) -> Arc<LoadedContext> {
        let loaded = Arc::new(loaded);
        let (callbacks, personalizations) = {
            let mut inner = self.lock();
            inner.state = State::Loaded(Arc::clone(&loaded));
            (
                std::mem::take(&mut inner.load_callbacks),
                std::mem::take(&mut inner.personalizations),
            )
        };

        if !callbacks.is_empty() {
            tracing::info!(
                count = callbacks.len(),
                "{} Found context server load callbacks, calling now...",
                PREFIX
            );
        }
        for callback in callbacks {
            callback(&loaded);
        }

        if !personalizations.is_empty() {
            tracing::info!(
                count = personalizations.len(),
                "{} Found context server personalization, calling now...",
                PREFIX
            );
        }
        for pending in personalizations {
            (pending.callback)(loaded.variants_for(&pending.personalization));
        }

        loaded
    }
}
