//! Tracker facade
//!
//! One [`Tracker`] per page. It owns the session manager, the context store
//! and the event collector, and turns page/track/identify calls into events.
//!
//! ## Lifecycle
//!
//! ```text
//! initialize(page) ──► load_context() ──► page()/track()/identify()
//!   queue "view"        flush queue,         sent directly to
//!   resolve session     settle callbacks     {url}/eventcollector
//! ```
//!
//! Calls made before `load_context` are queued and travel with the bootstrap
//! request; calls made afterwards are sent on their own.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::collector::{EventCollector, ReqwestTransport, Transport};
use crate::config::{Config, TrackerConfig};
use crate::context::{BootstrapOptions, BootstrapState, ContextStore, LoadedContext};
use crate::error::{Error, Result};
use crate::logging::PREFIX;
use crate::session::{CookieJar, DisabledCookieJar, FileCookieJar, SessionManager};
use crate::shim::CommandTarget;
use crate::types::{DigitalData, Event, ItemRef, Page, PageProperties, Personalization};

/// What happened to a collected event
#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    /// Buffered; will travel with the bootstrap request
    Queued,
    /// Sent to the collector; carries its acknowledgement
    Sent(serde_json::Value),
}

struct TrackerInner {
    config: TrackerConfig,
    sessions: SessionManager,
    store: ContextStore,
    collector: EventCollector,
    digital_data: Mutex<DigitalData>,
    session_id: Mutex<Option<String>>,
}

/// Client for a context server, scoped to one page
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    /// Create a tracker from its parts
    pub fn new(
        config: TrackerConfig,
        jar: Box<dyn CookieJar>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let store = ContextStore::new(&config, Arc::clone(&transport));
        let collector = EventCollector::new(&config, transport);
        let digital_data = DigitalData::new(config.scope.clone());

        Ok(Self {
            inner: Arc::new(TrackerInner {
                sessions: SessionManager::new(jar),
                store,
                collector,
                digital_data: Mutex::new(digital_data),
                session_id: Mutex::new(config.session_id.clone()),
                config,
            }),
        })
    }

    /// Create a tracker backed by reqwest and the XDG cookie jar
    pub fn from_config(config: TrackerConfig) -> Result<Self> {
        let jar: Box<dyn CookieJar> = if config.cookies_enabled {
            Box::new(FileCookieJar::new(Config::cookie_jar_path()))
        } else {
            Box::new(DisabledCookieJar)
        };
        Self::new(config, jar, Arc::new(ReqwestTransport::new()?))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn collector(&self) -> &EventCollector {
        &self.inner.collector
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.inner.store.state()
    }

    /// Snapshot of the page-wide description
    pub fn digital_data(&self) -> DigitalData {
        self.digital_data_guard().clone()
    }

    fn digital_data_guard(&self) -> MutexGuard<'_, DigitalData> {
        self.inner
            .digital_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Prepare the page: record it, queue its `view` event and settle the session.
    ///
    /// With cookies disabled the context falls back immediately and nothing is queued.
    pub fn initialize(&self, page: Option<&PageProperties>) -> Result<()> {
        if !self.inner.sessions.cookies_enabled() && self.inner.config.session_id.is_none() {
            tracing::warn!("{} Cookies are disabled, running without a context server", PREFIX);
            self.inner.store.load_fallback()?;
            return Ok(());
        }

        if let Some(props) = page {
            let page = {
                let mut data = self.digital_data_guard();
                let page = data.page.get_or_insert_with(Page::default);
                page.fill(props);
                page.clone()
            };
            let event = self.build_event(
                "view",
                Some(self.build_page(&page)),
                Some(self.build_source(&self.inner.config.scope, "site", None)),
            );
            if self.inner.store.queue_event(event).is_err() {
                tracing::error!("{} already loaded, too late...", PREFIX);
            }
        }

        let session_id = self.session_id();
        tracing::debug!(session_id = %session_id, "{} Tracker initialized", PREFIX);
        Ok(())
    }

    /// Current session id.
    ///
    /// Cached once resolved. With cookies disabled a new id is minted on
    /// every call, since nothing can be persisted.
    pub fn session_id(&self) -> String {
        let mut cached = self
            .inner
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        let id = self.inner.sessions.get_or_create_session_id(
            &self.inner.config.session_cookie_name,
            self.inner.config.session_cookie_ttl_days,
        );
        if self.inner.sessions.cookies_enabled() {
            *cached = Some(id.clone());
        }
        id
    }

    /// Drop the session cookie; the next call starts a new session
    pub fn reset_session(&self) -> Result<()> {
        self.inner
            .sessions
            .reset(&self.inner.config.session_cookie_name)?;
        *self
            .inner
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = self.inner.config.session_id.clone();
        Ok(())
    }

    /// Run the one-time context bootstrap
    pub async fn load_context(&self, options: BootstrapOptions) -> Result<Arc<LoadedContext>> {
        let source = self.build_page_source();
        let session_id = self.session_id();
        self.inner.store.bootstrap(source, &session_id, options).await
    }

    /// Context once loaded
    pub fn context(&self) -> Option<Arc<LoadedContext>> {
        self.inner.store.context()
    }

    // ============================================
    // Tracking calls
    // ============================================

    /// Record a page view; the page becomes the current page
    pub async fn page(&self, props: &PageProperties) -> Result<CollectOutcome> {
        let page = Page::from_properties(props);
        self.digital_data_guard().page = Some(page.clone());

        let event = self.build_event(
            "view",
            Some(self.build_page(&page)),
            Some(self.build_source(&self.inner.config.scope, "site", None)),
        );
        self.collect_event(event).await
    }

    /// Record a custom event sourced from the current page
    pub async fn track(
        &self,
        event_type: &str,
        properties: Option<serde_json::Value>,
    ) -> Result<CollectOutcome> {
        let mut event = self.build_event(event_type, None, Some(self.build_page_source()));
        event.properties = properties;
        self.collect_event(event).await
    }

    /// Tie the current session to a known user
    pub async fn identify(
        &self,
        user_id: &str,
        traits: Option<serde_json::Value>,
    ) -> Result<CollectOutcome> {
        let mut event = self.build_event(
            "identify",
            Some(self.build_target(user_id, "profile", None)),
            Some(self.build_page_source()),
        );
        event.properties = traits;
        self.collect_event(event).await
    }

    /// Queue the event before bootstrap, send it directly afterwards
    pub async fn collect_event(&self, event: Event) -> Result<CollectOutcome> {
        match self.inner.store.queue_event(event) {
            Ok(()) => Ok(CollectOutcome::Queued),
            Err(event) => {
                let ack = self
                    .inner
                    .collector
                    .send_one(&event, &self.session_id())
                    .await?;
                Ok(CollectOutcome::Sent(ack))
            }
        }
    }

    /// Collect several events, keeping their order
    pub async fn collect_events(&self, events: Vec<Event>) -> Result<CollectOutcome> {
        let mut events = events.into_iter();
        let mut direct = Vec::new();
        for event in events.by_ref() {
            if let Err(event) = self.inner.store.queue_event(event) {
                direct.push(event);
                break;
            }
        }
        direct.extend(events);

        if direct.is_empty() {
            return Ok(CollectOutcome::Queued);
        }
        let ack = self
            .inner
            .collector
            .send(&direct, &self.session_id())
            .await?;
        Ok(CollectOutcome::Sent(ack))
    }

    // ============================================
    // Waiting on the context
    // ============================================

    pub fn register_load_callback<F>(&self, callback: F)
    where
        F: FnOnce(&LoadedContext) + Send + 'static,
    {
        self.inner.store.register_load_callback(callback);
    }

    pub fn personalize<F>(&self, personalization: Personalization, callback: F)
    where
        F: FnOnce(Vec<String>) + Send + 'static,
    {
        self.inner
            .store
            .register_personalization(personalization, callback);
    }

    /// Future form of [`Tracker::personalize`]
    pub async fn personalize_async(&self, personalization: Personalization) -> Vec<String> {
        let fallback = personalization.fallback_variants();
        let (tx, rx) = oneshot::channel();
        self.personalize(personalization, move |variants| {
            let _ = tx.send(variants);
        });
        rx.await.unwrap_or(fallback)
    }

    // ============================================
    // Builders
    // ============================================

    pub fn build_event(
        &self,
        event_type: &str,
        target: Option<ItemRef>,
        source: Option<ItemRef>,
    ) -> Event {
        Event {
            event_type: event_type.to_string(),
            scope: self.scope(),
            target,
            source,
            properties: None,
        }
    }

    pub fn build_target(
        &self,
        target_id: &str,
        target_type: &str,
        properties: Option<serde_json::Value>,
    ) -> ItemRef {
        self.build_item(target_id, target_type, properties)
    }

    pub fn build_source(
        &self,
        source_id: &str,
        source_type: &str,
        properties: Option<serde_json::Value>,
    ) -> ItemRef {
        self.build_item(source_id, source_type, properties)
    }

    /// Item reference for `page`, carrying the page itself as properties
    pub fn build_page(&self, page: &Page) -> ItemRef {
        self.build_source(page.id(), "page", serde_json::to_value(page).ok())
    }

    /// Current page as an event source
    pub fn build_page_source(&self) -> ItemRef {
        let page = self.digital_data_guard().page.clone().unwrap_or_default();
        self.build_page(&page)
    }

    /// Current page as an event target
    pub fn build_target_page(&self) -> ItemRef {
        let page = self.digital_data_guard().page.clone().unwrap_or_default();
        self.build_target(page.id(), "page", serde_json::to_value(&page).ok())
    }

    /// `form` event targeting `form_name` from the current page
    pub fn build_form_event(&self, form_name: &str) -> Event {
        self.build_event(
            "form",
            Some(self.build_target(form_name, "form", None)),
            Some(self.build_page_source()),
        )
    }

    fn build_item(
        &self,
        item_id: &str,
        item_type: &str,
        properties: Option<serde_json::Value>,
    ) -> ItemRef {
        ItemRef {
            scope: self.scope(),
            item_id: item_id.to_string(),
            item_type: item_type.to_string(),
            properties,
        }
    }

    fn scope(&self) -> String {
        self.digital_data_guard().scope.clone()
    }
}

// ============================================
// Command replay
// ============================================

fn string_arg(method: &str, args: &[serde_json::Value], index: usize) -> Result<String> {
    args.get(index)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidArguments {
            method: method.to_string(),
            message: format!("argument {} must be a string", index),
        })
}

fn object_arg(
    method: &str,
    args: &[serde_json::Value],
    index: usize,
) -> Result<Option<serde_json::Value>> {
    match args.get(index) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v @ serde_json::Value::Object(_)) => Ok(Some(v.clone())),
        Some(_) => Err(Error::InvalidArguments {
            method: method.to_string(),
            message: format!("argument {} must be an object", index),
        }),
    }
}

/// Replays `page`/`pageview`, `track` and `identify`; everything else is skipped.
///
/// Argument lists are positional: `page([properties])`,
/// `track(eventType, [properties])`, `identify(userId, [traits])`.
#[async_trait]
impl CommandTarget for Tracker {
    async fn invoke(&self, method: &str, args: &[serde_json::Value]) -> Option<Result<()>> {
        let outcome = match method {
            "page" | "pageview" => self.replay_page(method, args).await,
            "track" => self.replay_track(method, args).await,
            "identify" => self.replay_identify(method, args).await,
            _ => return None,
        };
        Some(outcome)
    }
}

impl Tracker {
    async fn replay_page(&self, method: &str, args: &[serde_json::Value]) -> Result<()> {
        let props = match object_arg(method, args, 0)? {
            Some(v) => serde_json::from_value(v)?,
            None => PageProperties::default(),
        };
        self.page(&props).await?;
        Ok(())
    }

    async fn replay_track(&self, method: &str, args: &[serde_json::Value]) -> Result<()> {
        let event_type = string_arg(method, args, 0)?;
        self.track(&event_type, object_arg(method, args, 1)?).await?;
        Ok(())
    }

    async fn replay_identify(&self, method: &str, args: &[serde_json::Value]) -> Result<()> {
        let user_id = string_arg(method, args, 0)?;
        self.identify(&user_id, object_arg(method, args, 1)?).await?;
        Ok(())
    }
}
