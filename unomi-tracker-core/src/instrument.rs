//! Link and form instrumentation
//!
//! Turns link clicks and form submissions into tracking calls without ever
//! holding the user hostage: the default action is delayed at most by the
//! navigation cap, then performed through a [`Navigator`].
//!
//! | Interaction | Waits for tracking? | Then |
//! |-------------|---------------------|------|
//! | Plain click on a same-window link | yes, up to the cap | `Navigator::navigate` |
//! | Modified/middle click, or `target="_blank"` | no | browser default proceeds |
//! | Form submit | yes, up to the cap | `Navigator::submit` |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::logging::PREFIX;
use crate::tracker::Tracker;

/// Longest a navigation is held back when no request timeout is configured
pub const DEFAULT_NAVIGATION_CAP: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MouseButton {
    #[default]
    Primary,
    Middle,
    Secondary,
}

/// Modifier state of a click
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickModifiers {
    pub meta: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub button: MouseButton,
}

impl ClickModifiers {
    /// Clicks the browser turns into "open elsewhere"
    pub fn is_modified(&self) -> bool {
        self.meta || self.ctrl || self.alt || self.shift || self.button == MouseButton::Middle
    }
}

/// An anchor element
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkElement {
    pub href: String,
    pub target: Option<String>,
    pub text: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl LinkElement {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn opens_new_window(&self) -> bool {
        self.target.as_deref() == Some("_blank")
    }
}

/// One input of a form
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: Option<String>,
    pub field_type: String,
    pub value: String,
    /// Checked state; only meaningful for radio buttons and checkboxes
    pub checked: bool,
}

impl FormField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            field_type: "text".to_string(),
            value: value.into(),
            checked: false,
        }
    }

    pub fn with_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = field_type.into();
        self
    }

    pub fn with_checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    fn is_type(&self, field_type: &str) -> bool {
        self.field_type.eq_ignore_ascii_case(field_type)
    }
}

/// A form element
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormElement {
    pub name: Option<String>,
    pub id: Option<String>,
    pub action: Option<String>,
    pub fields: Vec<FormField>,
}

impl FormElement {
    /// `name`, else `id`, else empty
    pub fn form_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("")
    }

    /// Values of named fields, as the form would submit them.
    ///
    /// - password fields are never read
    /// - radio buttons report the checked option only
    /// - a checkbox group sharing one name reports the checked values as an
    ///   array; a lone checkbox reports its value when checked
    /// - other fields are skipped when empty
    pub fn field_values(&self) -> serde_json::Map<String, serde_json::Value> {
        use serde_json::Value;

        let mut checkbox_counts: HashMap<&str, usize> = HashMap::new();
        for field in self.fields.iter().filter(|f| f.is_type("checkbox")) {
            if let Some(name) = field.name.as_deref() {
                *checkbox_counts.entry(name).or_default() += 1;
            }
        }

        let mut values = serde_json::Map::new();
        for field in &self.fields {
            let Some(name) = field.name.as_deref().filter(|n| !n.is_empty()) else {
                continue;
            };

            if field.is_type("password") {
                continue;
            } else if field.is_type("radio") {
                if field.checked {
                    values.insert(name.to_string(), Value::String(field.value.clone()));
                }
            } else if field.is_type("checkbox") {
                if checkbox_counts.get(name).copied().unwrap_or(0) > 1 {
                    let entry = values
                        .entry(name.to_string())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let (true, Value::Array(items)) = (field.checked, entry) {
                        items.push(Value::String(field.value.clone()));
                    }
                } else if field.checked {
                    values.insert(name.to_string(), Value::String(field.value.clone()));
                }
            } else if !field.value.is_empty() {
                values.insert(name.to_string(), Value::String(field.value.clone()));
            }
        }
        values
    }
}

/// Performs the default actions the listeners held back
pub trait Navigator: Send + Sync {
    fn navigate(&self, href: &str);
    fn submit(&self, form: &FormElement);
}

/// Event name, fixed or computed from the element
pub enum EventName<E> {
    Fixed(String),
    Derived(Arc<dyn Fn(&E) -> String + Send + Sync>),
}

impl<E> EventName<E> {
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&E) -> String + Send + Sync + 'static,
    {
        EventName::Derived(Arc::new(f))
    }

    pub fn resolve(&self, element: &E) -> String {
        match self {
            EventName::Fixed(name) => name.clone(),
            EventName::Derived(f) => f(element),
        }
    }
}

impl<E> Clone for EventName<E> {
    fn clone(&self) -> Self {
        match self {
            EventName::Fixed(name) => EventName::Fixed(name.clone()),
            EventName::Derived(f) => EventName::Derived(Arc::clone(f)),
        }
    }
}

impl<E> From<&str> for EventName<E> {
    fn from(name: &str) -> Self {
        EventName::Fixed(name.to_string())
    }
}

impl<E> From<String> for EventName<E> {
    fn from(name: String) -> Self {
        EventName::Fixed(name)
    }
}

/// Event properties, fixed or computed from the element
pub enum EventProperties<E> {
    None,
    Fixed(serde_json::Value),
    Derived(Arc<dyn Fn(&E) -> serde_json::Value + Send + Sync>),
}

impl<E> EventProperties<E> {
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&E) -> serde_json::Value + Send + Sync + 'static,
    {
        EventProperties::Derived(Arc::new(f))
    }

    pub fn resolve(&self, element: &E) -> Option<serde_json::Value> {
        match self {
            EventProperties::None => None,
            EventProperties::Fixed(value) => Some(value.clone()),
            EventProperties::Derived(f) => Some(f(element)),
        }
    }
}

impl<E> Clone for EventProperties<E> {
    fn clone(&self) -> Self {
        match self {
            EventProperties::None => EventProperties::None,
            EventProperties::Fixed(value) => EventProperties::Fixed(value.clone()),
            EventProperties::Derived(f) => EventProperties::Derived(Arc::clone(f)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Tracking fired in the background; the browser's default was left alone
    DefaultAction,
    /// Default prevented, tracked (or gave up at the cap), then navigated
    Navigated { tracked: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub tracked: bool,
}

fn navigation_cap(tracker: &Tracker) -> Duration {
    tracker.config().timeout().unwrap_or(DEFAULT_NAVIGATION_CAP)
}

/// Click handler bound to one link
pub struct LinkListener {
    tracker: Tracker,
    element: LinkElement,
    name: EventName<LinkElement>,
    properties: EventProperties<LinkElement>,
    cap: Duration,
}

impl LinkListener {
    pub fn element(&self) -> &LinkElement {
        &self.element
    }

    pub async fn on_click(&self, click: ClickModifiers, navigator: &dyn Navigator) -> ClickOutcome {
        let event_type = self.name.resolve(&self.element);
        let properties = self.properties.resolve(&self.element);

        if click.is_modified() || self.element.opens_new_window() {
            let tracker = self.tracker.clone();
            tokio::spawn(async move {
                if let Err(e) = tracker.track(&event_type, properties).await {
                    tracing::warn!(error = %e, "{} Link tracking failed", PREFIX);
                }
            });
            return ClickOutcome::DefaultAction;
        }

        let tracked = matches!(
            tokio::time::timeout(self.cap, self.tracker.track(&event_type, properties)).await,
            Ok(Ok(_))
        );
        if !tracked {
            tracing::warn!(href = %self.element.href, "{} Navigating without tracking", PREFIX);
        }
        navigator.navigate(&self.element.href);
        ClickOutcome::Navigated { tracked }
    }
}

/// Submit handler bound to one form
pub struct FormListener {
    tracker: Tracker,
    element: FormElement,
    name: EventName<FormElement>,
    properties: EventProperties<FormElement>,
    cap: Duration,
}

impl FormListener {
    pub fn element(&self) -> &FormElement {
        &self.element
    }

    /// Track the submission, then submit. The default submission is always prevented.
    pub async fn on_submit(&self, navigator: &dyn Navigator) -> SubmitOutcome {
        let mut event = self.tracker.build_form_event(self.element.form_name());
        event.event_type = self.name.resolve(&self.element);

        let mut values = self.element.field_values();
        if let Some(serde_json::Value::Object(extra)) = self.properties.resolve(&self.element) {
            values.extend(extra);
        }
        event.properties = Some(serde_json::Value::Object(values));

        let tracked = matches!(
            tokio::time::timeout(self.cap, self.tracker.collect_event(event)).await,
            Ok(Ok(_))
        );
        if !tracked {
            tracing::warn!(
                form = %self.element.form_name(),
                "{} Submitting without tracking",
                PREFIX
            );
        }
        navigator.submit(&self.element);
        SubmitOutcome { tracked }
    }
}

/// Attach click tracking to each link
pub fn instrument_links<I>(
    tracker: &Tracker,
    elements: I,
    name: impl Into<EventName<LinkElement>>,
    properties: EventProperties<LinkElement>,
) -> Vec<LinkListener>
where
    I: IntoIterator<Item = LinkElement>,
{
    let name = name.into();
    let cap = navigation_cap(tracker);
    elements
        .into_iter()
        .map(|element| LinkListener {
            tracker: tracker.clone(),
            element,
            name: name.clone(),
            properties: properties.clone(),
            cap,
        })
        .collect()
}

/// Attach submit tracking to each form
pub fn instrument_forms<I>(
    tracker: &Tracker,
    elements: I,
    name: impl Into<EventName<FormElement>>,
    properties: EventProperties<FormElement>,
) -> Vec<FormListener>
where
    I: IntoIterator<Item = FormElement>,
{
    let name = name.into();
    let cap = navigation_cap(tracker);
    elements
        .into_iter()
        .map(|element| FormListener {
            tracker: tracker.clone(),
            element,
            name: name.clone(),
            properties: properties.clone(),
            cap,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{HttpRequest, HttpResponse, Transport};
    use crate::config::TrackerConfig;
    use crate::context::BootstrapOptions;
    use crate::error::Result;
    use crate::session::MemoryCookieJar;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Answers the context call at once and collector calls after `delay`
    struct SlowCollector {
        delay: Duration,
        bodies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for SlowCollector {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            if request.url.contains("/eventcollector") {
                self.bodies.lock().unwrap().push(request.body.clone().unwrap_or_default());
                tokio::time::sleep(self.delay).await;
            }
            Ok(HttpResponse {
                status: 200,
                body: "{}".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        actions: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, href: &str) {
            self.actions.lock().unwrap().push(format!("navigate:{}", href));
        }

        fn submit(&self, form: &FormElement) {
            self.actions
                .lock()
                .unwrap()
                .push(format!("submit:{}", form.form_name()));
        }
    }

    async fn loaded_tracker(delay: Duration, timeout_ms: i64) -> (Tracker, Arc<SlowCollector>) {
        let transport = Arc::new(SlowCollector {
            delay,
            bodies: Mutex::new(Vec::new()),
        });
        let config = TrackerConfig {
            url: "http://cxs.test/cxs".to_string(),
            timeout_in_milliseconds: timeout_ms,
            ..Default::default()
        };
        let tracker =
            Tracker::new(config, Box::new(MemoryCookieJar::new()), transport.clone()).unwrap();
        tracker.load_context(BootstrapOptions::default()).await.unwrap();
        (tracker, transport)
    }

    #[test]
    fn test_modified_clicks() {
        assert!(!ClickModifiers::default().is_modified());
        assert!(ClickModifiers {
            ctrl: true,
            ..Default::default()
        }
        .is_modified());
        assert!(ClickModifiers {
            button: MouseButton::Middle,
            ..Default::default()
        }
        .is_modified());
    }

    #[tokio::test]
    async fn test_plain_click_navigates_after_tracking() {
        let (tracker, transport) = loaded_tracker(Duration::from_millis(10), 1500).await;
        let navigator = RecordingNavigator::default();

        let listeners = instrument_links(
            &tracker,
            vec![LinkElement::new("https://example.com/pricing")],
            EventName::derived(|link: &LinkElement| format!("click:{}", link.href)),
            EventProperties::Fixed(json!({"section": "nav"})),
        );
        let outcome = listeners[0].on_click(ClickModifiers::default(), &navigator).await;

        assert_eq!(outcome, ClickOutcome::Navigated { tracked: true });
        assert_eq!(
            *navigator.actions.lock().unwrap(),
            vec!["navigate:https://example.com/pricing"]
        );
        let body = transport.bodies.lock().unwrap()[0].clone();
        assert!(body.contains("click:https://example.com/pricing"));
        assert!(body.contains("\"section\":\"nav\""));
    }

    #[tokio::test]
    async fn test_new_window_link_does_not_wait() {
        let (tracker, transport) = loaded_tracker(Duration::from_millis(500), 1500).await;
        let navigator = RecordingNavigator::default();
        let listeners = instrument_links(
            &tracker,
            vec![LinkElement::new("https://example.com/docs").with_target("_blank")],
            "outbound",
            EventProperties::None,
        );

        let started = Instant::now();
        let outcome = listeners[0].on_click(ClickModifiers::default(), &navigator).await;

        assert_eq!(outcome, ClickOutcome::DefaultAction);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(navigator.actions.lock().unwrap().is_empty());

        // The tracking call still goes out in the background
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_modified_click_does_not_wait() {
        let (tracker, _transport) = loaded_tracker(Duration::from_millis(500), 1500).await;
        let navigator = RecordingNavigator::default();
        let listeners = instrument_links(
            &tracker,
            vec![LinkElement::new("/next")],
            "outbound",
            EventProperties::None,
        );

        let click = ClickModifiers {
            meta: true,
            ..Default::default()
        };
        assert_eq!(
            listeners[0].on_click(click, &navigator).await,
            ClickOutcome::DefaultAction
        );
        assert!(navigator.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_tracking_still_navigates() {
        let (tracker, _transport) = loaded_tracker(Duration::from_millis(1000), 50).await;
        let navigator = RecordingNavigator::default();
        let listeners = instrument_links(
            &tracker,
            vec![LinkElement::new("/slow")],
            "outbound",
            EventProperties::None,
        );

        let started = Instant::now();
        let outcome = listeners[0].on_click(ClickModifiers::default(), &navigator).await;

        assert_eq!(outcome, ClickOutcome::Navigated { tracked: false });
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(*navigator.actions.lock().unwrap(), vec!["navigate:/slow"]);
    }

    #[tokio::test]
    async fn test_form_submit_tracks_fields_then_submits() {
        let (tracker, transport) = loaded_tracker(Duration::from_millis(10), 1500).await;
        let navigator = RecordingNavigator::default();

        let form = FormElement {
            name: Some("signup".to_string()),
            fields: vec![
                FormField::new("email", "ada@example.com").with_type("email"),
                FormField::new("password", "hunter2").with_type("password"),
                FormField {
                    name: None,
                    field_type: "submit".to_string(),
                    value: "Go".to_string(),
                    checked: false,
                },
            ],
            ..Default::default()
        };
        let listeners = instrument_forms(
            &tracker,
            vec![form],
            "form",
            EventProperties::derived(|f: &FormElement| json!({"fieldCount": f.fields.len()})),
        );
        let outcome = listeners[0].on_submit(&navigator).await;

        assert_eq!(outcome, SubmitOutcome { tracked: true });
        assert_eq!(*navigator.actions.lock().unwrap(), vec!["submit:signup"]);

        let body: serde_json::Value =
            serde_json::from_str(&transport.bodies.lock().unwrap()[0]).unwrap();
        let event = &body["events"][0];
        assert_eq!(event["eventType"], "form");
        assert_eq!(event["target"]["itemId"], "signup");
        assert_eq!(event["target"]["itemType"], "form");
        assert_eq!(event["properties"]["email"], "ada@example.com");
        assert_eq!(event["properties"]["fieldCount"], 3);
        assert!(event["properties"].get("password").is_none());
    }

    #[test]
    fn test_field_values_follow_checked_state() {
        let form = FormElement {
            name: Some("plans".to_string()),
            fields: vec![
                FormField::new("plan", "free").with_type("radio").with_checked(true),
                FormField::new("plan", "pro").with_type("radio"),
                FormField::new("newsletter", "yes").with_type("checkbox"),
                FormField::new("topics", "rust").with_type("checkbox").with_checked(true),
                FormField::new("topics", "go").with_type("checkbox"),
                FormField::new("topics", "zig").with_type("checkbox").with_checked(true),
                FormField::new("terms", "accepted").with_type("checkbox").with_checked(true),
                FormField::new("nickname", ""),
                FormField::new("comment", "hi").with_type("textarea"),
            ],
            ..Default::default()
        };

        let values = serde_json::Value::Object(form.field_values());
        assert_eq!(
            values,
            json!({
                "plan": "free",
                "topics": ["rust", "zig"],
                "terms": "accepted",
                "comment": "hi"
            })
        );
    }

    #[test]
    fn test_unchecked_checkbox_group_reports_empty_list() {
        let form = FormElement {
            fields: vec![
                FormField::new("topics", "rust").with_type("checkbox"),
                FormField::new("topics", "go").with_type("checkbox"),
            ],
            ..Default::default()
        };
        assert_eq!(form.field_values()["topics"], json!([]));
    }

    #[tokio::test]
    async fn test_form_submits_even_when_tracking_times_out() {
        let (tracker, _transport) = loaded_tracker(Duration::from_millis(1000), 50).await;
        let navigator = RecordingNavigator::default();
        let form = FormElement {
            id: Some("contact".to_string()),
            ..Default::default()
        };
        let listeners = instrument_forms(&tracker, vec![form], "form", EventProperties::None);

        let outcome = listeners[0].on_submit(&navigator).await;
        assert_eq!(outcome, SubmitOutcome { tracked: false });
        assert_eq!(*navigator.actions.lock().unwrap(), vec!["submit:contact"]);
    }

    #[test]
    fn test_default_cap_when_timeout_disabled() {
        let config = TrackerConfig {
            timeout_in_milliseconds: -1,
            ..Default::default()
        };
        let tracker = Tracker::new(
            config,
            Box::new(MemoryCookieJar::new()),
            Arc::new(SlowCollector {
                delay: Duration::ZERO,
                bodies: Mutex::new(Vec::new()),
            }),
        )
        .unwrap();
        assert_eq!(navigation_cap(&tracker), DEFAULT_NAVIGATION_CAP);
    }
}
