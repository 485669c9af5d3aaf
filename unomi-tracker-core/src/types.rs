//! Core domain types for unomi-tracker
//!
//! These types describe what flows between the page and the context server.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Scope** | Tenant/site key attached to every event and item reference |
//! | **Item** | Anything an event points at: a page, a site, a form, a profile |
//! | **DigitalData** | The page-wide description (scope + current page) used as event source |
//! | **Context** | The server-computed profile/session state returned by bootstrap |
//! | **Personalization** | A request for server-selected content variants, with a local fallback |
//!
//! Field names serialize in camelCase because that is what the context server reads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================
// Items and events
// ============================================

/// A reference to an item in a scope, used as event source or target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRef {
    pub scope: String,
    pub item_id: String,
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

impl ItemRef {
    pub fn new(scope: impl Into<String>, item_id: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            item_id: item_id.into(),
            item_type: item_type.into(),
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// A tracking event as sent to the context server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ItemRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ItemRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            scope: scope.into(),
            target: None,
            source: None,
            properties: None,
        }
    }

    pub fn with_target(mut self, target: ItemRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_source(mut self, source: ItemRef) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

// ============================================
// Page description
// ============================================

/// Identity of the current page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(rename = "pageName", default, skip_serializing_if = "Option::is_none")]
    pub page_name: Option<String>,
    #[serde(rename = "pageID", default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(rename = "pagePath", default, skip_serializing_if = "Option::is_none")]
    pub page_path: Option<String>,
    #[serde(rename = "destinationURL", default, skip_serializing_if = "Option::is_none")]
    pub destination_url: Option<String>,
    #[serde(rename = "referringURL", default, skip_serializing_if = "Option::is_none")]
    pub referring_url: Option<String>,
}

/// The page part of [`DigitalData`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page_info: PageInfo,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub interests: HashMap<String, f64>,
    #[serde(default)]
    pub attributes: Vec<serde_json::Value>,
    #[serde(default)]
    pub consent_types: Vec<serde_json::Value>,
}

impl Page {
    /// Fill page identity from page-call properties.
    ///
    /// Fields already set win; `attributes` and `consent_types` are reset.
    pub fn fill(&mut self, props: &PageProperties) {
        self.attributes.clear();
        self.consent_types.clear();

        let info = &mut self.page_info;
        fill_missing(&mut info.page_name, &props.title);
        fill_missing(&mut info.page_id, &props.path);
        fill_missing(&mut info.page_path, &props.path);
        fill_missing(&mut info.destination_url, &props.url);
        fill_missing(&mut info.referring_url, &props.referrer);
    }

    /// A fresh page built from page-call properties
    pub fn from_properties(props: &PageProperties) -> Self {
        let mut page = Page::default();
        page.fill(props);
        page
    }

    /// Page id, or an empty string for a page that was never filled
    pub fn id(&self) -> &str {
        self.page_info.page_id.as_deref().unwrap_or("")
    }
}

fn fill_missing(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

/// Properties of a page call, as an embedder reports them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageProperties {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

/// Page-wide description held for the tracker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitalData {
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
}

impl DigitalData {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            page: None,
        }
    }
}

// ============================================
// Personalization
// ============================================

/// Strategy options of a personalization request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// Variant id used when the server cannot answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// One candidate content variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalizationContent {
    pub id: String,
    #[serde(default)]
    pub filters: Vec<serde_json::Value>,
}

/// A request for server-selected content variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personalization {
    pub id: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub strategy_options: StrategyOptions,
    #[serde(default)]
    pub contents: Vec<PersonalizationContent>,
}

fn default_strategy() -> String {
    "matching-first".to_string()
}

impl Personalization {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            strategy: default_strategy(),
            strategy_options: StrategyOptions::default(),
            contents: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.strategy_options.fallback = Some(fallback.into());
        self
    }

    pub fn with_content(mut self, id: impl Into<String>) -> Self {
        self.contents.push(PersonalizationContent {
            id: id.into(),
            filters: Vec::new(),
        });
        self
    }

    /// Variants to use when the server did not answer for this request
    pub fn fallback_variants(&self) -> Vec<String> {
        self.strategy_options.fallback.iter().cloned().collect()
    }
}

// ============================================
// Context
// ============================================

/// Server-computed profile/session context returned by bootstrap
///
/// The default value is the empty context used when bootstrap fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub profile_properties: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub session_properties: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile_segments: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub personalizations: HashMap<String, Vec<String>>,
    /// Fields this client does not model
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Body of `POST {url}/context.json`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRequest {
    pub required_profile_properties: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_session_properties: Vec<String>,
    pub source: ItemRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Event>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personalizations: Option<Vec<Personalization>>,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_camel_case() {
        let event = Event::new("view", "site")
            .with_source(ItemRef::new("site", "p1", "page"))
            .with_target(ItemRef::new("site", "home", "page").with_properties(serde_json::json!({"a": 1})));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "view");
        assert_eq!(json["source"]["itemId"], "p1");
        assert_eq!(json["source"]["itemType"], "page");
        assert!(json["source"].get("properties").is_none());
        assert_eq!(json["target"]["properties"]["a"], 1);
        assert!(json.get("properties").is_none());
    }

    #[test]
    fn test_page_fill_keeps_existing_fields() {
        let mut page = Page::default();
        page.page_info.page_name = Some("Preset".to_string());
        page.attributes.push(serde_json::json!("stale"));

        page.fill(&PageProperties {
            title: Some("Home".to_string()),
            path: Some("/home".to_string()),
            url: Some("https://example.com/home".to_string()),
            referrer: None,
        });

        assert_eq!(page.page_info.page_name.as_deref(), Some("Preset"));
        assert_eq!(page.page_info.page_id.as_deref(), Some("/home"));
        assert_eq!(page.page_info.page_path.as_deref(), Some("/home"));
        assert_eq!(
            page.page_info.destination_url.as_deref(),
            Some("https://example.com/home")
        );
        assert!(page.page_info.referring_url.is_none());
        assert!(page.attributes.is_empty());
        assert_eq!(page.id(), "/home");
    }

    #[test]
    fn test_page_info_wire_names() {
        let page = Page::from_properties(&PageProperties {
            title: Some("Home".to_string()),
            path: Some("/".to_string()),
            url: None,
            referrer: Some("https://ref.example".to_string()),
        });
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pageInfo"]["pageName"], "Home");
        assert_eq!(json["pageInfo"]["pageID"], "/");
        assert_eq!(json["pageInfo"]["referringURL"], "https://ref.example");
        assert_eq!(json["consentTypes"], serde_json::json!([]));
    }

    #[test]
    fn test_personalization_fallback_variants() {
        let p = Personalization::new("hero").with_fallback("default-hero");
        assert_eq!(p.fallback_variants(), vec!["default-hero".to_string()]);
        assert!(Personalization::new("bare").fallback_variants().is_empty());
    }

    #[test]
    fn test_context_response_keeps_unknown_fields() {
        let json = r#"{
            "profileId": "prof-1",
            "sessionId": "sess-1",
            "personalizations": {"hero": ["variant-b"]},
            "trackedConditions": []
        }"#;
        let context: ContextResponse = serde_json::from_str(json).unwrap();
        assert_eq!(context.profile_id.as_deref(), Some("prof-1"));
        assert_eq!(context.personalizations["hero"], vec!["variant-b"]);
        assert!(context.extra.contains_key("trackedConditions"));
    }
}
