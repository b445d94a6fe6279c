use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use url::Url;

use crate::error::ServiceError;

// ─── Events ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AppStart,
    LoginSuccessful,
    PurchaseSuccessful,
    Custom,
    #[serde(other)]
    Invalid,
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::AppStart => "app_start",
            EventType::LoginSuccessful => "login_successful",
            EventType::PurchaseSuccessful => "purchase_successful",
            EventType::Custom => "custom",
            EventType::Invalid => "invalid",
        }
    }

    /// Persistent events stay available for the whole session and are never
    /// consumed by a trigger claim.
    pub fn is_persistent(&self) -> bool {
        matches!(self, EventType::AppStart)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Integer,
    Double,
    Boolean,
    TimeInMilliseconds,
    #[serde(other)]
    Invalid,
}

/// A typed event attribute value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    TimeInMilliseconds(i64),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Integer(_) => AttributeType::Integer,
            AttributeValue::Double(_) => AttributeType::Double,
            AttributeValue::Boolean(_) => AttributeType::Boolean,
            AttributeValue::TimeInMilliseconds(_) => AttributeType::TimeInMilliseconds,
        }
    }
}

/// An event logged by the host application.
///
/// Attribute names are stored lower-cased so trigger attributes match them
/// regardless of the casing used by either side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Event {
    pub fn new(event_type: EventType, name: impl Into<String>) -> Self {
        Self {
            event_type,
            name: name.into(),
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn app_start() -> Self {
        Self::new(EventType::AppStart, EventType::AppStart.name())
    }

    pub fn login_successful() -> Self {
        Self::new(EventType::LoginSuccessful, EventType::LoginSuccessful.name())
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(EventType::Custom, name)
    }

    pub fn purchase_successful(
        purchase_amount_micros: i64,
        number_of_items: i64,
        currency_code: impl Into<String>,
        item_ids: &[String],
    ) -> Self {
        Self::new(EventType::PurchaseSuccessful, EventType::PurchaseSuccessful.name())
            .with_attribute(
                "purchase_amount_micros",
                AttributeValue::Integer(purchase_amount_micros),
            )
            .with_attribute("number_of_items", AttributeValue::Integer(number_of_items))
            .with_attribute(
                "currency_code",
                AttributeValue::String(currency_code.into()),
            )
            .with_attribute("item_id_list", AttributeValue::String(item_ids.join("|")))
    }

    pub fn with_attribute(mut self, name: impl AsRef<str>, value: AttributeValue) -> Self {
        self.attributes
            .insert(name.as_ref().to_lowercase(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Name used to correlate this event with trigger definitions.
    pub fn matching_name(&self) -> String {
        match self.event_type {
            EventType::Custom => self.name.to_lowercase(),
            other => other.name().to_string(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.event_type.is_persistent()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(&name.to_lowercase())
    }
}

// ─── Triggers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOperator {
    Equals,
    IsNotEqual,
    GreaterThan,
    LessThan,
    IsBlank,
    IsNotBlank,
    MatchesRegex,
    DoesNotMatchRegex,
    #[serde(other)]
    Invalid,
}

/// One predicate of a trigger. `value` is kept as sent by the server and is
/// coerced to `attribute_type` when evaluated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    pub operator: AttributeOperator,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub event_type: EventType,
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub attributes: Vec<TriggerAttribute>,
}

impl Trigger {
    pub fn new(event_type: EventType, event_name: impl Into<String>) -> Self {
        Self {
            event_type,
            event_name: event_name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: TriggerAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn matching_event_name(&self) -> String {
        match self.event_type {
            EventType::Custom => self.event_name.to_lowercase(),
            other => other.name().to_string(),
        }
    }
}

// ─── Campaigns ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Modal,
    FullScreen,
    SlideUp,
    Html,
    Tooltip,
    #[serde(other)]
    Invalid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplaySettings {
    /// Pause after this campaign is closed before the next queued one shows.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub end_time_millis: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub carousel_image_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    pub title: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub message_body: Option<String>,
    #[serde(default)]
    pub resource: Resource,
    #[serde(default)]
    pub display_settings: DisplaySettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TooltipPosition {
    TopLeft,
    TopCenter,
    TopRight,
    Right,
    BottomRight,
    BottomCenter,
    BottomLeft,
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TooltipData {
    /// Identifier (or identifier fragment) of the UI element to anchor to.
    pub ui_element_id: String,
    pub position: TooltipPosition,
    #[serde(default)]
    pub auto_disappear_secs: Option<u64>,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// Campaign definition as delivered by the campaign list service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignData {
    pub campaign_id: String,
    pub campaign_type: CampaignType,
    pub max_impressions: i32,
    #[serde(default)]
    pub infinite_impressions: bool,
    #[serde(default)]
    pub has_no_end_date: bool,
    #[serde(default)]
    pub is_test: bool,
    /// `None` means the campaign never fires on its own.
    #[serde(default)]
    pub triggers: Option<Vec<Trigger>>,
    pub message_payload: MessagePayload,
    #[serde(default)]
    pub tooltip: Option<TooltipData>,
}

/// A campaign together with its per-user mutable state.
///
/// Equality only looks at `data`: two snapshots of the same campaign are
/// equal whatever their impression or opt-out counters say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub data: CampaignData,
    impressions_left: i32,
    is_opted_out: bool,
}

impl PartialEq for Campaign {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Campaign {
    pub fn new(data: CampaignData) -> Self {
        let impressions_left = Self::max_impressions_for(&data);
        Self {
            data,
            impressions_left,
            is_opted_out: false,
        }
    }

    /// Rebuilds a campaign with state carried over from an earlier snapshot.
    /// `impressions_left` is clamped into `0..=max_impressions`.
    pub fn with_state(data: CampaignData, impressions_left: i32, is_opted_out: bool) -> Self {
        let max = Self::max_impressions_for(&data);
        Self {
            data,
            impressions_left: impressions_left.clamp(0, max),
            is_opted_out,
        }
    }

    // Test campaigns are capped at one impression, ahead of the infinite flag.
    fn max_impressions_for(data: &CampaignData) -> i32 {
        if data.is_test {
            1
        } else {
            data.max_impressions.max(0)
        }
    }

    pub fn id(&self) -> &str {
        &self.data.campaign_id
    }

    pub fn title(&self) -> &str {
        &self.data.message_payload.title
    }

    pub fn is_test(&self) -> bool {
        self.data.is_test
    }

    pub fn max_impressions(&self) -> i32 {
        Self::max_impressions_for(&self.data)
    }

    pub fn impressions_left(&self) -> i32 {
        self.impressions_left
    }

    pub fn is_opted_out(&self) -> bool {
        self.is_opted_out
    }

    pub fn has_unlimited_impressions(&self) -> bool {
        !self.data.is_test && self.data.infinite_impressions
    }

    pub fn has_impressions_left(&self) -> bool {
        self.has_unlimited_impressions() || self.impressions_left > 0
    }

    pub fn decrement_impressions(&mut self) {
        if self.has_unlimited_impressions() {
            return;
        }
        self.impressions_left = (self.impressions_left - 1).max(0);
    }

    pub fn opt_out(&mut self) {
        self.is_opted_out = true;
    }

    pub fn is_outdated_at(&self, now: DateTime<Utc>) -> bool {
        !self.data.has_no_end_date
            && self.data.message_payload.display_settings.end_time_millis < now.timestamp_millis()
    }

    pub fn is_outdated(&self) -> bool {
        self.is_outdated_at(Utc::now())
    }

    pub fn triggers(&self) -> Option<&[Trigger]> {
        self.data.triggers.as_deref()
    }

    pub fn is_tooltip(&self) -> bool {
        self.data.tooltip.is_some()
    }

    pub fn tooltip(&self) -> Option<&TooltipData> {
        self.data.tooltip.as_ref()
    }

    pub fn display_delay_ms(&self) -> Option<u64> {
        self.data.message_payload.display_settings.delay_ms
    }

    /// Image urls to prefetch before display: the carousel set when present,
    /// otherwise the single campaign image.
    pub fn image_urls(&self) -> Vec<String> {
        let resource = &self.data.message_payload.resource;
        if !resource.carousel_image_urls.is_empty() {
            return resource.carousel_image_urls.clone();
        }
        resource.image_url.iter().cloned().collect()
    }

    /// Bracketed context tags at the start of the title,
    /// e.g. `"[ctx1][ctx2] Title"` yields `["ctx1", "ctx2"]`.
    pub fn contexts(&self) -> Vec<String> {
        static CONTEXT_TAG: OnceLock<Option<Regex>> = OnceLock::new();
        let Some(pattern) = CONTEXT_TAG
            .get_or_init(|| Regex::new(r"^\s*\[([^\[\]]*)\]").ok())
            .as_ref()
        else {
            return Vec::new();
        };

        let mut contexts = Vec::new();
        let mut rest = self.title();
        while let Some(captures) = pattern.captures(rest) {
            let (Some(whole), Some(tag)) = (captures.get(0), captures.get(1)) else {
                break;
            };
            let tag = tag.as_str().trim();
            if !tag.is_empty() {
                contexts.push(tag.to_string());
            }
            rest = &rest[whole.end()..];
        }
        contexts
    }
}

// ─── Impressions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImpressionType {
    Impression,
    Action,
    Exit,
    OptOut,
    Click,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Impression {
    pub impression_type: ImpressionType,
    pub timestamp: DateTime<Utc>,
}

impl Impression {
    pub fn now(impression_type: ImpressionType) -> Self {
        Self {
            impression_type,
            timestamp: Utc::now(),
        }
    }
}

// ─── Service payloads ───────────────────────────────────────────────────────

/// Campaign list returned by the ping endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub next_ping_millis: u64,
    pub current_ping_millis: i64,
    #[serde(default)]
    pub data: Vec<CampaignData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigEndpoints {
    pub ping: String,
    #[serde(default)]
    pub display_permission: Option<String>,
    #[serde(default)]
    pub impression: Option<String>,
}

impl ConfigEndpoints {
    /// Every endpoint must be an absolute URL.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let endpoints = std::iter::once(&self.ping)
            .chain(self.display_permission.iter())
            .chain(self.impression.iter());
        for endpoint in endpoints {
            Url::parse(endpoint).map_err(|e| {
                ServiceError::InvalidConfiguration(format!("endpoint {endpoint:?}: {e}"))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub enabled: bool,
    pub rollout_percentage: u8,
    #[serde(default)]
    pub endpoints: Option<ConfigEndpoints>,
}

/// Answer of the display permission oracle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayPermission {
    pub display: bool,
    pub perform_ping: bool,
}

impl DisplayPermission {
    pub fn denied() -> Self {
        Self {
            display: false,
            perform_ping: false,
        }
    }
}

/// Identity the host registers through `register_preference`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub id_tracking_identifier: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl UserInfo {
    /// Key identifying whose campaign state is in use. Anonymous users share
    /// the empty key.
    pub fn cache_key(&self) -> String {
        let user_id = self.user_id.as_deref().unwrap_or_default();
        let tracking = self.id_tracking_identifier.as_deref().unwrap_or_default();
        if user_id.is_empty() && tracking.is_empty() {
            String::new()
        } else {
            format!("{user_id}|{tracking}")
        }
    }
}
