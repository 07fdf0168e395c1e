//! Event type definitions for the analytics pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::limits::{
    clamp_opt, MAX_IP_LEN, MAX_PLATFORM_LEN, MAX_PROPERTIES_BYTES, MAX_REFERRER_LEN,
    MAX_USER_AGENT_LEN, TRUNCATED_MARKER,
};

/// Recognized event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    VenueView,
    ContentView,
    StoryView,
    Search,
    Share,
    Favorite,
    Click,
    Filter,
    SessionStart,
    SessionEnd,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        Self::VenueView,
        Self::ContentView,
        Self::StoryView,
        Self::Search,
        Self::Share,
        Self::Favorite,
        Self::Click,
        Self::Filter,
        Self::SessionStart,
        Self::SessionEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VenueView => "venue_view",
            Self::ContentView => "content_view",
            Self::StoryView => "story_view",
            Self::Search => "search",
            Self::Share => "share",
            Self::Favorite => "favorite",
            Self::Click => "click",
            Self::Filter => "filter",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
        }
    }

    /// Whether this event counts towards `content_views` in rollups.
    pub fn is_content_view(&self) -> bool {
        matches!(self, Self::ContentView | Self::StoryView)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidEventType(s.to_string()))
    }
}

/// Size-capped property bag attached to an event.
///
/// Stored as a serialized JSON object; read back through the typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a property bag from a client supplied value.
    ///
    /// `null` yields an empty bag; anything other than an object is rejected.
    pub fn from_value(value: Option<Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Self::new()),
            Some(Value::Object(map)) => Ok(Self::capped(map)),
            Some(_) => Err(Error::validation("properties must be a JSON object")),
        }
    }

    /// Applies the size cap, dropping entries that do not fit.
    ///
    /// Entries are considered in key order. A bag that lost entries carries
    /// `"_truncated": true`.
    pub fn capped(map: Map<String, Value>) -> Self {
        if encoded_len(&Value::Object(map.clone())) <= MAX_PROPERTIES_BYTES {
            return Self(map);
        }

        let marker = Value::Bool(true);
        // braces plus the marker entry and its separator
        let mut used = 2 + entry_len(TRUNCATED_MARKER, &marker);
        let mut kept = Map::new();
        for (key, value) in map {
            if key == TRUNCATED_MARKER {
                continue;
            }
            let len = entry_len(&key, &value);
            if used + len <= MAX_PROPERTIES_BYTES {
                used += len;
                kept.insert(key, value);
            }
        }
        kept.insert(TRUNCATED_MARKER.to_string(), marker);
        Self(kept)
    }

    /// Parses a stored property bag. Corrupt text yields an empty bag.
    pub fn from_json_str(raw: &str) -> Self {
        serde_json::from_str::<Map<String, Value>>(raw)
            .map(Self)
            .unwrap_or_default()
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Inserts a value, re-applying the cap.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        Self::capped(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn is_truncated(&self) -> bool {
        self.get_bool(TRUNCATED_MARKER).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn encoded_len(value: &Value) -> usize {
    serde_json::to_string(value).map_or(usize::MAX, |s| s.len())
}

/// Encoded size of `"key":value,`.
fn entry_len(key: &str, value: &Value) -> usize {
    let key_len = serde_json::to_string(key).map_or(usize::MAX / 2, |s| s.len());
    key_len.saturating_add(encoded_len(value)).saturating_add(2)
}

/// Request-derived client attributes, truncated to their column limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl ClientInfo {
    pub fn new(ip: Option<&str>, user_agent: Option<&str>, referrer: Option<&str>) -> Self {
        Self {
            ip: clamp_opt(ip, MAX_IP_LEN),
            user_agent: clamp_opt(user_agent, MAX_USER_AGENT_LEN),
            referrer: clamp_opt(referrer, MAX_REFERRER_LEN),
        }
    }
}

/// A validated event that has not been assigned a session or timestamp yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub venue_id: Option<i64>,
    pub content_id: Option<i64>,
    pub properties: Properties,
}

impl NewEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            venue_id: None,
            content_id: None,
            properties: Properties::new(),
        }
    }

    pub fn venue(mut self, venue_id: i64) -> Self {
        self.venue_id = Some(venue_id);
        self
    }

    pub fn content(mut self, content_id: i64) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// Generic event submission (`POST /track/event`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EventSubmission {
    #[validate(length(min = 1, max = 64))]
    pub event_type: String,
    #[validate(range(min = 1))]
    pub venue_id: Option<i64>,
    #[validate(range(min = 1))]
    pub content_id: Option<i64>,
    pub properties: Option<Value>,
}

impl EventSubmission {
    /// Validates the submission and resolves the event type.
    pub fn into_new_event(self) -> Result<NewEvent> {
        self.validate()
            .map_err(|e| Error::validation(e.to_string()))?;
        let event_type: EventType = self.event_type.parse()?;
        Ok(NewEvent {
            event_type,
            venue_id: self.venue_id,
            content_id: self.content_id,
            properties: Properties::from_value(self.properties)?,
        })
    }
}

/// Share submission (`POST /track/share`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShareSubmission {
    #[validate(range(min = 1))]
    pub venue_id: Option<i64>,
    #[validate(range(min = 1))]
    pub content_id: Option<i64>,
    pub platform: Option<String>,
}

impl ShareSubmission {
    pub fn into_new_event(self) -> Result<NewEvent> {
        self.validate()
            .map_err(|e| Error::validation(e.to_string()))?;
        let mut properties = Properties::new();
        if let Some(platform) = clamp_opt(self.platform.as_deref(), MAX_PLATFORM_LEN) {
            properties = properties.with("platform", platform);
        }
        require_entity(NewEvent {
            event_type: EventType::Share,
            venue_id: self.venue_id,
            content_id: self.content_id,
            properties,
        })
    }
}

/// Favorite submission (`POST /track/favorite`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FavoriteSubmission {
    #[validate(range(min = 1))]
    pub venue_id: Option<i64>,
    #[validate(range(min = 1))]
    pub content_id: Option<i64>,
}

impl FavoriteSubmission {
    pub fn into_new_event(self) -> Result<NewEvent> {
        self.validate()
            .map_err(|e| Error::validation(e.to_string()))?;
        require_entity(NewEvent {
            event_type: EventType::Favorite,
            venue_id: self.venue_id,
            content_id: self.content_id,
            properties: Properties::new(),
        })
    }
}

fn require_entity(event: NewEvent) -> Result<NewEvent> {
    if event.venue_id.is_none() && event.content_id.is_none() {
        return Err(Error::validation(format!(
            "{} requires venue_id or content_id",
            event.event_type
        )));
    }
    Ok(event)
}

/// Search submission (`POST /track/search`).
///
/// Oversized terms are truncated downstream, so only the count is validated.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SearchSubmission {
    #[serde(default)]
    pub search_term: String,
    pub search_type: Option<String>,
    #[validate(range(min = 0))]
    pub results_count: Option<i64>,
}

/// A single immutable analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub venue_id: Option<i64>,
    pub content_id: Option<i64>,
    /// Id of the session row (not the client token).
    pub session_id: Uuid,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub properties: Properties,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event with a generated ID.
    pub fn new(new: NewEvent, session_id: Uuid, client: &ClientInfo, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: new.event_type,
            venue_id: new.venue_id,
            content_id: new.content_id,
            session_id,
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            referrer: client.referrer.clone(),
            properties: new.properties,
            timestamp: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trip_names() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!(matches!(
            "pageview".parse::<EventType>(),
            Err(Error::InvalidEventType(_))
        ));
    }

    #[test]
    fn test_small_properties_kept_intact() {
        let props = Properties::from_value(Some(json!({"filter": "rooftop", "page": 2}))).unwrap();
        assert_eq!(props.get_str("filter"), Some("rooftop"));
        assert_eq!(props.get_i64("page"), Some(2));
        assert!(!props.is_truncated());
    }

    #[test]
    fn test_oversized_properties_truncated_not_rejected() {
        let mut map = Map::new();
        for i in 0..100 {
            map.insert(format!("key_{:03}", i), Value::String("x".repeat(100)));
        }
        let props = Properties::capped(map);

        assert!(props.is_truncated());
        assert!(props.to_json_string().len() <= MAX_PROPERTIES_BYTES);
        // key order is preserved, so the earliest keys survive
        assert!(props.get("key_000").is_some());
        assert!(props.get("key_099").is_none());
    }

    #[test]
    fn test_single_huge_value_dropped() {
        let props = Properties::from_value(Some(json!({
            "a": "small",
            "blob": "y".repeat(10_000),
        })))
        .unwrap();
        assert_eq!(props.get_str("a"), Some("small"));
        assert!(props.get("blob").is_none());
        assert!(props.is_truncated());
    }

    #[test]
    fn test_non_object_properties_rejected() {
        assert!(Properties::from_value(Some(json!([1, 2, 3]))).is_err());
        assert!(Properties::from_value(Some(Value::Null)).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_stored_properties_read_as_empty() {
        assert!(Properties::from_json_str("{not json").is_empty());
    }

    #[test]
    fn test_submission_rejects_unknown_type() {
        let sub = EventSubmission {
            event_type: "teleport".into(),
            venue_id: Some(1),
            content_id: None,
            properties: None,
        };
        let err = sub.into_new_event().unwrap_err();
        assert_eq!(err.error_code(), Some("VALID_001"));
    }

    #[test]
    fn test_submission_rejects_non_positive_ids() {
        let sub = EventSubmission {
            event_type: "venue_view".into(),
            venue_id: Some(0),
            content_id: None,
            properties: None,
        };
        assert!(sub.into_new_event().is_err());
    }

    #[test]
    fn test_share_requires_entity_and_keeps_platform() {
        let share = ShareSubmission {
            venue_id: None,
            content_id: None,
            platform: Some("twitter".into()),
        };
        assert!(share.into_new_event().is_err());

        let share = ShareSubmission {
            venue_id: Some(7),
            content_id: None,
            platform: Some(" twitter ".into()),
        };
        let event = share.into_new_event().unwrap();
        assert_eq!(event.event_type, EventType::Share);
        assert_eq!(event.properties.get_str("platform"), Some("twitter"));
    }

    #[test]
    fn test_client_info_truncates() {
        let ua = "m".repeat(MAX_USER_AGENT_LEN + 50);
        let client = ClientInfo::new(Some("10.0.0.1"), Some(&ua), Some(""));
        assert_eq!(client.user_agent.unwrap().len(), MAX_USER_AGENT_LEN);
        assert_eq!(client.referrer, None);
    }
}
