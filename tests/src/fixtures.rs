//! Request payloads and seed data.

use analytics_core::{ClientInfo, Event, EventType, NewEvent};
use analytics_store::SqliteStore;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

/// Matches the admin token format; accepted by the mock auth client.
pub const ADMIN_TOKEN: &str = "test-admin-token-0123456789";

pub fn admin_bearer() -> String {
    format!("Bearer {ADMIN_TOKEN}")
}

pub fn venue_view(venue_id: i64) -> Value {
    json!({ "event_type": "venue_view", "venue_id": venue_id })
}

pub fn content_view(content_id: i64) -> Value {
    json!({ "event_type": "content_view", "content_id": content_id })
}

pub fn search(term: &str) -> Value {
    json!({ "search_term": term, "search_type": "venue", "results_count": 4 })
}

pub fn share_venue(venue_id: i64, platform: &str) -> Value {
    json!({ "venue_id": venue_id, "platform": platform })
}

pub fn favorite_venue(venue_id: i64) -> Value {
    json!({ "venue_id": venue_id })
}

pub fn export_request(export_type: &str, start: &str, end: &str) -> Value {
    json!({ "export_type": export_type, "start_date": start, "end_date": end })
}

/// Writes an event straight to the store, bypassing the collector, so tests
/// can place events on past days.
pub async fn seed_event(
    store: &SqliteStore,
    event_type: EventType,
    venue_id: Option<i64>,
    session_id: Uuid,
    at: DateTime<Utc>,
) -> Event {
    let mut new = NewEvent::new(event_type);
    if let Some(venue_id) = venue_id {
        new = new.venue(venue_id);
    }
    let event = Event::new(new, session_id, &ClientInfo::default(), at);
    store.write_event(&event).await.expect("Failed to seed event");
    event
}
