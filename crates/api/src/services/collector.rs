//! Event collector for the public tracking surface.
//!
//! Validation happens before any write and is reported to the caller. One
//! collector timeout bounds the catalog lookups and the write together: on
//! timeout or storage failure the event is dropped, logged and counted, and
//! the caller still gets a successful (`tracked: false`) response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use analytics_core::{
    AnalyticsConfig, ClientInfo, EntityRef, Error, Event, EventType, NewEvent, Properties,
    ReferentialPolicy, Result, SearchRecord, SearchSubmission, SessionToken, SessionTouch,
    ValidationErrorCode,
};
use analytics_store::AnalyticsWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use telemetry::metrics;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use crate::catalog::{Catalog, CatalogEntry};
use crate::services::sessions::SessionTracker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectOutcome {
    pub tracked: bool,
    pub session_id: Option<Uuid>,
    pub session_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_reason: Option<String>,
}

impl CollectOutcome {
    fn tracked(token: &SessionToken, touch: SessionTouch) -> Self {
        Self {
            tracked: true,
            session_id: Some(touch.session_id),
            session_token: token.as_str().to_string(),
            dropped_reason: None,
        }
    }

    fn dropped(token: &SessionToken, reason: impl Into<String>) -> Self {
        Self {
            tracked: false,
            session_id: None,
            session_token: token.as_str().to_string(),
            dropped_reason: Some(reason.into()),
        }
    }
}

#[derive(Clone)]
pub struct EventCollector {
    writer: Arc<dyn AnalyticsWriter>,
    sessions: SessionTracker,
    catalog: Option<Arc<dyn Catalog>>,
    policy: ReferentialPolicy,
    timeout: Duration,
}

impl EventCollector {
    pub fn new(
        writer: Arc<dyn AnalyticsWriter>,
        sessions: SessionTracker,
        catalog: Option<Arc<dyn Catalog>>,
        config: &AnalyticsConfig,
    ) -> Self {
        Self {
            writer,
            sessions,
            catalog,
            policy: config.referential_policy,
            timeout: config.collector_timeout(),
        }
    }

    /// Records one event for the session behind `token`.
    pub async fn collect(
        &self,
        event: NewEvent,
        client: &ClientInfo,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<CollectOutcome> {
        metrics().events_received.inc();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;

        let event = match self.resolve(event, deadline).await {
            Ok(event) => event,
            Err(e) => {
                metrics().events_rejected_validation.inc();
                return Err(e);
            }
        };
        let event_type = event.event_type;

        let write = async {
            let touch = self.sessions.touch(token, client, now).await?;
            let event = Event::new(event, touch.session_id, client, now);
            self.writer.insert_event(&event).await?;
            Ok::<_, Error>(touch)
        };
        let result = tokio::time::timeout_at(deadline, write).await;
        metrics().collector_latency_ms.observe_duration(started.elapsed());

        Ok(self.finish(token, event_type, result))
    }

    /// Records a search and a `search` event extending the session.
    ///
    /// A blank term is ignored rather than rejected.
    pub async fn collect_search(
        &self,
        submission: SearchSubmission,
        client: &ClientInfo,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<CollectOutcome> {
        metrics().events_received.inc();
        if let Err(e) = submission.validate() {
            metrics().events_rejected_validation.inc();
            return Err(Error::validation(e.to_string()));
        }

        let Some(record) = SearchRecord::new(
            &submission.search_term,
            submission.search_type.as_deref(),
            submission.results_count,
            now,
        ) else {
            debug!("Ignoring empty search term");
            return Ok(CollectOutcome::dropped(token, "empty search term"));
        };

        let mut properties = Properties::new().with("search_term", record.search_term.clone());
        if let Some(search_type) = &record.search_type {
            properties = properties.with("search_type", search_type.clone());
        }
        if let Some(count) = record.results_count {
            properties = properties.with("results_count", count);
        }

        let started = Instant::now();
        let write = async {
            let touch = self.sessions.touch(token, client, now).await?;
            self.writer.insert_search(&record).await?;
            let event = Event::new(
                NewEvent::new(EventType::Search).properties(properties),
                touch.session_id,
                client,
                now,
            );
            self.writer.insert_event(&event).await?;
            Ok::<_, Error>(touch)
        };
        let result = tokio::time::timeout(self.timeout, write).await;
        metrics().collector_latency_ms.observe_duration(started.elapsed());

        let outcome = self.finish(token, EventType::Search, result);
        if outcome.tracked {
            metrics().searches_tracked.inc();
        }
        Ok(outcome)
    }

    fn finish(
        &self,
        token: &SessionToken,
        event_type: EventType,
        result: std::result::Result<Result<SessionTouch>, tokio::time::error::Elapsed>,
    ) -> CollectOutcome {
        match result {
            Ok(Ok(touch)) => {
                metrics().events_tracked.inc();
                CollectOutcome::tracked(token, touch)
            }
            Ok(Err(e)) => {
                metrics().events_dropped.inc();
                warn!(event_type = %event_type, error = %e, "Dropped analytics event: storage failure");
                CollectOutcome::dropped(token, format!("storage failure: {e}"))
            }
            Err(_) => {
                metrics().events_dropped.inc();
                warn!(
                    event_type = %event_type,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Dropped analytics event: write timed out"
                );
                CollectOutcome::dropped(token, "storage timeout")
            }
        }
    }

    /// Fills in the venue of a content event and applies the referential
    /// policy. Catalog failures fail open.
    async fn resolve(&self, mut event: NewEvent, deadline: tokio::time::Instant) -> Result<NewEvent> {
        let Some(catalog) = &self.catalog else {
            return Ok(event);
        };

        if let Some(content_id) = event.content_id {
            let needs_lookup = event.venue_id.is_none() || self.policy == ReferentialPolicy::Reject;
            if needs_lookup {
                match self.lookup(catalog.as_ref(), EntityRef::content(content_id), deadline).await {
                    Some(Some(entry)) => {
                        if event.venue_id.is_none() {
                            event.venue_id = entry.venue_id;
                        }
                    }
                    Some(None) if self.policy == ReferentialPolicy::Reject => {
                        return Err(unknown_entity(EntityRef::content(content_id)));
                    }
                    _ => {}
                }
            }
        }

        if self.policy == ReferentialPolicy::Reject {
            if let Some(venue_id) = event.venue_id {
                let venue = EntityRef::venue(venue_id);
                if let Some(None) = self.lookup(catalog.as_ref(), venue, deadline).await {
                    return Err(unknown_entity(venue));
                }
            }
        }

        Ok(event)
    }

    /// `None` when the catalog could not answer before `deadline`.
    async fn lookup(
        &self,
        catalog: &dyn Catalog,
        entity: EntityRef,
        deadline: tokio::time::Instant,
    ) -> Option<Option<CatalogEntry>> {
        match tokio::time::timeout_at(deadline, catalog.lookup(entity)).await {
            Ok(Ok(entry)) => Some(entry),
            Ok(Err(e)) => {
                warn!(%entity, error = %e, "Catalog lookup failed, accepting event");
                None
            }
            Err(_) => {
                warn!(%entity, "Catalog lookup timed out, accepting event");
                None
            }
        }
    }
}

fn unknown_entity(entity: EntityRef) -> Error {
    Error::validation_code(
        ValidationErrorCode::InvalidPayload,
        format!("{} {} does not exist", entity.kind, entity.id),
    )
}
