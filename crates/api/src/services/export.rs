//! CSV exports.
//!
//! A request is validated and counted before any bytes are produced. Rows
//! are then streamed through a bounded channel so at most a few encoded
//! lines sit in memory; the producer stops as soon as the client goes away.

use std::io;

use analytics_core::{ExportRequest, Result, ValidatedExport};
use analytics_store::{csv_line, SqliteStore};
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use telemetry::metrics;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Encoded lines buffered between the query and the response body.
const EXPORT_CHANNEL_CAPACITY: usize = 64;

/// A validated export with its row budget settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PreparedExport {
    #[serde(skip)]
    pub export: ValidatedExport,
    /// Day whose figures are computed live instead of read from rollups.
    #[serde(skip)]
    pub today: NaiveDate,
    pub matching_rows: u64,
    pub row_limit: u64,
    pub truncated: bool,
}

impl PreparedExport {
    pub fn filename(&self) -> String {
        self.export.filename()
    }

    /// Rows the stream will emit, excluding the header.
    pub fn rows(&self) -> u64 {
        self.matching_rows.min(self.row_limit)
    }
}

#[derive(Clone)]
pub struct ExportService {
    store: SqliteStore,
    max_rows: u64,
}

impl ExportService {
    pub fn new(store: SqliteStore, max_rows: u64) -> Self {
        Self { store, max_rows }
    }

    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    /// Validates `request` and counts matching rows against the cap.
    pub async fn prepare(&self, request: &ExportRequest) -> Result<PreparedExport> {
        self.prepare_at(request, Utc::now().date_naive()).await
    }

    pub async fn prepare_at(&self, request: &ExportRequest, today: NaiveDate) -> Result<PreparedExport> {
        let export = request.validate()?;
        let matching_rows = self.store.count_export_rows(&export, today).await?;
        let truncated = matching_rows > self.max_rows;

        metrics().export_requests.inc();
        if truncated {
            metrics().exports_truncated.inc();
            info!(
                export_type = %export.export_type,
                matching_rows,
                row_limit = self.max_rows,
                "Export truncated to row limit"
            );
        }

        Ok(PreparedExport {
            export,
            today,
            matching_rows,
            row_limit: self.max_rows,
            truncated,
        })
    }

    /// Streams the header line followed by up to `row_limit` CSV records.
    pub fn stream(&self, prepared: PreparedExport) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(EXPORT_CHANNEL_CAPACITY);
        let store = self.store.clone();

        tokio::spawn(async move {
            let export = prepared.export;
            let header = csv_line(export.export_type.columns());
            if tx.send(Ok(Bytes::from(header))).await.is_err() {
                return;
            }

            let mut sent = 0u64;
            let mut rows = store.export_rows(export, prepared.row_limit, prepared.today);
            while let Some(row) = rows.next().await {
                let item = match row {
                    Ok(fields) => Ok(Bytes::from(csv_line(&fields))),
                    Err(e) => {
                        error!(export_type = %export.export_type, error = %e, "Export query failed mid-stream");
                        let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                        return;
                    }
                };
                if tx.send(item).await.is_err() {
                    debug!(export_type = %export.export_type, sent, "Export client disconnected");
                    return;
                }
                sent += 1;
            }
            debug!(export_type = %export.export_type, sent, "Export stream finished");
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::{
        day_bounds, ClientInfo, DailyRollup, DailyStat, EntityKind, Event, EventType, NewEvent,
    };
    use chrono::Duration;
    use futures::TryStreamExt;
    use uuid::Uuid;

    fn request(t: &str, start: &str, end: &str) -> ExportRequest {
        ExportRequest {
            export_type: t.into(),
            start_date: start.into(),
            end_date: end.into(),
        }
    }

    async fn seed_events(store: &SqliteStore, n: i64) {
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let start = day_bounds(day).0;
        for i in 0..n {
            let event = Event::new(
                NewEvent::new(EventType::VenueView).venue(i),
                Uuid::new_v4(),
                &ClientInfo::default(),
                start + Duration::minutes(i),
            );
            store.write_event(&event).await.unwrap();
        }
    }

    async fn body(service: &ExportService, prepared: PreparedExport) -> String {
        let chunks: Vec<Bytes> = service.stream(prepared).try_collect().await.unwrap();
        chunks.iter().map(|c| String::from_utf8_lossy(c).into_owned()).collect()
    }

    #[tokio::test]
    async fn test_export_caps_rows_and_flags_truncation() {
        let store = SqliteStore::in_memory().await.unwrap();
        seed_events(&store, 5).await;
        let service = ExportService::new(store, 3);

        let prepared = service
            .prepare(&request("events", "2024-03-10", "2024-03-10"))
            .await
            .unwrap();
        assert_eq!(prepared.matching_rows, 5);
        assert!(prepared.truncated);
        assert_eq!(prepared.rows(), 3);
        assert_eq!(prepared.filename(), "analytics_events_2024-03-10_2024-03-10.csv");

        let csv = body(&service, prepared).await;
        let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("id,event_type,venue_id"));
    }

    /// A range ending today lists the closed days from rollups and today's
    /// activity computed from raw events.
    #[tokio::test]
    async fn test_venue_export_includes_today() {
        let store = SqliteStore::in_memory().await.unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        seed_events(&store, 2).await;
        store
            .write_rollup(&DailyRollup {
                kind: EntityKind::Venue,
                entity_id: 1,
                venue_id: Some(1),
                date: today - Duration::days(1),
                stats: DailyStat {
                    views: 1,
                    unique_visitors: 1,
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        for _ in 0..2 {
            let event = Event::new(
                NewEvent::new(EventType::VenueView).venue(5),
                Uuid::new_v4(),
                &ClientInfo::default(),
                day_bounds(today).0 + Duration::hours(2),
            );
            store.write_event(&event).await.unwrap();
        }
        let service = ExportService::new(store, 100);

        let prepared = service
            .prepare_at(&request("venues", "2024-03-01", "2024-03-11"), today)
            .await
            .unwrap();
        assert_eq!(prepared.matching_rows, 2);
        let csv = body(&service, prepared).await;
        assert_eq!(
            csv,
            "venue_id,date,views,unique_visitors,content_views,shares,favorites\r\n\
             1,2024-03-10,1,1,0,0,0\r\n\
             5,2024-03-11,2,2,0,0,0\r\n"
        );
    }

    #[tokio::test]
    async fn test_empty_range_yields_header_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        let service = ExportService::new(store, 100);

        let prepared = service
            .prepare(&request("sessions", "2024-01-01", "2024-01-02"))
            .await
            .unwrap();
        assert!(!prepared.truncated);
        let csv = body(&service, prepared).await;
        assert_eq!(
            csv,
            "id,session_token,ip,user_agent,referrer,start_time,last_activity,page_view_count,duration_ms\r\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_request_does_no_work() {
        let store = SqliteStore::in_memory().await.unwrap();
        let service = ExportService::new(store, 100);

        let err = service
            .prepare(&request("venues", "2024-02-01", "2024-01-01"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), Some("VALID_002"));
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_producer() {
        let store = SqliteStore::in_memory().await.unwrap();
        seed_events(&store, 200).await;
        let service = ExportService::new(store.clone(), 1000);

        let prepared = service
            .prepare(&request("events", "2024-03-10", "2024-03-10"))
            .await
            .unwrap();
        let mut stream = Box::pin(service.stream(prepared));
        assert!(stream.next().await.is_some());
        drop(stream);

        // the connection is released once the producer notices the drop
        let since = day_bounds(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()).0;
        let count = tokio::time::timeout(std::time::Duration::from_secs(5), store.count_events_since(since))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 200);
    }
}
