//! Export row streams and CSV encoding.

use analytics_core::{
    from_millis, to_millis, DailyRollup, EntityKind, EntityRef, ExportType, StatWindow,
    ValidatedExport,
};
use chrono::NaiveDate;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::client::SqliteStore;
use crate::error::StoreResult;
use crate::rollup::{date_key, RollupStore};

/// One exported record, already rendered to CSV fields.
pub type ExportRow = Vec<String>;

/// Encodes one CSV record, quoting fields that need it.
pub fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        let field = field.as_ref();
        if field.contains([',', '"', '\n', '\r']) {
            line.push('"');
            line.push_str(&field.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(field);
        }
    }
    line.push_str("\r\n");
    line
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn select_sql(export_type: ExportType) -> &'static str {
    match export_type {
        ExportType::Venues => {
            r#"
            SELECT venue_id, date, views, unique_visitors, content_views, shares, favorites
            FROM daily_venue_stats
            WHERE date >= ?1 AND date <= ?2
            ORDER BY date, venue_id
            LIMIT ?3
            "#
        }
        ExportType::Content => {
            r#"
            SELECT content_id, venue_id, date, views, unique_visitors, content_views, shares, favorites
            FROM daily_content_stats
            WHERE date >= ?1 AND date <= ?2
            ORDER BY date, content_id
            LIMIT ?3
            "#
        }
        ExportType::Events => {
            r#"
            SELECT id, event_type, venue_id, content_id, session_id, ip, user_agent, referrer, properties, timestamp
            FROM events
            WHERE timestamp >= ?1 AND timestamp < ?2
            ORDER BY timestamp, id
            LIMIT ?3
            "#
        }
        ExportType::Sessions => {
            r#"
            SELECT id, session_token, ip, user_agent, referrer, start_time, last_activity, page_view_count, duration_ms
            FROM sessions
            WHERE start_time >= ?1 AND start_time < ?2
            ORDER BY start_time, id
            LIMIT ?3
            "#
        }
    }
}

fn count_sql(export_type: ExportType) -> &'static str {
    match export_type {
        ExportType::Venues => "SELECT COUNT(*) FROM daily_venue_stats WHERE date >= ?1 AND date <= ?2",
        ExportType::Content => "SELECT COUNT(*) FROM daily_content_stats WHERE date >= ?1 AND date <= ?2",
        ExportType::Events => "SELECT COUNT(*) FROM events WHERE timestamp >= ?1 AND timestamp < ?2",
        ExportType::Sessions => "SELECT COUNT(*) FROM sessions WHERE start_time >= ?1 AND start_time < ?2",
    }
}

/// Range parameters: date keys for rollup tables, millis for raw tables.
enum RangeArgs {
    Dates(String, String),
    Millis(i64, i64),
}

fn range_args(export_type: ExportType, window: StatWindow) -> RangeArgs {
    match export_type {
        ExportType::Venues | ExportType::Content => {
            RangeArgs::Dates(date_key(window.start), date_key(window.end))
        }
        ExportType::Events | ExportType::Sessions => {
            let (start, end) = window.bounds();
            RangeArgs::Millis(to_millis(start), to_millis(end))
        }
    }
}

/// Rollup-backed exports and the entity kind they list.
fn rollup_kind(export_type: ExportType) -> Option<EntityKind> {
    match export_type {
        ExportType::Venues => Some(EntityKind::Venue),
        ExportType::Content => Some(EntityKind::Content),
        ExportType::Events | ExportType::Sessions => None,
    }
}

/// Renders a live statistic with the same columns as the stored rollup row.
fn rollup_fields(rollup: &DailyRollup) -> ExportRow {
    let s = &rollup.stats;
    let mut fields = vec![rollup.entity_id.to_string()];
    if rollup.kind == EntityKind::Content {
        fields.push(opt(rollup.venue_id));
    }
    fields.push(date_key(rollup.date));
    fields.extend(
        [s.views, s.unique_visitors, s.content_views, s.shares, s.favorites].map(|n| n.to_string()),
    );
    fields
}

fn render_row(export_type: ExportType, row: &SqliteRow) -> StoreResult<ExportRow> {
    let fields = match export_type {
        ExportType::Venues => vec![
            row.try_get::<i64, _>("venue_id")?.to_string(),
            row.try_get::<String, _>("date")?,
            row.try_get::<i64, _>("views")?.to_string(),
            row.try_get::<i64, _>("unique_visitors")?.to_string(),
            row.try_get::<i64, _>("content_views")?.to_string(),
            row.try_get::<i64, _>("shares")?.to_string(),
            row.try_get::<i64, _>("favorites")?.to_string(),
        ],
        ExportType::Content => vec![
            row.try_get::<i64, _>("content_id")?.to_string(),
            opt(row.try_get::<Option<i64>, _>("venue_id")?),
            row.try_get::<String, _>("date")?,
            row.try_get::<i64, _>("views")?.to_string(),
            row.try_get::<i64, _>("unique_visitors")?.to_string(),
            row.try_get::<i64, _>("content_views")?.to_string(),
            row.try_get::<i64, _>("shares")?.to_string(),
            row.try_get::<i64, _>("favorites")?.to_string(),
        ],
        ExportType::Events => vec![
            row.try_get::<String, _>("id")?,
            row.try_get::<String, _>("event_type")?,
            opt(row.try_get::<Option<i64>, _>("venue_id")?),
            opt(row.try_get::<Option<i64>, _>("content_id")?),
            row.try_get::<String, _>("session_id")?,
            opt(row.try_get::<Option<String>, _>("ip")?),
            opt(row.try_get::<Option<String>, _>("user_agent")?),
            opt(row.try_get::<Option<String>, _>("referrer")?),
            row.try_get::<String, _>("properties")?,
            from_millis(row.try_get("timestamp")?).to_rfc3339(),
        ],
        ExportType::Sessions => vec![
            row.try_get::<String, _>("id")?,
            row.try_get::<String, _>("session_token")?,
            opt(row.try_get::<Option<String>, _>("ip")?),
            opt(row.try_get::<Option<String>, _>("user_agent")?),
            opt(row.try_get::<Option<String>, _>("referrer")?),
            from_millis(row.try_get("start_time")?).to_rfc3339(),
            from_millis(row.try_get("last_activity")?).to_rfc3339(),
            row.try_get::<i64, _>("page_view_count")?.to_string(),
            row.try_get::<i64, _>("duration_ms")?.to_string(),
        ],
    };
    Ok(fields)
}

impl SqliteStore {
    /// Number of rows matching an export, before any cap.
    ///
    /// For rollup exports a range that includes `today` also counts one live
    /// row per entity seen today.
    pub async fn count_export_rows(&self, export: &ValidatedExport, today: NaiveDate) -> StoreResult<u64> {
        let Some(kind) = rollup_kind(export.export_type) else {
            return self.count_rows(export.export_type, export.window).await;
        };

        let mut count = 0;
        if let Some(past) = export.window.before(today) {
            count += self.count_rows(export.export_type, past).await?;
        }
        if export.window.contains(today) {
            count += self.live_entities(kind, today).await?.len() as u64;
        }
        Ok(count)
    }

    async fn count_rows(&self, export_type: ExportType, window: StatWindow) -> StoreResult<u64> {
        let query = sqlx::query_scalar::<_, i64>(count_sql(export_type));
        let query = match range_args(export_type, window) {
            RangeArgs::Dates(start, end) => query.bind(start).bind(end),
            RangeArgs::Millis(start, end) => query.bind(start).bind(end),
        };
        let count = query.fetch_one(self.pool()).await?;
        Ok(count.max(0) as u64)
    }

    async fn live_entities(&self, kind: EntityKind, date: NaiveDate) -> StoreResult<Vec<EntityRef>> {
        let mut entities = RollupStore::day_entities(self, date).await?;
        entities.retain(|entity| entity.kind == kind);
        Ok(entities)
    }

    /// Streams at most `limit` rows of an export.
    ///
    /// Rollup exports list stored rows for closed days, then live rows for
    /// `today` when the range includes it. The stream holds a pooled
    /// connection until it is dropped or exhausted.
    pub fn export_rows(
        &self,
        export: ValidatedExport,
        limit: u64,
        today: NaiveDate,
    ) -> BoxStream<'_, StoreResult<ExportRow>> {
        let Some(kind) = rollup_kind(export.export_type) else {
            return self.fetch_rows(export.export_type, export.window, limit);
        };

        let stored = match export.window.before(today) {
            Some(past) => self.fetch_rows(export.export_type, past, limit),
            None => stream::empty().boxed(),
        };
        let live = if export.window.contains(today) {
            self.live_rows(kind, today)
        } else {
            stream::empty().boxed()
        };
        stored
            .chain(live)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .boxed()
    }

    fn fetch_rows(
        &self,
        export_type: ExportType,
        window: StatWindow,
        limit: u64,
    ) -> BoxStream<'_, StoreResult<ExportRow>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let query = sqlx::query(select_sql(export_type));
        let query = match range_args(export_type, window) {
            RangeArgs::Dates(start, end) => query.bind(start).bind(end),
            RangeArgs::Millis(start, end) => query.bind(start).bind(end),
        };
        query
            .bind(limit)
            .fetch(self.pool())
            .map(move |row| render_row(export_type, &row?))
            .boxed()
    }

    /// Today's statistics per entity, computed the way the aggregator will.
    fn live_rows(&self, kind: EntityKind, date: NaiveDate) -> BoxStream<'_, StoreResult<ExportRow>> {
        stream::once(self.live_entities(kind, date))
            .map_ok(move |entities| {
                stream::iter(entities).then(move |entity| async move {
                    self.compute_day_stat(entity, date)
                        .await
                        .map(|rollup| rollup_fields(&rollup))
                })
            })
            .try_flatten()
            .boxed()
    }
}
