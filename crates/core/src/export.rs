//! Bulk export request types.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result, ValidationErrorCode};
use crate::stats::StatWindow;

/// Date format accepted by export requests.
pub const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Dataset to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Venues,
    Content,
    Events,
    Sessions,
}

impl ExportType {
    pub const ALL: [ExportType; 4] = [Self::Venues, Self::Content, Self::Events, Self::Sessions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Venues => "venues",
            Self::Content => "content",
            Self::Events => "events",
            Self::Sessions => "sessions",
        }
    }

    /// CSV header row for this dataset.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Venues => &[
                "venue_id",
                "date",
                "views",
                "unique_visitors",
                "content_views",
                "shares",
                "favorites",
            ],
            Self::Content => &[
                "content_id",
                "venue_id",
                "date",
                "views",
                "unique_visitors",
                "content_views",
                "shares",
                "favorites",
            ],
            Self::Events => &[
                "id",
                "event_type",
                "venue_id",
                "content_id",
                "session_id",
                "ip",
                "user_agent",
                "referrer",
                "properties",
                "timestamp",
            ],
            Self::Sessions => &[
                "id",
                "session_token",
                "ip",
                "user_agent",
                "referrer",
                "start_time",
                "last_activity",
                "page_view_count",
                "duration_ms",
            ],
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                Error::validation_code(
                    ValidationErrorCode::InvalidPayload,
                    format!("unknown export_type: {s}"),
                )
            })
    }
}

/// Raw export request body (`POST /analytics/export`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub export_type: String,
    pub start_date: String,
    pub end_date: String,
}

impl ExportRequest {
    /// Checks type and date range. No export work starts unless this succeeds.
    pub fn validate(&self) -> Result<ValidatedExport> {
        let export_type: ExportType = self.export_type.trim().parse()?;
        let start = parse_date("start_date", &self.start_date)?;
        let end = parse_date("end_date", &self.end_date)?;
        Ok(ValidatedExport {
            export_type,
            window: StatWindow::new(start, end)?,
        })
    }

    /// Audit details for a request that may not have validated.
    pub fn audit_details(&self) -> Value {
        json!({
            "export_type": self.export_type,
            "start_date": self.start_date,
            "end_date": self.end_date,
        })
    }
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), EXPORT_DATE_FORMAT)
        .map_err(|_| Error::invalid_date_range(format!("{field} must be YYYY-MM-DD, got {raw:?}")))
}

/// An export request that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedExport {
    pub export_type: ExportType,
    pub window: StatWindow,
}

impl ValidatedExport {
    /// `analytics_<type>_<start>_<end>.csv`
    pub fn filename(&self) -> String {
        format!(
            "analytics_{}_{}_{}.csv",
            self.export_type, self.window.start, self.window.end
        )
    }
}
