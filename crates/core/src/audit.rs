//! Admin audit log records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Audit action names.
pub mod actions {
    pub const VIEW_GLOBAL: &str = "view_global_analytics";
    pub const VIEW_VENUE: &str = "view_venue_analytics";
    pub const VIEW_CONTENT: &str = "view_content_analytics";
    pub const VIEW_PERFORMANCE: &str = "view_performance";
    pub const VIEW_REALTIME: &str = "view_realtime";
    pub const VIEW_AGGREGATION: &str = "view_aggregation_status";
    pub const VIEW_AUDIT: &str = "view_audit_log";
    pub const EXPORT: &str = "export_data";
    pub const RUN_AGGREGATION: &str = "run_aggregation";
    pub const PURGE_RETENTION: &str = "purge_retention";
    pub const ADMIN_AUTH: &str = "admin_auth";
}

/// Actor recorded when no identity could be established.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Denied,
    Invalid,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "denied" => Ok(Self::Denied),
            "invalid" => Ok(Self::Invalid),
            "error" => Ok(Self::Error),
            other => Err(Error::internal(format!("unknown audit outcome: {other}"))),
        }
    }
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub target: Option<String>,
    pub details: Value,
    pub ip: Option<String>,
    pub outcome: AuditOutcome,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: &str, at: DateTime<Utc>) -> Self {
        Self {
            actor: actor.into(),
            action: action.to_string(),
            target: None,
            details: Value::Null,
            ip: None,
            outcome: AuditOutcome::Success,
            created_at: at,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Stored audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: AuditEntry,
}
