//! Request extractors.

use analytics_core::{
    actions, extract_admin_token, AdminIdentity, AuditEntry, AuditOutcome, ClientInfo,
    RateLimitErrorCode, SessionToken,
};
use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use serde_json::json;
use telemetry::metrics;
use tracing::{debug, warn};

use crate::middleware::rate_limit::UNKNOWN_CLIENT;
use crate::response::ApiError;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "X-Session-ID";
pub const SESSION_COOKIE: &str = "session_id";

/// Client IP address.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    /// Key for per-client rate limiting.
    pub fn key(&self) -> &str {
        self.0.as_deref().unwrap_or(UNKNOWN_CLIENT)
    }
}

fn forwarded_ip(parts: &Parts) -> Option<String> {
    // first hop of X-Forwarded-For, then X-Real-IP
    if let Some(xff) = parts.headers.get("X-Forwarded-For") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(ip) = xff_str.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()) {
                return Some(ip.to_string());
            }
        }
    }

    parts
        .headers
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Resolves the caller's address.
///
/// Forwarding headers are client-controlled, so they are read only when
/// `trust_forwarded` is set. Otherwise the peer address of the connection is
/// used, and `None` when the server was not started with connect info.
pub fn resolve_client_ip(parts: &Parts, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded {
        if let Some(ip) = forwarded_ip(parts) {
            return Some(ip);
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(resolve_client_ip(parts, state.trust_forwarded_headers)))
    }
}

/// Request-derived client attributes, truncated to their column limits.
#[derive(Debug, Clone)]
pub struct Client(pub ClientInfo);

#[async_trait]
impl FromRequestParts<AppState> for Client {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ip = resolve_client_ip(parts, state.trust_forwarded_headers);
        let header_str = |name: header::HeaderName| {
            parts.headers.get(name).and_then(|h| h.to_str().ok())
        };
        Ok(Client(ClientInfo::new(
            ip.as_deref(),
            header_str(header::USER_AGENT),
            header_str(header::REFERER),
        )))
    }
}

fn cookie_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

/// The caller's session token: `X-Session-ID`, then the `session_id`
/// cookie, else a freshly minted token.
#[derive(Debug, Clone)]
pub struct RequestSession(pub SessionToken);

#[async_trait]
impl<S> FromRequestParts<S> for RequestSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(SessionToken::parse);

        let token = from_header
            .or_else(|| cookie_value(parts, SESSION_COOKIE).and_then(SessionToken::parse))
            .unwrap_or_else(SessionToken::generate);

        Ok(RequestSession(token))
    }
}

/// Verified admin caller.
///
/// Failed attempts are charged to the admin-auth limiter for the client IP,
/// counted, and written to the audit log with outcome `denied`.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub identity: AdminIdentity,
    pub ip: Option<String>,
}

impl AdminContext {
    pub fn actor(&self) -> &str {
        &self.identity.username
    }

    /// Starts an audit entry for an action by this admin.
    pub fn audit(&self, action: &str) -> AuditEntry {
        AuditEntry::new(self.actor(), action, Utc::now()).ip(self.ip.clone())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ip = ClientIp(resolve_client_ip(parts, state.trust_forwarded_headers));
        let path = parts.uri.path().to_string();

        let decision = state.admin_rate_limiter.peek(ip.key());
        if !decision.is_allowed() {
            metrics().rate_limited_requests.inc();
            debug!(ip = ip.key(), "Admin authentication rate limited");
            return Err(ApiError::rate_limited(
                RateLimitErrorCode::AuthExceeded,
                decision.retry_after_secs(),
            ));
        }

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let verified = match extract_admin_token(auth_header) {
            Ok(token) => match state.auth_client.validate(&token).await {
                Ok(response) => response.identity(),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match verified {
            Ok(identity) => Ok(AdminContext {
                identity,
                ip: ip.0,
            }),
            Err(e) => {
                metrics().auth_failures.inc();
                state.admin_rate_limiter.check(ip.key());
                warn!(ip = ip.key(), path = %path, error = %e, "Admin authentication failed");
                state
                    .audit(
                        AuditEntry::new(analytics_core::ANONYMOUS_ACTOR, actions::ADMIN_AUTH, Utc::now())
                            .target(path)
                            .details(json!({ "reason": e.to_string() }))
                            .ip(ip.0.clone())
                            .outcome(AuditOutcome::Denied),
                    )
                    .await;
                Err(e.into())
            }
        }
    }
}
