//! Venue/content catalog collaborator.
//!
//! The catalog owns venue and content records. Analytics only asks whether
//! an id exists, what it is called, and which venue a content item belongs to.

use std::collections::HashMap;
use std::time::Duration;

use analytics_core::{EntityKind, EntityRef, Error, Result};
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CATALOG_CACHE_TTL: Duration = Duration::from_secs(60);
const CATALOG_CACHE_MAX_CAPACITY: u64 = 50_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Owning venue, for content items.
    #[serde(default)]
    pub venue_id: Option<i64>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// `Ok(None)` when the entity does not exist.
    async fn lookup(&self, entity: EntityRef) -> Result<Option<CatalogEntry>>;
}

/// Catalog served over HTTP at `{base_url}/venues/{id}` and `{base_url}/content/{id}`.
#[derive(Clone)]
pub struct HttpCatalog {
    base_url: String,
    http_client: reqwest::Client,
    cache: Cache<EntityRef, Option<CatalogEntry>>,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| Error::internal(format!("Failed to create catalog HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            cache: Cache::builder()
                .max_capacity(CATALOG_CACHE_MAX_CAPACITY)
                .time_to_live(CATALOG_CACHE_TTL)
                .build(),
        })
    }

    fn url(&self, entity: EntityRef) -> String {
        let collection = match entity.kind {
            EntityKind::Venue => "venues",
            EntityKind::Content => "content",
        };
        format!("{}/{}/{}", self.base_url, collection, entity.id)
    }

    async fn fetch(&self, entity: EntityRef) -> Result<Option<CatalogEntry>> {
        let url = self.url(entity);
        debug!(url = %url, "Calling catalog");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            warn!(error = %e, "Catalog request failed");
            Error::internal(format!("Catalog unavailable: {e}"))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let entry: CatalogEntry = response.json().await.map_err(|e| {
                    warn!(error = %e, "Failed to parse catalog response");
                    Error::internal(format!("Invalid catalog response: {e}"))
                })?;
                Ok(Some(entry))
            }
            status => Err(Error::internal(format!("Catalog returned {status}"))),
        }
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn lookup(&self, entity: EntityRef) -> Result<Option<CatalogEntry>> {
        if let Some(cached) = self.cache.get(&entity).await {
            return Ok(cached);
        }
        // errors are not cached so the next request retries
        let entry = self.fetch(entity).await?;
        self.cache.insert(entity, entry.clone()).await;
        Ok(entry)
    }
}

/// Fixed in-memory catalog for development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<EntityRef, CatalogEntry>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn venue(mut self, id: i64, name: &str) -> Self {
        self.entries.insert(
            EntityRef::venue(id),
            CatalogEntry {
                id,
                name: Some(name.to_string()),
                venue_id: None,
            },
        );
        self
    }

    pub fn content(mut self, id: i64, name: &str, venue_id: i64) -> Self {
        self.entries.insert(
            EntityRef::content(id),
            CatalogEntry {
                id,
                name: Some(name.to_string()),
                venue_id: Some(venue_id),
            },
        );
        self
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn lookup(&self, entity: EntityRef) -> Result<Option<CatalogEntry>> {
        Ok(self.entries.get(&entity).cloned())
    }
}
