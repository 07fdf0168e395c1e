//! Background task scheduler.

use std::sync::Arc;
use std::time::Duration;

use analytics_core::{PerformanceSample, Result};
use analytics_store::{health::check_connection, SqliteStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telemetry::{health, metrics};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::aggregator::Aggregator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_aggregation_interval")]
    pub aggregation_interval_secs: u64,
    #[serde(default = "default_true")]
    pub session_sweep_enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub session_sweep_interval_secs: u64,
    #[serde(default = "default_flush_interval")]
    pub metrics_flush_interval_secs: u64,
}

fn default_aggregation_interval() -> u64 {
    900
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_flush_interval() -> u64 {
    60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            aggregation_interval_secs: default_aggregation_interval(),
            session_sweep_enabled: default_true(),
            session_sweep_interval_secs: default_sweep_interval(),
            metrics_flush_interval_secs: default_flush_interval(),
        }
    }
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct WorkerScheduler {
    config: WorkerConfig,
    store: SqliteStore,
    aggregator: Aggregator<SqliteStore>,
    session_idle: chrono::Duration,
}

impl WorkerScheduler {
    pub fn new(
        config: WorkerConfig,
        store: SqliteStore,
        aggregator: Aggregator<SqliteStore>,
        session_idle: chrono::Duration,
    ) -> Self {
        Self {
            config,
            store,
            aggregator,
            session_idle,
        }
    }

    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_aggregation_loop().await;
        }));

        if self.config.session_sweep_enabled {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                scheduler.run_session_sweep().await;
            }));
        }

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_flush().await;
        }));

        info!(
            aggregation_interval_secs = self.config.aggregation_interval_secs,
            session_sweep = self.config.session_sweep_enabled,
            "Background workers started"
        );
        handles
    }

    async fn run_aggregation_loop(&self) {
        let mut ticker = ticker(self.config.aggregation_interval_secs);
        loop {
            ticker.tick().await;
            let today = Utc::now().date_naive();
            match self.aggregator.run_due(today).await {
                Ok(due) if !due.aggregated.is_empty() || !due.retried.is_empty() => {
                    info!(aggregated = ?due.aggregated, retried = ?due.retried, "Scheduled aggregation pass");
                }
                Ok(_) => debug!("No dates due for aggregation"),
                Err(e) => error!(error = %e, "Scheduled aggregation pass failed"),
            }
        }
    }

    async fn run_session_sweep(&self) {
        let mut ticker = ticker(self.config.session_sweep_interval_secs);
        loop {
            ticker.tick().await;
            match self
                .store
                .sweep_expired_sessions(Utc::now(), self.session_idle)
                .await
            {
                Ok(0) => {}
                Ok(closed) => debug!(closed, "Swept expired sessions"),
                Err(e) => error!(error = %e, "Session sweep failed"),
            }
        }
    }

    async fn run_metrics_flush(&self) {
        let mut ticker = ticker(self.config.metrics_flush_interval_secs);
        loop {
            ticker.tick().await;

            if check_connection(&self.store).await {
                health().store.set_healthy();
            } else {
                health().store.set_unhealthy("SQLite health check failed");
            }

            if let Err(e) = self.flush_metrics(Utc::now()).await {
                error!(error = %e, "Failed to flush metrics");
            }
        }
    }

    /// Writes the current metrics snapshot as `internal.*` samples.
    pub async fn flush_metrics(&self, now: DateTime<Utc>) -> Result<usize> {
        let samples = metrics().snapshot_at(now).samples();
        let count = samples.len();
        for (name, value) in samples {
            self.store
                .write_sample(&PerformanceSample::new(&name, value, now))
                .await?;
        }
        Ok(count)
    }
}
