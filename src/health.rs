//! Health reconciliation: re-derive observed status from the runtime.
//!
//! Lookups go by deterministic container name, which is also how records
//! seeded from the snapshot regain a live handle after a restart. Writes
//! only `status` — never ports or timestamps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::image;
use crate::registry::{AppStatus, Registry};
use crate::runtime::{ContainerRuntime, ContainerState};

/// The health summary served by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total_apps: usize,
    pub healthy_apps: usize,
    pub timestamp: DateTime<Utc>,
    pub port_range: String,
}

pub struct Reconciler {
    registry: Arc<Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    port_range: String,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        runtime: Arc<dyn ContainerRuntime>,
        port_range: String,
    ) -> Self {
        Self {
            registry,
            runtime,
            port_range,
        }
    }

    /// Refresh every record's observed status and summarize.
    ///
    /// Runtime-running maps to `running`; stopped, crash-looped, or missing
    /// to `stopped`; a failed lookup to `error`. Safe to run on demand or on
    /// an interval, concurrently with deploys.
    pub async fn reconcile(&self) -> HealthSummary {
        let records = self.registry.list().await;
        let total_apps = records.len();
        let mut healthy_apps = 0;

        for record in records.values() {
            let key = record.key();
            let name = image::container_name(&key);
            match self.runtime.inspect(&name).await {
                Ok(status) if status.state == ContainerState::Running => {
                    healthy_apps += 1;
                    self.registry.set_status(&key, AppStatus::Running).await;
                    self.registry.set_container_id(&key, status.id).await;
                }
                Ok(_) => {
                    self.registry.set_status(&key, AppStatus::Stopped).await;
                    self.registry.set_container_id(&key, None).await;
                }
                Err(e) => {
                    warn!(%key, "health check failed: {}", e);
                    self.registry.set_status(&key, AppStatus::Error).await;
                }
            }
        }

        HealthSummary {
            total_apps,
            healthy_apps,
            timestamp: Utc::now(),
            port_range: self.port_range.clone(),
        }
    }
}
