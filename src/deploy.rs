//! The deployment orchestrator: fetch → build → allocate → start → commit.
//!
//! Operations on one key are mutually exclusive (per-key lock map);
//! different keys deploy fully in parallel. The deployer is the only writer
//! of whole registry records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{Config, CONTAINER_PORT};
use crate::errors::{DeployError, RuntimeError};
use crate::fetch::SourceFetcher;
use crate::image;
use crate::ports::PortAllocator;
use crate::registry::{AppKey, AppStatus, DeploymentRecord, Registry};
use crate::runtime::{ContainerRuntime, ContainerSpec};

/// One async mutex per key. Entries are created on first use and kept for
/// the process lifetime; the universe of keys is small (one per deployed
/// branch).
struct KeyLocks {
    inner: std::sync::Mutex<HashMap<AppKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn for_key(&self, key: &AppKey) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Environment injected into every app container. The root path lets the
/// served app generate links that survive path-based routing.
fn gradio_env(key: &AppKey) -> Vec<String> {
    vec![
        "GRADIO_SERVER_NAME=0.0.0.0".to_string(),
        format!("GRADIO_SERVER_PORT={}", CONTAINER_PORT),
        format!("GRADIO_ROOT_PATH=/{}", key.repo),
    ]
}

pub struct Deployer {
    registry: Arc<Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    fetcher: SourceFetcher,
    ports: PortAllocator,
    locks: KeyLocks,
}

impl Deployer {
    pub fn new(config: &Config, registry: Arc<Registry>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let fetcher = SourceFetcher::new(
            config.forgejo_url.clone(),
            config.app_dir.clone(),
            config.fetch_timeout_secs,
        );
        let ports = PortAllocator::new(config.port_start, config.port_end);
        Self {
            registry,
            runtime,
            fetcher,
            ports,
            locks: KeyLocks::new(),
        }
    }

    /// Deploy (or redeploy) one key.
    ///
    /// A redeploy tears down the previous container before anything else, so
    /// there is at most one live container per key at every instant. If a
    /// later stage then fails, the stale record is deleted rather than left
    /// pointing at a container that no longer exists — the key ends up
    /// explicitly absent, never silently serving the old version.
    pub async fn deploy(&self, key: &AppKey) -> Result<DeploymentRecord, DeployError> {
        let lock = self.locks.for_key(key);
        let _guard = lock.lock().await;

        info!(%key, "starting deployment");

        let previous = self.registry.get(key).await;
        if previous.is_some() {
            info!(%key, "removing previous container before redeploy");
            self.runtime.remove(&image::container_name(key)).await?;
        }

        match self.run_pipeline(key, previous.as_ref()).await {
            Ok(record) => {
                if let Err(e) = self.registry.insert(record.clone()).await {
                    error!(%key, "failed to persist state: {:#}", e);
                }
                info!(%key, port = record.port, "deployed");
                Ok(record)
            }
            Err(err) => {
                if previous.is_some() {
                    match self.registry.remove(key).await {
                        Ok(Some(_)) => warn!(
                            %key,
                            "deploy failed after previous deployment was removed; key is now absent: {}",
                            err
                        ),
                        Ok(None) => {}
                        Err(e) => error!(%key, "failed to persist state: {:#}", e),
                    }
                } else {
                    warn!(%key, "deploy failed: {}", err);
                }
                Err(err)
            }
        }
    }

    async fn run_pipeline(
        &self,
        key: &AppKey,
        previous: Option<&DeploymentRecord>,
    ) -> Result<DeploymentRecord, DeployError> {
        let workspace = self.fetcher.fetch(key).await?;
        image::verify_workspace(&workspace)?;

        let tag = image::image_name(key);
        self.runtime.build_image(&workspace, &tag).await?;

        // The previous record's port is reusable: its container is already
        // gone by the time we allocate.
        let mut excluded = self.registry.running_ports().await;
        if let Some(prev) = previous {
            excluded.remove(&prev.port);
        }
        let port = self.ports.allocate(&excluded).await?;

        let name = image::container_name(key);
        // Leftover from a crashed process would collide on the name.
        self.runtime.remove(&name).await?;

        let spec = ContainerSpec {
            name: name.clone(),
            image: tag,
            host_port: port,
            env: gradio_env(key),
        };
        let container_id = self.runtime.start(&spec).await.map_err(|e| match e {
            RuntimeError::Unavailable(_) => DeployError::Runtime(e),
            RuntimeError::Api(message) => DeployError::Start { name, message },
        })?;

        let now = Utc::now();
        Ok(DeploymentRecord {
            port,
            status: AppStatus::Running,
            // Redeploys keep the original creation time.
            created: previous.map(|p| p.created).unwrap_or(now),
            last_updated: now,
            repo_full_name: key.repo.clone(),
            branch: key.branch.clone(),
            container_id: Some(container_id),
        })
    }

    /// Stop one key: force-remove its container and delete the record.
    /// Idempotent — stopping an unknown key is a no-op success. Returns
    /// whether a deployment was actually removed.
    pub async fn stop(&self, key: &AppKey) -> Result<bool, DeployError> {
        let lock = self.locks.for_key(key);
        let _guard = lock.lock().await;

        if self.registry.get(key).await.is_none() {
            return Ok(false);
        }

        self.runtime.remove(&image::container_name(key)).await?;
        if let Err(e) = self.registry.remove(key).await {
            error!(%key, "failed to persist state: {:#}", e);
        }
        info!(%key, "stopped");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_one_lock() {
        let locks = KeyLocks::new();
        let a = locks.for_key(&AppKey::new("acme/demo", "main"));
        let b = locks.for_key(&AppKey::new("acme/demo", "main"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_keys_get_independent_locks() {
        let locks = KeyLocks::new();
        let a = locks.for_key(&AppKey::new("acme/demo", "main"));
        let b = locks.for_key(&AppKey::new("acme/demo", "dev"));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn container_env_carries_root_path_for_the_repo() {
        let env = gradio_env(&AppKey::new("acme/demo", "main"));
        assert!(env.contains(&"GRADIO_ROOT_PATH=/acme/demo".to_string()));
        assert!(env.contains(&"GRADIO_SERVER_PORT=7860".to_string()));
        assert!(env.contains(&"GRADIO_SERVER_NAME=0.0.0.0".to_string()));
    }
}
