//! The authoritative deployment registry and its durable snapshot.
//!
//! One `DeploymentRecord` per `(repository, branch)` key, held in memory and
//! mirrored to a JSON file after every mutating operation. The live container
//! id is process-local: it is never written to disk and is reacquired by
//! reconciliation after a restart, not by replay.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// ── Identity ──────────────────────────────────────────────────────────

/// The `(repository, branch)` pair identifying one deployable app.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub repo: String,
    pub branch: String,
}

impl AppKey {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo, self.branch)
    }
}

// ── Status ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Running,
    Stopped,
    Error,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl FromStr for AppStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

// ── Record ────────────────────────────────────────────────────────────

/// One deployment. The serialized form is exactly the persisted snapshot
/// projection; `container_id` is runtime-owned and deliberately skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub port: u16,
    pub status: AppStatus,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub repo_full_name: String,
    pub branch: String,
    #[serde(skip)]
    pub container_id: Option<String>,
}

impl DeploymentRecord {
    pub fn key(&self) -> AppKey {
        AppKey::new(self.repo_full_name.clone(), self.branch.clone())
    }
}

// ── Registry ──────────────────────────────────────────────────────────

/// In-memory map of deployment records, mirrored to `state_file`.
///
/// The deployer is the sole writer of whole records; the reconciler updates
/// only `status` (and the process-local container id); everything else reads
/// clones and never blocks on deploy locks.
pub struct Registry {
    apps: RwLock<HashMap<AppKey, DeploymentRecord>>,
    state_file: PathBuf,
}

impl Registry {
    pub fn new(state_file: PathBuf) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            state_file,
        }
    }

    /// Seed the registry from the snapshot file. Missing file is an empty
    /// registry, not an error. Returns the number of records loaded.
    pub async fn load(&self) -> Result<usize> {
        if !self.state_file.exists() {
            return Ok(0);
        }
        let raw = std::fs::read_to_string(&self.state_file)
            .with_context(|| format!("failed to read {}", self.state_file.display()))?;
        let saved: BTreeMap<String, DeploymentRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.state_file.display()))?;

        let mut apps = self.apps.write().await;
        apps.clear();
        for record in saved.into_values() {
            apps.insert(record.key(), record);
        }
        Ok(apps.len())
    }

    pub async fn get(&self, key: &AppKey) -> Option<DeploymentRecord> {
        self.apps.read().await.get(key).cloned()
    }

    /// All records, keyed by `"{repo}/{branch}"`, sorted for stable output.
    pub async fn list(&self) -> BTreeMap<String, DeploymentRecord> {
        self.apps
            .read()
            .await
            .values()
            .map(|r| (r.key().to_string(), r.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.apps.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.apps.read().await.is_empty()
    }

    /// Ports held by records currently marked running.
    pub async fn running_ports(&self) -> HashSet<u16> {
        self.apps
            .read()
            .await
            .values()
            .filter(|r| r.status == AppStatus::Running)
            .map(|r| r.port)
            .collect()
    }

    /// Commit a record and persist the snapshot.
    pub async fn insert(&self, record: DeploymentRecord) -> Result<()> {
        let snapshot = {
            let mut apps = self.apps.write().await;
            apps.insert(record.key(), record);
            projection(&apps)
        };
        self.write_snapshot(&snapshot)
    }

    /// Delete a record and persist the snapshot. Returns the removed record.
    pub async fn remove(&self, key: &AppKey) -> Result<Option<DeploymentRecord>> {
        let (removed, snapshot) = {
            let mut apps = self.apps.write().await;
            let removed = apps.remove(key);
            (removed, projection(&apps))
        };
        if removed.is_some() {
            self.write_snapshot(&snapshot)?;
        }
        Ok(removed)
    }

    /// Update the observed status of one record. Touches nothing else:
    /// not the port, not the timestamps. Returns false for unknown keys.
    pub async fn set_status(&self, key: &AppKey, status: AppStatus) -> bool {
        match self.apps.write().await.get_mut(key) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Re-attach a live container handle to a record (reconciliation after
    /// a restart). Process-local state only; nothing is persisted.
    pub async fn set_container_id(&self, key: &AppKey, container_id: Option<String>) {
        if let Some(record) = self.apps.write().await.get_mut(key) {
            record.container_id = container_id;
        }
    }

    /// Persist the current snapshot. `insert`/`remove` do this themselves;
    /// this exists for callers that batch status updates.
    pub async fn save(&self) -> Result<()> {
        let snapshot = projection(&*self.apps.read().await);
        self.write_snapshot(&snapshot)
    }

    // Write-to-temp-then-rename so a crash mid-write never leaves a reader
    // looking at a half-written snapshot.
    fn write_snapshot(&self, snapshot: &BTreeMap<String, DeploymentRecord>) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(snapshot).context("failed to serialize state")?;
        let tmp = self.state_file.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.state_file)
            .with_context(|| format!("failed to replace {}", self.state_file.display()))?;
        Ok(())
    }
}

fn projection(apps: &HashMap<AppKey, DeploymentRecord>) -> BTreeMap<String, DeploymentRecord> {
    apps.values()
        .map(|r| (r.key().to_string(), r.clone()))
        .collect()
}
