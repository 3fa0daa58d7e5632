//! Source fetching: shallow, single-branch clones into isolated workspaces.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::FetchError;
use crate::registry::AppKey;

pub struct SourceFetcher {
    base_url: String,
    app_dir: PathBuf,
    timeout: Duration,
}

impl SourceFetcher {
    pub fn new(base_url: impl Into<String>, app_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            app_dir,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// `{app_dir}/{repo with '/' → '-'}/{branch}` — one workspace per key.
    pub fn workspace_path(&self, key: &AppKey) -> PathBuf {
        self.app_dir
            .join(key.repo.replace('/', "-"))
            .join(&key.branch)
    }

    /// Produce a clean workspace holding a shallow snapshot of the branch.
    ///
    /// Any pre-existing workspace at the path is removed first. On failure
    /// the half-populated workspace is cleaned up best-effort; a workspace
    /// path is only returned for a fully successful clone.
    pub async fn fetch(&self, key: &AppKey) -> Result<PathBuf, FetchError> {
        let dir = self.workspace_path(key);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|source| FetchError::Workspace {
                path: dir.clone(),
                source,
            })?;
            debug!(path = %dir.display(), "removed existing workspace");
        }
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FetchError::Workspace {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let clone_url = format!("{}/{}.git", self.base_url, key.repo);
        info!(%key, url = %clone_url, "cloning");

        let mut cmd = Command::new("git");
        cmd.arg("clone")
            .args(["-b", &key.branch])
            .args(["--depth", "1", "--single-branch"])
            .arg(&clone_url)
            .arg(&dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                self.discard(&dir);
                return Err(FetchError::Timeout {
                    repo: key.repo.clone(),
                    branch: key.branch.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
            Ok(Err(e)) => return Err(FetchError::Spawn(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            self.discard(&dir);
            return Err(FetchError::CloneFailed {
                repo: key.repo.clone(),
                branch: key.branch.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(%key, path = %dir.display(), "clone successful");
        Ok(dir)
    }

    fn discard(&self, dir: &PathBuf) {
        let _ = std::fs::remove_dir_all(dir);
    }
}
