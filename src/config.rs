//! Service configuration.
//!
//! Layered: built-in defaults → environment variables → CLI flags (applied
//! by `main.rs`). The environment variable names match what the service has
//! always used in its compose files (`FORGEJO_URL`, `GRADIO_PORT_START`,
//! `GRADIO_PORT_END`).

use std::path::PathBuf;

use anyhow::{bail, Result};

/// Fixed service port inside every deployed container. Gradio's default.
pub const CONTAINER_PORT: u16 = 7860;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Forgejo instance; clone URLs are `{url}/{repo}.git`.
    pub forgejo_url: String,
    /// Inclusive band of host ports eligible for allocation.
    pub port_start: u16,
    pub port_end: u16,
    /// Directory for per-(repo, branch) clone workspaces.
    pub app_dir: PathBuf,
    /// Durable registry snapshot.
    pub state_file: PathBuf,
    /// Address the proxy uses to reach container-bound ports.
    pub backend_host: String,
    /// HTTP listen port of this service.
    pub listen_port: u16,
    pub fetch_timeout_secs: u64,
    pub proxy_timeout_secs: u64,
    /// Seconds between background reconcile passes.
    pub reconcile_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forgejo_url: "http://server:3000".to_string(),
            port_start: 9100,
            port_end: 9150,
            app_dir: PathBuf::from("/tmp/gradio-apps"),
            state_file: PathBuf::from("/data/apps_state.json"),
            backend_host: "127.0.0.1".to_string(),
            listen_port: 8081,
            fetch_timeout_secs: 60,
            proxy_timeout_secs: 30,
            reconcile_interval_secs: 60,
        }
    }
}

impl Config {
    /// Defaults overridden by whatever environment variables are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("FORGEJO_URL") {
            config.forgejo_url = url.trim_end_matches('/').to_string();
        }
        if let Some(port) = parse_env_port("GRADIO_PORT_START")? {
            config.port_start = port;
        }
        if let Some(port) = parse_env_port("GRADIO_PORT_END")? {
            config.port_end = port;
        }
        if let Ok(dir) = std::env::var("GRADIO_APP_DIR") {
            config.app_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("GRADIO_STATE_FILE") {
            config.state_file = PathBuf::from(path);
        }
        if let Ok(host) = std::env::var("GRADIO_BACKEND_HOST") {
            config.backend_host = host;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_start > self.port_end {
            bail!(
                "invalid port band: {}-{} (start must not exceed end)",
                self.port_start,
                self.port_end
            );
        }
        Ok(())
    }

    /// The band rendered the way the health summary reports it.
    pub fn port_range(&self) -> String {
        format!("{}-{}", self.port_start, self.port_end)
    }
}

fn parse_env_port(name: &str) -> Result<Option<u16>> {
    match std::env::var(name) {
        Ok(raw) => {
            let port = raw
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("{} must be a port number, got '{}'", name, raw))?;
            Ok(Some(port))
        }
        Err(_) => Ok(None),
    }
}
