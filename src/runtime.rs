//! Container runtime seam.
//!
//! `ContainerRuntime` abstracts the control plane for testability; the real
//! implementation talks to the local Docker socket via bollard. All lookups
//! go by deterministic container name, so leftovers from a crashed process
//! and containers that outlived a restart are both reachable.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::models::{
    ContainerCreateBody, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, InspectContainerOptions,
    RemoveContainerOptionsBuilder, StartContainerOptions,
};
use bollard::Docker;
use futures_util::TryStreamExt;
use tracing::{debug, info};

use crate::config::CONTAINER_PORT;
use crate::errors::{BuildError, RuntimeError};
use crate::image;

/// Observed container state, as the runtime reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Missing,
}

/// What the runtime reports for a named container.
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub state: ContainerState,
    /// Live handle, present unless the container is missing.
    pub id: Option<String>,
}

/// Everything needed to create and start one app container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host port bound to the fixed in-container service port.
    pub host_port: u16,
    pub env: Vec<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build (or overwrite) the tagged image from a workspace directory.
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), BuildError>;

    /// Create and start a container; returns the runtime's container id.
    async fn start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Force-remove a container by name. Removing one that is already gone
    /// is success, not an error.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// Look up a container by name.
    async fn inspect(&self, name: &str) -> Result<ContainerStatus, RuntimeError>;
}

// ── Docker implementation ─────────────────────────────────────────────

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn map_err(e: bollard::errors::Error) -> RuntimeError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api(format!("{}: {}", status_code, message)),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), BuildError> {
        let archive = image::tar_context(context_dir)?;
        info!(%tag, "building image");

        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(tag)
            .rm(true)
            .forcerm(true)
            .build();

        let mut stream = self.docker.build_image(
            options,
            None,
            Some(bollard::body_full(bytes::Bytes::from(archive))),
        );

        let mut captured = String::new();
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| BuildError::Runtime(map_err(e)))?
        {
            if let Some(line) = chunk.stream {
                captured.push_str(&line);
            }
            if let Some(error) = chunk.error {
                return Err(BuildError::BuildFailed {
                    image: tag.to_string(),
                    message: format!("{}\n{}", error, captured.trim()),
                });
            }
        }

        info!(%tag, "build successful");
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let bindings = HashMap::from([(
            format!("{}/tcp", CONTAINER_PORT),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        )]);
        let host_config = HostConfig {
            port_bindings: Some(bindings),
            // Transient crashes recover without orchestrator involvement.
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();
        let created = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(map_err)?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .map_err(map_err)?;

        info!(name = %spec.name, port = spec.host_port, "container started");
        Ok(created.id)
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => {
                debug!(%name, "container removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerStatus, RuntimeError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => {
                let running = details
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                Ok(ContainerStatus {
                    state: if running {
                        ContainerState::Running
                    } else {
                        ContainerState::Stopped
                    },
                    id: details.id,
                })
            }
            Err(e) if is_not_found(&e) => Ok(ContainerStatus {
                state: ContainerState::Missing,
                id: None,
            }),
            Err(e) => Err(map_err(e)),
        }
    }
}
