//! Error types for the deployment pipeline, one enum per subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Source fetching failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("clone of {repo}@{branch} timed out after {seconds}s")]
    Timeout {
        repo: String,
        branch: String,
        seconds: u64,
    },

    #[error("clone of {repo}@{branch} failed: {stderr}")]
    CloneFailed {
        repo: String,
        branch: String,
        stderr: String,
    },

    #[error("failed to prepare workspace at {path}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn git")]
    Spawn(#[source] std::io::Error),
}

/// Image build failures, including the preflight on required files.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("repository is missing required file '{file}'")]
    MissingFile { file: String },

    #[error("failed to assemble build context")]
    Context(#[source] std::io::Error),

    #[error("build of image '{image}' failed: {message}")]
    BuildFailed { image: String, message: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Container runtime failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("container runtime API error: {0}")]
    Api(String),
}

/// Top-level deployment failures, composed from the stage errors.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("no free port in band {start}-{end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("failed to start container '{name}': {message}")]
    Start { name: String, message: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_carry_the_key() {
        let err = FetchError::Timeout {
            repo: "acme/demo".into(),
            branch: "main".into(),
            seconds: 60,
        };
        let msg = err.to_string();
        assert!(msg.contains("acme/demo"));
        assert!(msg.contains("60s"));
    }

    #[test]
    fn missing_file_error_names_the_file() {
        let err = BuildError::MissingFile {
            file: "app.py".into(),
        };
        assert!(err.to_string().contains("app.py"));
    }

    #[test]
    fn stage_errors_convert_into_deploy_error() {
        let fetch: DeployError = FetchError::Spawn(std::io::Error::other("gone")).into();
        assert!(matches!(fetch, DeployError::Fetch(_)));

        let build: DeployError = BuildError::MissingFile {
            file: "Dockerfile".into(),
        }
        .into();
        assert!(matches!(build, DeployError::Build(_)));

        let runtime: DeployError = RuntimeError::Unavailable("no socket".into()).into();
        assert!(matches!(runtime, DeployError::Runtime(_)));
    }

    #[test]
    fn runtime_error_flows_through_build_error() {
        let err: BuildError = RuntimeError::Api("500: boom".into()).into();
        assert!(matches!(err, BuildError::Runtime(RuntimeError::Api(_))));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn port_exhaustion_reports_the_band() {
        let err = DeployError::PortExhausted {
            start: 9100,
            end: 9150,
        };
        assert_eq!(err.to_string(), "no free port in band 9100-9150");
    }
}
