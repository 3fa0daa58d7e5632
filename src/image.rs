//! Image build preflight, deterministic naming, and build-context assembly.
//!
//! Naming is derived from the key so a rebuild of the same `(repo, branch)`
//! overwrites the same tag instead of accumulating image garbage.

use std::path::Path;

use crate::errors::BuildError;
use crate::registry::AppKey;

/// A deployable workspace must carry the build descriptor, the app entry
/// point, and the dependency manifest.
pub const REQUIRED_FILES: [&str; 3] = ["Dockerfile", "app.py", "requirements.txt"];

/// Fail fast — before any runtime resources are consumed — naming the first
/// missing required file.
pub fn verify_workspace(workspace: &Path) -> Result<(), BuildError> {
    for file in REQUIRED_FILES {
        if !workspace.join(file).exists() {
            return Err(BuildError::MissingFile {
                file: file.to_string(),
            });
        }
    }
    Ok(())
}

/// Image tag for a key. Lowercased because Docker requires it.
pub fn image_name(key: &AppKey) -> String {
    format!(
        "gradio-{}-{}",
        key.repo.replace('/', "-").to_lowercase(),
        key.branch.to_lowercase()
    )
}

/// Container name for a key. Same derivation as the image tag, so leftovers
/// from a crashed process can be found and removed by name.
pub fn container_name(key: &AppKey) -> String {
    format!("gradio-{}-{}", key.repo.replace('/', "-"), key.branch).to_lowercase()
}

/// Tar up a workspace as a Docker build context.
pub fn tar_context(workspace: &Path) -> Result<Vec<u8>, BuildError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", workspace)
        .map_err(BuildError::Context)?;
    builder.into_inner().map_err(BuildError::Context)
}
