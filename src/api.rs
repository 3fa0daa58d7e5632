//! HTTP handlers: webhook trigger, management API, and the proxy fallback.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::deploy::Deployer;
use crate::health::Reconciler;
use crate::proxy::{self, Proxy};
use crate::registry::{AppKey, AppStatus, Registry};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub registry: Arc<Registry>,
    pub deployer: Arc<Deployer>,
    pub reconciler: Arc<Reconciler>,
    pub proxy: Proxy,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct BranchRequest {
    pub branch: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct WebhookPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub repository: Option<WebhookRepository>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Deserialize)]
pub struct WebhookRepository {
    pub full_name: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

/// Deploys are long-running; the trigger only acknowledges. The outcome is
/// observable through the registry, `/health`, and the deploy logs — a
/// failure is never silently dropped.
fn spawn_deploy(state: SharedState, key: AppKey) {
    tokio::spawn(async move {
        match state.deployer.deploy(&key).await {
            Ok(record) => info!(%key, port = record.port, "deployment finished"),
            Err(e) => error!(%key, "deployment failed: {}", e),
        }
    });
}

/// Forgejo webhook endpoint. Push events trigger an asynchronous deploy;
/// everything else is acknowledged and ignored.
pub async fn webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Option<Json<WebhookPayload>>,
) -> Response {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let is_push = headers
        .get("x-forgejo-event")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "push")
        .unwrap_or(false)
        || payload.action.as_deref() == Some("push");

    let repo = match (is_push, payload.repository) {
        (true, Some(repository)) => repository.full_name,
        _ => {
            return (
                StatusCode::OK,
                Json(json!({"status": "ignored", "message": "Event not handled"})),
            )
                .into_response();
        }
    };

    let git_ref = payload.git_ref.unwrap_or_else(|| "refs/heads/main".into());
    let branch = git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(&git_ref)
        .to_string();

    let key = AppKey::new(repo, branch);
    info!(%key, "push event received");
    let message = format!("Deployment started for {}:{}", key.repo, key.branch);
    spawn_deploy(state, key);

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "message": message})),
    )
        .into_response()
}

/// All records, in the persisted projection, keyed by `"{repo}/{branch}"`.
pub async fn list_apps(State(state): State<SharedState>) -> Response {
    Json(state.registry.list().await).into_response()
}

/// Manual deploy trigger; branch defaults to `main`.
pub async fn deploy_app(
    State(state): State<SharedState>,
    Path(repo): Path<String>,
    body: Option<Json<BranchRequest>>,
) -> Response {
    let branch = body
        .and_then(|Json(b)| b.branch)
        .unwrap_or_else(|| "main".to_string());
    let key = AppKey::new(repo, branch);
    info!(%key, "manual deploy requested");
    let message = format!("Deployment started for {}:{}", key.repo, key.branch);
    spawn_deploy(state, key);

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "message": message})),
    )
        .into_response()
}

/// Stop an app. Idempotent: stopping something that is not deployed is a
/// success, not an error.
pub async fn stop_app(
    State(state): State<SharedState>,
    Path(repo): Path<String>,
    body: Option<Json<BranchRequest>>,
) -> Result<Response, ApiError> {
    let branch = body
        .and_then(|Json(b)| b.branch)
        .unwrap_or_else(|| "main".to_string());
    let key = AppKey::new(repo, branch);

    let removed = state
        .deployer
        .stop(&key)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let message = if removed {
        "App stopped"
    } else {
        "App was not deployed"
    };
    Ok(Json(json!({"status": "success", "message": message})).into_response())
}

/// Reconcile and summarize.
pub async fn health(State(state): State<SharedState>) -> Response {
    Json(state.reconciler.reconcile().await).into_response()
}

/// Minimal JSON index of deployed apps.
pub async fn index(State(state): State<SharedState>) -> Response {
    Json(json!({
        "service": "gradio-pages",
        "apps": state.registry.list().await,
    }))
    .into_response()
}

// ── Proxy fallback ────────────────────────────────────────────────────

/// Split `/{owner}/{repo}/{rest...}` into the repo key and the path to
/// forward. The forwarded path always starts with `/`.
fn split_repo_path(path: &str) -> Option<(String, String)> {
    let mut segments = path.trim_start_matches('/').splitn(3, '/');
    let owner = segments.next().filter(|s| !s.is_empty())?;
    let name = segments.next().filter(|s| !s.is_empty())?;
    let rest = segments.next().unwrap_or("");
    Some((format!("{}/{}", owner, name), format!("/{}", rest)))
}

/// The caller may pin a branch with `?branch=`; everything else routes to
/// `main`.
fn branch_from_query(query: Option<&str>) -> &str {
    query
        .and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("branch="))
                .filter(|b| !b.is_empty())
        })
        .unwrap_or("main")
}

/// Path-based routing surface: `/{owner}/{repo}/{path...}` forwards to the
/// container serving that repo. Unknown or non-running apps get a 404
/// without any backend call.
pub async fn proxy_app(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (repo, rest) = match split_repo_path(uri.path()) {
        Some(parts) => parts,
        None => return proxy::not_found(uri.path().trim_matches('/')),
    };
    let branch = branch_from_query(uri.query());

    let key = AppKey::new(repo.clone(), branch);
    let record = match state.registry.get(&key).await {
        Some(record) if record.status == AppStatus::Running => record,
        _ => return proxy::not_found(&repo),
    };

    let mut path_and_query = rest;
    if let Some(query) = uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    state
        .proxy
        .forward(record.port, method, &path_and_query, &headers, body)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_repo_path_extracts_key_and_remainder() {
        assert_eq!(
            split_repo_path("/acme/demo/"),
            Some(("acme/demo".into(), "/".into()))
        );
        assert_eq!(
            split_repo_path("/acme/demo/static/app.css"),
            Some(("acme/demo".into(), "/static/app.css".into()))
        );
        assert_eq!(
            split_repo_path("/acme/demo"),
            Some(("acme/demo".into(), "/".into()))
        );
    }

    #[test]
    fn split_repo_path_rejects_incomplete_paths() {
        assert_eq!(split_repo_path("/"), None);
        assert_eq!(split_repo_path("/acme"), None);
        assert_eq!(split_repo_path("/acme/"), None);
    }

    #[test]
    fn branch_query_defaults_to_main() {
        assert_eq!(branch_from_query(None), "main");
        assert_eq!(branch_from_query(Some("foo=bar")), "main");
        assert_eq!(branch_from_query(Some("branch=")), "main");
        assert_eq!(branch_from_query(Some("branch=dev")), "dev");
        assert_eq!(branch_from_query(Some("x=1&branch=dev&y=2")), "dev");
    }

    #[test]
    fn webhook_payload_parses_forgejo_push() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{
                "action": "push",
                "ref": "refs/heads/feature-x",
                "repository": {"full_name": "acme/demo", "private": false}
            }"#,
        )
        .unwrap();
        assert_eq!(payload.action.as_deref(), Some("push"));
        assert_eq!(payload.git_ref.as_deref(), Some("refs/heads/feature-x"));
        assert_eq!(payload.repository.unwrap().full_name, "acme/demo");
    }

    #[test]
    fn webhook_payload_tolerates_missing_fields() {
        let payload: WebhookPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.action.is_none());
        assert!(payload.repository.is_none());
        assert!(payload.git_ref.is_none());
    }
}
