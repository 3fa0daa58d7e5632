//! Request forwarding to deployed app containers.
//!
//! The proxy reads a snapshot of the record and talks straight to the bound
//! backend port; it never waits on deploy locks. Backend failures surface as
//! 502 with the underlying error text, never a silent hang.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use bytes::Bytes;
use tracing::warn;

/// Response headers that must not be relayed verbatim; axum/hyper manage
/// framing itself.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "upgrade",
    "te",
];

pub struct Proxy {
    client: reqwest::Client,
    backend_host: String,
}

impl Proxy {
    pub fn new(backend_host: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build proxy HTTP client")?;
        Ok(Self {
            client,
            backend_host: backend_host.into(),
        })
    }

    /// Forward one request to `http://{backend_host}:{port}{path_and_query}`
    /// and relay the backend's status, headers, and body unchanged.
    pub async fn forward(
        &self,
        port: u16,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response {
        let url = format!("http://{}:{}{}", self.backend_host, port, path_and_query);

        let mut request = self.client.request(method, &url).body(body);
        if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
            request = request.header(header::CONTENT_TYPE, content_type);
        }

        let backend = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%url, "proxy error: {}", e);
                return bad_gateway(&e.to_string());
            }
        };

        let status = backend.status();
        let mut builder = Response::builder().status(status);
        for (name, value) in backend.headers() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            builder = builder.header(name, value);
        }

        let bytes = match backend.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%url, "proxy error reading backend body: {}", e);
                return bad_gateway(&e.to_string());
            }
        };

        builder
            .body(Body::from(bytes))
            .unwrap_or_else(|e| bad_gateway(&e.to_string()))
    }
}

/// 404 for apps that are not deployed or not running. No backend call is
/// ever attempted for these.
pub fn not_found(repo: &str) -> Response {
    let body = format!(
        "<h1>404 - Gradio App Not Found</h1>\
         <p>App '{}' is not deployed or not running.</p>\
         <p><a href='/'>&larr; Back to apps list</a></p>",
        repo
    );
    (StatusCode::NOT_FOUND, Html(body)).into_response()
}

/// 502 carrying the underlying error text.
pub fn bad_gateway(detail: &str) -> Response {
    let body = format!(
        "<h1>502 - Service Unavailable</h1>\
         <p>Error connecting to Gradio app: {}</p>",
        detail
    );
    (StatusCode::BAD_GATEWAY, Html(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::routing::{get, post};
    use axum::Router;
    use http_body_util::BodyExt;

    async fn spawn_backend() -> u16 {
        let app = Router::new()
            .route("/greet", get(|| async { "hello from backend" }))
            .route(
                "/echo",
                post(|body: String| async move { format!("echo:{}", body) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn relays_backend_status_and_body() {
        let port = spawn_backend().await;
        let proxy = Proxy::new("127.0.0.1", 5).unwrap();

        let response = proxy
            .forward(port, Method::GET, "/greet", &HeaderMap::new(), Bytes::new())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "hello from backend");
    }

    #[tokio::test]
    async fn forwards_method_and_body() {
        let port = spawn_backend().await;
        let proxy = Proxy::new("127.0.0.1", 5).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        let response = proxy
            .forward(
                port,
                Method::POST,
                "/echo",
                &headers,
                Bytes::from_static(b"ping"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "echo:ping");
    }

    #[tokio::test]
    async fn relays_backend_error_statuses_unchanged() {
        let port = spawn_backend().await;
        let proxy = Proxy::new("127.0.0.1", 5).unwrap();

        let response = proxy
            .forward(
                port,
                Method::GET,
                "/no-such-route",
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unreachable_backend_yields_502_with_error_text() {
        // Nothing listens on this port; connect fails immediately.
        let proxy = Proxy::new("127.0.0.1", 5).unwrap();
        let response = proxy
            .forward(1, Method::GET, "/", &HeaderMap::new(), Bytes::new())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_string(response).await;
        assert!(body.contains("502"));
    }

    #[tokio::test]
    async fn not_found_page_names_the_app() {
        let response = not_found("acme/demo");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_string(response).await;
        assert!(body.contains("acme/demo"));
        assert!(body.contains("not deployed"));
    }
}
