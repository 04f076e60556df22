use crate::proxy::{ProxyHandler, ProxyResponse, RouteParams};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use matomo_core::proxy_config::DEFAULT_HANDLER_ROUTE;
use tracing::warn;

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Mounts a [`ProxyHandler`] as a catch-all axum route.
#[derive(Clone, Debug)]
pub struct AxumProxyAdapter {
    handler: ProxyHandler,
    route: String,
    max_body_bytes: usize,
}

impl AxumProxyAdapter {
    pub fn new(handler: ProxyHandler) -> Self {
        Self {
            handler,
            route: DEFAULT_HANDLER_ROUTE.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn route(&self) -> &str {
        self.route.trim_end_matches('/')
    }

    /// `{route}/{*path}` for every method.
    pub fn router<S>(self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let pattern = format!("{}/{{*path}}", self.route());
        Router::new()
            .route(&pattern, any(proxy_request))
            .with_state(self)
    }

    /// Forwards one request whose catch-all remainder is `path`.
    pub async fn forward(&self, path: &str, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let bytes = match to_bytes(body, self.max_body_bytes).await {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "matomo proxy request body rejected");
                return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
            }
        };
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let response = self
            .handler
            .handle(
                axum::http::Request::from_parts(parts, bytes),
                RouteParams::Ready(segments),
            )
            .await;
        proxy_response_to_axum(response)
    }
}

async fn proxy_request(
    State(adapter): State<AxumProxyAdapter>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    adapter.forward(&path, request).await
}

fn proxy_response_to_axum(response: ProxyResponse) -> Response {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxySettings;
    use crate::upstream::{ForwardError, OutboundRequest, Upstream, UpstreamResponse};
    use axum::http::{HeaderMap, HeaderValue, Method, header::CONTENT_TYPE};
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Echo {
        urls: Mutex<Vec<String>>,
    }

    impl Upstream for Arc<Echo> {
        fn forward(&self, request: &OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
            self.urls.lock().expect("lock").push(request.url.clone());
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            Ok(UpstreamResponse {
                status: StatusCode::OK,
                headers,
                body: request.body.clone().unwrap_or_else(|| Bytes::from_static(b"ok")),
            })
        }
    }

    fn adapter() -> (AxumProxyAdapter, Arc<Echo>) {
        let echo = Arc::new(Echo::default());
        let handler = ProxyHandler::new(ProxySettings {
            target: Some("https://matomo.example.com/".to_string()),
            js_tracker_file: Some("s3fa1c0d2e4.js".to_string()),
            php_tracker_file: Some("t3fa1c0d2e4".to_string()),
        })
        .with_upstream(Arc::clone(&echo));
        (AxumProxyAdapter::new(handler), echo)
    }

    #[tokio::test]
    async fn forward_splits_path_and_echoes_body() {
        let (adapter, echo) = adapter();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/__mp/t3fa1c0d2e4?rec=1")
            .body(Body::from("idsite=1&rec=1"))
            .expect("request");

        let response = adapter.forward("t3fa1c0d2e4", request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/plain")
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"idsite=1&rec=1");
        assert_eq!(
            echo.urls.lock().expect("lock")[0],
            "https://matomo.example.com/matomo.php?rec=1"
        );
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_forwarding() {
        let (adapter, echo) = adapter();
        let adapter = adapter.with_max_body_bytes(4);
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/__mp/matomo.php")
            .body(Body::from("way too long"))
            .expect("request");

        let response = adapter.forward("matomo.php", request).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(echo.urls.lock().expect("lock").is_empty());
    }

    #[test]
    fn route_trims_trailing_slash() {
        let (adapter, _) = adapter();
        let adapter = adapter.with_route("/stats/");
        assert_eq!(adapter.route(), "/stats");
        let _router: Router = adapter.router();
    }
}
