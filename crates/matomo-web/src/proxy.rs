use crate::upstream::{ForwardError, OutboundRequest, Upstream, UpstreamResponse, UreqUpstream};
use bytes::Bytes;
use http::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, HeaderName, USER_AGENT,
};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use matomo_core::config::ProxyEnv;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub type ProxyRequest = Request<Bytes>;
pub type ProxyResponse = Response<Bytes>;

pub const JS_TRACKER_FILE: &str = "matomo.js";
pub const PHP_TRACKER_FILE: &str = "matomo.php";

const FORWARDED_HEADERS: [HeaderName; 4] = [USER_AGENT, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE];
const RETURNED_HEADERS: [HeaderName; 2] = [CONTENT_TYPE, CACHE_CONTROL];
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Server-side proxy configuration. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// Upstream collector origin. Requests fail with 500 while unset.
    pub target: Option<String>,
    /// Opaque name standing in for `matomo.js`.
    pub js_tracker_file: Option<String>,
    /// Opaque name standing in for `matomo.php`.
    pub php_tracker_file: Option<String>,
}

impl ProxySettings {
    pub fn from_env(env: &ProxyEnv) -> Self {
        Self {
            target: env.target().map(str::to_string),
            js_tracker_file: env.js_tracker_file().map(str::to_string),
            php_tracker_file: env.php_tracker_file().map(str::to_string),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("MATOMO_PROXY_TARGET is not configured")]
    MissingTarget,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingTarget => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Catch-all path segments, either already known or delivered later by the
/// host framework.
pub enum RouteParams {
    Ready(Vec<String>),
    Deferred(Pin<Box<dyn Future<Output = Vec<String>> + Send>>),
}

impl RouteParams {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Vec<String>> + Send + 'static,
    {
        RouteParams::Deferred(Box::pin(future))
    }

    pub async fn resolve(self) -> Vec<String> {
        match self {
            RouteParams::Ready(segments) => segments,
            RouteParams::Deferred(future) => future.await,
        }
    }
}

impl From<Vec<String>> for RouteParams {
    fn from(segments: Vec<String>) -> Self {
        RouteParams::Ready(segments)
    }
}

impl fmt::Debug for RouteParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteParams::Ready(segments) => f.debug_tuple("Ready").field(segments).finish(),
            RouteParams::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Maps a single opaque root segment back to the real collector file.
/// Deeper paths (plugin assets) pass through unchanged.
pub fn remap_path(segments: &[String], settings: &ProxySettings) -> String {
    if let [segment] = segments {
        if settings.js_tracker_file.as_deref() == Some(segment.as_str()) {
            return JS_TRACKER_FILE.to_string();
        }
        if settings.php_tracker_file.as_deref() == Some(segment.as_str()) {
            return PHP_TRACKER_FILE.to_string();
        }
        if segment.ends_with(".js") {
            return JS_TRACKER_FILE.to_string();
        }
        if segment.ends_with(".php") {
            return PHP_TRACKER_FILE.to_string();
        }
    }
    segments.join("/")
}

/// Forwards collector traffic to the configured upstream.
#[derive(Clone)]
pub struct ProxyHandler {
    settings: Arc<ProxySettings>,
    upstream: Arc<dyn Upstream>,
}

impl ProxyHandler {
    pub fn new(settings: ProxySettings) -> Self {
        Self {
            settings: Arc::new(settings),
            upstream: Arc::new(UreqUpstream::default()),
        }
    }

    pub fn with_upstream<U>(mut self, upstream: U) -> Self
    where
        U: Upstream + 'static,
    {
        self.upstream = Arc::new(upstream);
        self
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Builds the outbound request, or fails when no target is configured.
    pub fn prepare(
        &self,
        request: &ProxyRequest,
        segments: &[String],
    ) -> Result<OutboundRequest, ProxyError> {
        let target = self
            .settings
            .target
            .as_deref()
            .map(|t| t.trim_end_matches('/'))
            .filter(|t| !t.is_empty())
            .ok_or(ProxyError::MissingTarget)?;

        let path = remap_path(segments, &self.settings);
        let mut url = format!("{target}/{path}");
        if let Some(query) = request.uri().query().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let inbound = request.headers();
        let mut headers = HeaderMap::new();
        for name in &FORWARDED_HEADERS {
            if let Some(value) = inbound.get(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(ip) = inbound
            .get(X_FORWARDED_FOR)
            .or_else(|| inbound.get(X_REAL_IP))
        {
            headers.insert(HeaderName::from_static(X_FORWARDED_FOR), ip.clone());
        }

        let method = request.method().clone();
        let body = if method == Method::GET || method == Method::HEAD {
            None
        } else {
            Some(request.body().clone())
        };

        Ok(OutboundRequest {
            method,
            url,
            headers,
            body,
        })
    }

    /// Handles one proxied request. Never fails: misconfiguration yields 500
    /// and forwarding failures yield 502.
    pub async fn handle(&self, request: ProxyRequest, params: RouteParams) -> ProxyResponse {
        let segments = params.resolve().await;
        let outbound = match self.prepare(&request, &segments) {
            Ok(outbound) => outbound,
            Err(err) => {
                warn!(error = %err, "matomo proxy misconfigured");
                return plain(err.status(), err.to_string());
            }
        };
        debug!(method = %outbound.method, url = %outbound.url, "forwarding to matomo");

        let upstream = Arc::clone(&self.upstream);
        let forwarded = tokio::task::spawn_blocking(move || upstream.forward(&outbound))
            .await
            .unwrap_or_else(|err| Err(ForwardError::Task(err.to_string())));

        match forwarded {
            Ok(resp) => into_response(resp),
            Err(err) => {
                warn!(error = %err, "matomo proxy forwarding failed");
                plain(StatusCode::BAD_GATEWAY, "Bad Gateway".to_string())
            }
        }
    }
}

impl fmt::Debug for ProxyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn into_response(upstream: UpstreamResponse) -> ProxyResponse {
    let mut response = Response::new(upstream.body);
    *response.status_mut() = upstream.status;
    for name in &RETURNED_HEADERS {
        if let Some(value) = upstream.headers.get(name) {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

fn plain(status: StatusCode, message: String) -> ProxyResponse {
    let mut response = Response::new(Bytes::from(message));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<OutboundRequest>>,
        fail: bool,
    }

    impl Upstream for Arc<Recording> {
        fn forward(&self, request: &OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
            self.calls.lock().expect("lock").push(request.clone());
            if self.fail {
                return Err(ForwardError::Transport {
                    method: request.method.to_string(),
                    url: request.url.clone(),
                    message: "connection refused".to_string(),
                });
            }
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/javascript"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=300"));
            headers.insert("set-cookie", HeaderValue::from_static("MATOMO_SESSID=x"));
            headers.insert("x-powered-by", HeaderValue::from_static("php"));
            Ok(UpstreamResponse {
                status: if request.method == Method::POST {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::OK
                },
                headers,
                body: Bytes::from_static(b"/* matomo tracker */"),
            })
        }
    }

    fn settings() -> ProxySettings {
        ProxySettings {
            target: Some("https://matomo.example.com".to_string()),
            js_tracker_file: Some("s3fa1c0d2e4.js".to_string()),
            php_tracker_file: Some("t3fa1c0d2e4".to_string()),
        }
    }

    fn handler(settings: ProxySettings) -> (ProxyHandler, Arc<Recording>) {
        let recording = Arc::new(Recording::default());
        let handler = ProxyHandler::new(settings).with_upstream(Arc::clone(&recording));
        (handler, recording)
    }

    fn segments(parts: &[&str]) -> RouteParams {
        RouteParams::Ready(parts.iter().map(|p| p.to_string()).collect())
    }

    fn get(uri: &str) -> ProxyRequest {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Bytes::new())
            .expect("request")
    }

    #[tokio::test]
    async fn missing_target_is_500_without_outbound_call() {
        let (handler, recording) = handler(ProxySettings::default());
        let response = handler
            .handle(get("http://localhost/api/__mp/matomo.js"), segments(&["matomo.js"]))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(recording.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn opaque_js_name_maps_to_matomo_js() {
        let (handler, recording) = handler(settings());
        let response = handler
            .handle(
                get("http://localhost/api/__mp/s3fa1c0d2e4.js"),
                RouteParams::deferred(async { vec!["s3fa1c0d2e4.js".to_string()] }),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.body()[..], b"/* matomo tracker */");
        let calls = recording.calls.lock().expect("lock");
        assert_eq!(calls[0].url, "https://matomo.example.com/matomo.js");
        assert_eq!(calls[0].method, Method::GET);
        assert!(calls[0].body.is_none());
    }

    #[tokio::test]
    async fn post_to_opaque_endpoint_keeps_body_and_method() {
        let (handler, recording) = handler(settings());
        let request = Request::builder()
            .method(Method::POST)
            .uri("http://localhost/api/__mp/t3fa1c0d2e4?idsite=1&rec=1")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("cookie", "secret=1")
            .body(Bytes::from_static(b"idsite=1&rec=1"))
            .expect("request");

        let response = handler.handle(request, segments(&["t3fa1c0d2e4"])).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let calls = recording.calls.lock().expect("lock");
        let call = &calls[0];
        assert_eq!(call.method, Method::POST);
        assert_eq!(call.url, "https://matomo.example.com/matomo.php?idsite=1&rec=1");
        assert_eq!(call.body.as_deref(), Some(&b"idsite=1&rec=1"[..]));
        assert_eq!(
            call.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/x-www-form-urlencoded")
        );
        assert!(call.headers.get("cookie").is_none());
    }

    #[tokio::test]
    async fn whitelisted_headers_and_client_ip_are_forwarded() {
        let (handler, recording) = handler(settings());
        let request = Request::builder()
            .uri("http://localhost/api/__mp/matomo.php")
            .header(USER_AGENT, "Mozilla/5.0")
            .header(ACCEPT_LANGUAGE, "en-US")
            .header("x-real-ip", "5.6.7.8")
            .header("authorization", "Bearer nope")
            .body(Bytes::new())
            .expect("request");
        handler.handle(request, segments(&["matomo.php"])).await;

        let calls = recording.calls.lock().expect("lock");
        let headers = &calls[0].headers;
        assert_eq!(headers.get(USER_AGENT).and_then(|v| v.to_str().ok()), Some("Mozilla/5.0"));
        assert_eq!(
            headers.get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok()),
            Some("en-US")
        );
        assert_eq!(
            headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
            Some("5.6.7.8")
        );
        assert!(headers.get("authorization").is_none());
        assert_eq!(headers.len(), 3);
    }

    #[tokio::test]
    async fn x_forwarded_for_wins_over_x_real_ip() {
        let (handler, recording) = handler(settings());
        let request = Request::builder()
            .uri("http://localhost/api/__mp/matomo.php")
            .header("x-forwarded-for", "1.2.3.4")
            .header("x-real-ip", "5.6.7.8")
            .body(Bytes::new())
            .expect("request");
        handler.handle(request, segments(&["matomo.php"])).await;
        let calls = recording.calls.lock().expect("lock");
        assert_eq!(
            calls[0].headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
            Some("1.2.3.4")
        );
    }

    #[tokio::test]
    async fn nested_plugin_paths_pass_through() {
        let (handler, recording) = handler(settings());
        handler
            .handle(
                get("http://localhost/api/__mp/plugins/HeatmapSessionRecording/tracker.min.js"),
                segments(&["plugins", "HeatmapSessionRecording", "tracker.min.js"]),
            )
            .await;
        let calls = recording.calls.lock().expect("lock");
        assert_eq!(
            calls[0].url,
            "https://matomo.example.com/plugins/HeatmapSessionRecording/tracker.min.js"
        );
    }

    #[tokio::test]
    async fn only_content_type_and_cache_control_come_back() {
        let (handler, _) = handler(settings());
        let response = handler
            .handle(get("http://localhost/api/__mp/matomo.js"), segments(&["matomo.js"]))
            .await;
        let headers = response.headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(
            headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some("max-age=300")
        );
        assert!(headers.get("set-cookie").is_none());
    }

    #[tokio::test]
    async fn forwarding_failure_is_502() {
        let recording = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let handler = ProxyHandler::new(settings()).with_upstream(Arc::clone(&recording));
        let response = handler
            .handle(get("http://localhost/api/__mp/matomo.js"), segments(&["matomo.js"]))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(recording.calls.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_502_with_real_transport() {
        let handler = ProxyHandler::new(ProxySettings::default().with_target("http://127.0.0.1:1"))
            .with_upstream(UreqUpstream::new(500));
        let response = handler
            .handle(get("http://localhost/api/__mp/matomo.js"), segments(&["matomo.js"]))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn remap_only_touches_single_segments() {
        let settings = settings();
        let one = |s: &str| remap_path(&[s.to_string()], &settings);
        assert_eq!(one("s3fa1c0d2e4.js"), "matomo.js");
        assert_eq!(one("t3fa1c0d2e4"), "matomo.php");
        assert_eq!(one("legacy.php"), "matomo.php");
        assert_eq!(one("other.js"), "matomo.js");
        assert_eq!(one("index"), "index");
        assert_eq!(
            remap_path(&["plugins".to_string(), "x.js".to_string()], &settings),
            "plugins/x.js"
        );
    }

    #[test]
    fn settings_come_from_env() {
        let env = ProxyEnv::from_pairs([
            ("MATOMO_PROXY_TARGET", "https://matomo.example.com"),
            ("NEXT_PUBLIC_MATOMO_PROXY_JS_TRACKER_FILE", "s3fa1c0d2e4.js"),
        ]);
        let settings = ProxySettings::from_env(&env);
        assert_eq!(settings.target.as_deref(), Some("https://matomo.example.com"));
        assert_eq!(settings.js_tracker_file.as_deref(), Some("s3fa1c0d2e4.js"));
        assert_eq!(settings.php_tracker_file, None);
    }
}
