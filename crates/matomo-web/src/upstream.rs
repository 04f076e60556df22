use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::io::Read;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A request about to leave for the collector host.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// `None` for GET and HEAD.
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("http transport error for {method} {url}: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
    },
    #[error("failed to read upstream body: {0}")]
    Body(#[from] std::io::Error),
    #[error("forwarding task failed: {0}")]
    Task(String),
}

/// Outbound side of the proxy. Implementations block; the handler runs them
/// off the async runtime.
pub trait Upstream: Send + Sync {
    fn forward(&self, request: &OutboundRequest) -> Result<UpstreamResponse, ForwardError>;
}

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// [`Upstream`] backed by a `ureq` agent.
#[derive(Clone)]
pub struct UreqUpstream {
    agent: ureq::Agent,
    timeout_ms: u64,
}

impl Default for UreqUpstream {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS)
    }
}

impl UreqUpstream {
    pub fn new(timeout_ms: u64) -> Self {
        let timeout = Duration::from_millis(timeout_ms.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { agent, timeout_ms }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

impl Upstream for UreqUpstream {
    fn forward(&self, request: &OutboundRequest) -> Result<UpstreamResponse, ForwardError> {
        let mut call = self.agent.request(request.method.as_str(), &request.url);
        for (name, value) in forwardable_headers(&request.headers) {
            call = call.set(name, value);
        }

        let response = match &request.body {
            Some(body) => call.send_bytes(body),
            None => call.call(),
        };

        match response {
            Ok(resp) => read_response(resp),
            // Collector error statuses go back to the client as they are.
            Err(ureq::Error::Status(_code, resp)) => read_response(resp),
            Err(ureq::Error::Transport(err)) => Err(ForwardError::Transport {
                method: request.method.to_string(),
                url: request.url.clone(),
                message: err.to_string(),
            }),
        }
    }
}

/// Header pairs ureq can send. Values with bytes outside visible ASCII are
/// left out.
fn forwardable_headers(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(v) => Some((name.as_str(), v)),
            Err(_) => {
                debug!(header = %name, "dropping non-ascii header value from upstream request");
                None
            }
        })
        .collect()
}

fn read_response(resp: ureq::Response) -> Result<UpstreamResponse, ForwardError> {
    let status = StatusCode::from_u16(resp.status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = HeaderMap::new();
    for name in resp.headers_names() {
        let Some(value) = resp.header(&name) else {
            continue;
        };
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.append(header_name, header_value);
        }
    }

    let mut body = Vec::new();
    resp.into_reader().read_to_end(&mut body)?;
    Ok(UpstreamResponse {
        status,
        headers,
        body: Bytes::from(body),
    })
}
