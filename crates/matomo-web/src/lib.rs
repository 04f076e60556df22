//! Server side of the same-origin Matomo proxy.
//!
//! [`ProxyHandler`] replays an inbound request against the collector host:
//! opaque root file names are mapped back to `matomo.js` / `matomo.php`,
//! only a fixed set of headers goes out and only `content-type` and
//! `cache-control` come back. It never errors: a missing target is a 500
//! and an unreachable upstream is a 502.

#[cfg(feature = "axum")]
pub mod adapters;
pub mod proxy;
pub mod upstream;

#[cfg(feature = "axum")]
pub use adapters::axum::AxumProxyAdapter;
pub use proxy::{
    ProxyError, ProxyHandler, ProxyRequest, ProxyResponse, ProxySettings, RouteParams, remap_path,
};
pub use upstream::{
    DEFAULT_TIMEOUT_MS, ForwardError, OutboundRequest, Upstream, UpstreamResponse, UreqUpstream,
};
