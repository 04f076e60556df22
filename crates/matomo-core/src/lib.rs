//! Matomo core crate.
//!
//! Everything here runs on the page side, single-threaded:
//!
//! - `command` + `queue`: typed collector commands and the shared `_paq`
//!   queue they are pushed to.
//! - `page`: the browsing context (queue slot, title, location, injected
//!   scripts, experiment store, tick queue) handed to every tracker.
//! - `tracker` + `heatmap`: one-time collector bootstrap and the optional
//!   heatmap/session-recording plugin.
//! - `pages_router` + `app_router`: the two navigation state machines. The
//!   first reacts to router events, the second is called on every render
//!   and diffs against a [`NavigationState`].
//! - `ab_testing`: experiment registration and the variant store.
//! - `proxy_config` + `config`: build-time proxy path, rewrite merging and
//!   the env surface shared with the server-side proxy.
//!
//! Ordering rule: commands reach the queue in exactly the order the
//! collector must see them. The trackers never reorder, batch or retry.

pub mod ab_testing;
pub mod app_router;
pub mod command;
pub mod config;
pub mod events;
pub mod heatmap;
pub mod navigation;
pub mod page;
pub mod pages_router;
pub mod proxy_config;
pub mod queue;
pub mod settings;
pub mod tick;
pub mod tracker;
pub mod url;

pub use ab_testing::{
    AbTestConfig, ExperimentDefinition, ExperimentState, ExperimentStore, InitAbTestingParams,
    get_ab_test_state, init_ab_testing,
};
pub use app_router::{AppRouterOutcome, RouteLocation, track_app_router};
pub use command::{Arg, Callback, Command, EventLabel, HeatmapCommand, Trigger};
pub use config::{ConfigError, ProxyEnv};
pub use events::{TrackEvent, send_event};
pub use heatmap::{HeatmapConfig, HeatmapManualConfig};
pub use navigation::NavigationState;
pub use page::{Location, Page, ScriptTag};
pub use pages_router::{MemoryRouter, RouteEvent, RouterEvents, track_pages_router};
pub use proxy_config::{
    HostConfig, MatomoProxy, MatomoProxyOptions, ProxyPathStrategy, generate_proxy_path,
    with_matomo_proxy,
};
pub use queue::{Collector, CommandQueue, PushError, safe_push};
pub use settings::TrackerSettings;
pub use tick::TickQueue;
pub use self::url::{QueryParams, UrlPolicy};
