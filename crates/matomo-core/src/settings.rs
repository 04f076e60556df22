use crate::ab_testing::ExperimentDefinition;
use crate::command::Callback;
use crate::config::ProxyEnv;
use crate::heatmap::HeatmapConfig;
use crate::url::{UrlPolicy, matches_any_pattern};
use regex::Regex;
use std::fmt;
use std::rc::Rc;

pub const DEFAULT_JS_TRACKER_FILE: &str = "matomo.js";
pub const DEFAULT_PHP_TRACKER_FILE: &str = "matomo.php";
pub const DEFAULT_SEARCH_KEYWORD: &str = "q";
pub const DEFAULT_SEARCH_ROUTES: [&str; 2] = ["/recherche", "/search"];

/// Receives the raw route on navigation start/completion.
pub type RouteCallback = Rc<dyn Fn(&str)>;

/// Everything the navigation trackers need to know about the collector.
#[derive(Clone)]
pub struct TrackerSettings {
    /// Collector base URL. Tracking is disabled when empty.
    pub url: String,
    pub site_id: String,
    pub js_tracker_file: String,
    pub php_tracker_file: String,
    pub exclude_urls_patterns: Vec<Regex>,
    pub disable_cookies: bool,
    pub on_route_change_start: Option<RouteCallback>,
    pub on_route_change_complete: Option<RouteCallback>,
    pub on_initialization: Option<Callback>,
    pub on_script_loading_error: Option<Callback>,
    pub nonce: Option<String>,
    pub debug: bool,
    pub search_keyword: String,
    pub search_routes: Vec<String>,
    pub enable_heatmap_session_recording: bool,
    pub heatmap_config: HeatmapConfig,
    pub enable_heart_beat_timer: bool,
    pub heart_beat_timer_interval: Option<u32>,
    pub clean_url: bool,
    pub ab_tests: Vec<ExperimentDefinition>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            site_id: String::new(),
            js_tracker_file: DEFAULT_JS_TRACKER_FILE.to_string(),
            php_tracker_file: DEFAULT_PHP_TRACKER_FILE.to_string(),
            exclude_urls_patterns: Vec::new(),
            disable_cookies: false,
            on_route_change_start: None,
            on_route_change_complete: None,
            on_initialization: None,
            on_script_loading_error: None,
            nonce: None,
            debug: false,
            search_keyword: DEFAULT_SEARCH_KEYWORD.to_string(),
            search_routes: DEFAULT_SEARCH_ROUTES.iter().map(|r| r.to_string()).collect(),
            enable_heatmap_session_recording: false,
            heatmap_config: HeatmapConfig::default(),
            enable_heart_beat_timer: false,
            heart_beat_timer_interval: None,
            clean_url: false,
            ab_tests: Vec::new(),
        }
    }
}

impl TrackerSettings {
    pub fn new(url: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            site_id: site_id.into(),
            ..Self::default()
        }
    }

    /// Points the trackers at the same-origin proxy described by `env`,
    /// when one is configured. Leaves the settings untouched otherwise.
    pub fn with_proxy_env(mut self, env: &ProxyEnv, origin: &str) -> Self {
        if let Some(url) = env.proxy_url(origin) {
            self.url = url;
            if let Some(site_id) = env.site_id() {
                self.site_id = site_id.to_string();
            }
            if let Some(js) = env.js_tracker_file() {
                self.js_tracker_file = js.to_string();
            }
            if let Some(php) = env.php_tracker_file() {
                self.php_tracker_file = php.to_string();
            }
        }
        self
    }

    pub fn url_policy(&self) -> UrlPolicy {
        UrlPolicy::new(self.clean_url, self.search_routes.clone())
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        matches_any_pattern(url, &self.exclude_urls_patterns)
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub(crate) fn notify_start(&self, route: &str) {
        if let Some(callback) = &self.on_route_change_start {
            callback(route);
        }
    }

    pub(crate) fn notify_complete(&self, route: &str) {
        if let Some(callback) = &self.on_route_change_complete {
            callback(route);
        }
    }

    pub(crate) fn notify_initialization(&self) {
        if let Some(callback) = &self.on_initialization {
            callback();
        }
    }
}

impl fmt::Debug for TrackerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerSettings")
            .field("url", &self.url)
            .field("site_id", &self.site_id)
            .field("js_tracker_file", &self.js_tracker_file)
            .field("php_tracker_file", &self.php_tracker_file)
            .field(
                "exclude_urls_patterns",
                &self
                    .exclude_urls_patterns
                    .iter()
                    .map(Regex::as_str)
                    .collect::<Vec<_>>(),
            )
            .field("disable_cookies", &self.disable_cookies)
            .field("nonce", &self.nonce)
            .field("debug", &self.debug)
            .field("search_keyword", &self.search_keyword)
            .field("search_routes", &self.search_routes)
            .field(
                "enable_heatmap_session_recording",
                &self.enable_heatmap_session_recording,
            )
            .field("enable_heart_beat_timer", &self.enable_heart_beat_timer)
            .field("heart_beat_timer_interval", &self.heart_beat_timer_interval)
            .field("clean_url", &self.clean_url)
            .field("ab_tests", &self.ab_tests.len())
            .finish_non_exhaustive()
    }
}
