use crate::ab_testing::{InitAbTestingParams, init_ab_testing};
use crate::navigation::{NavigationState, acknowledge, settle};
use crate::page::Page;
use crate::settings::TrackerSettings;
use crate::tracker::{bootstrap, tracking_enabled};
use crate::url::{QueryParams, join_url, split_route};
use tracing::debug;

/// Current pathname and query, as re-supplied on every render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteLocation {
    pub pathname: String,
    pub query: QueryParams,
}

impl RouteLocation {
    pub fn new(pathname: impl Into<String>, query: QueryParams) -> Self {
        Self {
            pathname: pathname.into(),
            query,
        }
    }

    /// Parses `/path?a=1`. The fragment is ignored.
    pub fn parse(route: &str) -> Self {
        let (pathname, query) = split_route(route);
        Self::new(pathname, QueryParams::parse(query))
    }

    /// Pathname plus `?query` when the query is non-empty.
    pub fn current_url(&self) -> String {
        join_url(&self.pathname, &self.query.to_query_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRouterOutcome {
    /// No collector URL configured.
    Disabled,
    Excluded,
    InitialPageview,
    Navigated,
    /// Same pathname and query as last time; nothing pushed.
    Unchanged,
}

/// Call-driven tracker, invoked on every render.
///
/// Compares the current URL against `state.previous_url` and only tracks
/// real navigations. The first tracked call bootstraps the collector and
/// pushes an immediate page view; later changes push the referrer/URL
/// commands now and the title + page view on the next tick.
pub fn track_app_router(
    settings: &TrackerSettings,
    state: &mut NavigationState,
    page: &Page,
    location: &RouteLocation,
) -> AppRouterOutcome {
    if !tracking_enabled(settings) {
        return AppRouterOutcome::Disabled;
    }
    let current_url = location.current_url();

    if settings.is_excluded(&current_url) {
        debug!(url = %current_url, "navigation excluded");
        state.previous_url = current_url;
        return AppRouterOutcome::Excluded;
    }

    if !state.tracker_initialized {
        page.ensure_queue();
        bootstrap(page, settings);
        init_ab_testing(
            page,
            InitAbTestingParams {
                enabled: !settings.ab_tests.is_empty(),
                pathname: &location.pathname,
                exclude_urls_patterns: &settings.exclude_urls_patterns,
                tests: &settings.ab_tests,
                debug: settings.debug,
            },
        );
        state.tracker_initialized = true;
        settings.notify_initialization();
    }

    if state.is_initial_pageview {
        state.is_initial_pageview = false;
        state.previous_url = current_url;
        settle(page, settings, &location.pathname, &location.query);
        return AppRouterOutcome::InitialPageview;
    }

    if current_url == state.previous_url {
        return AppRouterOutcome::Unchanged;
    }

    let policy = settings.url_policy();
    acknowledge(
        page,
        settings,
        policy.effective_url(&state.previous_url),
        policy.effective_url(&current_url),
    );
    settings.notify_start(&current_url);

    let weak = page.downgrade();
    let deferred_settings = settings.clone();
    let pathname = location.pathname.clone();
    let query = location.query.clone();
    let route = current_url.clone();
    page.defer(move || {
        if let Some(page) = weak.upgrade() {
            settle(&page, &deferred_settings, &pathname, &query);
            deferred_settings.notify_complete(&route);
        }
    });

    state.previous_url = current_url;
    AppRouterOutcome::Navigated
}
