use crate::command::Command;
use crate::page::Page;
use crate::settings::TrackerSettings;
use crate::url::QueryParams;

/// Per-page tracking state of the call-driven tracker.
///
/// Built once by the host and handed to every
/// [`track_app_router`](crate::app_router::track_app_router) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    pub is_initial_pageview: bool,
    /// Last tracked URL, used as the next referrer.
    pub previous_url: String,
    pub tracker_initialized: bool,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            is_initial_pageview: true,
            previous_url: String::new(),
            tracker_initialized: false,
        }
    }
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Synchronous half of a navigation: referrer, custom URL and the page
/// scoped custom variables reset.
pub(crate) fn acknowledge(page: &Page, settings: &TrackerSettings, referrer: &str, url: &str) {
    let debug = settings.debug;
    if !referrer.is_empty() {
        page.push(Command::SetReferrerUrl(referrer.to_string()), debug);
    }
    page.push(Command::SetCustomUrl(url.to_string()), debug);
    page.push(Command::DeleteCustomVariables("page".to_string()), debug);
}

/// Deferred half: the current title, then a site search for search routes
/// or a page view otherwise.
pub(crate) fn settle(page: &Page, settings: &TrackerSettings, path: &str, query: &QueryParams) {
    let debug = settings.debug;
    page.push(Command::SetDocumentTitle(page.title()), debug);
    if settings.url_policy().is_search_route(path) {
        let keyword = query.get(&settings.search_keyword).unwrap_or_default();
        page.push(Command::site_search(keyword), debug);
    } else {
        page.push(Command::TrackPageView, debug);
    }
}
