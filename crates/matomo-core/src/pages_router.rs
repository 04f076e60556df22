use crate::ab_testing::{InitAbTestingParams, init_ab_testing};
use crate::command::Command;
use crate::navigation::{acknowledge, settle};
use crate::page::Page;
use crate::settings::TrackerSettings;
use crate::tracker::{bootstrap, tracking_enabled};
use crate::url::{QueryParams, split_route};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteEvent {
    RouteChangeStart,
    RouteChangeComplete,
}

pub type RouteHandler = Rc<dyn Fn(&str)>;

/// The host router as seen by the event-driven tracker.
pub trait RouterEvents {
    fn on(&self, event: RouteEvent, handler: RouteHandler);
    /// Query parameters of the current route.
    fn query(&self) -> QueryParams;
}

/// In-memory router that emits events on demand.
#[derive(Default)]
pub struct MemoryRouter {
    handlers: RefCell<Vec<(RouteEvent, RouteHandler)>>,
    query: RefCell<QueryParams>,
}

impl MemoryRouter {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Makes `route` current and calls every handler subscribed to `event`.
    pub fn emit(&self, event: RouteEvent, route: &str) {
        let (_, query) = split_route(route);
        *self.query.borrow_mut() = QueryParams::parse(query);

        let handlers: Vec<RouteHandler> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(e, _)| *e == event)
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for handler in handlers {
            handler(route);
        }
    }

    /// Start then complete, like a client-side navigation.
    pub fn navigate(&self, route: &str) {
        self.emit(RouteEvent::RouteChangeStart, route);
        self.emit(RouteEvent::RouteChangeComplete, route);
    }
}

impl RouterEvents for MemoryRouter {
    fn on(&self, event: RouteEvent, handler: RouteHandler) {
        self.handlers.borrow_mut().push((event, handler));
    }

    fn query(&self) -> QueryParams {
        self.query.borrow().clone()
    }
}

/// Handlers state of the event-driven tracker. Only the previous URL
/// survives between navigations.
pub struct PagesRouterTracker {
    settings: TrackerSettings,
    page: Page,
    router: Weak<dyn RouterEvents>,
    previous_url: RefCell<String>,
}

impl PagesRouterTracker {
    pub fn previous_url(&self) -> String {
        self.previous_url.borrow().clone()
    }

    fn route_change_start(&self, route: &str) {
        if self.settings.is_excluded(route) {
            debug!(route, "route change start excluded");
            return;
        }
        let policy = self.settings.url_policy();
        let url = policy.effective_url(route).to_string();
        let referrer = self.previous_url.replace(url.clone());
        acknowledge(&self.page, &self.settings, &referrer, &url);
        self.settings.notify_start(route);
    }

    fn route_change_complete(self: &Rc<Self>, route: &str) {
        if self.settings.is_excluded(route) {
            debug!(route, "route change complete excluded");
            return;
        }
        let tracker = Rc::downgrade(self);
        let route = route.to_string();
        self.page.defer(move || {
            if let Some(tracker) = tracker.upgrade() {
                tracker.settle(&route);
            }
        });
    }

    fn settle(&self, route: &str) {
        let query = self
            .router
            .upgrade()
            .map(|router| router.query())
            .unwrap_or_default();
        settle(&self.page, &self.settings, route, &query);
        self.settings.notify_complete(route);
    }
}

/// Bootstraps the collector on `page` and subscribes to the router's
/// navigation events.
///
/// The initial page view is pushed before the tracker configuration so that
/// campaign parameters of the landing URL are picked up. Returns `None` when
/// tracking is disabled (no collector URL).
pub fn track_pages_router<R>(
    settings: &TrackerSettings,
    page: &Page,
    router: &Rc<R>,
) -> Option<Rc<PagesRouterTracker>>
where
    R: RouterEvents + 'static,
{
    if !tracking_enabled(settings) {
        return None;
    }
    page.ensure_queue();

    let pathname = page.location().pathname;
    let excluded = settings.is_excluded(&pathname);

    settings.notify_initialization();
    init_ab_testing(
        page,
        InitAbTestingParams {
            enabled: !settings.ab_tests.is_empty(),
            pathname: &pathname,
            exclude_urls_patterns: &settings.exclude_urls_patterns,
            tests: &settings.ab_tests,
            debug: settings.debug,
        },
    );

    if excluded {
        debug!(pathname = %pathname, "initial page view excluded");
    } else {
        page.push(Command::TrackPageView, settings.debug);
    }
    bootstrap(page, settings);

    let router_dyn: Rc<dyn RouterEvents> = router.clone();
    let tracker = Rc::new(PagesRouterTracker {
        settings: settings.clone(),
        page: page.clone(),
        router: Rc::downgrade(&router_dyn),
        previous_url: RefCell::new(pathname),
    });

    let start = Rc::clone(&tracker);
    router.on(
        RouteEvent::RouteChangeStart,
        Rc::new(move |route: &str| start.route_change_start(route)),
    );
    let complete = Rc::clone(&tracker);
    router.on(
        RouteEvent::RouteChangeComplete,
        Rc::new(move |route: &str| complete.route_change_complete(route)),
    );

    Some(tracker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Location;
    use regex::Regex;
    use serde_json::{Value, json};
    use std::cell::Cell;

    fn setup(settings: TrackerSettings) -> (Page, Rc<MemoryRouter>) {
        let page = Page::new();
        let router = MemoryRouter::new();
        track_pages_router(&settings, &page, &router).expect("tracker");
        page.clear_commands();
        (page, router)
    }

    fn settings() -> TrackerSettings {
        TrackerSettings::new("https://m.example.com", "1")
    }

    fn navigate(page: &Page, router: &MemoryRouter, route: &str) -> Vec<Value> {
        page.clear_commands();
        router.navigate(route);
        page.run_pending();
        page.command_values()
    }

    #[test]
    fn bootstrap_pushes_page_view_before_config() {
        let page = Page::with_location(Location {
            origin: "https://shop.example.com".to_string(),
            pathname: "/landing".to_string(),
        });
        let router = MemoryRouter::new();
        let tracker = track_pages_router(&settings(), &page, &router).expect("tracker");

        assert_eq!(
            page.command_values(),
            vec![
                json!(["trackPageView"]),
                json!(["enableLinkTracking"]),
                json!(["setTrackerUrl", "https://m.example.com/matomo.php"]),
                json!(["setSiteId", "1"]),
            ]
        );
        assert_eq!(page.scripts().len(), 1);
        assert_eq!(router.handler_count(), 2);
        assert_eq!(tracker.previous_url(), "/landing");
    }

    #[test]
    fn missing_url_disables_tracking() {
        let page = Page::new();
        let router = MemoryRouter::new();
        assert!(track_pages_router(&TrackerSettings::default(), &page, &router).is_none());
        assert!(page.queue().is_none());
        assert_eq!(router.handler_count(), 0);
    }

    #[test]
    fn excluded_landing_page_skips_initial_page_view() {
        let page = Page::with_location(Location {
            origin: "https://shop.example.com".to_string(),
            pathname: "/login".to_string(),
        });
        let router = MemoryRouter::new();
        let settings = TrackerSettings {
            exclude_urls_patterns: vec![Regex::new("^/login").expect("regex")],
            ..settings()
        };
        track_pages_router(&settings, &page, &router).expect("tracker");
        assert_eq!(page.command_values()[0], json!(["enableLinkTracking"]));
    }

    #[test]
    fn navigation_pushes_url_then_deferred_title_and_page_view() {
        let (page, router) = setup(settings());
        page.set_title("About us");

        router.navigate("/about");
        assert_eq!(
            page.command_values(),
            vec![
                json!(["setReferrerUrl", "/"]),
                json!(["setCustomUrl", "/about"]),
                json!(["deleteCustomVariables", "page"]),
            ]
        );

        assert_eq!(page.run_pending(), 1);
        let values = page.command_values();
        assert_eq!(values[3], json!(["setDocumentTitle", "About us"]));
        assert_eq!(values[4], json!(["trackPageView"]));
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn referrer_chains_through_navigations() {
        let (page, router) = setup(settings());
        navigate(&page, &router, "/a");
        let b = navigate(&page, &router, "/b");
        let c = navigate(&page, &router, "/c");
        assert_eq!(b[0], json!(["setReferrerUrl", "/a"]));
        assert_eq!(c[0], json!(["setReferrerUrl", "/b"]));
    }

    #[test]
    fn clean_url_strips_query_except_on_search_routes() {
        let (page, router) = setup(TrackerSettings {
            clean_url: true,
            ..settings()
        });

        let products = navigate(&page, &router, "/products?id=123&cat=x#y");
        assert_eq!(products[1], json!(["setCustomUrl", "/products"]));

        let search = navigate(&page, &router, "/search?q=test&page=2");
        assert_eq!(search[0], json!(["setReferrerUrl", "/products"]));
        assert_eq!(search[1], json!(["setCustomUrl", "/search?q=test&page=2"]));
        assert_eq!(search[4], json!(["trackSiteSearch", "test"]));
        assert!(!search.contains(&json!(["trackPageView"])));

        let next = navigate(&page, &router, "/home");
        assert_eq!(next[0], json!(["setReferrerUrl", "/search?q=test&page=2"]));
    }

    #[test]
    fn hash_is_dropped_without_clean_url() {
        let (page, router) = setup(settings());
        let values = navigate(&page, &router, "/docs?v=2#install");
        assert_eq!(values[1], json!(["setCustomUrl", "/docs?v=2"]));
    }

    #[test]
    fn search_keyword_is_decoded_and_defaults_to_empty() {
        let (page, router) = setup(TrackerSettings {
            search_keyword: "term".to_string(),
            ..settings()
        });
        let found = navigate(&page, &router, "/recherche?term=caf%C3%A9+cr%C3%A8me");
        assert_eq!(found[4], json!(["trackSiteSearch", "café crème"]));

        let empty = navigate(&page, &router, "/search");
        assert_eq!(empty[4], json!(["trackSiteSearch", ""]));
    }

    #[test]
    fn excluded_routes_push_nothing() {
        let (page, router) = setup(TrackerSettings {
            exclude_urls_patterns: vec![Regex::new("^/admin").expect("regex")],
            ..settings()
        });
        navigate(&page, &router, "/a");
        assert!(navigate(&page, &router, "/admin/users").is_empty());
        assert_eq!(page.ticks().pending(), 0);

        let after = navigate(&page, &router, "/b");
        assert_eq!(after[0], json!(["setReferrerUrl", "/a"]));
    }

    #[test]
    fn callbacks_receive_raw_route_after_deferred_work() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let started = Rc::clone(&seen);
        let completed = Rc::clone(&seen);
        let settings = TrackerSettings {
            clean_url: true,
            on_route_change_start: Some(Rc::new(move |r: &str| {
                started.borrow_mut().push(format!("start {r}"))
            })),
            on_route_change_complete: Some(Rc::new(move |r: &str| {
                completed.borrow_mut().push(format!("complete {r}"))
            })),
            ..settings()
        };
        let (page, router) = setup(settings);

        router.navigate("/p?x=1");
        assert_eq!(*seen.borrow(), vec!["start /p?x=1"]);
        page.run_pending();
        assert_eq!(*seen.borrow(), vec!["start /p?x=1", "complete /p?x=1"]);
    }

    #[test]
    fn initialization_callback_runs_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let (page, router) = setup(TrackerSettings {
            on_initialization: Some(Rc::new(move || counter.set(counter.get() + 1))),
            ..settings()
        });
        navigate(&page, &router, "/a");
        assert_eq!(calls.get(), 1);
    }
}
