use crate::command::{Callback, Command};
use crate::heatmap::load_heatmap_session_recording;
use crate::page::{Page, ScriptTag};
use crate::settings::TrackerSettings;
use tracing::{debug, warn};

/// Pushes the collector configuration: cookies, link tracking, tracker URL
/// and site id, in that order.
pub fn configure_tracker(page: &Page, settings: &TrackerSettings) {
    let debug = settings.debug;
    if settings.disable_cookies {
        page.push(Command::DisableCookies, debug);
    }
    page.push(Command::EnableLinkTracking, debug);
    page.push(
        Command::SetTrackerUrl(format!(
            "{}/{}",
            settings.base_url(),
            settings.php_tracker_file
        )),
        debug,
    );
    page.push(Command::SetSiteId(settings.site_id.clone()), debug);
}

/// Injects the collector script (async, deferred, nonce). Does nothing if a
/// script with the same src is already present.
pub fn load_tracker_script(
    page: &Page,
    url: &str,
    js_tracker_file: &str,
    nonce: Option<&str>,
    on_error: Option<Callback>,
) {
    let src = format!("{}/{js_tracker_file}", url.trim_end_matches('/'));
    if page.has_script(&src) {
        debug!(src = %src, "collector script already present");
        return;
    }
    debug!(src = %src, "injecting collector script");
    page.insert_script(
        ScriptTag::new(src)
            .deferred(true)
            .with_nonce(nonce.map(str::to_string))
            .on_error(on_error),
    );
}

/// Pushes `enableHeartBeatTimer` when enabled, with the interval if given.
pub fn configure_heartbeat(page: &Page, settings: &TrackerSettings) {
    if settings.enable_heart_beat_timer {
        page.push(
            Command::EnableHeartBeatTimer(settings.heart_beat_timer_interval),
            settings.debug,
        );
    }
}

/// One-time collector setup shared by both navigation trackers.
pub(crate) fn bootstrap(page: &Page, settings: &TrackerSettings) {
    configure_tracker(page, settings);
    load_tracker_script(
        page,
        &settings.url,
        &settings.js_tracker_file,
        settings.nonce.as_deref(),
        settings.on_script_loading_error.clone(),
    );
    if settings.enable_heatmap_session_recording {
        load_heatmap_session_recording(
            page,
            &settings.url,
            &settings.heatmap_config,
            settings.nonce.as_deref(),
            settings.on_script_loading_error.clone(),
            settings.debug,
        );
    }
    configure_heartbeat(page, settings);
}

/// Tracking is disabled when no collector URL is set.
pub(crate) fn tracking_enabled(settings: &TrackerSettings) -> bool {
    if settings.url.is_empty() {
        if settings.debug {
            warn!("Matomo disabled, please provide matomo url");
        }
        return false;
    }
    true
}
