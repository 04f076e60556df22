use crate::command::{Callback, Command, HeatmapCommand};
use crate::page::{Page, ScriptTag};
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

pub const HEATMAP_TRACKER_PATH: &str = "plugins/HeatmapSessionRecording/tracker.min.js";

/// Decides whether a recording/heatmap should run. Receives the config id
/// when the collector knows it.
pub type HeatmapTrigger = Rc<dyn Fn(Option<u32>) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigId {
    pub id: u32,
}

/// Explicit heatmap / session-recording ids passed to `addConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapManualConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<ConfigId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_recording: Option<ConfigId>,
}

#[derive(Clone)]
pub struct HeatmapConfig {
    pub capture_keystrokes: bool,
    pub record_movements: bool,
    /// Seconds.
    pub max_capture_time: Option<u32>,
    pub disable_auto_detect_new_page_view: bool,
    pub trigger: Option<HeatmapTrigger>,
    pub add_config: Option<HeatmapManualConfig>,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            capture_keystrokes: false,
            record_movements: true,
            max_capture_time: None,
            disable_auto_detect_new_page_view: false,
            trigger: None,
            add_config: None,
        }
    }
}

impl fmt::Debug for HeatmapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeatmapConfig")
            .field("capture_keystrokes", &self.capture_keystrokes)
            .field("record_movements", &self.record_movements)
            .field("max_capture_time", &self.max_capture_time)
            .field(
                "disable_auto_detect_new_page_view",
                &self.disable_auto_detect_new_page_view,
            )
            .field("trigger", &self.trigger.is_some())
            .field("add_config", &self.add_config)
            .finish()
    }
}

/// Commands pushed once the plugin script has loaded, `enable` excluded.
pub fn heatmap_commands(config: &HeatmapConfig, debug: bool) -> Vec<HeatmapCommand> {
    let mut commands = Vec::new();
    if debug {
        commands.push(HeatmapCommand::EnableDebugMode);
    }
    if !config.capture_keystrokes {
        commands.push(HeatmapCommand::DisableCaptureKeystrokes);
    }
    if !config.record_movements {
        commands.push(HeatmapCommand::DisableRecordMovements);
    }
    if let Some(seconds) = config.max_capture_time {
        commands.push(HeatmapCommand::SetMaxCaptureTime(seconds));
    }
    if config.disable_auto_detect_new_page_view {
        commands.push(HeatmapCommand::DisableAutoDetectNewPageView);
    }
    if let Some(trigger) = &config.trigger {
        commands.push(HeatmapCommand::SetTrigger(Rc::clone(trigger)));
    }
    if let Some(manual) = &config.add_config {
        commands.push(HeatmapCommand::AddConfig(manual.clone()));
    }
    commands
}

/// Injects the HeatmapSessionRecording plugin script. When it loads, the
/// configuration commands are pushed, then `enable` once the document has
/// finished loading.
pub fn load_heatmap_session_recording(
    page: &Page,
    url: &str,
    config: &HeatmapConfig,
    nonce: Option<&str>,
    on_error: Option<Callback>,
    debug: bool,
) {
    let src = format!("{}/{HEATMAP_TRACKER_PATH}", url.trim_end_matches('/'));
    if page.has_script(&src) {
        debug!(src = %src, "heatmap script already present");
        return;
    }

    let weak = page.downgrade();
    let config = config.clone();
    let on_load: Callback = Rc::new(move || {
        let Some(page) = weak.upgrade() else {
            return;
        };
        for command in heatmap_commands(&config, debug) {
            page.push(Command::Heatmap(command), debug);
        }
        enable_when_loaded(&page, debug);
    });

    page.insert_script(
        ScriptTag::new(src)
            .with_nonce(nonce.map(str::to_string))
            .on_load(on_load)
            .on_error(on_error),
    );
}

fn enable_when_loaded(page: &Page, debug: bool) {
    if page.is_loaded() {
        page.push(Command::Heatmap(HeatmapCommand::Enable), debug);
        return;
    }
    let weak = page.downgrade();
    page.add_load_listener(Rc::new(move || {
        if let Some(page) = weak.upgrade() {
            page.push(Command::Heatmap(HeatmapCommand::Enable), debug);
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(page: &Page) -> Vec<String> {
        page.command_values()
            .into_iter()
            .filter_map(|v| v[0].as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn commands_follow_config_in_order() {
        let config = HeatmapConfig {
            capture_keystrokes: false,
            record_movements: false,
            max_capture_time: Some(600),
            disable_auto_detect_new_page_view: true,
            trigger: Some(Rc::new(|_: Option<u32>| true)),
            add_config: Some(HeatmapManualConfig {
                heatmap: Some(ConfigId { id: 5 }),
                session_recording: None,
            }),
        };
        let rendered: Vec<_> = heatmap_commands(&config, true)
            .into_iter()
            .map(|c| Command::Heatmap(c).to_value())
            .collect();

        assert_eq!(
            rendered,
            vec![
                json!(["HeatmapSessionRecording::enableDebugMode"]),
                json!(["HeatmapSessionRecording::disableCaptureKeystrokes"]),
                json!(["HeatmapSessionRecording::disableRecordMovements"]),
                json!(["HeatmapSessionRecording::setMaxCaptureTime", 600]),
                json!(["HeatmapSessionRecording::disableAutoDetectNewPageView"]),
                json!(["HeatmapSessionRecording::setTrigger", "[callback]"]),
                json!(["HeatmapSessionRecording::addConfig", {"heatmap": {"id": 5}}]),
            ]
        );
    }

    #[test]
    fn defaults_only_disable_keystrokes() {
        let rendered: Vec<_> = heatmap_commands(&HeatmapConfig::default(), false)
            .iter()
            .map(HeatmapCommand::name)
            .collect();
        assert_eq!(rendered, vec!["HeatmapSessionRecording::disableCaptureKeystrokes"]);
    }

    #[test]
    fn enable_waits_for_window_load() {
        let page = Page::new();
        page.set_loading();
        load_heatmap_session_recording(
            &page,
            "https://m.example.com/",
            &HeatmapConfig {
                capture_keystrokes: true,
                ..HeatmapConfig::default()
            },
            Some("abc"),
            None,
            false,
        );

        let script = page.find_script(HEATMAP_TRACKER_PATH).expect("script");
        assert_eq!(
            script.src,
            "https://m.example.com/plugins/HeatmapSessionRecording/tracker.min.js"
        );
        assert_eq!(script.nonce.as_deref(), Some("abc"));
        assert!(script.is_async);

        assert!(page.fire_script_load(HEATMAP_TRACKER_PATH));
        assert!(names(&page).is_empty());

        page.fire_window_load();
        assert_eq!(names(&page), vec!["HeatmapSessionRecording::enable"]);
    }

    #[test]
    fn script_is_injected_once() {
        let page = Page::new();
        let config = HeatmapConfig::default();
        load_heatmap_session_recording(&page, "https://m.example.com", &config, None, None, false);
        load_heatmap_session_recording(&page, "https://m.example.com", &config, None, None, false);
        assert_eq!(page.scripts().len(), 1);
    }
}
