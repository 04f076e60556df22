use crate::ab_testing::AbTestConfig;
use crate::heatmap::{HeatmapManualConfig, HeatmapTrigger};
use serde_json::{Value, json};
use std::fmt;
use std::rc::Rc;

/// Zero-argument closure handed to the collector (variant activation, queued functions).
pub type Callback = Rc<dyn Fn()>;
/// Participation predicate evaluated by the collector.
pub type Trigger = Rc<dyn Fn() -> bool>;

pub const CALLBACK_PLACEHOLDER: &str = "[callback]";

#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Callback(Callback),
}

impl Arg {
    pub fn to_value(&self) -> Value {
        match self {
            Arg::Value(v) => v.clone(),
            Arg::Callback(_) => Value::String(CALLBACK_PLACEHOLDER.to_string()),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => write!(f, "{v}"),
            Arg::Callback(_) => f.write_str(CALLBACK_PLACEHOLDER),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Value(Value::String(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Value(Value::Bool(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Value(json!(value))
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Value(json!(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Value(json!(value))
    }
}

impl From<Callback> for Arg {
    fn from(value: Callback) -> Self {
        Arg::Callback(value)
    }
}

/// Optional name/value pair of a `trackEvent` command. A value cannot be sent
/// without a name.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLabel {
    pub name: String,
    pub value: Option<f64>,
}

/// Commands of the HeatmapSessionRecording plugin.
#[derive(Clone)]
pub enum HeatmapCommand {
    EnableDebugMode,
    DisableCaptureKeystrokes,
    DisableRecordMovements,
    SetMaxCaptureTime(u32),
    DisableAutoDetectNewPageView,
    SetTrigger(HeatmapTrigger),
    AddConfig(HeatmapManualConfig),
    Enable,
}

impl HeatmapCommand {
    pub fn name(&self) -> &'static str {
        match self {
            HeatmapCommand::EnableDebugMode => "HeatmapSessionRecording::enableDebugMode",
            HeatmapCommand::DisableCaptureKeystrokes => {
                "HeatmapSessionRecording::disableCaptureKeystrokes"
            }
            HeatmapCommand::DisableRecordMovements => {
                "HeatmapSessionRecording::disableRecordMovements"
            }
            HeatmapCommand::SetMaxCaptureTime(_) => "HeatmapSessionRecording::setMaxCaptureTime",
            HeatmapCommand::DisableAutoDetectNewPageView => {
                "HeatmapSessionRecording::disableAutoDetectNewPageView"
            }
            HeatmapCommand::SetTrigger(_) => "HeatmapSessionRecording::setTrigger",
            HeatmapCommand::AddConfig(_) => "HeatmapSessionRecording::addConfig",
            HeatmapCommand::Enable => "HeatmapSessionRecording::enable",
        }
    }

    fn args(&self) -> Vec<Value> {
        match self {
            HeatmapCommand::SetMaxCaptureTime(seconds) => vec![json!(seconds)],
            HeatmapCommand::SetTrigger(_) => vec![json!(CALLBACK_PLACEHOLDER)],
            HeatmapCommand::AddConfig(config) => {
                vec![serde_json::to_value(config).unwrap_or(Value::Null)]
            }
            _ => Vec::new(),
        }
    }
}

/// A tuple pushed to the collector queue: `[name, ...args]`.
///
/// Known shapes are typed so that the trackers cannot emit a malformed
/// command; anything else goes through [`Command::Custom`].
#[derive(Clone)]
pub enum Command {
    TrackPageView,
    EnableLinkTracking,
    DisableCookies,
    SetTrackerUrl(String),
    SetSiteId(String),
    SetReferrerUrl(String),
    SetCustomUrl(String),
    DeleteCustomVariables(String),
    SetDocumentTitle(String),
    TrackSiteSearch {
        keyword: String,
        category: Option<String>,
        result_count: Option<u64>,
    },
    EnableHeartBeatTimer(Option<u32>),
    SetCustomDimension(u32, String),
    TrackGoal(u32, Option<f64>),
    SetUserId(String),
    TrackEvent {
        category: String,
        action: String,
        label: Option<EventLabel>,
    },
    Heatmap(HeatmapCommand),
    AbTestingCreate(AbTestConfig),
    Custom {
        name: String,
        args: Vec<Arg>,
    },
    Callback(Callback),
}

impl Command {
    pub fn custom<I, A>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Command::Custom {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn site_search(keyword: impl Into<String>) -> Self {
        Command::TrackSiteSearch {
            keyword: keyword.into(),
            category: None,
            result_count: None,
        }
    }

    /// Method name as the collector sees it; queued functions have none.
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            Command::TrackPageView => "trackPageView",
            Command::EnableLinkTracking => "enableLinkTracking",
            Command::DisableCookies => "disableCookies",
            Command::SetTrackerUrl(_) => "setTrackerUrl",
            Command::SetSiteId(_) => "setSiteId",
            Command::SetReferrerUrl(_) => "setReferrerUrl",
            Command::SetCustomUrl(_) => "setCustomUrl",
            Command::DeleteCustomVariables(_) => "deleteCustomVariables",
            Command::SetDocumentTitle(_) => "setDocumentTitle",
            Command::TrackSiteSearch { .. } => "trackSiteSearch",
            Command::EnableHeartBeatTimer(_) => "enableHeartBeatTimer",
            Command::SetCustomDimension(..) => "setCustomDimension",
            Command::TrackGoal(..) => "trackGoal",
            Command::SetUserId(_) => "setUserId",
            Command::TrackEvent { .. } => "trackEvent",
            Command::Heatmap(cmd) => cmd.name(),
            Command::AbTestingCreate(_) => "AbTesting::create",
            Command::Custom { name, .. } => name.as_str(),
            Command::Callback(_) => return None,
        };
        Some(name)
    }

    /// JSON rendering of the tuple. Closures render as `"[callback]"`.
    pub fn to_value(&self) -> Value {
        let mut items = Vec::<Value>::new();
        match self.name() {
            Some(name) => items.push(Value::String(name.to_string())),
            None => items.push(Value::String(CALLBACK_PLACEHOLDER.to_string())),
        }

        match self {
            Command::SetTrackerUrl(s)
            | Command::SetSiteId(s)
            | Command::SetReferrerUrl(s)
            | Command::SetCustomUrl(s)
            | Command::DeleteCustomVariables(s)
            | Command::SetDocumentTitle(s)
            | Command::SetUserId(s) => items.push(json!(s)),
            Command::TrackSiteSearch {
                keyword,
                category,
                result_count,
            } => {
                items.push(json!(keyword));
                match (category, result_count) {
                    (Some(c), Some(n)) => {
                        items.push(json!(c));
                        items.push(json!(n));
                    }
                    (Some(c), None) => items.push(json!(c)),
                    (None, Some(n)) => {
                        items.push(Value::Null);
                        items.push(json!(n));
                    }
                    (None, None) => {}
                }
            }
            Command::EnableHeartBeatTimer(Some(seconds)) => items.push(json!(seconds)),
            Command::SetCustomDimension(id, value) => {
                items.push(json!(id));
                items.push(json!(value));
            }
            Command::TrackGoal(id, revenue) => {
                items.push(json!(id));
                if let Some(r) = revenue {
                    items.push(json!(r));
                }
            }
            Command::TrackEvent {
                category,
                action,
                label,
            } => {
                items.push(json!(category));
                items.push(json!(action));
                if let Some(label) = label {
                    items.push(json!(label.name));
                    if let Some(value) = label.value {
                        items.push(json!(value));
                    }
                }
            }
            Command::Heatmap(cmd) => items.extend(cmd.args()),
            Command::AbTestingCreate(config) => items.push(config.to_value()),
            Command::Custom { args, .. } => items.extend(args.iter().map(Arg::to_value)),
            _ => {}
        }

        Value::Array(items)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
