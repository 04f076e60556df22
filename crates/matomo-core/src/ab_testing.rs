//! A/B experiment registration and the readiness/variant store.
//!
//! Each registered experiment gets a placeholder entry in the page's
//! [`ExperimentStore`] and an `AbTesting::create` command whose variations
//! carry activation closures. The collector calls one of those closures for
//! the current visitor, which records the chosen variant.

use crate::command::{Callback, Command, Trigger};
use crate::page::Page;
use crate::queue::safe_push;
use crate::url::matches_any_pattern;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentState {
    pub ab_test: String,
    pub variant: Option<String>,
    pub is_ready: bool,
}

impl ExperimentState {
    fn pending(name: &str) -> Self {
        Self {
            ab_test: name.to_string(),
            variant: None,
            is_ready: false,
        }
    }
}

/// Process-wide experiment name -> state map. Clones share the map.
#[derive(Clone, Default)]
pub struct ExperimentStore {
    entries: Rc<RefCell<BTreeMap<String, ExperimentState>>>,
}

impl ExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ExperimentState> {
        self.entries.borrow().get(name).cloned()
    }

    /// The activated variant; `None` until the collector has picked one.
    pub fn variant(&self, name: &str) -> Option<String> {
        self.get(name)
            .filter(|state| state.is_ready)
            .and_then(|state| state.variant)
    }

    /// Inserts a pending entry unless one exists. Returns whether it did.
    pub fn register(&self, name: &str) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(name) {
            return false;
        }
        entries.insert(name.to_string(), ExperimentState::pending(name));
        true
    }

    pub fn activate(&self, name: &str, variant: &str) {
        self.entries.borrow_mut().insert(
            name.to_string(),
            ExperimentState {
                ab_test: name.to_string(),
                variant: Some(variant.to_string()),
                is_ready: true,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl fmt::Debug for ExperimentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.borrow().iter()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variation {
    pub name: String,
}

#[derive(Clone)]
pub struct ExperimentDefinition {
    pub name: String,
    /// Share of visitors in the experiment, 0 to 100.
    pub percentage: u8,
    pub variations: Vec<Variation>,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
    pub trigger: Option<Trigger>,
}

impl ExperimentDefinition {
    pub fn new<I, S>(name: impl Into<String>, percentage: u8, variations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            percentage: percentage.min(100),
            variations: variations
                .into_iter()
                .map(|v| Variation { name: v.into() })
                .collect(),
            start_date_time: None,
            end_date_time: None,
            trigger: None,
        }
    }

    pub fn starting(mut self, iso8601: impl Into<String>) -> Self {
        self.start_date_time = Some(iso8601.into());
        self
    }

    pub fn ending(mut self, iso8601: impl Into<String>) -> Self {
        self.end_date_time = Some(iso8601.into());
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

impl fmt::Debug for ExperimentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentDefinition")
            .field("name", &self.name)
            .field("percentage", &self.percentage)
            .field("variations", &self.variations)
            .field("start_date_time", &self.start_date_time)
            .field("end_date_time", &self.end_date_time)
            .field("trigger", &self.trigger.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub attribute: String,
    pub inverted: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Target {
    /// Matches every URL.
    pub fn any_url() -> Self {
        Self {
            attribute: "url".to_string(),
            inverted: "0".to_string(),
            kind: "any".to_string(),
            value: String::new(),
        }
    }
}

fn always() -> Trigger {
    Rc::new(|| true)
}

#[derive(Clone)]
pub struct VariationConfig {
    pub name: String,
    pub activate: Callback,
}

/// Argument of `AbTesting::create`.
#[derive(Clone)]
pub struct AbTestConfig {
    pub name: String,
    pub percentage: u8,
    pub included_targets: Vec<Target>,
    pub excluded_targets: Vec<Target>,
    pub variations: Vec<VariationConfig>,
    pub trigger: Trigger,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
}

impl AbTestConfig {
    fn build(definition: &ExperimentDefinition, store: &ExperimentStore) -> Self {
        let variations = definition
            .variations
            .iter()
            .map(|variation| {
                let store = store.clone();
                let experiment = definition.name.clone();
                let chosen = variation.name.clone();
                VariationConfig {
                    name: variation.name.clone(),
                    activate: Rc::new(move || store.activate(&experiment, &chosen)),
                }
            })
            .collect();

        Self {
            name: definition.name.clone(),
            percentage: definition.percentage,
            included_targets: vec![Target::any_url()],
            excluded_targets: Vec::new(),
            variations,
            trigger: definition.trigger.clone().unwrap_or_else(always),
            start_date_time: definition.start_date_time.clone(),
            end_date_time: definition.end_date_time.clone(),
        }
    }

    /// Calls the activation closure of `variation`, as the collector would.
    pub fn activate(&self, variation: &str) -> bool {
        match self.variations.iter().find(|v| v.name == variation) {
            Some(v) => {
                (v.activate)();
                true
            }
            None => false,
        }
    }

    pub fn should_participate(&self) -> bool {
        (self.trigger)()
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("name".to_string(), json!(self.name));
        object.insert("percentage".to_string(), json!(self.percentage));
        object.insert("includedTargets".to_string(), json!(self.included_targets));
        object.insert("excludedTargets".to_string(), json!(self.excluded_targets));
        object.insert(
            "variations".to_string(),
            Value::Array(
                self.variations
                    .iter()
                    .map(|v| json!({"name": v.name, "activate": "[callback]"}))
                    .collect(),
            ),
        );
        object.insert("trigger".to_string(), json!("[callback]"));
        if let Some(start) = &self.start_date_time {
            object.insert("startDateTime".to_string(), json!(start));
        }
        if let Some(end) = &self.end_date_time {
            object.insert("endDateTime".to_string(), json!(end));
        }
        Value::Object(object)
    }
}

impl fmt::Debug for AbTestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InitAbTestingParams<'a> {
    pub enabled: bool,
    pub pathname: &'a str,
    pub exclude_urls_patterns: &'a [Regex],
    pub tests: &'a [ExperimentDefinition],
    pub debug: bool,
}

/// Registers every experiment in declaration order and pushes one
/// `AbTesting::create` per experiment. Returns how many were pushed.
///
/// Nothing happens when disabled, when the pathname is empty or excluded,
/// when there are no experiments, or when the page has no queue yet.
pub fn init_ab_testing(page: &Page, params: InitAbTestingParams<'_>) -> usize {
    if !params.enabled || params.pathname.is_empty() || params.tests.is_empty() {
        return 0;
    }
    if matches_any_pattern(params.pathname, params.exclude_urls_patterns) {
        debug!(pathname = params.pathname, "a/b testing skipped for excluded path");
        return 0;
    }
    let Some(queue) = page.queue() else {
        debug!("a/b testing skipped, command queue missing");
        return 0;
    };

    let store = page.ensure_ab_tests();
    for definition in params.tests {
        store.register(&definition.name);
        let config = AbTestConfig::build(definition, &store);
        safe_push(&queue, Command::AbTestingCreate(config), params.debug);
    }
    params.tests.len()
}

/// Stored state of `name`, or `None` if the store or the entry does not exist.
pub fn get_ab_test_state(page: &Page, name: &str) -> Option<ExperimentState> {
    page.ab_tests()?.get(name)
}
