use crate::command::{Command, EventLabel};
use crate::page::Page;

/// A `trackEvent` payload. A value can only be attached together with a
/// name.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
    pub category: String,
    pub action: String,
    pub label: Option<EventLabel>,
}

impl TrackEvent {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            label: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.label = Some(EventLabel {
            name: name.into(),
            value: None,
        });
        self
    }

    pub fn valued(mut self, name: impl Into<String>, value: f64) -> Self {
        self.label = Some(EventLabel {
            name: name.into(),
            value: Some(value),
        });
        self
    }
}

impl From<TrackEvent> for Command {
    fn from(event: TrackEvent) -> Self {
        Command::TrackEvent {
            category: event.category,
            action: event.action,
            label: event.label,
        }
    }
}

/// Queues a `trackEvent`. With `debug` set, a rejection by the live
/// collector is logged.
pub fn send_event(page: &Page, event: TrackEvent, debug: bool) {
    page.push(event.into(), debug);
}

/// Pushes an arbitrary command tuple.
pub fn push(page: &Page, command: Command, debug: bool) {
    page.push(command, debug);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::testing::{Rejecting, captured_logs};
    use serde_json::json;
    use std::rc::Rc;

    #[test]
    fn events_carry_optional_name_and_value() {
        let page = Page::new();
        send_event(&page, TrackEvent::new("contact", "click phone"), false);
        send_event(&page, TrackEvent::new("nav", "open").named("menu"), false);
        send_event(&page, TrackEvent::new("purchase", "buy").valued("sku-1", 12.5), false);

        assert_eq!(
            page.command_values(),
            vec![
                json!(["trackEvent", "contact", "click phone"]),
                json!(["trackEvent", "nav", "open", "menu"]),
                json!(["trackEvent", "purchase", "buy", "sku-1", 12.5]),
            ]
        );
    }

    #[test]
    fn push_creates_the_queue() {
        let page = Page::new();
        push(&page, Command::SetUserId("u-1".to_string()), false);
        assert_eq!(page.command_values(), vec![json!(["setUserId", "u-1"])]);
    }

    #[test]
    fn rejected_event_is_logged_only_in_debug() {
        let page = Page::new();
        page.ensure_queue().attach(Rc::new(Rejecting("trackEvent")));

        let quiet = captured_logs(|| send_event(&page, TrackEvent::new("nav", "open"), false));
        assert!(!quiet.contains("may not be available yet"));

        let loud = captured_logs(|| send_event(&page, TrackEvent::new("nav", "close"), true));
        assert!(loud.contains("Matomo: Method \"trackEvent\" may not be available yet"));
        assert_eq!(page.commands().len(), 2);
    }
}
