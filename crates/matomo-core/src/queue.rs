use crate::command::Command;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("method \"{method}\" is not available on the collector yet")]
    MethodUnavailable { method: String },
}

/// The live collector once its script has loaded. Until one is attached,
/// pushed commands only accumulate in the queue.
pub trait Collector {
    fn apply(&self, command: &Command) -> Result<(), PushError>;
}

#[derive(Default)]
struct QueueInner {
    entries: Vec<Command>,
    collector: Option<Rc<dyn Collector>>,
}

/// Shared, append-only command queue (`_paq`).
///
/// Clones share the same underlying log.
#[derive(Clone, Default)]
pub struct CommandQueue {
    inner: Rc<RefCell<QueueInner>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `command`, then forwards it to the attached collector if any.
    pub fn push(&self, command: Command) -> Result<(), PushError> {
        let collector = {
            let mut inner = self.inner.borrow_mut();
            inner.entries.push(command.clone());
            inner.collector.clone()
        };
        match collector {
            Some(collector) => collector.apply(&command),
            None => Ok(()),
        }
    }

    /// Attaches the live collector and replays the backlog into it. Returns
    /// the errors of commands the collector rejected; they stay in the log.
    pub fn attach(&self, collector: Rc<dyn Collector>) -> Vec<PushError> {
        let backlog = {
            let mut inner = self.inner.borrow_mut();
            inner.collector = Some(Rc::clone(&collector));
            inner.entries.clone()
        };
        backlog
            .iter()
            .filter_map(|command| collector.apply(command).err())
            .collect()
    }

    pub fn detach(&self) {
        self.inner.borrow_mut().collector = None;
    }

    pub fn has_collector(&self) -> bool {
        self.inner.borrow().collector.is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.borrow().entries.clone()
    }

    pub fn to_values(&self) -> Vec<Value> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(Command::to_value)
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .borrow()
            .entries
            .iter()
            .filter_map(|c| c.name().map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().entries.clear();
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_values()).finish()
    }
}

/// Pushes `command` and never fails. When the collector rejects it, the
/// command still sits in the queue; a warning is emitted if `debug` is set.
pub fn safe_push(queue: &CommandQueue, command: Command, debug: bool) {
    let method = command.name().unwrap_or("[callback]").to_string();
    match queue.push(command) {
        Ok(()) => trace!(method = %method, "command queued"),
        Err(err) => {
            if debug {
                warn!(
                    error = %err,
                    "Matomo: Method \"{method}\" may not be available yet. Command queued."
                );
            }
        }
    }
}
