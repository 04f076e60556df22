use crate::ab_testing::ExperimentStore;
use crate::command::{Callback, Command};
use crate::queue::{CommandQueue, safe_push};
use crate::tick::TickQueue;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// A `<script>` element injected into the document head.
#[derive(Clone)]
pub struct ScriptTag {
    pub src: String,
    pub nonce: Option<String>,
    pub is_async: bool,
    pub defer: bool,
    on_load: Option<Callback>,
    on_error: Option<Callback>,
}

impl ScriptTag {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            nonce: None,
            is_async: true,
            defer: false,
            on_load: None,
            on_error: None,
        }
    }

    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn deferred(mut self, defer: bool) -> Self {
        self.defer = defer;
        self
    }

    pub fn on_load(mut self, callback: Callback) -> Self {
        self.on_load = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: Option<Callback>) -> Self {
        self.on_error = callback;
        self
    }
}

impl fmt::Debug for ScriptTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptTag")
            .field("src", &self.src)
            .field("nonce", &self.nonce)
            .field("is_async", &self.is_async)
            .field("defer", &self.defer)
            .field("on_load", &self.on_load.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub origin: String,
    pub pathname: String,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            pathname: "/".to_string(),
        }
    }
}

struct PageInner {
    queue: RefCell<Option<CommandQueue>>,
    ab_tests: RefCell<Option<ExperimentStore>>,
    title: RefCell<String>,
    location: RefCell<Location>,
    scripts: RefCell<Vec<ScriptTag>>,
    loaded: Cell<bool>,
    load_listeners: RefCell<Vec<Callback>>,
    ticks: TickQueue,
}

/// The browsing context the trackers write into: the shared command queue,
/// the experiment store, the document (title, location, script tags, load
/// state) and the tick queue.
///
/// Cloning yields another handle on the same page.
#[derive(Clone)]
pub struct Page {
    inner: Rc<PageInner>,
}

/// Non-owning handle, for closures that the page itself stores.
#[derive(Clone)]
pub struct WeakPage {
    inner: Weak<PageInner>,
}

impl WeakPage {
    pub fn upgrade(&self) -> Option<Page> {
        self.inner.upgrade().map(|inner| Page { inner })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    /// A fully loaded document at `http://localhost/`.
    pub fn new() -> Self {
        Self::with_location(Location::default())
    }

    pub fn with_location(location: Location) -> Self {
        Self {
            inner: Rc::new(PageInner {
                queue: RefCell::new(None),
                ab_tests: RefCell::new(None),
                title: RefCell::new(String::new()),
                location: RefCell::new(location),
                scripts: RefCell::new(Vec::new()),
                loaded: Cell::new(true),
                load_listeners: RefCell::new(Vec::new()),
                ticks: TickQueue::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakPage {
        WeakPage {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn queue(&self) -> Option<CommandQueue> {
        self.inner.queue.borrow().clone()
    }

    /// Returns the queue, creating it if absent. An existing queue is never
    /// replaced.
    pub fn ensure_queue(&self) -> CommandQueue {
        self.inner
            .queue
            .borrow_mut()
            .get_or_insert_with(CommandQueue::new)
            .clone()
    }

    pub fn remove_queue(&self) {
        self.inner.queue.borrow_mut().take();
    }

    /// Pushes through the safe path; creates the queue if needed.
    pub fn push(&self, command: Command, debug: bool) {
        safe_push(&self.ensure_queue(), command, debug);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.queue().map(|q| q.commands()).unwrap_or_default()
    }

    /// JSON snapshot of the queue, empty when none exists.
    pub fn command_values(&self) -> Vec<Value> {
        self.queue().map(|q| q.to_values()).unwrap_or_default()
    }

    pub fn clear_commands(&self) {
        if let Some(queue) = self.queue() {
            queue.clear();
        }
    }

    pub fn ab_tests(&self) -> Option<ExperimentStore> {
        self.inner.ab_tests.borrow().clone()
    }

    pub fn ensure_ab_tests(&self) -> ExperimentStore {
        self.inner
            .ab_tests
            .borrow_mut()
            .get_or_insert_with(ExperimentStore::new)
            .clone()
    }

    pub fn title(&self) -> String {
        self.inner.title.borrow().clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        *self.inner.title.borrow_mut() = title.into();
    }

    pub fn location(&self) -> Location {
        self.inner.location.borrow().clone()
    }

    pub fn set_pathname(&self, pathname: impl Into<String>) {
        self.inner.location.borrow_mut().pathname = pathname.into();
    }

    pub fn ticks(&self) -> &TickQueue {
        &self.inner.ticks
    }

    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.ticks.defer(task);
    }

    pub fn run_pending(&self) -> usize {
        self.inner.ticks.run_pending()
    }

    pub fn insert_script(&self, tag: ScriptTag) {
        self.inner.scripts.borrow_mut().push(tag);
    }

    pub fn scripts(&self) -> Vec<ScriptTag> {
        self.inner.scripts.borrow().clone()
    }

    pub fn has_script(&self, src: &str) -> bool {
        self.inner.scripts.borrow().iter().any(|s| s.src == src)
    }

    /// First script whose src contains `needle`.
    pub fn find_script(&self, needle: &str) -> Option<ScriptTag> {
        self.inner
            .scripts
            .borrow()
            .iter()
            .find(|s| s.src.contains(needle))
            .cloned()
    }

    /// Simulates the load event of the script matching `needle`.
    pub fn fire_script_load(&self, needle: &str) -> bool {
        match self.find_script(needle).and_then(|s| s.on_load) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Simulates the error event of the script matching `needle`.
    pub fn fire_script_error(&self, needle: &str) -> bool {
        match self.find_script(needle).and_then(|s| s.on_error) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.get()
    }

    pub fn set_loading(&self) {
        self.inner.loaded.set(false);
    }

    pub fn add_load_listener(&self, listener: Callback) {
        self.inner.load_listeners.borrow_mut().push(listener);
    }

    /// Marks the document loaded and runs each load listener once.
    pub fn fire_window_load(&self) {
        self.inner.loaded.set(true);
        let listeners = std::mem::take(&mut *self.inner.load_listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("location", &self.location())
            .field("title", &self.title())
            .field("queue", &self.queue())
            .field("scripts", &self.scripts())
            .finish()
    }
}
