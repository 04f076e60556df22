use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// Work deferred to the next turn of the host's event loop.
///
/// The host drives it by calling [`TickQueue::run_pending`] once per turn.
#[derive(Clone, Default)]
pub struct TickQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TickQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Runs the tasks queued before this call. Tasks deferred while running
    /// wait for the next turn.
    pub fn run_pending(&self) -> usize {
        let batch = self.pending();
        for _ in 0..batch {
            let next = self.tasks.borrow_mut().pop_front();
            match next {
                Some(task) => task(),
                None => return batch,
            }
        }
        batch
    }

    /// Turns the loop until nothing is left.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.pending() > 0 {
            ran += self.run_pending();
        }
        ran
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("pending", &self.pending())
            .finish()
    }
}
