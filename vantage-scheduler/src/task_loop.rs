use crate::FrameRequester;
use std::cell::RefCell;
use std::rc::Rc;
use vantage_base::hashing::HashSet;

type Tick = Box<dyn FnMut(f64) -> bool>;

struct TaskEntry {
    id: String,
    priority: i32,
    // Registration order, breaks ties between equal priorities
    order: u64,
    tick: Tick,
}

struct TaskLoopInner {
    // Sorted by priority (highest first), then registration order
    tasks: Vec<TaskEntry>,
    frame_requester: Rc<dyn FrameRequester>,
    frame_requested: bool,
    running: bool,
    // Removals requested by ticks while their own frame is running
    removed_while_running: HashSet<String>,
    last_frame_time: Option<f64>,
    next_order: u64,
}

impl TaskLoopInner {
    fn sort(&mut self) {
        self.tasks.sort_by(|lhs, rhs| {
            rhs.priority
                .cmp(&lhs.priority)
                .then(lhs.order.cmp(&rhs.order))
        });
    }

    // Returns the requester if the caller should request a frame once the borrow is released
    fn frame_request(&mut self) -> Option<Rc<dyn FrameRequester>> {
        if self.frame_requested || self.running || self.tasks.is_empty() {
            None
        } else {
            self.frame_requested = true;
            Some(self.frame_requester.clone())
        }
    }
}

/// Runs registered ticks once per frame, highest priority first.
///
/// Each tick gets the milliseconds elapsed since the previous frame and returns `false` to
/// unregister itself. When no ticks are left the loop stops asking the host for frames.
#[derive(Clone)]
pub struct TaskLoop {
    inner: Rc<RefCell<TaskLoopInner>>,
}

impl TaskLoop {
    pub fn new(frame_requester: Rc<dyn FrameRequester>) -> Self {
        TaskLoop {
            inner: Rc::new(RefCell::new(TaskLoopInner {
                tasks: Vec::default(),
                frame_requester,
                frame_requested: false,
                running: false,
                removed_while_running: Default::default(),
                last_frame_time: None,
                next_order: 0,
            })),
        }
    }

    /// Registers a tick. An existing tick with the same id is replaced.
    pub fn add(
        &self,
        id: impl Into<String>,
        priority: i32,
        tick: impl FnMut(f64) -> bool + 'static,
    ) {
        let id = id.into();
        let frame_requester = {
            let mut inner = self.inner.borrow_mut();
            if inner.tasks.iter().any(|task| task.id == id) {
                log::debug!("TaskLoop replacing tick {}", id);
                inner.tasks.retain(|task| task.id != id);
            }

            // A tick re-added during the frame that removed it should stay
            inner.removed_while_running.remove(&id);

            let order = inner.next_order;
            inner.next_order += 1;
            inner.tasks.push(TaskEntry {
                id,
                priority,
                order,
                tick: Box::new(tick),
            });
            inner.sort();
            inner.frame_request()
        };

        if let Some(frame_requester) = frame_requester {
            frame_requester.request_frame();
        }
    }

    pub fn remove(
        &self,
        id: &str,
    ) {
        let mut inner = self.inner.borrow_mut();
        inner.tasks.retain(|task| task.id != id);
        if inner.running {
            inner.removed_while_running.insert(id.to_string());
        }
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.inner.borrow().tasks.iter().any(|task| task.id == id)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().tasks.is_empty()
    }

    pub fn is_frame_requested(&self) -> bool {
        self.inner.borrow().frame_requested
    }

    /// Run every tick once. `now` is the host's frame timestamp in milliseconds.
    #[profiling::function]
    pub fn run_frame(
        &self,
        now: f64,
    ) {
        let (mut running_tasks, elapsed) = {
            let mut inner = self.inner.borrow_mut();
            inner.frame_requested = false;
            if inner.tasks.is_empty() {
                inner.last_frame_time = None;
                return;
            }

            let elapsed = match inner.last_frame_time {
                Some(last) => (now - last).max(0.0),
                None => 0.0,
            };
            inner.last_frame_time = Some(now);
            inner.running = true;
            (std::mem::take(&mut inner.tasks), elapsed)
        };

        let mut finished = Vec::default();
        for task in &mut running_tasks {
            let removed = self
                .inner
                .borrow()
                .removed_while_running
                .contains(&task.id);
            if removed {
                continue;
            }

            if !(task.tick)(elapsed) {
                log::debug!("TaskLoop tick {} finished", task.id);
                finished.push(task.order);
            }
        }

        let frame_requester = {
            let mut inner = self.inner.borrow_mut();
            inner.running = false;
            let removed = std::mem::take(&mut inner.removed_while_running);

            // Ticks added during the frame are already in inner.tasks and win over older ones
            let added_ids: HashSet<String> = inner.tasks.iter().map(|task| task.id.clone()).collect();
            running_tasks.retain(|task| {
                !finished.contains(&task.order)
                    && !removed.contains(&task.id)
                    && !added_ids.contains(&task.id)
            });
            inner.tasks.append(&mut running_tasks);
            inner.sort();

            if inner.tasks.is_empty() {
                log::trace!("TaskLoop has no ticks left, going idle");
                inner.last_frame_time = None;
            }
            inner.frame_request()
        };

        if let Some(frame_requester) = frame_requester {
            frame_requester.request_frame();
        }
    }
}
