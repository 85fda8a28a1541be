use crate::{FrameRequester, IdleDeadline};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct IdleQueueInner {
    tasks: VecDeque<Box<dyn FnOnce()>>,
    frame_requester: Rc<dyn FrameRequester>,
    idle_requested: bool,
}

/// Low priority work that runs when the host reports idle time.
///
/// At least one task runs per idle period so the queue always makes progress. Tasks scheduled
/// while the queue is running wait for the next idle period.
#[derive(Clone)]
pub struct IdleQueue {
    inner: Rc<RefCell<IdleQueueInner>>,
}

impl IdleQueue {
    pub fn new(frame_requester: Rc<dyn FrameRequester>) -> Self {
        IdleQueue {
            inner: Rc::new(RefCell::new(IdleQueueInner {
                tasks: VecDeque::default(),
                frame_requester,
                idle_requested: false,
            })),
        }
    }

    pub fn schedule(
        &self,
        task: impl FnOnce() + 'static,
    ) {
        let frame_requester = {
            let mut inner = self.inner.borrow_mut();
            inner.tasks.push_back(Box::new(task));
            if inner.idle_requested {
                None
            } else {
                inner.idle_requested = true;
                Some(inner.frame_requester.clone())
            }
        };

        if let Some(frame_requester) = frame_requester {
            frame_requester.request_idle();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().tasks.is_empty()
    }

    /// Runs queued tasks until the deadline runs out. Returns how many ran.
    #[profiling::function]
    pub fn run(
        &self,
        deadline: &dyn IdleDeadline,
    ) -> usize {
        let runnable = {
            let mut inner = self.inner.borrow_mut();
            inner.idle_requested = false;
            inner.tasks.len()
        };

        let mut ran = 0;
        while ran < runnable {
            if ran > 0 && deadline.time_remaining() <= 0.0 && !deadline.did_timeout() {
                break;
            }

            let task = self.inner.borrow_mut().tasks.pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
            ran += 1;
        }

        let frame_requester = {
            let mut inner = self.inner.borrow_mut();
            if !inner.tasks.is_empty() && !inner.idle_requested {
                inner.idle_requested = true;
                Some(inner.frame_requester.clone())
            } else {
                None
            }
        };

        if let Some(frame_requester) = frame_requester {
            log::trace!("IdleQueue ran {} tasks, requesting more idle time", ran);
            frame_requester.request_idle();
        }

        ran
    }
}
