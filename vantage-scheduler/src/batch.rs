use crate::FrameRequester;
use std::cell::RefCell;
use std::rc::Rc;
use vantage_base::{ObjectPool, Pooled};

// Queue vectors kept around between cycles
const QUEUE_POOL_SIZE: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Phase {
    Read,
    Write,
}

enum OpCallback<S> {
    Read(Box<dyn FnOnce(&S)>),
    Write(Box<dyn FnOnce(&mut S)>),
}

// A queued measure() or mutate(). Runs exactly once, in sequence order within its phase.
struct ScheduledOp<S> {
    callback: OpCallback<S>,
    sequence: u64,
}

impl<S> ScheduledOp<S> {
    fn phase(&self) -> Phase {
        match self.callback {
            OpCallback::Read(_) => Phase::Read,
            OpCallback::Write(_) => Phase::Write,
        }
    }
}

type OpQueue<S> = Vec<ScheduledOp<S>>;

/// The eventual result of a `measure` or `mutate` call. It fills in when the cycle containing
/// the operation runs.
pub struct Pending<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Pending {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Pending<T> {
    fn new() -> Self {
        Pending {
            slot: Rc::new(RefCell::new(None)),
        }
    }

    fn fill(
        &self,
        value: T,
    ) {
        *self.slot.borrow_mut() = Some(value);
    }

    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Takes the result out, leaving this pending empty again
    pub fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }

    pub fn with<R>(
        &self,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        self.slot.borrow().as_ref().map(f)
    }
}

impl<T: Clone> Pending<T> {
    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// What a single call to [`BatchScheduler::run_cycle`] did
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct CycleStats {
    pub reads: usize,
    pub writes: usize,
    // True if work was enqueued during the cycle and another frame was requested for it
    pub follow_up_scheduled: bool,
}

struct BatchSchedulerInner<S> {
    reads: Pooled<OpQueue<S>>,
    writes: Pooled<OpQueue<S>>,
    queue_pool: ObjectPool<OpQueue<S>>,

    frame_requester: Rc<dyn FrameRequester>,
    // A frame has been requested and has not run yet
    frame_requested: bool,
    // Set while run_cycle is draining. Anything enqueued now waits for the next cycle.
    in_cycle: bool,

    next_sequence: u64,
    cycles_run: u64,
}

/// Coalesces reads and writes against a host surface `S` so that within one cycle every queued
/// read runs before any queued write.
///
/// This is a handle, cloning it is cheap and all clones share the same queues. Callbacks are free
/// to capture a clone and enqueue more work. That work never runs inline, it is deferred to the
/// next cycle.
pub struct BatchScheduler<S> {
    inner: Rc<RefCell<BatchSchedulerInner<S>>>,
}

impl<S> Clone for BatchScheduler<S> {
    fn clone(&self) -> Self {
        BatchScheduler {
            inner: self.inner.clone(),
        }
    }
}

impl<S: 'static> BatchScheduler<S> {
    pub fn new(frame_requester: Rc<dyn FrameRequester>) -> Self {
        let mut queue_pool = ObjectPool::new(
            QUEUE_POOL_SIZE,
            OpQueue::<S>::new,
            |queue: &mut OpQueue<S>| queue.clear(),
        );
        let reads = queue_pool.acquire();
        let writes = queue_pool.acquire();

        let inner = BatchSchedulerInner {
            reads,
            writes,
            queue_pool,
            frame_requester,
            frame_requested: false,
            in_cycle: false,
            next_sequence: 0,
            cycles_run: 0,
        };

        BatchScheduler {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Queue a read of the surface. The result is available once the next cycle has run.
    pub fn measure<T: 'static>(
        &self,
        f: impl FnOnce(&S) -> T + 'static,
    ) -> Pending<T> {
        let pending = Pending::new();
        let result = pending.clone();
        self.enqueue(OpCallback::Read(Box::new(move |surface: &S| {
            result.fill(f(surface))
        })));
        pending
    }

    /// Queue a mutation of the surface. It runs after every read queued for the same cycle.
    pub fn mutate<T: 'static>(
        &self,
        f: impl FnOnce(&mut S) -> T + 'static,
    ) -> Pending<T> {
        let pending = Pending::new();
        let result = pending.clone();
        self.enqueue(OpCallback::Write(Box::new(move |surface: &mut S| {
            result.fill(f(surface))
        })));
        pending
    }

    fn enqueue(
        &self,
        callback: OpCallback<S>,
    ) {
        let frame_requester = {
            let mut inner = self.inner.borrow_mut();
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;

            let op = ScheduledOp { callback, sequence };
            log::trace!("enqueue {:?} op {}", op.phase(), sequence);
            match op.phase() {
                Phase::Read => inner.reads.push(op),
                Phase::Write => inner.writes.push(op),
            }

            if inner.frame_requested || inner.in_cycle {
                // Either a frame is already on the way or run_cycle will request one when done
                None
            } else {
                inner.frame_requested = true;
                Some(inner.frame_requester.clone())
            }
        };

        // Called without holding the borrow in case the host runs the cycle right away
        if let Some(frame_requester) = frame_requester {
            frame_requester.request_frame();
        }
    }

    pub fn pending_reads(&self) -> usize {
        self.inner.borrow().reads.len()
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.borrow().writes.len()
    }

    pub fn is_frame_requested(&self) -> bool {
        self.inner.borrow().frame_requested
    }

    pub fn cycles_run(&self) -> u64 {
        self.inner.borrow().cycles_run
    }

    /// Drops all queued operations. Their `Pending` results never fill.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.reads.clear();
        inner.writes.clear();
    }

    /// Run one cycle. The host calls this from its frame callback.
    ///
    /// Everything queued when the cycle starts runs: all reads in enqueue order, then all writes
    /// in enqueue order. Operations queued by those callbacks wait for the following cycle.
    #[profiling::function]
    pub fn run_cycle(
        &self,
        surface: &mut S,
    ) -> CycleStats {
        let (mut reads, mut writes) = {
            let mut inner = self.inner.borrow_mut();
            if inner.in_cycle {
                log::warn!("BatchScheduler::run_cycle called re-entrantly, ignoring");
                return CycleStats::default();
            }

            inner.frame_requested = false;
            inner.in_cycle = true;
            let fresh_reads = inner.queue_pool.acquire();
            let fresh_writes = inner.queue_pool.acquire();
            (
                std::mem::replace(&mut inner.reads, fresh_reads),
                std::mem::replace(&mut inner.writes, fresh_writes),
            )
        };

        let mut stats = CycleStats {
            reads: reads.len(),
            writes: writes.len(),
            follow_up_scheduled: false,
        };

        {
            profiling::scope!("BatchScheduler reads");
            for op in reads.drain(..) {
                if let OpCallback::Read(callback) = op.callback {
                    callback(surface);
                }
            }
        }

        {
            profiling::scope!("BatchScheduler writes");
            for op in writes.drain(..) {
                if let OpCallback::Write(callback) = op.callback {
                    callback(surface);
                }
            }
        }

        let frame_requester = {
            let mut inner = self.inner.borrow_mut();
            inner.queue_pool.release(reads);
            inner.queue_pool.release(writes);
            inner.in_cycle = false;
            inner.cycles_run += 1;

            let has_follow_up = !inner.reads.is_empty() || !inner.writes.is_empty();
            if has_follow_up && !inner.frame_requested {
                inner.frame_requested = true;
                stats.follow_up_scheduled = true;
                Some(inner.frame_requester.clone())
            } else {
                None
            }
        };

        log::trace!(
            "cycle ran {} reads, {} writes, follow up: {}",
            stats.reads,
            stats.writes,
            stats.follow_up_scheduled
        );

        if let Some(frame_requester) = frame_requester {
            frame_requester.request_frame();
        }

        stats
    }
}
