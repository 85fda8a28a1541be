use crate::load_queue::LoadQueue;
use crate::storage::{HandleOp, LoadOp, ResourceLoader, ResourceUnloader};
use crate::visibility::VisibilityEvent;
use crossbeam_channel::{Receiver, Sender};
use vantage_base::hashing::HashMap;
use vantage_base::{ElementId, LoadHandle, RingBuffer};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResourceState {
    Idle,
    Queued,
    Loading,
    Loaded,
    Unloaded,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ResourceManagerConfig {
    // How many resources may be loading at once, at least 1
    pub max_concurrency: usize,
    // Multiplied by the intersection ratio and added to the base priority when queueing
    pub visibility_priority_weight: f64,
    // How many load starts load_history() remembers
    pub history_capacity: usize,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        ResourceManagerConfig {
            max_concurrency: 1,
            visibility_priority_weight: 1.0,
            history_capacity: 64,
        }
    }
}

pub struct ResourceOptions<T> {
    pub priority: f64,
    pub loader: Box<dyn ResourceLoader<T>>,
    pub unloader: Option<Box<dyn ResourceUnloader<T>>>,
}

impl<T> ResourceOptions<T> {
    pub fn new(
        priority: f64,
        loader: impl ResourceLoader<T> + 'static,
    ) -> Self {
        ResourceOptions {
            priority,
            loader: Box::new(loader),
            unloader: None,
        }
    }

    pub fn with_unloader(
        mut self,
        unloader: impl ResourceUnloader<T> + 'static,
    ) -> Self {
        self.unloader = Some(Box::new(unloader));
        self
    }
}

/// A state transition, reported by [`ResourceManager::update`] and friends
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StateChange {
    pub target: ElementId,
    pub handle: LoadHandle,
    pub previous: ResourceState,
    pub current: ResourceState,
}

/// A load that was started, in start order
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct LoadRecord {
    pub target: ElementId,
    pub handle: LoadHandle,
    pub priority: f64,
}

struct ResourceDescriptor<T> {
    target: ElementId,
    base_priority: f64,
    state: ResourceState,
    loader: Box<dyn ResourceLoader<T>>,
    unloader: Option<Box<dyn ResourceUnloader<T>>>,
    data: Option<T>,

    // Bumped for every load attempt. Completions for any other version are stale.
    version: u32,
    // Last known visibility, and the ratio it became visible with
    visible: bool,
    visible_ratio: f64,
    // Sequence of the queue entry that is current while Queued
    queue_sequence: u64,
}

/// Owns one descriptor per registered target and decides when each is loaded and unloaded.
///
/// Visibility events move resources onto a priority queue. [`update`](Self::update) processes
/// completions and starts queued loads, at most `max_concurrency` at a time. All transitions go
/// through here, and every one of them is returned from `update` (or the call that caused it) as
/// a [`StateChange`].
pub struct ResourceManager<T> {
    config: ResourceManagerConfig,
    // start at 1, 0 is never handed out
    next_handle_index: u64,

    descriptors: HashMap<LoadHandle, ResourceDescriptor<T>>,
    target_to_handle: HashMap<ElementId, LoadHandle>,

    queue: LoadQueue,
    loading_count: usize,

    // LoadOps report back through this channel
    events_tx: Sender<HandleOp<T>>,
    events_rx: Receiver<HandleOp<T>>,

    changes: Vec<StateChange>,
    load_history: RingBuffer<LoadRecord>,
}

impl<T: 'static> ResourceManager<T> {
    pub fn new(mut config: ResourceManagerConfig) -> Self {
        if config.max_concurrency == 0 {
            log::warn!("max_concurrency of 0 would never load anything, using 1");
            config.max_concurrency = 1;
        }

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let load_history = RingBuffer::new(config.history_capacity);

        ResourceManager {
            config,
            next_handle_index: 1,
            descriptors: Default::default(),
            target_to_handle: Default::default(),
            queue: LoadQueue::default(),
            loading_count: 0,
            events_tx,
            events_rx,
            changes: Vec::default(),
            load_history,
        }
    }

    pub fn config(&self) -> &ResourceManagerConfig {
        &self.config
    }

    pub fn register(
        &mut self,
        target: ElementId,
        options: ResourceOptions<T>,
    ) -> LoadHandle {
        if let Some(&handle) = self.target_to_handle.get(&target) {
            log::warn!(
                "{:?} is already registered as {:?}, ignoring the new registration",
                target,
                handle
            );
            return handle;
        }

        let handle = LoadHandle::new(self.next_handle_index);
        self.next_handle_index += 1;
        log::debug!("Allocate load handle {:?} for {:?}", handle, target);

        self.descriptors.insert(
            handle,
            ResourceDescriptor {
                target,
                base_priority: options.priority,
                state: ResourceState::Idle,
                loader: options.loader,
                unloader: options.unloader,
                data: None,
                version: 0,
                visible: false,
                visible_ratio: 0.0,
                queue_sequence: 0,
            },
        );
        self.target_to_handle.insert(target, handle);
        handle
    }

    /// Forget a target. A load in flight is abandoned, its completion will be ignored. Loaded data
    /// is passed to the unloader if there is one.
    pub fn unregister(
        &mut self,
        target: ElementId,
    ) -> bool {
        let handle = match self.target_to_handle.remove(&target) {
            Some(handle) => handle,
            None => {
                log::debug!("{:?} is not registered, nothing to unregister", target);
                return false;
            }
        };

        // Always present while target_to_handle has an entry
        let mut descriptor = match self.descriptors.remove(&handle) {
            Some(descriptor) => descriptor,
            None => return false,
        };

        log::debug!(
            "unregister {:?} {:?} in state {:?}",
            target,
            handle,
            descriptor.state
        );

        match descriptor.state {
            ResourceState::Loading => self.loading_count -= 1,
            ResourceState::Queued => self.queue.remove(handle),
            _ => {}
        }

        if let Some(data) = descriptor.data.take() {
            Self::run_unloader(target, &mut descriptor.unloader, data);
        }

        true
    }

    pub fn is_registered(
        &self,
        target: ElementId,
    ) -> bool {
        self.target_to_handle.contains_key(&target)
    }

    pub fn handle(
        &self,
        target: ElementId,
    ) -> Option<LoadHandle> {
        self.target_to_handle.get(&target).copied()
    }

    fn descriptor(
        &self,
        target: ElementId,
    ) -> Option<&ResourceDescriptor<T>> {
        let handle = self.target_to_handle.get(&target)?;
        self.descriptors.get(handle)
    }

    pub fn state(
        &self,
        target: ElementId,
    ) -> Option<ResourceState> {
        self.descriptor(target).map(|descriptor| descriptor.state)
    }

    pub fn data(
        &self,
        target: ElementId,
    ) -> Option<&T> {
        self.descriptor(target)?.data.as_ref()
    }

    pub fn loading_count(&self) -> usize {
        self.loading_count
    }

    pub fn queued_count(&self) -> usize {
        self.descriptors
            .values()
            .filter(|descriptor| descriptor.state == ResourceState::Queued)
            .count()
    }

    pub fn registered_count(&self) -> usize {
        self.descriptors.len()
    }

    /// The most recent load starts, oldest first
    pub fn load_history(&self) -> impl Iterator<Item = &LoadRecord> + '_ {
        self.load_history.iter()
    }

    pub fn load_order(&self) -> Vec<ElementId> {
        self.load_history.iter().map(|record| record.target).collect()
    }

    fn set_state(
        changes: &mut Vec<StateChange>,
        handle: LoadHandle,
        descriptor: &mut ResourceDescriptor<T>,
        state: ResourceState,
    ) {
        if descriptor.state == state {
            return;
        }

        log::debug!(
            "{:?} {:?}: {:?} -> {:?}",
            descriptor.target,
            handle,
            descriptor.state,
            state
        );
        changes.push(StateChange {
            target: descriptor.target,
            handle,
            previous: descriptor.state,
            current: state,
        });
        descriptor.state = state;
    }

    fn run_unloader(
        target: ElementId,
        unloader: &mut Option<Box<dyn ResourceUnloader<T>>>,
        data: T,
    ) {
        match unloader {
            Some(unloader) => {
                if let Err(error) = unloader.unload(target, data) {
                    // Unloading only reclaims memory, a failure here is harmless
                    log::warn!("unloading {:?} failed: {}", target, error);
                }
            }
            None => drop(data),
        }
    }

    // Hand loaded data to the unloader and mark the resource Unloaded
    fn unload(
        changes: &mut Vec<StateChange>,
        handle: LoadHandle,
        descriptor: &mut ResourceDescriptor<T>,
    ) {
        if let Some(data) = descriptor.data.take() {
            Self::run_unloader(descriptor.target, &mut descriptor.unloader, data);
        }
        Self::set_state(changes, handle, descriptor, ResourceState::Unloaded);
    }

    fn enqueue(
        queue: &mut LoadQueue,
        changes: &mut Vec<StateChange>,
        weight: f64,
        handle: LoadHandle,
        descriptor: &mut ResourceDescriptor<T>,
    ) {
        let priority = descriptor.base_priority + descriptor.visible_ratio * weight;
        descriptor.queue_sequence = queue.push(handle, priority);
        Self::set_state(changes, handle, descriptor, ResourceState::Queued);
    }

    /// Apply a visibility transition. Visible resources are queued for loading, hidden ones that
    /// are loaded are handed to their unloader.
    pub fn handle_visibility(
        &mut self,
        event: &VisibilityEvent,
    ) {
        let target = event.target();
        let handle = match self.target_to_handle.get(&target) {
            Some(&handle) => handle,
            None => {
                log::trace!("visibility event for unregistered {:?}", target);
                return;
            }
        };

        let descriptor = match self.descriptors.get_mut(&handle) {
            Some(descriptor) => descriptor,
            None => return,
        };

        match *event {
            VisibilityEvent::Visible { ratio, .. } => {
                descriptor.visible = true;
                descriptor.visible_ratio = ratio;
                match descriptor.state {
                    ResourceState::Idle | ResourceState::Unloaded => Self::enqueue(
                        &mut self.queue,
                        &mut self.changes,
                        self.config.visibility_priority_weight,
                        handle,
                        descriptor,
                    ),
                    ResourceState::Failed => {
                        log::debug!("{:?} failed previously, not retrying automatically", target);
                    }
                    ResourceState::Queued | ResourceState::Loading | ResourceState::Loaded => {}
                }
            }
            VisibilityEvent::Hidden { .. } => {
                descriptor.visible = false;
                match descriptor.state {
                    ResourceState::Queued => {
                        // Not started yet, so just drop out of the queue
                        self.queue.remove(handle);
                        Self::set_state(&mut self.changes, handle, descriptor, ResourceState::Idle);
                    }
                    ResourceState::Loaded if descriptor.unloader.is_some() => {
                        Self::unload(&mut self.changes, handle, descriptor);
                    }
                    // A load in flight finishes first, see handle_op
                    _ => {}
                }
            }
        }
    }

    /// Re-queue a failed resource. Failures are never retried otherwise.
    pub fn retry(
        &mut self,
        target: ElementId,
    ) -> bool {
        let handle = match self.target_to_handle.get(&target) {
            Some(&handle) => handle,
            None => return false,
        };

        let descriptor = match self.descriptors.get_mut(&handle) {
            Some(descriptor) if descriptor.state == ResourceState::Failed => descriptor,
            _ => return false,
        };

        Self::set_state(&mut self.changes, handle, descriptor, ResourceState::Idle);
        if descriptor.visible {
            Self::enqueue(
                &mut self.queue,
                &mut self.changes,
                self.config.visibility_priority_weight,
                handle,
                descriptor,
            );
        }

        true
    }

    fn handle_op(
        &mut self,
        op: HandleOp<T>,
    ) {
        let (handle, version) = match &op {
            HandleOp::Complete(handle, version, _)
            | HandleOp::Error(handle, version, _)
            | HandleOp::Drop(handle, version) => (*handle, *version),
        };

        let descriptor = match self.descriptors.get_mut(&handle) {
            Some(descriptor)
                if descriptor.version == version && descriptor.state == ResourceState::Loading =>
            {
                descriptor
            }
            _ => {
                log::debug!(
                    "dropping stale load result for {:?} version {}",
                    handle,
                    version
                );
                return;
            }
        };

        self.loading_count -= 1;
        match op {
            HandleOp::Complete(_, _, data) => {
                descriptor.data = Some(data);
                Self::set_state(&mut self.changes, handle, descriptor, ResourceState::Loaded);
                if !descriptor.visible && descriptor.unloader.is_some() {
                    log::debug!(
                        "{:?} left the viewport while loading, unloading it",
                        descriptor.target
                    );
                    Self::unload(&mut self.changes, handle, descriptor);
                }
            }
            HandleOp::Error(_, _, error) => {
                log::info!("load of {:?} failed: {}", descriptor.target, error);
                Self::set_state(&mut self.changes, handle, descriptor, ResourceState::Failed);
            }
            HandleOp::Drop(_, _) => {
                log::warn!(
                    "load op dropped without calling complete/error, handle {:?}",
                    handle
                );
                Self::set_state(&mut self.changes, handle, descriptor, ResourceState::Failed);
            }
        }
    }

    // Returns how many results were processed
    fn process_events(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(op) = self.events_rx.try_recv() {
            log::trace!("handle op {:?}", op);
            self.handle_op(op);
            processed += 1;
        }

        processed
    }

    // Start queued loads while there are free slots. Returns how many were started.
    fn start_queued_loads(&mut self) -> usize {
        let mut started = 0;
        while self.loading_count < self.config.max_concurrency {
            let queued = match self.queue.pop() {
                Some(queued) => queued,
                None => break,
            };

            let descriptor = match self.descriptors.get_mut(&queued.handle) {
                Some(descriptor)
                    if descriptor.state == ResourceState::Queued
                        && descriptor.queue_sequence == queued.sequence =>
                {
                    descriptor
                }
                // Unregistered, cancelled or re-queued since this entry was pushed
                _ => continue,
            };

            descriptor.version += 1;
            self.loading_count += 1;
            started += 1;
            Self::set_state(
                &mut self.changes,
                queued.handle,
                descriptor,
                ResourceState::Loading,
            );
            self.load_history.push(LoadRecord {
                target: descriptor.target,
                handle: queued.handle,
                priority: queued.priority,
            });

            let load_op = LoadOp::new(self.events_tx.clone(), queued.handle, descriptor.version);
            descriptor.loader.load(descriptor.target, load_op);
        }

        started
    }

    /// Process load results and start queued loads. Returns every state change since the last
    /// call, in the order they happened.
    #[profiling::function]
    pub fn update(&mut self) -> Vec<StateChange> {
        loop {
            // Loaders may resolve synchronously, so keep going until nothing moves
            let processed = self.process_events();
            let started = self.start_queued_loads();
            if processed == 0 && started == 0 {
                break;
            }
        }

        log::trace!(
            "{} loading, {} queue entries",
            self.loading_count,
            self.queue.len()
        );
        if !self.queue.is_empty() && self.queued_count() == 0 {
            // Only stale entries are left
            self.queue.clear();
        }

        self.take_changes()
    }

    pub fn take_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.changes)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type HeldOps = Rc<RefCell<Vec<LoadOp<u32>>>>;

    fn hold_options(ops: &HeldOps) -> ResourceOptions<u32> {
        let ops = ops.clone();
        ResourceOptions::new(0.0, move |_target: ElementId, load_op: LoadOp<u32>| {
            ops.borrow_mut().push(load_op)
        })
    }

    #[test]
    fn cancelled_resources_leave_the_queue() {
        let ops = HeldOps::default();
        let mut manager = ResourceManager::new(ResourceManagerConfig::default());
        let busy = ElementId(1);
        let toggled = ElementId(2);
        manager.register(busy, hold_options(&ops));
        manager.register(toggled, hold_options(&ops));

        // Occupy the only slot so nothing else can start
        manager.handle_visibility(&VisibilityEvent::Visible {
            target: busy,
            ratio: 1.0,
        });
        manager.update();
        assert_eq!(manager.loading_count(), 1);

        for _ in 0..10 {
            manager.handle_visibility(&VisibilityEvent::Visible {
                target: toggled,
                ratio: 1.0,
            });
            assert_eq!(manager.queue.len(), 1);
            manager.handle_visibility(&VisibilityEvent::Hidden { target: toggled });
            assert!(manager.queue.is_empty());
        }

        manager.handle_visibility(&VisibilityEvent::Visible {
            target: toggled,
            ratio: 1.0,
        });
        assert!(manager.unregister(toggled));
        assert!(manager.queue.is_empty());
        assert_eq!(ops.borrow().len(), 1);
    }
}
