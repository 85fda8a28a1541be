use crate::{
    IntersectionEntry, IntersectionHost, LoadOp, ResourceManager, ResourceManagerConfig,
    ResourceOptions, ResourceState, VisibilityConfig, VisibilityEvent, VisibilityState,
    VisibilityTracker,
};
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::rc::Rc;
use vantage_base::ElementId;

#[derive(Default)]
struct FakeIntersectionHost {
    unsupported: bool,
    observed: RefCell<Vec<ElementId>>,
}

impl IntersectionHost for FakeIntersectionHost {
    fn is_supported(&self) -> bool {
        !self.unsupported
    }

    fn observe(
        &self,
        target: ElementId,
        _config: &VisibilityConfig,
    ) {
        self.observed.borrow_mut().push(target);
    }

    fn unobserve(
        &self,
        target: ElementId,
    ) {
        self.observed.borrow_mut().retain(|x| *x != target);
    }
}

#[derive(Debug)]
struct FakeError;

impl Error for FakeError {}

impl fmt::Display for FakeError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "fake error")
    }
}

fn entry(
    target: ElementId,
    ratio: f64,
) -> IntersectionEntry {
    IntersectionEntry {
        target,
        intersection_ratio: ratio,
        is_intersecting: ratio > 0.0,
    }
}

fn visible(target: ElementId) -> VisibilityEvent {
    VisibilityEvent::Visible { target, ratio: 1.0 }
}

fn hidden(target: ElementId) -> VisibilityEvent {
    VisibilityEvent::Hidden { target }
}

fn manager(max_concurrency: usize) -> ResourceManager<String> {
    ResourceManager::new(ResourceManagerConfig {
        max_concurrency,
        ..Default::default()
    })
}

// Completes every load immediately with the element id as the data
fn immediate_options(priority: f64) -> ResourceOptions<String> {
    ResourceOptions::new(priority, |target: ElementId, load_op: LoadOp<String>| {
        load_op.complete(format!("{:?}", target))
    })
}

// Holds on to load ops so the test can resolve them later
type DeferredOps = Rc<RefCell<Vec<LoadOp<String>>>>;

fn deferred_options(
    priority: f64,
    ops: &DeferredOps,
) -> ResourceOptions<String> {
    let ops = ops.clone();
    ResourceOptions::new(priority, move |_target: ElementId, load_op: LoadOp<String>| {
        ops.borrow_mut().push(load_op)
    })
}

#[test]
fn visible_at_once_loads_by_priority() {
    let mut manager = manager(1);
    let a = ElementId(1);
    let b = ElementId(2);
    let c = ElementId(3);
    manager.register(a, immediate_options(5.0));
    manager.register(b, immediate_options(1.0));
    manager.register(c, immediate_options(10.0));

    for target in [a, b, c] {
        manager.handle_visibility(&visible(target));
    }
    assert_eq!(manager.queued_count(), 3);

    manager.update();
    assert_eq!(manager.load_order(), vec![c, a, b]);
    for target in [a, b, c] {
        assert_eq!(manager.state(target), Some(ResourceState::Loaded));
    }
    assert_eq!(manager.data(c).map(String::as_str), Some("ElementId(3)"));
    assert_eq!(manager.loading_count(), 0);
}

#[test]
fn equal_priorities_load_in_arrival_order() {
    let mut manager = manager(1);
    let targets: Vec<_> = (1..=4).map(ElementId).collect();
    for &target in &targets {
        manager.register(target, immediate_options(0.0));
    }

    for &target in targets.iter().rev() {
        manager.handle_visibility(&visible(target));
    }

    manager.update();
    let expected: Vec<_> = targets.iter().rev().copied().collect();
    assert_eq!(manager.load_order(), expected);
}

#[test]
fn concurrency_limit_is_respected() {
    let ops = DeferredOps::default();
    let mut manager = manager(2);
    for i in 1..=4 {
        manager.register(ElementId(i), deferred_options(i as f64, &ops));
        manager.handle_visibility(&visible(ElementId(i)));
    }

    manager.update();
    assert_eq!(manager.loading_count(), 2);
    assert_eq!(manager.queued_count(), 2);
    assert_eq!(manager.load_order(), vec![ElementId(4), ElementId(3)]);

    // Finishing one load frees exactly one slot
    let op = ops.borrow_mut().remove(0);
    op.complete("done".to_string());
    let changes = manager.update();
    assert_eq!(manager.loading_count(), 2);
    assert_eq!(manager.queued_count(), 1);
    assert_eq!(manager.state(ElementId(4)), Some(ResourceState::Loaded));
    assert_eq!(manager.state(ElementId(2)), Some(ResourceState::Loading));
    assert!(changes
        .iter()
        .any(|change| change.target == ElementId(4) && change.current == ResourceState::Loaded));

    for op in ops.borrow_mut().drain(..) {
        op.complete("done".to_string());
    }
    manager.update();
    for op in ops.borrow_mut().drain(..) {
        op.complete("done".to_string());
    }
    manager.update();
    assert_eq!(manager.loading_count(), 0);
    for i in 1..=4 {
        assert_eq!(manager.state(ElementId(i)), Some(ResourceState::Loaded));
    }
}

#[test]
fn repeated_visibility_does_not_requeue() {
    let ops = DeferredOps::default();
    let mut manager = manager(4);
    let a = ElementId(1);
    manager.register(a, deferred_options(0.0, &ops));

    manager.handle_visibility(&visible(a));
    manager.handle_visibility(&visible(a));
    manager.update();
    manager.handle_visibility(&visible(a));
    manager.update();

    assert_eq!(ops.borrow().len(), 1);
    assert_eq!(manager.load_order(), vec![a]);
}

#[test]
fn hidden_before_start_cancels_the_load() {
    let ops = DeferredOps::default();
    let mut manager = manager(1);
    let a = ElementId(1);
    manager.register(a, deferred_options(0.0, &ops));

    manager.handle_visibility(&visible(a));
    assert_eq!(manager.state(a), Some(ResourceState::Queued));
    manager.handle_visibility(&hidden(a));
    assert_eq!(manager.state(a), Some(ResourceState::Idle));

    manager.update();
    assert!(ops.borrow().is_empty());
    assert!(manager.load_order().is_empty());

    // Coming back into view queues it again
    manager.handle_visibility(&visible(a));
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Loading));
    assert_eq!(ops.borrow().len(), 1);
}

#[test]
fn hidden_while_loading_still_completes() {
    let ops = DeferredOps::default();
    let mut manager = manager(1);
    let a = ElementId(1);
    manager.register(a, deferred_options(0.0, &ops));

    manager.handle_visibility(&visible(a));
    manager.update();
    manager.handle_visibility(&hidden(a));
    assert_eq!(manager.state(a), Some(ResourceState::Loading));

    ops.borrow_mut().remove(0).complete("data".to_string());
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Loaded));
}

#[test]
fn hidden_while_loading_is_unloaded_when_it_completes() {
    let ops = DeferredOps::default();
    let unloaded = Rc::new(RefCell::new(Vec::new()));
    let mut manager = manager(1);
    let a = ElementId(1);
    let unloaded_clone = unloaded.clone();
    manager.register(
        a,
        deferred_options(0.0, &ops).with_unloader(
            move |target: ElementId, data: String| -> Result<(), Box<dyn Error>> {
                unloaded_clone.borrow_mut().push((target, data));
                Ok(())
            },
        ),
    );

    manager.handle_visibility(&visible(a));
    manager.update();
    manager.handle_visibility(&hidden(a));
    assert_eq!(manager.state(a), Some(ResourceState::Loading));
    assert!(unloaded.borrow().is_empty());

    ops.borrow_mut().remove(0).complete("data".to_string());
    let changes: Vec<_> = manager
        .update()
        .iter()
        .map(|change| change.current)
        .collect();
    assert_eq!(changes, vec![ResourceState::Loaded, ResourceState::Unloaded]);
    assert_eq!(manager.state(a), Some(ResourceState::Unloaded));
    assert!(manager.data(a).is_none());
    assert_eq!(*unloaded.borrow(), vec![(a, "data".to_string())]);

    // Back in view it loads again
    manager.handle_visibility(&visible(a));
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Loading));
    assert_eq!(ops.borrow().len(), 1);
}

#[test]
fn completion_after_unregister_is_ignored() {
    let ops = DeferredOps::default();
    let mut manager = manager(1);
    let a = ElementId(1);
    manager.register(a, deferred_options(0.0, &ops));
    manager.handle_visibility(&visible(a));
    manager.update();
    assert_eq!(manager.loading_count(), 1);

    assert!(manager.unregister(a));
    assert_eq!(manager.loading_count(), 0);

    ops.borrow_mut().remove(0).complete("late".to_string());
    let changes = manager.update();
    assert!(changes.is_empty());
    assert_eq!(manager.state(a), None);
    assert!(manager.data(a).is_none());
}

#[test]
fn completion_for_an_older_attempt_is_ignored() {
    let ops = DeferredOps::default();
    let mut manager = manager(1);
    let a = ElementId(1);
    manager.register(a, deferred_options(0.0, &ops));
    manager.handle_visibility(&visible(a));
    manager.update();

    // First attempt fails, the retry starts a second one
    ops.borrow_mut().remove(0).error(FakeError);
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Failed));
    assert!(manager.retry(a));
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Loading));

    let second = ops.borrow_mut().remove(0);
    assert_eq!(second.version(), 2);
    second.complete("second".to_string());
    manager.update();
    assert_eq!(manager.data(a).map(String::as_str), Some("second"));
}

#[test]
fn dropped_load_op_fails_the_resource() {
    let mut manager = manager(1);
    let a = ElementId(1);
    manager.register(
        a,
        ResourceOptions::new(0.0, |_target: ElementId, load_op: LoadOp<String>| {
            drop(load_op)
        }),
    );

    manager.handle_visibility(&visible(a));
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Failed));
    assert_eq!(manager.loading_count(), 0);
}

#[test]
fn failed_is_terminal_until_retry() {
    let attempts = Rc::new(Cell::new(0));
    let mut manager = manager(1);
    let a = ElementId(1);
    let loader_attempts = attempts.clone();
    manager.register(
        a,
        ResourceOptions::new(0.0, move |_target: ElementId, load_op: LoadOp<String>| {
            loader_attempts.set(loader_attempts.get() + 1);
            if loader_attempts.get() == 1 {
                load_op.error(FakeError);
            } else {
                load_op.complete("ok".to_string());
            }
        }),
    );

    manager.handle_visibility(&visible(a));
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Failed));

    // Visibility changes do not restart a failed load
    manager.handle_visibility(&hidden(a));
    manager.handle_visibility(&visible(a));
    manager.update();
    assert_eq!(attempts.get(), 1);
    assert_eq!(manager.state(a), Some(ResourceState::Failed));

    assert!(manager.retry(a));
    manager.update();
    assert_eq!(attempts.get(), 2);
    assert_eq!(manager.state(a), Some(ResourceState::Loaded));

    // Only failed resources can be retried
    assert!(!manager.retry(a));
}

#[test]
fn hidden_loaded_resource_is_unloaded() {
    let unloaded = Rc::new(RefCell::new(Vec::new()));
    let mut manager = manager(1);
    let a = ElementId(1);
    let unloaded_clone = unloaded.clone();
    manager.register(
        a,
        immediate_options(0.0).with_unloader(
            move |target: ElementId, data: String| -> Result<(), Box<dyn Error>> {
                unloaded_clone.borrow_mut().push((target, data));
                Ok(())
            },
        ),
    );

    manager.handle_visibility(&visible(a));
    manager.update();
    manager.handle_visibility(&hidden(a));
    assert_eq!(manager.state(a), Some(ResourceState::Unloaded));
    assert!(manager.data(a).is_none());
    assert_eq!(*unloaded.borrow(), vec![(a, "ElementId(1)".to_string())]);

    // Visible again reloads it
    manager.handle_visibility(&visible(a));
    manager.update();
    assert_eq!(manager.state(a), Some(ResourceState::Loaded));
    assert_eq!(manager.load_order(), vec![a, a]);
}

#[test]
fn unloader_failure_is_ignored() {
    let mut manager = manager(1);
    let a = ElementId(1);
    manager.register(
        a,
        immediate_options(0.0).with_unloader(
            |_target: ElementId, _data: String| -> Result<(), Box<dyn Error>> {
                Err(Box::new(FakeError))
            },
        ),
    );

    manager.handle_visibility(&visible(a));
    manager.update();
    manager.handle_visibility(&hidden(a));
    assert_eq!(manager.state(a), Some(ResourceState::Unloaded));
}

#[test]
fn without_unloader_hidden_resources_stay_loaded() {
    let mut manager = manager(1);
    let a = ElementId(1);
    manager.register(a, immediate_options(0.0));
    manager.handle_visibility(&visible(a));
    manager.update();
    manager.handle_visibility(&hidden(a));
    assert_eq!(manager.state(a), Some(ResourceState::Loaded));
}

#[test]
fn duplicate_registration_keeps_the_first() {
    let mut manager = manager(1);
    let a = ElementId(1);
    let first = manager.register(a, immediate_options(1.0));
    let second = manager.register(a, immediate_options(2.0));
    assert_eq!(first, second);
    assert_eq!(manager.registered_count(), 1);
    assert!(!manager.unregister(ElementId(2)));
}

#[test]
fn zero_concurrency_is_clamped() {
    let manager = manager(0);
    assert_eq!(manager.config().max_concurrency, 1);
}

#[test]
fn tracker_reports_transitions_once() {
    let host = Rc::new(FakeIntersectionHost::default());
    let mut tracker = VisibilityTracker::new(VisibilityConfig::default(), host.clone());
    let a = ElementId(1);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen.clone();
    tracker.observe(
        a,
        Some(Box::new(move |event: &VisibilityEvent| {
            seen_clone.borrow_mut().push(*event)
        })),
    );
    assert_eq!(*host.observed.borrow(), vec![a]);
    assert_eq!(tracker.state(a), VisibilityState::Observed);

    let events = tracker.process_entries(&[entry(a, 0.5)]);
    assert_eq!(events, vec![VisibilityEvent::Visible { target: a, ratio: 0.5 }]);
    assert!(tracker.process_entries(&[entry(a, 0.7)]).is_empty());

    let events = tracker.process_entries(&[entry(a, 0.0)]);
    assert_eq!(events, vec![hidden(a)]);
    assert!(tracker.process_entries(&[entry(a, 0.0)]).is_empty());

    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn tracker_first_observation_hidden_is_silent() {
    let host = Rc::new(FakeIntersectionHost::default());
    let mut tracker = VisibilityTracker::new(VisibilityConfig::default(), host);
    let a = ElementId(1);
    tracker.observe(a, None);

    assert!(tracker.process_entries(&[entry(a, 0.0)]).is_empty());
    assert_eq!(tracker.state(a), VisibilityState::Hidden);
}

#[test]
fn tracker_respects_threshold() {
    let host = Rc::new(FakeIntersectionHost::default());
    let config = VisibilityConfig {
        threshold: 0.5,
        ..Default::default()
    };
    let mut tracker = VisibilityTracker::new(config, host);
    let a = ElementId(1);
    tracker.observe(a, None);

    assert!(tracker.process_entries(&[entry(a, 0.25)]).is_empty());
    assert_eq!(tracker.process_entries(&[entry(a, 0.5)]).len(), 1);
    assert_eq!(tracker.state(a), VisibilityState::Visible);
}

#[test]
fn unobserve_visible_emits_final_hidden() {
    let host = Rc::new(FakeIntersectionHost::default());
    let mut tracker = VisibilityTracker::new(VisibilityConfig::default(), host.clone());
    let a = ElementId(1);
    let b = ElementId(2);
    tracker.observe(a, None);
    tracker.observe(b, None);
    tracker.process_entries(&[entry(a, 1.0)]);

    assert_eq!(tracker.unobserve(a), Some(hidden(a)));
    assert_eq!(tracker.unobserve(b), None);
    assert_eq!(tracker.unobserve(a), None);
    assert!(host.observed.borrow().is_empty());

    // Late observations for unobserved elements are ignored
    assert!(tracker.process_entries(&[entry(a, 1.0)]).is_empty());
    assert!(tracker.take_events().is_empty());
}

#[test]
fn degraded_mode_treats_everything_as_visible() {
    let host = Rc::new(FakeIntersectionHost {
        unsupported: true,
        ..Default::default()
    });
    let mut tracker = VisibilityTracker::new(VisibilityConfig::default(), host.clone());
    assert!(!tracker.is_supported());

    let a = ElementId(1);
    tracker.observe(a, None);
    assert!(host.observed.borrow().is_empty());
    assert_eq!(tracker.state(a), VisibilityState::Visible);
    assert_eq!(
        tracker.take_events(),
        vec![VisibilityEvent::Visible { target: a, ratio: 1.0 }]
    );
}

#[test]
fn tracker_drives_manager() {
    let host = Rc::new(FakeIntersectionHost::default());
    let mut tracker = VisibilityTracker::new(VisibilityConfig::default(), host);
    let mut manager = manager(1);
    let a = ElementId(1);
    let b = ElementId(2);
    for target in [a, b] {
        tracker.observe(target, None);
        manager.register(target, immediate_options(0.0));
    }

    // b is more visible, so it goes first
    for event in tracker.process_entries(&[entry(a, 0.2), entry(b, 0.9)]) {
        manager.handle_visibility(&event);
    }
    manager.update();
    assert_eq!(manager.load_order(), vec![b, a]);
    let priorities: Vec<_> = manager.load_history().map(|record| record.priority).collect();
    assert_eq!(priorities, vec![0.9, 0.2]);
}
