use crate::host::{SimulatedDocument, SimulatedViewport};
use std::error::Error;
use std::rc::Rc;
use vantage::base::ElementId;
use vantage::loader::{
    IntersectionEntry, LoadOp, ResourceManager, ResourceManagerConfig, ResourceOptions,
    StateChange, VisibilityConfig, VisibilityTracker,
};
use vantage::scheduler::{BatchScheduler, DocumentSurface};

/// A mounted comments panel
#[derive(Copy, Clone, Debug)]
pub struct Fragment {
    pub panel: ElementId,
}

/// Heavy UI fragments that are only mounted while their slot is on screen
pub struct FragmentSection {
    tracker: VisibilityTracker,
    manager: ResourceManager<Fragment>,
    scheduler: BatchScheduler<SimulatedDocument>,
    slots: Vec<ElementId>,
}

impl FragmentSection {
    pub fn new(
        visibility: VisibilityConfig,
        resources: ResourceManagerConfig,
        viewport: Rc<SimulatedViewport>,
        scheduler: BatchScheduler<SimulatedDocument>,
    ) -> Self {
        FragmentSection {
            tracker: VisibilityTracker::new(visibility, viewport),
            manager: ResourceManager::new(resources),
            scheduler,
            slots: Vec::default(),
        }
    }

    pub fn add_slot(
        &mut self,
        slot: ElementId,
        priority: f64,
    ) {
        let mount_scheduler = self.scheduler.clone();
        let unmount_scheduler = self.scheduler.clone();
        let options = ResourceOptions::new(
            priority,
            move |slot: ElementId, load_op: LoadOp<Fragment>| {
                // Building the panel is a DOM write, so it waits for the write phase
                mount_scheduler.mutate(move |document: &mut SimulatedDocument| {
                    let panel = document.create_element("section");
                    document.set_attribute(panel, "class", "comments");
                    document.set_style(panel, "min-height", "240px");
                    document.append_child(slot, panel);
                    load_op.complete(Fragment { panel });
                });
            },
        )
        .with_unloader(
            move |slot: ElementId, fragment: Fragment| -> Result<(), Box<dyn Error>> {
                unmount_scheduler.mutate(move |document: &mut SimulatedDocument| {
                    document.remove_child(slot, fragment.panel)
                });
                Ok(())
            },
        );

        self.manager.register(slot, options);
        self.slots.push(slot);
        self.tracker.observe(slot, None);
        for event in self.tracker.take_events() {
            self.manager.handle_visibility(&event);
        }
    }

    pub fn on_intersections(
        &mut self,
        entries: &[IntersectionEntry],
    ) {
        for event in self.tracker.process_entries(entries) {
            self.manager.handle_visibility(&event);
        }
    }

    pub fn update(&mut self) -> Vec<StateChange> {
        self.manager.update()
    }

    pub fn slots(&self) -> &[ElementId] {
        &self.slots
    }
}
