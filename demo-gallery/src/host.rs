use std::cell::{Cell, RefCell};
use vantage::base::hashing::HashMap;
use vantage::base::ElementId;
use vantage::loader::visibility::MarginValue;
use vantage::loader::{IntersectionEntry, IntersectionHost, RootMargin, VisibilityConfig};
use vantage::scheduler::{DocumentSurface, FrameRequester, IdleDeadline};

#[derive(Default, Debug)]
pub struct SimulatedElement {
    pub tag: String,
    pub parent: Option<ElementId>,
    pub children: Vec<ElementId>,
    pub attributes: HashMap<String, String>,
    pub styles: HashMap<String, String>,
    // Layout box in CSS pixels, in document coordinates
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// An in-memory document with a trivial block layout
pub struct SimulatedDocument {
    next_id: u64,
    root: ElementId,
    elements: HashMap<ElementId, SimulatedElement>,
    device_pixel_ratio: f64,
    pub attribute_writes: u64,
}

impl SimulatedDocument {
    pub fn new(device_pixel_ratio: f64) -> Self {
        let mut document = SimulatedDocument {
            next_id: 0,
            root: ElementId(0),
            elements: Default::default(),
            device_pixel_ratio,
            attribute_writes: 0,
        };
        document.root = document.create_element("body");
        document
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn element(
        &self,
        element: ElementId,
    ) -> Option<&SimulatedElement> {
        self.elements.get(&element)
    }

    pub fn place(
        &mut self,
        element: ElementId,
        top: f64,
        width: f64,
        height: f64,
    ) {
        if let Some(e) = self.elements.get_mut(&element) {
            e.top = top;
            e.width = width;
            e.height = height;
        }
    }

    pub fn attribute(
        &self,
        element: ElementId,
        name: &str,
    ) -> Option<&str> {
        self.elements
            .get(&element)?
            .attributes
            .get(name)
            .map(String::as_str)
    }

    pub fn is_attached(
        &self,
        element: ElementId,
    ) -> bool {
        element == self.root
            || self
                .elements
                .get(&element)
                .map(|e| e.parent.is_some())
                .unwrap_or(false)
    }

    pub fn child_count(
        &self,
        element: ElementId,
    ) -> usize {
        self.elements
            .get(&element)
            .map(|e| e.children.len())
            .unwrap_or(0)
    }
}

impl DocumentSurface for SimulatedDocument {
    fn create_element(
        &mut self,
        tag: &str,
    ) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.elements.insert(
            id,
            SimulatedElement {
                tag: tag.to_string(),
                ..Default::default()
            },
        );
        id
    }

    fn set_attribute(
        &mut self,
        element: ElementId,
        name: &str,
        value: &str,
    ) {
        if let Some(e) = self.elements.get_mut(&element) {
            self.attribute_writes += 1;
            e.attributes.insert(name.to_string(), value.to_string());
        }
    }

    fn remove_attribute(
        &mut self,
        element: ElementId,
        name: &str,
    ) {
        if let Some(e) = self.elements.get_mut(&element) {
            e.attributes.remove(name);
        }
    }

    fn set_style(
        &mut self,
        element: ElementId,
        property: &str,
        value: &str,
    ) {
        if let Some(e) = self.elements.get_mut(&element) {
            e.styles.insert(property.to_string(), value.to_string());
        }
    }

    fn append_child(
        &mut self,
        parent: ElementId,
        child: ElementId,
    ) {
        if !self.elements.contains_key(&parent) {
            log::warn!("append_child: unknown parent {:?}", parent);
            return;
        }

        if let Some(e) = self.elements.get_mut(&child) {
            e.parent = Some(parent);
        }
        if let Some(e) = self.elements.get_mut(&parent) {
            e.children.push(child);
        }
    }

    fn remove_child(
        &mut self,
        parent: ElementId,
        child: ElementId,
    ) {
        if let Some(e) = self.elements.get_mut(&parent) {
            e.children.retain(|x| *x != child);
        }
        if let Some(e) = self.elements.get_mut(&child) {
            e.parent = None;
        }
    }

    fn bounding_width(
        &self,
        element: ElementId,
    ) -> Option<f64> {
        if !self.is_attached(element) {
            return None;
        }

        self.elements.get(&element).map(|e| e.width)
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }
}

/// A scrolling viewport that computes intersections for the elements observed through it
pub struct SimulatedViewport {
    pub scroll_top: Cell<f64>,
    pub height: f64,
    supported: bool,
    observed: RefCell<HashMap<ElementId, RootMargin>>,
}

impl SimulatedViewport {
    pub fn new(
        height: f64,
        supported: bool,
    ) -> Self {
        SimulatedViewport {
            scroll_top: Cell::new(0.0),
            height,
            supported,
            observed: Default::default(),
        }
    }

    fn margin_px(
        &self,
        value: MarginValue,
    ) -> f64 {
        match value {
            MarginValue::Px(px) => px,
            MarginValue::Percent(percent) => self.height * percent / 100.0,
        }
    }

    /// Intersections for every observed element, like the host would deliver them after a scroll
    pub fn intersections(
        &self,
        document: &SimulatedDocument,
        entries: &mut Vec<IntersectionEntry>,
    ) {
        let scroll_top = self.scroll_top.get();
        for (&target, root_margin) in self.observed.borrow().iter() {
            let element = match document.element(target) {
                Some(element) if element.height > 0.0 => element,
                _ => continue,
            };

            let view_top = scroll_top - self.margin_px(root_margin.top);
            let view_bottom = scroll_top + self.height + self.margin_px(root_margin.bottom);
            let overlap = (element.top + element.height).min(view_bottom) - element.top.max(view_top);
            let intersection_ratio = (overlap / element.height).clamp(0.0, 1.0);
            entries.push(IntersectionEntry {
                target,
                intersection_ratio,
                is_intersecting: overlap > 0.0,
            });
        }

        // Hosts deliver observations in document order
        entries.sort_by_key(|entry| entry.target);
    }

    pub fn observed_count(&self) -> usize {
        self.observed.borrow().len()
    }
}

impl IntersectionHost for SimulatedViewport {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn observe(
        &self,
        target: ElementId,
        config: &VisibilityConfig,
    ) {
        self.observed
            .borrow_mut()
            .insert(target, config.root_margin);
    }

    fn unobserve(
        &self,
        target: ElementId,
    ) {
        self.observed.borrow_mut().remove(&target);
    }
}

/// Records which callbacks the runtime asked for. The frame loop in main delivers them.
#[derive(Default)]
pub struct SimulatedFrames {
    pub frame_requests: Cell<u64>,
    pub idle_requests: Cell<u64>,
    pub frame_requested: Cell<bool>,
}

impl FrameRequester for SimulatedFrames {
    fn request_frame(&self) {
        self.frame_requests.set(self.frame_requests.get() + 1);
        self.frame_requested.set(true);
    }

    fn request_idle(&self) {
        self.idle_requests.set(self.idle_requests.get() + 1);
    }
}

/// Idle period of a fixed length. Each query "spends" a millisecond so that the queue stops
/// eventually.
pub struct SimulatedIdlePeriod {
    remaining_ms: Cell<f64>,
}

impl SimulatedIdlePeriod {
    pub fn new(budget_ms: f64) -> Self {
        SimulatedIdlePeriod {
            remaining_ms: Cell::new(budget_ms),
        }
    }
}

impl IdleDeadline for SimulatedIdlePeriod {
    fn time_remaining(&self) -> f64 {
        let remaining = self.remaining_ms.get();
        self.remaining_ms.set(remaining - 1.0);
        remaining
    }
}

pub fn count_with_attribute(
    document: &SimulatedDocument,
    elements: &[ElementId],
    name: &str,
) -> usize {
    elements
        .iter()
        .filter(|&&element| document.attribute(element, name).is_some())
        .count()
}
