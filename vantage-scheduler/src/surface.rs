use vantage_base::ElementId;

/// The host's visual/document surface.
///
/// Reads should only happen inside [`BatchScheduler::measure`](crate::BatchScheduler::measure)
/// callbacks and mutation only inside [`BatchScheduler::mutate`](crate::BatchScheduler::mutate)
/// callbacks. That is what keeps measurement and mutation from interleaving within a frame.
pub trait DocumentSurface {
    fn create_element(
        &mut self,
        tag: &str,
    ) -> ElementId;

    fn set_attribute(
        &mut self,
        element: ElementId,
        name: &str,
        value: &str,
    );

    fn remove_attribute(
        &mut self,
        element: ElementId,
        name: &str,
    );

    fn set_style(
        &mut self,
        element: ElementId,
        property: &str,
        value: &str,
    );

    fn append_child(
        &mut self,
        parent: ElementId,
        child: ElementId,
    );

    fn remove_child(
        &mut self,
        parent: ElementId,
        child: ElementId,
    );

    // Layout width in CSS pixels, None if the element is unknown or detached
    fn bounding_width(
        &self,
        element: ElementId,
    ) -> Option<f64>;

    fn device_pixel_ratio(&self) -> f64 {
        1.0
    }
}
