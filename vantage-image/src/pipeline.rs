use crate::fetch::{FetchFailure, FetchOp, FetchRequest, FetchResponse, Fetcher};
use crate::format::{FormatNegotiator, FormatProbe, ImageFormat};
use crate::network::{BandwidthEstimator, NetworkPolicy, NetworkProfile, NetworkSignal};
use crate::sizing::{select_width, sizes_attribute};
use crate::variant::{ImageVariant, VariantBuilder};
use crate::{ConfigResult, FallbackChain, ImageError, ImagePipelineConfig, RuntimeConfiguration};
use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use vantage_base::hashing::HashMap;
use vantage_base::{ElementId, LoadHandle};
use vantage_loader::{
    IntersectionEntry, IntersectionHost, LoadOp, ResourceLoader, ResourceManager,
    ResourceManagerConfig, ResourceOptions, ResourceState, StateChange, VisibilityConfig,
    VisibilityEvent, VisibilityState, VisibilityTracker,
};
use vantage_scheduler::{BatchScheduler, DocumentSurface};

/// The host primitives the pipeline talks to
pub struct ImageHosts {
    pub intersection: Rc<dyn IntersectionHost>,
    pub fetcher: Rc<dyn Fetcher>,
    pub network: Rc<dyn NetworkSignal>,
    pub format_probe: Box<dyn FormatProbe>,
}

/// An image element to manage
#[derive(Clone, Debug)]
pub struct ImageRequest {
    // Path of the primary source, relative to the CDN base
    pub path: String,
    // Tried in order when the primary fails
    pub alternates: Vec<String>,
    pub priority: f64,
    // Expected CSS width, used if the element hasn't been measured by the time it loads
    pub width_hint: Option<f64>,
    // Size of the placeholder shown if every source fails
    pub placeholder_size: (u32, u32),
}

impl ImageRequest {
    pub fn new(path: impl Into<String>) -> Self {
        ImageRequest {
            path: path.into(),
            alternates: Vec::default(),
            priority: 0.0,
            width_hint: None,
            placeholder_size: (1, 1),
        }
    }

    pub fn with_alternates(
        mut self,
        alternates: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.alternates = alternates.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(
        mut self,
        priority: f64,
    ) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_width_hint(
        mut self,
        css_width: f64,
    ) -> Self {
        self.width_hint = Some(css_width);
        self
    }

    pub fn with_placeholder_size(
        mut self,
        width: u32,
        height: u32,
    ) -> Self {
        self.placeholder_size = (width, height);
        self
    }
}

/// A successfully fetched image, ready to be written to its element
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub variant: ImageVariant,
    pub src_set: String,
    pub sizes: String,
    // The source in the fallback chain that worked
    pub source: String,
    pub failed_attempts: u32,
    pub response: FetchResponse,
}

// What to ask for, decided when the load starts
#[derive(Clone, Debug)]
struct ImagePlan {
    format: ImageFormat,
    width: u32,
    quality: u8,
    sizes: String,
}

#[derive(Copy, Clone, Debug)]
struct ElementRecord {
    handle: LoadHandle,
    css_width: Option<f64>,
    device_pixel_ratio: f64,
}

// State shared between the pipeline and the loaders/callbacks it hands out
struct PipelineShared {
    config: ImagePipelineConfig,
    breakpoints: Vec<u32>,
    fetcher: Rc<dyn Fetcher>,
    network: Rc<dyn NetworkSignal>,
    policy: NetworkPolicy,
    negotiator: RefCell<FormatNegotiator>,
    variants: RefCell<VariantBuilder>,
    bandwidth: RefCell<BandwidthEstimator>,
    elements: RefCell<HashMap<ElementId, ElementRecord>>,
}

impl PipelineShared {
    fn network_profile(&self) -> NetworkProfile {
        let conditions = self.network.current();
        let estimate = self.bandwidth.borrow().estimate_mbps();
        self.policy.profile(&conditions, estimate)
    }

    // Writes for an element are only applied if it is still registered under the same handle
    fn is_current(
        &self,
        target: ElementId,
        handle: LoadHandle,
    ) -> bool {
        self.elements
            .borrow()
            .get(&target)
            .map(|record| record.handle == handle)
            .unwrap_or(false)
    }

    fn plan(
        &self,
        target: ElementId,
        request: &ImageRequest,
    ) -> ImagePlan {
        let profile = self.network_profile();
        let format = self
            .negotiator
            .borrow_mut()
            .negotiate(&self.config.candidate_formats, profile.prefer_cheap_decode);

        let (measured_width, device_pixel_ratio) = self
            .elements
            .borrow()
            .get(&target)
            .map(|record| (record.css_width, record.device_pixel_ratio))
            .unwrap_or((None, 1.0));

        let css_width = measured_width.or(request.width_hint);
        let width = match css_width {
            Some(css_width) => select_width(
                css_width * profile.width_scale,
                device_pixel_ratio,
                &self.breakpoints,
            ),
            None => {
                // Nothing known about the element, assume it is as wide as the widest breakpoint
                let widest = self.breakpoints.last().copied().unwrap_or(1) as f64;
                select_width(widest * profile.width_scale, 1.0, &self.breakpoints)
            }
        };

        let plan = ImagePlan {
            format,
            width,
            quality: profile.scale_quality(self.config.default_quality),
            sizes: sizes_attribute(css_width),
        };
        log::debug!("{:?} plan {:?} with profile {:?}", target, plan, profile);
        plan
    }
}

// One image load, walking the fallback chain until a source works or none are left
struct LoadAttempt {
    shared: Rc<PipelineShared>,
    target: ElementId,
    chain: FallbackChain,
    plan: ImagePlan,
    load_op: LoadOp<LoadedImage>,
}

impl LoadAttempt {
    fn start(self) {
        let source = match self.chain.current().map(str::to_string) {
            Some(source) => source,
            None => return self.give_up(),
        };

        let variant = self.shared.variants.borrow_mut().build_variant(
            &source,
            self.plan.width,
            self.plan.quality,
            self.plan.format,
        );
        log::debug!(
            "{:?} fetching {} (source {} of {})",
            self.target,
            variant.url,
            self.chain.current_index() + 1,
            self.chain.len()
        );

        let request = FetchRequest {
            url: variant.url.clone(),
            format: variant.format,
            width: variant.width,
        };
        let fetcher = self.shared.fetcher.clone();
        let fetch_op = FetchOp::new(
            variant.url.clone(),
            Box::new(move |result: Result<FetchResponse, FetchFailure>| match result {
                Ok(response) => self.succeeded(source, variant, response),
                Err(failure) => self.failed(failure),
            }),
        );
        fetcher.fetch(request, fetch_op);
    }

    // False once the element was unregistered (or registered again) while the fetch was in
    // flight. Such an attempt must not touch shared state or fetch anything else.
    fn is_current(&self) -> bool {
        self.shared.is_current(self.target, self.load_op.load_handle())
    }

    fn succeeded(
        self,
        source: String,
        variant: ImageVariant,
        response: FetchResponse,
    ) {
        if !self.is_current() {
            log::debug!(
                "{:?} is no longer registered, discarding {}",
                self.target,
                variant.url
            );
            return;
        }

        self.shared
            .bandwidth
            .borrow_mut()
            .record(response.transferred_bytes, response.duration_ms);

        let src_set = self.shared.variants.borrow_mut().build_src_set(
            &source,
            &self.shared.breakpoints,
            self.plan.quality,
            self.plan.format,
        );

        let failed_attempts = self.chain.failed_attempts();
        if failed_attempts > 0 {
            log::info!(
                "{:?} loaded from fallback {} after {} failed attempts",
                self.target,
                source,
                failed_attempts
            );
        }

        self.load_op.complete(LoadedImage {
            variant,
            src_set,
            sizes: self.plan.sizes,
            source,
            failed_attempts,
            response,
        });
    }

    fn failed(
        mut self,
        failure: FetchFailure,
    ) {
        let error = ImageError::from(failure);
        if !self.is_current() {
            log::debug!("{:?} is no longer registered, ignoring {}", self.target, error);
            return;
        }

        log::info!("{:?} {}", self.target, error);
        if self.chain.advance().is_some() {
            self.start();
        } else {
            self.give_up();
        }
    }

    fn give_up(self) {
        let error = ImageError::FallbackChainExhausted {
            failed_attempts: self.chain.failed_attempts(),
        };
        log::warn!("{:?} {}", self.target, error);
        self.load_op.error(error);
    }
}

struct ImageLoader {
    shared: Rc<PipelineShared>,
    request: ImageRequest,
}

impl ResourceLoader<LoadedImage> for ImageLoader {
    fn load(
        &mut self,
        target: ElementId,
        load_op: LoadOp<LoadedImage>,
    ) {
        let plan = self.shared.plan(target, &self.request);
        let attempt = LoadAttempt {
            shared: self.shared.clone(),
            target,
            chain: FallbackChain::new(self.request.path.clone(), self.request.alternates.clone()),
            plan,
            load_op,
        };
        attempt.start();
    }
}

/// Lazily loads images as they scroll into view, choosing format, width and quality for the
/// device and network, walking fallbacks on failure.
///
/// The host drives it: intersection observations go to [`on_intersections`](Self::on_intersections),
/// [`update`](Self::update) is called once per frame, and the [`BatchScheduler`] it was given is
/// run by the host's frame callback. Element reads happen in scheduler `measure` callbacks and
/// attribute writes in `mutate` callbacks.
pub struct ImagePipeline<S: DocumentSurface + 'static> {
    shared: Rc<PipelineShared>,
    tracker: VisibilityTracker,
    manager: ResourceManager<LoadedImage>,
    scheduler: BatchScheduler<S>,
    requests: HashMap<ElementId, ImageRequest>,
}

impl<S: DocumentSurface + 'static> ImagePipeline<S> {
    pub fn new(
        visibility: VisibilityConfig,
        resources: ResourceManagerConfig,
        config: ImagePipelineConfig,
        hosts: ImageHosts,
        scheduler: BatchScheduler<S>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let shared = PipelineShared {
            breakpoints: config.sorted_breakpoints(),
            fetcher: hosts.fetcher,
            network: hosts.network,
            policy: NetworkPolicy::default(),
            negotiator: RefCell::new(FormatNegotiator::new(hosts.format_probe)),
            variants: RefCell::new(VariantBuilder::new(
                config.url_scheme,
                config.cdn_base.clone(),
                config.variant_cache_capacity,
            )),
            bandwidth: RefCell::new(BandwidthEstimator::new(config.bandwidth_sample_capacity)),
            elements: Default::default(),
            config,
        };

        Ok(ImagePipeline {
            shared: Rc::new(shared),
            tracker: VisibilityTracker::new(visibility, hosts.intersection),
            manager: ResourceManager::new(resources),
            scheduler,
            requests: Default::default(),
        })
    }

    pub fn from_configuration(
        configuration: &RuntimeConfiguration,
        hosts: ImageHosts,
        scheduler: BatchScheduler<S>,
    ) -> ConfigResult<Self> {
        Self::new(
            configuration.visibility.clone(),
            configuration.resources.clone(),
            configuration.image.clone(),
            hosts,
            scheduler,
        )
    }

    pub fn config(&self) -> &ImagePipelineConfig {
        &self.shared.config
    }

    pub fn scheduler(&self) -> &BatchScheduler<S> {
        &self.scheduler
    }

    pub fn tracker(&self) -> &VisibilityTracker {
        &self.tracker
    }

    pub fn manager(&self) -> &ResourceManager<LoadedImage> {
        &self.manager
    }

    pub fn register_image(
        &mut self,
        element: ElementId,
        request: ImageRequest,
    ) -> LoadHandle {
        if let Some(handle) = self.manager.handle(element) {
            log::warn!("{:?} is already a managed image, ignoring", element);
            return handle;
        }

        let loader = ImageLoader {
            shared: self.shared.clone(),
            request: request.clone(),
        };
        let mut options = ResourceOptions::new(request.priority, loader);
        if self.shared.config.unload_hidden {
            let scheduler = self.scheduler.clone();
            options = options.with_unloader(
                move |target: ElementId, _image: LoadedImage| -> Result<(), Box<dyn Error>> {
                    scheduler.mutate(move |surface: &mut S| {
                        surface.remove_attribute(target, "srcset");
                        surface.remove_attribute(target, "src");
                    });
                    Ok(())
                },
            );
        }

        let handle = self.manager.register(element, options);
        self.shared.elements.borrow_mut().insert(
            element,
            ElementRecord {
                handle,
                css_width: None,
                device_pixel_ratio: 1.0,
            },
        );
        self.requests.insert(element, request);

        self.tracker.observe(element, None);
        // Without an intersection primitive the element is visible right away
        for event in self.tracker.take_events() {
            self.apply_visibility(&event);
        }

        handle
    }

    pub fn unregister_image(
        &mut self,
        element: ElementId,
    ) -> bool {
        if self.requests.remove(&element).is_none() {
            log::debug!("{:?} is not a managed image", element);
            return false;
        }

        self.tracker.unobserve(element);
        self.shared.elements.borrow_mut().remove(&element);
        self.manager.unregister(element)
    }

    /// Feed intersection observations from the host. Returns the visibility transitions they
    /// caused.
    pub fn on_intersections(
        &mut self,
        entries: &[IntersectionEntry],
    ) -> Vec<VisibilityEvent> {
        let events = self.tracker.process_entries(entries);
        for event in &events {
            self.apply_visibility(event);
        }

        events
    }

    fn apply_visibility(
        &mut self,
        event: &VisibilityEvent,
    ) {
        self.manager.handle_visibility(event);
        if let VisibilityEvent::Visible { target, .. } = *event {
            self.schedule_measure(target);
        }
    }

    fn schedule_measure(
        &self,
        target: ElementId,
    ) {
        let shared = self.shared.clone();
        self.scheduler.measure(move |surface: &S| {
            let css_width = surface.bounding_width(target);
            let device_pixel_ratio = surface.device_pixel_ratio();
            if let Some(record) = shared.elements.borrow_mut().get_mut(&target) {
                record.css_width = css_width;
                record.device_pixel_ratio = device_pixel_ratio;
            }
        });
    }

    /// Start queued loads, collect finished ones and schedule the element writes for them.
    #[profiling::function]
    pub fn update(&mut self) -> Vec<StateChange> {
        let changes = self.manager.update();
        for change in &changes {
            match change.current {
                ResourceState::Loaded => {
                    if let Some(image) = self.manager.data(change.target) {
                        self.schedule_apply(change.target, change.handle, image.clone());
                    }
                }
                ResourceState::Failed => self.schedule_placeholder(change.target, change.handle),
                _ => {}
            }
        }

        changes
    }

    fn schedule_apply(
        &self,
        target: ElementId,
        handle: LoadHandle,
        image: LoadedImage,
    ) {
        let shared = self.shared.clone();
        self.scheduler.mutate(move |surface: &mut S| {
            if !shared.is_current(target, handle) {
                log::debug!("{:?} was unregistered before its image was applied", target);
                return;
            }

            surface.set_attribute(target, "sizes", &image.sizes);
            surface.set_attribute(target, "srcset", &image.src_set);
            surface.set_attribute(target, "src", &image.variant.url);
        });
    }

    fn schedule_placeholder(
        &self,
        target: ElementId,
        handle: LoadHandle,
    ) {
        let (width, height) = self
            .requests
            .get(&target)
            .map(|request| request.placeholder_size)
            .unwrap_or((1, 1));
        let uri =
            crate::placeholder_data_uri(width, height, &self.shared.config.placeholder_color);

        let shared = self.shared.clone();
        self.scheduler.mutate(move |surface: &mut S| {
            if !shared.is_current(target, handle) {
                return;
            }

            surface.remove_attribute(target, "srcset");
            surface.remove_attribute(target, "sizes");
            surface.set_attribute(target, "src", &uri);
        });
    }

    /// Try a failed image again from the primary source
    pub fn retry_image(
        &mut self,
        element: ElementId,
    ) -> bool {
        self.manager.retry(element)
    }

    pub fn state(
        &self,
        element: ElementId,
    ) -> Option<ResourceState> {
        self.manager.state(element)
    }

    pub fn visibility(
        &self,
        element: ElementId,
    ) -> VisibilityState {
        self.tracker.state(element)
    }

    pub fn image(
        &self,
        element: ElementId,
    ) -> Option<&LoadedImage> {
        self.manager.data(element)
    }

    pub fn network_profile(&self) -> NetworkProfile {
        self.shared.network_profile()
    }

    pub fn build_variant(
        &self,
        path: &str,
        width: u32,
        quality: u8,
        format: ImageFormat,
    ) -> ImageVariant {
        self.shared
            .variants
            .borrow_mut()
            .build_variant(path, width, quality, format)
    }

    pub fn build_src_set(
        &self,
        path: &str,
        quality: u8,
        format: ImageFormat,
    ) -> String {
        self.shared.variants.borrow_mut().build_src_set(
            path,
            &self.shared.breakpoints,
            quality,
            format,
        )
    }
}
