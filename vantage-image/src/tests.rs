use crate::{
    EffectiveType, FetchOp, FetchRequest, FetchResponse, Fetcher, FormatProbe, ImageFormat,
    ImageHosts, ImagePipeline, ImagePipelineConfig, ImageRequest, NetworkConditions,
    NetworkSignal, UrlScheme,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use vantage_base::hashing::HashMap;
use vantage_base::ElementId;
use vantage_loader::{
    IntersectionEntry, IntersectionHost, ResourceManagerConfig, ResourceState, VisibilityConfig,
};
use vantage_scheduler::{BatchScheduler, DocumentSurface, FrameRequester};

#[derive(Default)]
struct FakeSurface {
    next_id: u64,
    widths: HashMap<ElementId, f64>,
    device_pixel_ratio: f64,
    attributes: HashMap<(ElementId, String), String>,
}

impl FakeSurface {
    fn attribute(
        &self,
        element: ElementId,
        name: &str,
    ) -> Option<&str> {
        self.attributes
            .get(&(element, name.to_string()))
            .map(String::as_str)
    }
}

impl DocumentSurface for FakeSurface {
    fn create_element(
        &mut self,
        _tag: &str,
    ) -> ElementId {
        self.next_id += 1;
        ElementId(self.next_id)
    }

    fn set_attribute(
        &mut self,
        element: ElementId,
        name: &str,
        value: &str,
    ) {
        self.attributes
            .insert((element, name.to_string()), value.to_string());
    }

    fn remove_attribute(
        &mut self,
        element: ElementId,
        name: &str,
    ) {
        self.attributes.remove(&(element, name.to_string()));
    }

    fn set_style(
        &mut self,
        _element: ElementId,
        _property: &str,
        _value: &str,
    ) {
    }

    fn append_child(
        &mut self,
        _parent: ElementId,
        _child: ElementId,
    ) {
    }

    fn remove_child(
        &mut self,
        _parent: ElementId,
        _child: ElementId,
    ) {
    }

    fn bounding_width(
        &self,
        element: ElementId,
    ) -> Option<f64> {
        self.widths.get(&element).copied()
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }
}

#[derive(Default)]
struct FakeFrameRequester;

impl FrameRequester for FakeFrameRequester {
    fn request_frame(&self) {}
}

#[derive(Default)]
struct FakeIntersectionHost {
    unsupported: bool,
}

impl IntersectionHost for FakeIntersectionHost {
    fn is_supported(&self) -> bool {
        !self.unsupported
    }

    fn observe(
        &self,
        _target: ElementId,
        _config: &VisibilityConfig,
    ) {
    }

    fn unobserve(
        &self,
        _target: ElementId,
    ) {
    }
}

// Fails any URL containing one of `failing`, otherwise succeeds immediately unless deferred
#[derive(Default)]
struct FakeFetcher {
    failing: Vec<&'static str>,
    deferred: bool,
    requests: RefCell<Vec<FetchRequest>>,
    pending: RefCell<Vec<FetchOp>>,
}

impl Fetcher for FakeFetcher {
    fn fetch(
        &self,
        request: FetchRequest,
        fetch_op: FetchOp,
    ) {
        let fails = self.failing.iter().any(|x| request.url.contains(x));
        self.requests.borrow_mut().push(request);
        if fails {
            fetch_op.fail("404");
        } else if self.deferred {
            self.pending.borrow_mut().push(fetch_op);
        } else {
            fetch_op.complete(FetchResponse {
                transferred_bytes: 50_000,
                duration_ms: 100.0,
            });
        }
    }
}

#[derive(Default)]
struct FakeNetwork {
    conditions: Cell<NetworkConditions>,
}

impl NetworkSignal for FakeNetwork {
    fn current(&self) -> NetworkConditions {
        self.conditions.get()
    }
}

struct FakeProbe {
    supported: Vec<ImageFormat>,
}

impl FormatProbe for FakeProbe {
    fn can_decode(
        &self,
        format: ImageFormat,
    ) -> bool {
        self.supported.contains(&format)
    }
}

struct Harness {
    surface: FakeSurface,
    fetcher: Rc<FakeFetcher>,
    network: Rc<FakeNetwork>,
    scheduler: BatchScheduler<FakeSurface>,
    pipeline: ImagePipeline<FakeSurface>,
}

impl Harness {
    fn new(
        fetcher: FakeFetcher,
        supported: Vec<ImageFormat>,
        config: ImagePipelineConfig,
    ) -> Self {
        Self::with_intersection(fetcher, supported, config, FakeIntersectionHost::default())
    }

    fn with_intersection(
        fetcher: FakeFetcher,
        supported: Vec<ImageFormat>,
        config: ImagePipelineConfig,
        intersection: FakeIntersectionHost,
    ) -> Self {
        let fetcher = Rc::new(fetcher);
        let network = Rc::new(FakeNetwork::default());
        let scheduler = BatchScheduler::new(Rc::new(FakeFrameRequester));
        let hosts = ImageHosts {
            intersection: Rc::new(intersection),
            fetcher: fetcher.clone(),
            network: network.clone(),
            format_probe: Box::new(FakeProbe { supported }),
        };
        let pipeline = ImagePipeline::new(
            VisibilityConfig::default(),
            ResourceManagerConfig::default(),
            config,
            hosts,
            scheduler.clone(),
        )
        .unwrap();

        Harness {
            surface: FakeSurface {
                device_pixel_ratio: 1.0,
                ..Default::default()
            },
            fetcher,
            network,
            scheduler,
            pipeline,
        }
    }

    fn add_image(
        &mut self,
        css_width: f64,
        request: ImageRequest,
    ) -> ElementId {
        let element = self.surface.create_element("img");
        self.surface.widths.insert(element, css_width);
        self.pipeline.register_image(element, request);
        element
    }

    fn show(
        &mut self,
        elements: &[ElementId],
    ) {
        let entries: Vec<_> = elements
            .iter()
            .map(|&target| IntersectionEntry {
                target,
                intersection_ratio: 1.0,
                is_intersecting: true,
            })
            .collect();
        self.pipeline.on_intersections(&entries);
    }

    fn hide(
        &mut self,
        element: ElementId,
    ) {
        self.pipeline.on_intersections(&[IntersectionEntry {
            target: element,
            intersection_ratio: 0.0,
            is_intersecting: false,
        }]);
    }

    // One host frame: measure, load, then write
    fn frame(&mut self) {
        self.scheduler.run_cycle(&mut self.surface);
        self.pipeline.update();
        self.scheduler.run_cycle(&mut self.surface);
    }
}

fn config() -> ImagePipelineConfig {
    ImagePipelineConfig {
        cdn_base: "https://cdn.example.com".to_string(),
        ..Default::default()
    }
}

const ALL_FORMATS: [ImageFormat; 4] = ImageFormat::ALL;

#[test]
fn visible_image_gets_src_srcset_and_sizes() {
    let mut harness = Harness::new(FakeFetcher::default(), ALL_FORMATS.to_vec(), config());
    let img = harness.add_image(600.0, ImageRequest::new("/cat.jpg"));

    // Nothing happens until the element is visible
    harness.frame();
    assert!(harness.fetcher.requests.borrow().is_empty());

    harness.show(&[img]);
    harness.frame();

    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Loaded));
    assert_eq!(
        harness.surface.attribute(img, "src"),
        Some("https://cdn.example.com/cat.jpg?w=640&q=75&fm=avif")
    );
    assert_eq!(harness.surface.attribute(img, "sizes"), Some("600px"));
    let src_set = harness.surface.attribute(img, "srcset").unwrap();
    assert!(src_set.starts_with("https://cdn.example.com/cat.jpg?w=320&q=75&fm=avif 320w, "));
    assert!(src_set.ends_with(" 1920w"));
}

#[test]
fn second_alternate_wins_after_two_failures() {
    let fetcher = FakeFetcher {
        failing: vec!["/primary.jpg", "/first.jpg"],
        ..Default::default()
    };
    let mut harness = Harness::new(fetcher, ALL_FORMATS.to_vec(), config());
    let img = harness.add_image(
        300.0,
        ImageRequest::new("/primary.jpg").with_alternates(["/first.jpg", "/second.jpg"]),
    );
    harness.show(&[img]);
    harness.frame();

    let image = harness.pipeline.image(img).unwrap();
    assert_eq!(image.source, "/second.jpg");
    assert_eq!(image.failed_attempts, 2);
    assert!(image.variant.url.contains("/second.jpg"));
    assert_eq!(harness.fetcher.requests.borrow().len(), 3);
    assert_eq!(
        harness.surface.attribute(img, "src"),
        Some(image.variant.url.as_str())
    );
}

#[test]
fn exhausted_chain_shows_placeholder() {
    let fetcher = FakeFetcher {
        failing: vec![".jpg"],
        ..Default::default()
    };
    let mut harness = Harness::new(fetcher, ALL_FORMATS.to_vec(), config());
    let img = harness.add_image(
        300.0,
        ImageRequest::new("/a.jpg")
            .with_alternates(["/b.jpg"])
            .with_placeholder_size(40, 30),
    );
    harness.show(&[img]);
    harness.frame();

    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Failed));
    assert!(harness.pipeline.image(img).is_none());
    // Each source is tried exactly once
    assert_eq!(harness.fetcher.requests.borrow().len(), 2);

    let src = harness.surface.attribute(img, "src").unwrap();
    assert!(src.starts_with("data:image/svg+xml"));
    assert!(src.contains("width='40' height='30'"));
    assert!(harness.surface.attribute(img, "srcset").is_none());

    // No silent retries
    harness.frame();
    assert_eq!(harness.fetcher.requests.borrow().len(), 2);
}

#[test]
fn slow_network_scales_width_and_quality() {
    let mut harness = Harness::new(FakeFetcher::default(), ALL_FORMATS.to_vec(), config());
    harness.network.conditions.set(NetworkConditions {
        effective_type: EffectiveType::TwoG,
        ..Default::default()
    });

    let img = harness.add_image(600.0, ImageRequest::new("/cat.jpg"));
    harness.show(&[img]);
    harness.frame();

    // 600 * 0.5 = 300 -> 320 breakpoint, 75 * 0.6 = 45, and no avif on a slow connection
    let image = harness.pipeline.image(img).unwrap();
    assert_eq!(image.variant.width, 320);
    assert_eq!(image.variant.quality, 45);
    assert_eq!(image.variant.format, ImageFormat::Webp);
}

#[test]
fn device_pixel_ratio_raises_width() {
    let mut harness = Harness::new(FakeFetcher::default(), ALL_FORMATS.to_vec(), config());
    harness.surface.device_pixel_ratio = 2.0;
    let img = harness.add_image(400.0, ImageRequest::new("/cat.jpg"));
    harness.show(&[img]);
    harness.frame();

    assert_eq!(harness.pipeline.image(img).unwrap().variant.width, 960);
}

#[test]
fn negotiates_supported_format() {
    let mut harness = Harness::new(FakeFetcher::default(), vec![ImageFormat::Jpeg], config());
    let img = harness.add_image(100.0, ImageRequest::new("/cat.jpg"));
    harness.show(&[img]);
    harness.frame();

    assert_eq!(
        harness.pipeline.image(img).unwrap().variant.format,
        ImageFormat::Jpeg
    );
}

#[test]
fn loads_in_priority_order() {
    let fetcher = FakeFetcher {
        deferred: true,
        ..Default::default()
    };
    let mut harness = Harness::new(fetcher, ALL_FORMATS.to_vec(), config());
    let a = harness.add_image(300.0, ImageRequest::new("/a.jpg").with_priority(5.0));
    let b = harness.add_image(300.0, ImageRequest::new("/b.jpg").with_priority(1.0));
    let c = harness.add_image(300.0, ImageRequest::new("/c.jpg").with_priority(10.0));
    harness.show(&[a, b, c]);

    for _ in 0..3 {
        harness.frame();
        // Concurrency is 1, so exactly one fetch is outstanding
        assert_eq!(harness.fetcher.pending.borrow().len(), 1);
        let fetch_op = harness.fetcher.pending.borrow_mut().remove(0);
        fetch_op.complete(FetchResponse::default());
    }
    harness.frame();

    assert_eq!(harness.pipeline.manager().load_order(), vec![c, a, b]);
    let requested: Vec<_> = harness
        .fetcher
        .requests
        .borrow()
        .iter()
        .map(|request| request.url.contains("/c.jpg"))
        .collect();
    assert_eq!(requested, vec![true, false, false]);
    for img in [a, b, c] {
        assert_eq!(harness.pipeline.state(img), Some(ResourceState::Loaded));
    }
}

#[test]
fn unregistered_image_is_not_written() {
    let fetcher = FakeFetcher {
        deferred: true,
        ..Default::default()
    };
    let mut harness = Harness::new(fetcher, ALL_FORMATS.to_vec(), config());
    let img = harness.add_image(300.0, ImageRequest::new("/a.jpg"));
    harness.show(&[img]);
    harness.frame();

    assert!(harness.pipeline.unregister_image(img));
    assert!(!harness.pipeline.unregister_image(img));

    let fetch_op = harness.fetcher.pending.borrow_mut().remove(0);
    fetch_op.complete(FetchResponse::default());
    harness.frame();

    assert_eq!(harness.pipeline.state(img), None);
    assert!(harness.surface.attribute(img, "src").is_none());
}

#[test]
fn unregistered_image_stops_walking_its_fallbacks() {
    let fetcher = FakeFetcher {
        deferred: true,
        ..Default::default()
    };
    let mut harness = Harness::new(fetcher, ALL_FORMATS.to_vec(), config());
    let img = harness.add_image(
        300.0,
        ImageRequest::new("/a.jpg").with_alternates(["/b.jpg", "/c.jpg"]),
    );
    harness.show(&[img]);
    harness.frame();
    assert_eq!(harness.fetcher.requests.borrow().len(), 1);

    assert!(harness.pipeline.unregister_image(img));
    let fetch_op = harness.fetcher.pending.borrow_mut().remove(0);
    fetch_op.fail("503");
    harness.frame();

    // No alternate is requested for an image nobody manages anymore
    let requests: Vec<_> = harness
        .fetcher
        .requests
        .borrow()
        .iter()
        .map(|request| request.url.clone())
        .collect();
    assert_eq!(requests, vec!["https://cdn.example.com/a.jpg?w=320&q=75&fm=avif"]);
    assert!(harness.fetcher.pending.borrow().is_empty());
    assert!(harness.surface.attribute(img, "src").is_none());
}

#[test]
fn dropped_fetch_counts_as_failure() {
    let fetcher = FakeFetcher {
        deferred: true,
        ..Default::default()
    };
    let mut harness = Harness::new(fetcher, ALL_FORMATS.to_vec(), config());
    let img = harness.add_image(300.0, ImageRequest::new("/a.jpg").with_alternates(["/b.jpg"]));
    harness.show(&[img]);
    harness.frame();

    // Dropping the first op moves on to the alternate
    let fetch_op = harness.fetcher.pending.borrow_mut().remove(0);
    drop(fetch_op);
    assert_eq!(harness.fetcher.requests.borrow().len(), 2);

    let fetch_op = harness.fetcher.pending.borrow_mut().remove(0);
    fetch_op.complete(FetchResponse::default());
    harness.frame();
    assert_eq!(harness.pipeline.image(img).unwrap().failed_attempts, 1);
}

#[test]
fn degraded_mode_loads_without_observations() {
    let mut harness = Harness::with_intersection(
        FakeFetcher::default(),
        ALL_FORMATS.to_vec(),
        config(),
        FakeIntersectionHost { unsupported: true },
    );
    let img = harness.add_image(300.0, ImageRequest::new("/a.jpg"));
    harness.frame();

    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Loaded));
}

#[test]
fn hidden_images_are_unloaded_when_configured() {
    let config = ImagePipelineConfig {
        unload_hidden: true,
        url_scheme: UrlScheme::Path,
        ..config()
    };
    let mut harness = Harness::new(FakeFetcher::default(), ALL_FORMATS.to_vec(), config);
    let img = harness.add_image(300.0, ImageRequest::new("/a.jpg"));
    harness.show(&[img]);
    harness.frame();
    assert_eq!(
        harness.surface.attribute(img, "src"),
        Some("https://cdn.example.com/w_320,q_75,f_avif/a.jpg")
    );

    harness.hide(img);
    harness.frame();
    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Unloaded));
    assert!(harness.surface.attribute(img, "src").is_none());
    assert!(harness.surface.attribute(img, "srcset").is_none());

    // Scrolling back reloads it
    harness.show(&[img]);
    harness.frame();
    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Loaded));
    assert!(harness.surface.attribute(img, "src").is_some());
}

#[test]
fn image_hidden_while_fetching_is_unloaded_when_configured() {
    let fetcher = FakeFetcher {
        deferred: true,
        ..Default::default()
    };
    let config = ImagePipelineConfig {
        unload_hidden: true,
        ..config()
    };
    let mut harness = Harness::new(fetcher, ALL_FORMATS.to_vec(), config);
    let img = harness.add_image(300.0, ImageRequest::new("/a.jpg"));
    harness.show(&[img]);
    harness.frame();
    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Loading));

    harness.hide(img);
    let fetch_op = harness.fetcher.pending.borrow_mut().remove(0);
    fetch_op.complete(FetchResponse::default());
    harness.frame();
    harness.frame();

    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Unloaded));
    assert!(harness.surface.attribute(img, "src").is_none());
    assert!(harness.surface.attribute(img, "srcset").is_none());

    // Scrolling back fetches it again and writes it this time
    harness.show(&[img]);
    harness.frame();
    let fetch_op = harness.fetcher.pending.borrow_mut().remove(0);
    fetch_op.complete(FetchResponse::default());
    harness.frame();
    assert_eq!(harness.pipeline.state(img), Some(ResourceState::Loaded));
    assert_eq!(
        harness.surface.attribute(img, "src"),
        Some("https://cdn.example.com/a.jpg?w=320&q=75&fm=avif")
    );
}

#[test]
fn invalid_config_is_rejected() {
    let hosts = ImageHosts {
        intersection: Rc::new(FakeIntersectionHost::default()),
        fetcher: Rc::new(FakeFetcher::default()),
        network: Rc::new(FakeNetwork::default()),
        format_probe: Box::new(FakeProbe { supported: vec![] }),
    };
    let scheduler = BatchScheduler::<FakeSurface>::new(Rc::new(FakeFrameRequester));
    let result = ImagePipeline::new(
        VisibilityConfig::default(),
        ResourceManagerConfig::default(),
        ImagePipelineConfig {
            breakpoints: vec![],
            ..Default::default()
        },
        hosts,
        scheduler,
    );
    assert!(result.is_err());
}
