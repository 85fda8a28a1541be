mod fragments;
mod host;
mod network;

use fragments::FragmentSection;
use host::{SimulatedDocument, SimulatedFrames, SimulatedIdlePeriod, SimulatedViewport};
use network::{SimulatedDecoder, SimulatedNetwork};
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;
use structopt::StructOpt;
use vantage::base::{ElementId, LruCache, ObjectPool, RingBuffer};
use vantage::image::{
    EffectiveType, ImageHosts, ImagePipeline, ImageRequest, NetworkConditions,
    RuntimeConfiguration,
};
use vantage::loader::{IntersectionEntry, ResourceState};
use vantage::scheduler::{BatchScheduler, DocumentSurface, IdleQueue, TaskLoop};

const FRAME_MS: f64 = 1000.0 / 60.0;
const IMAGE_WIDTH: f64 = 600.0;
const IMAGE_HEIGHT: f64 = 400.0;
const GAP: f64 = 40.0;
const VIEWPORT_HEIGHT: f64 = 800.0;

#[derive(StructOpt, Debug)]
#[structopt(name = "demo-gallery", about = "Scrolls a simulated image gallery through the runtime")]
pub struct DemoArgs {
    // Defaults to searching for vantage_config.json from the working directory up
    #[structopt(name = "config", long, parse(from_os_str))]
    pub config: Option<PathBuf>,
    #[structopt(name = "network", long, default_value = "4g")]
    pub network: EffectiveType,
    #[structopt(name = "save-data", long)]
    pub save_data: bool,
    #[structopt(name = "images", long, default_value = "24")]
    pub images: usize,
    #[structopt(name = "frames", long, default_value = "600")]
    pub frames: u32,
    // CSS pixels per millisecond
    #[structopt(name = "scroll-speed", long, default_value = "0.6")]
    pub scroll_speed: f64,
    #[structopt(name = "device-pixel-ratio", long, default_value = "2")]
    pub device_pixel_ratio: f64,
    // Simulate a host without an intersection primitive
    #[structopt(name = "no-intersection", long)]
    pub no_intersection: bool,
    #[structopt(name = "trace", long)]
    pub trace: bool,
}

fn load_configuration(args: &DemoArgs) -> Result<RuntimeConfiguration, Box<dyn Error>> {
    if let Some(path) = &args.config {
        return Ok(RuntimeConfiguration::read_from_path(path)?);
    }

    match RuntimeConfiguration::locate_config_file(&std::env::current_dir()?) {
        Ok(configuration) => Ok(configuration),
        Err(e) => {
            log::info!("{}, using the default configuration", e);
            Ok(RuntimeConfiguration::default())
        }
    }
}

// Every 6th image has a broken primary and must fall back, every 11th is broken entirely
fn image_request(index: usize) -> ImageRequest {
    let path = format!("/gallery/photo-{:03}.jpg", index);
    let request = ImageRequest::new(path.clone())
        .with_width_hint(IMAGE_WIDTH)
        .with_placeholder_size(IMAGE_WIDTH as u32, IMAGE_HEIGHT as u32)
        // Images further down the page matter less
        .with_priority(-(index as f64) * 0.01);

    if index % 11 == 10 {
        ImageRequest {
            path: format!("/gallery/missing-{:03}.jpg", index),
            ..request
        }
        .with_alternates([format!("/archive/missing-{:03}.jpg", index)])
    } else if index % 6 == 5 {
        ImageRequest {
            path: format!("/gallery/missing-{:03}.jpg", index),
            ..request
        }
        .with_alternates([path])
    } else {
        request
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = DemoArgs::from_args();

    // Setup logging
    env_logger::Builder::default()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(if args.trace {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        })
        .init();

    let configuration = load_configuration(&args)?;
    log::info!("{:#?}", configuration);

    let frames = Rc::new(SimulatedFrames::default());
    let viewport = Rc::new(SimulatedViewport::new(VIEWPORT_HEIGHT, !args.no_intersection));
    let network = Rc::new(SimulatedNetwork::new(NetworkConditions {
        effective_type: args.network,
        save_data: args.save_data,
        ..Default::default()
    }));
    let mut document = SimulatedDocument::new(args.device_pixel_ratio);

    let scheduler = BatchScheduler::<SimulatedDocument>::new(frames.clone());
    let task_loop = TaskLoop::new(frames.clone());
    let idle_queue = IdleQueue::new(frames.clone());

    let mut pipeline = ImagePipeline::from_configuration(
        &configuration,
        ImageHosts {
            intersection: viewport.clone(),
            fetcher: network.clone(),
            network: network.clone(),
            format_probe: Box::new(SimulatedDecoder),
        },
        scheduler.clone(),
    )?;

    let mut fragments = FragmentSection::new(
        configuration.visibility.clone(),
        configuration.resources.clone(),
        viewport.clone(),
        scheduler.clone(),
    );

    // Lay out the page: a column of images with a comments slot after every 8th
    let root = document.root();
    let mut images = Vec::with_capacity(args.images);
    let mut top = 0.0;
    for index in 0..args.images {
        let img = document.create_element("img");
        document.append_child(root, img);
        document.place(img, top, IMAGE_WIDTH, IMAGE_HEIGHT);
        top += IMAGE_HEIGHT + GAP;
        pipeline.register_image(img, image_request(index));
        images.push(img);

        if index % 8 == 7 {
            let slot = document.create_element("div");
            document.append_child(root, slot);
            document.place(slot, top, IMAGE_WIDTH, 240.0);
            top += 240.0 + GAP;
            fragments.add_slot(slot, 0.0);
        }
    }

    let page_height = top;
    let max_scroll = (page_height - VIEWPORT_HEIGHT).max(0.0);

    // Scroll down the page, then stop ticking
    let scroll_viewport = viewport.clone();
    let scroll_speed = args.scroll_speed;
    task_loop.add("scroll", 10, move |elapsed| {
        let scroll_top = (scroll_viewport.scroll_top.get() + scroll_speed * elapsed).min(max_scroll);
        scroll_viewport.scroll_top.set(scroll_top);
        scroll_top < max_scroll
    });

    let frame_times = Rc::new(RefCell::new(RingBuffer::<f64>::new(60)));
    let stats_frame_times = frame_times.clone();
    let stats_frames = Rc::new(Cell::new(0u32));
    let stats_viewport = viewport.clone();
    task_loop.add("stats", 0, move |elapsed| {
        stats_frame_times.borrow_mut().push(elapsed);
        stats_frames.set(stats_frames.get() + 1);
        if stats_frames.get() % 60 == 0 {
            log::info!("scrolled to {:.0}px", stats_viewport.scroll_top.get());
        }
        true
    });

    // Most recently loaded images, filled in from idle time
    let recently_loaded = Rc::new(RefCell::new(LruCache::<ElementId, String>::new(8)));

    let mut entries_pool = ObjectPool::new(
        2,
        Vec::<IntersectionEntry>::default,
        |entries: &mut Vec<IntersectionEntry>| entries.clear(),
    );

    for frame in 0..args.frames {
        profiling::scope!("frame");
        let now = frame as f64 * FRAME_MS;
        network.advance(FRAME_MS);
        task_loop.run_frame(now);

        let mut entries = entries_pool.acquire();
        viewport.intersections(&document, &mut entries);
        pipeline.on_intersections(&entries);
        fragments.on_intersections(&entries);
        entries_pool.release(entries);

        // Reads (element measurements) first
        scheduler.run_cycle(&mut document);

        for change in pipeline.update() {
            log::debug!("{:?} {:?} -> {:?}", change.target, change.previous, change.current);
            if change.current == ResourceState::Loaded {
                let url = pipeline
                    .image(change.target)
                    .map(|image| image.variant.url.clone())
                    .unwrap_or_default();
                let recently_loaded = recently_loaded.clone();
                let target = change.target;
                idle_queue.schedule(move || {
                    recently_loaded.borrow_mut().insert(target, url);
                });
            }
        }

        for change in fragments.update() {
            log::debug!("fragment {:?} -> {:?}", change.target, change.current);
        }

        // Then the writes queued by the updates above
        scheduler.run_cycle(&mut document);

        if !idle_queue.is_empty() {
            idle_queue.run(&SimulatedIdlePeriod::new(4.0));
        }

        profiling::finish_frame!();
    }

    let loaded = images
        .iter()
        .filter(|&&img| pipeline.state(img) == Some(ResourceState::Loaded))
        .count();
    let failed = images
        .iter()
        .filter(|&&img| pipeline.state(img) == Some(ResourceState::Failed))
        .count();
    let fallbacks = images
        .iter()
        .filter_map(|&img| pipeline.image(img))
        .filter(|image| image.failed_attempts > 0)
        .count();

    log::info!(
        "{} images: {} loaded ({} from a fallback), {} failed, {} still pending",
        images.len(),
        loaded,
        fallbacks,
        failed,
        images.len() - loaded - failed
    );
    log::info!(
        "{} with src set, {} attribute writes, {} fetches completed, {} failed, {} bytes, {} in flight",
        host::count_with_attribute(&document, &images, "src"),
        document.attribute_writes,
        network.completed.get(),
        network.failed.get(),
        network.transferred_bytes.get(),
        network.in_flight_count()
    );
    log::info!(
        "network profile {:?}, {} frames requested, {} idle periods requested, {} surface cycles",
        pipeline.network_profile(),
        frames.frame_requests.get(),
        frames.idle_requests.get(),
        scheduler.cycles_run()
    );
    let mounted_panels: usize = fragments
        .slots()
        .iter()
        .map(|&slot| document.child_count(slot))
        .sum();
    log::info!(
        "{} of {} comment panels mounted, {} observed elements",
        mounted_panels,
        fragments.slots().len(),
        viewport.observed_count()
    );

    let recent_frame_times = frame_times.borrow();
    if !recent_frame_times.is_empty() {
        let average = recent_frame_times.iter().sum::<f64>() / recent_frame_times.len() as f64;
        log::info!(
            "average frame time over the last {} frames: {:.2}ms",
            recent_frame_times.len(),
            average
        );
    }

    for (element, url) in recently_loaded.borrow().iter() {
        log::info!("recently loaded {:?}: {}", element, url);
    }

    Ok(())
}
