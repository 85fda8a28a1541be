use std::cell::{Cell, RefCell};
use vantage::image::{
    EffectiveType, FetchOp, FetchRequest, FetchResponse, Fetcher, FormatProbe, ImageFormat,
    NetworkConditions, NetworkSignal,
};

struct InFlightFetch {
    fetch_op: FetchOp,
    remaining_ms: f64,
    // None means the request fails when it lands
    response: Option<FetchResponse>,
}

/// A network with fixed latency and throughput per connection type. Any URL containing
/// "missing" 404s.
pub struct SimulatedNetwork {
    conditions: Cell<NetworkConditions>,
    in_flight: RefCell<Vec<InFlightFetch>>,
    pub completed: Cell<u32>,
    pub failed: Cell<u32>,
    pub transferred_bytes: Cell<u64>,
}

impl SimulatedNetwork {
    pub fn new(conditions: NetworkConditions) -> Self {
        SimulatedNetwork {
            conditions: Cell::new(conditions),
            in_flight: Default::default(),
            completed: Cell::new(0),
            failed: Cell::new(0),
            transferred_bytes: Cell::new(0),
        }
    }

    // (round trip ms, throughput Mbps)
    fn link(&self) -> (f64, f64) {
        match self.conditions.get().effective_type {
            EffectiveType::Slow2g => (2000.0, 0.05),
            EffectiveType::TwoG => (1400.0, 0.25),
            EffectiveType::ThreeG => (300.0, 1.5),
            EffectiveType::FourG | EffectiveType::Unknown => (50.0, 10.0),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.borrow().len()
    }

    /// Let `elapsed_ms` pass and resolve every fetch that finished in that time
    pub fn advance(
        &self,
        elapsed_ms: f64,
    ) {
        let landed: Vec<_> = {
            let mut in_flight = self.in_flight.borrow_mut();
            for fetch in in_flight.iter_mut() {
                fetch.remaining_ms -= elapsed_ms;
            }

            let (landed, pending) = in_flight
                .drain(..)
                .partition(|fetch: &InFlightFetch| fetch.remaining_ms <= 0.0);
            *in_flight = pending;
            landed
        };

        // Resolving may start the next fetch in a fallback chain, so the borrow must be released
        for fetch in landed {
            match fetch.response {
                Some(response) => {
                    self.completed.set(self.completed.get() + 1);
                    self.transferred_bytes
                        .set(self.transferred_bytes.get() + response.transferred_bytes);
                    fetch.fetch_op.complete(response);
                }
                None => {
                    self.failed.set(self.failed.get() + 1);
                    fetch.fetch_op.fail("404 Not Found");
                }
            }
        }
    }
}

impl Fetcher for SimulatedNetwork {
    fn fetch(
        &self,
        request: FetchRequest,
        fetch_op: FetchOp,
    ) {
        let (rtt_ms, mbps) = self.link();
        log::debug!("fetch {} ({}px {:?})", request.url, request.width, request.format);

        let fetch = if request.url.contains("missing") {
            InFlightFetch {
                fetch_op,
                remaining_ms: rtt_ms,
                response: None,
            }
        } else {
            // Roughly 0.15 bytes per pixel at quality 100 for a 3:2 image
            let pixels = request.width as f64 * request.width as f64 * 2.0 / 3.0;
            let compression = match request.format {
                ImageFormat::Avif => 0.5,
                ImageFormat::Webp => 0.7,
                ImageFormat::Jpeg => 1.0,
                ImageFormat::Png => 2.5,
            };
            let transferred_bytes = (pixels * 0.15 * compression) as u64;
            let duration_ms = rtt_ms + transferred_bytes as f64 * 8.0 / (mbps * 1000.0);
            InFlightFetch {
                fetch_op,
                remaining_ms: duration_ms,
                response: Some(FetchResponse {
                    transferred_bytes,
                    duration_ms,
                }),
            }
        };

        self.in_flight.borrow_mut().push(fetch);
    }
}

impl NetworkSignal for SimulatedNetwork {
    fn current(&self) -> NetworkConditions {
        self.conditions.get()
    }
}

/// Decodes webp, jpeg and png but not avif, like an older browser
pub struct SimulatedDecoder;

impl FormatProbe for SimulatedDecoder {
    fn can_decode(
        &self,
        format: ImageFormat,
    ) -> bool {
        !matches!(format, ImageFormat::Avif)
    }
}
