//! Adaptive image delivery: picks format, width and quality for the device and network, builds
//! CDN URLs for them, and loads images through the resource manager as they become visible.

mod error;
pub use error::ConfigError;
pub use error::ConfigResult;
pub use error::ImageError;
pub use error::ImageResult;

pub mod format;
pub use format::{FormatNegotiator, FormatProbe, ImageFormat};

pub mod network;
pub use network::{
    BandwidthEstimator, EffectiveType, NetworkConditions, NetworkPolicy, NetworkProfile,
    NetworkSignal,
};

mod sizing;
pub use sizing::select_width;
pub use sizing::sizes_attribute;

pub mod variant;
pub use variant::{variant_url, ImageVariant, UrlScheme, VariantBuilder};

mod fallback;
pub use fallback::FallbackChain;

mod placeholder;
pub use placeholder::placeholder_data_uri;

pub mod fetch;
pub use fetch::{FetchCallback, FetchFailure, FetchOp, FetchRequest, FetchResponse, Fetcher};

mod config;
pub use config::{ImagePipelineConfig, RuntimeConfiguration, RuntimeConfigurationJson};

mod pipeline;
pub use pipeline::{ImageHosts, ImagePipeline, ImageRequest, LoadedImage};

#[cfg(test)]
mod tests;
