pub use vantage_base as base;

pub use vantage_scheduler as scheduler;

#[cfg(feature = "vantage-loader")]
pub use vantage_loader as loader;

#[cfg(feature = "vantage-image")]
pub use vantage_image as image;
