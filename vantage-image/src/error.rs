use crate::fetch::FetchFailure;
use std::sync::Arc;
use vantage_loader::visibility::RootMarginParseError;

/// Problems with a configuration file or a configuration value
#[derive(Debug, Clone)]
pub enum ConfigError {
    StringError(String),
    IoError(Arc<std::io::Error>),
    JsonError(Arc<serde_json::Error>),
    RootMarginError(RootMarginParseError),
    InvalidValue { field: &'static str, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            ConfigError::StringError(_) => None,
            ConfigError::IoError(ref e) => Some(&**e),
            ConfigError::JsonError(ref e) => Some(&**e),
            ConfigError::RootMarginError(ref e) => Some(e),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            ConfigError::StringError(ref e) => e.fmt(fmt),
            ConfigError::IoError(ref e) => e.fmt(fmt),
            ConfigError::JsonError(ref e) => e.fmt(fmt),
            ConfigError::RootMarginError(ref e) => e.fmt(fmt),
            ConfigError::InvalidValue {
                field,
                ref message,
            } => write!(fmt, "invalid value for {}: {}", field, message),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::IoError(Arc::new(error))
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::JsonError(Arc::new(error))
    }
}

impl From<RootMarginParseError> for ConfigError {
    fn from(error: RootMarginParseError) -> Self {
        ConfigError::RootMarginError(error)
    }
}

/// Why an image could not be delivered. These are reported through the resource manager and end
/// up as a placeholder, they are never returned to the code that registered the image.
#[derive(Debug, Clone)]
pub enum ImageError {
    UnknownFormat(String),
    FetchFailed { url: String, reason: String },
    FallbackChainExhausted { failed_attempts: u32 },
}

pub type ImageResult<T> = Result<T, ImageError>;

impl std::error::Error for ImageError {}

impl core::fmt::Display for ImageError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            ImageError::UnknownFormat(ref format) => {
                write!(fmt, "unknown image format {:?}", format)
            }
            ImageError::FetchFailed {
                ref url,
                ref reason,
            } => write!(fmt, "fetching {} failed: {}", url, reason),
            ImageError::FallbackChainExhausted { failed_attempts } => write!(
                fmt,
                "every source failed ({} attempts)",
                failed_attempts
            ),
        }
    }
}

impl From<FetchFailure> for ImageError {
    fn from(failure: FetchFailure) -> Self {
        ImageError::FetchFailed {
            url: failure.url,
            reason: failure.reason,
        }
    }
}
