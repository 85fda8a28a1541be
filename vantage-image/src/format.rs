use crate::{ImageError, ImageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vantage_base::hashing::HashMap;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Avif,
    Webp,
    Jpeg,
    Png,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 4] = [
        ImageFormat::Avif,
        ImageFormat::Webp,
        ImageFormat::Jpeg,
        ImageFormat::Png,
    ];

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Avif => "image/avif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Avif => "avif",
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    // AVIF compresses best but is by far the most expensive to decode on low-end devices
    pub fn is_cheap_to_decode(self) -> bool {
        !matches!(self, ImageFormat::Avif)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = ImageError;

    fn from_str(s: &str) -> ImageResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avif" => Ok(ImageFormat::Avif),
            "webp" => Ok(ImageFormat::Webp),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            _ => Err(ImageError::UnknownFormat(s.to_string())),
        }
    }
}

/// The host's decode test, typically decoding a tiny embedded sample of the format
pub trait FormatProbe {
    fn can_decode(
        &self,
        format: ImageFormat,
    ) -> bool;
}

/// Picks the best format the host can decode. Each format is probed at most once, support can't
/// change while the process is running.
pub struct FormatNegotiator {
    probe: Box<dyn FormatProbe>,
    support: HashMap<ImageFormat, bool>,
}

impl FormatNegotiator {
    // Used when nothing in the candidate list decodes
    pub const FALLBACK_FORMAT: ImageFormat = ImageFormat::Jpeg;

    pub fn new(probe: Box<dyn FormatProbe>) -> Self {
        FormatNegotiator {
            probe,
            support: Default::default(),
        }
    }

    pub fn is_supported(
        &mut self,
        format: ImageFormat,
    ) -> bool {
        if let Some(&supported) = self.support.get(&format) {
            return supported;
        }

        let supported = self.probe.can_decode(format);
        log::debug!("probed {:?}: supported = {}", format, supported);
        self.support.insert(format, supported);
        supported
    }

    pub fn probed_count(&self) -> usize {
        self.support.len()
    }

    /// First supported format in `candidates`, which should be ordered best compression first.
    /// With `prefer_cheap_decode`, formats that are expensive to decode are only used if nothing
    /// cheaper is supported.
    pub fn negotiate(
        &mut self,
        candidates: &[ImageFormat],
        prefer_cheap_decode: bool,
    ) -> ImageFormat {
        if prefer_cheap_decode {
            for &format in candidates.iter().filter(|x| x.is_cheap_to_decode()) {
                if self.is_supported(format) {
                    return format;
                }
            }
        }

        for &format in candidates {
            if self.is_supported(format) {
                return format;
            }
        }

        log::debug!(
            "none of {:?} are supported, falling back to {:?}",
            candidates,
            Self::FALLBACK_FORMAT
        );
        Self::FALLBACK_FORMAT
    }
}
