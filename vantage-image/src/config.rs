use crate::{ConfigError, ConfigResult, ImageFormat, UrlScheme};
use serde::{Deserialize, Serialize};
use std::path::Path;
use vantage_loader::{ResourceManagerConfig, RootMargin, VisibilityConfig};

/// Settings for [`ImagePipeline`](crate::ImagePipeline)
#[derive(Clone, Debug)]
pub struct ImagePipelineConfig {
    // Best compression first, the first one the host can decode is used
    pub candidate_formats: Vec<ImageFormat>,
    // Widths the CDN serves, also the widths listed in srcset
    pub breakpoints: Vec<u32>,
    // 1..=100, scaled down on slow networks
    pub default_quality: u8,
    pub url_scheme: UrlScheme,
    // Prepended to every image path, may be empty
    pub cdn_base: String,
    pub variant_cache_capacity: u32,
    // Fill color of the placeholder shown when every source fails
    pub placeholder_color: String,
    // Remove src/srcset from images that scroll out of view so the host can free them
    pub unload_hidden: bool,
    // How many fetches feed the bandwidth estimate
    pub bandwidth_sample_capacity: usize,
}

impl Default for ImagePipelineConfig {
    fn default() -> Self {
        ImagePipelineConfig {
            candidate_formats: vec![ImageFormat::Avif, ImageFormat::Webp, ImageFormat::Jpeg],
            breakpoints: vec![320, 640, 960, 1280, 1920],
            default_quality: 75,
            url_scheme: UrlScheme::Query,
            cdn_base: String::new(),
            variant_cache_capacity: 256,
            placeholder_color: "#e0e0e0".to_string(),
            unload_hidden: false,
            bandwidth_sample_capacity: 16,
        }
    }
}

impl ImagePipelineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.candidate_formats.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "candidate_formats",
                message: "at least one format is required".to_string(),
            });
        }

        if self.breakpoints.is_empty() || self.breakpoints.contains(&0) {
            return Err(ConfigError::InvalidValue {
                field: "breakpoints",
                message: format!("must be non-empty and non-zero, got {:?}", self.breakpoints),
            });
        }

        if !(1..=100).contains(&self.default_quality) {
            return Err(ConfigError::InvalidValue {
                field: "default_quality",
                message: format!("must be in 1..=100, got {}", self.default_quality),
            });
        }

        if self.variant_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "variant_cache_capacity",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    // Sorted and deduplicated, which is the order srcset lists them in
    pub(crate) fn sorted_breakpoints(&self) -> Vec<u32> {
        let mut breakpoints = self.breakpoints.clone();
        breakpoints.sort_unstable();
        breakpoints.dedup();
        breakpoints
    }
}

#[derive(Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfigurationJson {
    pub root_margin: String,
    pub threshold: f64,
    pub max_concurrency: usize,
    pub visibility_priority_weight: f64,
    pub load_history_capacity: usize,
    pub candidate_formats: Vec<ImageFormat>,
    pub breakpoints: Vec<u32>,
    pub default_quality: u8,
    pub url_scheme: UrlScheme,
    pub cdn_base: String,
    pub variant_cache_capacity: u32,
    pub placeholder_color: String,
    pub unload_hidden: bool,
    pub bandwidth_sample_capacity: usize,
}

impl Default for RuntimeConfigurationJson {
    fn default() -> Self {
        let visibility = VisibilityConfig::default();
        let resources = ResourceManagerConfig::default();
        let image = ImagePipelineConfig::default();
        RuntimeConfigurationJson {
            root_margin: visibility.root_margin.to_string(),
            threshold: visibility.threshold,
            max_concurrency: resources.max_concurrency,
            visibility_priority_weight: resources.visibility_priority_weight,
            load_history_capacity: resources.history_capacity,
            candidate_formats: image.candidate_formats,
            breakpoints: image.breakpoints,
            default_quality: image.default_quality,
            url_scheme: image.url_scheme,
            cdn_base: image.cdn_base,
            variant_cache_capacity: image.variant_cache_capacity,
            placeholder_color: image.placeholder_color,
            unload_hidden: image.unload_hidden,
            bandwidth_sample_capacity: image.bandwidth_sample_capacity,
        }
    }
}

/// Everything configurable in the runtime, as loaded from `vantage_config.json`. Fields left out
/// of the file keep their defaults, unknown fields are an error.
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfiguration {
    pub visibility: VisibilityConfig,
    pub resources: ResourceManagerConfig,
    pub image: ImagePipelineConfig,
}

impl RuntimeConfiguration {
    pub const FILE_NAME: &'static str = "vantage_config.json";

    pub fn from_json(json: RuntimeConfigurationJson) -> ConfigResult<Self> {
        let root_margin: RootMargin = json.root_margin.parse()?;

        if !(0.0..=1.0).contains(&json.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "threshold",
                message: format!("must be in 0..=1, got {}", json.threshold),
            });
        }

        if json.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrency",
                message: "must be at least 1".to_string(),
            });
        }

        if !json.visibility_priority_weight.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "visibility_priority_weight",
                message: format!("must be finite, got {}", json.visibility_priority_weight),
            });
        }

        let image = ImagePipelineConfig {
            candidate_formats: json.candidate_formats,
            breakpoints: json.breakpoints,
            default_quality: json.default_quality,
            url_scheme: json.url_scheme,
            cdn_base: json.cdn_base,
            variant_cache_capacity: json.variant_cache_capacity,
            placeholder_color: json.placeholder_color,
            unload_hidden: json.unload_hidden,
            bandwidth_sample_capacity: json.bandwidth_sample_capacity,
        };
        image.validate()?;

        Ok(RuntimeConfiguration {
            visibility: VisibilityConfig {
                root_margin,
                threshold: json.threshold,
            },
            resources: ResourceManagerConfig {
                max_concurrency: json.max_concurrency,
                visibility_priority_weight: json.visibility_priority_weight,
                history_capacity: json.load_history_capacity,
            },
            image,
        })
    }

    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config_file: RuntimeConfigurationJson = serde_json::from_str(json)?;
        Self::from_json(config_file)
    }

    pub fn read_from_path(path: &Path) -> ConfigResult<Self> {
        let file_contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&file_contents)
            .map_err(|e| ConfigError::StringError(format!("{}: {}", path.display(), e)))
    }

    /// Looks for `vantage_config.json` in `search_location` and each of its parents
    pub fn locate_config_file(search_location: &Path) -> ConfigResult<Self> {
        let search_location = dunce::canonicalize(search_location)?;
        let mut path = Some(search_location.clone());
        while let Some(p) = path {
            let joined_path = p.join(Self::FILE_NAME);
            if joined_path.exists() {
                log::info!("Using runtime configuration at {:?}", joined_path);
                return Self::read_from_path(&joined_path);
            }

            path = p.parent().map(|x| x.to_path_buf());
        }

        Err(ConfigError::StringError(format!(
            "{} could not be located at {:?} or in any of its parent directories",
            Self::FILE_NAME,
            search_location
        )))
    }
}
