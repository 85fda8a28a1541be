use crate::ImageFormat;
use serde::{Deserialize, Serialize};
use vantage_base::LruCache;

/// How transform parameters are encoded into the CDN URL
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlScheme {
    // {cdn}{path}?w=640&q=75&fm=webp
    Query,
    // {cdn}/w_640,q_75,f_webp{path}
    Path,
}

/// A fully resolved image resource
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ImageVariant {
    pub format: ImageFormat,
    pub width: u32,
    pub quality: u8,
    pub url: String,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct VariantKey {
    // Compared in full, the cache must never hand back another path's URL
    path: String,
    width: u32,
    quality: u8,
    format: ImageFormat,
}

/// Builds the URL for a variant. The same inputs always produce the same URL.
pub fn variant_url(
    scheme: UrlScheme,
    cdn_base: &str,
    path: &str,
    width: u32,
    quality: u8,
    format: ImageFormat,
) -> String {
    let cdn_base = cdn_base.trim_end_matches('/');
    let separator = if path.starts_with('/') { "" } else { "/" };

    match scheme {
        UrlScheme::Query => {
            let query_start = if path.contains('?') { '&' } else { '?' };
            format!(
                "{}{}{}{}w={}&q={}&fm={}",
                cdn_base,
                separator,
                path,
                query_start,
                width,
                quality,
                format.extension()
            )
        }
        UrlScheme::Path => format!(
            "{}/w_{},q_{},f_{}{}{}",
            cdn_base,
            width,
            quality,
            format.extension(),
            separator,
            path
        ),
    }
}

/// Builds variants and `srcset` strings, memoizing variants in an LRU cache
pub struct VariantBuilder {
    scheme: UrlScheme,
    cdn_base: String,
    cache: LruCache<VariantKey, ImageVariant>,
    cache_hits: u64,
    cache_misses: u64,
}

impl VariantBuilder {
    pub fn new(
        scheme: UrlScheme,
        cdn_base: impl Into<String>,
        cache_capacity: u32,
    ) -> Self {
        VariantBuilder {
            scheme,
            cdn_base: cdn_base.into(),
            cache: LruCache::new(cache_capacity),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    pub fn scheme(&self) -> UrlScheme {
        self.scheme
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses
    }

    pub fn build_variant(
        &mut self,
        path: &str,
        width: u32,
        quality: u8,
        format: ImageFormat,
    ) -> ImageVariant {
        let key = VariantKey {
            path: path.to_string(),
            width,
            quality,
            format,
        };

        if let Some(variant) = self.cache.get(&key) {
            self.cache_hits += 1;
            return variant.clone();
        }

        self.cache_misses += 1;
        let variant = ImageVariant {
            format,
            width,
            quality,
            url: variant_url(self.scheme, &self.cdn_base, path, width, quality, format),
        };

        if let Some((_, evicted)) = self.cache.insert(key, variant.clone()) {
            log::trace!("evicted variant {}", evicted.url);
        }

        variant
    }

    /// `srcset` value listing one variant per width, e.g. `"a?w=320... 320w, a?w=640... 640w"`
    pub fn build_src_set(
        &mut self,
        path: &str,
        widths: &[u32],
        quality: u8,
        format: ImageFormat,
    ) -> String {
        let mut entries = Vec::with_capacity(widths.len());
        for &width in widths {
            let variant = self.build_variant(path, width, quality, format);
            entries.push(format!("{} {}w", variant.url, width));
        }

        entries.join(", ")
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
