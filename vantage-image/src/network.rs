use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vantage_base::RingBuffer;

/// Coarse connection class as reported by the host
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Default for EffectiveType {
    fn default() -> Self {
        EffectiveType::Unknown
    }
}

impl fmt::Display for EffectiveType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            EffectiveType::Slow2g => "slow-2g",
            EffectiveType::TwoG => "2g",
            EffectiveType::ThreeG => "3g",
            EffectiveType::FourG => "4g",
            EffectiveType::Unknown => "unknown",
        })
    }
}

impl FromStr for EffectiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Ok(EffectiveType::Slow2g),
            "2g" => Ok(EffectiveType::TwoG),
            "3g" => Ok(EffectiveType::ThreeG),
            "4g" => Ok(EffectiveType::FourG),
            "unknown" | "" => Ok(EffectiveType::Unknown),
            _ => Err(format!("unknown effective connection type {:?}", s)),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct NetworkConditions {
    pub effective_type: EffectiveType,
    // The user asked for reduced data usage
    pub save_data: bool,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<f64>,
}

/// The host's network quality signal. Hosts without one return `NetworkConditions::default()`.
pub trait NetworkSignal {
    fn current(&self) -> NetworkConditions;
}

/// How much to scale down requests for the current network
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct NetworkProfile {
    pub width_scale: f64,
    pub quality_scale: f64,
    pub prefer_cheap_decode: bool,
}

impl NetworkProfile {
    pub const FULL: NetworkProfile = NetworkProfile {
        width_scale: 1.0,
        quality_scale: 1.0,
        prefer_cheap_decode: false,
    };

    pub const THREE_G: NetworkProfile = NetworkProfile {
        width_scale: 0.75,
        quality_scale: 0.8,
        prefer_cheap_decode: true,
    };

    pub const TWO_G: NetworkProfile = NetworkProfile {
        width_scale: 0.5,
        quality_scale: 0.6,
        prefer_cheap_decode: true,
    };

    pub fn for_effective_type(effective_type: EffectiveType) -> Self {
        match effective_type {
            EffectiveType::Slow2g | EffectiveType::TwoG => Self::TWO_G,
            EffectiveType::ThreeG => Self::THREE_G,
            EffectiveType::FourG | EffectiveType::Unknown => Self::FULL,
        }
    }

    // Save-data never gets more than the 2g treatment
    fn with_save_data(self) -> Self {
        NetworkProfile {
            width_scale: self.width_scale.min(Self::TWO_G.width_scale),
            quality_scale: self.quality_scale.min(Self::TWO_G.quality_scale),
            prefer_cheap_decode: true,
        }
    }

    pub fn scale_quality(
        &self,
        quality: u8,
    ) -> u8 {
        let scaled = (quality as f64 * self.quality_scale).round();
        scaled.clamp(1.0, 100.0) as u8
    }
}

#[derive(Copy, Clone, Debug)]
struct BandwidthSample {
    bytes: u64,
    duration_ms: f64,
}

/// Throughput estimate from recent fetches, for hosts that can't report a connection type
pub struct BandwidthEstimator {
    samples: RingBuffer<BandwidthSample>,
}

impl BandwidthEstimator {
    pub fn new(sample_capacity: usize) -> Self {
        BandwidthEstimator {
            samples: RingBuffer::new(sample_capacity),
        }
    }

    pub fn record(
        &mut self,
        bytes: u64,
        duration_ms: f64,
    ) {
        // Cached or instant responses say nothing about the network
        if bytes == 0 || duration_ms.is_nan() || duration_ms <= 0.0 {
            log::trace!("ignoring bandwidth sample {} bytes in {}ms", bytes, duration_ms);
            return;
        }

        self.samples.push(BandwidthSample { bytes, duration_ms });
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Total bits over total time across the retained samples, in megabits per second
    pub fn estimate_mbps(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }

        let (bytes, duration_ms) = self
            .samples
            .iter()
            .fold((0u64, 0.0f64), |(bytes, duration_ms), sample| {
                (bytes + sample.bytes, duration_ms + sample.duration_ms)
            });

        // bits / (ms * 1000) == megabits per second
        Some((bytes as f64 * 8.0) / (duration_ms * 1000.0))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Turns network conditions into a [`NetworkProfile`]
#[derive(Clone, Debug)]
pub struct NetworkPolicy {
    // Below this many Mbps the connection is treated like 2g
    pub slow_threshold_mbps: f64,
    // Below this many Mbps the connection is treated like 3g
    pub medium_threshold_mbps: f64,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        NetworkPolicy {
            slow_threshold_mbps: 0.4,
            medium_threshold_mbps: 1.5,
        }
    }
}

impl NetworkPolicy {
    pub fn classify_bandwidth(
        &self,
        mbps: f64,
    ) -> EffectiveType {
        if mbps < self.slow_threshold_mbps {
            EffectiveType::TwoG
        } else if mbps < self.medium_threshold_mbps {
            EffectiveType::ThreeG
        } else {
            EffectiveType::FourG
        }
    }

    /// The host's connection type wins. If it doesn't know, the downlink it reports is used, then
    /// our own estimate.
    pub fn effective_type(
        &self,
        conditions: &NetworkConditions,
        estimated_mbps: Option<f64>,
    ) -> EffectiveType {
        if conditions.effective_type != EffectiveType::Unknown {
            return conditions.effective_type;
        }

        match conditions.downlink_mbps.or(estimated_mbps) {
            Some(mbps) => self.classify_bandwidth(mbps),
            None => EffectiveType::Unknown,
        }
    }

    pub fn profile(
        &self,
        conditions: &NetworkConditions,
        estimated_mbps: Option<f64>,
    ) -> NetworkProfile {
        let effective_type = self.effective_type(conditions, estimated_mbps);
        let profile = NetworkProfile::for_effective_type(effective_type);
        if conditions.save_data {
            profile.with_save_data()
        } else {
            profile
        }
    }
}
