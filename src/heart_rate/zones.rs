//! Heart-rate zone classification.
//!
//! Five zones defined as fractions of max heart rate. Samples are tallied
//! incrementally as they arrive, so a session summary never has to rescan
//! the full history.
//!
//! ## Example
//! ```rust
//! use activity_recorder::heart_rate::{HRZoneConfig, ZoneTally};
//!
//! let config = HRZoneConfig::from_max_hr(185);
//! let mut tally = ZoneTally::default();
//! for bpm in [100, 120, 140, 160, 180] {
//!     tally.add(bpm, &config);
//! }
//! let distribution = tally.distribution();
//! assert_eq!(distribution.peak_hr, 180);
//! assert!((distribution.get_zone_percent(5) - 20.0).abs() < 1e-3);
//! ```

use serde::{Deserialize, Serialize};

/// Zone boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HRZoneConfig {
    /// Maximum heart rate
    pub threshold_hr: u8,
    /// Upper bounds of zones 1-4 as fractions of `threshold_hr`.
    /// Zone 5 is everything above the zone 4 bound.
    pub zone_thresholds: [f32; 4],
}

impl HRZoneConfig {
    /// Standard 5-zone model relative to max HR.
    pub fn from_max_hr(max_hr: u8) -> Self {
        Self {
            threshold_hr: max_hr,
            zone_thresholds: [0.60, 0.70, 0.80, 0.90],
        }
    }

    /// Zone (1-5) of a heart rate.
    pub fn get_zone(&self, bpm: u8) -> u8 {
        self.zone_thresholds
            .iter()
            .position(|&t| f32::from(bpm) <= (f32::from(self.threshold_hr) * t).floor())
            .map(|i| i as u8 + 1)
            .unwrap_or(5)
    }
}

impl Default for HRZoneConfig {
    fn default() -> Self {
        Self::from_max_hr(185)
    }
}

/// Time-in-zone summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HRZoneDistribution {
    pub total_samples: u32,
    /// Samples in each zone (index 0 is zone 1)
    pub zone_samples: [u32; 5],
    pub zone_percentages: [f32; 5],
    pub average_hr: f32,
    pub peak_hr: u8,
}

impl HRZoneDistribution {
    /// Percentage for a zone (1-5); 0 for anything else.
    pub fn get_zone_percent(&self, zone: u8) -> f32 {
        match zone {
            1..=5 => self.zone_percentages[(zone - 1) as usize],
            _ => 0.0,
        }
    }
}

/// Running zone tally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneTally {
    zone_samples: [u32; 5],
    sum: u64,
    count: u32,
    peak: u8,
}

impl ZoneTally {
    pub fn add(&mut self, bpm: u8, config: &HRZoneConfig) {
        let zone = config.get_zone(bpm);
        self.zone_samples[(zone - 1) as usize] += 1;
        self.sum += u64::from(bpm);
        self.count += 1;
        self.peak = self.peak.max(bpm);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / f64::from(self.count))
    }

    pub fn peak(&self) -> Option<u8> {
        (self.count > 0).then_some(self.peak)
    }

    pub fn distribution(&self) -> HRZoneDistribution {
        if self.count == 0 {
            return HRZoneDistribution::default();
        }
        let total = self.count as f32;
        let mut zone_percentages = [0.0f32; 5];
        for (pct, &n) in zone_percentages.iter_mut().zip(self.zone_samples.iter()) {
            *pct = n as f32 / total * 100.0;
        }
        HRZoneDistribution {
            total_samples: self.count,
            zone_samples: self.zone_samples,
            zone_percentages,
            average_hr: (self.sum as f64 / f64::from(self.count)) as f32,
            peak_hr: self.peak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(hr_data: &[u8], config: &HRZoneConfig) -> ZoneTally {
        let mut tally = ZoneTally::default();
        for &bpm in hr_data {
            tally.add(bpm, config);
        }
        tally
    }

    #[test]
    fn test_hr_zone_boundaries() {
        let config = HRZoneConfig::from_max_hr(185);
        // 111 / 129 / 148 / 166
        assert_eq!(config.get_zone(100), 1);
        assert_eq!(config.get_zone(111), 1);
        assert_eq!(config.get_zone(112), 2);
        assert_eq!(config.get_zone(140), 3);
        assert_eq!(config.get_zone(160), 4);
        assert_eq!(config.get_zone(167), 5);
        assert_eq!(config.get_zone(255), 5);
    }

    #[test]
    fn test_lower_max_hr_shifts_zones() {
        let config = HRZoneConfig::from_max_hr(170);
        assert_eq!(config.get_zone(150), 4);
        assert_eq!(config.get_zone(160), 5);
    }

    #[test]
    fn test_hr_zone_distribution() {
        let hr_data: Vec<u8> = vec![100, 120, 140, 160, 180, 170, 150, 130, 110, 90];
        let tally = tally(&hr_data, &HRZoneConfig::from_max_hr(185));
        assert_eq!(tally.count(), 10);
        let result = tally.distribution();

        assert_eq!(result.total_samples, 10);
        assert_eq!(result.peak_hr, 180);
        assert!((result.average_hr - 135.0).abs() < 0.01);
        let total: f32 = (1..=5).map(|z| result.get_zone_percent(z)).sum();
        assert!((total - 100.0).abs() < 0.01);
        assert_eq!(result.get_zone_percent(6), 0.0);
    }

    #[test]
    fn test_empty_data() {
        let tally = tally(&[], &HRZoneConfig::default());
        let result = tally.distribution();
        assert_eq!(result.total_samples, 0);
        assert_eq!(result.peak_hr, 0);
        assert_eq!(tally.average(), None);
        assert_eq!(tally.peak(), None);
    }
}
