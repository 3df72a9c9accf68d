//! Scoring configuration shared by every panel group.

use crate::error::{Error, Result};

/// Largest powder histogram accepted by [`ScoringConfig::validate`].
pub const MAX_POWDER_BINS: usize = 1 << 20;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Thresholds and windows used by peak matching and the objective
/// functions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScoringConfig {
    /// Reflections and powder peaks at or below this intensity are ignored (ADU).
    pub min_intensity: f64,
    /// Maximum number of contributing images used for pairing.
    pub max_images: usize,
    /// Half-width of the peak search window in each axis (pixels).
    pub match_window: f64,
    /// First pairing index included in the inter-panel score.
    pub pairing_start_index: usize,
    /// Powder histogram bin width (Å⁻¹).
    pub powder_bin_width: f64,
    /// Upper edge of the powder histogram (Å⁻¹).
    pub powder_max: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_intensity: 200.0,
            max_images: 20,
            match_window: 20.0,
            // Pairing 0 has always been left out of the score.
            pairing_start_index: 1,
            powder_bin_width: 5e-5,
            powder_max: 0.1,
        }
    }
}

impl ScoringConfig {
    /// Creates a new scoring configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum intensity.
    #[must_use]
    pub fn with_min_intensity(mut self, min_intensity: f64) -> Self {
        self.min_intensity = min_intensity;
        self
    }

    /// Sets the image cap.
    #[must_use]
    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }

    /// Sets the peak search window.
    #[must_use]
    pub fn with_match_window(mut self, window: f64) -> Self {
        self.match_window = window;
        self
    }

    /// Sets the first scored pairing index.
    #[must_use]
    pub fn with_pairing_start_index(mut self, index: usize) -> Self {
        self.pairing_start_index = index;
        self
    }

    /// Sets the powder histogram binning.
    #[must_use]
    pub fn with_powder_bins(mut self, bin_width: f64, max: f64) -> Self {
        self.powder_bin_width = bin_width;
        self.powder_max = max;
        self
    }

    /// Number of powder histogram bins, at most [`MAX_POWDER_BINS`].
    ///
    /// Zero when the binning is unusable.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn powder_bins(&self) -> usize {
        let bins = (self.powder_max / self.powder_bin_width).round();
        if bins.is_finite() && bins >= 1.0 {
            (bins as usize).min(MAX_POWDER_BINS)
        } else {
            0
        }
    }

    /// Checks the configuration for unusable values.
    #[allow(clippy::cast_precision_loss)]
    pub fn validate(&self) -> Result<()> {
        if !(self.match_window.is_finite() && self.match_window > 0.0) {
            return Err(Error::Config(format!(
                "match window must be positive, got {}",
                self.match_window
            )));
        }
        if !(self.powder_bin_width > 0.0
            && self.powder_max.is_finite()
            && self.powder_max > self.powder_bin_width)
        {
            return Err(Error::Config(format!(
                "powder range {} with bin width {} is empty",
                self.powder_max, self.powder_bin_width
            )));
        }
        let bins = self.powder_max / self.powder_bin_width;
        if bins > MAX_POWDER_BINS as f64 {
            return Err(Error::Config(format!(
                "powder range {} with bin width {} needs {bins:.0} bins, limit is {MAX_POWDER_BINS}",
                self.powder_max, self.powder_bin_width
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScoringConfig::default();
        assert!((config.min_intensity - 200.0).abs() < f64::EPSILON);
        assert_eq!(config.max_images, 20);
        assert_eq!(config.pairing_start_index, 1);
        assert_eq!(config.powder_bins(), 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ScoringConfig::new()
            .with_min_intensity(50.0)
            .with_max_images(3)
            .with_match_window(5.0)
            .with_pairing_start_index(0)
            .with_powder_bins(1e-3, 0.5);

        assert!((config.match_window - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.max_images, 3);
        assert_eq!(config.pairing_start_index, 0);
        assert_eq!(config.powder_bins(), 500);
    }

    #[test]
    fn test_validate_rejects_bad_window() {
        let config = ScoringConfig::new().with_match_window(0.0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unusable_powder_bins() {
        let zero = ScoringConfig::new().with_powder_bins(0.0, 0.1);
        assert!(matches!(zero.validate(), Err(Error::Config(_))));
        assert_eq!(zero.powder_bins(), 0);

        let tiny = ScoringConfig::new().with_powder_bins(1e-12, 0.1);
        assert!(matches!(tiny.validate(), Err(Error::Config(_))));
        assert_eq!(tiny.powder_bins(), MAX_POWDER_BINS);

        let nan = ScoringConfig::new().with_powder_bins(f64::NAN, 0.1);
        assert!(nan.validate().is_err());
        assert_eq!(nan.powder_bins(), 0);
    }
}
