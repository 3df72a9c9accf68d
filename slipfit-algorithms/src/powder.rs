//! Powder diagnostic: histogram of intra-image peak separations.

use rayon::prelude::*;
use slipfit_core::{PanelArena, Peak, Result, ScoringConfig};

use crate::group::PanelGroup;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Histogram of reciprocal-space distances between peaks of the same
/// image.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PowderHistogram {
    bin_width: f64,
    counts: Vec<u64>,
}

impl PowderHistogram {
    /// Empty histogram with the binning from `config`.
    #[must_use]
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            bin_width: config.powder_bin_width,
            counts: vec![0; config.powder_bins()],
        }
    }

    /// Bin width (Å⁻¹).
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Per-bin counts.
    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Centre of bin `index` (Å⁻¹).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_centre(&self, index: usize) -> f64 {
        (index as f64 + 0.5) * self.bin_width
    }

    /// Counts `distance`; returns `false` if it falls outside the range.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn add(&mut self, distance: f64) -> bool {
        if distance.is_nan() || distance < 0.0 {
            return false;
        }
        let bin = (distance / self.bin_width) as usize;
        match self.counts.get_mut(bin) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Adds the counts of `other`, which must share this binning.
    pub fn merge(&mut self, other: &PowderHistogram) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }

    /// Non-empty bins as `(centre, count)`.
    pub fn occupied(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(i, &c)| (self.bin_centre(i), c))
    }
}

fn histogram_of(peaks: &[Peak], config: &ScoringConfig) -> PowderHistogram {
    let bright: Vec<&Peak> = peaks
        .iter()
        .filter(|p| p.intensity > config.min_intensity)
        .collect();
    let mut histogram = PowderHistogram::new(config);
    for (i, a) in bright.iter().enumerate() {
        for b in &bright[i + 1..] {
            histogram.add((a.reciprocal - b.reciprocal).norm());
        }
    }
    histogram
}

impl PanelGroup {
    /// Builds the powder histogram from the cached peaks, image by image.
    ///
    /// With `refresh` the reciprocal positions are first recomputed from
    /// the live geometry.
    pub fn update_powder(
        &mut self,
        panels: &PanelArena,
        config: &ScoringConfig,
        refresh: bool,
    ) -> Result<PowderHistogram> {
        config.validate()?;
        if refresh {
            self.refresh_reciprocal_positions(panels)?;
        }
        let cache = &self.cache;
        Ok((0..cache.image_count())
            .into_par_iter()
            .map(|slot| histogram_of(cache.peaks_of(slot), config))
            .reduce(
                || PowderHistogram::new(config),
                |mut acc, h| {
                    acc.merge(&h);
                    acc
                },
            ))
    }
}
