//! Objective functions.
//!
//! Both scores are negated similarity sums, so lower is better and a
//! perfect alignment approaches minus the number of contributing pairs.

use log::debug;
use rayon::prelude::*;
use slipfit_core::{Crystallography, PanelArena, Peak, Result, ScoringConfig};

use crate::group::{PanelGroup, ReflectionPairing};

/// Similarity of two positions: `exp(-d²)`.
#[inline]
#[must_use]
pub fn similarity(distance_squared: f64) -> f64 {
    (-distance_squared).exp()
}

/// Sum of [`similarity`] over every unordered pair of peaks, using their
/// reciprocal positions.
#[must_use]
pub fn pairwise_similarity(peaks: &[Peak]) -> f64 {
    peaks
        .par_iter()
        .enumerate()
        .map(|(i, a)| {
            peaks[i + 1..]
                .iter()
                .map(|b| similarity((a.reciprocal - b.reciprocal).norm_squared()))
                .sum::<f64>()
        })
        .sum()
}

impl PanelGroup {
    /// Recomputes the reciprocal position of every cached peak from the
    /// live geometry.
    pub fn refresh_reciprocal_positions(&mut self, panels: &PanelArena) -> Result<()> {
        let cache = &mut self.cache;
        for (image, range) in cache.images.iter().zip(&cache.ranges) {
            for peak in &mut cache.peaks[range.clone()] {
                peak.update_reciprocal(panels, image.wavelength)?;
            }
        }
        Ok(())
    }

    /// Intra-panel objective: nudge, refresh reciprocal positions, then
    /// `-Σ_{i<j} exp(-|q_i - q_j|²)` over every cached peak.
    pub fn intra_score(&mut self, panels: &mut PanelArena) -> Result<f64> {
        self.nudge_panels(panels)?;
        self.refresh_reciprocal_positions(panels)?;
        Ok(-pairwise_similarity(&self.cache.peaks))
    }

    /// Rebuilds the reflection pairings from the cached peaks.
    ///
    /// Considers the first `max_images` contributing images and every
    /// reflection on a member panel brighter than `min_intensity`; each is
    /// paired with its closest peak on the same panel within the match
    /// window.
    pub fn update_pairs(&mut self, config: &ScoringConfig) {
        let members = self.member_set();
        let mut pairs = Vec::new();

        for (slot, image) in self.cache.images.iter().enumerate().take(config.max_images) {
            for (ci, crystal) in image.crystals.iter().enumerate() {
                for (ri, reflection) in crystal.reflections.iter().enumerate() {
                    if !members.contains(&reflection.panel)
                        || reflection.intensity <= config.min_intensity
                    {
                        continue;
                    }
                    let Some(peak) = self.find_closest_peak_on_panel(
                        image.id,
                        reflection.panel,
                        reflection.fs,
                        reflection.ss,
                        config.match_window,
                    ) else {
                        continue;
                    };
                    pairs.push(ReflectionPairing {
                        image_slot: slot,
                        crystal: ci,
                        reflection: ri,
                        peak: *peak,
                        predicted: Some(reflection.position()),
                    });
                }
            }
        }

        debug!("paired {} reflections with peaks", pairs.len());
        self.pairs = pairs;
    }

    /// Asks `crystallography` for a fresh prediction of every pairing under
    /// the live geometry.
    pub fn repredict(&mut self, panels: &PanelArena, crystallography: &dyn Crystallography) {
        let images = &self.cache.images;
        let mut missed = 0_usize;
        for pair in &mut self.pairs {
            let image = &images[pair.image_slot];
            let reflection = &image.crystals[pair.crystal].reflections[pair.reflection];
            pair.predicted = crystallography.predict(image, reflection, panels);
            missed += usize::from(pair.predicted.is_none());
        }
        if missed > 0 {
            debug!("{missed} of {} predictions fell off their panels", self.pairs.len());
        }
    }

    /// Inter-panel objective: nudge, pair if needed, re-predict, then
    /// `-Σ exp(-|r|²)` over the pairing residuals from
    /// `pairing_start_index` on.
    ///
    /// Pairings whose reflection no longer lands on its panel do not
    /// contribute.
    pub fn inter_score(
        &mut self,
        panels: &mut PanelArena,
        crystallography: &dyn Crystallography,
        config: &ScoringConfig,
    ) -> Result<f64> {
        self.nudge_panels(panels)?;
        if self.pairs.is_empty() {
            self.update_pairs(config);
        }
        self.repredict(panels, crystallography);

        let total: f64 = self
            .pairs
            .iter()
            .skip(config.pairing_start_index)
            .filter_map(ReflectionPairing::residual)
            .map(|[dfs, dss]| similarity(dfs * dfs + dss * dss))
            .sum();
        Ok(-total)
    }

    /// Rebuilds the pairings used by the offset view. With `refresh` the
    /// group first re-gathers peaks from its contributing images.
    pub fn prepare_target(
        &mut self,
        panels: &PanelArena,
        config: &ScoringConfig,
        refresh: bool,
    ) -> Result<()> {
        if refresh {
            let images = self.cache.images.clone();
            self.supply_images(&images, panels)?;
        }
        self.update_pairs(config);
        Ok(())
    }

    /// Predicted-minus-observed offsets of every pairing under the current
    /// parameters, for plotting.
    pub fn target_offsets(
        &mut self,
        panels: &mut PanelArena,
        crystallography: &dyn Crystallography,
    ) -> Result<Vec<[f64; 2]>> {
        self.nudge_panels(panels)?;
        self.repredict(panels, crystallography);
        Ok(self.pairs.iter().filter_map(ReflectionPairing::residual).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use slipfit_core::{ImageId, PanelId, Vec3};

    fn peak_at(q: Vec3) -> Peak {
        let mut peak = Peak::new(ImageId(0), PanelId(0), 0.0, 0.0, 1.0);
        peak.reciprocal = q;
        peak
    }

    #[test]
    fn test_similarity() {
        assert_relative_eq!(similarity(0.0), 1.0);
        assert_relative_eq!(similarity(1.0), (-1.0_f64).exp());
    }

    #[test]
    fn test_pairwise_similarity_counts_each_pair_once() {
        let peaks = vec![peak_at(Vec3::zeros()); 4];
        // 4 choose 2 coincident pairs.
        assert_relative_eq!(pairwise_similarity(&peaks), 6.0);
        assert_relative_eq!(pairwise_similarity(&peaks[..1]), 0.0);
        assert_relative_eq!(pairwise_similarity(&[]), 0.0);
    }

    #[test]
    fn test_pairwise_similarity_decays() {
        let peaks = [peak_at(Vec3::zeros()), peak_at(Vec3::new(0.0, 2.0, 0.0))];
        assert_relative_eq!(pairwise_similarity(&peaks), (-4.0_f64).exp());
    }
}
