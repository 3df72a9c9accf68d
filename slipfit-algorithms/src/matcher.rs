//! Gathering peaks into a group and matching predictions against them.

use std::sync::Arc;

use log::trace;
use slipfit_core::{DiffractionImage, ImageId, PanelArena, PanelId, Peak, Result};

use crate::group::PanelGroup;

impl PanelGroup {
    /// Appends every peak of `image` that lies on a member panel.
    ///
    /// Reciprocal positions of the new peaks are computed from the live
    /// geometry. The image is recorded as contributing only if it added at
    /// least one peak.
    pub fn assign_peaks_from_image(
        &mut self,
        image: &Arc<DiffractionImage>,
        panels: &PanelArena,
    ) -> Result<()> {
        let members = self.member_set();
        let start = self.cache.peaks.len();

        for peak in image.peaks.iter().filter(|p| members.contains(&p.panel)) {
            let mut peak = *peak;
            peak.update_reciprocal(panels, image.wavelength)?;
            self.cache.peaks.push(peak);
        }

        let end = self.cache.peaks.len();
        if end > start {
            self.cache.images.push(Arc::clone(image));
            self.cache.ranges.push(start..end);
            trace!("image {} contributed {} peaks", image.id.0, end - start);
        }
        Ok(())
    }

    /// Clears the caches and gathers peaks from every image.
    pub fn supply_images(
        &mut self,
        images: &[Arc<DiffractionImage>],
        panels: &PanelArena,
    ) -> Result<()> {
        self.clear_image_data();
        for image in images {
            self.assign_peaks_from_image(image, panels)?;
        }
        Ok(())
    }

    /// Nearest cached peak of `image` to `(fs, ss)`, ignoring peaks more
    /// than `window` pixels away in either axis.
    #[must_use]
    pub fn find_closest_peak(&self, image: ImageId, fs: f64, ss: f64, window: f64) -> Option<&Peak> {
        self.closest_where(image, fs, ss, window, |_| true)
    }

    /// Like [`PanelGroup::find_closest_peak`], restricted to peaks on `panel`.
    #[must_use]
    pub fn find_closest_peak_on_panel(
        &self,
        image: ImageId,
        panel: PanelId,
        fs: f64,
        ss: f64,
        window: f64,
    ) -> Option<&Peak> {
        self.closest_where(image, fs, ss, window, |p| p.panel == panel)
    }

    fn closest_where(
        &self,
        image: ImageId,
        fs: f64,
        ss: f64,
        window: f64,
        accept: impl Fn(&Peak) -> bool,
    ) -> Option<&Peak> {
        let slot = self.cache.images.iter().position(|im| im.id == image)?;
        self.cache
            .peaks_of(slot)
            .iter()
            .filter(|p| accept(p))
            .filter(|p| (p.fs - fs).abs() <= window && (p.ss - ss).abs() <= window)
            .map(|p| (p, (p.fs - fs).powi(2) + (p.ss - ss).powi(2)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
    }
}
