//! Diffraction image data supplied by the upstream indexing pipeline.
//!
//! Slipfit only reads these: peaks come from a peak finder, crystals and
//! their reflection lists from an indexer. Parsing the files that carry
//! them is someone else's job.

use crate::arena::PanelArena;
use crate::error::Result;
use crate::geometry::Vec3;
use crate::panel::{DetectorPosition, PanelId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle of a diffraction image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImageId(pub usize);

/// An observed diffraction spot.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peak {
    /// Image the peak was found on.
    pub image: ImageId,
    /// Panel the peak lies on.
    pub panel: PanelId,
    /// Fast-scan coordinate (pixels, panel-relative).
    pub fs: f64,
    /// Slow-scan coordinate (pixels, panel-relative).
    pub ss: f64,
    /// Integrated intensity (ADU).
    pub intensity: f64,
    /// Reciprocal-space position (Å⁻¹) under the current live geometry.
    #[cfg_attr(feature = "serde", serde(skip, default = "Vec3::zeros"))]
    pub reciprocal: Vec3,
}

impl Peak {
    /// Creates a peak; its reciprocal position starts at the origin until
    /// [`Peak::update_reciprocal`] runs.
    #[must_use]
    pub fn new(image: ImageId, panel: PanelId, fs: f64, ss: f64, intensity: f64) -> Self {
        Self {
            image,
            panel,
            fs,
            ss,
            intensity,
            reciprocal: Vec3::zeros(),
        }
    }

    /// Detector position of the peak.
    #[inline]
    #[must_use]
    pub fn position(&self) -> DetectorPosition {
        DetectorPosition::new(self.fs, self.ss)
    }

    /// Recomputes the reciprocal position from the live geometry of the
    /// peak's panel.
    pub fn update_reciprocal(&mut self, panels: &PanelArena, wavelength: f64) -> Result<()> {
        let panel = panels.get(self.panel)?;
        self.reciprocal = panel.reciprocal_position(self.fs, self.ss, wavelength);
        Ok(())
    }
}

/// A reflection predicted from a crystal orientation model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reflection {
    /// Miller indices.
    pub indices: [i32; 3],
    /// Panel the reflection was predicted onto.
    pub panel: PanelId,
    /// Stored predicted fast-scan coordinate.
    pub fs: f64,
    /// Stored predicted slow-scan coordinate.
    pub ss: f64,
    /// Stored intensity (ADU).
    pub intensity: f64,
    /// Scattering vector (Å⁻¹) from the crystal model.
    pub scattering: Vec3,
}

impl Reflection {
    /// Stored predicted position.
    #[inline]
    #[must_use]
    pub fn position(&self) -> DetectorPosition {
        DetectorPosition::new(self.fs, self.ss)
    }
}

/// One indexed crystal on an image.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Crystal {
    /// Predicted reflections.
    pub reflections: Vec<Reflection>,
}

/// Everything known about one diffraction exposure.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiffractionImage {
    /// Image handle.
    pub id: ImageId,
    /// Beam wavelength (metres).
    pub wavelength: f64,
    /// Detected peaks.
    pub peaks: Vec<Peak>,
    /// Indexed crystals.
    #[cfg_attr(feature = "serde", serde(default))]
    pub crystals: Vec<Crystal>,
}

impl DiffractionImage {
    /// Creates an image with no peaks or crystals.
    #[must_use]
    pub fn new(id: ImageId, wavelength: f64) -> Self {
        Self {
            id,
            wavelength,
            peaks: Vec::new(),
            crystals: Vec::new(),
        }
    }

    /// Beam wavenumber in Å⁻¹.
    #[inline]
    #[must_use]
    pub fn wavenumber(&self) -> f64 {
        1e-10 / self.wavelength
    }

    /// Adds a peak, stamping it with this image's handle.
    pub fn push_peak(&mut self, panel: PanelId, fs: f64, ss: f64, intensity: f64) {
        self.peaks.push(Peak::new(self.id, panel, fs, ss, intensity));
    }

    /// Recomputes every peak's reciprocal position from live geometry.
    pub fn update_reciprocal_positions(&mut self, panels: &PanelArena) -> Result<()> {
        let wavelength = self.wavelength;
        for peak in &mut self.peaks {
            peak.update_reciprocal(panels, wavelength)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::tests::flat_geometry;
    use approx::assert_relative_eq;

    #[test]
    fn test_push_peak_stamps_image() {
        let mut image = DiffractionImage::new(ImageId(3), 1e-10);
        image.push_peak(PanelId(0), 1.0, 2.0, 300.0);
        assert_eq!(image.peaks[0].image, ImageId(3));
        assert_eq!(image.peaks[0].position(), DetectorPosition::new(1.0, 2.0));
    }

    #[test]
    fn test_update_reciprocal_positions() {
        let arena = PanelArena::from_geometries([("p0", flat_geometry())]).unwrap();
        let mut image = DiffractionImage::new(ImageId(0), 1e-10);
        image.push_peak(PanelId(0), 50.0, 100.0, 300.0);
        image.push_peak(PanelId(0), 70.0, 100.0, 300.0);
        image.update_reciprocal_positions(&arena).unwrap();

        assert_relative_eq!(image.peaks[0].reciprocal, Vec3::zeros(), epsilon = 1e-12);
        assert!(image.peaks[1].reciprocal.x > 0.0);
        assert_relative_eq!(image.wavenumber(), 1.0);
    }

    #[test]
    fn test_update_reciprocal_unknown_panel() {
        let arena = PanelArena::new();
        let mut image = DiffractionImage::new(ImageId(0), 1e-10);
        image.push_peak(PanelId(4), 0.0, 0.0, 1.0);
        assert!(image.update_reciprocal_positions(&arena).is_err());
    }
}
