//! Contract with the crystallography side.
//!
//! Re-predicting reflections after a geometry change is delegated to a
//! [`Crystallography`] implementation. Slipfit ships two: one that traces
//! the crystal model's scattering vectors onto the live panels, and one
//! that trusts the positions stored with each reflection.

use crate::arena::PanelArena;
use crate::image::{DiffractionImage, Reflection};
use crate::panel::DetectorPosition;

/// Recomputes where a reflection lands on the detector.
pub trait Crystallography: Send + Sync {
    /// Predicted position of `reflection` on its assigned panel under the
    /// current live geometry, or `None` if it no longer lands there.
    fn predict(
        &self,
        image: &DiffractionImage,
        reflection: &Reflection,
        panels: &PanelArena,
    ) -> Option<DetectorPosition>;

    /// Returns the name of the predictor.
    fn name(&self) -> &'static str;
}

/// Traces each reflection's scattering vector onto its assigned panel.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayTracePredictor;

impl Crystallography for RayTracePredictor {
    fn predict(
        &self,
        image: &DiffractionImage,
        reflection: &Reflection,
        panels: &PanelArena,
    ) -> Option<DetectorPosition> {
        let panel = panels.get(reflection.panel).ok()?;
        panel.locate(&reflection.scattering, image.wavenumber())
    }

    fn name(&self) -> &'static str {
        "RayTrace"
    }
}

/// Returns the position stored with the reflection, ignoring geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredPredictions;

impl Crystallography for StoredPredictions {
    fn predict(
        &self,
        _image: &DiffractionImage,
        reflection: &Reflection,
        _panels: &PanelArena,
    ) -> Option<DetectorPosition> {
        Some(reflection.position())
    }

    fn name(&self) -> &'static str {
        "Stored"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageId;
    use crate::panel::tests::flat_geometry;
    use crate::panel::PanelId;
    use approx::assert_relative_eq;

    fn reflection_at(fs: f64, ss: f64) -> Reflection {
        let g = flat_geometry();
        Reflection {
            indices: [1, 0, 0],
            panel: PanelId(0),
            fs,
            ss,
            intensity: 1000.0,
            scattering: g.reciprocal_position(fs, ss, 1e-10),
        }
    }

    #[test]
    fn test_ray_trace_follows_geometry() {
        let mut arena = PanelArena::from_geometries([("p0", flat_geometry())]).unwrap();
        let image = DiffractionImage::new(ImageId(0), 1e-10);
        let reflection = reflection_at(30.0, 40.0);

        let pos = RayTracePredictor.predict(&image, &reflection, &arena).unwrap();
        assert_relative_eq!(pos.fs, 30.0, epsilon = 1e-8);
        assert_relative_eq!(pos.ss, 40.0, epsilon = 1e-8);

        // Shift the panel by two pixels along fast-scan.
        let panel = arena.get_mut(PanelId(0)).unwrap();
        let mut moved = panel.geometry().clone();
        moved.cnx += 2.0;
        panel.set_geometry(moved);

        let pos = RayTracePredictor.predict(&image, &reflection, &arena).unwrap();
        assert_relative_eq!(pos.fs, 28.0, epsilon = 1e-8);
    }

    #[test]
    fn test_stored_predictions() {
        let arena = PanelArena::new();
        let image = DiffractionImage::new(ImageId(0), 1e-10);
        let reflection = reflection_at(5.0, 6.0);
        let pos = StoredPredictions.predict(&image, &reflection, &arena).unwrap();
        assert_eq!(pos, DetectorPosition::new(5.0, 6.0));
        assert_eq!(StoredPredictions.name(), "Stored");
    }
}
