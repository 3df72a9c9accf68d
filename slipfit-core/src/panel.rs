//! Detector panels.
//!
//! A [`Panel`] keeps two copies of its geometry: the backup, which is the
//! authoritative committed state, and the live copy that trial
//! re-parameterisations write into. Live geometry is always rebuilt from the
//! backup and never accumulated.

use crate::error::{Error, Result};
use crate::geometry::{set_length, Mat3, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle of a panel inside a [`PanelArena`](crate::PanelArena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PanelId(pub usize);

/// Position on a panel in fast-scan / slow-scan pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorPosition {
    /// Fast-scan coordinate (pixels).
    pub fs: f64,
    /// Slow-scan coordinate (pixels).
    pub ss: f64,
}

impl DetectorPosition {
    /// Creates a new detector position.
    #[inline]
    #[must_use]
    pub fn new(fs: f64, ss: f64) -> Self {
        Self { fs, ss }
    }

    /// Squared distance to another position in pixel space.
    #[inline]
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f64 {
        let dfs = self.fs - other.fs;
        let dss = self.ss - other.ss;
        dfs * dfs + dss * dss
    }
}

/// Rigid geometry of one rectangular panel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PanelGeometry {
    /// Corner x position (pixels).
    pub cnx: f64,
    /// Corner y position (pixels).
    pub cny: f64,
    /// Nominal camera length (metres).
    pub clen: f64,
    /// Fine offset added to the camera length (metres).
    pub coffset: f64,
    /// Resolution (pixels per metre).
    pub res: f64,
    /// Unit direction of increasing fast-scan coordinate.
    pub fs: Vec3,
    /// Unit direction of increasing slow-scan coordinate.
    pub ss: Vec3,
    /// Extent along the fast-scan axis (pixels).
    pub width: u32,
    /// Extent along the slow-scan axis (pixels).
    pub height: u32,
}

impl PanelGeometry {
    /// Checks that the geometry can be used for refinement.
    pub fn validate(&self, name: &str) -> Result<()> {
        let fail = |reason: &str| Error::InvalidGeometry {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if !self.res.is_finite() || self.res <= 0.0 {
            return Err(fail("resolution must be positive"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(fail("panel has zero extent"));
        }
        if self.fs.norm() == 0.0 || self.ss.norm() == 0.0 {
            return Err(fail("scan axis has zero length"));
        }
        Ok(())
    }

    /// Total working distance along the beam (metres).
    #[inline]
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.clen + self.coffset
    }

    /// Corner position in metres, lab frame.
    #[must_use]
    pub fn corner_metres(&self) -> Vec3 {
        Vec3::new(self.cnx / self.res, self.cny / self.res, self.distance())
    }

    /// Moves the corner to `corner` (metres). The nominal camera length is
    /// kept; the beam-axis part goes into `coffset`.
    pub fn set_corner_metres(&mut self, corner: &Vec3) {
        self.cnx = corner.x * self.res;
        self.cny = corner.y * self.res;
        self.coffset = corner.z - self.clen;
    }

    /// Lab-frame position (metres) of a fast/slow pixel coordinate.
    #[must_use]
    pub fn lab_position(&self, fs: f64, ss: f64) -> Vec3 {
        let offset = (self.fs * fs + self.ss * ss) / self.res;
        self.corner_metres() + offset
    }

    /// Midpoint of the panel rectangle (metres).
    #[must_use]
    pub fn centre_metres(&self) -> Vec3 {
        self.lab_position(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }

    /// Reciprocal-space position (Å⁻¹) of a fast/slow coordinate for a beam
    /// of `wavelength` metres.
    #[must_use]
    pub fn reciprocal_position(&self, fs: f64, ss: f64, wavelength: f64) -> Vec3 {
        let k = 1e-10 / wavelength;
        let v = set_length(&self.lab_position(fs, ss), k);
        Vec3::new(v.x, v.y, v.z - k)
    }

    /// Traces a scattering vector (Å⁻¹) with beam wavenumber `k` onto this
    /// panel. Returns `None` when the ray misses the panel rectangle.
    #[must_use]
    pub fn locate(&self, scattering: &Vec3, k: f64) -> Option<DetectorPosition> {
        let (x, y, z) = (scattering.x, scattering.y, scattering.z);
        let two_theta = (x * x + y * y).sqrt().atan2(k + z);
        let phi = y.atan2(x);
        let direction = Vec3::new(
            two_theta.sin() * phi.cos(),
            two_theta.sin() * phi.sin(),
            two_theta.cos(),
        );

        // Pixel-unit lab position is M * (1, fs, ss).
        let m = Mat3::new(
            self.cnx,
            self.fs.x,
            self.ss.x,
            self.cny,
            self.fs.y,
            self.ss.y,
            self.distance() * self.res,
            self.fs.z,
            self.ss.z,
        );
        let v = m.lu().solve(&direction)?;
        if v.x <= 0.0 {
            return None;
        }

        let fs = v.y / v.x;
        let ss = v.z / v.x;
        let inside = fs >= 0.0
            && fs < f64::from(self.width)
            && ss >= 0.0
            && ss < f64::from(self.height);
        inside.then(|| DetectorPosition::new(fs, ss))
    }

    /// Geometry of the four quadrants, ordered (fast, slow) as
    /// `[(0,0), (1,0), (0,1), (1,1)]`. Odd extents give the extra pixel to
    /// the second half so the quadrants tile the panel exactly.
    #[must_use]
    pub fn quadrants(&self) -> [PanelGeometry; 4] {
        let w0 = self.width / 2;
        let h0 = self.height / 2;
        let widths = [w0, self.width - w0];
        let heights = [h0, self.height - h0];

        let quadrant = |i: usize, j: usize| {
            let df = if i == 0 { 0.0 } else { f64::from(w0) };
            let ds = if j == 0 { 0.0 } else { f64::from(h0) };
            let shift = self.fs * df + self.ss * ds;
            PanelGeometry {
                cnx: self.cnx + shift.x,
                cny: self.cny + shift.y,
                coffset: self.coffset + shift.z / self.res,
                width: widths[i],
                height: heights[j],
                ..self.clone()
            }
        };

        [quadrant(0, 0), quadrant(1, 0), quadrant(0, 1), quadrant(1, 1)]
    }
}

/// Pixel-unit corner and edge caches derived from live geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelVertices {
    /// Corner position; x and y in pixels, z is the working distance in pixels.
    pub corner: Vec3,
    /// Fast-scan edge (`fs * width`).
    pub fast_edge: Vec3,
    /// Slow-scan edge (`ss * height`).
    pub slow_edge: Vec3,
}

impl PanelVertices {
    fn from_geometry(g: &PanelGeometry) -> Self {
        Self {
            corner: Vec3::new(g.cnx, g.cny, g.distance() * g.res),
            fast_edge: g.fs * f64::from(g.width),
            slow_edge: g.ss * f64::from(g.height),
        }
    }

    /// The four rectangle corners: origin, fast end, slow end, far corner.
    #[must_use]
    pub fn corners(&self) -> [Vec3; 4] {
        [
            self.corner,
            self.corner + self.fast_edge,
            self.corner + self.slow_edge,
            self.corner + self.fast_edge + self.slow_edge,
        ]
    }
}

/// A rigid detector panel with backup and live geometry.
#[derive(Debug, Clone)]
pub struct Panel {
    name: String,
    id: PanelId,
    backup: PanelGeometry,
    live: PanelGeometry,
    vertices: PanelVertices,
    centre: Vec3,
}

impl Panel {
    /// Creates a panel whose backup and live geometry are both `geometry`.
    pub fn new(name: impl Into<String>, id: PanelId, geometry: PanelGeometry) -> Result<Self> {
        let name = name.into();
        geometry.validate(&name)?;
        let vertices = PanelVertices::from_geometry(&geometry);
        let centre = geometry.centre_metres();
        Ok(Self {
            name,
            id,
            backup: geometry.clone(),
            live: geometry,
            vertices,
            centre,
        })
    }

    /// Panel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arena handle of this panel.
    #[must_use]
    pub fn id(&self) -> PanelId {
        self.id
    }

    /// Committed geometry.
    #[must_use]
    pub fn backup(&self) -> &PanelGeometry {
        &self.backup
    }

    /// Live (possibly nudged) geometry.
    #[must_use]
    pub fn geometry(&self) -> &PanelGeometry {
        &self.live
    }

    /// Derived pixel-unit caches for the live geometry.
    #[must_use]
    pub fn vertices(&self) -> &PanelVertices {
        &self.vertices
    }

    /// Centre of the panel as of the last commit (metres).
    #[must_use]
    pub fn centre(&self) -> Vec3 {
        self.centre
    }

    /// Live geometry := backup geometry.
    pub fn reset_to_backup(&mut self) {
        self.live.clone_from(&self.backup);
    }

    /// Recomputes the pixel-unit caches from live geometry.
    pub fn derive_working_values(&mut self) {
        self.vertices = PanelVertices::from_geometry(&self.live);
    }

    /// Replaces the live geometry and refreshes the derived caches.
    pub fn set_geometry(&mut self, geometry: PanelGeometry) {
        self.live = geometry;
        self.derive_working_values();
    }

    /// Commits the live geometry as the new backup.
    pub fn accept(&mut self) {
        self.backup.clone_from(&self.live);
        self.centre = self.backup.centre_metres();
    }

    /// Sets the nominal camera length of both backup and live geometry.
    pub fn set_camera_length(&mut self, clen: f64) {
        self.backup.clen = clen;
        self.live.clen = clen;
        self.centre = self.backup.centre_metres();
        self.derive_working_values();
    }

    /// Reciprocal-space position of a coordinate on this panel, using the
    /// live geometry.
    #[must_use]
    pub fn reciprocal_position(&self, fs: f64, ss: f64, wavelength: f64) -> Vec3 {
        self.live.reciprocal_position(fs, ss, wavelength)
    }

    /// Traces a scattering vector onto this panel's live geometry.
    #[must_use]
    pub fn locate(&self, scattering: &Vec3, k: f64) -> Option<DetectorPosition> {
        self.live.locate(scattering, k)
    }
}
