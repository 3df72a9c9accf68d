//! Owning storage for every detector panel.
//!
//! Groups refer to panels by [`PanelId`]; only the arena owns them. The
//! arena is append-only so handles stay valid for its whole lifetime.

use log::debug;

use crate::error::{Error, Result};
use crate::geometry::Vec3;
use crate::panel::{DetectorPosition, Panel, PanelGeometry, PanelId};

/// Append-only collection of panels.
#[derive(Debug, Clone, Default)]
pub struct PanelArena {
    panels: Vec<Panel>,
}

impl PanelArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an arena from named panel geometries, in order.
    pub fn from_geometries<I, S>(geometries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, PanelGeometry)>,
        S: Into<String>,
    {
        let mut arena = Self::new();
        for (name, geometry) in geometries {
            arena.push(name, geometry)?;
        }
        Ok(arena)
    }

    /// Appends a panel and returns its handle.
    pub fn push(&mut self, name: impl Into<String>, geometry: PanelGeometry) -> Result<PanelId> {
        let id = PanelId(self.panels.len());
        let panel = Panel::new(name, id, geometry)?;
        self.panels.push(panel);
        Ok(id)
    }

    /// Number of panels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.panels.len()
    }

    /// Returns true if there are no panels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    /// Looks up a panel.
    pub fn get(&self, id: PanelId) -> Result<&Panel> {
        self.panels.get(id.0).ok_or(Error::UnknownPanel(id.0))
    }

    /// Looks up a panel mutably.
    pub fn get_mut(&mut self, id: PanelId) -> Result<&mut Panel> {
        self.panels.get_mut(id.0).ok_or(Error::UnknownPanel(id.0))
    }

    /// Iterates over all panels in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &Panel> {
        self.panels.iter()
    }

    /// All panel handles in order.
    pub fn ids(&self) -> impl Iterator<Item = PanelId> + '_ {
        self.panels.iter().map(Panel::id)
    }

    /// Finds a panel by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PanelId> {
        self.panels.iter().find(|p| p.name() == name).map(Panel::id)
    }

    /// Traces a scattering vector onto the first panel it hits.
    #[must_use]
    pub fn locate(&self, scattering: &Vec3, k: f64) -> Option<(PanelId, DetectorPosition)> {
        self.panels
            .iter()
            .find_map(|p| p.locate(scattering, k).map(|pos| (p.id(), pos)))
    }

    /// Sets the nominal camera length of every panel.
    pub fn set_camera_length(&mut self, clen: f64) {
        for panel in &mut self.panels {
            panel.set_camera_length(clen);
        }
    }

    /// Splits a panel into four quadrant panels appended to the arena.
    ///
    /// The parent stays in the arena. Either all four quadrants are added
    /// or, when the arena cannot grow, none are.
    pub fn split(&mut self, id: PanelId) -> Result<[PanelId; 4]> {
        let parent = self.get(id)?;
        let name = parent.name().to_string();
        let quadrants = parent.backup().quadrants();

        self.panels
            .try_reserve(quadrants.len())
            .map_err(|_| Error::Allocation {
                requested: quadrants.len(),
            })?;

        let first = self.panels.len();
        let mut built = Vec::with_capacity(quadrants.len());
        for (i, geometry) in quadrants.into_iter().enumerate() {
            built.push(Panel::new(
                format!("{name}q{i}"),
                PanelId(first + i),
                geometry,
            )?);
        }
        self.panels.extend(built);

        debug!("split panel '{name}' into panels {}..{}", first, self.panels.len());
        Ok([
            PanelId(first),
            PanelId(first + 1),
            PanelId(first + 2),
            PanelId(first + 3),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::tests::flat_geometry;
    use approx::assert_relative_eq;

    #[test]
    fn test_push_and_get() {
        let mut arena = PanelArena::new();
        let a = arena.push("a", flat_geometry()).unwrap();
        let b = arena.push("b", flat_geometry()).unwrap();
        assert_eq!(a, PanelId(0));
        assert_eq!(b, PanelId(1));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(b).unwrap().name(), "b");
        assert_eq!(arena.find("a"), Some(a));
        assert!(matches!(arena.get(PanelId(9)), Err(Error::UnknownPanel(9))));
    }

    #[test]
    fn test_split_appends_four() {
        let mut arena = PanelArena::from_geometries([("p0", flat_geometry())]).unwrap();
        let ids = arena.split(PanelId(0)).unwrap();

        assert_eq!(arena.len(), 5);
        assert_eq!(ids, [PanelId(1), PanelId(2), PanelId(3), PanelId(4)]);
        assert_eq!(arena.get(PanelId(3)).unwrap().name(), "p0q2");

        // Parent stays untouched.
        assert_eq!(arena.get(PanelId(0)).unwrap().backup(), &flat_geometry());

        let total_area: u32 = ids
            .iter()
            .map(|&id| {
                let g = arena.get(id).unwrap().backup();
                g.width * g.height
            })
            .sum();
        assert_eq!(total_area, 100 * 200);
    }

    #[test]
    fn test_split_unknown_panel() {
        let mut arena = PanelArena::new();
        assert!(arena.split(PanelId(0)).is_err());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_locate_across_panels() {
        let mut left = flat_geometry();
        left.width = 50;
        let mut right = flat_geometry();
        right.cnx = 0.0;
        right.width = 50;
        let arena = PanelArena::from_geometries([("left", left), ("right", right.clone())]).unwrap();

        let q = right.reciprocal_position(10.0, 20.0, 1e-10);
        let (id, pos) = arena.locate(&q, 1.0).unwrap();
        assert_eq!(id, PanelId(1));
        assert_relative_eq!(pos.fs, 10.0, epsilon = 1e-8);
        assert_relative_eq!(pos.ss, 20.0, epsilon = 1e-8);
    }

    #[test]
    fn test_set_camera_length() {
        let mut arena = PanelArena::from_geometries([("p0", flat_geometry())]).unwrap();
        arena.set_camera_length(0.25);
        let panel = arena.get(PanelId(0)).unwrap();
        assert_relative_eq!(panel.backup().clen, 0.25);
        assert_relative_eq!(panel.geometry().clen, 0.25);
        assert_relative_eq!(panel.centre().z, 0.25);
    }
}
