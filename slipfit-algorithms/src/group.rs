//! Hierarchical panel groups.
//!
//! A [`PanelGroup`] is either a leaf bound to one physical panel or a
//! composite of child groups. Every group carries a parameter vector and
//! per-group caches of peaks and reflection pairings; nudging a group
//! applies its parameters to every panel beneath it about the group's
//! centroid.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use log::{debug, warn};
use slipfit_core::{DetectorPosition, DiffractionImage, Error, Peak, PanelArena, PanelId, Result, Vec3};

use crate::nudge::nudge_geometry;
use crate::params::{Parameter, ParameterVector};

/// Structure of a group.
#[derive(Debug, Clone)]
pub enum GroupKind {
    /// Bound to exactly one physical panel.
    Leaf(PanelId),
    /// Owns child groups.
    Composite(Vec<PanelGroup>),
}

/// Peaks gathered from the images that touch a group's panels.
///
/// `images` and `ranges` run in parallel: the peaks contributed by
/// `images[i]` are `peaks[ranges[i].clone()]`.
#[derive(Debug, Clone, Default)]
pub struct PeakCache {
    pub(crate) peaks: Vec<Peak>,
    pub(crate) images: Vec<Arc<DiffractionImage>>,
    pub(crate) ranges: Vec<Range<usize>>,
}

impl PeakCache {
    /// All cached peaks.
    #[must_use]
    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    /// Contributing images, in the order they were supplied.
    #[must_use]
    pub fn images(&self) -> &[Arc<DiffractionImage>] {
        &self.images
    }

    /// Number of contributing images.
    #[must_use]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Peaks contributed by the image in `slot`.
    #[must_use]
    pub fn peaks_of(&self, slot: usize) -> &[Peak] {
        self.ranges
            .get(slot)
            .map_or(&[], |range| &self.peaks[range.clone()])
    }

    fn clear(&mut self) {
        self.peaks.clear();
        self.images.clear();
        self.ranges.clear();
    }
}

/// Association of one predicted reflection with its nearest observed peak.
#[derive(Debug, Clone)]
pub struct ReflectionPairing {
    pub(crate) image_slot: usize,
    pub(crate) crystal: usize,
    pub(crate) reflection: usize,
    /// Matched observed peak.
    pub peak: Peak,
    /// Latest predicted position, `None` once the reflection falls off its
    /// panel.
    pub predicted: Option<DetectorPosition>,
}

impl ReflectionPairing {
    /// Predicted minus observed position, in pixels.
    #[must_use]
    pub fn residual(&self) -> Option<[f64; 2]> {
        self.predicted
            .map(|p| [p.fs - self.peak.fs, p.ss - self.peak.ss])
    }
}

/// A node in the panel hierarchy.
#[derive(Debug, Clone)]
pub struct PanelGroup {
    kind: GroupKind,
    params: ParameterVector,
    pub(crate) cache: PeakCache,
    pub(crate) pairs: Vec<ReflectionPairing>,
}

impl PanelGroup {
    /// Group bound to one panel.
    #[must_use]
    pub fn leaf(panel: PanelId) -> Self {
        Self::with_kind(GroupKind::Leaf(panel))
    }

    /// Group owning `children`.
    #[must_use]
    pub fn composite(children: Vec<PanelGroup>) -> Self {
        Self::with_kind(GroupKind::Composite(children))
    }

    /// Empty composite, the starting point of a selection.
    #[must_use]
    pub fn empty() -> Self {
        Self::composite(Vec::new())
    }

    /// Composite with one leaf per panel id.
    #[must_use]
    pub fn of_panels(panels: impl IntoIterator<Item = PanelId>) -> Self {
        Self::composite(panels.into_iter().map(Self::leaf).collect())
    }

    fn with_kind(kind: GroupKind) -> Self {
        Self {
            kind,
            params: ParameterVector::zero(),
            cache: PeakCache::default(),
            pairs: Vec::new(),
        }
    }

    /// Structure of this group.
    #[must_use]
    pub fn kind(&self) -> &GroupKind {
        &self.kind
    }

    /// True for a leaf group.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, GroupKind::Leaf(_))
    }

    /// Direct children; empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[PanelGroup] {
        match &self.kind {
            GroupKind::Leaf(_) => &[],
            GroupKind::Composite(children) => children,
        }
    }

    /// Every panel beneath this group, depth first.
    #[must_use]
    pub fn panel_ids(&self) -> Vec<PanelId> {
        let mut ids = Vec::new();
        self.collect_panels(&mut ids);
        ids
    }

    fn collect_panels(&self, out: &mut Vec<PanelId>) {
        match &self.kind {
            GroupKind::Leaf(id) => out.push(*id),
            GroupKind::Composite(children) => {
                for child in children {
                    child.collect_panels(out);
                }
            }
        }
    }

    pub(crate) fn member_set(&self) -> HashSet<PanelId> {
        self.panel_ids().into_iter().collect()
    }

    /// True if `panel` is beneath this group.
    #[must_use]
    pub fn contains(&self, panel: PanelId) -> bool {
        match &self.kind {
            GroupKind::Leaf(id) => *id == panel,
            GroupKind::Composite(children) => children.iter().any(|c| c.contains(panel)),
        }
    }

    /// True when no panel is beneath this group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            GroupKind::Leaf(_) => false,
            GroupKind::Composite(children) => children.iter().all(PanelGroup::is_empty),
        }
    }

    /// Adds `panel` as a direct leaf child unless it is already a member.
    ///
    /// Returns `false` when nothing changed.
    pub fn add_panel(&mut self, panel: PanelId) -> bool {
        if self.contains(panel) {
            return false;
        }
        match &mut self.kind {
            GroupKind::Leaf(id) => {
                warn!("cannot add panel {} to leaf group of panel {}", panel.0, id.0);
                false
            }
            GroupKind::Composite(children) => {
                children.push(PanelGroup::leaf(panel));
                self.clear_image_data();
                true
            }
        }
    }

    /// Adds or removes `panel` as a direct leaf child.
    ///
    /// Returns whether the panel is a member afterwards.
    pub fn toggle_panel(&mut self, panel: PanelId) -> bool {
        if self.is_leaf() {
            warn!("leaf groups have fixed membership");
            return self.contains(panel);
        }
        let GroupKind::Composite(children) = &mut self.kind else {
            return false;
        };

        let before = children.len();
        children.retain(|c| !matches!(c.kind, GroupKind::Leaf(id) if id == panel));
        let member = if children.len() == before {
            children.push(PanelGroup::leaf(panel));
            true
        } else {
            false
        };
        self.clear_image_data();
        member
    }

    /// Removes every child of a composite.
    pub fn clear_panels(&mut self) {
        if let GroupKind::Composite(children) = &mut self.kind {
            children.clear();
            self.clear_image_data();
        }
    }

    /// Short human-readable label.
    #[must_use]
    pub fn description(&self, panels: &PanelArena) -> String {
        let ids = self.panel_ids();
        match ids.as_slice() {
            [] => "no panels".to_string(),
            [id] => panels
                .get(*id)
                .map_or_else(|_| format!("panel {}", id.0), |p| p.name().to_string()),
            [first, .., last] if ids.len() > 3 => format!(
                "{} panels ({} .. {})",
                ids.len(),
                panel_name(panels, *first),
                panel_name(panels, *last)
            ),
            _ => ids
                .iter()
                .map(|id| panel_name(panels, *id))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Current parameter vector.
    #[must_use]
    pub fn params(&self) -> &ParameterVector {
        &self.params
    }

    /// Replaces the parameter vector. Geometry is untouched until the next
    /// [`PanelGroup::nudge_panels`].
    pub fn set_params(&mut self, params: ParameterVector) {
        self.params = params;
    }

    /// Reads one parameter.
    #[must_use]
    pub fn parameter(&self, parameter: Parameter) -> f64 {
        self.params.get(parameter)
    }

    /// Writes one parameter.
    pub fn set_parameter(&mut self, parameter: Parameter, value: f64) {
        self.params.set(parameter, value);
    }

    /// Centroid of the committed geometry (metres).
    ///
    /// A leaf reports its panel's committed centre; a composite the mean of
    /// its children's centroids. `None` for a group with no panels.
    pub fn centroid(&self, panels: &PanelArena) -> Result<Option<Vec3>> {
        match &self.kind {
            GroupKind::Leaf(id) => Ok(Some(panels.get(*id)?.centre())),
            GroupKind::Composite(children) => {
                let mut sum = Vec3::zeros();
                let mut count = 0_u32;
                for child in children {
                    if let Some(c) = child.centroid(panels)? {
                        sum += c;
                        count += 1;
                    }
                }
                Ok((count > 0).then(|| sum / f64::from(count)))
            }
        }
    }

    /// Re-derives the live geometry of every panel beneath this group from
    /// its backup, this group's parameters and this group's centroid.
    ///
    /// The result depends only on committed geometry and the parameter
    /// vector, so repeated calls are idempotent.
    pub fn nudge_panels(&self, panels: &mut PanelArena) -> Result<()> {
        let Some(centroid) = self.centroid(panels)? else {
            return Ok(());
        };
        self.nudge_beneath(&self.params, &centroid, panels)
    }

    fn nudge_beneath(
        &self,
        params: &ParameterVector,
        centroid: &Vec3,
        panels: &mut PanelArena,
    ) -> Result<()> {
        match &self.kind {
            GroupKind::Leaf(id) => {
                let panel = panels.get_mut(*id)?;
                panel.reset_to_backup();
                let nudged = nudge_geometry(panel.backup(), params, centroid);
                panel.set_geometry(nudged);
                Ok(())
            }
            GroupKind::Composite(children) => {
                for child in children {
                    child.nudge_beneath(params, centroid, panels)?;
                }
                Ok(())
            }
        }
    }

    /// Commits the current nudge as every member panel's backup, zeroes
    /// all parameter vectors and drops the caches.
    pub fn accept_nudges(&mut self, panels: &mut PanelArena) -> Result<()> {
        self.nudge_panels(panels)?;
        for id in self.panel_ids() {
            panels.get_mut(id)?.accept();
        }
        self.zero_params();
        self.clear_image_data();
        debug!("accepted nudges for {} panels", self.panel_ids().len());
        Ok(())
    }

    /// Returns every member panel to its backup and zeroes the parameters.
    pub fn discard_nudges(&mut self, panels: &mut PanelArena) -> Result<()> {
        for id in self.panel_ids() {
            let panel = panels.get_mut(id)?;
            panel.reset_to_backup();
            panel.derive_working_values();
        }
        self.zero_params();
        Ok(())
    }

    fn zero_params(&mut self) {
        self.params = ParameterVector::zero();
        if let GroupKind::Composite(children) = &mut self.kind {
            for child in children {
                child.zero_params();
            }
        }
    }

    /// Splits every panel beneath this group into quadrants.
    ///
    /// Returns one fresh leaf group per new panel. The original panels stay
    /// in the arena.
    pub fn split(&self, panels: &mut PanelArena) -> Result<Vec<PanelGroup>> {
        let ids = self.panel_ids();
        if ids.is_empty() {
            return Err(Error::EmptyGroup);
        }
        let mut leaves = Vec::with_capacity(ids.len() * 4);
        for id in ids {
            leaves.extend(panels.split(id)?.into_iter().map(PanelGroup::leaf));
        }
        Ok(leaves)
    }

    /// Peaks and images gathered so far.
    #[must_use]
    pub fn cache(&self) -> &PeakCache {
        &self.cache
    }

    /// Reflection pairings from the last pairing refresh.
    #[must_use]
    pub fn pairs(&self) -> &[ReflectionPairing] {
        &self.pairs
    }

    /// Drops cached peaks, images and pairings.
    pub fn clear_image_data(&mut self) {
        self.cache.clear();
        self.pairs.clear();
    }
}

fn panel_name(panels: &PanelArena, id: PanelId) -> String {
    panels
        .get(id)
        .map_or_else(|_| format!("panel {}", id.0), |p| p.name().to_string())
}
