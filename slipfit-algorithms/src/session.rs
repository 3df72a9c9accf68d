//! A calibration session: detector, images and the current selection.
//!
//! The session owns the shared panel arena, one permanent leaf group per
//! physical panel, the loaded images and a selection group that the
//! interactive operations act on. While a refinement round runs the
//! selection lives on the worker and selection operations fail with
//! [`Error::Refinement`].

use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use slipfit_core::{
    Crystallography, DiffractionImage, Error, PanelArena, PanelId, RayTracePredictor, Result,
    ScoringConfig,
};

use crate::group::PanelGroup;
use crate::params::{Parameter, ParameterVector};
use crate::powder::PowderHistogram;
use crate::refine::{
    RefineConfig, RefineHandle, RefineJob, RefineMode, RefineOutcome, RefineReport, Refiner,
    SharedPanels,
};

/// Interactive calibration state.
pub struct CalibrationSession {
    panels: SharedPanels,
    leaves: Vec<PanelGroup>,
    selection: Option<PanelGroup>,
    images: Vec<Arc<DiffractionImage>>,
    scoring: ScoringConfig,
    crystallography: Arc<dyn Crystallography>,
    refiner: Refiner,
    pending: Option<RefineHandle>,
}

impl CalibrationSession {
    /// Session over `panels` using ray-traced predictions.
    #[must_use]
    pub fn new(panels: PanelArena) -> Self {
        Self::with_crystallography(panels, Arc::new(RayTracePredictor))
    }

    /// Session over `panels` with a caller-supplied prediction backend.
    #[must_use]
    pub fn with_crystallography(
        panels: PanelArena,
        crystallography: Arc<dyn Crystallography>,
    ) -> Self {
        let leaves = panels.ids().map(PanelGroup::leaf).collect();
        Self {
            panels: Arc::new(RwLock::new(panels)),
            leaves,
            selection: Some(PanelGroup::empty()),
            images: Vec::new(),
            scoring: ScoringConfig::default(),
            crystallography,
            refiner: Refiner::default(),
            pending: None,
        }
    }

    /// Sets the scoring thresholds, rejecting unusable values.
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Result<Self> {
        scoring.validate()?;
        self.scoring = scoring;
        Ok(self)
    }

    /// Sets the refinement settings.
    #[must_use]
    pub fn with_refine_config(mut self, config: RefineConfig) -> Self {
        self.refiner = Refiner::new(config);
        self
    }

    /// Shared panel arena.
    #[must_use]
    pub fn panels(&self) -> &SharedPanels {
        &self.panels
    }

    /// Loaded images.
    #[must_use]
    pub fn images(&self) -> &[Arc<DiffractionImage>] {
        &self.images
    }

    /// One leaf group per physical panel, indexed by panel id.
    #[must_use]
    pub fn leaves(&self) -> &[PanelGroup] {
        &self.leaves
    }

    /// Scoring thresholds.
    #[must_use]
    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Prediction backend.
    #[must_use]
    pub fn crystallography(&self) -> &dyn Crystallography {
        self.crystallography.as_ref()
    }

    /// Replaces the scoring thresholds and re-gathers the selection's
    /// peaks, since thresholds change which pairings exist.
    pub fn set_scoring(&mut self, scoring: ScoringConfig) -> Result<()> {
        scoring.validate()?;
        self.scoring = scoring;
        self.supply_images_to_selection()
    }

    /// Loads images, computing their peaks' reciprocal positions from the
    /// live geometry.
    pub fn load_images(&mut self, images: impl IntoIterator<Item = DiffractionImage>) -> Result<()> {
        let panels = self.panels.read();
        for mut image in images {
            image.update_reciprocal_positions(&panels)?;
            self.images.push(Arc::new(image));
        }
        info!("{} images loaded", self.images.len());
        Ok(())
    }

    /// Recomputes every loaded peak's reciprocal position from the live
    /// geometry.
    pub fn refresh_reciprocal_positions(&mut self) -> Result<()> {
        let panels = self.panels.read();
        for image in &mut self.images {
            Arc::make_mut(image).update_reciprocal_positions(&panels)?;
        }
        Ok(())
    }

    /// The current selection.
    pub fn selection(&self) -> Result<&PanelGroup> {
        self.selection.as_ref().ok_or_else(busy)
    }

    fn selection_mut(&mut self) -> Result<&mut PanelGroup> {
        self.selection.as_mut().ok_or_else(busy)
    }

    /// Adds or removes a panel from the selection. Returns whether it is
    /// selected afterwards.
    pub fn toggle_selection(&mut self, panel: PanelId) -> Result<bool> {
        self.panels.read().get(panel)?;
        Ok(self.selection_mut()?.toggle_panel(panel))
    }

    /// Selects every panel.
    pub fn select_all(&mut self) -> Result<()> {
        let ids: Vec<PanelId> = self.panels.read().ids().collect();
        let selection = self.selection_mut()?;
        for id in ids {
            selection.add_panel(id);
        }
        Ok(())
    }

    /// Empties the selection.
    pub fn clear_selection(&mut self) -> Result<()> {
        self.selection_mut()?.clear_panels();
        Ok(())
    }

    /// Short label of the current selection.
    pub fn describe_selection(&self) -> Result<String> {
        Ok(self.selection()?.description(&self.panels.read()))
    }

    /// Re-gathers the selection's peaks from every loaded image.
    pub fn supply_images_to_selection(&mut self) -> Result<()> {
        let panels = Arc::clone(&self.panels);
        let images = self.images.clone();
        let selection = self.selection_mut()?;
        selection.supply_images(&images, &panels.read())?;
        debug!(
            "selection holds {} peaks from {} images",
            selection.cache().peaks().len(),
            selection.cache().image_count()
        );
        Ok(())
    }

    /// Sets one selection parameter and nudges the selection.
    pub fn set_parameter(&mut self, parameter: Parameter, value: f64) -> Result<()> {
        let panels = Arc::clone(&self.panels);
        let selection = self.selection_mut()?;
        selection.set_parameter(parameter, value);
        let mut arena = panels.write();
        selection.nudge_panels(&mut arena)
    }

    /// Replaces the selection's parameters and nudges it.
    pub fn set_parameters(&mut self, params: ParameterVector) -> Result<()> {
        let panels = Arc::clone(&self.panels);
        let selection = self.selection_mut()?;
        selection.set_params(params);
        let mut arena = panels.write();
        selection.nudge_panels(&mut arena)
    }

    /// Commits the selection's nudge.
    pub fn accept(&mut self) -> Result<()> {
        let panels = Arc::clone(&self.panels);
        self.selection_mut()?.accept_nudges(&mut panels.write())?;
        self.supply_images_to_selection()
    }

    /// Drops the selection's nudge.
    pub fn discard(&mut self) -> Result<()> {
        let panels = Arc::clone(&self.panels);
        let mut arena = panels.write();
        self.selection_mut()?.discard_nudges(&mut arena)
    }

    /// Sets the nominal camera length of every panel.
    pub fn set_camera_length(&mut self, clen: f64) -> Result<()> {
        if self.is_refining() {
            return Err(busy());
        }
        self.panels.write().set_camera_length(clen);
        self.refresh_reciprocal_positions()
    }

    /// Splits a panel into quadrants, registering a leaf group for each.
    pub fn split_panel(&mut self, panel: PanelId) -> Result<Vec<PanelId>> {
        if self.is_refining() {
            return Err(busy());
        }
        let leaves = PanelGroup::leaf(panel).split(&mut self.panels.write())?;
        let ids = leaves.iter().flat_map(PanelGroup::panel_ids).collect();
        self.leaves.extend(leaves);
        Ok(ids)
    }

    /// Intra-panel score of the selection.
    pub fn intra_score(&mut self) -> Result<f64> {
        let panels = Arc::clone(&self.panels);
        let mut arena = panels.write();
        self.selection_mut()?.intra_score(&mut arena)
    }

    /// Inter-panel score of the selection.
    pub fn inter_score(&mut self) -> Result<f64> {
        let panels = Arc::clone(&self.panels);
        let crystallography = Arc::clone(&self.crystallography);
        let scoring = self.scoring.clone();
        let mut arena = panels.write();
        self.selection_mut()?
            .inter_score(&mut arena, crystallography.as_ref(), &scoring)
    }

    /// Powder histogram of the selection.
    pub fn powder(&mut self, refresh: bool) -> Result<PowderHistogram> {
        let panels = Arc::clone(&self.panels);
        let scoring = self.scoring.clone();
        let arena = panels.read();
        self.selection_mut()?.update_powder(&arena, &scoring, refresh)
    }

    /// Predicted-minus-observed offsets for the selection.
    pub fn target_offsets(&mut self, refresh: bool) -> Result<Vec<[f64; 2]>> {
        let panels = Arc::clone(&self.panels);
        let crystallography = Arc::clone(&self.crystallography);
        let scoring = self.scoring.clone();
        let selection = self.selection_mut()?;
        selection.prepare_target(&panels.read(), &scoring, refresh)?;
        let mut arena = panels.write();
        selection.target_offsets(&mut arena, crystallography.as_ref())
    }

    /// True while a refinement round owns the selection.
    #[must_use]
    pub fn is_refining(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts refining the selection in the background.
    ///
    /// Returns `false` when a round is already running; the request is
    /// then ignored.
    pub fn start_refinement(&mut self, mode: RefineMode) -> Result<bool> {
        let Some(group) = self.selection.take() else {
            return Ok(false);
        };
        if group.is_empty() {
            self.selection = Some(group);
            return Err(Error::EmptyGroup);
        }
        let job = RefineJob {
            group,
            panels: Arc::clone(&self.panels),
            mode,
            scoring: self.scoring.clone(),
            crystallography: Arc::clone(&self.crystallography),
        };
        match self.refiner.start(job) {
            Ok(handle) => {
                self.pending = Some(handle);
                Ok(true)
            }
            Err(job) => {
                self.selection = Some(job.group);
                Ok(false)
            }
        }
    }

    /// Collects a finished round without blocking.
    ///
    /// Returns `None` while the round is still running or when none was
    /// started.
    pub fn poll_refinement(&mut self) -> Option<Result<RefineReport>> {
        let received = self.pending.as_ref()?.try_recv()?;
        if let Some(handle) = self.pending.take() {
            handle.join();
        }
        Some(self.finish(received))
    }

    /// Blocks until the running round finishes.
    pub fn wait_refinement(&mut self) -> Option<Result<RefineReport>> {
        let handle = self.pending.take()?;
        Some(self.finish(handle.wait()))
    }

    fn finish(&mut self, received: Result<RefineOutcome>) -> Result<RefineReport> {
        match received {
            Ok(outcome) => {
                self.selection = Some(outcome.group);
                outcome.report
            }
            Err(e) => {
                // The group went down with the worker.
                self.selection = Some(PanelGroup::empty());
                Err(e)
            }
        }
    }

    /// Refines the selection and waits for the result.
    pub fn refine(&mut self, mode: RefineMode) -> Result<RefineReport> {
        if !self.start_refinement(mode)? {
            return Err(busy());
        }
        self.wait_refinement()
            .unwrap_or_else(|| Err(Error::Refinement("no refinement running".to_string())))
    }
}

fn busy() -> Error {
    Error::Refinement("a refinement round is running".to_string())
}
