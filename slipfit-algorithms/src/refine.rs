//! Background refinement.
//!
//! A refinement round moves a [`PanelGroup`] onto a worker thread, runs the
//! optimiser against one of the objective functions and hands the group
//! back over a channel together with a [`RefineReport`]. At most one round
//! runs at a time per [`Refiner`]; a second request while one is running is
//! refused and the job handed back untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::RwLock;
use slipfit_core::{Crystallography, Error, PanelArena, Result, ScoringConfig};

use crate::group::PanelGroup;
use crate::optimizer::{NelderMead, OptimizationResult, Optimizer, ParameterSpec};
use crate::params::{Parameter, ParameterVector};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Panel arena shared between the session and a refinement worker.
pub type SharedPanels = Arc<RwLock<PanelArena>>;

/// Which objective a refinement round minimises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RefineMode {
    /// Peak-to-peak reciprocal-space agreement; refines radius and tilts.
    Intra,
    /// Observed-to-predicted agreement; refines the slides.
    Inter,
}

impl std::fmt::Display for RefineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefineMode::Intra => write!(f, "intra-panel"),
            RefineMode::Inter => write!(f, "inter-panel"),
        }
    }
}

/// Optimiser settings for both refinement modes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RefineConfig {
    /// Simplex iteration cap.
    pub cycles: usize,
    /// Parameters refined in intra-panel mode.
    pub intra: Vec<ParameterSpec>,
    /// Parameters refined in inter-panel mode.
    pub inter: Vec<ParameterSpec>,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            cycles: 40,
            intra: vec![
                ParameterSpec::new(Parameter::Radius, 2e-4, 1e-6),
                ParameterSpec::new(Parameter::Alpha, 5e-4, 1e-6),
                ParameterSpec::new(Parameter::Beta, 5e-4, 1e-6),
            ],
            inter: vec![
                ParameterSpec::new(Parameter::Horiz, 1e-3, 5e-6),
                ParameterSpec::new(Parameter::Vert, 1e-3, 5e-6),
            ],
        }
    }
}

impl RefineConfig {
    /// Creates a new refinement configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the iteration cap.
    #[must_use]
    pub fn with_cycles(mut self, cycles: usize) -> Self {
        self.cycles = cycles;
        self
    }

    /// Replaces the refined parameters of `mode`.
    #[must_use]
    pub fn with_specs(mut self, mode: RefineMode, specs: Vec<ParameterSpec>) -> Self {
        match mode {
            RefineMode::Intra => self.intra = specs,
            RefineMode::Inter => self.inter = specs,
        }
        self
    }

    /// Parameters refined in `mode`.
    #[must_use]
    pub fn specs(&self, mode: RefineMode) -> &[ParameterSpec] {
        match mode {
            RefineMode::Intra => &self.intra,
            RefineMode::Inter => &self.inter,
        }
    }
}

/// Everything a worker needs for one round.
pub struct RefineJob {
    /// Group to refine; ownership returns with the outcome.
    pub group: PanelGroup,
    /// Shared panel arena.
    pub panels: SharedPanels,
    /// Objective to minimise.
    pub mode: RefineMode,
    /// Scoring thresholds.
    pub scoring: ScoringConfig,
    /// Prediction collaborator for inter-panel scoring.
    pub crystallography: Arc<dyn Crystallography>,
}

/// Summary of a finished round.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RefineReport {
    /// Objective that was minimised.
    pub mode: RefineMode,
    /// Score at the starting parameters.
    pub initial_score: f64,
    /// Score at the best parameters.
    pub final_score: f64,
    /// Best parameters, left applied to the group.
    pub params: ParameterVector,
    /// Objective evaluations.
    pub evaluations: usize,
    /// Optimiser iterations.
    pub cycles: usize,
    /// Wall-clock time.
    pub elapsed: Duration,
}

/// What a worker sends back: the group, and how the round went.
pub struct RefineOutcome {
    /// The refined group, nudged to its best parameters on success.
    pub group: PanelGroup,
    /// Round summary, or the error that stopped it.
    pub report: Result<RefineReport>,
}

/// Scores `group` with the objective of `mode` under its current
/// parameters.
pub fn score_group(
    group: &mut PanelGroup,
    panels: &mut PanelArena,
    mode: RefineMode,
    scoring: &ScoringConfig,
    crystallography: &dyn Crystallography,
) -> Result<f64> {
    match mode {
        RefineMode::Intra => group.intra_score(panels),
        RefineMode::Inter => group.inter_score(panels, crystallography, scoring),
    }
}

/// Runs one refinement round on the calling thread.
///
/// The write lock is held for each objective evaluation only. On return
/// the group carries the best parameters and its panels are nudged to
/// them.
pub fn refine_group(
    group: &mut PanelGroup,
    panels: &RwLock<PanelArena>,
    mode: RefineMode,
    scoring: &ScoringConfig,
    crystallography: &dyn Crystallography,
    optimizer: &dyn Optimizer,
    specs: &[ParameterSpec],
) -> Result<(f64, OptimizationResult)> {
    let initial = score_group(group, &mut panels.write(), mode, scoring, crystallography)?;
    let start = *group.params();

    let mut failure = None;
    let mut objective = |params: &ParameterVector| {
        if failure.is_some() {
            return f64::INFINITY;
        }
        group.set_params(*params);
        match score_group(group, &mut panels.write(), mode, scoring, crystallography) {
            Ok(score) => score,
            Err(e) => {
                failure = Some(e);
                f64::INFINITY
            }
        }
    };
    let result = optimizer.minimize(start, specs, &mut objective);

    if let Some(e) = failure {
        group.set_params(start);
        group.nudge_panels(&mut panels.write())?;
        return Err(e);
    }

    group.set_params(result.params);
    group.nudge_panels(&mut panels.write())?;
    Ok((initial, result))
}

/// Clears the running flag when the worker exits, even by panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_refinement_worker(
    job: RefineJob,
    optimizer: &dyn Optimizer,
    specs: &[ParameterSpec],
    tx: &Sender<RefineOutcome>,
    running: &AtomicBool,
) {
    let guard = RunningGuard(running);
    let start = Instant::now();
    let RefineJob {
        mut group,
        panels,
        mode,
        scoring,
        crystallography,
    } = job;

    info!(
        "starting {mode} refinement of {} panels with {}",
        group.panel_ids().len(),
        optimizer.name()
    );

    let report = refine_group(
        &mut group,
        &panels,
        mode,
        &scoring,
        crystallography.as_ref(),
        optimizer,
        specs,
    )
    .map(|(initial_score, result)| RefineReport {
        mode,
        initial_score,
        final_score: result.score,
        params: result.params,
        evaluations: result.evaluations,
        cycles: result.cycles,
        elapsed: start.elapsed(),
    });

    match &report {
        Ok(r) => info!(
            "{mode} refinement finished in {:.2}s: score {:.4} -> {:.4}",
            r.elapsed.as_secs_f64(),
            r.initial_score,
            r.final_score
        ),
        Err(e) => warn!("{mode} refinement failed: {e}"),
    }

    // The flag stays set until the group has been handed back.
    let _ = tx.send(RefineOutcome { group, report });
    drop(guard);
}

/// Handle to a running round.
pub struct RefineHandle {
    rx: Receiver<RefineOutcome>,
    thread: JoinHandle<()>,
}

impl RefineHandle {
    /// Returns the outcome if the round has finished.
    pub fn try_recv(&self) -> Option<Result<RefineOutcome>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(Ok(outcome)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(worker_lost())),
        }
    }

    /// Blocks until the round finishes.
    pub fn wait(self) -> Result<RefineOutcome> {
        let outcome = self.rx.recv().map_err(|_| worker_lost());
        self.join();
        outcome
    }

    /// Waits for the worker thread to exit, after which the refiner
    /// accepts a new round.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("refinement worker panicked");
        }
    }
}

fn worker_lost() -> Error {
    Error::Refinement("worker exited without reporting".to_string())
}

/// Starts refinement rounds, one at a time.
pub struct Refiner {
    running: Arc<AtomicBool>,
    config: RefineConfig,
    optimizer: Arc<dyn Optimizer>,
}

impl Refiner {
    /// Refiner using the bundled Nelder–Mead optimiser.
    #[must_use]
    pub fn new(config: RefineConfig) -> Self {
        let optimizer = Arc::new(NelderMead::new(config.cycles));
        Self::with_optimizer(config, optimizer)
    }

    /// Refiner using a caller-supplied optimiser.
    #[must_use]
    pub fn with_optimizer(config: RefineConfig, optimizer: Arc<dyn Optimizer>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            config,
            optimizer,
        }
    }

    /// Refinement settings.
    #[must_use]
    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// True while a round is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts a round on a worker thread.
    ///
    /// If a round is already running the request is ignored and the job
    /// is handed back in `Err`.
    pub fn start(&self, job: RefineJob) -> std::result::Result<RefineHandle, Box<RefineJob>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("refinement already running, ignoring {} request", job.mode);
            return Err(Box::new(job));
        }

        let (tx, rx) = channel();
        let running = Arc::clone(&self.running);
        let optimizer = Arc::clone(&self.optimizer);
        let specs = self.config.specs(job.mode).to_vec();
        let thread = thread::spawn(move || {
            run_refinement_worker(job, optimizer.as_ref(), &specs, &tx, &running);
        });
        Ok(RefineHandle { rx, thread })
    }
}

impl Default for Refiner {
    fn default() -> Self {
        Self::new(RefineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_presets() {
        let config = RefineConfig::default();
        assert_eq!(config.cycles, 40);
        let intra: Vec<_> = config.specs(RefineMode::Intra).iter().map(|s| s.parameter).collect();
        assert_eq!(intra, [Parameter::Radius, Parameter::Alpha, Parameter::Beta]);
        let inter: Vec<_> = config.specs(RefineMode::Inter).iter().map(|s| s.parameter).collect();
        assert_eq!(inter, [Parameter::Horiz, Parameter::Vert]);
        assert!((config.inter[0].tolerance - 5e-6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_with_specs() {
        let config = RefineConfig::new()
            .with_cycles(5)
            .with_specs(RefineMode::Inter, vec![ParameterSpec::new(Parameter::Gamma, 1e-3, 1e-6)]);
        assert_eq!(config.cycles, 5);
        assert_eq!(config.specs(RefineMode::Inter)[0].parameter, Parameter::Gamma);
    }

    #[test]
    fn test_running_guard_clears_flag() {
        let flag = AtomicBool::new(true);
        {
            let _guard = RunningGuard(&flag);
        }
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(RefineMode::Intra.to_string(), "intra-panel");
    }
}
