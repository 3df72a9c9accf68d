//! slipfit-algorithms: Panel group refinement.
//!
//! This crate provides the moving parts of a calibration:
//! - **Panel groups** - leaf/composite hierarchy with a six-parameter nudge
//! - **Matching** - per-group peak caches and nearest-peak lookup
//! - **Scores** - intra-panel (peak-peak) and inter-panel (peak-prediction)
//! - **Refinement** - Nelder–Mead on a background worker, one round at a time
//!
#![warn(missing_docs)]

mod group;
mod matcher;
mod nudge;
mod optimizer;
mod params;
mod powder;
mod refine;
mod score;
mod session;

pub use group::{GroupKind, PanelGroup, PeakCache, ReflectionPairing};
pub use nudge::nudge_geometry;
pub use optimizer::{NelderMead, OptimizationResult, Optimizer, ParameterSpec};
pub use params::{Parameter, ParameterVector};
pub use powder::PowderHistogram;
pub use refine::{
    refine_group, score_group, RefineConfig, RefineHandle, RefineJob, RefineMode, RefineOutcome,
    RefineReport, Refiner, SharedPanels,
};
pub use score::{pairwise_similarity, similarity};
pub use session::CalibrationSession;

// Re-export core scoring configuration
pub use slipfit_core::ScoringConfig;
