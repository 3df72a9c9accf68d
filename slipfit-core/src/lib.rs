//! slipfit-core: Core types for detector panel geometry refinement.
//!
//! This crate provides the vector/matrix kernel, the panel model with its
//! backup/live geometry split, the panel arena, the diffraction image data
//! model and the contract with the crystallography collaborator.
//!

pub mod arena;
pub mod config;
pub mod crystallography;
pub mod error;
pub mod geometry;
pub mod image;
pub mod panel;

pub use arena::PanelArena;
pub use config::{ScoringConfig, MAX_POWDER_BINS};
pub use crystallography::{Crystallography, RayTracePredictor, StoredPredictions};
pub use error::{Error, Result};
pub use geometry::{Mat3, Vec3};
pub use image::{Crystal, DiffractionImage, ImageId, Peak, Reflection};
pub use panel::{DetectorPosition, Panel, PanelGeometry, PanelId, PanelVertices};
