//! Error types for slipfit-core.

use thiserror::Error;

/// Result type alias for slipfit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for slipfit operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Panel handle does not refer to a panel in the arena.
    #[error("unknown panel index: {0}")]
    UnknownPanel(usize),

    /// Image handle does not refer to a loaded image.
    #[error("unknown image index: {0}")]
    UnknownImage(usize),

    /// Panel geometry cannot be used (zero resolution, empty extent, ...).
    #[error("invalid geometry for panel '{name}': {reason}")]
    InvalidGeometry { name: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The panel arena could not grow; nothing was appended.
    #[error("cannot allocate room for {requested} more panels")]
    Allocation { requested: usize },

    /// Operation needs at least one member panel.
    #[error("panel group has no member panels")]
    EmptyGroup,

    /// Refinement worker error.
    #[error("refinement error: {0}")]
    Refinement(String),
}
