//! The six-parameter adjustment vector of a panel group.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One adjustable degree of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parameter {
    /// Radial offset along the centroid direction (metres).
    Radius,
    /// First intra-panel tilt, about the local x axis (radians).
    Alpha,
    /// Second intra-panel tilt, about the local y axis (radians).
    Beta,
    /// Horizontal slide, lab x rotation (radians).
    Horiz,
    /// Vertical slide, lab y rotation (radians).
    Vert,
    /// Swivel slide, lab z rotation (radians).
    Gamma,
}

impl Parameter {
    /// Every parameter, in vector order.
    pub const ALL: [Parameter; 6] = [
        Parameter::Radius,
        Parameter::Alpha,
        Parameter::Beta,
        Parameter::Horiz,
        Parameter::Vert,
        Parameter::Gamma,
    ];
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parameter::Radius => write!(f, "radius"),
            Parameter::Alpha => write!(f, "alpha"),
            Parameter::Beta => write!(f, "beta"),
            Parameter::Horiz => write!(f, "horiz"),
            Parameter::Vert => write!(f, "vert"),
            Parameter::Gamma => write!(f, "gamma"),
        }
    }
}

/// Trial adjustment applied on top of a group's committed geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterVector {
    /// Radial offset (metres).
    pub radius: f64,
    /// Intra-panel tilt about the local x axis (radians).
    pub alpha: f64,
    /// Intra-panel tilt about the local y axis (radians).
    pub beta: f64,
    /// Lab x slide rotation (radians).
    pub horiz: f64,
    /// Lab y slide rotation (radians).
    pub vert: f64,
    /// Lab z slide rotation (radians).
    pub gamma: f64,
}

impl ParameterVector {
    /// The all-zero vector.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Reads one parameter.
    #[must_use]
    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Radius => self.radius,
            Parameter::Alpha => self.alpha,
            Parameter::Beta => self.beta,
            Parameter::Horiz => self.horiz,
            Parameter::Vert => self.vert,
            Parameter::Gamma => self.gamma,
        }
    }

    /// Writes one parameter.
    pub fn set(&mut self, parameter: Parameter, value: f64) {
        let slot = match parameter {
            Parameter::Radius => &mut self.radius,
            Parameter::Alpha => &mut self.alpha,
            Parameter::Beta => &mut self.beta,
            Parameter::Horiz => &mut self.horiz,
            Parameter::Vert => &mut self.vert,
            Parameter::Gamma => &mut self.gamma,
        };
        *slot = value;
    }

    /// Returns a copy with one parameter replaced.
    #[must_use]
    pub fn with(mut self, parameter: Parameter, value: f64) -> Self {
        self.set(parameter, value);
        self
    }

    /// True when every component is exactly zero.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_zero(&self) -> bool {
        Parameter::ALL.iter().all(|&p| self.get(p) == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_round_trip() {
        let mut params = ParameterVector::zero();
        for (i, p) in Parameter::ALL.iter().enumerate() {
            params.set(*p, i as f64 + 1.0);
        }
        assert!((params.radius - 1.0).abs() < f64::EPSILON);
        assert!((params.gamma - 6.0).abs() < f64::EPSILON);
        assert!((params.get(Parameter::Vert) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_is_zero() {
        assert!(ParameterVector::zero().is_zero());
        assert!(!ParameterVector::zero().with(Parameter::Beta, 1e-9).is_zero());
    }

    #[test]
    fn test_display() {
        assert_eq!(Parameter::Horiz.to_string(), "horiz");
    }
}
