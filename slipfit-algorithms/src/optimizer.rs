//! Derivative-free minimisation over a subset of the parameter vector.

use log::trace;

use crate::params::{Parameter, ParameterVector};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One refined parameter with its initial step and convergence tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterSpec {
    /// Which parameter.
    pub parameter: Parameter,
    /// Initial simplex step.
    pub step: f64,
    /// Converged once every vertex is within this of the best one.
    pub tolerance: f64,
}

impl ParameterSpec {
    /// Creates a new spec.
    #[must_use]
    pub fn new(parameter: Parameter, step: f64, tolerance: f64) -> Self {
        Self {
            parameter,
            step,
            tolerance,
        }
    }
}

/// Result of a minimisation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OptimizationResult {
    /// Best parameter vector found.
    pub params: ParameterVector,
    /// Objective at `params`.
    pub score: f64,
    /// Number of objective evaluations.
    pub evaluations: usize,
    /// Iterations run.
    pub cycles: usize,
}

/// Minimiser of a scalar objective over selected parameters.
///
/// Parameters not named in `specs` keep their value from `start`.
pub trait Optimizer: Send + Sync {
    /// Minimises `objective` starting from `start`.
    fn minimize(
        &self,
        start: ParameterVector,
        specs: &[ParameterSpec],
        objective: &mut dyn FnMut(&ParameterVector) -> f64,
    ) -> OptimizationResult;

    /// Returns the name of the optimiser.
    fn name(&self) -> &'static str;
}

/// Nelder–Mead downhill simplex.
#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    cycles: usize,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self { cycles: 40 }
    }
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

struct Vertex {
    x: Vec<f64>,
    score: f64,
}

impl NelderMead {
    /// Creates a simplex optimiser running at most `cycles` iterations.
    #[must_use]
    pub fn new(cycles: usize) -> Self {
        Self { cycles }
    }

    /// Iteration cap.
    #[must_use]
    pub fn cycles(&self) -> usize {
        self.cycles
    }
}

fn compose(start: &ParameterVector, specs: &[ParameterSpec], x: &[f64]) -> ParameterVector {
    let mut params = *start;
    for (spec, value) in specs.iter().zip(x) {
        params.set(spec.parameter, *value);
    }
    params
}

fn blend(a: &[f64], b: &[f64], t: f64) -> Vec<f64> {
    // a + t * (b - a)
    a.iter().zip(b).map(|(a, b)| a + t * (b - a)).collect()
}

impl Optimizer for NelderMead {
    #[allow(clippy::too_many_lines)]
    fn minimize(
        &self,
        start: ParameterVector,
        specs: &[ParameterSpec],
        objective: &mut dyn FnMut(&ParameterVector) -> f64,
    ) -> OptimizationResult {
        let mut evaluations = 0;
        let mut evaluate = |x: &[f64]| {
            evaluations += 1;
            let score = objective(&compose(&start, specs, x));
            if score.is_nan() {
                f64::INFINITY
            } else {
                score
            }
        };

        let origin: Vec<f64> = specs.iter().map(|s| start.get(s.parameter)).collect();
        let mut simplex = Vec::with_capacity(specs.len() + 1);
        simplex.push(Vertex {
            score: evaluate(&origin),
            x: origin.clone(),
        });
        for (i, spec) in specs.iter().enumerate() {
            let mut x = origin.clone();
            x[i] += spec.step;
            simplex.push(Vertex {
                score: evaluate(&x),
                x,
            });
        }

        let n = specs.len();
        let mut cycles = 0;
        while n > 0 && cycles < self.cycles {
            simplex.sort_by(|a, b| a.score.total_cmp(&b.score));

            let converged = simplex[1..].iter().all(|v| {
                v.x.iter()
                    .zip(&simplex[0].x)
                    .zip(specs)
                    .all(|((x, best), spec)| (x - best).abs() <= spec.tolerance)
            });
            if converged {
                break;
            }
            cycles += 1;

            #[allow(clippy::cast_precision_loss)]
            let centroid: Vec<f64> = (0..n)
                .map(|d| simplex[..n].iter().map(|v| v.x[d]).sum::<f64>() / n as f64)
                .collect();
            let worst = &simplex[n];

            let reflected = blend(&centroid, &worst.x, -REFLECT);
            let reflected_score = evaluate(&reflected);

            if reflected_score < simplex[0].score {
                let expanded = blend(&centroid, &reflected, EXPAND);
                let expanded_score = evaluate(&expanded);
                simplex[n] = if expanded_score < reflected_score {
                    Vertex {
                        x: expanded,
                        score: expanded_score,
                    }
                } else {
                    Vertex {
                        x: reflected,
                        score: reflected_score,
                    }
                };
                continue;
            }

            if reflected_score < simplex[n - 1].score {
                simplex[n] = Vertex {
                    x: reflected,
                    score: reflected_score,
                };
                continue;
            }

            let (contracted, bound) = if reflected_score < simplex[n].score {
                (blend(&centroid, &reflected, CONTRACT), reflected_score)
            } else {
                (blend(&centroid, &simplex[n].x, CONTRACT), simplex[n].score)
            };
            let contracted_score = evaluate(&contracted);
            if contracted_score < bound {
                simplex[n] = Vertex {
                    x: contracted,
                    score: contracted_score,
                };
                continue;
            }

            let best = simplex[0].x.clone();
            for vertex in &mut simplex[1..] {
                vertex.x = blend(&best, &vertex.x, SHRINK);
                vertex.score = evaluate(&vertex.x);
            }
        }

        simplex.sort_by(|a, b| a.score.total_cmp(&b.score));
        let best = &simplex[0];
        trace!(
            "simplex finished after {cycles} cycles and {evaluations} evaluations, score {}",
            best.score
        );
        OptimizationResult {
            params: compose(&start, specs, &best.x),
            score: best.score,
            evaluations,
            cycles,
        }
    }

    fn name(&self) -> &'static str {
        "NelderMead"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_quadratic_minimum() {
        let specs = [
            ParameterSpec::new(Parameter::Horiz, 0.5, 1e-6),
            ParameterSpec::new(Parameter::Vert, 0.5, 1e-6),
        ];
        let mut objective =
            |p: &ParameterVector| (p.horiz - 1.0).powi(2) + (p.vert + 2.0).powi(2);
        let result = NelderMead::new(500).minimize(ParameterVector::zero(), &specs, &mut objective);
        assert!((result.params.horiz - 1.0).abs() < 1e-3);
        assert!((result.params.vert + 2.0).abs() < 1e-3);
        assert!(result.score < 1e-5);
    }

    #[test]
    fn test_untouched_parameters_keep_start() {
        let start = ParameterVector::zero().with(Parameter::Gamma, 0.25);
        let specs = [ParameterSpec::new(Parameter::Radius, 0.1, 1e-6)];
        let mut objective = |p: &ParameterVector| (p.radius - 0.3).powi(2);
        let result = NelderMead::default().minimize(start, &specs, &mut objective);
        assert!((result.params.gamma - 0.25).abs() < f64::EPSILON);
        assert!(result.cycles <= 40);
    }

    #[test]
    fn test_never_worse_than_start() {
        let specs = [ParameterSpec::new(Parameter::Alpha, 0.1, 1e-9)];
        let mut f = |p: &ParameterVector| (p.alpha * 40.0).sin();
        let start_score = f(&ParameterVector::zero());
        let result = NelderMead::new(3).minimize(ParameterVector::zero(), &specs, &mut f);
        assert!(result.score <= start_score);
    }

    #[test]
    fn test_no_specs_evaluates_once() {
        let mut objective = |_: &ParameterVector| 7.0;
        let result = NelderMead::default().minimize(ParameterVector::zero(), &[], &mut objective);
        assert_eq!(result.evaluations, 1);
        assert_eq!(result.cycles, 0);
        assert!((result.score - 7.0).abs() < f64::EPSILON);
    }
}
