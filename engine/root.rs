//! # Stochastic Root Engine
//!
//! Turns a transition matrix `M` over one time step into a matrix `R` over a
//! fraction `p` of that step, so that `R^(1/p)` approximates `M` while `R`
//! stays a valid transition matrix.
//!
//! 1. Fractional power. Diagonalizable matrices go through the general
//!    eigendecomposition `M = V diag(l) V^-1` with `l^p` taken on the
//!    principal branch. Defective matrices (repeated eigenvalues with
//!    near-parallel eigenvectors) and ill-conditioned bases go through a
//!    square-root chain instead (see [`crate::linalg::fractional_power_chain`]).
//!    When the chain cannot run, the eigen reconstruction is kept.
//! 2. Realification. The imaginary part of the reconstruction is dropped.
//!    A physically meaningful root is real, so a large dropped part is
//!    reported as a quality flag.
//! 3. Projection. Negative entries are clipped to zero and each row is
//!    renormalized. This accepts a small L1 deviation from the
//!    unconstrained power.
//! 4. Absorption. The death row is reset to the unit vector.

use crate::linalg::{
    EigenDecomposition, GeneralEigen, fractional_power_chain, integer_power, max_abs_diff,
};
use crate::matrix::{AdjustedMatrix, TransitionMatrix};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Slice-local failures of the root computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RootError {
    #[error("Exponent {0} is outside the supported range (0, 1].")]
    InvalidExponent(f64),
    #[error("Matrix decomposition did not converge: {reason}")]
    NonConvergentDecomposition { reason: String },
}

/// How the fractional power was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompositionMethod {
    /// Exponent 1; the input was only projected.
    Identity,
    Eigen,
    SquareRootChain,
}

impl fmt::Display for DecompositionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::Eigen => "eigen",
            Self::SquareRootChain => "square-root-chain",
        })
    }
}

/// Non-fatal warnings attached to a successful root.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityFlag {
    /// Clip-and-renormalize moved a row by more than `threshold` in L1.
    ProjectionDivergence {
        state: usize,
        l1: f64,
        threshold: f64,
    },
    /// The discarded imaginary part of the fractional power was not negligible.
    ImaginaryResidual { magnitude: f64, tolerance: f64 },
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectionDivergence {
                state,
                l1,
                threshold,
            } => write!(
                f,
                "projection moved row {} by {l1:.4} in L1 (threshold {threshold})",
                state + 1
            ),
            Self::ImaginaryResidual {
                magnitude,
                tolerance,
            } => write!(
                f,
                "discarded imaginary part {magnitude:.3e} exceeds {tolerance:.1e}"
            ),
        }
    }
}

/// Numerical knobs of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootOptions {
    /// Largest tolerated imaginary magnitude before a flag is raised.
    pub imaginary_tolerance: f64,
    /// Largest tolerated per-row L1 projection change before a flag is raised.
    pub projection_warning_threshold: f64,
    /// Eigenvector bases with a larger 1-norm condition number are not trusted.
    pub max_condition: f64,
    /// Eigenvalues closer than this (relative) count as repeated.
    pub repeated_eigenvalue_gap: f64,
    /// With repeated eigenvalues, eigenvector bases above this condition
    /// number are taken as defective.
    pub defective_condition: f64,
    /// Convergence tolerance of each Denman-Beavers square root.
    pub square_root_tolerance: f64,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            imaginary_tolerance: 1e-8,
            projection_warning_threshold: 0.05,
            max_condition: 1e10,
            repeated_eigenvalue_gap: 1e-6,
            defective_condition: 1e6,
            square_root_tolerance: 1e-13,
        }
    }
}

/// The adjusted matrix together with its diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RootOutcome {
    pub matrix: AdjustedMatrix,
    pub method: DecompositionMethod,
    pub flags: Vec<QualityFlag>,
    /// Largest per-row L1 change made by the projection.
    pub projection_l1: f64,
    /// Largest discarded imaginary magnitude.
    pub imaginary_residual: f64,
    /// `max |R^k - M|` when `k = 1/p` is an integer.
    pub reconstruction_error: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct StochasticRootEngine {
    options: RootOptions,
}

impl StochasticRootEngine {
    pub fn new(options: RootOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RootOptions {
        &self.options
    }

    pub fn compute_root(
        &self,
        matrix: &TransitionMatrix,
        exponent: f64,
    ) -> Result<RootOutcome, RootError> {
        if !exponent.is_finite() || exponent <= 0.0 || exponent > 1.0 {
            return Err(RootError::InvalidExponent(exponent));
        }

        let input = matrix.values().to_owned();
        let (candidate, method, imaginary_residual) = if exponent == 1.0 {
            (input.clone(), DecompositionMethod::Identity, 0.0)
        } else {
            self.fractional_power(&input, exponent)?
        };

        let (mut projected, worst_state, projection_l1) = project_onto_stochastic(&candidate);
        let death = matrix.death_index();
        projected.row_mut(death).fill(0.0);
        projected[[death, death]] = 1.0;

        let mut flags = Vec::new();
        if projection_l1 > self.options.projection_warning_threshold {
            flags.push(QualityFlag::ProjectionDivergence {
                state: worst_state,
                l1: projection_l1,
                threshold: self.options.projection_warning_threshold,
            });
        }
        if imaginary_residual > self.options.imaginary_tolerance {
            flags.push(QualityFlag::ImaginaryResidual {
                magnitude: imaginary_residual,
                tolerance: self.options.imaginary_tolerance,
            });
        }

        let reconstruction_error = integer_reciprocal(exponent)
            .map(|steps| max_abs_diff(&integer_power(&projected, steps), &input));

        log::debug!(
            "Root via {method}: projection L1 {projection_l1:.3e}, imaginary {imaginary_residual:.3e}"
        );

        Ok(RootOutcome {
            matrix: TransitionMatrix::from_projected(projected),
            method,
            flags,
            projection_l1,
            imaginary_residual,
            reconstruction_error,
        })
    }

    fn fractional_power(
        &self,
        input: &Array2<f64>,
        exponent: f64,
    ) -> Result<(Array2<f64>, DecompositionMethod, f64), RootError> {
        let (reason, eigen_candidate) = match input.general_eigen() {
            Ok(eigen) => {
                let candidate = principal_power(&eigen, exponent);
                match (self.distrust(&eigen), candidate) {
                    (None, Some((real, imaginary))) => {
                        return Ok((real, DecompositionMethod::Eigen, imaginary));
                    }
                    (None, None) => ("non-finite eigen reconstruction".to_string(), None),
                    (Some(reason), candidate) => (reason, candidate),
                }
            }
            Err(e) => (e.to_string(), None),
        };

        log::debug!("Eigen path rejected ({reason}); using the square-root chain");
        match fractional_power_chain(input, exponent, self.options.square_root_tolerance) {
            Ok(power) => Ok((power, DecompositionMethod::SquareRootChain, 0.0)),
            // Eigenvalues on the closed negative real axis stop Denman-Beavers;
            // the principal-branch reconstruction is still usable then.
            Err(chain) => match eigen_candidate {
                Some((real, imaginary)) => {
                    log::warn!(
                        "Square-root chain failed ({chain}); keeping the eigen reconstruction despite {reason}"
                    );
                    Ok((real, DecompositionMethod::Eigen, imaginary))
                }
                None => Err(RootError::NonConvergentDecomposition {
                    reason: format!("{reason}; square-root chain: {chain}"),
                }),
            },
        }
    }

    /// Why the eigenbasis should not be used for a fractional power, if at all.
    /// Repeated eigenvalues alone are fine as long as the basis stays well
    /// conditioned; a defective matrix shows up as near-parallel eigenvectors.
    fn distrust(&self, eigen: &EigenDecomposition) -> Option<String> {
        if !eigen.condition.is_finite() || eigen.condition > self.options.max_condition {
            return Some(format!(
                "ill-conditioned eigenvectors (condition {:.3e})",
                eigen.condition
            ));
        }
        let gap = eigen.min_relative_gap();
        if gap <= self.options.repeated_eigenvalue_gap
            && eigen.condition > self.options.defective_condition
        {
            return Some(format!(
                "repeated eigenvalues (relative gap {gap:.3e}) with condition {:.3e}",
                eigen.condition
            ));
        }
        None
    }
}

/// Real part of the principal power and the largest dropped imaginary
/// magnitude; `None` when the reconstruction is not finite.
fn principal_power(eigen: &EigenDecomposition, exponent: f64) -> Option<(Array2<f64>, f64)> {
    let powered = eigen.reconstruct_with(|value| value.powf(exponent));
    if powered.iter().any(|z| !z.re.is_finite() || !z.im.is_finite()) {
        return None;
    }
    let imaginary = powered.iter().fold(0.0_f64, |acc, z| acc.max(z.im.abs()));
    Some((powered.mapv(|z| z.re), imaginary))
}

/// Clips negative entries to zero and rescales each row to sum to one. A row
/// left without mass stays in its own state. Returns the projection, the row
/// that moved most and its L1 change.
pub fn project_onto_stochastic(candidate: &Array2<f64>) -> (Array2<f64>, usize, f64) {
    let mut projected = candidate.mapv(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let mut worst_state = 0;
    let mut worst_l1 = 0.0_f64;

    for (state, mut row) in projected.rows_mut().into_iter().enumerate() {
        let mass = row.sum();
        if mass > 0.0 {
            row.mapv_inplace(|v| v / mass);
        } else {
            row.fill(0.0);
            row[state] = 1.0;
        }

        let l1: f64 = row
            .iter()
            .zip(candidate.row(state).iter())
            .map(|(after, before)| (after - before).abs())
            .sum();
        if l1 > worst_l1 {
            worst_l1 = l1;
            worst_state = state;
        }
    }

    (projected, worst_state, worst_l1)
}

fn integer_reciprocal(exponent: f64) -> Option<u32> {
    let steps = (1.0 / exponent).round();
    ((1.0 / exponent - steps).abs() < 1e-9 && steps >= 1.0 && steps <= u32::MAX as f64)
        .then_some(steps as u32)
}
