use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use ndarray_linalg::{Eig, Inverse, OperationNorm, c64};
use thiserror::Error;

const DENMAN_BEAVERS_MAX_ITERATIONS: usize = 100;
const MAX_CHAIN_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("LAPACK routine failed: {0}")]
    Lapack(#[from] ndarray_linalg::error::LinalgError),
    #[error("Eigenvector matrix is singular")]
    SingularEigenvectors,
    #[error("Square-root iterate became singular at iteration {iteration}")]
    SingularIterate { iteration: usize },
    #[error("Square-root iterate became non-finite at iteration {iteration}")]
    NonFiniteIterate { iteration: usize },
    #[error("Denman-Beavers square root did not converge in {iterations} iterations")]
    SquareRootNoConvergence { iterations: usize },
}

/// A right-eigenvector factorization `A = V diag(values) V^-1`.
pub struct EigenDecomposition {
    pub values: Array1<c64>,
    pub vectors: Array2<c64>,
    pub inverse: Array2<c64>,
    /// 1-norm condition number of `vectors`.
    pub condition: f64,
}

impl EigenDecomposition {
    /// Applies `f` to every eigenvalue and multiplies the factorization back out.
    pub fn reconstruct_with(&self, f: impl Fn(c64) -> c64) -> Array2<c64> {
        let mapped = self.values.mapv(f);
        let mut scaled = self.vectors.clone();
        for (mut column, &value) in scaled.columns_mut().into_iter().zip(mapped.iter()) {
            column.mapv_inplace(|entry| entry * value);
        }
        scaled.dot(&self.inverse)
    }

    /// Smallest distance between two eigenvalues, relative to their magnitude.
    pub fn min_relative_gap(&self) -> f64 {
        let mut gap = f64::INFINITY;
        for i in 0..self.values.len() {
            for j in (i + 1)..self.values.len() {
                let (a, b) = (self.values[i], self.values[j]);
                let scale = a.norm().max(b.norm()).max(1.0);
                gap = gap.min((a - b).norm() / scale);
            }
        }
        gap
    }
}

pub trait GeneralEigen {
    fn general_eigen(&self) -> Result<EigenDecomposition, LinalgError>;
}

impl<S: Data<Elem = f64>> GeneralEigen for ArrayBase<S, Ix2> {
    fn general_eigen(&self) -> Result<EigenDecomposition, LinalgError> {
        let (values, vectors) = self.eig()?;
        let inverse = vectors
            .inv()
            .map_err(|_| LinalgError::SingularEigenvectors)?;
        let condition = vectors.opnorm_one()? * inverse.opnorm_one()?;
        Ok(EigenDecomposition {
            values,
            vectors,
            inverse,
            condition,
        })
    }
}

fn max_abs(matrix: &Array2<f64>) -> f64 {
    matrix.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()))
}

pub fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    max_abs(&(a - b))
}

/// `A^k` by repeated squaring.
pub fn integer_power(matrix: &Array2<f64>, exponent: u32) -> Array2<f64> {
    let mut result = Array2::<f64>::eye(matrix.nrows());
    let mut base = matrix.to_owned();
    let mut remaining = exponent;
    while remaining > 0 {
        if remaining & 1 == 1 {
            result = result.dot(&base);
        }
        remaining >>= 1;
        if remaining > 0 {
            base = base.dot(&base);
        }
    }
    result
}

/// Principal square root by the coupled Denman-Beavers iteration.
///
/// Needs no eigenvectors, so it stays well-behaved on defective matrices.
/// It fails for matrices with eigenvalues on the closed negative real axis.
pub fn sqrtm_denman_beavers(
    matrix: &Array2<f64>,
    tolerance: f64,
) -> Result<Array2<f64>, LinalgError> {
    let mut y = matrix.to_owned();
    let mut z = Array2::<f64>::eye(matrix.nrows());

    for iteration in 1..=DENMAN_BEAVERS_MAX_ITERATIONS {
        let y_inv = y
            .inv()
            .map_err(|_| LinalgError::SingularIterate { iteration })?;
        let z_inv = z
            .inv()
            .map_err(|_| LinalgError::SingularIterate { iteration })?;

        let y_next = (&y + &z_inv) * 0.5;
        let z_next = (&z + &y_inv) * 0.5;
        if y_next.iter().any(|v| !v.is_finite()) {
            return Err(LinalgError::NonFiniteIterate { iteration });
        }

        let change = max_abs_diff(&y_next, &y);
        let scale = max_abs(&y_next).max(1.0);
        y = y_next;
        z = z_next;

        log::trace!("Denman-Beavers iteration {iteration}: change {change:.3e}");
        if change <= tolerance * scale {
            return Ok(y);
        }
    }

    Err(LinalgError::SquareRootNoConvergence {
        iterations: DENMAN_BEAVERS_MAX_ITERATIONS,
    })
}

/// Real fractional power `A^p` for `p >= 0` without an eigendecomposition.
///
/// The fractional part of `p` is expanded in base 2 and each set bit `k`
/// contributes the factor `A^(1/2^k)`, obtained by repeated square roots.
/// All factors are powers of `A`, so they commute.
pub fn fractional_power_chain(
    matrix: &Array2<f64>,
    exponent: f64,
    tolerance: f64,
) -> Result<Array2<f64>, LinalgError> {
    let mut result = integer_power(matrix, exponent.trunc() as u32);
    let mut remainder = exponent.fract();
    let mut root = matrix.to_owned();

    for _ in 0..MAX_CHAIN_DEPTH {
        if remainder <= 0.0 {
            break;
        }
        root = sqrtm_denman_beavers(&root, tolerance)?;
        remainder *= 2.0;
        if remainder >= 1.0 {
            result = result.dot(&root);
            remainder -= 1.0;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn jordan_like() -> Array2<f64> {
        array![[0.5, 0.5, 0.0], [0.0, 0.5, 0.5], [0.0, 0.0, 1.0]]
    }

    #[test]
    fn eigen_factorization_reconstructs_non_symmetric_matrix() {
        let matrix = array![[0.6, 0.3, 0.1], [0.2, 0.5, 0.3], [0.0, 0.0, 1.0]];
        let eigen = matrix.general_eigen().unwrap();
        let rebuilt = eigen.reconstruct_with(|value| value);
        for ((i, j), value) in rebuilt.indexed_iter() {
            assert_abs_diff_eq!(value.re, matrix[[i, j]], epsilon = 1e-12);
            assert_abs_diff_eq!(value.im, 0.0, epsilon = 1e-12);
        }
        assert!(eigen.condition.is_finite());
        assert!(eigen.min_relative_gap() > 1e-3);
    }

    #[test]
    fn integer_power_matches_repeated_products() {
        let matrix = array![[0.9, 0.1], [0.0, 1.0]];
        let cubed = matrix.dot(&matrix).dot(&matrix);
        assert!(max_abs_diff(&integer_power(&matrix, 3), &cubed) < 1e-15);
        assert_eq!(integer_power(&matrix, 0), Array2::<f64>::eye(2));
    }

    #[test]
    fn denman_beavers_recovers_known_square_root() {
        let root = array![[0.9, 0.1, 0.0], [0.0, 0.8, 0.2], [0.0, 0.0, 1.0]];
        let square = root.dot(&root);
        let computed = sqrtm_denman_beavers(&square, 1e-13).unwrap();
        assert!(max_abs_diff(&computed, &root) < 1e-10);
    }

    #[test]
    fn denman_beavers_handles_defective_matrix() {
        let matrix = jordan_like();
        let root = sqrtm_denman_beavers(&matrix, 1e-13).unwrap();
        assert!(max_abs_diff(&root.dot(&root), &matrix) < 1e-10);
    }

    #[test]
    fn denman_beavers_rejects_singular_input() {
        let matrix = array![[1.0, 0.0], [1.0, 0.0]];
        assert!(sqrtm_denman_beavers(&matrix, 1e-13).is_err());
    }

    #[test]
    fn chain_powers_compose() {
        let matrix = jordan_like();
        let three_quarters = fractional_power_chain(&matrix, 0.75, 1e-13).unwrap();
        let quarter = fractional_power_chain(&matrix, 0.25, 1e-13).unwrap();
        assert!(max_abs_diff(&three_quarters.dot(&quarter), &matrix) < 1e-9);

        let whole = fractional_power_chain(&matrix, 2.0, 1e-13).unwrap();
        assert!(max_abs_diff(&whole, &matrix.dot(&matrix)) < 1e-15);
    }
}
