//! Linear algebra helpers for covariance bookkeeping.
//!
//! Public API:
//!     pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn guarded_inverse(a: &DMatrix<f64>, opt: InversionOptions) -> Result<DMatrix<f64>, Conditioning>
//!     pub fn matrix_square_root(matrix: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn central_difference_jacobian(f, x, step) -> DMatrix<f64>
//!
//! Covariance health checks (`is_symmetric`, `min_eigenvalue`, `is_positive_semidefinite`) are used
//! by the tests to verify the filter invariants after every tick.
//!
//! Square root strategy (used to draw correlated noise samples):
//! 1) Symmetrize P ← 0.5 (P + Pᵀ)
//! 2) Cholesky
//! 3) Jittered Cholesky (geometric ramp)
//! 4) Symmetric EVD with eigenvalue floor → S = U * sqrt(Λ⁺) * Uᵀ

use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{DMatrix, DVector};

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic.
///
/// # Arguments
/// * `m` - the matrix to symmetrize
///
/// # Returns
/// A symmetrized version of the input matrix.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Thresholds that decide whether a matrix is safe to invert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InversionOptions {
    /// Largest accepted ratio between the largest and smallest singular value
    pub max_condition_number: f64, // e.g., 1e12
    /// Smallest accepted scale-free determinant, `|det A| / ∏ |A_ii|`
    pub determinant_epsilon: f64, // e.g., 1e-12
}

impl Default for InversionOptions {
    fn default() -> Self {
        Self {
            max_condition_number: 1e12,
            determinant_epsilon: 1e-12,
        }
    }
}

/// Conditioning figures of a matrix that was rejected for inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditioning {
    pub determinant: f64,
    pub condition_number: f64,
}

/// 2-norm condition number (ratio of extreme singular values).
///
/// Returns `f64::INFINITY` for matrices with a zero singular value or an empty matrix.
pub fn condition_number(a: &DMatrix<f64>) -> f64 {
    let singular_values = a.clone().svd(false, false).singular_values;
    let max = singular_values.iter().cloned().fold(0.0_f64, f64::max);
    let min = singular_values
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min);
    if min <= 0.0 || !min.is_finite() {
        f64::INFINITY
    } else {
        max / min
    }
}

/// Invert a symmetric positive (semi-)definite matrix after checking its conditioning.
///
/// The matrix is symmetrized first. It is rejected when its determinant relative to the product
/// of its diagonal (see [`relative_determinant`]) is within `determinant_epsilon` of zero, when
/// its condition number exceeds `max_condition_number`, or when neither a Cholesky nor an LU
/// inverse can be formed. The Cholesky inverse is preferred because it keeps the result
/// symmetric.
pub fn guarded_inverse(
    a: &DMatrix<f64>,
    opt: InversionOptions,
) -> Result<DMatrix<f64>, Conditioning> {
    assert!(a.is_square(), "guarded_inverse: A must be square");
    let a_sym = symmetrize(a);
    let conditioning = Conditioning {
        determinant: a_sym.determinant(),
        condition_number: condition_number(&a_sym),
    };
    if !conditioning.determinant.is_finite()
        || relative_determinant(&a_sym, conditioning.determinant) <= opt.determinant_epsilon
        || !conditioning.condition_number.is_finite()
        || conditioning.condition_number > opt.max_condition_number
    {
        return Err(conditioning);
    }
    if let Some(ch) = Cholesky::new(a_sym.clone()) {
        return Ok(ch.inverse());
    }
    a_sym.try_inverse().ok_or(conditioning)
}

/// `|det A| / ∏ |A_ii|`, or 0 when a diagonal entry is zero.
///
/// For a positive definite matrix this lies in `(0, 1]` (Hadamard's inequality) and does not
/// change when the matrix is scaled, so a small but well-conditioned covariance is not mistaken
/// for a singular one.
pub fn relative_determinant(a: &DMatrix<f64>, determinant: f64) -> f64 {
    let scale: f64 = a.diagonal().iter().map(|d| d.abs()).product();
    if scale > 0.0 {
        determinant.abs() / scale
    } else {
        0.0
    }
}

/// Check that `m` is square and `|m - mᵀ| <= tolerance` element-wise.
pub fn is_symmetric(m: &DMatrix<f64>, tolerance: f64) -> bool {
    if !m.is_square() {
        return false;
    }
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            if (m[(i, j)] - m[(j, i)]).abs() > tolerance {
                return false;
            }
        }
    }
    true
}

/// Smallest eigenvalue of the symmetric part of `m`.
pub fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
    SymmetricEigen::new(symmetrize(m))
        .eigenvalues
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min)
}

/// True when `m` is symmetric within `tolerance` and no eigenvalue is below `-tolerance`.
pub fn is_positive_semidefinite(m: &DMatrix<f64>, tolerance: f64) -> bool {
    is_symmetric(m, tolerance) && min_eigenvalue(m) >= -tolerance
}

/// Compute a robust symmetric square root `S` such that approximately `matrix ≈ S * Sᵀ`.
///
/// Attempts Cholesky decomposition first (yielding L such that matrix = L * L^T).
/// If Cholesky fails (e.g., the matrix is only semi-definite, as a noise covariance with a
/// noiseless channel is), it retries with a small diagonal jitter and finally falls back to an
/// eigenvalue decomposition (S = V * sqrt(D) * V^T) with negative eigenvalues floored.
///
/// # Arguments
/// * `matrix` - The DMatrix<f64> to find the square root of. It's assumed to be symmetric and square.
pub fn matrix_square_root(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    assert!(
        matrix.is_square(),
        "matrix_square_root: matrix must be square"
    );
    const INITIAL_JITTER: f64 = 1e-12;
    const MAX_JITTER: f64 = 1e-6;
    const MAX_TRIES: usize = 6;
    const EIGEN_FLOOR: f64 = 0.0;
    let p = symmetrize(matrix);
    if let Some(s) = chol_sqrt(&p) {
        return s;
    }
    if let Some(s) = chol_sqrt_with_jitter(&p, INITIAL_JITTER, MAX_JITTER, MAX_TRIES) {
        return s;
    }
    evd_symmetric_sqrt_with_floor(&p, EIGEN_FLOOR)
}

/// Plain Cholesky square root: L such that P ≈ L Lᵀ, or None if it fails.
fn chol_sqrt(p: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    Cholesky::new(p.clone()).map(|ch| ch.l().into_owned())
}

/// Cholesky with diagonal jitter (geometric ramp). Returns None if all tries fail.
fn chol_sqrt_with_jitter(
    p: &DMatrix<f64>,
    initial_jitter: f64,
    max_jitter: f64,
    max_tries: usize,
) -> Option<DMatrix<f64>> {
    let n = p.nrows();
    let mut jitter = initial_jitter;
    for _ in 0..max_tries {
        let mut pj = p.clone();
        for i in 0..n {
            pj[(i, i)] += jitter;
        }
        if let Some(ch) = Cholesky::new(pj) {
            return Some(ch.l().into_owned());
        }
        jitter *= 10.0;
        if jitter > max_jitter {
            break;
        }
    }
    None
}

/// Symmetric EVD square root with eigenvalue flooring:
/// S = U * sqrt(max(λ, floor)) * Uᵀ
fn evd_symmetric_sqrt_with_floor(p: &DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    let se = SymmetricEigen::new(p.clone());
    let lambdas = se.eigenvalues.map(|l| l.max(floor));
    let u = se.eigenvectors;
    let sigma_half = DMatrix::<f64>::from_diagonal(&lambdas.map(|l| l.sqrt()));
    &u * sigma_half * u.transpose()
}

/// Central-difference approximation of the Jacobian of `f` at `x`.
///
/// Column `j` is `(f(x + step·e_j) - f(x - step·e_j)) / (2·step)`. Used to cross-check the
/// analytic Jacobians provided by the process and observation models.
pub fn central_difference_jacobian<F>(f: F, x: &DVector<f64>, step: f64) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let rows = f(x).len();
    let cols = x.len();
    let mut jac = DMatrix::<f64>::zeros(rows, cols);
    for j in 0..cols {
        let mut forward = x.clone();
        let mut backward = x.clone();
        forward[j] += step;
        backward[j] -= step;
        let column = (f(&forward) - f(&backward)) / (2.0 * step);
        jac.set_column(j, &column);
    }
    jac
}

/* =============================== Tests ==================================== */

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &DMatrix<f64>, b: &DMatrix<f64>, tol: f64) -> bool {
        if a.shape() != b.shape() {
            return false;
        }
        let mut max_abs = 0.0f64;
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                max_abs = max_abs.max((a[(i, j)] - b[(i, j)]).abs());
            }
        }
        max_abs <= tol
    }

    #[test]
    fn t_symmetrize() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 3.0]);
        let s = symmetrize(&m);
        let s_expected = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 3.0]);
        assert!(approx_eq(&s, &s_expected, 1e-15));
    }

    #[test]
    fn t_guarded_inverse_spd() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let inv = guarded_inverse(&a, InversionOptions::default()).expect("SPD should invert");
        assert!(approx_eq(&(&a * &inv), &DMatrix::identity(2, 2), 1e-12));
        assert!(is_symmetric(&inv, 1e-14));
    }

    #[test]
    fn t_guarded_inverse_zero_row() {
        // Zero row/column, as produced by H P Hᵀ with a zero row in H and R = 0
        let a = DMatrix::from_row_slice(3, 3, &[0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0]);
        let err = guarded_inverse(&a, InversionOptions::default()).unwrap_err();
        assert!(err.determinant.abs() <= 1e-12);
        assert!(err.condition_number > 1e12);
    }

    #[test]
    fn t_guarded_inverse_ill_conditioned() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1e-14]);
        let opts = InversionOptions {
            max_condition_number: 1e10,
            determinant_epsilon: 0.0,
        };
        let err = guarded_inverse(&a, opts).unwrap_err();
        assert!(err.condition_number > 1e10);
    }

    #[test]
    fn t_guarded_inverse_small_well_conditioned() {
        // Tiny absolute determinant, but the matrix is nearly a multiple of the identity
        let a = DMatrix::<f64>::from_row_slice(
            3,
            3,
            &[1e-5, 1e-6, 0.0, 1e-6, 1.1e-5, 0.0, 0.0, 0.0, 1e-5],
        );
        assert!(a.determinant().abs() < 1e-12);
        let inv = guarded_inverse(&a, InversionOptions::default()).expect("should invert");
        assert!(approx_eq(&(&a * &inv), &DMatrix::identity(3, 3), 1e-9));
    }

    #[test]
    fn t_relative_determinant() {
        let a = DMatrix::<f64>::identity(3, 3) * 1e-6;
        assert!((relative_determinant(&a, a.determinant()) - 1.0).abs() < 1e-12);
        let b = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(relative_determinant(&b, b.determinant()).abs() < 1e-15);
        let c = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 2.0]);
        assert_eq!(relative_determinant(&c, 0.0), 0.0);
    }

    #[test]
    fn t_guarded_inverse_indefinite_uses_lu() {
        // Symmetric but indefinite: Cholesky fails, LU succeeds
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let inv = guarded_inverse(&a, InversionOptions::default()).expect("LU should invert");
        assert!(approx_eq(&(&a * &inv), &DMatrix::identity(2, 2), 1e-12));
    }

    #[test]
    #[should_panic(expected = "guarded_inverse: A must be square")]
    fn t_guarded_inverse_non_square_panics() {
        let a = DMatrix::<f64>::zeros(3, 2);
        let _ = guarded_inverse(&a, InversionOptions::default());
    }

    #[test]
    fn t_condition_number_identity() {
        let i = DMatrix::<f64>::identity(3, 3);
        assert!((condition_number(&i) - 1.0).abs() < 1e-12);
        let d = DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 1.0, 0.1]));
        assert!((condition_number(&d) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn t_is_symmetric() {
        let s = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 2.0]);
        assert!(is_symmetric(&s, 0.0));
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.4, 2.0]);
        assert!(!is_symmetric(&a, 1e-3));
        assert!(is_symmetric(&a, 0.2));
        assert!(!is_symmetric(&DMatrix::<f64>::zeros(2, 3), 1.0));
    }

    #[test]
    fn t_min_eigenvalue_and_psd() {
        let p = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]); // eigenvalues {1, 3}
        assert!((min_eigenvalue(&p) - 1.0).abs() < 1e-12);
        assert!(is_positive_semidefinite(&p, 1e-12));
        let n = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]); // eigenvalues {3, -1}
        assert!(!is_positive_semidefinite(&n, 1e-12));
    }

    #[test]
    fn t_chol_sqrt_spd() {
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.5, 0.0, 1.0, -1.0, 0.0, 0.0, 0.2]);
        let p = &a * a.transpose();
        let s = chol_sqrt(&p).expect("Cholesky should succeed for SPD");
        let back = &s * s.transpose();
        assert!(approx_eq(&back, &p, 1e-12));
    }

    #[test]
    fn t_chol_sqrt_none() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]); // eigenvalues: 3, -1
        assert!(chol_sqrt(&m).is_none(), "Cholesky should fail for non-PD matrix");
    }

    #[test]
    fn t_square_root_of_semidefinite_noise() {
        // A noiseless channel makes the covariance singular; sampling must still work
        let q = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 0.0]));
        let s = matrix_square_root(&q);
        let back = &s * s.transpose();
        assert!(approx_eq(&back, &q, 1e-5));
    }

    #[test]
    fn t_square_root_of_zero_matrix() {
        let z = DMatrix::<f64>::zeros(3, 3);
        let s = matrix_square_root(&z);
        let back = &s * s.transpose();
        assert!(approx_eq(&back, &z, 1e-5));
    }

    #[test]
    fn t_evd_floor_negative_eigenvalues() {
        let m = DMatrix::from_row_slice(3, 3, &[-1.0, 0.0, 0.0, 0.0, -2.0, 0.0, 0.0, 0.0, 3.0]);
        let s = evd_symmetric_sqrt_with_floor(&m, 1e-6);
        let back = &s * s.transpose();
        assert!(approx_eq(&back, &back.transpose(), 1e-12));
        assert!(min_eigenvalue(&back) >= -1e-10);
    }

    #[test]
    fn t_public_identity() {
        let i = DMatrix::<f64>::identity(4, 4);
        let s = matrix_square_root(&i);
        assert!(approx_eq(&s, &i, 1e-14));
    }

    #[test]
    #[should_panic]
    fn t_public_non_square_panics() {
        let m = DMatrix::<f64>::zeros(3, 2);
        let _ = matrix_square_root(&m);
    }

    #[test]
    fn t_central_difference_of_linear_map() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, -1.0, 0.5, 0.0, 3.0]);
        let f = |x: &DVector<f64>| &a * x;
        let x = DVector::from_vec(vec![0.3, -0.7]);
        let jac = central_difference_jacobian(f, &x, 1e-6);
        assert!(approx_eq(&jac, &a, 1e-8));
    }

    #[test]
    fn t_central_difference_of_trig_map() {
        let f = |x: &DVector<f64>| DVector::from_vec(vec![x[0].sin(), x[0] * x[1]]);
        let x = DVector::from_vec(vec![0.4, 2.0]);
        let jac = central_difference_jacobian(f, &x, 1e-6);
        let expected = DMatrix::from_row_slice(2, 2, &[0.4_f64.cos(), 0.0, 2.0, 0.4]);
        assert!(approx_eq(&jac, &expected, 1e-8));
    }
}
