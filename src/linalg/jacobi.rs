//! Dense symmetric eigendecomposition for small matrices.
//!
//! A cyclic Jacobi iteration covers the two small dense eigenproblems in this
//! crate: the Lanczos tridiagonal matrix and the 3x3 Gram matrices behind
//! polar (Procrustes) projections. Matrix sizes stay in the tens, where
//! Jacobi's simplicity wins over a blocked solver.

use faer::{Col, Mat, MatRef};
use problemo::Problem;

use crate::E;
use crate::linalg::solver::EigenSolverError;

const MAX_SWEEPS: usize = 64;

/// Eigendecomposition `A = V diag(w) V^T` of a symmetric matrix.
///
/// Returns eigenvalues in ascending order with matching eigenvector columns.
pub fn symmetric_eigen(mat: MatRef<E>) -> Result<(Col<E>, Mat<E>), Problem> {
    let n = mat.ncols();
    let mut a = mat.to_owned();
    let mut v = Mat::<E>::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 });

    let scale = mat.norm_l2().max(1.0);
    let tolerance = 1e-14 * scale;

    for _sweep in 0..MAX_SWEEPS {
        if off_diagonal_norm(a.as_ref()) <= tolerance {
            return Ok(sorted_eigen(a, v));
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[(p, q)];
                if apq.abs() <= tolerance / (n as E) {
                    continue;
                }

                // Rotation angle zeroing a_pq (Golub & Van Loan 8.4).
                let tau = (a[(q, q)] - a[(p, p)]) / (2.0 * apq);
                let t = if tau >= 0.0 {
                    1.0 / (tau + (1.0 + tau * tau).sqrt())
                } else {
                    -1.0 / (-tau + (1.0 + tau * tau).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;

                // A <- G^T A G
                for k in 0..n {
                    let akp = a[(k, p)];
                    let akq = a[(k, q)];
                    a[(k, p)] = c * akp - s * akq;
                    a[(k, q)] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[(p, k)];
                    let aqk = a[(q, k)];
                    a[(p, k)] = c * apk - s * aqk;
                    a[(q, k)] = s * apk + c * aqk;
                }
                // V <- V G
                for k in 0..n {
                    let vkp = v[(k, p)];
                    let vkq = v[(k, q)];
                    v[(k, p)] = c * vkp - s * vkq;
                    v[(k, q)] = s * vkp + c * vkq;
                }
            }
        }
    }

    if off_diagonal_norm(a.as_ref()) <= tolerance {
        Ok(sorted_eigen(a, v))
    } else {
        Err(EigenSolverError::SweepLimit.into())
    }
}

/// Orthonormal polar factor `Q = W (W^T W)^{-1/2}` of a full-column-rank
/// matrix with three columns.
///
/// `Q` is the closest Stiefel point to `W`, which makes this the Procrustes
/// solution used by the SDP block updates and the rotation retrieval. Fails
/// with [`EigenSolverError::RankDeficient`] when `W` loses column rank.
pub fn stiefel_polar(w: MatRef<E>) -> Result<Mat<E>, Problem> {
    debug_assert_eq!(w.ncols(), 3);
    let wtw = Mat::from_fn(3, 3, |a, b| {
        (0..w.nrows()).map(|r| w[(r, a)] * w[(r, b)]).sum::<E>()
    });
    let (eigenvalues, eigenvectors) = symmetric_eigen(wtw.as_ref())?;
    if eigenvalues[0] <= 1e-12 * eigenvalues[2].max(1e-300) {
        return Err(EigenSolverError::RankDeficient.into());
    }

    // (W^T W)^{-1/2} = V diag(1/sqrt(lambda)) V^T
    let inv_sqrt = Mat::from_fn(3, 3, |a, b| {
        (0..3)
            .map(|k| eigenvectors[(a, k)] * eigenvectors[(b, k)] / eigenvalues[k].sqrt())
            .sum::<E>()
    });
    Ok(&w * &inv_sqrt)
}

/// Nearest rotation matrix to a 3x3 block: the polar factor with the
/// determinant sign fixed up.
///
/// The relaxation's gauge group is O(3), so a retrieved block can land on the
/// reflection sheet; negating it flips the determinant back to +1 without
/// changing the Gram constraints it satisfies.
pub fn project_to_rotation(m: MatRef<E>) -> Result<Mat<E>, Problem> {
    debug_assert_eq!((m.nrows(), m.ncols()), (3, 3));
    let mut q = stiefel_polar(m)?;
    if crate::so3::determinant3(q.as_ref()) < 0.0 {
        q = -&q;
    }
    Ok(q)
}

fn off_diagonal_norm(a: MatRef<E>) -> E {
    let n = a.ncols();
    let mut sum = 0.0;
    for p in 0..n {
        for q in (p + 1)..n {
            sum += 2.0 * a[(p, q)] * a[(p, q)];
        }
    }
    sum.sqrt()
}

fn sorted_eigen(a: Mat<E>, v: Mat<E>) -> (Col<E>, Mat<E>) {
    let n = a.ncols();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[(i, i)].partial_cmp(&a[(j, j)]).unwrap());

    let eigenvalues = Col::from_fn(n, |k| a[(order[k], order[k])]);
    let eigenvectors = Mat::from_fn(n, n, |i, k| v[(i, order[k])]);
    (eigenvalues, eigenvectors)
}
