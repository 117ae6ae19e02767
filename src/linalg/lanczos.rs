//! Krylov eigensolver for sparse symmetric operators.
//!
//! Symmetric Lanczos with full reorthogonalization, used to pull the smallest
//! algebraic eigenpairs out of the graph Laplacian (connectivity bound) and
//! out of the dual certificate matrix (staircase optimality check). The
//! projected tridiagonal problem is handed to [`crate::linalg::jacobi`].

use faer::rand::SeedableRng;
use faer::rand::rngs::StdRng;
use faer::sparse::SparseColMatRef;
use faer::stats::DistributionExt;
use faer::stats::prelude::{CwiseMatDistribution, StandardNormal};
use faer::{Col, Mat};
use problemo::Problem;
use serde::{Deserialize, Serialize};

use crate::linalg::jacobi::symmetric_eigen;
use crate::linalg::products::{dot, sparse_matvec};
use crate::linalg::solver::EigenSolverError;
use crate::{E, I};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanczosOptions {
    /// Krylov subspace dimension; 0 picks one from the operator size and the
    /// requested eigenpair count.
    pub max_subspace_dim: I,
    /// Relative residual tolerance on the Ritz pairs.
    pub tolerance: E,
    /// Seed for the start vector. Fixed by default so repeated solves are
    /// deterministic.
    pub seed: u64,
}

impl Default for LanczosOptions {
    fn default() -> Self {
        Self {
            max_subspace_dim: 0,
            tolerance: 1e-8,
            seed: 0,
        }
    }
}

/// Computes the `num_eigenvalues` smallest algebraic eigenpairs of a sparse
/// symmetric matrix.
///
/// Returns eigenvalues in ascending order and the matching Ritz vectors as
/// matrix columns. Fails with [`EigenSolverError::NoConvergence`] when the
/// subspace is exhausted before the requested pairs settle.
pub fn smallest_eigenpairs(
    mat: SparseColMatRef<I, E>,
    num_eigenvalues: I,
    options: &LanczosOptions,
) -> Result<(Col<E>, Mat<E>), Problem> {
    let n = mat.ncols();
    debug_assert_eq!(mat.nrows(), n);
    let k = num_eigenvalues.min(n);

    let m = if options.max_subspace_dim > 0 {
        options.max_subspace_dim.clamp(k + 2, n)
    } else {
        n.min((6 * k).max(30))
    };

    let rng = &mut StdRng::seed_from_u64(options.seed);
    let start: Mat<E> = CwiseMatDistribution {
        nrows: n,
        ncols: 1,
        dist: StandardNormal,
    }
    .rand(rng);
    let mut v = Col::from_fn(n, |i| start[(i, 0)]);
    let norm = v.norm_l2();
    v = (1.0 / norm) * &v;

    let mut basis: Vec<Col<E>> = vec![v];
    let mut alphas: Vec<E> = Vec::new();
    let mut betas: Vec<E> = Vec::new();
    // Coupling of the Krylov space to its complement; bounds the Ritz
    // residuals below.
    let mut escape_beta = 0.0;

    for j in 0..m {
        let mut w = sparse_matvec(mat, basis[j].as_ref());
        let alpha = dot(w.as_ref(), basis[j].as_ref());
        alphas.push(alpha);

        // Full reorthogonalization, twice for stability. The explicit
        // three-term recurrence is subsumed by the sweep.
        for _ in 0..2 {
            for q in basis.iter() {
                let overlap = dot(w.as_ref(), q.as_ref());
                w -= overlap * q;
            }
        }

        let beta = w.norm_l2();
        if j + 1 == m || beta < 1e-13 * alpha.abs().max(1.0) {
            // Subspace cap reached, or an invariant subspace was found (the
            // tridiagonal problem is then exact on it).
            escape_beta = beta;
            break;
        }
        betas.push(beta);
        basis.push((1.0 / beta) * &w);
    }

    let steps = alphas.len();
    if steps < k {
        return Err(EigenSolverError::NoConvergence.into());
    }

    let tridiagonal = Mat::from_fn(steps, steps, |i, j| {
        if i == j {
            alphas[i]
        } else if i + 1 == j || j + 1 == i {
            betas[i.min(j)]
        } else {
            0.0
        }
    });
    let (theta, s) = symmetric_eigen(tridiagonal.as_ref())?;

    // Ritz residual estimate |beta_m * s_{m,i}|.
    let scale = theta[steps - 1].abs().max(1.0);
    for i in 0..k {
        if (escape_beta * s[(steps - 1, i)]).abs() > options.tolerance * scale {
            return Err(EigenSolverError::NoConvergence.into());
        }
    }

    let eigenvalues = Col::from_fn(k, |i| theta[i]);
    let eigenvectors = Mat::from_fn(n, k, |row, i| {
        (0..steps).map(|j| basis[j][row] * s[(j, i)]).sum::<E>()
    });
    Ok((eigenvalues, eigenvectors))
}
