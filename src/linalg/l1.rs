//! ADMM solver for the L1-norm linear regression problem
//! `argmin_x || A x - b ||_1`.
//!
//! The splitting introduces `z = A x - b` and alternates a least-squares
//! x-update against the pre-factored normal equations with an elementwise
//! soft-threshold z-update (Boyd et al., Distributed Optimization via ADMM,
//! 6.1). `A` is fixed for the lifetime of the solver, so `A^T A` is
//! factorized exactly once and every iteration costs two triangular solves.

use faer::sparse::SparseColMat;
use faer::{Col, ColRef};
use log::{error, info, warn};
use problemo::{Problem, ProblemResult};
use serde::{Deserialize, Serialize};

use crate::linalg::cholesky::SparseCholesky;
use crate::linalg::products::{col_to_mat, gram, mat_to_col, shrink};
use crate::linalg::solver::{LinearSolverError, SymmetricSolver};
use crate::{E, I, Status};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1SolverOptions {
    pub max_num_iterations: I,
    /// Augmented Lagrangian penalty parameter.
    pub rho: E,
    /// Over-relaxation parameter, in [1.0, 1.8].
    pub alpha: E,
    pub absolute_tolerance: E,
    pub relative_tolerance: E,
}

impl Default for L1SolverOptions {
    fn default() -> Self {
        Self {
            max_num_iterations: 1000,
            rho: 1.0,
            alpha: 1.0,
            absolute_tolerance: 1e-4,
            relative_tolerance: 1e-2,
        }
    }
}

pub struct L1Solver {
    options: L1SolverOptions,
    a: SparseColMat<I, E>,
    solver: SparseCholesky,
}

impl L1Solver {
    /// Builds the solver for a fixed `A`, forming and factorizing `A^T A`.
    /// Fails if the normal equations cannot be factorized.
    pub fn new(options: L1SolverOptions, a: SparseColMat<I, E>) -> Result<Self, Problem> {
        let a_csr = a
            .to_row_major()
            .via(LinearSolverError::MatrixAssembly)?;
        let ata = gram(a_csr.as_ref())?;

        let mut solver = SparseCholesky::new();
        solver
            .analyze(ata.as_ref())
            .inspect_err(|_| error!("l1 admm: symbolic analysis of A^T A failed"))?;
        solver
            .factorize(ata.as_ref())
            .inspect_err(|_| error!("l1 admm: factorization of A^T A failed"))?;

        Ok(Self { options, a, solver })
    }

    /// Grows or shrinks the iteration budget between solves.
    pub fn set_max_num_iterations(&mut self, max_num_iterations: I) {
        self.options.max_num_iterations = max_num_iterations;
    }

    /// Runs ADMM from the caller's `x`. Reaching the iteration cap is
    /// reported as [`Status::IterationLimit`], not an error; `x` then holds
    /// the current iterate.
    pub fn solve(&self, b: ColRef<E>, x: &mut Col<E>) -> Result<Status, Problem> {
        let num_rows = self.a.nrows();
        let num_cols = self.a.ncols();
        debug_assert_eq!(b.nrows(), num_rows);

        let rho = self.options.rho;
        let alpha = self.options.alpha;
        let b = b.to_owned();

        let mut z = Col::<E>::zeros(num_rows);
        let mut u = Col::<E>::zeros(num_rows);

        for iteration in 0..self.options.max_num_iterations {
            // x-update: (A^T A)^{-1} A^T (b + z - u)
            let rhs = self.a.transpose() * &(&(&b + &z) - &u);
            let mut sol = col_to_mat(rhs.as_ref());
            self.solver.solve_in_place(sol.as_mut())?;
            *x = mat_to_col(sol.as_ref());

            let ax = &self.a * &*x;

            // Over-relaxed z-update with soft thresholding.
            let y_hat = alpha * &ax + (1.0 - alpha) * &(&z + &b);
            let z_old = std::mem::replace(&mut z, Col::zeros(0));
            z = shrink((&(&y_hat - &b) + &u).as_ref(), 1.0 / rho);

            // Dual ascent.
            let du = &(&y_hat - &z) - &b;
            u += du;

            let primal_residual = (&(&ax - &z) - &b).norm_l2();
            let dual_residual = rho * (self.a.transpose() * &(&z - &z_old)).norm_l2();

            let primal_tolerance = (num_rows as E).sqrt() * self.options.absolute_tolerance
                + self.options.relative_tolerance
                    * ax.norm_l2().max(z.norm_l2()).max(b.norm_l2());
            let dual_tolerance = (num_cols as E).sqrt() * self.options.absolute_tolerance
                + self.options.relative_tolerance * (rho * (self.a.transpose() * &u)).norm_l2();

            info!(
                "l1 admm iter {iteration}: primal {primal_residual:.3e} / {primal_tolerance:.3e}, \
                 dual {dual_residual:.3e} / {dual_tolerance:.3e}"
            );

            if primal_residual < primal_tolerance && dual_residual < dual_tolerance {
                return Ok(Status::Converged);
            }
        }

        warn!(
            "l1 admm reached its iteration cap ({}) without converging",
            self.options.max_num_iterations
        );
        Ok(Status::IterationLimit)
    }
}
