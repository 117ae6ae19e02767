//! Riemannian staircase: rank-restricted solves with certified optimality.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, MatRef};
use log::{info, warn};
use problemo::{Problem, ProblemResult};

use crate::linalg::lanczos::smallest_eigenpairs;
use crate::linalg::solver::LinearSolverError;
use crate::sdp::{
    RankRestrictedBcmSolver, SdpSolver, SdpSolverOptions, Summary,
};
use crate::{E, I, Status};

/// Scale of the lift perturbation along the certificate eigenvector.
const LIFT_MAGNITUDE: E = 1e-2;

/// Staircase over rank-restricted solves.
///
/// Solves at the current rank, then checks the dual certificate
/// `S = C - blockdiag(sym((C Y^T Y)_ii))`: the factor is a global optimum of
/// the relaxation when `S` has no eigenvalue below `-certificate_tolerance`.
/// Otherwise the factor is lifted one rank along the certificate's most
/// negative eigenvector and the inner solve repeats, up to `max_rank`.
pub struct RiemannianStaircaseSolver {
    inner: RankRestrictedBcmSolver,
    options: SdpSolverOptions,
}

impl RiemannianStaircaseSolver {
    pub fn new(options: &SdpSolverOptions, num_views: I) -> Self {
        let min_rank = options.min_rank.max(3);
        Self {
            inner: RankRestrictedBcmSolver::with_rank(options, num_views, min_rank),
            options: options.clone(),
        }
    }

    /// Smallest eigenpair of the dual certificate matrix.
    fn certificate(&self, y: MatRef<E>) -> Result<(E, Vec<E>), Problem> {
        let problem = self.inner.problem();
        let covariance = problem
            .covariance()
            .ok_or(LinearSolverError::Uninitialized)?;
        let dim = covariance.ncols();
        let rank = y.nrows();

        let mut triplets = Vec::new();
        {
            let col_ptr = covariance.symbolic().col_ptr();
            let row_idx = covariance.symbolic().row_idx();
            let values = covariance.val();
            for col in 0..dim {
                for k in col_ptr[col]..col_ptr[col + 1] {
                    triplets.push(Triplet::new(row_idx[k], col, values[k]));
                }
            }
        }

        for i in 0..problem.num_views {
            // G = (C Y^T Y)_ii restricted to the adjacency of view i.
            let mut g = Mat::<E>::zeros(3, 3);
            if let Some(neighbors) = problem.adjacent(i) {
                for &j in neighbors {
                    let Some(c_ij) = problem.block(i, j) else {
                        continue;
                    };
                    for a in 0..3 {
                        for b in 0..3 {
                            let mut q = 0.0;
                            for r in 0..rank {
                                q += y[(r, 3 * j + a)] * y[(r, 3 * i + b)];
                            }
                            // g += c_ij[:, a] outer q into column b
                            for s in 0..3 {
                                g[(s, b)] += c_ij[(s, a)] * q;
                            }
                        }
                    }
                }
            }
            for a in 0..3 {
                for b in 0..3 {
                    let symmetric = 0.5 * (g[(a, b)] + g[(b, a)]);
                    if symmetric != 0.0 {
                        triplets.push(Triplet::new(3 * i + a, 3 * i + b, -symmetric));
                    }
                }
            }
        }

        let certificate = SparseColMat::<I, E>::try_new_from_triplets(dim, dim, &triplets)
            .via(LinearSolverError::MatrixAssembly)?;
        let (eigenvalues, eigenvectors) =
            smallest_eigenpairs(certificate.as_ref(), 1, &self.options.lanczos)?;
        let direction = (0..dim).map(|r| eigenvectors[(r, 0)]).collect();
        Ok((eigenvalues[0], direction))
    }
}

impl SdpSolver for RiemannianStaircaseSolver {
    fn set_covariance(&mut self, covariance: SparseColMat<I, E>) {
        self.inner.set_covariance(covariance);
    }

    fn set_adjacent_edges(&mut self, adjacent_edges: BTreeMap<I, BTreeSet<I>>) {
        self.inner.set_adjacent_edges(adjacent_edges);
    }

    fn solve(&mut self) -> Result<Summary, Problem> {
        let start = Instant::now();
        let mut total_iterations = 0;

        loop {
            let inner_summary = self.inner.solve()?;
            total_iterations += inner_summary.total_iterations;

            let (lambda_min, direction) = self.certificate(self.inner.solution())?;
            if lambda_min >= -self.options.certificate_tolerance {
                info!(
                    "staircase certified at rank {} (lambda_min {lambda_min:.3e})",
                    self.inner.current_rank()
                );
                return Ok(Summary {
                    total_iterations,
                    total_time_in_seconds: start.elapsed().as_secs_f64(),
                    status: Status::Converged,
                });
            }

            if self.inner.current_rank() >= self.options.max_rank {
                warn!(
                    "staircase exhausted max_rank {} uncertified (lambda_min {lambda_min:.3e})",
                    self.options.max_rank
                );
                return Ok(Summary {
                    total_iterations,
                    total_time_in_seconds: start.elapsed().as_secs_f64(),
                    status: Status::IterationLimit,
                });
            }

            info!(
                "staircase lifting rank {} -> {} (lambda_min {lambda_min:.3e})",
                self.inner.current_rank(),
                self.inner.current_rank() + 1
            );
            self.inner.augment_rank(&direction, LIFT_MAGNITUDE)?;
        }
    }

    fn solution(&self) -> MatRef<'_, E> {
        self.inner.solution()
    }
}
