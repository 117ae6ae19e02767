//! Block coordinate minimization over a rank-restricted factor.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use faer::sparse::SparseColMat;
use faer::{Mat, MatRef};
use log::info;
use problemo::Problem;

use crate::linalg::jacobi::stiefel_polar;
use crate::sdp::{BcmProblem, SdpSolver, SdpSolverOptions, Summary};
use crate::{E, I};

/// Block coordinate minimization restricted to rank-`d` factors, `d < 3V`.
///
/// The sweep kernel matches [`crate::sdp::RbrBcmSolver`]; the thin factor
/// trades solution quality for per-sweep cost. Also serves as the inner
/// solver of the Riemannian staircase, which grows the rank between solves.
pub struct RankRestrictedBcmSolver {
    problem: BcmProblem,
    max_num_iterations: I,
    tolerance: E,
    rank: I,
    y: Option<Mat<E>>,
}

impl RankRestrictedBcmSolver {
    pub fn new(options: &SdpSolverOptions, num_views: I) -> Self {
        Self {
            problem: BcmProblem::new(num_views),
            max_num_iterations: options.max_num_iterations,
            tolerance: options.tolerance,
            rank: options.rank.max(3).min(3 * num_views),
            y: None,
        }
    }

    pub(crate) fn with_rank(options: &SdpSolverOptions, num_views: I, rank: I) -> Self {
        Self {
            rank: rank.max(3).min(3 * num_views),
            ..Self::new(options, num_views)
        }
    }

    pub(crate) fn current_rank(&self) -> I {
        self.rank
    }

    pub(crate) fn problem(&self) -> &BcmProblem {
        &self.problem
    }

    /// Appends one row to the factor, perturbed along `direction` (one entry
    /// per factor column), then re-projects every block onto the Stiefel
    /// manifold. Block updates from a plain zero-row lift stay inside the old
    /// row span, so the perturbation is what lets the next solve leave the
    /// lower-rank critical point.
    pub(crate) fn augment_rank(
        &mut self,
        direction: &[E],
        magnitude: E,
    ) -> Result<(), Problem> {
        let Some(y) = self.y.take() else {
            self.rank += 1;
            return Ok(());
        };
        let rank = self.rank;
        let lifted = Mat::from_fn(rank + 1, y.ncols(), |r, c| {
            if r < rank {
                y[(r, c)]
            } else {
                magnitude * direction[c]
            }
        });

        let mut projected = Mat::zeros(rank + 1, y.ncols());
        for i in 0..self.problem.num_views {
            let block = Mat::from_fn(rank + 1, 3, |r, c| lifted[(r, 3 * i + c)]);
            let q = stiefel_polar(block.as_ref())?;
            for c in 0..3 {
                for r in 0..rank + 1 {
                    projected[(r, 3 * i + c)] = q[(r, c)];
                }
            }
        }

        self.rank = rank + 1;
        self.y = Some(projected);
        Ok(())
    }
}

impl SdpSolver for RankRestrictedBcmSolver {
    fn set_covariance(&mut self, covariance: SparseColMat<I, E>) {
        self.problem.set_covariance(covariance);
    }

    fn set_adjacent_edges(&mut self, adjacent_edges: BTreeMap<I, BTreeSet<I>>) {
        self.problem.set_adjacent_edges(adjacent_edges);
    }

    fn solve(&mut self) -> Result<Summary, Problem> {
        let start = Instant::now();
        let mut y = match self.y.take() {
            Some(y) => y,
            None => self.problem.initial_factor(self.rank),
        };
        let (total_iterations, status) =
            self.problem
                .solve_bcm(&mut y, self.max_num_iterations, self.tolerance)?;
        self.y = Some(y);

        let summary = Summary {
            total_iterations,
            total_time_in_seconds: start.elapsed().as_secs_f64(),
            status,
        };
        info!(
            "rank-{} bcm finished after {} sweeps ({:?}) in {:.3}s",
            self.rank, summary.total_iterations, summary.status, summary.total_time_in_seconds
        );
        Ok(summary)
    }

    fn solution(&self) -> MatRef<'_, E> {
        self.y
            .as_ref()
            .expect("solve must run before solution retrieval")
            .as_ref()
    }
}
