//! Full-dimension row-by-row block coordinate minimization.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use faer::sparse::SparseColMat;
use faer::{Mat, MatRef};
use log::info;
use problemo::Problem;

use crate::sdp::{BcmProblem, SdpSolver, SdpSolverOptions, Summary};
use crate::{E, I};

/// Row-by-row block coordinate minimization over the full `3V x 3V` factor.
///
/// Each sweep solves one Procrustes sub-problem per view against the
/// neighbors' current columns. The factor starts at the identity, so the
/// iterates remain feasible (identity diagonal Gram blocks) throughout.
pub struct RbrBcmSolver {
    problem: BcmProblem,
    max_num_iterations: I,
    tolerance: E,
    y: Mat<E>,
}

impl RbrBcmSolver {
    pub fn new(options: &SdpSolverOptions, num_views: I) -> Self {
        let dim = 3 * num_views;
        Self {
            problem: BcmProblem::new(num_views),
            max_num_iterations: options.max_num_iterations,
            tolerance: options.tolerance,
            y: Mat::from_fn(dim, dim, |r, c| if r == c { 1.0 } else { 0.0 }),
        }
    }
}

impl SdpSolver for RbrBcmSolver {
    fn set_covariance(&mut self, covariance: SparseColMat<I, E>) {
        self.problem.set_covariance(covariance);
    }

    fn set_adjacent_edges(&mut self, adjacent_edges: BTreeMap<I, BTreeSet<I>>) {
        self.problem.set_adjacent_edges(adjacent_edges);
    }

    fn solve(&mut self) -> Result<Summary, Problem> {
        let start = Instant::now();
        let (total_iterations, status) =
            self.problem
                .solve_bcm(&mut self.y, self.max_num_iterations, self.tolerance)?;
        let summary = Summary {
            total_iterations,
            total_time_in_seconds: start.elapsed().as_secs_f64(),
            status,
        };
        info!(
            "rbr bcm finished after {} sweeps ({:?}) in {:.3}s",
            summary.total_iterations, summary.status, summary.total_time_in_seconds
        );
        Ok(summary)
    }

    fn solution(&self) -> MatRef<'_, E> {
        self.y.as_ref()
    }
}
