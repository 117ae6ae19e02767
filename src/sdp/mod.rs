//! Semidefinite relaxation backends for rotation averaging.
//!
//! The relaxed problem is `min tr(C Y^T Y)` over factors `Y` in `R^{d x 3V}`
//! whose 3x3 diagonal Gram blocks equal the identity, with `C` the negated
//! relative-rotation block matrix. Three interchangeable backends share the
//! block-coordinate machinery in [`BcmProblem`]; construction dispatches on
//! [`SdpSolverType`].

use std::collections::{BTreeMap, BTreeSet};

use enum_dispatch::enum_dispatch;
use faer::sparse::SparseColMat;
use faer::{Mat, MatRef};
use log::debug;
use problemo::Problem;
use serde::{Deserialize, Serialize};

use crate::linalg::jacobi::stiefel_polar;
use crate::linalg::lanczos::LanczosOptions;
use crate::{E, I, Status};

pub mod bcm;
pub mod rank_restricted;
pub mod staircase;

pub use bcm::RbrBcmSolver;
pub use rank_restricted::RankRestrictedBcmSolver;
pub use staircase::RiemannianStaircaseSolver;

/// Which SDP backend the Lagrange-dual estimator constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdpSolverType {
    /// Full-dimension row-by-row block coordinate minimization.
    RbrBcm,
    /// Block coordinate minimization over a rank-restricted factor.
    RankDeficientBcm,
    /// Rank-restricted solves with certified optimality, escalating the rank
    /// until the dual certificate holds.
    RiemannianStaircase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpSolverOptions {
    pub solver_type: SdpSolverType,
    /// Cap on block-coordinate sweeps per solve.
    pub max_num_iterations: I,
    /// Relative objective-change tolerance ending a solve.
    pub tolerance: E,
    /// Factor rank for [`SdpSolverType::RankDeficientBcm`].
    pub rank: I,
    /// Staircase rank range.
    pub min_rank: I,
    pub max_rank: I,
    /// Certificate eigenvalue slack: the solution is accepted as optimal when
    /// the smallest eigenvalue of the dual certificate is above the negated
    /// slack.
    pub certificate_tolerance: E,
    pub lanczos: LanczosOptions,
}

impl Default for SdpSolverOptions {
    fn default() -> Self {
        Self {
            solver_type: SdpSolverType::RbrBcm,
            max_num_iterations: 500,
            tolerance: 1e-10,
            rank: 5,
            min_rank: 3,
            max_rank: 10,
            certificate_tolerance: 1e-6,
            lanczos: LanczosOptions::default(),
        }
    }
}

/// Outcome of one SDP solve.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub total_iterations: I,
    pub total_time_in_seconds: E,
    pub status: Status,
}

/// Capability set shared by the SDP backends.
#[enum_dispatch]
pub trait SdpSolver {
    /// Installs the objective block matrix (the negated relative-rotation
    /// matrix `-R`).
    fn set_covariance(&mut self, covariance: SparseColMat<I, E>);

    /// Installs the view adjacency table.
    fn set_adjacent_edges(&mut self, adjacent_edges: BTreeMap<I, BTreeSet<I>>);

    /// Runs the backend to convergence or its iteration cap.
    fn solve(&mut self) -> Result<Summary, Problem>;

    /// The current factor `Y` in `R^{d x 3V}`.
    fn solution(&self) -> MatRef<'_, E>;
}

/// The configured SDP backend, selected by enum dispatch from options.
#[enum_dispatch(SdpSolver)]
pub enum Sdp {
    RbrBcm(RbrBcmSolver),
    RankDeficientBcm(RankRestrictedBcmSolver),
    RiemannianStaircase(RiemannianStaircaseSolver),
}

impl Sdp {
    pub fn from_options(options: &SdpSolverOptions, num_views: I) -> Self {
        match options.solver_type {
            SdpSolverType::RbrBcm => Sdp::RbrBcm(RbrBcmSolver::new(options, num_views)),
            SdpSolverType::RankDeficientBcm => {
                Sdp::RankDeficientBcm(RankRestrictedBcmSolver::new(options, num_views))
            }
            SdpSolverType::RiemannianStaircase => {
                Sdp::RiemannianStaircase(RiemannianStaircaseSolver::new(options, num_views))
            }
        }
    }
}

/// Shared state and sweep kernel for the block-coordinate backends.
pub(crate) struct BcmProblem {
    pub(crate) num_views: I,
    covariance: Option<SparseColMat<I, E>>,
    /// Off-diagonal 3x3 blocks of the covariance, keyed by block row/column.
    blocks: BTreeMap<(I, I), Mat<E>>,
    adjacency: BTreeMap<I, BTreeSet<I>>,
}

impl BcmProblem {
    pub(crate) fn new(num_views: I) -> Self {
        Self {
            num_views,
            covariance: None,
            blocks: BTreeMap::new(),
            adjacency: BTreeMap::new(),
        }
    }

    pub(crate) fn set_covariance(&mut self, covariance: SparseColMat<I, E>) {
        self.blocks.clear();
        {
            let col_ptr = covariance.symbolic().col_ptr();
            let row_idx = covariance.symbolic().row_idx();
            let values = covariance.val();
            for col in 0..covariance.ncols() {
                for k in col_ptr[col]..col_ptr[col + 1] {
                    let row = row_idx[k];
                    let block = self
                        .blocks
                        .entry((row / 3, col / 3))
                        .or_insert_with(|| Mat::zeros(3, 3));
                    block[(row % 3, col % 3)] = values[k];
                }
            }
        }
        self.covariance = Some(covariance);
    }

    pub(crate) fn set_adjacent_edges(&mut self, adjacent_edges: BTreeMap<I, BTreeSet<I>>) {
        self.adjacency = adjacent_edges;
    }

    /// One block-coordinate sweep over all views: view i's columns are
    /// replaced by the Procrustes minimizer `-W (W^T W)^{-1/2}` against its
    /// current neighbors, `W = sum_j Y_j C_ji`.
    pub(crate) fn sweep(&self, y: &mut Mat<E>) -> Result<(), Problem> {
        let rank = y.nrows();
        for i in 0..self.num_views {
            let Some(neighbors) = self.adjacency.get(&i) else {
                continue;
            };
            let mut w = Mat::<E>::zeros(rank, 3);
            for &j in neighbors {
                let Some(c_ji) = self.blocks.get(&(j, i)) else {
                    continue;
                };
                for col in 0..3 {
                    for k in 0..3 {
                        let coefficient = c_ji[(k, col)];
                        if coefficient == 0.0 {
                            continue;
                        }
                        for r in 0..rank {
                            w[(r, col)] += y[(r, 3 * j + k)] * coefficient;
                        }
                    }
                }
            }

            let q = stiefel_polar(w.as_ref())?;
            for col in 0..3 {
                for r in 0..rank {
                    y[(r, 3 * i + col)] = -q[(r, col)];
                }
            }
        }
        Ok(())
    }

    /// Objective `tr(C Y^T Y)`.
    pub(crate) fn objective(&self, y: &Mat<E>) -> E {
        let Some(covariance) = self.covariance.as_ref() else {
            return 0.0;
        };
        let rank = y.nrows();
        let col_ptr = covariance.symbolic().col_ptr();
        let row_idx = covariance.symbolic().row_idx();
        let values = covariance.val();

        let mut objective = 0.0;
        for col in 0..covariance.ncols() {
            for k in col_ptr[col]..col_ptr[col + 1] {
                let row = row_idx[k];
                let mut q = 0.0;
                for r in 0..rank {
                    q += y[(r, col)] * y[(r, row)];
                }
                objective += values[k] * q;
            }
        }
        objective
    }

    /// Runs sweeps until the relative objective change drops below
    /// `tolerance` or `max_num_iterations` is hit.
    pub(crate) fn solve_bcm(
        &self,
        y: &mut Mat<E>,
        max_num_iterations: I,
        tolerance: E,
    ) -> Result<(I, Status), Problem> {
        let mut objective = self.objective(y);
        for iteration in 0..max_num_iterations {
            self.sweep(y)?;
            let updated = self.objective(y);
            let change = (objective - updated).abs() / updated.abs().max(1.0);
            debug!("sdp bcm sweep {iteration}: objective {updated:.9e}, change {change:.3e}");
            objective = updated;
            if change < tolerance {
                return Ok((iteration + 1, Status::Converged));
            }
        }
        Ok((max_num_iterations, Status::IterationLimit))
    }

    /// Factor with identity upper 3x3 blocks, the canonical feasible start.
    pub(crate) fn initial_factor(&self, rank: I) -> Mat<E> {
        Mat::from_fn(rank, 3 * self.num_views, |r, c| {
            if r == c % 3 { 1.0 } else { 0.0 }
        })
    }

    pub(crate) fn covariance(&self) -> Option<&SparseColMat<I, E>> {
        self.covariance.as_ref()
    }

    pub(crate) fn block(&self, row: I, col: I) -> Option<&Mat<E>> {
        self.blocks.get(&(row, col))
    }

    pub(crate) fn adjacent(&self, view: I) -> Option<&BTreeSet<I>> {
        self.adjacency.get(&view)
    }
}
