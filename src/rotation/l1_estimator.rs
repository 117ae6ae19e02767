//! Robust global initialization by L1 cycle-residual minimization.

use std::collections::BTreeMap;
use std::time::Instant;

use faer::Col;
use faer::sparse::SparseColMat;
use log::{error, info, warn};
use problemo::Problem;
use serde::{Deserialize, Serialize};

use crate::linalg::l1::{L1Solver, L1SolverOptions};
use crate::rotation::{apply_tangent_update, build_linear_system, compute_residuals};
use crate::view_graph::{ViewId, ViewIndex, ViewPairs, assert_input_contract};
use crate::{E, I, RotationEstimator, Status};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1RotationOptions {
    /// Outer relinearization rounds around the L1 solve.
    pub max_num_l1_iterations: I,
    /// Average step size below which the outer loop stops.
    pub l1_step_convergence_threshold: E,
    pub l1_solver_options: L1SolverOptions,
}

impl Default for L1RotationOptions {
    fn default() -> Self {
        Self {
            max_num_l1_iterations: 5,
            l1_step_convergence_threshold: 1e-3,
            l1_solver_options: L1SolverOptions::default(),
        }
    }
}

/// Minimizes the sum of L1 norms of the rotation-cycle residuals.
///
/// Each outer round stacks the current tangent-space residuals, solves the
/// fixed system `argmin_x ||A x - b||_1` by ADMM, and composes the update
/// onto the global rotations. The L1 objective tolerates residual outliers,
/// which makes the result a robust initialization for IRLS refinement.
pub struct L1RotationEstimator {
    options: L1RotationOptions,
    view_index: Option<ViewIndex>,
    sparse_matrix: Option<SparseColMat<I, E>>,
}

impl L1RotationEstimator {
    pub fn new(options: L1RotationOptions) -> Self {
        Self {
            options,
            view_index: None,
            sparse_matrix: None,
        }
    }

    /// Reuses a prebuilt view index (hybrid driver hook).
    pub fn set_view_index(&mut self, view_index: ViewIndex) {
        self.view_index = Some(view_index);
    }

    /// Reuses a prebuilt tangent-space system (hybrid driver hook).
    pub fn set_sparse_matrix(&mut self, sparse_matrix: SparseColMat<I, E>) {
        self.sparse_matrix = Some(sparse_matrix);
    }
}

impl RotationEstimator for L1RotationEstimator {
    fn estimate_rotations(
        &mut self,
        view_pairs: &ViewPairs,
        global_rotations: &mut BTreeMap<ViewId, Col<E>>,
    ) -> Result<Status, Problem> {
        assert_input_contract(view_pairs, global_rotations);
        let start = Instant::now();

        let index = match self.view_index.take() {
            Some(index) => index,
            None => ViewIndex::from_rotations(global_rotations),
        };
        assert_eq!(index.anchor_index(), 0);

        let sparse_matrix = match self.sparse_matrix.take() {
            Some(matrix) => matrix,
            None => build_linear_system(view_pairs, &index)?,
        };

        let mut solver = L1Solver::new(self.options.l1_solver_options.clone(), sparse_matrix)?;
        let mut solver_iterations = self.options.l1_solver_options.max_num_iterations;

        let mut step = Col::<E>::zeros(3 * (index.num_views() - 1));
        let mut status = Status::IterationLimit;

        for iteration in 0..self.options.max_num_l1_iterations {
            let residuals = compute_residuals(view_pairs, global_rotations);
            solver
                .solve(residuals.as_ref(), &mut step)
                .inspect_err(|_| error!("l1 rotation estimation: admm solve failed"))?;

            let average_step = apply_tangent_update(&index, step.as_ref(), global_rotations);
            info!("l1 rotation iter {iteration}: average step {average_step:.3e}");

            if average_step <= self.options.l1_step_convergence_threshold {
                status = Status::Converged;
                break;
            }

            // Later rounds solve near the converged point and warrant a
            // larger ADMM budget.
            solver_iterations *= 2;
            solver.set_max_num_iterations(solver_iterations);
        }

        if status != Status::Converged {
            warn!(
                "l1 rotation estimation stopped at its iteration cap ({})",
                self.options.max_num_l1_iterations
            );
        }
        info!(
            "l1 rotation estimation finished in {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(status)
    }
}
