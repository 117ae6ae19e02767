//! Iteratively reweighted least-squares refinement on the rotation manifold.

use std::collections::BTreeMap;
use std::time::Instant;

use faer::Col;
use faer::sparse::SparseColMat;
use log::{error, info, warn};
use problemo::{Problem, ProblemResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::linalg::cholesky::SparseCholesky;
use crate::linalg::products::{col_to_mat, cwise_multiply, mat_to_col, weighted_gram};
use crate::linalg::solver::SymmetricSolver;
use crate::rotation::{
    RotationEstimatorError, apply_tangent_update, build_linear_system, compute_residuals,
};
use crate::view_graph::{ViewId, ViewIndex, ViewPairs, assert_input_contract};
use crate::{E, I, RotationEstimator, Status};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrlsRotationOptions {
    pub max_num_irls_iterations: I,
    /// Loss scale in radians.
    pub irls_loss_parameter_sigma: E,
    /// Average step size below which refinement stops.
    pub irls_step_convergence_threshold: E,
    /// Worker threads for the per-edge weight update.
    pub num_threads: I,
}

impl Default for IrlsRotationOptions {
    fn default() -> Self {
        Self {
            max_num_irls_iterations: 100,
            irls_loss_parameter_sigma: 5.0 * std::f64::consts::PI / 180.0,
            irls_step_convergence_threshold: 1e-3,
            num_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// Local refiner polishing an initialization by reweighted least squares.
///
/// Per iteration the tangent-space residuals are reweighted by the smoothed
/// soft-L1/2 loss `w_e = sigma / (||e||^2 + sigma^2)^2` and the normal
/// equations `A^T W A` are re-factorized on the pattern analyzed up front.
/// The weight formula is kept verbatim from the reference estimator; it is
/// not the derivative of any standard robust loss.
pub struct IrlsRotationRefiner {
    options: IrlsRotationOptions,
    view_index: Option<ViewIndex>,
    sparse_matrix: Option<SparseColMat<I, E>>,
}

impl IrlsRotationRefiner {
    pub fn new(options: IrlsRotationOptions) -> Self {
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

    /// Per-edge robust weights broadcast to each edge's three rows. Every
    /// edge writes a disjoint 3-slice, so the map needs no synchronization.
    fn compute_weights(&self, residuals: &Col<E>, weights: &mut [E], pool: &rayon::ThreadPool) {
        let sigma = self.options.irls_loss_parameter_sigma;
        pool.install(|| {
            weights.par_chunks_mut(3).enumerate().for_each(|(edge, slice)| {
                let squared_norm = (0..3)
                    .map(|k| residuals[3 * edge + k] * residuals[3 * edge + k])
                    .sum::<E>();
                let denominator = squared_norm + sigma * sigma;
                let weight = sigma / (denominator * denominator);
                slice.fill(weight);
            });
        });
    }
}

impl RotationEstimator for IrlsRotationRefiner {
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
        let sparse_matrix_csr = sparse_matrix
            .to_row_major()
            .via(RotationEstimatorError::SystemConstruction)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.num_threads.max(1))
            .build()
            .via(RotationEstimatorError::ThreadPool)?;

        let mut solver = SparseCholesky::new();
        let mut analyzed = false;
        let mut weights = vec![0.0; sparse_matrix.nrows()];
        let mut status = Status::IterationLimit;

        for iteration in 0..self.options.max_num_irls_iterations {
            let residuals = compute_residuals(view_pairs, global_rotations);
            self.compute_weights(&residuals, &mut weights, &pool);

            let atwa = weighted_gram(sparse_matrix_csr.as_ref(), &weights)?;
            if !analyzed {
                solver
                    .analyze(atwa.as_ref())
                    .inspect_err(|_| error!("irls: symbolic analysis of A^T W A failed"))?;
                analyzed = true;
            }
            solver
                .factorize(atwa.as_ref())
                .inspect_err(|_| error!("irls: factorization of A^T W A failed"))?;

            let weight_col = Col::from_fn(weights.len(), |i| weights[i]);
            let rhs =
                sparse_matrix.transpose() * &cwise_multiply(weight_col.as_ref(), residuals.as_ref());
            let mut sol = col_to_mat(rhs.as_ref());
            solver.solve_in_place(sol.as_mut())?;
            let step = mat_to_col(sol.as_ref());

            let average_step = apply_tangent_update(&index, step.as_ref(), global_rotations);
            info!("irls iter {iteration}: average step {average_step:.3e}");

            if average_step < self.options.irls_step_convergence_threshold {
                status = Status::Converged;
                break;
            }
        }

        if status != Status::Converged {
            warn!(
                "irls refinement stopped at its iteration cap ({})",
                self.options.max_num_irls_iterations
            );
        }
        info!(
            "irls refinement finished in {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(status)
    }
}
