//! Lagrange-dual (SDP) global rotation estimation.

use std::collections::BTreeMap;
use std::time::Instant;

use faer::{Col, Mat, MatRef};
use log::{error, info};
use problemo::Problem;
use serde::{Deserialize, Serialize};

use crate::linalg::jacobi::project_to_rotation;
use crate::linalg::lanczos::smallest_eigenpairs;
use crate::rotation::{build_laplacian, build_sdp_covariance};
use crate::sdp::{Sdp, SdpSolver, SdpSolverOptions};
use crate::view_graph::{ViewId, ViewIndex, ViewPairs, assert_input_contract};
use crate::{E, RotationEstimator, Status, so3};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LagrangeDualRotationOptions {
    pub sdp: SdpSolverOptions,
}

/// Solves the chordal-distance semidefinite relaxation of rotation averaging
/// and retrieves orientations from the block structure of the solution.
///
/// After the solve, [`Self::alpha_max`] exposes an a-posteriori bound on the
/// worst-case rotation error of the relaxed solution, computed from the
/// algebraic connectivity of the measurement graph.
pub struct LagrangeDualRotationEstimator {
    options: LagrangeDualRotationOptions,
    view_index: Option<ViewIndex>,
    alpha_max: Option<E>,
}

impl LagrangeDualRotationEstimator {
    pub fn new(options: LagrangeDualRotationOptions) -> Self {
        Self {
            options,
            view_index: None,
            alpha_max: None,
        }
    }

    /// Reuses a prebuilt view index (hybrid driver hook).
    pub fn set_view_index(&mut self, view_index: ViewIndex) {
        self.view_index = Some(view_index);
    }

    /// Worst-case rotation error bound from the last solve, in radians.
    pub fn alpha_max(&self) -> Option<E> {
        self.alpha_max
    }

    /// Recovers one rotation per view from the factor `Y`.
    ///
    /// Each view's block is re-expressed relative to the anchor's recovered
    /// block and orthogonalized; a block with negative determinant is negated
    /// (the O(3) to SO(3) sign fixup), so both signs of the relaxation's
    /// gauge freedom land on proper rotations. The anchor keeps its input
    /// rotation; every other view composes its relative rotation onto it.
    fn retrieve_rotations(
        &self,
        y: MatRef<E>,
        index: &ViewIndex,
        global_rotations: &mut BTreeMap<ViewId, Col<E>>,
    ) -> Result<(), Problem> {
        let rank = y.nrows();
        // Indices ascend with view ids, so the anchor is the first entry.
        let (anchor_view_id, _) = index.iter().next().unwrap();
        let anchor_rotation = global_rotations[&anchor_view_id].clone();

        let mut retrieved: BTreeMap<ViewId, Col<E>> = BTreeMap::new();
        for (view_id, dense_index) in index.iter() {
            if dense_index == index.anchor_index() {
                continue;
            }

            // M = Y_i^T Y_anchor, the relative rotation of view i against the
            // anchor up to the relaxation's orthogonal gauge.
            let m = Mat::from_fn(3, 3, |a, b| {
                (0..rank)
                    .map(|r| y[(r, 3 * dense_index + a)] * y[(r, 3 * index.anchor_index() + b)])
                    .sum::<E>()
            });
            let block = project_to_rotation(m.as_ref())?;
            let relative = so3::rotation_matrix_to_angle_axis(block.as_ref());
            retrieved.insert(
                view_id,
                so3::multiply_angle_axis(relative.as_ref(), anchor_rotation.as_ref()),
            );
        }

        // Commit only after every block retrieved cleanly.
        for (view_id, rotation) in retrieved {
            global_rotations.insert(view_id, rotation);
        }
        Ok(())
    }
}

impl RotationEstimator for LagrangeDualRotationEstimator {
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
        let num_views = index.num_views();

        let (covariance, adjacency) = build_sdp_covariance(view_pairs, &index)?;

        let mut solver = Sdp::from_options(&self.options.sdp, num_views);
        solver.set_covariance(covariance);
        solver.set_adjacent_edges(adjacency.clone());
        let summary = solver
            .solve()
            .inspect_err(|_| error!("lagrange dual: sdp solve failed"))?;

        self.retrieve_rotations(solver.solution(), &index, global_rotations)
            .inspect_err(|_| error!("lagrange dual: rotation retrieval failed"))?;

        // A-posteriori bound from the graph Laplacian spectrum.
        let laplacian = build_laplacian(&adjacency, num_views)?;
        let (eigenvalues, _) =
            smallest_eigenpairs(laplacian.as_ref(), 2, &self.options.sdp.lanczos)
                .inspect_err(|_| error!("lagrange dual: laplacian eigensolver failed"))?;
        let lambda_2 = eigenvalues[1];
        let max_degree = adjacency
            .values()
            .map(|neighbors| neighbors.len())
            .max()
            .unwrap_or(1) as E;
        let alpha_max =
            2.0 * ((0.25 + lambda_2 / (2.0 * max_degree)).sqrt() - 0.5).asin();
        self.alpha_max = Some(alpha_max);

        info!(
            "lagrange dual estimation finished in {:.3}s ({} sweeps, error bound {:.4} rad)",
            start.elapsed().as_secs_f64(),
            summary.total_iterations,
            alpha_max
        );
        Ok(summary.status)
    }
}
