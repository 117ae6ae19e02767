//! Global rotation estimators and their shared system plumbing.
//!
//! Every estimator works over the same ingredients: the dense [`ViewIndex`]
//! with its gauge anchor, the stacked tangent-space system whose pattern
//! depends only on the graph, and on-manifold updates applied through
//! [`crate::so3`].

use std::collections::{BTreeMap, BTreeSet};

use derive_more::{Display, Error};
use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, ColRef};
use problemo::{Problem, ProblemResult};

use crate::view_graph::{ViewId, ViewIndex, ViewPairs};
use crate::{E, I, so3};

pub mod hybrid;
pub mod irls;
pub mod l1_estimator;
pub mod lagrange_dual;

pub use hybrid::{HybridInitializer, HybridRotationEstimator, HybridRotationOptions};
pub use irls::{IrlsRotationRefiner, IrlsRotationOptions};
pub use l1_estimator::{L1RotationEstimator, L1RotationOptions};
pub use lagrange_dual::{LagrangeDualRotationEstimator, LagrangeDualRotationOptions};

#[derive(Debug, Display, Error, PartialEq)]
pub enum RotationEstimatorError {
    #[display("Failed to assemble the relative rotation system")]
    SystemConstruction,

    #[display("Failed to build the worker thread pool")]
    ThreadPool,
}

/// Assembles the stacked tangent-space system `A` in `R^{3E x 3(V-1)}`.
///
/// Edge `(i, j)` contributes the block `-R_ij^T` in view i's columns and the
/// identity in view j's columns; the anchor view's columns are omitted. The
/// values depend only on the measurements, so one matrix serves both the L1
/// estimator and the IRLS refiner.
pub(crate) fn build_linear_system(
    view_pairs: &ViewPairs,
    index: &ViewIndex,
) -> Result<SparseColMat<I, E>, Problem> {
    let num_edges = view_pairs.len();
    let num_views = index.num_views();

    let mut triplets = Vec::new();
    for (edge, ((view_id1, view_id2), geometry)) in view_pairs.iter().enumerate() {
        let index1 = index.index_of(*view_id1);
        let index2 = index.index_of(*view_id2);
        let rotation = so3::angle_axis_to_rotation_matrix(
            so3::normalize_angle_axis(geometry.rotation_2.as_ref()).as_ref(),
        );

        if index1 != index.anchor_index() {
            for a in 0..3 {
                for b in 0..3 {
                    // -R_ij^T
                    triplets.push(Triplet::new(
                        3 * edge + a,
                        3 * (index1 - 1) + b,
                        -rotation[(b, a)],
                    ));
                }
            }
        }
        if index2 != index.anchor_index() {
            for a in 0..3 {
                triplets.push(Triplet::new(3 * edge + a, 3 * (index2 - 1) + a, 1.0));
            }
        }
    }

    SparseColMat::<I, E>::try_new_from_triplets(3 * num_edges, 3 * (num_views - 1), &triplets)
        .via(RotationEstimatorError::SystemConstruction)
}

/// Stacks the per-edge cycle residuals `log(R_j^T R_ij R_i)` in the edge
/// order of `view_pairs`.
pub(crate) fn compute_residuals(
    view_pairs: &ViewPairs,
    global_rotations: &BTreeMap<ViewId, Col<E>>,
) -> Col<E> {
    let mut residuals = Col::<E>::zeros(3 * view_pairs.len());
    for (edge, ((view_id1, view_id2), geometry)) in view_pairs.iter().enumerate() {
        let error = so3::relative_rotation_error(
            so3::normalize_angle_axis(geometry.rotation_2.as_ref()).as_ref(),
            global_rotations[view_id1].as_ref(),
            global_rotations[view_id2].as_ref(),
        );
        for k in 0..3 {
            residuals[3 * edge + k] = error[k];
        }
    }
    residuals
}

/// Applies a stacked tangent-space step on the manifold,
/// `r_v <- r_v * exp(delta_v)` for every non-anchor view, and returns the
/// average step size `(1/V) sum_v ||delta_v||`.
pub(crate) fn apply_tangent_update(
    index: &ViewIndex,
    step: ColRef<E>,
    global_rotations: &mut BTreeMap<ViewId, Col<E>>,
) -> E {
    let mut total_step = 0.0;
    for (view_id, dense_index) in index.iter() {
        if dense_index == index.anchor_index() {
            continue;
        }
        let delta = Col::from_fn(3, |k| step[3 * (dense_index - 1) + k]);
        total_step += delta.norm_l2();

        let rotation = global_rotations.get_mut(&view_id).unwrap();
        *rotation = so3::multiply_angle_axis(rotation.as_ref(), delta.as_ref());
    }
    total_step / index.num_views() as E
}

/// Builds the SDP covariance `-R` (the negated relative-rotation block
/// matrix: `(i, j)` block `-R_ij^T`, `(j, i)` block `-R_ij`, zero diagonal)
/// together with the dense-index adjacency table.
pub(crate) fn build_sdp_covariance(
    view_pairs: &ViewPairs,
    index: &ViewIndex,
) -> Result<(SparseColMat<I, E>, BTreeMap<I, BTreeSet<I>>), Problem> {
    let num_views = index.num_views();
    let mut triplets = Vec::new();
    let mut adjacency: BTreeMap<I, BTreeSet<I>> = BTreeMap::new();

    for ((view_id1, view_id2), geometry) in view_pairs.iter() {
        let index1 = index.index_of(*view_id1);
        let index2 = index.index_of(*view_id2);
        let rotation = so3::angle_axis_to_rotation_matrix(
            so3::normalize_angle_axis(geometry.rotation_2.as_ref()).as_ref(),
        );

        for a in 0..3 {
            for b in 0..3 {
                // (i, j) block -R_ij^T; (j, i) block -R_ij.
                triplets.push(Triplet::new(
                    3 * index1 + a,
                    3 * index2 + b,
                    -rotation[(b, a)],
                ));
                triplets.push(Triplet::new(
                    3 * index2 + a,
                    3 * index1 + b,
                    -rotation[(a, b)],
                ));
            }
        }
        adjacency.entry(index1).or_default().insert(index2);
        adjacency.entry(index2).or_default().insert(index1);
    }

    let covariance =
        SparseColMat::<I, E>::try_new_from_triplets(3 * num_views, 3 * num_views, &triplets)
            .via(RotationEstimatorError::SystemConstruction)?;
    Ok((covariance, adjacency))
}

/// Unweighted graph Laplacian `L = D - A` over dense view indices.
pub(crate) fn build_laplacian(
    adjacency: &BTreeMap<I, BTreeSet<I>>,
    num_views: I,
) -> Result<SparseColMat<I, E>, Problem> {
    let mut triplets = Vec::new();
    for (&view, neighbors) in adjacency {
        triplets.push(Triplet::new(view, view, neighbors.len() as E));
        for &neighbor in neighbors {
            triplets.push(Triplet::new(view, neighbor, -1.0));
        }
    }
    SparseColMat::<I, E>::try_new_from_triplets(num_views, num_views, &triplets)
        .via(RotationEstimatorError::SystemConstruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view_graph::TwoViewGeometry;

    fn axis_z(angle: E) -> Col<E> {
        Col::from_fn(3, |i| if i == 2 { angle } else { 0.0 })
    }

    #[test]
    fn test_linear_system_shape_and_anchor_omission() {
        let mut view_pairs = ViewPairs::new();
        view_pairs.insert((0, 1), TwoViewGeometry::new(axis_z(0.3)));
        view_pairs.insert((1, 2), TwoViewGeometry::new(axis_z(0.2)));
        let rotations: BTreeMap<ViewId, Col<E>> =
            (0..3).map(|id| (id, Col::zeros(3))).collect();
        let index = ViewIndex::from_rotations(&rotations);

        let a = build_linear_system(&view_pairs, &index).unwrap();
        assert_eq!(a.nrows(), 6);
        assert_eq!(a.ncols(), 6);

        // Edge (0, 1): anchor columns omitted, so only the identity block of
        // view 1 remains in the first three rows.
        let x = Col::from_fn(6, |i| i as E);
        let ax = &a * &x;
        for k in 0..3 {
            assert!((ax[k] - x[k]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_residuals_vanish_on_consistent_input() {
        let mut view_pairs = ViewPairs::new();
        view_pairs.insert((0, 1), TwoViewGeometry::new(axis_z(0.4)));
        let mut rotations: BTreeMap<ViewId, Col<E>> = BTreeMap::new();
        rotations.insert(0, Col::zeros(3));
        rotations.insert(1, axis_z(0.4));

        let residuals = compute_residuals(&view_pairs, &rotations);
        assert!(residuals.norm_l2() < 1e-12);
    }

    #[test]
    fn test_update_skips_anchor() {
        let rotations_init: BTreeMap<ViewId, Col<E>> =
            (0..2).map(|id| (id, axis_z(0.1))).collect();
        let index = ViewIndex::from_rotations(&rotations_init);
        let mut rotations = rotations_init.clone();

        let step = Col::from_fn(3, |_| 0.2);
        let average = apply_tangent_update(&index, step.as_ref(), &mut rotations);

        assert_eq!(rotations[&0], rotations_init[&0]);
        assert!((average - step.norm_l2() / 2.0).abs() < 1e-12);
        assert!((&rotations[&1] - &rotations_init[&1]).norm_l2() > 0.0);
    }

    #[test]
    fn test_laplacian_row_sums_are_zero() {
        let mut view_pairs = ViewPairs::new();
        view_pairs.insert((0, 1), TwoViewGeometry::new(axis_z(0.1)));
        view_pairs.insert((1, 2), TwoViewGeometry::new(axis_z(0.1)));
        view_pairs.insert((0, 2), TwoViewGeometry::new(axis_z(0.1)));
        let rotations: BTreeMap<ViewId, Col<E>> =
            (0..3).map(|id| (id, Col::zeros(3))).collect();
        let index = ViewIndex::from_rotations(&rotations);

        let (_, adjacency) = build_sdp_covariance(&view_pairs, &index).unwrap();
        let laplacian = build_laplacian(&adjacency, 3).unwrap();
        let ones = Col::from_fn(3, |_| 1.0);
        assert!((&laplacian * &ones).norm_l2() < 1e-12);
    }
}
