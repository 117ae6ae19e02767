//! End-to-end estimator scenarios over synthetic graphs.

use std::collections::BTreeMap;

use faer::Col;
use rstest::rstest;
use rstest_reuse::{apply, template};

use crate::linalg::l1::L1SolverOptions;
use crate::rotation::{
    HybridInitializer, HybridRotationEstimator, HybridRotationOptions, IrlsRotationOptions,
    IrlsRotationRefiner, L1RotationEstimator, L1RotationOptions, LagrangeDualRotationEstimator,
    LagrangeDualRotationOptions, compute_residuals,
};
use crate::sdp::{SdpSolverOptions, SdpSolverType};
use crate::tests::fixtures::{
    aligned_errors, angular_error, axis_rotation, consistent_pairs, degrees, identity_rotations,
    init_logger, noisy_complete_graph, random_chain,
};
use crate::view_graph::{TwoViewGeometry, ViewId, ViewPairs};
use crate::{E, RotationEstimator, so3};

#[derive(Clone, Copy, Debug)]
enum EstimatorKind {
    L1,
    Irls,
    Sdp(SdpSolverType),
    Hybrid(HybridInitializer),
}

fn test_l1_options() -> L1RotationOptions {
    L1RotationOptions {
        max_num_l1_iterations: 10,
        l1_step_convergence_threshold: 1e-9,
        l1_solver_options: L1SolverOptions {
            max_num_iterations: 500,
            absolute_tolerance: 1e-8,
            relative_tolerance: 1e-6,
            ..Default::default()
        },
    }
}

fn test_irls_options() -> IrlsRotationOptions {
    IrlsRotationOptions {
        max_num_irls_iterations: 400,
        irls_step_convergence_threshold: 1e-13,
        num_threads: 2,
        ..Default::default()
    }
}

fn test_sdp_options(solver_type: SdpSolverType) -> SdpSolverOptions {
    SdpSolverOptions {
        solver_type,
        max_num_iterations: 10_000,
        tolerance: 1e-15,
        ..Default::default()
    }
}

fn make_estimator(kind: EstimatorKind) -> Box<dyn RotationEstimator> {
    match kind {
        EstimatorKind::L1 => Box::new(L1RotationEstimator::new(test_l1_options())),
        EstimatorKind::Irls => Box::new(IrlsRotationRefiner::new(test_irls_options())),
        EstimatorKind::Sdp(solver_type) => {
            Box::new(LagrangeDualRotationEstimator::new(LagrangeDualRotationOptions {
                sdp: test_sdp_options(solver_type),
            }))
        }
        EstimatorKind::Hybrid(initializer) => {
            Box::new(HybridRotationEstimator::new(HybridRotationOptions {
                initializer,
                lagrange_dual: LagrangeDualRotationOptions {
                    sdp: test_sdp_options(SdpSolverType::RbrBcm),
                },
                l1: test_l1_options(),
                irls: test_irls_options(),
            }))
        }
    }
}

#[template]
#[rstest]
fn all_estimators(
    #[values(
        EstimatorKind::L1,
        EstimatorKind::Irls,
        EstimatorKind::Sdp(SdpSolverType::RbrBcm),
        EstimatorKind::Sdp(SdpSolverType::RankDeficientBcm),
        EstimatorKind::Sdp(SdpSolverType::RiemannianStaircase),
        EstimatorKind::Hybrid(HybridInitializer::LagrangeDual),
        EstimatorKind::Hybrid(HybridInitializer::L1)
    )]
    kind: EstimatorKind,
) {
}

#[apply(all_estimators)]
fn test_cycle_of_three(kind: EstimatorKind) {
    init_logger();
    let mut view_pairs = ViewPairs::new();
    view_pairs.insert((0, 1), TwoViewGeometry::new(axis_rotation(0, degrees(30.0))));
    view_pairs.insert((1, 2), TwoViewGeometry::new(axis_rotation(0, degrees(45.0))));
    view_pairs.insert((0, 2), TwoViewGeometry::new(axis_rotation(0, degrees(75.0))));

    let mut rotations = identity_rotations(&[0, 1, 2]);
    make_estimator(kind)
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    let expected = [0.0, 30.0, 75.0];
    for (view_id, expected_degrees) in expected.iter().enumerate() {
        let error = angular_error(
            &rotations[&(view_id as ViewId)],
            &axis_rotation(0, degrees(*expected_degrees)),
        );
        assert!(error < 1e-6, "{kind:?} view {view_id}: error {error:.3e}");
    }
}

#[apply(all_estimators)]
fn test_two_view_minimal_graph(kind: EstimatorKind) {
    init_logger();
    let measurement = Col::from_fn(3, |i| [0.3, -0.2, 0.5][i]);
    let anchor = Col::from_fn(3, |i| [0.1, 0.4, -0.3][i]);

    let mut view_pairs = ViewPairs::new();
    view_pairs.insert((0, 1), TwoViewGeometry::new(measurement.clone()));
    let mut rotations = identity_rotations(&[0, 1]);
    rotations.insert(0, anchor.clone());

    make_estimator(kind)
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    // The leaf is the initial anchor guess composed with the measurement.
    let expected = so3::multiply_angle_axis(measurement.as_ref(), anchor.as_ref());
    let error = angular_error(&rotations[&1], &expected);
    assert!(error < 1e-6, "{kind:?}: error {error:.3e}");
}

#[apply(all_estimators)]
fn test_star_graph(kind: EstimatorKind) {
    init_logger();
    let mut ground_truth: BTreeMap<ViewId, Col<E>> = BTreeMap::new();
    ground_truth.insert(0, Col::zeros(3));
    for leaf in 1..6 {
        ground_truth.insert(
            leaf,
            axis_rotation(leaf as usize % 3, degrees(15.0 + 10.0 * leaf as E)),
        );
    }
    let edges: Vec<_> = (1..6).map(|leaf| (0, leaf)).collect();
    let view_pairs = consistent_pairs(&ground_truth, &edges);

    let mut rotations = identity_rotations(&[0, 1, 2, 3, 4, 5]);
    make_estimator(kind)
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    // Every leaf is pinned by its single edge.
    for (view_id, expected) in &ground_truth {
        let error = angular_error(&rotations[view_id], expected);
        assert!(error < 1e-6, "{kind:?} view {view_id}: error {error:.3e}");
    }
}

#[apply(all_estimators)]
fn test_chain_of_ten(kind: EstimatorKind) {
    init_logger();
    let (view_pairs, ground_truth) = random_chain(10, 42);
    let mut rotations = identity_rotations(&(0..10).collect::<Vec<_>>());

    make_estimator(kind)
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    for (view_id, expected) in &ground_truth {
        let error = angular_error(&rotations[view_id], expected);
        assert!(error < 1e-6, "{kind:?} view {view_id}: error {error:.3e}");
    }
}

#[apply(all_estimators)]
fn test_identity_idempotence(kind: EstimatorKind) {
    init_logger();
    let mut view_pairs = ViewPairs::new();
    for edge in [(0, 1), (1, 2), (0, 2)] {
        view_pairs.insert(edge, TwoViewGeometry::new(Col::zeros(3)));
    }
    let mut rotations = identity_rotations(&[0, 1, 2]);

    make_estimator(kind)
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    for (view_id, rotation) in &rotations {
        assert!(
            rotation.norm_l2() < 1e-12,
            "{kind:?} view {view_id} drifted from the identity"
        );
    }
}

#[apply(all_estimators)]
fn test_gauge_view_is_bit_identical(kind: EstimatorKind) {
    init_logger();
    let (view_pairs, _) = noisy_complete_graph(5, degrees(2.0), 17);
    let anchor = Col::from_fn(3, |i| [0.3, 0.1, -0.2][i]);

    let mut rotations = identity_rotations(&[0, 1, 2, 3, 4]);
    rotations.insert(0, anchor.clone());
    let anchor_bits: Vec<u64> = (0..3).map(|i| anchor[i].to_bits()).collect();

    make_estimator(kind)
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    let after: Vec<u64> = (0..3).map(|i| rotations[&0][i].to_bits()).collect();
    assert_eq!(anchor_bits, after, "{kind:?} modified the gauge view");
}

#[apply(all_estimators)]
fn test_outputs_are_normalized_rotations(kind: EstimatorKind) {
    init_logger();
    let (view_pairs, _) = noisy_complete_graph(5, degrees(2.0), 23);
    let mut rotations = identity_rotations(&[0, 1, 2, 3, 4]);

    make_estimator(kind)
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    for (view_id, rotation) in &rotations {
        assert!(
            rotation.norm_l2() <= std::f64::consts::PI + 1e-9,
            "{kind:?} view {view_id} left the normalized range"
        );
    }
}

#[test]
fn test_inconsistent_triangle_l1_cost() {
    init_logger();
    let mut view_pairs = ViewPairs::new();
    view_pairs.insert((0, 1), TwoViewGeometry::new(axis_rotation(0, degrees(30.0))));
    view_pairs.insert((1, 2), TwoViewGeometry::new(axis_rotation(0, degrees(45.0))));
    view_pairs.insert((0, 2), TwoViewGeometry::new(axis_rotation(0, degrees(70.0))));

    let mut rotations = identity_rotations(&[0, 1, 2]);
    L1RotationEstimator::new(test_l1_options())
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    // The 5 degree cycle deficit cannot be removed; the L1 optimum spends
    // exactly that much across the triangle.
    let residuals = compute_residuals(&view_pairs, &rotations);
    let l1_cost: E = (0..residuals.nrows()).map(|i| residuals[i].abs()).sum();
    assert!(l1_cost >= degrees(5.0) - 1e-6, "cost {l1_cost:.5}");
    assert!(l1_cost <= degrees(5.5), "cost {l1_cost:.5}");
}

#[test]
fn test_inconsistent_triangle_irls_reduces_residual() {
    init_logger();
    let mut view_pairs = ViewPairs::new();
    view_pairs.insert((0, 1), TwoViewGeometry::new(axis_rotation(0, degrees(30.0))));
    view_pairs.insert((1, 2), TwoViewGeometry::new(axis_rotation(0, degrees(45.0))));
    view_pairs.insert((0, 2), TwoViewGeometry::new(axis_rotation(0, degrees(70.0))));

    let mut rotations = identity_rotations(&[0, 1, 2]);
    let initial_residual = compute_residuals(&view_pairs, &rotations).norm_l2();

    let mut estimator = HybridRotationEstimator::new(HybridRotationOptions {
        initializer: HybridInitializer::L1,
        l1: test_l1_options(),
        irls: test_irls_options(),
        ..Default::default()
    });
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    let final_residual = compute_residuals(&view_pairs, &rotations).norm_l2();
    assert!(final_residual < initial_residual);
    // All that remains is the cycle deficit.
    assert!(final_residual < degrees(6.0));
}

#[test]
fn test_noisy_complete_graph_sdp_irls() {
    init_logger();
    let mut errors = Vec::new();
    for seed in [11, 12, 13] {
        let (view_pairs, ground_truth) = noisy_complete_graph(5, degrees(2.0), seed);

        // Reference in the anchor gauge: view 0 pinned to the identity.
        let reference: BTreeMap<ViewId, Col<E>> = ground_truth
            .iter()
            .map(|(&view_id, rotation)| {
                (
                    view_id,
                    so3::multiply_angle_axis(rotation.as_ref(), (-&ground_truth[&0]).as_ref()),
                )
            })
            .collect();

        let mut rotations = identity_rotations(&[0, 1, 2, 3, 4]);
        HybridRotationEstimator::new(HybridRotationOptions {
            initializer: HybridInitializer::LagrangeDual,
            lagrange_dual: LagrangeDualRotationOptions {
                sdp: test_sdp_options(SdpSolverType::RbrBcm),
            },
            irls: test_irls_options(),
            ..Default::default()
        })
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

        errors.extend(aligned_errors(&rotations, &reference));
    }

    let mean_error = errors.iter().sum::<E>() / errors.len() as E;
    assert!(
        mean_error < degrees(1.0),
        "mean error {:.3} degrees",
        mean_error * 180.0 / std::f64::consts::PI
    );
}

#[test]
fn test_gauge_equivariance_sdp() {
    init_logger();
    let (view_pairs, _) = noisy_complete_graph(5, degrees(2.0), 11);
    let gauge = axis_rotation(1, degrees(60.0));

    let mut baseline = identity_rotations(&[0, 1, 2, 3, 4]);
    LagrangeDualRotationEstimator::new(LagrangeDualRotationOptions {
        sdp: test_sdp_options(SdpSolverType::RbrBcm),
    })
    .estimate_rotations(&view_pairs, &mut baseline)
    .unwrap();

    // Pre-compose every initial rotation with the gauge.
    let mut shifted: BTreeMap<ViewId, Col<E>> = identity_rotations(&[0, 1, 2, 3, 4])
        .iter()
        .map(|(&view_id, rotation)| {
            (
                view_id,
                so3::multiply_angle_axis(rotation.as_ref(), gauge.as_ref()),
            )
        })
        .collect();
    LagrangeDualRotationEstimator::new(LagrangeDualRotationOptions {
        sdp: test_sdp_options(SdpSolverType::RbrBcm),
    })
    .estimate_rotations(&view_pairs, &mut shifted)
    .unwrap();

    for (view_id, rotation) in &baseline {
        let expected = so3::multiply_angle_axis(rotation.as_ref(), gauge.as_ref());
        let error = angular_error(&shifted[view_id], &expected);
        assert!(error < 1e-10, "view {view_id}: error {error:.3e}");
    }
}

#[test]
fn test_gauge_equivariance_hybrid() {
    init_logger();
    let (view_pairs, _) = noisy_complete_graph(5, degrees(2.0), 11);
    let gauge = axis_rotation(1, degrees(60.0));

    let options = HybridRotationOptions {
        initializer: HybridInitializer::LagrangeDual,
        lagrange_dual: LagrangeDualRotationOptions {
            sdp: test_sdp_options(SdpSolverType::RbrBcm),
        },
        irls: test_irls_options(),
        ..Default::default()
    };

    let mut baseline = identity_rotations(&[0, 1, 2, 3, 4]);
    HybridRotationEstimator::new(options.clone())
        .estimate_rotations(&view_pairs, &mut baseline)
        .unwrap();

    let mut shifted: BTreeMap<ViewId, Col<E>> = (0..5)
        .map(|view_id| (view_id, gauge.clone()))
        .collect();
    HybridRotationEstimator::new(options)
        .estimate_rotations(&view_pairs, &mut shifted)
        .unwrap();

    for (view_id, rotation) in &baseline {
        let expected = so3::multiply_angle_axis(rotation.as_ref(), gauge.as_ref());
        let error = angular_error(&shifted[view_id], &expected);
        assert!(error < 1e-8, "view {view_id}: error {error:.3e}");
    }
}

#[test]
fn test_determinism() {
    init_logger();
    let (view_pairs, _) = noisy_complete_graph(5, degrees(2.0), 5);
    let options = HybridRotationOptions {
        initializer: HybridInitializer::LagrangeDual,
        lagrange_dual: LagrangeDualRotationOptions {
            sdp: test_sdp_options(SdpSolverType::RbrBcm),
        },
        irls: test_irls_options(),
        ..Default::default()
    };

    let mut first = identity_rotations(&[0, 1, 2, 3, 4]);
    HybridRotationEstimator::new(options.clone())
        .estimate_rotations(&view_pairs, &mut first)
        .unwrap();

    let mut second = identity_rotations(&[0, 1, 2, 3, 4]);
    HybridRotationEstimator::new(options)
        .estimate_rotations(&view_pairs, &mut second)
        .unwrap();

    for (view_id, rotation) in &first {
        for k in 0..3 {
            assert_eq!(
                rotation[k].to_bits(),
                second[view_id][k].to_bits(),
                "view {view_id} component {k} differs between runs"
            );
        }
    }
}

#[test]
fn test_error_bound_dominates_observed_error() {
    init_logger();
    for seed in [1, 2, 3] {
        let (view_pairs, ground_truth) = noisy_complete_graph(6, degrees(1.0), seed);
        let reference: BTreeMap<ViewId, Col<E>> = ground_truth
            .iter()
            .map(|(&view_id, rotation)| {
                (
                    view_id,
                    so3::multiply_angle_axis(rotation.as_ref(), (-&ground_truth[&0]).as_ref()),
                )
            })
            .collect();

        let mut rotations = identity_rotations(&[0, 1, 2, 3, 4, 5]);
        let mut estimator = LagrangeDualRotationEstimator::new(LagrangeDualRotationOptions {
            sdp: test_sdp_options(SdpSolverType::RbrBcm),
        });
        estimator
            .estimate_rotations(&view_pairs, &mut rotations)
            .unwrap();

        let bound = estimator.alpha_max().unwrap();
        let worst = aligned_errors(&rotations, &reference)
            .into_iter()
            .fold(0.0, E::max);
        assert!(
            worst <= bound,
            "seed {seed}: observed {worst:.4} exceeds bound {bound:.4}"
        );
    }
}

#[test]
fn test_hybrid_reports_alpha_max() {
    init_logger();
    let (view_pairs, _) = noisy_complete_graph(4, degrees(1.0), 9);
    let mut estimator = HybridRotationEstimator::new(HybridRotationOptions {
        initializer: HybridInitializer::LagrangeDual,
        lagrange_dual: LagrangeDualRotationOptions {
            sdp: test_sdp_options(SdpSolverType::RbrBcm),
        },
        irls: test_irls_options(),
        ..Default::default()
    });
    let mut rotations = identity_rotations(&[0, 1, 2, 3]);
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();
    assert!(estimator.alpha_max().unwrap() > 0.0);
}
