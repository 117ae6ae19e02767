//! Global initialization composed with IRLS refinement.

use std::collections::BTreeMap;
use std::time::Instant;

use faer::Col;
use log::info;
use problemo::Problem;
use serde::{Deserialize, Serialize};

use crate::rotation::build_linear_system;
use crate::rotation::irls::{IrlsRotationOptions, IrlsRotationRefiner};
use crate::rotation::l1_estimator::{L1RotationEstimator, L1RotationOptions};
use crate::rotation::lagrange_dual::{
    LagrangeDualRotationEstimator, LagrangeDualRotationOptions,
};
use crate::view_graph::{ViewId, ViewIndex, ViewPairs, assert_input_contract};
use crate::{E, RotationEstimator, Status};

/// Which global estimator seeds the refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HybridInitializer {
    LagrangeDual,
    L1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRotationOptions {
    pub initializer: HybridInitializer,
    pub lagrange_dual: LagrangeDualRotationOptions,
    pub l1: L1RotationOptions,
    pub irls: IrlsRotationOptions,
}

impl Default for HybridRotationOptions {
    fn default() -> Self {
        Self {
            initializer: HybridInitializer::LagrangeDual,
            lagrange_dual: LagrangeDualRotationOptions::default(),
            l1: L1RotationOptions::default(),
            irls: IrlsRotationOptions::default(),
        }
    }
}

/// Runs a global estimator for the initialization, then refines with IRLS.
///
/// The view index and the tangent-space system are built once here and handed
/// to both stages through their setters. A failed initialization aborts the
/// whole call; the composition is the caller's choice and there is no
/// fallback from one initializer to the other.
pub struct HybridRotationEstimator {
    options: HybridRotationOptions,
    alpha_max: Option<E>,
}

impl HybridRotationEstimator {
    pub fn new(options: HybridRotationOptions) -> Self {
        Self {
            options,
            alpha_max: None,
        }
    }

    /// Error bound reported by the Lagrange-dual initializer, when it ran.
    pub fn alpha_max(&self) -> Option<E> {
        self.alpha_max
    }
}

impl RotationEstimator for HybridRotationEstimator {
    fn estimate_rotations(
        &mut self,
        view_pairs: &ViewPairs,
        global_rotations: &mut BTreeMap<ViewId, Col<E>>,
    ) -> Result<Status, Problem> {
        assert_input_contract(view_pairs, global_rotations);
        let start = Instant::now();

        let index = ViewIndex::from_rotations(global_rotations);
        assert_eq!(index.anchor_index(), 0);
        let sparse_matrix = build_linear_system(view_pairs, &index)?;

        match self.options.initializer {
            HybridInitializer::LagrangeDual => {
                let mut initializer =
                    LagrangeDualRotationEstimator::new(self.options.lagrange_dual.clone());
                initializer.set_view_index(index.clone());
                initializer.estimate_rotations(view_pairs, global_rotations)?;
                self.alpha_max = initializer.alpha_max();
            }
            HybridInitializer::L1 => {
                let mut initializer = L1RotationEstimator::new(self.options.l1.clone());
                initializer.set_view_index(index.clone());
                initializer.set_sparse_matrix(sparse_matrix.clone());
                initializer.estimate_rotations(view_pairs, global_rotations)?;
            }
        }

        let mut refiner = IrlsRotationRefiner::new(self.options.irls.clone());
        refiner.set_view_index(index);
        refiner.set_sparse_matrix(sparse_matrix);
        let status = refiner.estimate_rotations(view_pairs, global_rotations)?;

        info!(
            "hybrid rotation estimation finished in {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(status)
    }
}
