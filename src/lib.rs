use std::collections::BTreeMap;

use faer::Col;
use problemo::Problem;

pub type E = f64;
pub type I = usize;

pub mod linalg;
pub mod rotation;
pub mod sdp;
pub mod so3;
pub mod view_graph;

#[cfg(test)]
pub mod tests;

/// Status codes for iterative solvers.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    /// The solver is still running.
    InProgress,
    /// The solver met its convergence tolerance.
    Converged,
    /// The solver stopped at its iteration cap without meeting tolerance.
    IterationLimit,
}

/// Trait for estimators that recover absolute orientations from pairwise
/// relative rotation measurements.
///
/// `global_rotations` must contain one axis-angle entry per view id appearing
/// in `view_pairs` (zero vectors are a valid cold start). The map is updated
/// in place; the view at dense index 0 is the gauge anchor and is never
/// modified. On numerical failure the map holds the last successful iterate
/// and the call returns an error.
pub trait RotationEstimator {
    /// Run the estimator until convergence or its iteration cap.
    fn estimate_rotations(
        &mut self,
        view_pairs: &view_graph::ViewPairs,
        global_rotations: &mut BTreeMap<view_graph::ViewId, Col<E>>,
    ) -> Result<Status, Problem>;
}
