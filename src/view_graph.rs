//! View identifiers, relative rotation edges, and the dense index mapping
//! shared by every estimator.

use std::collections::BTreeMap;

use faer::Col;

use crate::{E, I};

/// Opaque 32-bit view identifier supplied by the caller.
pub type ViewId = u32;

/// Edge key. The graph is undirected: an edge `(i, j)` implies the inverse
/// rotation on the reverse direction.
pub type ViewIdPair = (ViewId, ViewId);

/// A measured relative rotation between two views.
#[derive(Debug, Clone)]
pub struct TwoViewGeometry {
    /// Axis-angle rotation taking view i's frame to view j's frame.
    pub rotation_2: Col<E>,
    /// Number of shared observations backing the measurement.
    pub visibility_score: I,
}

impl TwoViewGeometry {
    pub fn new(rotation_2: Col<E>) -> Self {
        Self {
            rotation_2,
            visibility_score: 1,
        }
    }
}

/// The measurement graph handed to an estimator.
pub type ViewPairs = BTreeMap<ViewIdPair, TwoViewGeometry>;

/// Stable bijection between caller view ids and dense 0-based indices.
///
/// Indices are assigned in ascending view-id order so that repeated runs over
/// the same input produce the same system. The view at [`Self::anchor_index`]
/// is the gauge anchor: its rotation is held constant by every estimator, and
/// its columns are omitted from the tangent-space system.
#[derive(Debug, Clone, Default)]
pub struct ViewIndex {
    view_id_to_index: BTreeMap<ViewId, I>,
    anchor_index: I,
}

impl ViewIndex {
    /// Builds the index from the caller's rotation map.
    pub fn from_rotations(global_rotations: &BTreeMap<ViewId, Col<E>>) -> Self {
        let view_id_to_index = global_rotations
            .keys()
            .enumerate()
            .map(|(index, &view_id)| (view_id, index))
            .collect();
        Self {
            view_id_to_index,
            anchor_index: 0,
        }
    }

    /// Dense index of `view_id`. Panics if the view was absent from the
    /// rotation map the index was built from (an input-contract violation).
    pub fn index_of(&self, view_id: ViewId) -> I {
        self.view_id_to_index[&view_id]
    }

    /// The gauge anchor's dense index (always 0).
    pub fn anchor_index(&self) -> I {
        self.anchor_index
    }

    /// Number of views in the bijection.
    pub fn num_views(&self) -> I {
        self.view_id_to_index.len()
    }

    /// Iterates `(view_id, dense_index)` in ascending view-id order.
    pub fn iter(&self) -> impl Iterator<Item = (ViewId, I)> + '_ {
        self.view_id_to_index.iter().map(|(&id, &index)| (id, index))
    }
}

/// Checks the estimator input contract: a non-empty edge set over at least
/// two views, every endpoint carrying an initial rotation.
pub fn assert_input_contract(
    view_pairs: &ViewPairs,
    global_rotations: &BTreeMap<ViewId, Col<E>>,
) {
    assert!(!view_pairs.is_empty(), "view_pairs must be non-empty");
    assert!(
        global_rotations.len() >= 2,
        "rotation averaging requires at least two views"
    );
    for (view_id1, view_id2) in view_pairs.keys() {
        assert!(
            global_rotations.contains_key(view_id1) && global_rotations.contains_key(view_id2),
            "missing initial rotation for edge ({view_id1}, {view_id2})"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotations(ids: &[ViewId]) -> BTreeMap<ViewId, Col<E>> {
        ids.iter().map(|&id| (id, Col::zeros(3))).collect()
    }

    #[test]
    fn test_indices_are_dense_and_sorted() {
        let index = ViewIndex::from_rotations(&rotations(&[7, 2, 9]));
        assert_eq!(index.num_views(), 3);
        assert_eq!(index.index_of(2), 0);
        assert_eq!(index.index_of(7), 1);
        assert_eq!(index.index_of(9), 2);
        assert_eq!(index.anchor_index(), 0);
    }

    #[test]
    fn test_index_is_deterministic() {
        let a = ViewIndex::from_rotations(&rotations(&[5, 1, 3, 8]));
        let b = ViewIndex::from_rotations(&rotations(&[8, 3, 1, 5]));
        assert!(a.iter().eq(b.iter()));
    }

    #[test]
    #[should_panic]
    fn test_contract_rejects_missing_rotation() {
        let mut view_pairs = ViewPairs::new();
        view_pairs.insert((0, 1), TwoViewGeometry::new(Col::zeros(3)));
        assert_input_contract(&view_pairs, &rotations(&[0, 2]));
    }
}
