use faer::sparse::{SparseColMat, SparseColMatRef, SparseRowMatRef, Triplet};
use faer::{Col, ColRef, Mat, MatRef, unzip, zip};
use problemo::{Problem, ProblemResult};

use crate::linalg::solver::LinearSolverError;
use crate::{E, I};

/// Elementwise soft-threshold `sign(v) * max(|v| - kappa, 0)`.
pub(crate) fn shrink(v: ColRef<E>, kappa: E) -> Col<E> {
    let mut out = Col::<E>::zeros(v.nrows());
    zip!(v, out.as_mut()).for_each(|unzip!(v, out)| *out = v.signum() * (v.abs() - kappa).max(0.0));
    out
}

pub(crate) fn cwise_multiply<'a>(x1: ColRef<'a, E>, x2: ColRef<'a, E>) -> Col<E> {
    let mut out = Col::<E>::zeros(x1.nrows());
    zip!(x1, x2, out.as_mut()).for_each(|unzip!(x1, x2, out)| *out = *x1 * *x2);
    out
}

pub(crate) fn dot<'a>(x1: ColRef<'a, E>, x2: ColRef<'a, E>) -> E {
    let mut acc = 0.0;
    zip!(x1, x2).for_each(|unzip!(x1, x2)| acc += *x1 * *x2);
    acc
}

/// `A^T A` assembled row by row from the CSR pattern.
pub(crate) fn gram(a: SparseRowMatRef<I, E>) -> Result<SparseColMat<I, E>, Problem> {
    scaled_gram(a, None)
}

/// `A^T diag(w) A` for strictly positive row weights `w`.
///
/// The triplet order depends only on the pattern, so the assembled matrix has
/// the same symbolic structure for every weight vector and a previously
/// analyzed factorization can be reused.
pub(crate) fn weighted_gram(
    a: SparseRowMatRef<I, E>,
    weights: &[E],
) -> Result<SparseColMat<I, E>, Problem> {
    scaled_gram(a, Some(weights))
}

fn scaled_gram(
    a: SparseRowMatRef<I, E>,
    weights: Option<&[E]>,
) -> Result<SparseColMat<I, E>, Problem> {
    let row_ptr = a.symbolic().row_ptr();
    let col_idx = a.symbolic().col_idx();
    let vals = a.val();

    let mut triplets = Vec::new();
    for row in 0..a.nrows() {
        let weight = weights.map_or(1.0, |w| w[row]);
        let start = row_ptr[row];
        let end = row_ptr[row + 1];
        for k1 in start..end {
            for k2 in start..end {
                triplets.push(Triplet::new(
                    col_idx[k1],
                    col_idx[k2],
                    weight * vals[k1] * vals[k2],
                ));
            }
        }
    }

    SparseColMat::<I, E>::try_new_from_triplets(a.ncols(), a.ncols(), &triplets)
        .via(LinearSolverError::MatrixAssembly)
}

/// `A v` over the CSC storage.
pub(crate) fn sparse_matvec(a: SparseColMatRef<I, E>, v: ColRef<E>) -> Col<E> {
    let col_ptr = a.symbolic().col_ptr();
    let row_idx = a.symbolic().row_idx();
    let values = a.val();

    let mut out = Col::<E>::zeros(a.nrows());
    for col in 0..a.ncols() {
        let x = v[col];
        if x == 0.0 {
            continue;
        }
        for k in col_ptr[col]..col_ptr[col + 1] {
            out[row_idx[k]] += values[k] * x;
        }
    }
    out
}

/// A length-n column viewed as an n x 1 matrix, the shape the factorization
/// backends consume.
pub(crate) fn col_to_mat(col: ColRef<E>) -> Mat<E> {
    Mat::from_fn(col.nrows(), 1, |i, _| col[i])
}

pub(crate) fn mat_to_col(mat: MatRef<E>) -> Col<E> {
    Col::from_fn(mat.nrows(), |i| mat[(i, 0)])
}
