//! Sparse Cholesky factorization for the normal equations.
//!
//! [`SparseCholesky`] wraps Faer's simplicial LDLT with an AMD fill-reducing
//! permutation behind the two-phase [`SymmetricSolver`] contract: the symbolic
//! pattern of `A^T W A` never changes across ADMM or IRLS iterations, so
//! `analyze` runs once per solve and `factorize` refreshes only the numeric
//! values as the weights move.

use faer::dyn_stack::{MemBuffer, MemStack, StackReq};
use faer::linalg::cholesky::ldlt::factor::LdltRegularization;
use faer::perm::{Perm, PermRef};
use faer::prelude::{Reborrow, ReborrowMut};
use faer::sparse::linalg::amd;
use faer::sparse::linalg::cholesky::simplicial::{self, SymbolicSimplicialCholesky};
use faer::sparse::{SparseColMat, SparseColMatRef, SymbolicSparseColMat};
use faer::MatMut;
use problemo::{Problem, ProblemResult};

use crate::linalg::solver::{LinearSolverError, SymmetricSolver};
use crate::{E, I};

/// Simplicial sparse LDLT solver with a fill-reducing AMD permutation.
///
/// All fields are empty until `analyze` runs; `factorize` fills the numeric
/// values and may be repeated for any matrix sharing the analyzed pattern.
#[allow(non_snake_case)]
pub struct SparseCholesky {
    /// Symbolic factorization, fixed after `analyze`.
    symbolic: Option<SymbolicSimplicialCholesky<I>>,
    /// Fill-reducing permutation computed during `analyze`.
    perm: Option<Perm<I>>,
    /// Numeric factor values, refreshed by each `factorize`.
    L_values: Vec<E>,
}

impl SparseCholesky {
    pub fn new() -> Self {
        Self {
            symbolic: None,
            perm: None,
            L_values: Vec::new(),
        }
    }
}

impl Default for SparseCholesky {
    fn default() -> Self {
        Self::new()
    }
}

impl SymmetricSolver for SparseCholesky {
    fn analyze(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), Problem> {
        let nnz = mat.compute_nnz();
        let dim = mat.ncols();

        let (perm_fwd, perm_inv) = {
            let mut perm = Vec::new();
            let mut perm_inv = Vec::new();
            perm.try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            perm_inv
                .try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            perm.resize(dim, 0usize);
            perm_inv.resize(dim, 0usize);

            let mut mem = MemBuffer::try_new(amd::order_scratch::<I>(dim, nnz))
                .via(LinearSolverError::MemoryAllocation)?;
            amd::order(
                &mut perm,
                &mut perm_inv,
                mat.symbolic(),
                amd::Control::default(),
                MemStack::new(&mut mem),
            )
            .via(LinearSolverError::SymbolicFactorization)?;

            (perm, perm_inv)
        };

        self.perm = Some(unsafe {
            Perm::new_unchecked(perm_fwd.into_boxed_slice(), perm_inv.into_boxed_slice())
        });

        let mat_upper = permuted_upper(mat, self.perm.rb().unwrap().as_ref())?;

        self.symbolic = Some({
            let mut mem = MemBuffer::try_new(StackReq::any_of(&[
                simplicial::prefactorize_symbolic_cholesky_scratch::<I>(dim, nnz),
                simplicial::factorize_simplicial_symbolic_cholesky_scratch::<I>(dim),
            ]))
            .via(LinearSolverError::MemoryAllocation)?;
            let stack = MemStack::new(&mut mem);

            let mut etree = Vec::new();
            let mut col_counts = Vec::new();
            etree
                .try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            etree.resize(dim, 0isize);
            col_counts
                .try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            col_counts.resize(dim, 0usize);

            simplicial::prefactorize_symbolic_cholesky(
                &mut etree,
                &mut col_counts,
                mat_upper.symbolic(),
                stack,
            );
            simplicial::factorize_simplicial_symbolic_cholesky(
                mat_upper.symbolic(),
                // SAFETY: `etree` was filled by
                // `simplicial::prefactorize_symbolic_cholesky` above.
                unsafe { simplicial::EliminationTreeRef::from_inner(&etree) },
                &col_counts,
                stack,
            )
            .via(LinearSolverError::SymbolicFactorization)?
        });

        Ok(())
    }

    fn factorize(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), Problem> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let dim = mat.ncols();

        self.L_values = Vec::new();
        self.L_values
            .try_reserve_exact(symbolic.len_val())
            .via(LinearSolverError::MemoryReservation)?;
        self.L_values.resize(symbolic.len_val(), 0.0f64);

        let mat_upper = permuted_upper(mat, self.perm.rb().unwrap().as_ref())?;

        let mut mem =
            MemBuffer::try_new(simplicial::factorize_simplicial_numeric_ldlt_scratch::<I, E>(dim))
                .via(LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        simplicial::factorize_simplicial_numeric_ldlt::<I, E>(
            &mut self.L_values,
            mat_upper.rb(),
            LdltRegularization::default(),
            symbolic,
            stack,
        )
        .via(LinearSolverError::NumericFactorization)?;

        Ok(())
    }

    fn solve_in_place(&self, mut sol: MatMut<E>) -> Result<(), Problem> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        if self.L_values.len() != symbolic.len_val() {
            return Err(LinearSolverError::Uninitialized.into());
        }
        // The factor is reassembled from owned storage on every call, which
        // keeps the struct free of self-referential lifetimes.
        let ldlt = simplicial::SimplicialLdltRef::<'_, I, E>::new(symbolic, &self.L_values);

        let dim = symbolic.ncols();

        let mut mem = MemBuffer::try_new(StackReq::all_of(&[
            faer::perm::permute_rows_in_place_scratch::<I, E>(dim, sol.ncols()),
            symbolic.solve_in_place_scratch::<E>(dim),
        ]))
        .via(LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref(), stack);
        ldlt.solve_in_place_with_conj(faer::Conj::No, sol.rb_mut(), faer::Par::Seq, stack);
        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref().inverse(), stack);

        Ok(())
    }
}

/// Permutes a symmetric matrix and extracts its upper triangle, the layout the
/// simplicial factorization consumes.
fn permuted_upper(
    mat: SparseColMatRef<I, E>,
    perm: PermRef<I>,
) -> Result<SparseColMat<I, E>, Problem> {
    let dim = mat.ncols();
    let nnz = mat.compute_nnz();

    let mut mat_col_ptrs = Vec::new();
    let mut mat_row_indices = Vec::new();
    let mut mat_values = Vec::new();

    mat_col_ptrs
        .try_reserve_exact(dim + 1)
        .via(LinearSolverError::MemoryReservation)?;
    mat_col_ptrs.resize(dim + 1, 0usize);
    mat_row_indices
        .try_reserve_exact(nnz)
        .via(LinearSolverError::MemoryReservation)?;
    mat_row_indices.resize(nnz, 0usize);
    mat_values
        .try_reserve_exact(nnz)
        .via(LinearSolverError::MemoryReservation)?;
    mat_values.resize(nnz, 0.0f64);

    let mut mem = MemBuffer::try_new(faer::sparse::utils::permute_self_adjoint_scratch::<I>(dim))
        .via(LinearSolverError::MemoryAllocation)?;
    faer::sparse::utils::permute_self_adjoint_to_unsorted(
        &mut mat_values,
        &mut mat_col_ptrs,
        &mut mat_row_indices,
        mat.rb(),
        perm.rb(),
        faer::Side::Upper,
        faer::Side::Upper,
        MemStack::new(&mut mem),
    );

    Ok(SparseColMat::<I, E>::new(
        unsafe {
            SymbolicSparseColMat::new_unchecked(dim, dim, mat_col_ptrs, None, mat_row_indices)
        },
        mat_values,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;
    use faer::rand::SeedableRng;
    use faer::rand::rngs::StdRng;
    use faer::stats::DistributionExt;
    use faer::stats::prelude::{CwiseMatDistribution, StandardNormal};
    use faer::sparse::Triplet;

    fn tridiagonal_spd(n: usize) -> SparseColMat<I, E> {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push(Triplet::new(i, i, 2.0));
            if i + 1 < n {
                triplets.push(Triplet::new(i, i + 1, -1.0));
                triplets.push(Triplet::new(i + 1, i, -1.0));
            }
        }
        SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap()
    }

    #[test]
    fn test_solve_matches_matrix() {
        let n = 16;
        let mat = tridiagonal_spd(n);
        let mut solver = SparseCholesky::new();
        solver.analyze(mat.as_ref()).unwrap();
        solver.factorize(mat.as_ref()).unwrap();

        let rng = &mut StdRng::seed_from_u64(0);
        for _ in 0..10 {
            let rhs: Mat<E> = CwiseMatDistribution {
                nrows: n,
                ncols: 1,
                dist: StandardNormal,
            }
            .rand(rng);
            let sol = solver.solve(rhs.as_ref()).unwrap();
            assert!((&rhs - &mat * &sol).norm_l2() < 1e-10);
        }
    }

    #[test]
    fn test_refactorize_with_fixed_pattern() {
        let n = 8;
        let mat = tridiagonal_spd(n);
        let mut solver = SparseCholesky::new();
        solver.analyze(mat.as_ref()).unwrap();

        // Same pattern, different values: only factorize again.
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push(Triplet::new(i, i, 6.0));
            if i + 1 < n {
                triplets.push(Triplet::new(i, i + 1, -2.0));
                triplets.push(Triplet::new(i + 1, i, -2.0));
            }
        }
        let scaled = SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap();
        solver.factorize(scaled.as_ref()).unwrap();

        let rhs = Mat::from_fn(n, 1, |i, _| i as E);
        let sol = solver.solve(rhs.as_ref()).unwrap();
        assert!((&rhs - &scaled * &sol).norm_l2() < 1e-10);
    }

    #[test]
    fn test_solve_before_analyze_fails() {
        let solver = SparseCholesky::new();
        let mut rhs = Mat::from_fn(4, 1, |i, _| i as E);
        assert!(solver.solve_in_place(rhs.as_mut()).is_err());
    }
}
