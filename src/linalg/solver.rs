use derive_more::{Display, Error};
use faer::sparse::SparseColMatRef;
use faer::{Mat, MatMut, MatRef};
use problemo::Problem;

use crate::{E, I};

#[derive(Debug, Display, Error, PartialEq)]
pub enum LinearSolverError {
    #[display("Symbolic factorization error")]
    SymbolicFactorization,

    #[display("Numeric factorization error")]
    NumericFactorization,

    #[display("Sparse matrix assembly error")]
    MatrixAssembly,

    #[display("Uninitialized error")]
    Uninitialized,

    #[display("Memory reservation failed")]
    MemoryReservation,

    #[display("Memory allocation failed")]
    MemoryAllocation,
}

#[derive(Debug, Display, Error, PartialEq)]
pub enum EigenSolverError {
    #[display("Eigensolver failed to converge")]
    NoConvergence,

    #[display("Jacobi sweep limit reached")]
    SweepLimit,

    #[display("Rank-deficient subproblem")]
    RankDeficient,
}

/// Trait for symmetric positive definite sparse solvers.
///
/// The symbolic pattern is analyzed once with `analyze`; `factorize` refreshes
/// the numeric factor for a matrix with the analyzed pattern and may be called
/// repeatedly as values change across iterations. Callers must check the
/// result of every operation; on failure the enclosing solve aborts.
pub trait SymmetricSolver {
    /// Performs symbolic analysis of the given sparse matrix and prepares for
    /// factorization.
    fn analyze(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), Problem>;

    /// Performs numeric factorization of a matrix sharing the analyzed
    /// pattern.
    fn factorize(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), Problem>;

    /// Solves the linear system in place for the right-hand side columns.
    fn solve_in_place(&self, rhs: MatMut<E>) -> Result<(), Problem>;

    /// Solves the linear system and returns the solution.
    fn solve(&self, rhs: MatRef<E>) -> Result<Mat<E>, Problem> {
        let mut sol = rhs.to_owned();
        self.solve_in_place(sol.as_mut())?;
        Ok(sol)
    }
}
