pub mod cholesky;
pub mod jacobi;
pub mod l1;
pub mod lanczos;
pub mod products;
pub mod solver;
