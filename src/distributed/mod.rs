//! Row-distributed sparse operators and the collective algebra over them.

/// The distributed matrix container and its halo exchange.
pub mod matrix;
/// Distributed matrix-matrix product.
pub mod product;
/// Distributed transpose.
pub mod transpose;

pub use matrix::{gather_rhs, DistributedMatrix, MatrixState};
pub use product::product;
pub use transpose::transpose;
