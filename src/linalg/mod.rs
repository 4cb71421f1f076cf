//! Block-valued dense and sparse primitives shared by every layer above.

/// Fixed-size block value and right-hand-side traits.
pub mod block;
/// Compressed sparse row storage.
pub mod csr;

pub use block::{from_blocks, to_blocks, BlockRhs, BlockValue};
pub use csr::CsrMatrix;
