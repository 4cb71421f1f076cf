//! Shared error types used across submodules.

use thiserror::Error;

/// Primary error type for solver operations.
///
/// Input-contract violations (`InvalidInput`, `DimensionMismatch`,
/// `PartitionContract`) indicate a caller or collaborator bug and are never
/// retried. `Breakdown` and `SingularCoarse` are numerical outcomes the
/// caller may react to by restarting with different parameters.
/// Non-convergence is *not* an error; it is reported through the returned
/// [`Outcome`](crate::solver::Outcome).
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// Matrix or vector data fails a structural consistency check.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Global dimensions of the operands do not agree.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// An external partitioner returned an assignment violating its contract
    /// (wrong length, out-of-range part id, or block-splitting chunk sizes).
    #[error("partition contract violation: {0}")]
    PartitionContract(String),
    /// A Krylov inner product degenerated to (near) zero.
    #[error("numerical breakdown at iteration {iteration}: {detail}")]
    Breakdown {
        /// Iteration at which the breakdown was detected.
        iteration: usize,
        /// Which quantity degenerated.
        detail: String,
    },
    /// The coarsest-level factorization is singular or numerically singular.
    #[error("coarse-level factorization is singular")]
    SingularCoarse,
}
