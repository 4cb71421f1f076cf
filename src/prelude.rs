//! Convenience re-exports for assembling and solving distributed systems.

pub use crate::amg::{AmgHierarchy, Spai0};
pub use crate::comm::{Communicator, SingleRank, ThreadComm, ThreadWorld};
pub use crate::config::{AmgConfig, Config, PartitionConfig, SolverConfig};
pub use crate::distributed::{product, transpose, DistributedMatrix, MatrixState};
pub use crate::errors::SolverError;
pub use crate::linalg::{from_blocks, to_blocks, BlockRhs, BlockValue, CsrMatrix};
pub use crate::partition::{
    initial_range, repartition, GraphPartitioner, Partition, PartitionPolicy, StripePartitioner,
};
pub use crate::profile::Profile;
pub use crate::scaling::{symmetric_diagonal, DiagonalScaling};
pub use crate::solver::{bicgstab, IdentityPreconditioner, Outcome, Preconditioner, Solver};
pub use crate::source::{assemble, InMemorySource, Poisson3d, RowSource};
