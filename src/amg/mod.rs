//! Smoothed-aggregation algebraic multigrid.

/// Hierarchy construction, the coarse direct solve, and the V-cycle.
pub mod hierarchy;
/// SPAI-0 relaxation.
pub mod smoother;
/// Strength of connection and aggregation.
pub mod strength;

pub use hierarchy::AmgHierarchy;
pub use smoother::Spai0;
pub use strength::{aggregate, strong_graph, Aggregates};
