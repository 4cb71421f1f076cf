//! Configuration surface consumed by the solver core.
//!
//! Values only; parsing command lines or parameter files is the caller's
//! concern.

use crate::partition::PartitionPolicy;

/// Convergence criteria and iteration budget for the outer Krylov iteration.
#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Relative tolerance: ||r||/||b|| < tol.
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-8,
        }
    }
}

/// Parameters of the smoothed-aggregation AMG hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct AmgConfig {
    /// Strength-of-connection threshold: the edge (i,j) is strong when
    /// |a_ij|^2 > eps^2 |a_ii| |a_jj|.
    pub strength_threshold: f64,
    /// Damping weight of the Jacobi sweep applied to the tentative
    /// prolongation.
    pub prolongation_weight: f64,
    /// Stop coarsening once the global row count drops to this size.
    pub coarse_enough: usize,
    /// Hard cap on the number of coarsening steps.
    pub max_levels: usize,
    /// Pre-smoothing sweeps per V-cycle level.
    pub pre_sweeps: usize,
    /// Post-smoothing sweeps per V-cycle level.
    pub post_sweeps: usize,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            strength_threshold: 0.08,
            prolongation_weight: 0.72,
            coarse_enough: 500,
            max_levels: 16,
            pre_sweeps: 1,
            post_sweeps: 1,
        }
    }
}

/// Row-ownership policy applied before the hierarchy is built.
#[derive(Debug, Clone, Copy)]
pub struct PartitionConfig {
    /// Repartitioning policy.
    pub policy: PartitionPolicy,
    /// Granularity at which unknowns are kept together: chunk sizes are
    /// always a multiple of this, so block-structured dofs never straddle a
    /// process boundary.
    pub block_size: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            policy: PartitionPolicy::Keep,
            block_size: 1,
        }
    }
}

/// Aggregate configuration for the full solve pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Outer Krylov iteration settings.
    pub solver: SolverConfig,
    /// Preconditioner hierarchy settings.
    pub amg: AmgConfig,
    /// Row-ownership settings.
    pub partition: PartitionConfig,
}
