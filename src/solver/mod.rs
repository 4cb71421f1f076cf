//! Preconditioned Krylov iteration and the end-to-end solve pipeline.

/// The BiCGStab iteration.
pub mod bicgstab;

use crate::amg::AmgHierarchy;
use crate::comm::Communicator;
use crate::config::Config;
use crate::distributed::DistributedMatrix;
use crate::errors::SolverError;
use crate::linalg::{BlockRhs, BlockValue};
use crate::partition::{repartition, GraphPartitioner};
use crate::profile::Profile;
use crate::scaling::{symmetric_diagonal, DiagonalScaling};

/// Result of a completed iteration.
///
/// Exhausting the iteration budget is a normal outcome, not an error; check
/// [`converged`](Self::converged) against the tolerance that matters to you.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    /// Iterations performed.
    pub iterations: usize,
    /// Final `||r|| / ||b||`.
    pub relative_residual: f64,
}

impl Outcome {
    /// Whether the final residual meets `tolerance`.
    pub fn converged(&self, tolerance: f64) -> bool {
        self.relative_residual <= tolerance
    }
}

/// Linear operator applied once per Krylov iteration as `z = M r`.
///
/// Implementations over a distributed system are collective in `apply`.
pub trait Preconditioner<V: BlockValue> {
    /// Computes `z = M r` over this rank's owned rows.
    fn apply(&self, r: &[V::Rhs], z: &mut [V::Rhs]);
}

/// The do-nothing preconditioner, `M = I`.
#[derive(Debug, Default)]
pub struct IdentityPreconditioner;

impl<V: BlockValue> Preconditioner<V> for IdentityPreconditioner {
    fn apply(&self, r: &[V::Rhs], z: &mut [V::Rhs]) {
        z.copy_from_slice(r);
    }
}

/// The assembled solve pipeline: ownership policy, symmetric diagonal
/// scaling, mixed-precision AMG hierarchy, and the outer BiCGStab.
pub struct Solver<V: BlockValue, C: Communicator> {
    scaled: DistributedMatrix<V, C>,
    scaling: DiagonalScaling<V>,
    amg: AmgHierarchy<V, C>,
    config: Config,
    profile: Profile,
}

impl<V: BlockValue, C: Communicator> Solver<V, C> {
    /// Prepares the system for repeated solves.
    ///
    /// Applies the configured ownership policy to `(a, rhs)`, scales the
    /// operator, builds the hierarchy, and freezes everything. Returns the
    /// solver and the right-hand side in the (possibly new) ownership.
    /// Collective.
    pub fn setup(
        a: DistributedMatrix<V, C>,
        rhs: Vec<V::Rhs>,
        config: Config,
        partitioner: &dyn GraphPartitioner,
    ) -> Result<(Self, Vec<V::Rhs>), SolverError> {
        let mut profile = Profile::new();
        profile.tic("setup");

        profile.tic("repartition");
        let (a, rhs) = repartition(
            a,
            rhs,
            config.partition.block_size,
            config.partition.policy,
            partitioner,
        )?;
        profile.toc("repartition");

        profile.tic("scaling");
        let (mut scaled, scaling) = symmetric_diagonal(&a)?;
        profile.toc("scaling");

        let amg = AmgHierarchy::build(&scaled, config.amg, &mut profile)?;
        scaled.freeze();
        profile.toc("setup");

        Ok((
            Self {
                scaled,
                scaling,
                amg,
                config,
                profile,
            },
            rhs,
        ))
    }

    /// Solves `A x = rhs` from a zero initial guess.
    ///
    /// `rhs` and `x` cover this rank's owned rows in the ownership
    /// established by [`setup`](Self::setup); `x` is overwritten with the
    /// solution in the original (unscaled) unknowns. Collective.
    pub fn solve(&mut self, rhs: &[V::Rhs], x: &mut [V::Rhs]) -> Result<Outcome, SolverError> {
        self.profile.tic("solve");
        let mut scaled_rhs = rhs.to_vec();
        self.scaling.apply(&mut scaled_rhs);
        for xi in x.iter_mut() {
            *xi = <V::Rhs as BlockRhs>::zero();
        }
        let outcome = bicgstab::solve(
            &self.scaled,
            &self.amg,
            &scaled_rhs,
            x,
            &self.config.solver,
        );
        if outcome.is_ok() {
            self.scaling.apply(x);
        }
        self.profile.toc("solve");
        outcome
    }

    /// The preconditioner hierarchy.
    pub fn hierarchy(&self) -> &AmgHierarchy<V, C> {
        &self.amg
    }

    /// Timing report accumulated over setup and solves.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::comm::{SingleRank, ThreadWorld};
    use crate::partition::{Partition, StripePartitioner};
    use crate::source::{Poisson3d, RowSource};

    fn build_system<C: Communicator>(
        comm: C,
        source: &Poisson3d,
    ) -> (DistributedMatrix<f64, C>, Vec<f64>) {
        let n = source.global_rows();
        let p = Partition::uniform_blocked(n, comm.size(), 1);
        let (begin, end) = p.range(comm.rank());
        let strip = source.read_rows(begin, end).unwrap();
        let rhs = source.read_rhs(begin, end).unwrap();
        let a = DistributedMatrix::from_strip(comm, p.clone(), p, strip).unwrap();
        (a, rhs)
    }

    #[test]
    fn poisson_converges_on_one_rank() {
        let source = Poisson3d::new(8);
        let (a, rhs) = build_system(SingleRank::new(), &source);
        let reference = a.clone();

        let (mut solver, rhs) =
            Solver::setup(a, rhs, Config::default(), &StripePartitioner).unwrap();
        let mut x = vec![0.0; rhs.len()];
        let outcome = solver.solve(&rhs, &mut x).unwrap();

        assert!(outcome.iterations <= 200);
        assert!(outcome.converged(1e-6), "residual {}", outcome.relative_residual);

        // Check the unscaled solution against the original operator.
        let mut ax = vec![0.0; rhs.len()];
        reference.spmv(1.0, &x, 0.0, &mut ax);
        let err: f64 = ax
            .iter()
            .zip(&rhs)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        let rhs_norm: f64 = rhs.iter().map(|b| b * b).sum::<f64>().sqrt();
        assert!(err / rhs_norm < 1e-6);
        assert!(solver.profile().elapsed("setup").is_some());
        assert!(solver.profile().elapsed("solve").is_some());
    }

    #[test]
    fn solution_is_invariant_under_partition_count() {
        let source = Poisson3d::new(6);
        let n = source.global_rows();

        let solve_with = |size: usize| -> Vec<f64> {
            let pieces = ThreadWorld::run(size, |comm| {
                let (a, rhs) = build_system(comm, &source);
                let (mut solver, rhs) =
                    Solver::setup(a, rhs, Config::default(), &StripePartitioner).unwrap();
                let mut x = vec![0.0; rhs.len()];
                let outcome = solver.solve(&rhs, &mut x).unwrap();
                assert!(outcome.converged(1e-6));
                x
            });
            pieces.into_iter().flatten().collect()
        };

        let serial = solve_with(1);
        assert_eq!(serial.len(), n);
        for size in [2, 4] {
            let split = solve_with(size);
            for (a, b) in split.iter().zip(&serial) {
                assert_relative_eq!(a, b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn block_valued_system_solves_through_the_full_pipeline() {
        use nalgebra::{SMatrix, SVector};

        type B = SMatrix<f64, 2, 2>;

        // Block-tridiagonal SPD system with coupled lanes inside each
        // diagonal block.
        let n = 24;
        let mut triplets = Vec::new();
        for i in 0..n {
            if i > 0 {
                triplets.push((i, i - 1, -B::identity()));
            }
            triplets.push((i, i, B::new(4.0, 1.0, 1.0, 4.0)));
            if i + 1 < n {
                triplets.push((i, i + 1, -B::identity()));
            }
        }
        let strip = crate::linalg::CsrMatrix::from_triplets(n, n, triplets).unwrap();
        let p = Partition::uniform_blocked(n, 1, 1);
        let a = DistributedMatrix::from_strip(SingleRank::new(), p.clone(), p, strip).unwrap();

        let x_true: Vec<SVector<f64, 2>> = (0..n)
            .map(|i| SVector::<f64, 2>::new(1.0 + i as f64 * 0.1, (i as f64 * 0.3).cos()))
            .collect();
        let mut rhs = vec![SVector::zeros(); n];
        a.spmv(1.0, &x_true, 0.0, &mut rhs);

        // Force a coarsening step so the block transfer operators and the
        // block coarse solve are all on the path.
        let config = Config {
            amg: crate::config::AmgConfig {
                coarse_enough: 4,
                ..crate::config::AmgConfig::default()
            },
            ..Config::default()
        };
        let (mut solver, rhs) = Solver::setup(a, rhs, config, &StripePartitioner).unwrap();
        assert!(solver.hierarchy().depth() > 1);

        let mut x = vec![SVector::zeros(); n];
        let outcome = solver.solve(&rhs, &mut x).unwrap();
        assert!(outcome.converged(1e-6), "residual {}", outcome.relative_residual);
        for (got, want) in x.iter().zip(&x_true) {
            for lane in 0..2 {
                assert_relative_eq!(got[lane], want[lane], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn graph_policy_roundtrips_through_the_pipeline() {
        let source = Poisson3d::new(4);
        let config = Config {
            partition: crate::config::PartitionConfig {
                policy: crate::partition::PartitionPolicy::Graph,
                block_size: 1,
            },
            ..Config::default()
        };
        let pieces = ThreadWorld::run(2, |comm| {
            let (a, rhs) = build_system(comm, &source);
            let (mut solver, rhs) = Solver::setup(a, rhs, config, &StripePartitioner).unwrap();
            let mut x = vec![0.0; rhs.len()];
            solver.solve(&rhs, &mut x).unwrap()
        });
        for outcome in pieces {
            assert!(outcome.converged(1e-6));
        }
    }
}
