//! Smoothed-aggregation hierarchy construction and the V-cycle.
//!
//! The hierarchy is built and applied entirely in the reduced-precision
//! space of the input value type; the outer Krylov iteration stays in full
//! precision and converts residuals at the boundary, once per application.

use std::marker::PhantomData;

use nalgebra::{DMatrix, DVector, Dyn};
use tracing::debug;

use crate::amg::smoother::Spai0;
use crate::amg::strength::{aggregate, strong_graph};
use crate::comm::Communicator;
use crate::config::AmgConfig;
use crate::distributed::{gather_rhs, product, transpose, DistributedMatrix};
use crate::errors::SolverError;
use crate::linalg::{from_blocks, BlockRhs, BlockValue, CsrMatrix};
use crate::partition::Partition;
use crate::profile::Profile;
use crate::solver::Preconditioner;

/// One level of the hierarchy: its operator, the transfer pair to the next
/// coarser level, and the relaxation scale.
struct Level<W: BlockValue, C: Communicator> {
    a: DistributedMatrix<W, C>,
    p: DistributedMatrix<W, C>,
    r: DistributedMatrix<W, C>,
    smoother: Spai0<W>,
}

/// Dense LU factorization of the gathered coarsest operator.
///
/// Every rank holds the full factorization and solves redundantly; only the
/// right-hand-side gather communicates.
struct CoarseSolver<W: BlockValue, C: Communicator> {
    comm: C,
    partition: Partition,
    lu: nalgebra::linalg::LU<f64, Dyn, Dyn>,
    _values: PhantomData<W>,
}

impl<W: BlockValue, C: Communicator> CoarseSolver<W, C> {
    fn build(a: &DistributedMatrix<W, C>) -> Result<Self, SolverError> {
        let full = a.gather_full()?;
        let side = W::SIDE;
        let n = full.rows() * side;
        let mut dense = DMatrix::<f64>::zeros(n, n);
        for i in 0..full.rows() {
            for (j, v) in full.row(i) {
                for bi in 0..side {
                    for bj in 0..side {
                        dense[(i * side + bi, j * side + bj)] = v.entry(bi, bj);
                    }
                }
            }
        }
        let lu = dense.lu();
        let u = lu.u();
        for k in 0..n {
            if u[(k, k)].abs() < 1e-14 {
                return Err(SolverError::SingularCoarse);
            }
        }
        debug!(rows = full.rows(), unknowns = n, "factorized coarse operator");
        Ok(Self {
            comm: a.comm().clone(),
            partition: a.row_partition().clone(),
            lu,
            _values: PhantomData,
        })
    }

    /// Gathers the full right-hand side, solves, and returns the owned
    /// slice. Collective.
    fn apply(&self, r: &[W::Rhs]) -> Vec<W::Rhs> {
        let lanes = <W::Rhs as BlockRhs>::LANES;
        let full = gather_rhs(&self.comm, &self.partition, r);
        let b = DVector::from_vec(from_blocks(&full));
        let x = self
            .lu
            .solve(&b)
            .expect("factorization was checked for singularity at construction");
        let (begin, end) = self.partition.range(self.comm.rank());
        x.as_slice()[begin * lanes..end * lanes]
            .chunks_exact(lanes)
            .map(<W::Rhs as BlockRhs>::from_flat)
            .collect()
    }
}

/// Mixed-precision smoothed-aggregation preconditioner.
///
/// Built once from the (scaled) fine operator; applying it runs one V-cycle.
/// Both phases are collective.
pub struct AmgHierarchy<V: BlockValue, C: Communicator> {
    levels: Vec<Level<V::Reduced, C>>,
    coarse: CoarseSolver<V::Reduced, C>,
    config: AmgConfig,
}

impl<V: BlockValue, C: Communicator> core::fmt::Debug for AmgHierarchy<V, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AmgHierarchy")
            .field("levels", &self.levels.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<V: BlockValue, C: Communicator> AmgHierarchy<V, C> {
    /// Coarsens `a` until the configured size or depth bound is reached,
    /// then factorizes the coarsest operator. Collective.
    pub fn build(
        a: &DistributedMatrix<V, C>,
        config: AmgConfig,
        profile: &mut Profile,
    ) -> Result<Self, SolverError> {
        profile.tic("amg_setup");
        let (levels, coarse) = build_levels(a.to_reduced(), &config)?;
        profile.toc("amg_setup");
        Ok(Self {
            levels,
            coarse,
            config,
        })
    }

    /// Number of levels, the coarsest direct-solve level included.
    pub fn depth(&self) -> usize {
        self.levels.len() + 1
    }

    /// Global row count at the coarsest level.
    pub fn coarse_rows(&self) -> usize {
        self.coarse.partition.total()
    }
}

impl<V: BlockValue, C: Communicator> Preconditioner<V> for AmgHierarchy<V, C> {
    fn apply(&self, r: &[V::Rhs], z: &mut [V::Rhs]) {
        let reduced: Vec<_> = r.iter().map(V::reduce_rhs).collect();
        let corrected = v_cycle(&self.levels, &self.coarse, &self.config, 0, &reduced);
        for (zi, ci) in z.iter_mut().zip(&corrected) {
            *zi = V::promote_rhs(ci);
        }
    }
}

fn build_levels<W: BlockValue, C: Communicator>(
    mut current: DistributedMatrix<W, C>,
    config: &AmgConfig,
) -> Result<(Vec<Level<W, C>>, CoarseSolver<W, C>), SolverError> {
    let mut levels: Vec<Level<W, C>> = Vec::new();
    loop {
        let n = current.global_rows();
        if n <= config.coarse_enough || levels.len() + 1 >= config.max_levels {
            break;
        }

        let smoother = Spai0::build(&current)?;
        let strong = strong_graph(current.local_part(), config.strength_threshold);
        let aggregates = aggregate(&strong);
        let coarse_partition = Partition::gather(current.comm(), aggregates.count);
        let nc = coarse_partition.total();
        if nc == 0 || nc >= n {
            // Aggregation stalled; whatever is left goes to the direct solve.
            break;
        }

        let rank = current.comm().rank();
        let coarse_begin = coarse_partition.begin(rank);

        let tentative_strip = CsrMatrix::from_triplets(
            current.local_rows(),
            nc,
            aggregates
                .assign
                .iter()
                .enumerate()
                .map(|(i, &agg)| (i, coarse_begin + agg, W::identity())),
        )?;
        let tentative = DistributedMatrix::from_strip(
            current.comm().clone(),
            current.row_partition().clone(),
            coarse_partition,
            tentative_strip,
        )?;

        let smoothing = jacobi_smoothing_operator(&current, config)?;
        let p = product(&smoothing, &tentative)?;
        let r = transpose(&p)?;
        let ac = product(&r, &product(&current, &p)?)?;
        debug!(
            level = levels.len(),
            rows = n,
            coarse = nc,
            nnz = current.local_nnz(),
            "coarsened level"
        );

        let mut level = Level {
            a: current,
            p,
            r,
            smoother,
        };
        level.a.freeze();
        level.p.freeze();
        level.r.freeze();
        levels.push(level);
        current = ac;
    }
    let coarse = CoarseSolver::build(&current)?;
    Ok((levels, coarse))
}

/// The damped-Jacobi smoothing operator `I - omega * D^-1 * A_f`, with the
/// weak off-diagonal entries of each row filtered out.
fn jacobi_smoothing_operator<W: BlockValue, C: Communicator>(
    a: &DistributedMatrix<W, C>,
    config: &AmgConfig,
) -> Result<DistributedMatrix<W, C>, SolverError> {
    let rank = a.comm().rank();
    let row_begin = a.row_partition().begin(rank);
    let diag = a.diagonal();
    let omega = config.prolongation_weight;
    let eps = config.strength_threshold;

    let mut triplets = Vec::new();
    for i in 0..a.local_rows() {
        let gi = row_begin + i;
        let d = diag[i].ok_or_else(|| {
            SolverError::InvalidInput(format!(
                "prolongation smoothing requires a diagonal entry in every row, row {gi} has none"
            ))
        })?;
        let d_inv = d.try_inverse().unwrap_or_else(W::identity);
        let d_norm = d.norm();
        for (gj, v) in a.row_global(i) {
            if gj == gi {
                triplets.push((i, gi, W::identity() - (d_inv * *v).scale(omega)));
            } else if v.norm() > eps * d_norm {
                triplets.push((i, gj, -(d_inv * *v).scale(omega)));
            }
        }
    }
    let strip = CsrMatrix::from_triplets(a.local_rows(), a.global_cols(), triplets)?;
    DistributedMatrix::from_strip(
        a.comm().clone(),
        a.row_partition().clone(),
        a.col_partition().clone(),
        strip,
    )
}

fn v_cycle<W: BlockValue, C: Communicator>(
    levels: &[Level<W, C>],
    coarse: &CoarseSolver<W, C>,
    config: &AmgConfig,
    depth: usize,
    r: &[W::Rhs],
) -> Vec<W::Rhs> {
    let Some(level) = levels.get(depth) else {
        return coarse.apply(r);
    };

    let mut z = vec![<W::Rhs as BlockRhs>::zero(); r.len()];
    if config.pre_sweeps > 0 {
        // The first sweep from a zero guess collapses to z = M r.
        level.smoother.apply_first(r, &mut z);
        for _ in 1..config.pre_sweeps {
            level.smoother.sweep(&level.a, r, &mut z);
        }
    }

    let mut residual = r.to_vec();
    level.a.spmv(-1.0, &z, 1.0, &mut residual);
    let mut coarse_residual = vec![<W::Rhs as BlockRhs>::zero(); level.r.local_rows()];
    level.r.spmv(1.0, &residual, 0.0, &mut coarse_residual);

    let correction = v_cycle(levels, coarse, config, depth + 1, &coarse_residual);
    level.p.spmv(1.0, &correction, 1.0, &mut z);

    for _ in 0..config.post_sweeps {
        level.smoother.sweep(&level.a, r, &mut z);
    }
    z
}
