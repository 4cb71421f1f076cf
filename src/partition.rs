//! Row ownership across the process group.
//!
//! The initial split assigns each rank a contiguous, near-equal strip of
//! rows rounded up to the block granularity, so block-structured degrees of
//! freedom never straddle a rank boundary. Optionally a [`GraphPartitioner`]
//! can recompute ownership from the matrix connectivity; the new assignment
//! is applied through 0/1 selection operators and the distributed product,
//! so the repartitioned operator is exact.

use std::collections::BTreeSet;

use tracing::debug;

use crate::comm::Communicator;
use crate::distributed::{product, transpose, DistributedMatrix};
use crate::errors::SolverError;
use crate::linalg::{BlockRhs, BlockValue, CsrMatrix};

/// Row range owned by one rank of the initial split.
///
/// Chunk sizes are `ceil(global_rows / world_size)` rounded up to a multiple
/// of `block_size`; the trailing ranks absorb the remainder and may come up
/// short or empty.
pub fn initial_range(
    global_rows: usize,
    world_size: usize,
    rank: usize,
    block_size: usize,
) -> (usize, usize) {
    assert!(block_size > 0, "block size must be positive");
    let mut chunk = global_rows.div_ceil(world_size);
    chunk = chunk.div_ceil(block_size) * block_size;
    let begin = (rank * chunk).min(global_rows);
    let end = ((rank + 1) * chunk).min(global_rows);
    (begin, end)
}

/// Contiguous row ranges, one per rank, covering `[0, total)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    ranges: Vec<(usize, usize)>,
}

impl Partition {
    /// Builds a partition from explicit per-rank ranges, validating that
    /// they tile `[0, total)` without gap or overlap.
    pub fn from_ranges(ranges: Vec<(usize, usize)>) -> Result<Self, SolverError> {
        let mut expected = 0;
        for (r, &(begin, end)) in ranges.iter().enumerate() {
            if begin != expected || end < begin {
                return Err(SolverError::PartitionContract(format!(
                    "rank {r} owns [{begin}, {end}), expected to start at {expected}"
                )));
            }
            expected = end;
        }
        Ok(Self { ranges })
    }

    /// The standard block-aligned near-uniform split.
    pub fn uniform_blocked(global_rows: usize, world_size: usize, block_size: usize) -> Self {
        let ranges = (0..world_size)
            .map(|r| initial_range(global_rows, world_size, r, block_size))
            .collect();
        Self { ranges }
    }

    /// Rebuilds the partition from per-rank local lengths, gathered from the
    /// whole group. Collective.
    pub fn gather<C: Communicator>(comm: &C, local_len: usize) -> Self {
        let lens = comm.all_gather(local_len);
        let mut ranges = Vec::with_capacity(lens.len());
        let mut begin = 0;
        for len in lens {
            ranges.push((begin, begin + len));
            begin += len;
        }
        Self { ranges }
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.ranges.len()
    }

    /// First row owned by `rank`.
    pub fn begin(&self, rank: usize) -> usize {
        self.ranges[rank].0
    }

    /// One past the last row owned by `rank`.
    pub fn end(&self, rank: usize) -> usize {
        self.ranges[rank].1
    }

    /// The row range owned by `rank`.
    pub fn range(&self, rank: usize) -> (usize, usize) {
        self.ranges[rank]
    }

    /// Number of rows owned by `rank`.
    pub fn len(&self, rank: usize) -> usize {
        let (begin, end) = self.ranges[rank];
        end - begin
    }

    /// Whether `rank` owns no rows.
    pub fn is_empty(&self, rank: usize) -> bool {
        self.len(rank) == 0
    }

    /// Global row count.
    pub fn total(&self) -> usize {
        self.ranges.last().map_or(0, |&(_, end)| end)
    }

    /// The rank owning global row `g`.
    pub fn owner_of(&self, g: usize) -> usize {
        debug_assert!(g < self.total());
        self.ranges
            .partition_point(|&(_, end)| end <= g)
    }
}

/// Repartitioning policy applied before the hierarchy is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionPolicy {
    /// Keep the initial block-aligned split.
    Keep,
    /// Accept the current ownership without graph analysis.
    Merge,
    /// Recompute ownership from the matrix connectivity graph.
    Graph,
}

/// Computes a part assignment for an undirected connectivity graph.
///
/// `partition` receives the full graph (symmetrized connectivity with scalar
/// edge weights) identically on every rank and must return one part id in
/// `0..parts` per vertex, identical on every rank.
pub trait GraphPartitioner {
    /// Assigns each graph vertex to a part.
    fn partition(&self, graph: &CsrMatrix<f64>, parts: usize) -> Vec<usize>;
}

/// Contiguous-stripe assignment balanced by vertex count.
///
/// The baseline partitioner: no edge-cut optimization, but deterministic and
/// dependency-free. External partitioners plug in through the same trait.
#[derive(Debug, Default)]
pub struct StripePartitioner;

impl GraphPartitioner for StripePartitioner {
    fn partition(&self, graph: &CsrMatrix<f64>, parts: usize) -> Vec<usize> {
        let n = graph.rows();
        let chunk = n.div_ceil(parts).max(1);
        (0..n).map(|v| (v / chunk).min(parts - 1)).collect()
    }
}

/// Recomputes row ownership of `a` and `rhs` from the matrix connectivity.
///
/// The connectivity graph is collapsed at `block_size` granularity, handed
/// to the partitioner, and the resulting assignment is realized as a pair of
/// 0/1 selection operators: a restriction `R` into the new ownership and its
/// transpose `P`, applied as `A' = R * A * P` and `rhs' = R * rhs`. No-op
/// for a single rank or a non-graph policy. Collective.
pub fn repartition<V: BlockValue, C: Communicator>(
    a: DistributedMatrix<V, C>,
    rhs: Vec<V::Rhs>,
    block_size: usize,
    policy: PartitionPolicy,
    partitioner: &dyn GraphPartitioner,
) -> Result<(DistributedMatrix<V, C>, Vec<V::Rhs>), SolverError> {
    if a.comm().size() == 1 || policy != PartitionPolicy::Graph {
        return Ok((a, rhs));
    }
    if a.global_rows() % block_size != 0 {
        return Err(SolverError::PartitionContract(format!(
            "{} rows are not divisible by block size {}",
            a.global_rows(),
            block_size
        )));
    }

    let comm = a.comm().clone();
    let size = comm.size();

    // Every rank collapses the same gathered connectivity, so the
    // assignment below is computed identically everywhere.
    let full = a.gather_full()?;
    let vertices = a.global_rows() / block_size;
    let mut edges = BTreeSet::new();
    for i in 0..full.rows() {
        for (j, _) in full.row(i) {
            let (u, v) = (i / block_size, j / block_size);
            if u != v {
                edges.insert((u.min(v), u.max(v)));
            }
        }
    }
    let graph = CsrMatrix::from_triplets(
        vertices,
        vertices,
        edges
            .into_iter()
            .flat_map(|(u, v)| [(u, v, 1.0), (v, u, 1.0)]),
    )?;

    let assign = partitioner.partition(&graph, size);
    if assign.len() != vertices {
        return Err(SolverError::PartitionContract(format!(
            "partitioner returned {} assignments for {} vertices",
            assign.len(),
            vertices
        )));
    }
    if let Some(bad) = assign.iter().find(|&&p| p >= size) {
        return Err(SolverError::PartitionContract(format!(
            "partitioner assigned part {bad} with only {size} ranks"
        )));
    }

    // Stable renumbering: rows ordered by (part, old index) keep each part
    // contiguous, and per-rank counts stay block multiples because whole
    // blocks move together.
    let mut part_counts = vec![0usize; size];
    for &p in &assign {
        part_counts[p] += block_size;
    }
    let mut part_begin = vec![0usize; size + 1];
    for r in 0..size {
        part_begin[r + 1] = part_begin[r] + part_counts[r];
    }
    let new_partition = Partition::from_ranges(
        (0..size).map(|r| (part_begin[r], part_begin[r + 1])).collect(),
    )?;
    debug!(
        old = ?a.row_partition(),
        new = ?new_partition,
        "repartitioning by graph assignment"
    );

    // new_of[old row] = position of that row after renumbering.
    let mut next = part_begin.clone();
    let mut new_of = vec![0usize; a.global_rows()];
    for (vertex, &p) in assign.iter().enumerate() {
        for lane in 0..block_size {
            new_of[vertex * block_size + lane] = next[p];
            next[p] += 1;
        }
    }

    // I has one identity block per column: I[new_of[g], g]. This rank
    // contributes the rows of I it will own afterwards.
    let rank = comm.rank();
    let (new_begin, new_end) = new_partition.range(rank);
    let mut old_of = vec![0usize; a.global_rows()];
    for (old, &new) in new_of.iter().enumerate() {
        old_of[new] = old;
    }
    // Restriction R maps the old index space to the new one with a single
    // identity block per row; P = R^T. The moved operator is R * A * P and
    // the right-hand side follows as R * rhs.
    let r_strip = CsrMatrix::from_triplets(
        new_end - new_begin,
        a.global_rows(),
        (new_begin..new_end).map(|new| (new - new_begin, old_of[new], V::identity())),
    )?;
    let r_op = DistributedMatrix::from_strip(
        comm.clone(),
        new_partition,
        a.row_partition().clone(),
        r_strip,
    )?;
    let p_op = transpose(&r_op)?;
    let moved = product(&r_op, &product(&a, &p_op)?)?;

    if rhs.len() != a.local_rows() {
        return Err(SolverError::DimensionMismatch(format!(
            "right-hand side has {} rows, matrix strip has {}",
            rhs.len(),
            a.local_rows()
        )));
    }
    let mut new_rhs = vec![<V::Rhs as BlockRhs>::zero(); r_op.local_rows()];
    r_op.spmv(1.0, &rhs, 0.0, &mut new_rhs);
    Ok((moved, new_rhs))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::comm::ThreadWorld;

    #[test]
    fn ranges_tile_the_global_index_space() {
        for (n, size, block) in [(100, 4, 1), (100, 4, 3), (7, 3, 2), (5, 8, 2)] {
            let mut expected = 0;
            for rank in 0..size {
                let (begin, end) = initial_range(n, size, rank, block);
                assert_eq!(begin, expected.min(n));
                assert!(end <= n);
                expected = end;
            }
            assert_eq!(expected, n);
        }
    }

    #[test]
    fn chunks_are_block_aligned() {
        for rank in 0..4 {
            let (begin, end) = initial_range(100, 4, rank, 3);
            assert_eq!(begin % 3, 0);
            // The final chunk may be clipped by the global row count.
            if end != 100 {
                assert_eq!(end % 3, 0);
            }
        }
    }

    #[test]
    fn owner_of_inverts_the_ranges() {
        let p = Partition::uniform_blocked(10, 3, 1);
        for g in 0..10 {
            let owner = p.owner_of(g);
            let (begin, end) = p.range(owner);
            assert!(begin <= g && g < end);
        }
    }

    #[test]
    fn from_ranges_rejects_gaps() {
        let err = Partition::from_ranges(vec![(0, 3), (4, 6)]).unwrap_err();
        assert!(matches!(err, SolverError::PartitionContract(_)));
    }

    fn tridiag_strip(begin: usize, end: usize, n: usize) -> CsrMatrix<f64> {
        let mut triplets = Vec::new();
        for g in begin..end {
            let i = g - begin;
            if g > 0 {
                triplets.push((i, g - 1, -1.0));
            }
            triplets.push((i, g, 2.0));
            if g + 1 < n {
                triplets.push((i, g + 1, -1.0));
            }
        }
        CsrMatrix::from_triplets(end - begin, n, triplets).unwrap()
    }

    #[test]
    fn graph_repartition_preserves_the_operator_action() {
        let n = 12;
        let results = ThreadWorld::run(3, |comm| {
            let p = Partition::uniform_blocked(n, comm.size(), 1);
            let (begin, end) = p.range(comm.rank());
            let a = DistributedMatrix::from_strip(
                comm.clone(),
                p.clone(),
                p.clone(),
                tridiag_strip(begin, end, n),
            )
            .unwrap();
            let rhs: Vec<f64> = (begin..end).map(|g| g as f64).collect();
            let (moved, new_rhs) =
                repartition(a, rhs, 1, PartitionPolicy::Graph, &StripePartitioner).unwrap();

            // Solve nothing; just check the moved operator action against
            // the reference by applying it to the moved rhs.
            let mut y = vec![0.0; moved.local_rows()];
            moved.spmv(1.0, &new_rhs, 0.0, &mut y);
            (moved.gather_full().unwrap(), new_rhs, y)
        });

        let reference = tridiag_strip(0, n, n);
        let x: Vec<f64> = (0..n as u64).map(|g| g as f64).collect();
        let mut expected = vec![0.0; n];
        reference.spmv(1.0, &x, 0.0, &mut expected);

        // Stripe assignment of the gathered graph reproduces the original
        // contiguous ownership, so the moved system matches entry for entry.
        let stitched_rhs: Vec<f64> = results.iter().flat_map(|(_, r, _)| r.clone()).collect();
        let stitched_y: Vec<f64> = results.iter().flat_map(|(_, _, y)| y.clone()).collect();
        assert_eq!(stitched_rhs, x);
        for (a, b) in stitched_y.iter().zip(&expected) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        for (full, _, _) in &results {
            assert_eq!(full, &reference);
        }
    }

    #[test]
    fn keep_policy_is_a_no_op() {
        let n = 8;
        ThreadWorld::run(2, |comm| {
            let p = Partition::uniform_blocked(n, comm.size(), 1);
            let (begin, end) = p.range(comm.rank());
            let a = DistributedMatrix::from_strip(
                comm,
                p.clone(),
                p.clone(),
                tridiag_strip(begin, end, n),
            )
            .unwrap();
            let rhs = vec![1.0; end - begin];
            let (kept, kept_rhs) =
                repartition(a, rhs.clone(), 1, PartitionPolicy::Keep, &StripePartitioner)
                    .unwrap();
            assert_eq!(kept.row_partition(), &p);
            assert_eq!(kept_rhs, rhs);
        });
    }
}
