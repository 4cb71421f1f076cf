//! Row-distributed sparse matrix with an explicit halo exchange pattern.

use std::collections::BTreeSet;

use crate::comm::Communicator;
use crate::errors::SolverError;
use crate::linalg::{BlockRhs, BlockValue, CsrMatrix};
use crate::partition::Partition;

/// Lifecycle of a distributed matrix.
///
/// Structural operations (product, transpose, repartitioning) are only
/// available while the matrix is `Editable`. [`DistributedMatrix::freeze`]
/// commits the matrix to its apply-only form; there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixState {
    /// Structure may still be rebuilt.
    Editable,
    /// Only matrix-vector products remain.
    Frozen,
}

/// Sparse matrix whose rows are split into contiguous per-rank strips.
///
/// Each rank stores its strip as two CSR pieces: `local` holds the columns
/// this rank owns (indexed in the local column space) and `remote` holds the
/// columns owned by peers (indexed compactly into `recv_cols`). The halo
/// exchange pattern needed by [`spmv`](Self::spmv) is precomputed at
/// construction.
///
/// All methods that communicate are collective: every rank of the group must
/// call them in the same order.
#[derive(Debug, Clone)]
pub struct DistributedMatrix<V: BlockValue, C: Communicator> {
    comm: C,
    rows: Partition,
    cols: Partition,
    local: CsrMatrix<V>,
    remote: CsrMatrix<V>,
    /// Global column indices received from peers, sorted ascending. Sorted
    /// order groups them into contiguous per-owner segments.
    recv_cols: Vec<usize>,
    /// Segment boundaries of `recv_cols` per owning rank, `size + 1` entries.
    recv_offsets: Vec<usize>,
    /// Local column indices each peer needs from this rank.
    send_idx: Vec<Vec<usize>>,
    state: MatrixState,
}

impl<V: BlockValue, C: Communicator> DistributedMatrix<V, C> {
    /// Builds the distributed matrix from this rank's row strip.
    ///
    /// `strip` holds the rows `rows.range(comm.rank())` with *global* column
    /// indices. Collective: every rank contributes its strip.
    pub fn from_strip(
        comm: C,
        rows: Partition,
        cols: Partition,
        strip: CsrMatrix<V>,
    ) -> Result<Self, SolverError> {
        let rank = comm.rank();
        if strip.rows() != rows.len(rank) {
            return Err(SolverError::DimensionMismatch(format!(
                "strip has {} rows, partition assigns {} to rank {}",
                strip.rows(),
                rows.len(rank),
                rank
            )));
        }
        if strip.cols() != cols.total() {
            return Err(SolverError::DimensionMismatch(format!(
                "strip has {} columns, column partition covers {}",
                strip.cols(),
                cols.total()
            )));
        }

        let (col_begin, col_end) = cols.range(rank);
        let mut remote_set = BTreeSet::new();
        for i in 0..strip.rows() {
            for (j, _) in strip.row(i) {
                if j < col_begin || j >= col_end {
                    remote_set.insert(j);
                }
            }
        }
        let recv_cols: Vec<usize> = remote_set.into_iter().collect();

        let mut recv_offsets = Vec::with_capacity(comm.size() + 1);
        recv_offsets.push(0);
        let mut cursor = 0;
        for r in 0..comm.size() {
            let end = cols.end(r);
            while cursor < recv_cols.len() && recv_cols[cursor] < end {
                cursor += 1;
            }
            recv_offsets.push(cursor);
        }

        // Tell each owner which of its columns we need; what we hear back is
        // what we must ship on every spmv.
        let requests: Vec<Vec<usize>> = (0..comm.size())
            .map(|r| recv_cols[recv_offsets[r]..recv_offsets[r + 1]].to_vec())
            .collect();
        let wanted = comm.exchange(requests);
        let send_idx: Vec<Vec<usize>> = wanted
            .into_iter()
            .map(|cols_wanted| cols_wanted.into_iter().map(|g| g - col_begin).collect())
            .collect();

        let mut local_triplets = Vec::new();
        let mut remote_triplets = Vec::new();
        for i in 0..strip.rows() {
            for (j, v) in strip.row(i) {
                if j >= col_begin && j < col_end {
                    local_triplets.push((i, j - col_begin, *v));
                } else {
                    let k = recv_cols
                        .binary_search(&j)
                        .unwrap_or_else(|_| unreachable!("remote column was collected above"));
                    remote_triplets.push((i, k, *v));
                }
            }
        }
        let local = CsrMatrix::from_triplets(strip.rows(), col_end - col_begin, local_triplets)?;
        let remote = CsrMatrix::from_triplets(strip.rows(), recv_cols.len(), remote_triplets)?;

        Ok(Self {
            comm,
            rows,
            cols,
            local,
            remote,
            recv_cols,
            recv_offsets,
            send_idx,
            state: MatrixState::Editable,
        })
    }

    /// The distributed identity over the given row/column partition.
    pub fn identity(comm: C, partition: Partition) -> Self {
        let n_local = partition.len(comm.rank());
        let size = comm.size();
        Self {
            comm,
            rows: partition.clone(),
            cols: partition,
            local: CsrMatrix::identity(n_local),
            remote: CsrMatrix::empty(n_local, 0),
            recv_cols: Vec::new(),
            recv_offsets: vec![0; size + 1],
            send_idx: vec![Vec::new(); size],
            state: MatrixState::Editable,
        }
    }

    /// The communicator this matrix lives on.
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Row ownership across ranks.
    pub fn row_partition(&self) -> &Partition {
        &self.rows
    }

    /// Column ownership across ranks.
    pub fn col_partition(&self) -> &Partition {
        &self.cols
    }

    /// Rows owned by this rank.
    pub fn local_rows(&self) -> usize {
        self.rows.len(self.comm.rank())
    }

    /// Columns owned by this rank.
    pub fn local_cols(&self) -> usize {
        self.cols.len(self.comm.rank())
    }

    /// Global row count.
    pub fn global_rows(&self) -> usize {
        self.rows.total()
    }

    /// Global column count.
    pub fn global_cols(&self) -> usize {
        self.cols.total()
    }

    /// Stored blocks on this rank.
    pub fn local_nnz(&self) -> usize {
        self.local.nnz() + self.remote.nnz()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MatrixState {
        self.state
    }

    /// Commits the matrix to its apply-only form. Structural operations
    /// panic afterwards.
    pub fn freeze(&mut self) {
        self.state = MatrixState::Frozen;
    }

    pub(crate) fn assert_editable(&self, op: &str) {
        assert!(
            self.state == MatrixState::Editable,
            "{op} requires an editable matrix, but it is frozen"
        );
    }

    /// Entries of one locally owned row, with global column indices.
    /// Locally owned columns come first, then the halo columns.
    pub fn row_global(&self, i: usize) -> impl Iterator<Item = (usize, &V)> {
        let col_begin = self.cols.begin(self.comm.rank());
        self.local
            .row(i)
            .map(move |(j, v)| (j + col_begin, v))
            .chain(self.remote.row(i).map(|(k, v)| (self.recv_cols[k], v)))
    }

    /// The diagonal block of each locally owned row, where present.
    /// Meaningful only when row and column partitions agree.
    pub fn diagonal(&self) -> Vec<Option<V>> {
        let rank = self.comm.rank();
        let row_begin = self.rows.begin(rank);
        let col_begin = self.cols.begin(rank);
        (0..self.local.rows())
            .map(|i| {
                let g = row_begin + i;
                let j = g.checked_sub(col_begin)?;
                if j >= self.local.cols() {
                    return None;
                }
                self.local.row(i).find(|(jj, _)| *jj == j).map(|(_, v)| *v)
            })
            .collect()
    }

    /// `y = alpha * A * x + beta * y` over the distributed index space.
    ///
    /// `x` holds this rank's owned columns, `y` this rank's owned rows.
    /// Collective.
    pub fn spmv(&self, alpha: f64, x: &[V::Rhs], beta: f64, y: &mut [V::Rhs]) {
        assert_eq!(x.len(), self.local_cols(), "x must cover owned columns");
        assert_eq!(y.len(), self.local_rows(), "y must cover owned rows");

        let outgoing: Vec<Vec<V::Rhs>> = self
            .send_idx
            .iter()
            .map(|idx| idx.iter().map(|&lc| x[lc]).collect())
            .collect();
        let incoming = self.comm.exchange(outgoing);
        let mut halo = Vec::with_capacity(self.recv_cols.len());
        for values in incoming {
            halo.extend(values);
        }
        debug_assert_eq!(halo.len(), self.recv_cols.len());

        self.local.spmv(alpha, x, beta, y);
        if !halo.is_empty() {
            self.remote.spmv(alpha, &halo, 1.0, y);
        }
    }

    /// Converts every stored block to the reduced-precision twin, keeping
    /// the sparsity and exchange pattern.
    pub fn to_reduced(&self) -> DistributedMatrix<V::Reduced, C> {
        DistributedMatrix {
            comm: self.comm.clone(),
            rows: self.rows.clone(),
            cols: self.cols.clone(),
            local: self.local.map_values(|v| v.reduce()),
            remote: self.remote.map_values(|v| v.reduce()),
            recv_cols: self.recv_cols.clone(),
            recv_offsets: self.recv_offsets.clone(),
            send_idx: self.send_idx.clone(),
            state: self.state,
        }
    }

    /// Gathers the whole matrix, in global numbering, on every rank.
    /// Collective; intended for coarse operators only.
    pub fn gather_full(&self) -> Result<CsrMatrix<V>, SolverError> {
        let row_begin = self.rows.begin(self.comm.rank());
        let mut triplets: Vec<(usize, usize, V)> = Vec::with_capacity(self.local_nnz());
        for i in 0..self.local.rows() {
            for (gj, v) in self.row_global(i) {
                triplets.push((row_begin + i, gj, *v));
            }
        }
        let outgoing = vec![triplets; self.comm.size()];
        let incoming = self.comm.exchange(outgoing);
        CsrMatrix::from_triplets(
            self.global_rows(),
            self.global_cols(),
            incoming.into_iter().flatten(),
        )
    }

    pub(crate) fn local_part(&self) -> &CsrMatrix<V> {
        &self.local
    }

    pub(crate) fn recv_cols(&self) -> &[usize] {
        &self.recv_cols
    }

    pub(crate) fn recv_offsets(&self) -> &[usize] {
        &self.recv_offsets
    }
}

/// Gathers a distributed vector, in global numbering, on every rank.
/// Collective.
pub fn gather_rhs<R: BlockRhs, C: Communicator>(
    comm: &C,
    partition: &Partition,
    local: &[R],
) -> Vec<R> {
    let incoming = comm.exchange(vec![local.to_vec(); comm.size()]);
    let mut full = Vec::with_capacity(partition.total());
    for values in incoming {
        full.extend(values);
    }
    full
}
