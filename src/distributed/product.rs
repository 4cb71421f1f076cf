//! Distributed sparse matrix-matrix product.

use std::collections::BTreeMap;

use crate::comm::Communicator;
use crate::errors::SolverError;
use crate::linalg::{BlockValue, CsrMatrix};

use super::matrix::DistributedMatrix;

/// Computes `C = A * B` across the group.
///
/// Each rank fetches the rows of `B` matching its halo columns of `A`, then
/// multiplies locally; the result is distributed over `A`'s row partition
/// and `B`'s column partition. Both operands must still be editable.
/// Collective.
pub fn product<V: BlockValue, C: Communicator>(
    a: &DistributedMatrix<V, C>,
    b: &DistributedMatrix<V, C>,
) -> Result<DistributedMatrix<V, C>, SolverError> {
    a.assert_editable("product");
    b.assert_editable("product");
    if a.col_partition() != b.row_partition() {
        return Err(SolverError::DimensionMismatch(format!(
            "product requires matching inner partitions: {} columns vs {} rows",
            a.global_cols(),
            b.global_rows()
        )));
    }

    let comm = a.comm().clone();
    let rank = comm.rank();

    // Ask each owner for the rows of B behind our halo columns of A.
    let requests: Vec<Vec<usize>> = (0..comm.size())
        .map(|r| a.recv_cols()[a.recv_offsets()[r]..a.recv_offsets()[r + 1]].to_vec())
        .collect();
    let wanted = comm.exchange(requests);

    let row_begin = b.row_partition().begin(rank);
    let mut reply_lens = Vec::with_capacity(comm.size());
    let mut reply_cols = Vec::with_capacity(comm.size());
    let mut reply_vals = Vec::with_capacity(comm.size());
    for rows_wanted in &wanted {
        let mut lens = Vec::with_capacity(rows_wanted.len());
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for &g in rows_wanted {
            let i = g - row_begin;
            let mut nnz = 0;
            for (gj, v) in b.row_global(i) {
                cols.push(gj);
                vals.push(*v);
                nnz += 1;
            }
            lens.push(nnz);
        }
        reply_lens.push(lens);
        reply_cols.push(cols);
        reply_vals.push(vals);
    }
    let got_lens = comm.exchange(reply_lens);
    let got_cols = comm.exchange(reply_cols);
    let got_vals = comm.exchange(reply_vals);

    // Replies arrive in the order the halo columns were requested, so they
    // line up with recv_cols positions.
    let mut fetched: Vec<(Vec<usize>, Vec<V>)> = Vec::with_capacity(a.recv_cols().len());
    for ((lens, cols), vals) in got_lens.into_iter().zip(got_cols).zip(got_vals) {
        let mut cursor = 0;
        for len in lens {
            fetched.push((
                cols[cursor..cursor + len].to_vec(),
                vals[cursor..cursor + len].to_vec(),
            ));
            cursor += len;
        }
    }
    debug_assert_eq!(fetched.len(), a.recv_cols().len());

    let (inner_begin, inner_end) = b.row_partition().range(rank);
    let mut triplets = Vec::new();
    for i in 0..a.local_rows() {
        // Accumulate in global column order of A's row so the summation
        // order, and therefore the result, does not depend on how the rows
        // happen to be distributed.
        let mut row_entries: Vec<(usize, V)> = a.row_global(i).map(|(g, v)| (g, *v)).collect();
        row_entries.sort_unstable_by_key(|&(g, _)| g);
        let mut acc: BTreeMap<usize, V> = BTreeMap::new();
        for (gj, va) in row_entries {
            if gj >= inner_begin && gj < inner_end {
                for (gk, vb) in b.row_global(gj - inner_begin) {
                    acc.entry(gk)
                        .and_modify(|c| *c = *c + va * *vb)
                        .or_insert(va * *vb);
                }
            } else {
                let k = a
                    .recv_cols()
                    .binary_search(&gj)
                    .unwrap_or_else(|_| unreachable!("halo column is registered"));
                let (cols, vals) = &fetched[k];
                for (gk, vb) in cols.iter().zip(vals) {
                    acc.entry(*gk)
                        .and_modify(|c| *c = *c + va * *vb)
                        .or_insert(va * *vb);
                }
            }
        }
        for (gk, v) in acc {
            triplets.push((i, gk, v));
        }
    }

    let strip = CsrMatrix::from_triplets(a.local_rows(), b.global_cols(), triplets)?;
    DistributedMatrix::from_strip(
        comm,
        a.row_partition().clone(),
        b.col_partition().clone(),
        strip,
    )
}
