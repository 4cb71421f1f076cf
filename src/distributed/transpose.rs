//! Distributed transpose.

use crate::comm::Communicator;
use crate::errors::SolverError;
use crate::linalg::{BlockValue, CsrMatrix};

use super::matrix::DistributedMatrix;

/// Computes `A^T` across the group.
///
/// Every entry `(i, j)` is shipped to the owner of row `j` in the result,
/// with the block value itself transposed. The result is distributed over
/// `A`'s column partition. The operand must still be editable. Collective.
pub fn transpose<V: BlockValue, C: Communicator>(
    a: &DistributedMatrix<V, C>,
) -> Result<DistributedMatrix<V, C>, SolverError> {
    a.assert_editable("transpose");

    let comm = a.comm().clone();
    let rank = comm.rank();
    let row_begin = a.row_partition().begin(rank);

    let mut outgoing: Vec<Vec<(usize, usize, V)>> = vec![Vec::new(); comm.size()];
    for i in 0..a.local_rows() {
        let gi = row_begin + i;
        for (gj, v) in a.row_global(i) {
            let owner = a.col_partition().owner_of(gj);
            outgoing[owner].push((gj, gi, v.transpose()));
        }
    }
    let incoming = comm.exchange(outgoing);

    let out_begin = a.col_partition().begin(rank);
    let out_rows = a.col_partition().len(rank);
    let strip = CsrMatrix::from_triplets(
        out_rows,
        a.global_rows(),
        incoming
            .into_iter()
            .flatten()
            .map(|(gj, gi, v)| (gj - out_begin, gi, v)),
    )?;
    DistributedMatrix::from_strip(
        comm,
        a.col_partition().clone(),
        a.row_partition().clone(),
        strip,
    )
}
