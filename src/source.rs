//! Row-range-addressable system suppliers.
//!
//! The core never reads files; it asks a [`RowSource`] for the global row
//! count, then for the rows and right-hand-side entries of its owned range.
//! Drivers adapt whatever storage they have to this contract.

use crate::comm::Communicator;
use crate::distributed::DistributedMatrix;
use crate::errors::SolverError;
use crate::linalg::{BlockValue, CsrMatrix};
use crate::partition::Partition;

/// Supplier of a linear system addressable by row range.
pub trait RowSource {
    /// The block value type of the matrix.
    type Value: BlockValue;

    /// Global row count, available without materializing any data.
    fn global_rows(&self) -> usize;

    /// The rows `[begin, end)` as a CSR strip with global column indices.
    fn read_rows(&self, begin: usize, end: usize)
        -> Result<CsrMatrix<Self::Value>, SolverError>;

    /// The right-hand-side entries of rows `[begin, end)`.
    fn read_rhs(
        &self,
        begin: usize,
        end: usize,
    ) -> Result<Vec<<Self::Value as BlockValue>::Rhs>, SolverError>;
}

/// Reads this rank's share of a source into a distributed system, using the
/// standard block-aligned split. Collective.
pub fn assemble<S: RowSource, C: Communicator>(
    comm: C,
    source: &S,
    block_size: usize,
) -> Result<(DistributedMatrix<S::Value, C>, Vec<<S::Value as BlockValue>::Rhs>), SolverError> {
    let partition = Partition::uniform_blocked(source.global_rows(), comm.size(), block_size);
    let (begin, end) = partition.range(comm.rank());
    let strip = source.read_rows(begin, end)?;
    let rhs = source.read_rhs(begin, end)?;
    let a = DistributedMatrix::from_strip(comm, partition.clone(), partition, strip)?;
    Ok((a, rhs))
}

/// A fully materialized system served back by range.
#[derive(Debug, Clone)]
pub struct InMemorySource<V: BlockValue> {
    matrix: CsrMatrix<V>,
    rhs: Vec<V::Rhs>,
}

impl<V: BlockValue> InMemorySource<V> {
    /// Wraps a square matrix and matching right-hand side.
    pub fn new(matrix: CsrMatrix<V>, rhs: Vec<V::Rhs>) -> Result<Self, SolverError> {
        if matrix.rows() != matrix.cols() || matrix.rows() != rhs.len() {
            return Err(SolverError::DimensionMismatch(format!(
                "{} x {} matrix with {} right-hand-side rows",
                matrix.rows(),
                matrix.cols(),
                rhs.len()
            )));
        }
        Ok(Self { matrix, rhs })
    }
}

impl<V: BlockValue> RowSource for InMemorySource<V> {
    type Value = V;

    fn global_rows(&self) -> usize {
        self.matrix.rows()
    }

    fn read_rows(&self, begin: usize, end: usize) -> Result<CsrMatrix<V>, SolverError> {
        if end < begin || end > self.matrix.rows() {
            return Err(SolverError::InvalidInput(format!(
                "row range [{begin}, {end}) outside {} rows",
                self.matrix.rows()
            )));
        }
        let mut triplets = Vec::new();
        for g in begin..end {
            for (j, v) in self.matrix.row(g) {
                triplets.push((g - begin, j, *v));
            }
        }
        CsrMatrix::from_triplets(end - begin, self.matrix.cols(), triplets)
    }

    fn read_rhs(&self, begin: usize, end: usize) -> Result<Vec<V::Rhs>, SolverError> {
        if end < begin || end > self.rhs.len() {
            return Err(SolverError::InvalidInput(format!(
                "row range [{begin}, {end}) outside {} rows",
                self.rhs.len()
            )));
        }
        Ok(self.rhs[begin..end].to_vec())
    }
}

/// The 7-point finite-difference Poisson problem on the unit cube with a
/// unit right-hand side, `n` points per side.
#[derive(Debug, Clone, Copy)]
pub struct Poisson3d {
    n: usize,
}

impl Poisson3d {
    /// A grid with `n` points per side, `n >= 2`.
    pub fn new(n: usize) -> Self {
        assert!(n >= 2, "the grid needs at least two points per side");
        Self { n }
    }
}

impl RowSource for Poisson3d {
    type Value = f64;

    fn global_rows(&self) -> usize {
        self.n * self.n * self.n
    }

    fn read_rows(&self, begin: usize, end: usize) -> Result<CsrMatrix<f64>, SolverError> {
        let n = self.n;
        let total = self.global_rows();
        if end < begin || end > total {
            return Err(SolverError::InvalidInput(format!(
                "row range [{begin}, {end}) outside {total} rows"
            )));
        }
        let h2i = ((n - 1) * (n - 1)) as f64;
        let mut triplets = Vec::with_capacity((end - begin) * 7);
        for g in begin..end {
            let i = g - begin;
            let x = g % n;
            let y = (g / n) % n;
            let z = g / (n * n);
            if z > 0 {
                triplets.push((i, g - n * n, -h2i));
            }
            if y > 0 {
                triplets.push((i, g - n, -h2i));
            }
            if x > 0 {
                triplets.push((i, g - 1, -h2i));
            }
            triplets.push((i, g, 6.0 * h2i));
            if x + 1 < n {
                triplets.push((i, g + 1, -h2i));
            }
            if y + 1 < n {
                triplets.push((i, g + n, -h2i));
            }
            if z + 1 < n {
                triplets.push((i, g + n * n, -h2i));
            }
        }
        CsrMatrix::from_triplets(end - begin, total, triplets)
    }

    fn read_rhs(&self, begin: usize, end: usize) -> Result<Vec<f64>, SolverError> {
        if end < begin || end > self.global_rows() {
            return Err(SolverError::InvalidInput(format!(
                "row range [{begin}, {end}) outside {} rows",
                self.global_rows()
            )));
        }
        Ok(vec![1.0; end - begin])
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::comm::ThreadWorld;

    #[test]
    fn poisson_rows_have_seven_point_stencils() {
        let source = Poisson3d::new(4);
        let full = source.read_rows(0, source.global_rows()).unwrap();
        // The center of the cube sees all six neighbors.
        let center = 1 + 4 + 16;
        assert_eq!(full.row(center).count(), 7);
        // A corner sees three.
        assert_eq!(full.row(0).count(), 4);
        let h2i = 9.0;
        assert_relative_eq!(
            *full.row(center).find(|(j, _)| *j == center).unwrap().1,
            6.0 * h2i
        );
    }

    #[test]
    fn strips_concatenate_to_the_full_matrix() {
        let source = Poisson3d::new(3);
        let full = source.read_rows(0, source.global_rows()).unwrap();
        let first = source.read_rows(0, 10).unwrap();
        let second = source.read_rows(10, source.global_rows()).unwrap();
        for g in 0..source.global_rows() {
            let reference: Vec<_> = full.row(g).map(|(j, v)| (j, *v)).collect();
            let strip: Vec<_> = if g < 10 {
                first.row(g).map(|(j, v)| (j, *v)).collect()
            } else {
                second.row(g - 10).map(|(j, v)| (j, *v)).collect()
            };
            assert_eq!(reference, strip);
        }
    }

    #[test]
    fn assemble_distributes_by_uniform_split() {
        let source = Poisson3d::new(4);
        let n = source.global_rows();
        let totals = ThreadWorld::run(3, |comm| {
            let (a, rhs) = assemble(comm, &source, 1).unwrap();
            assert_eq!(a.local_rows(), rhs.len());
            a.local_rows()
        });
        assert_eq!(totals.iter().sum::<usize>(), n);
    }

    #[test]
    fn in_memory_source_rejects_bad_ranges() {
        let matrix = CsrMatrix::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let source = InMemorySource::new(matrix, vec![1.0, 2.0]).unwrap();
        assert!(source.read_rows(1, 3).is_err());
        assert!(source.read_rhs(0, 3).is_err());
    }
}
