//! Compressed sparse row storage over block values.

use std::collections::BTreeMap;

use crate::errors::SolverError;
use crate::linalg::block::{BlockRhs, BlockValue};

/// Sparse matrix in CSR layout whose entries are [`BlockValue`]s.
///
/// Row and column counts are in block units. Column indices within each row
/// are kept sorted and unique; the constructors enforce or establish this.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<V> {
    rows: usize,
    cols: usize,
    ptr: Vec<usize>,
    col: Vec<usize>,
    val: Vec<V>,
}

impl<V: BlockValue> CsrMatrix<V> {
    /// Builds a matrix from raw CSR arrays, validating their consistency.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        ptr: Vec<usize>,
        col: Vec<usize>,
        val: Vec<V>,
    ) -> Result<Self, SolverError> {
        if ptr.len() != rows + 1 {
            return Err(SolverError::InvalidInput(format!(
                "row pointer length {} does not match {} rows",
                ptr.len(),
                rows
            )));
        }
        if ptr.first() != Some(&0) || ptr.last() != Some(&col.len()) {
            return Err(SolverError::InvalidInput(
                "row pointers must start at 0 and end at nnz".into(),
            ));
        }
        if col.len() != val.len() {
            return Err(SolverError::InvalidInput(format!(
                "column index count {} does not match value count {}",
                col.len(),
                val.len()
            )));
        }
        for w in ptr.windows(2) {
            if w[0] > w[1] {
                return Err(SolverError::InvalidInput(
                    "row pointers must be non-decreasing".into(),
                ));
            }
        }
        for i in 0..rows {
            let row = &col[ptr[i]..ptr[i + 1]];
            for w in row.windows(2) {
                if w[0] >= w[1] {
                    return Err(SolverError::InvalidInput(format!(
                        "row {i} has unsorted or duplicate column indices"
                    )));
                }
            }
            if let Some(&last) = row.last() {
                if last >= cols {
                    return Err(SolverError::InvalidInput(format!(
                        "row {i} references column {last} beyond {cols} columns"
                    )));
                }
            }
        }
        Ok(Self {
            rows,
            cols,
            ptr,
            col,
            val,
        })
    }

    /// Builds a matrix from unordered `(row, col, value)` triplets.
    /// Duplicate coordinates are accumulated.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: impl IntoIterator<Item = (usize, usize, V)>,
    ) -> Result<Self, SolverError> {
        let mut row_maps: Vec<BTreeMap<usize, V>> = vec![BTreeMap::new(); rows];
        for (i, j, v) in triplets {
            if i >= rows || j >= cols {
                return Err(SolverError::InvalidInput(format!(
                    "triplet ({i}, {j}) outside a {rows} x {cols} matrix"
                )));
            }
            row_maps[i]
                .entry(j)
                .and_modify(|acc| *acc = *acc + v)
                .or_insert(v);
        }
        let mut ptr = Vec::with_capacity(rows + 1);
        let mut col = Vec::new();
        let mut val = Vec::new();
        ptr.push(0);
        for map in row_maps {
            for (j, v) in map {
                col.push(j);
                val.push(v);
            }
            ptr.push(col.len());
        }
        Ok(Self {
            rows,
            cols,
            ptr,
            col,
            val,
        })
    }

    /// The identity matrix of the given block dimension.
    pub fn identity(n: usize) -> Self {
        Self {
            rows: n,
            cols: n,
            ptr: (0..=n).collect(),
            col: (0..n).collect(),
            val: vec![V::identity(); n],
        }
    }

    /// An `rows x cols` matrix with no stored entries.
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            ptr: vec![0; rows + 1],
            col: Vec::new(),
            val: Vec::new(),
        }
    }

    /// Number of block rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of block columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored blocks.
    pub fn nnz(&self) -> usize {
        self.val.len()
    }

    /// Column indices and values of one row, paired.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, &V)> {
        let span = self.ptr[i]..self.ptr[i + 1];
        self.col[span.clone()].iter().copied().zip(&self.val[span])
    }

    /// Raw row pointer array.
    pub fn ptr(&self) -> &[usize] {
        &self.ptr
    }

    /// Raw column index array.
    pub fn col(&self) -> &[usize] {
        &self.col
    }

    /// Raw value array.
    pub fn val(&self) -> &[V] {
        &self.val
    }

    /// The diagonal entry of each row, where present.
    pub fn diagonal(&self) -> Vec<Option<V>> {
        (0..self.rows)
            .map(|i| self.row(i).find(|(j, _)| *j == i).map(|(_, v)| *v))
            .collect()
    }

    /// `y = alpha * A * x + beta * y` over the local index space.
    pub fn spmv(&self, alpha: f64, x: &[V::Rhs], beta: f64, y: &mut [V::Rhs]) {
        debug_assert_eq!(x.len(), self.cols);
        debug_assert_eq!(y.len(), self.rows);
        for i in 0..self.rows {
            let mut acc = <V::Rhs as BlockRhs>::zero();
            for (j, v) in self.row(i) {
                acc = acc + v.mul_rhs(&x[j]);
            }
            y[i] = if beta == 0.0 {
                acc.scale(alpha)
            } else {
                acc.scale(alpha) + y[i].scale(beta)
            };
        }
    }

    /// The transpose, with each block value transposed as well.
    pub fn transpose_local(&self) -> Self {
        let mut counts = vec![0usize; self.cols];
        for &j in &self.col {
            counts[j] += 1;
        }
        let mut ptr = Vec::with_capacity(self.cols + 1);
        ptr.push(0);
        for c in &counts {
            ptr.push(ptr.last().copied().unwrap_or(0) + c);
        }
        let mut next = ptr[..self.cols].to_vec();
        let mut col = vec![0usize; self.nnz()];
        let mut val = vec![V::zero(); self.nnz()];
        for i in 0..self.rows {
            for (j, v) in self.row(i) {
                let slot = next[j];
                next[j] += 1;
                col[slot] = i;
                val[slot] = v.transpose();
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            ptr,
            col,
            val,
        }
    }

    /// Applies `f` to every stored value, keeping the sparsity pattern.
    pub fn map_values<W: BlockValue>(&self, f: impl Fn(&V) -> W) -> CsrMatrix<W> {
        CsrMatrix {
            rows: self.rows,
            cols: self.cols,
            ptr: self.ptr.clone(),
            col: self.col.clone(),
            val: self.val.iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn sample() -> CsrMatrix<f64> {
        // [2 1 0]
        // [0 3 0]
        // [4 0 5]
        CsrMatrix::from_parts(
            3,
            3,
            vec![0, 2, 3, 5],
            vec![0, 1, 1, 0, 2],
            vec![2.0, 1.0, 3.0, 4.0, 5.0],
        )
        .unwrap()
    }

    #[test]
    fn from_parts_rejects_unsorted_columns() {
        let err = CsrMatrix::<f64>::from_parts(1, 3, vec![0, 2], vec![2, 0], vec![1.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, SolverError::InvalidInput(_)));
    }

    #[test]
    fn from_triplets_accumulates_duplicates() {
        let a = CsrMatrix::from_triplets(2, 2, vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 4.0)]).unwrap();
        assert_eq!(a.nnz(), 2);
        assert_relative_eq!(*a.row(0).next().unwrap().1, 3.0);
    }

    #[test]
    fn spmv_matches_dense_product() {
        let a = sample();
        let x = vec![1.0, 2.0, 3.0];
        let mut y = vec![0.0; 3];
        a.spmv(1.0, &x, 0.0, &mut y);
        assert_relative_eq!(y[0], 4.0);
        assert_relative_eq!(y[1], 6.0);
        assert_relative_eq!(y[2], 19.0);
    }

    #[test]
    fn spmv_honors_alpha_beta() {
        let a = sample();
        let x = vec![1.0, 1.0, 1.0];
        let mut y = vec![10.0, 10.0, 10.0];
        a.spmv(2.0, &x, 0.5, &mut y);
        assert_relative_eq!(y[0], 11.0);
        assert_relative_eq!(y[1], 11.0);
        assert_relative_eq!(y[2], 23.0);
    }

    #[test]
    fn transpose_twice_is_identity() {
        let a = sample();
        assert_eq!(a.transpose_local().transpose_local(), a);
    }

    #[test]
    fn diagonal_reports_missing_entries() {
        let a = CsrMatrix::from_triplets(2, 2, vec![(0, 1, 1.0)]).unwrap();
        let d = a.diagonal();
        assert!(d[0].is_none());
        assert!(d[1].is_none());
    }
}
