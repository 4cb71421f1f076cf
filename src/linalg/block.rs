//! Fixed-size block values anchored on `nalgebra`.
//!
//! Every matrix in this crate stores [`BlockValue`]s: small dense square
//! matrices with plain scalars as the 1×1 special case. The matching vector
//! unit is [`BlockRhs`]. Block-structured systems (elasticity, coupled PDE
//! systems) use `SMatrix<f64, B, B>` values with `SVector<f64, B>`
//! right-hand sides; scalar systems use `f64` for both.
//!
//! The reduced-precision twin of each value type (`f64 -> f32`) backs the
//! mixed-precision preconditioner hierarchy; conversions cross the boundary
//! exactly once per preconditioner application.

use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

use nalgebra::{SMatrix, SVector};

use crate::errors::SolverError;

/// Vector-side block unit: a fixed-size column of scalars.
///
/// All scalar coefficients flowing through the Krylov iteration (dot
/// products, step lengths) are global `f64` quantities regardless of the
/// block's own precision.
pub trait BlockRhs:
    Copy + Debug + PartialEq + Send + Sync + 'static + Add<Output = Self> + Sub<Output = Self>
{
    /// Number of scalar lanes in one block.
    const LANES: usize;

    /// The additive identity.
    fn zero() -> Self;

    /// `self * a` with a global scalar coefficient.
    fn scale(&self, a: f64) -> Self;

    /// Inner product of two blocks, accumulated in `f64`.
    fn dot(&self, other: &Self) -> f64;

    /// Reads one block from a flat scalar slice of length `LANES`.
    fn from_flat(chunk: &[f64]) -> Self;

    /// Writes this block into a flat scalar slice of length `LANES`.
    fn write_flat(&self, chunk: &mut [f64]);
}

/// Matrix-side block unit: a fixed-size square matrix of scalars.
pub trait BlockValue:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
{
    /// The matching vector block.
    type Rhs: BlockRhs;
    /// Reduced-precision twin used by the preconditioner hierarchy.
    type Reduced: BlockValue;

    /// Side length of the block (`Rhs::LANES`).
    const SIDE: usize;

    /// The additive identity.
    fn zero() -> Self;

    /// The multiplicative identity.
    fn identity() -> Self;

    /// The transposed block.
    fn transpose(&self) -> Self;

    /// Inverse of the block, when it is invertible.
    fn try_inverse(&self) -> Option<Self>;

    /// Frobenius norm, as `f64`.
    fn norm(&self) -> f64;

    /// `self * a` with a global scalar coefficient.
    fn scale(&self, a: f64) -> Self;

    /// Matrix-vector action on one right-hand-side block.
    fn mul_rhs(&self, x: &Self::Rhs) -> Self::Rhs;

    /// Scalar entry at `(i, j)`, for dense expansion of small matrices.
    fn entry(&self, i: usize, j: usize) -> f64;

    /// Replaces each diagonal scalar d with `1/sqrt(d)` (1.0 when d <= 0)
    /// and zeroes the off-diagonal part. This is the pointwise unit-diagonal
    /// scaling factor.
    fn inv_sqrt_diag(&self) -> Self;

    /// Conversion into the reduced-precision twin.
    fn reduce(&self) -> Self::Reduced;

    /// Right-hand-side conversion into the reduced-precision space.
    fn reduce_rhs(r: &Self::Rhs) -> <Self::Reduced as BlockValue>::Rhs;

    /// Right-hand-side conversion back to full precision.
    fn promote_rhs(r: &<Self::Reduced as BlockValue>::Rhs) -> Self::Rhs;
}

macro_rules! impl_scalar_rhs {
    ($t:ty) => {
        impl BlockRhs for $t {
            const LANES: usize = 1;

            fn zero() -> Self {
                0.0
            }

            fn scale(&self, a: f64) -> Self {
                (*self as f64 * a) as $t
            }

            fn dot(&self, other: &Self) -> f64 {
                *self as f64 * *other as f64
            }

            fn from_flat(chunk: &[f64]) -> Self {
                chunk[0] as $t
            }

            fn write_flat(&self, chunk: &mut [f64]) {
                chunk[0] = *self as f64;
            }
        }
    };
}

impl_scalar_rhs!(f64);
impl_scalar_rhs!(f32);

macro_rules! impl_scalar_value {
    ($t:ty) => {
        impl BlockValue for $t {
            type Rhs = $t;
            type Reduced = f32;

            const SIDE: usize = 1;

            fn zero() -> Self {
                0.0
            }

            fn identity() -> Self {
                1.0
            }

            fn transpose(&self) -> Self {
                *self
            }

            fn try_inverse(&self) -> Option<Self> {
                if *self == 0.0 {
                    None
                } else {
                    Some(1.0 / *self)
                }
            }

            fn norm(&self) -> f64 {
                (*self as f64).abs()
            }

            fn scale(&self, a: f64) -> Self {
                (*self as f64 * a) as $t
            }

            fn mul_rhs(&self, x: &Self::Rhs) -> Self::Rhs {
                *self * *x
            }

            fn entry(&self, _i: usize, _j: usize) -> f64 {
                *self as f64
            }

            fn inv_sqrt_diag(&self) -> Self {
                if *self > 0.0 {
                    (1.0 / (*self as f64).sqrt()) as $t
                } else {
                    1.0
                }
            }

            fn reduce(&self) -> f32 {
                *self as f32
            }

            fn reduce_rhs(r: &Self::Rhs) -> f32 {
                *r as f32
            }

            fn promote_rhs(r: &f32) -> Self::Rhs {
                *r as $t
            }
        }
    };
}

impl_scalar_value!(f64);
impl_scalar_value!(f32);

impl<const B: usize> BlockRhs for SVector<f64, B> {
    const LANES: usize = B;

    fn zero() -> Self {
        SVector::zeros()
    }

    fn scale(&self, a: f64) -> Self {
        self * a
    }

    fn dot(&self, other: &Self) -> f64 {
        nalgebra::Matrix::dot(self, other)
    }

    fn from_flat(chunk: &[f64]) -> Self {
        SVector::from_column_slice(chunk)
    }

    fn write_flat(&self, chunk: &mut [f64]) {
        chunk.copy_from_slice(self.as_slice());
    }
}

impl<const B: usize> BlockRhs for SVector<f32, B> {
    const LANES: usize = B;

    fn zero() -> Self {
        SVector::zeros()
    }

    fn scale(&self, a: f64) -> Self {
        self * a as f32
    }

    fn dot(&self, other: &Self) -> f64 {
        self.iter()
            .zip(other.iter())
            .map(|(x, y)| *x as f64 * *y as f64)
            .sum()
    }

    fn from_flat(chunk: &[f64]) -> Self {
        SVector::from_iterator(chunk.iter().map(|&x| x as f32))
    }

    fn write_flat(&self, chunk: &mut [f64]) {
        for (dst, src) in chunk.iter_mut().zip(self.iter()) {
            *dst = *src as f64;
        }
    }
}

impl<const B: usize> BlockValue for SMatrix<f64, B, B> {
    type Rhs = SVector<f64, B>;
    type Reduced = SMatrix<f32, B, B>;

    const SIDE: usize = B;

    fn zero() -> Self {
        SMatrix::zeros()
    }

    fn identity() -> Self {
        SMatrix::identity()
    }

    fn transpose(&self) -> Self {
        nalgebra::SquareMatrix::transpose(self)
    }

    fn try_inverse(&self) -> Option<Self> {
        nalgebra::SquareMatrix::try_inverse(*self)
    }

    fn norm(&self) -> f64 {
        nalgebra::Matrix::norm(self)
    }

    fn scale(&self, a: f64) -> Self {
        self * a
    }

    fn mul_rhs(&self, x: &Self::Rhs) -> Self::Rhs {
        self * x
    }

    fn entry(&self, i: usize, j: usize) -> f64 {
        self[(i, j)]
    }

    fn inv_sqrt_diag(&self) -> Self {
        let mut out = SMatrix::zeros();
        for k in 0..B {
            let d = self[(k, k)];
            out[(k, k)] = if d > 0.0 { 1.0 / d.sqrt() } else { 1.0 };
        }
        out
    }

    fn reduce(&self) -> Self::Reduced {
        self.map(|x| x as f32)
    }

    fn reduce_rhs(r: &Self::Rhs) -> SVector<f32, B> {
        r.map(|x| x as f32)
    }

    fn promote_rhs(r: &SVector<f32, B>) -> Self::Rhs {
        r.map(|x| x as f64)
    }
}

impl<const B: usize> BlockValue for SMatrix<f32, B, B> {
    type Rhs = SVector<f32, B>;
    type Reduced = SMatrix<f32, B, B>;

    const SIDE: usize = B;

    fn zero() -> Self {
        SMatrix::zeros()
    }

    fn identity() -> Self {
        SMatrix::identity()
    }

    fn transpose(&self) -> Self {
        nalgebra::SquareMatrix::transpose(self)
    }

    fn try_inverse(&self) -> Option<Self> {
        nalgebra::SquareMatrix::try_inverse(*self)
    }

    fn norm(&self) -> f64 {
        nalgebra::Matrix::norm(self) as f64
    }

    fn scale(&self, a: f64) -> Self {
        self * a as f32
    }

    fn mul_rhs(&self, x: &Self::Rhs) -> Self::Rhs {
        self * x
    }

    fn entry(&self, i: usize, j: usize) -> f64 {
        self[(i, j)] as f64
    }

    fn inv_sqrt_diag(&self) -> Self {
        let mut out = SMatrix::zeros();
        for k in 0..B {
            let d = self[(k, k)];
            out[(k, k)] = if d > 0.0 { 1.0 / d.sqrt() } else { 1.0 };
        }
        out
    }

    fn reduce(&self) -> Self::Reduced {
        *self
    }

    fn reduce_rhs(r: &Self::Rhs) -> SVector<f32, B> {
        *r
    }

    fn promote_rhs(r: &SVector<f32, B>) -> Self::Rhs {
        *r
    }
}

/// Reinterprets a flat scalar buffer as a vector of right-hand-side blocks.
///
/// This is the explicit, validating replacement for pointer
/// reinterpretation: the buffer length must be a multiple of the block lane
/// count or the conversion fails.
pub fn to_blocks<R: BlockRhs>(flat: &[f64]) -> Result<Vec<R>, SolverError> {
    if flat.len() % R::LANES != 0 {
        return Err(SolverError::InvalidInput(format!(
            "buffer length {} is not a multiple of the block size {}",
            flat.len(),
            R::LANES
        )));
    }
    Ok(flat.chunks_exact(R::LANES).map(R::from_flat).collect())
}

/// Flattens a vector of right-hand-side blocks back into scalars.
pub fn from_blocks<R: BlockRhs>(blocks: &[R]) -> Vec<f64> {
    let mut flat = vec![0.0; blocks.len() * R::LANES];
    for (block, chunk) in blocks.iter().zip(flat.chunks_exact_mut(R::LANES)) {
        block.write_flat(chunk);
    }
    flat
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{SMatrix, SVector};

    use super::*;

    #[test]
    fn scalar_blocks_roundtrip_flat_buffers() {
        let flat = vec![1.0, -2.0, 3.5];
        let blocks: Vec<f64> = to_blocks(&flat).unwrap();
        assert_eq!(blocks, flat);
        assert_eq!(from_blocks(&blocks), flat);
    }

    #[test]
    fn vector_blocks_reject_ragged_buffers() {
        let flat = vec![1.0, 2.0, 3.0];
        let err = to_blocks::<SVector<f64, 2>>(&flat).unwrap_err();
        assert!(matches!(err, SolverError::InvalidInput(_)));
    }

    #[test]
    fn vector_blocks_roundtrip_flat_buffers() {
        let flat = vec![1.0, 2.0, 3.0, 4.0];
        let blocks: Vec<SVector<f64, 2>> = to_blocks(&flat).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_relative_eq!(blocks[1][0], 3.0);
        assert_eq!(from_blocks(&blocks), flat);
    }

    #[test]
    fn block_matrix_inverse_matches_identity() {
        let m = SMatrix::<f64, 2, 2>::new(4.0, 1.0, 2.0, 3.0);
        let inv = BlockValue::try_inverse(&m).unwrap();
        let id = m * inv;
        assert_relative_eq!(id[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(id[(0, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn inv_sqrt_diag_scales_unit_diagonal() {
        let m = SMatrix::<f64, 2, 2>::new(4.0, 1.0, 1.0, 9.0);
        let d = m.inv_sqrt_diag();
        assert_relative_eq!(d[(0, 0)], 0.5);
        assert_relative_eq!(d[(1, 1)], 1.0 / 3.0);
        assert_relative_eq!(d[(0, 1)], 0.0);
    }

    #[test]
    fn precision_reduction_roundtrips_within_f32() {
        let v = SVector::<f64, 3>::new(1.0, 0.5, -0.25);
        let reduced = SMatrix::<f64, 3, 3>::reduce_rhs(&v);
        let promoted = SMatrix::<f64, 3, 3>::promote_rhs(&reduced);
        for k in 0..3 {
            assert_relative_eq!(promoted[k], v[k], epsilon = 1e-6);
        }
    }
}
