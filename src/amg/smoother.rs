//! Diagonal sparse approximate inverse relaxation (SPAI-0).

use crate::comm::Communicator;
use crate::distributed::DistributedMatrix;
use crate::errors::SolverError;
use crate::linalg::BlockValue;

/// Per-row approximate inverse scale, one block per owned row.
///
/// The scale minimizes the Frobenius deviation of `M * A` from the identity
/// over diagonal `M`: for scalar values `m_i = a_ii / sum_j a_ij^2`, and the
/// block form replaces the quotient with a small Gram-matrix solve.
#[derive(Debug, Clone)]
pub struct Spai0<V> {
    m: Vec<V>,
}

impl<V: BlockValue> Spai0<V> {
    /// Computes the scale from the full local strip, halo columns included.
    pub fn build<C: Communicator>(a: &DistributedMatrix<V, C>) -> Result<Self, SolverError> {
        let diag = a.diagonal();
        let mut m = Vec::with_capacity(a.local_rows());
        for i in 0..a.local_rows() {
            let Some(d) = diag[i] else {
                return Err(SolverError::InvalidInput(format!(
                    "relaxation requires a diagonal entry in every row, row {i} has none"
                )));
            };
            let mut gram = V::zero();
            for (_, v) in a.row_global(i) {
                gram = gram + *v * v.transpose();
            }
            let scale = match gram.try_inverse() {
                Some(gram_inv) => d.transpose() * gram_inv,
                None => d.try_inverse().unwrap_or_else(V::identity),
            };
            m.push(scale);
        }
        Ok(Self { m })
    }

    /// `z = M * r`, the relaxation from a zero initial guess.
    pub fn apply_first(&self, r: &[V::Rhs], z: &mut [V::Rhs]) {
        for ((zi, mi), ri) in z.iter_mut().zip(&self.m).zip(r) {
            *zi = mi.mul_rhs(ri);
        }
    }

    /// `z += M * (r - A * z)`, one relaxation sweep. Collective.
    pub fn sweep<C: Communicator>(
        &self,
        a: &DistributedMatrix<V, C>,
        r: &[V::Rhs],
        z: &mut [V::Rhs],
    ) {
        let mut t = r.to_vec();
        a.spmv(-1.0, z, 1.0, &mut t);
        for ((zi, mi), ti) in z.iter_mut().zip(&self.m).zip(&t) {
            *zi = *zi + mi.mul_rhs(ti);
        }
    }
}
