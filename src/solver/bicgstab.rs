//! Preconditioned BiCGStab over a distributed operator.

use tracing::{debug, debug_span};

use crate::comm::Communicator;
use crate::config::SolverConfig;
use crate::distributed::DistributedMatrix;
use crate::errors::SolverError;
use crate::linalg::{BlockRhs, BlockValue};
use crate::solver::{Outcome, Preconditioner};

const BREAKDOWN_EPS: f64 = 1e-30;

/// Runs right-preconditioned BiCGStab on `A x = rhs`.
///
/// `x` carries the initial guess in and the last iterate out. Returns the
/// iteration count and final relative residual; exhausting the budget is a
/// normal outcome, a degenerate inner product is a [`SolverError::Breakdown`].
/// Collective.
pub fn solve<V, C, P>(
    a: &DistributedMatrix<V, C>,
    precond: &P,
    rhs: &[V::Rhs],
    x: &mut [V::Rhs],
    config: &SolverConfig,
) -> Result<Outcome, SolverError>
where
    V: BlockValue,
    C: Communicator,
    P: Preconditioner<V>,
{
    let span = debug_span!("bicgstab", rows = a.global_rows());
    let _guard = span.enter();

    if rhs.len() != a.local_rows() || x.len() != a.local_rows() {
        return Err(SolverError::DimensionMismatch(format!(
            "rhs has {} rows and x has {}, matrix strip has {}",
            rhs.len(),
            x.len(),
            a.local_rows()
        )));
    }

    let comm = a.comm();
    let dot = |u: &[V::Rhs], v: &[V::Rhs]| -> f64 {
        let local: f64 = u.iter().zip(v).map(|(ui, vi)| ui.dot(vi)).sum();
        comm.all_reduce_sum(local)
    };
    let zero = <V::Rhs as BlockRhs>::zero();

    let rhs_norm = dot(rhs, rhs).sqrt();
    if rhs_norm == 0.0 {
        x.fill(zero);
        return Ok(Outcome {
            iterations: 0,
            relative_residual: 0.0,
        });
    }

    // r = rhs - A x
    let mut r = rhs.to_vec();
    a.spmv(-1.0, x, 1.0, &mut r);
    let r0 = r.clone();

    let mut resid = dot(&r, &r).sqrt() / rhs_norm;
    if resid <= config.tolerance {
        return Ok(Outcome {
            iterations: 0,
            relative_residual: resid,
        });
    }

    let n = a.local_rows();
    let mut p = vec![zero; n];
    let mut v = vec![zero; n];
    let mut phat = vec![zero; n];
    let mut shat = vec![zero; n];
    let mut t = vec![zero; n];

    let mut rho_prev = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;

    for iteration in 1..=config.max_iterations {
        let rho = dot(&r0, &r);
        if rho.abs() < BREAKDOWN_EPS {
            return Err(SolverError::Breakdown {
                iteration,
                detail: "rho = (r0, r) vanished".into(),
            });
        }

        if iteration == 1 {
            p.copy_from_slice(&r);
        } else {
            let beta = (rho / rho_prev) * (alpha / omega);
            for i in 0..n {
                p[i] = r[i] + (p[i] - v[i].scale(omega)).scale(beta);
            }
        }

        precond.apply(&p, &mut phat);
        a.spmv(1.0, &phat, 0.0, &mut v);
        let r0v = dot(&r0, &v);
        if r0v.abs() < BREAKDOWN_EPS {
            return Err(SolverError::Breakdown {
                iteration,
                detail: "(r0, A p) vanished".into(),
            });
        }
        alpha = rho / r0v;

        // s = r - alpha v, reusing r.
        for i in 0..n {
            r[i] = r[i] - v[i].scale(alpha);
        }
        let s_norm = dot(&r, &r).sqrt();
        if s_norm / rhs_norm <= config.tolerance {
            for i in 0..n {
                x[i] = x[i] + phat[i].scale(alpha);
            }
            resid = s_norm / rhs_norm;
            debug!(iteration, resid, "converged at the half step");
            return Ok(Outcome {
                iterations: iteration,
                relative_residual: resid,
            });
        }

        precond.apply(&r, &mut shat);
        a.spmv(1.0, &shat, 0.0, &mut t);
        let tt = dot(&t, &t);
        if tt < BREAKDOWN_EPS {
            return Err(SolverError::Breakdown {
                iteration,
                detail: "(A s, A s) vanished".into(),
            });
        }
        omega = dot(&t, &r) / tt;

        for i in 0..n {
            x[i] = x[i] + phat[i].scale(alpha) + shat[i].scale(omega);
            r[i] = r[i] - t[i].scale(omega);
        }

        resid = dot(&r, &r).sqrt() / rhs_norm;
        debug!(iteration, resid);
        if resid <= config.tolerance {
            return Ok(Outcome {
                iterations: iteration,
                relative_residual: resid,
            });
        }
        if omega.abs() < BREAKDOWN_EPS {
            return Err(SolverError::Breakdown {
                iteration,
                detail: "omega vanished".into(),
            });
        }
        rho_prev = rho;
    }

    Ok(Outcome {
        iterations: config.max_iterations,
        relative_residual: resid,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::comm::{SingleRank, ThreadWorld};
    use crate::linalg::CsrMatrix;
    use crate::partition::Partition;
    use crate::solver::IdentityPreconditioner;

    fn laplace_strip(begin: usize, end: usize, n: usize) -> CsrMatrix<f64> {
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

    fn serial(n: usize) -> DistributedMatrix<f64, SingleRank> {
        let p = Partition::uniform_blocked(n, 1, 1);
        DistributedMatrix::from_strip(SingleRank::new(), p.clone(), p, laplace_strip(0, n, n))
            .unwrap()
    }

    #[test]
    fn zero_rhs_returns_the_zero_solution() {
        let a = serial(5);
        let rhs = vec![0.0; 5];
        let mut x = vec![3.0; 5];
        let outcome = solve(
            &a,
            &IdentityPreconditioner,
            &rhs,
            &mut x,
            &SolverConfig::default(),
        )
        .unwrap();
        assert_eq!(outcome.iterations, 0);
        assert_eq!(x, vec![0.0; 5]);
    }

    #[test]
    fn unpreconditioned_laplace_converges() {
        let n = 16;
        let a = serial(n);
        let x_true: Vec<f64> = (0..n).map(|i| (i as f64 * 0.4).cos()).collect();
        let mut rhs = vec![0.0; n];
        a.spmv(1.0, &x_true, 0.0, &mut rhs);

        let mut x = vec![0.0; n];
        let outcome = solve(
            &a,
            &IdentityPreconditioner,
            &rhs,
            &mut x,
            &SolverConfig::default(),
        )
        .unwrap();
        assert!(outcome.converged(1e-8));
        for (xi, ti) in x.iter().zip(&x_true) {
            assert_relative_eq!(xi, ti, epsilon = 1e-6);
        }
    }

    #[test]
    fn iteration_budget_exhaustion_is_not_an_error() {
        let n = 64;
        let a = serial(n);
        let rhs = vec![1.0; n];
        let mut x = vec![0.0; n];
        let config = SolverConfig {
            max_iterations: 2,
            tolerance: 1e-14,
        };
        let outcome = solve(&a, &IdentityPreconditioner, &rhs, &mut x, &config).unwrap();
        assert_eq!(outcome.iterations, 2);
        assert!(!outcome.converged(1e-14));
        assert!(outcome.relative_residual > 0.0);
    }

    #[test]
    fn singular_system_reports_breakdown() {
        // diag(1, 1, 0) with an inconsistent rhs degenerates (r0, A p).
        let p = Partition::uniform_blocked(3, 1, 1);
        let strip =
            CsrMatrix::from_triplets(3, 3, vec![(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        let a = DistributedMatrix::from_strip(SingleRank::new(), p.clone(), p, strip).unwrap();
        let rhs = vec![1.0, 1.0, 1.0];
        let mut x = vec![0.0; 3];
        let err = solve(
            &a,
            &IdentityPreconditioner,
            &rhs,
            &mut x,
            &SolverConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SolverError::Breakdown { .. }));
    }

    #[test]
    fn distributed_and_serial_runs_agree() {
        let n = 24;
        let x_true: Vec<f64> = (0..n).map(|i| 1.0 + (i % 5) as f64).collect();
        let a = serial(n);
        let mut rhs_full = vec![0.0; n];
        a.spmv(1.0, &x_true, 0.0, &mut rhs_full);

        let mut x_serial = vec![0.0; n];
        solve(
            &a,
            &IdentityPreconditioner,
            &rhs_full,
            &mut x_serial,
            &SolverConfig::default(),
        )
        .unwrap();

        let pieces = ThreadWorld::run(3, |comm| {
            let p = Partition::uniform_blocked(n, comm.size(), 1);
            let (begin, end) = p.range(comm.rank());
            let a = DistributedMatrix::from_strip(
                comm,
                p.clone(),
                p.clone(),
                laplace_strip(begin, end, n),
            )
            .unwrap();
            let mut x = vec![0.0; end - begin];
            solve(
                &a,
                &IdentityPreconditioner,
                &rhs_full[begin..end],
                &mut x,
                &SolverConfig::default(),
            )
            .unwrap();
            x
        });
        let stitched: Vec<f64> = pieces.into_iter().flatten().collect();
        for (a, b) in stitched.iter().zip(&x_serial) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }
}
