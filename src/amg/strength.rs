//! Strength of connection and greedy aggregation.
//!
//! Aggregation runs on the locally owned connectivity only, so aggregates
//! never cross a rank boundary and the tentative prolongation needs no
//! communication to assemble.

use crate::linalg::{BlockValue, CsrMatrix};

/// Assignment of each local row to a local aggregate.
#[derive(Debug, Clone)]
pub struct Aggregates {
    /// Aggregate id per local row, in `0..count`.
    pub assign: Vec<usize>,
    /// Number of aggregates on this rank.
    pub count: usize,
}

/// Symmetrized strong-connection adjacency of the local part.
///
/// The edge (i, j) is strong when `|a_ij|^2 > eps^2 |a_ii| |a_jj|`, with
/// block magnitudes measured in the Frobenius norm.
pub fn strong_graph<V: BlockValue>(local: &CsrMatrix<V>, eps: f64) -> Vec<Vec<usize>> {
    let diag_norms: Vec<f64> = local
        .diagonal()
        .into_iter()
        .map(|d| d.map_or(0.0, |d| d.norm()))
        .collect();

    let mut adj = vec![Vec::new(); local.rows()];
    for i in 0..local.rows() {
        for (j, v) in local.row(i) {
            if j == i || j >= local.rows() {
                continue;
            }
            let mag = v.norm();
            if mag * mag > eps * eps * diag_norms[i] * diag_norms[j] {
                adj[i].push(j);
                adj[j].push(i);
            }
        }
    }
    for neighbors in &mut adj {
        neighbors.sort_unstable();
        neighbors.dedup();
    }
    adj
}

/// Greedy aggregation over a strong-connection graph.
///
/// First pass seeds an aggregate at every still-free row and absorbs its
/// free strong neighbors; second pass attaches leftovers to a neighboring
/// aggregate; rows that remain isolated become singletons.
pub fn aggregate(strong: &[Vec<usize>]) -> Aggregates {
    const UNDECIDED: usize = usize::MAX;
    let n = strong.len();
    let mut assign = vec![UNDECIDED; n];
    let mut count = 0;

    for i in 0..n {
        if assign[i] != UNDECIDED || strong[i].is_empty() {
            continue;
        }
        if strong[i].iter().any(|&j| assign[j] != UNDECIDED) {
            continue;
        }
        assign[i] = count;
        for &j in &strong[i] {
            assign[j] = count;
        }
        count += 1;
    }

    for i in 0..n {
        if assign[i] != UNDECIDED {
            continue;
        }
        if let Some(&j) = strong[i].iter().find(|&&j| assign[j] != UNDECIDED) {
            assign[i] = assign[j];
        }
    }

    for a in assign.iter_mut() {
        if *a == UNDECIDED {
            *a = count;
            count += 1;
        }
    }

    Aggregates { assign, count }
}
