#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(clippy::all, clippy::cargo, clippy::nursery, missing_docs)]
#![doc = include_str!("../README.md")]

/// Message-passing abstraction and in-process transports.
pub mod comm;
/// Configuration values consumed by the solver core.
pub mod config;
/// Row-distributed sparse operators and the collective algebra over them.
pub mod distributed;
/// Error types shared between submodules.
pub mod errors;
/// Block-valued dense and sparse primitives.
pub mod linalg;
/// Row ownership, the initial split, and graph repartitioning.
pub mod partition;
/// Explicit scoped timing context.
pub mod profile;
/// Symmetric diagonal scaling of the distributed system.
pub mod scaling;
/// Row-range-addressable system suppliers.
pub mod source;

/// Smoothed-aggregation algebraic multigrid.
pub mod amg;
/// Preconditioned Krylov iteration and the solve pipeline.
pub mod solver;

/// Common exports for downstream crates.
pub mod prelude;
