//! cvfem-paradis
//! =============
//!
//! Parallel processing of node-disjoint element groups.
//!
//! Element assembly scatters each element's local contributions into the rows of its nodes.
//! Two elements that share a node cannot be scattered concurrently without synchronization.
//! This crate partitions elements into *colors*, groups in which no two elements share a node,
//! and provides the (unsafe) row access needed to exploit that disjointness from several
//! threads at once.

pub mod coloring;
pub mod rows;

pub use coloring::{sequential_greedy_coloring, ElementColoring, NotDisjointError};
pub use rows::{DisjointRowAccess, RowMut};
