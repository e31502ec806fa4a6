//! Topology-generic control-volume finite element (CVFEM) terms and their parallel assembly.
//!
//! Terms such as [`kernel::ContinuityAdvElemKernel`] are written once, generically over a
//! [`topology::Topology`] tag, and declare the data they need on a shared
//! [`scratch::ElemDataRequests`]. An [`algorithm::AssembleElemSolverAlgorithm`] stages that data
//! once per element, runs every term and scatters the local contributions into a
//! [`assembly::CsrLinearSystem`]. Nodal fields live in a [`mesh::MeshDb`] as
//! [`field::DualField`]s, which track whether the host or the device copy is current.

pub mod algorithm;
pub mod assembly;
pub mod error;
pub mod field;
pub mod kernel;
pub mod master_element;
pub mod mesh;
pub mod options;
pub mod scratch;
pub mod selector;
pub mod topology;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
