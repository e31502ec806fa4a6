//! Drivers running terms over selected mesh entities.
use crate::assembly::CsrLinearSystem;
use crate::mesh::MeshDb;
use crate::options::TimeIntegrator;

mod assemble_elem;
mod eff_diff_flux_coeff;

pub use assemble_elem::*;
pub use eff_diff_flux_coeff::*;

/// Everything an algorithm may touch during one pass.
#[derive(Debug)]
pub struct PassContext<'a> {
    pub mesh: &'a MeshDb,
    pub time_integrator: TimeIntegrator,
    /// Target of element contributions. Nodal algorithms leave it untouched.
    pub linear_system: Option<&'a mut CsrLinearSystem>,
}

impl<'a> PassContext<'a> {
    pub fn new(mesh: &'a MeshDb, time_integrator: TimeIntegrator) -> Self {
        Self {
            mesh,
            time_integrator,
            linear_system: None,
        }
    }

    pub fn with_linear_system(mut self, linear_system: &'a mut CsrLinearSystem) -> Self {
        self.linear_system = Some(linear_system);
        self
    }
}

/// A unit of work executed once per pass over a fixed set of mesh entities.
///
/// Everything that can fail because of the way the algorithm is configured fails when it is
/// constructed. Errors returned from `execute` indicate that the mesh or its fields are not in
/// the state the pass requires.
pub trait Algorithm {
    fn execute(&mut self, context: &mut PassContext<'_>) -> eyre::Result<()>;

    /// Re-resolves the set of entities the algorithm operates on, after the mesh has changed.
    fn reconfigure(&mut self, mesh: &MeshDb);
}
