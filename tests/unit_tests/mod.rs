use cvfem::field::MemorySpace;
use cvfem::kernel::{ElemKernel, KernelSpec};
use cvfem::master_element::ScsMasterElement;
use cvfem::mesh::procedural::BLOCK_NAME;
use cvfem::mesh::{MeshBuilder, MeshDb};
use cvfem::options::{SolutionOptions, TimeIntegrator};
use cvfem::scratch::{ElemDataRequests, ScratchViews, StagingCounters};
use cvfem::topology::Topology;
use nalgebra::{DMatrix, DVector};

mod algorithm;
mod scratch;

/// Declares every field read by the continuity term, with unit density and momentum diagonal.
pub fn with_continuity_fields(builder: MeshBuilder, dim: usize) -> MeshBuilder {
    builder
        .field("velocity", dim, 0.0)
        .field("dpdx", dim, 0.0)
        .field("pressure", 1, 0.0)
        .field("density", 1, 1.0)
        .field("momentum_diag", 1, 1.0)
}

/// A mesh with a single element whose nodes are the reference nodes moved by `perturbation`.
pub fn single_element_mesh<T: Topology>(perturbation: &[f64]) -> MeshBuilder {
    let coordinates = T::REFERENCE_NODES
        .iter()
        .enumerate()
        .flat_map(|(n, x)| (0..T::N_DIM).map(move |d| x[d] + perturbation[n * T::N_DIM + d]))
        .collect();
    MeshBuilder::with_coordinates(T::N_DIM, coordinates).element_block(
        BLOCK_NAME,
        T::KIND,
        (0..T::NODES_PER_ELEMENT).collect(),
    )
}

pub fn node_coordinates(mesh: &MeshDb) -> Vec<Vec<f64>> {
    let coordinates = mesh.meta_data().get_field_ordinal("coordinates").unwrap();
    let field = mesh.fields().read_synced(coordinates, MemorySpace::Host);
    let view = field.view(MemorySpace::Host).unwrap();
    (0..mesh.num_nodes()).map(|node| view.entity(node).to_vec()).collect()
}

/// Sets the host values of a field from the coordinates of each node.
pub fn set_field<F>(mesh: &mut MeshDb, name: &str, mut f: F)
where
    F: FnMut(usize, &[f64], &mut [f64]),
{
    let coordinates = node_coordinates(mesh);
    let field = mesh.meta_data().get_field_ordinal(name).unwrap();
    mesh.set_field_on_host(field, |node, values| f(node, &coordinates[node], values));
}

/// Stages one element of the first block of `mesh`.
pub fn stage_element<T: Topology>(mesh: &MeshDb, requests: &ElemDataRequests<T>, element: usize) -> ScratchViews<T> {
    stage_element_with_counters(mesh, requests, element, &StagingCounters::default())
}

pub fn stage_element_with_counters<T: Topology>(
    mesh: &MeshDb,
    requests: &ElemDataRequests<T>,
    element: usize,
    counters: &StagingCounters,
) -> ScratchViews<T> {
    let layout = requests.finalize(mesh.meta_data()).unwrap();
    let master_element = ScsMasterElement::<T>::new();
    let guards: Vec<_> = layout
        .fields()
        .map(|field| mesh.fields().read_synced(field, MemorySpace::Device))
        .collect();
    let views: Vec<_> = guards
        .iter()
        .map(|guard| guard.view(MemorySpace::Device).unwrap())
        .collect();
    let mut scratch = ScratchViews::new(&layout, &master_element);
    let nodes = mesh.blocks()[0].element_nodes(element);
    scratch.stage(&master_element, &views, nodes, counters);
    scratch
}

/// Runs the given terms on one element of the first block and returns its local system.
pub fn element_contributions<T: Topology>(
    mesh: &MeshDb,
    specs: &[KernelSpec],
    options: &SolutionOptions,
    time_integrator: &TimeIntegrator,
    element: usize,
) -> (DMatrix<f64>, DVector<f64>) {
    let mut requests = ElemDataRequests::<T>::new();
    let mut kernels: Vec<_> = specs
        .iter()
        .map(|spec| spec.build(mesh.meta_data(), options, &mut requests).unwrap())
        .collect();
    let scratch = stage_element(mesh, &requests, element);

    let n = T::NODES_PER_ELEMENT;
    let mut lhs = DMatrix::zeros(n, n);
    let mut rhs = DVector::zeros(n);
    for kernel in &mut kernels {
        kernel.setup(time_integrator);
        kernel.execute(&mut lhs, &mut rhs, &scratch);
    }
    (lhs, rhs)
}
