use crate::algorithm::{Algorithm, PassContext};
use crate::assembly::{sort_permutation, sum_into_disjoint_rows};
use crate::dispatch_topology;
use crate::error::ConfigError;
use crate::field::{FieldView, MemorySpace};
use crate::kernel::{ElemKernel, ElemKernelVariant, KernelSpec};
use crate::master_element::ScsMasterElement;
use crate::mesh::{MeshDb, PartOrdinal};
use crate::options::SolutionOptions;
use crate::scratch::{ElemDataRequests, ScratchLayout, ScratchViews, StagingCounters, StagingCounts};
use crate::selector::Selector;
use crate::topology::Topology;
use cvfem_paradis::{sequential_greedy_coloring, ElementColoring};
use eyre::{eyre, WrapErr};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// How local contributions are added to the global system.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScatterStrategy {
    /// One element at a time on the calling thread.
    #[default]
    Serial,
    /// Elements are partitioned into colors whose elements share no nodes. Colors are processed
    /// one after another, the elements of a color in parallel.
    Colored,
}

/// Per-thread buffers of an element pass.
#[derive(Debug)]
struct ElementWorkspace<T: Topology> {
    scratch: ScratchViews<T>,
    lhs: DMatrix<f64>,
    rhs: DVector<f64>,
    sorted_permutation: Vec<usize>,
}

impl<T: Topology> ElementWorkspace<T> {
    fn new(layout: &ScratchLayout<T>, master_element: &ScsMasterElement<T>) -> Self {
        let n = T::NODES_PER_ELEMENT;
        Self {
            scratch: ScratchViews::new(layout, master_element),
            lhs: DMatrix::zeros(n, n),
            rhs: DVector::zeros(n),
            sorted_permutation: Vec::with_capacity(n),
        }
    }

    fn evaluate(
        &mut self,
        master_element: &ScsMasterElement<T>,
        fields: &[FieldView<'_>],
        element_nodes: &[usize],
        kernels: &[ElemKernelVariant<T>],
        counters: &StagingCounters,
    ) {
        self.scratch
            .stage(master_element, fields, element_nodes, counters);
        self.lhs.fill(0.0);
        self.rhs.fill(0.0);
        for kernel in kernels {
            kernel.execute(&mut self.lhs, &mut self.rhs, &self.scratch);
        }
    }
}

/// Assembles the contributions of a set of terms over the locally owned elements of one block.
///
/// All terms share one data staging per element: each requested field is gathered and each
/// reference-element quantity is evaluated once per element.
#[derive(Debug)]
pub struct AssembleElemSolverAlgorithm<T: Topology> {
    part: PartOrdinal,
    selector: Selector,
    strategy: ScatterStrategy,
    elements: Vec<usize>,
    coloring: ElementColoring,
    master_element: ScsMasterElement<T>,
    layout: ScratchLayout<T>,
    kernels: Vec<ElemKernelVariant<T>>,
    workspaces: ThreadLocal<RefCell<ElementWorkspace<T>>>,
    counters: StagingCounters,
}

impl<T: Topology> AssembleElemSolverAlgorithm<T> {
    /// Builds the terms described by `kernels` for the block named `part_name`.
    pub fn new(
        mesh: &MeshDb,
        part_name: &str,
        options: &SolutionOptions,
        kernels: &[KernelSpec],
        strategy: ScatterStrategy,
    ) -> Result<Self, ConfigError> {
        let meta = mesh.meta_data();
        let part = meta.get_part_ordinal(part_name)?;
        let mut requests = ElemDataRequests::new();
        let kernels = kernels
            .iter()
            .map(|spec| spec.build::<T>(meta, options, &mut requests))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_kernels(mesh, part, &requests, kernels, strategy)
    }

    /// Creates the algorithm from terms that have registered their data requirements on `requests`.
    ///
    /// Fails with [`ConfigError::ForeignDataRequests`] if a term declared its data elsewhere.
    pub fn from_kernels(
        mesh: &MeshDb,
        part: PartOrdinal,
        requests: &ElemDataRequests<T>,
        kernels: Vec<ElemKernelVariant<T>>,
        strategy: ScatterStrategy,
    ) -> Result<Self, ConfigError> {
        let meta = mesh.meta_data();
        let part_name = meta.part_name(part);
        let block = mesh.block(part).ok_or_else(|| ConfigError::UnknownPart {
            name: part_name.to_string(),
        })?;
        if block.topology() != T::KIND {
            return Err(ConfigError::TopologyMismatch {
                part: part_name.to_string(),
                expected: T::KIND,
                found: block.topology(),
            });
        }

        if let Some(index) = kernels
            .iter()
            .position(|kernel| kernel.data_requests() != requests.id())
        {
            return Err(ConfigError::ForeignDataRequests { index });
        }

        let layout = requests.finalize(meta)?;
        let mut algorithm = Self {
            part,
            selector: Selector::locally_owned() & Selector::part(part),
            strategy,
            elements: Vec::new(),
            coloring: ElementColoring::default(),
            master_element: ScsMasterElement::new(),
            layout,
            kernels,
            workspaces: ThreadLocal::new(),
            counters: StagingCounters::default(),
        };
        algorithm.reconfigure(mesh);
        info!(
            "Created element assembly on part `{}` ({}) with {} terms gathering {} fields",
            part_name,
            T::KIND,
            algorithm.kernels.len(),
            algorithm.layout.num_fields()
        );
        Ok(algorithm)
    }

    pub fn kernels(&self) -> &[ElemKernelVariant<T>] {
        &self.kernels
    }

    /// Block-local indices of the elements the algorithm assembles.
    pub fn selected_elements(&self) -> &[usize] {
        &self.elements
    }

    pub fn coloring(&self) -> &ElementColoring {
        &self.coloring
    }

    /// Staging work done by the most recent pass.
    pub fn staging_counts(&self) -> StagingCounts {
        self.counters.counts()
    }
}

impl<T: Topology> Algorithm for AssembleElemSolverAlgorithm<T> {
    fn execute(&mut self, context: &mut PassContext<'_>) -> eyre::Result<()> {
        let mesh = context.mesh;
        let meta = mesh.meta_data();
        let system = context
            .linear_system
            .as_deref_mut()
            .ok_or_else(|| eyre!("element assembly requires a linear system"))?;
        let block = mesh
            .block(self.part)
            .ok_or_else(|| eyre!("part `{}` has no element block", meta.part_name(self.part)))?;

        for kernel in &mut self.kernels {
            kernel.setup(&context.time_integrator);
        }
        self.counters.reset();

        // Inputs are brought up to date on the device before they are read
        let guards: Vec<_> = self
            .layout
            .fields()
            .map(|field| mesh.fields().read_synced(field, MemorySpace::Device))
            .collect();
        let views = guards
            .iter()
            .zip(self.layout.fields())
            .map(|(guard, field)| {
                guard
                    .view(MemorySpace::Device)
                    .wrap_err_with(|| format!("failed to read field `{}`", meta.field_name(field)))
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        let layout = &self.layout;
        let master_element = &self.master_element;
        let kernels = &self.kernels;
        let counters = &self.counters;
        let new_workspace = || RefCell::new(ElementWorkspace::new(layout, master_element));

        match self.strategy {
            ScatterStrategy::Serial => {
                let mut ws = self.workspaces.get_or(new_workspace).borrow_mut();
                for &element in &self.elements {
                    let nodes = block.element_nodes(element);
                    ws.evaluate(master_element, &views, nodes, kernels, counters);
                    system.sum_into(nodes, &ws.lhs, &ws.rhs)?;
                }
            }
            ScatterStrategy::Colored => {
                let rows = system.disjoint_rows();
                let workspaces = &self.workspaces;
                self.coloring.par_try_for_each(|element| {
                    let ws = &mut *workspaces.get_or(new_workspace).borrow_mut();
                    let nodes = block.element_nodes(element);
                    ws.evaluate(master_element, &views, nodes, kernels, counters);
                    sort_permutation(&mut ws.sorted_permutation, nodes);
                    // Safety: elements of the same color share no nodes, and colors are
                    // processed one at a time
                    unsafe { sum_into_disjoint_rows(&rows, nodes, &ws.sorted_permutation, &ws.lhs, &ws.rhs) }
                })?;
            }
        }

        debug!(
            "Assembled {} elements of part `{}` ({:?})",
            self.elements.len(),
            meta.part_name(self.part),
            self.counters.counts()
        );
        Ok(())
    }

    fn reconfigure(&mut self, mesh: &MeshDb) {
        let part_name = mesh.meta_data().part_name(self.part);
        let Some(block) = mesh.block(self.part) else {
            warn!("Part `{}` has no element block, no elements selected", part_name);
            self.elements.clear();
            self.coloring = ElementColoring::default();
            return;
        };

        self.elements = self.selector.select_elements(mesh, block);
        self.coloring = match self.strategy {
            ScatterStrategy::Serial => ElementColoring::default(),
            ScatterStrategy::Colored => {
                sequential_greedy_coloring(self.elements.iter().map(|&e| (e, block.element_nodes(e))))
            }
        };

        if self.elements.is_empty() {
            warn!("No elements selected on part `{}`", part_name);
        } else {
            info!(
                "Selected {} of {} elements on part `{}` in {} colors",
                self.elements.len(),
                block.num_elements(),
                part_name,
                self.coloring.num_colors()
            );
        }
    }
}

/// Creates an element assembly algorithm for the block named `part_name`, instantiated for the
/// topology of the block.
pub fn create_assemble_elem_solver_algorithm(
    mesh: &MeshDb,
    part_name: &str,
    options: &SolutionOptions,
    kernels: &[KernelSpec],
    strategy: ScatterStrategy,
) -> Result<Box<dyn Algorithm + Send>, ConfigError> {
    let meta = mesh.meta_data();
    let part = meta.get_part_ordinal(part_name)?;
    let block = mesh.block(part).ok_or_else(|| ConfigError::UnknownPart {
        name: part_name.to_string(),
    })?;
    dispatch_topology!(block.topology(), T => {
        let algorithm = AssembleElemSolverAlgorithm::<T>::new(mesh, part_name, options, kernels, strategy)?;
        Box::new(algorithm) as Box<dyn Algorithm + Send>
    })
}
