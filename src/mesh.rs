//! A small in-memory mesh database.
//!
//! The kernels and algorithms only need a few things from the mesh: element blocks with their
//! topology and connectivity, the parallel status of nodes and elements, and nodal fields that
//! are resolved by name once and accessed by ordinal afterwards. [`MeshDb`] provides exactly
//! that for a single rank; ownership and sharing statuses are assigned by whoever partitions
//! the mesh.
use crate::error::ConfigError;
use crate::field::{DualField, FieldOrdinal, MemorySpace};
use crate::topology::TopologyKind;
use fixedbitset::FixedBitSet;
use itertools::Itertools;
use log::info;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub mod procedural;

/// Parallel status of a mesh entity on this rank.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityStatus {
    /// Owned by this rank and not shared with any other.
    Owned,
    /// Owned by this rank and shared with other ranks.
    OwnedShared,
    /// Shared with other ranks, one of which owns it.
    Shared,
    /// A read-only copy of an entity owned and used elsewhere.
    Ghosted,
}

impl EntityStatus {
    pub fn is_locally_owned(&self) -> bool {
        matches!(self, Self::Owned | Self::OwnedShared)
    }

    pub fn is_globally_shared(&self) -> bool {
        matches!(self, Self::OwnedShared | Self::Shared)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartOrdinal(pub usize);

/// Registration data of a nodal field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    name: String,
    width: usize,
    // `None` for fields defined on every node
    parts: Option<Vec<PartOrdinal>>,
}

impl FieldMeta {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn parts(&self) -> Option<&[PartOrdinal]> {
        self.parts.as_deref()
    }

    pub fn is_defined_on_part(&self, part: PartOrdinal) -> bool {
        self.parts.as_ref().map_or(true, |parts| parts.contains(&part))
    }
}

/// Names and layouts of the parts and fields of a mesh.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    spatial_dim: usize,
    fields: Vec<FieldMeta>,
    field_index: FxHashMap<String, FieldOrdinal>,
    parts: Vec<String>,
    part_index: FxHashMap<String, PartOrdinal>,
}

impl MetaData {
    pub fn spatial_dim(&self) -> usize {
        self.spatial_dim
    }

    /// Resolves a field name to its ordinal.
    pub fn get_field_ordinal(&self, name: &str) -> Result<FieldOrdinal, ConfigError> {
        self.field_index
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownField { name: name.to_string() })
    }

    pub fn get_part_ordinal(&self, name: &str) -> Result<PartOrdinal, ConfigError> {
        self.part_index
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownPart { name: name.to_string() })
    }

    pub fn field_meta(&self, field: FieldOrdinal) -> &FieldMeta {
        &self.fields[field.index()]
    }

    pub fn field_name(&self, field: FieldOrdinal) -> &str {
        self.field_meta(field).name()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn part_name(&self, part: PartOrdinal) -> &str {
        &self.parts[part.0]
    }

    /// Checks that a field is registered with the expected number of components per node.
    pub fn check_field_width(&self, field: FieldOrdinal, expected: usize) -> Result<(), ConfigError> {
        let meta = self.field_meta(field);
        if meta.width == expected {
            Ok(())
        } else {
            Err(ConfigError::FieldWidthMismatch {
                field: meta.name.clone(),
                declared: expected,
                registered: meta.width,
            })
        }
    }
}

/// A block of elements of a single topology, forming one part of the mesh.
#[derive(Debug, Clone)]
pub struct ElementBlock {
    part: PartOrdinal,
    topology: TopologyKind,
    connectivity: Vec<usize>,
    status: Vec<EntityStatus>,
}

impl ElementBlock {
    pub fn part(&self) -> PartOrdinal {
        self.part
    }

    pub fn topology(&self) -> TopologyKind {
        self.topology
    }

    pub fn num_elements(&self) -> usize {
        self.status.len()
    }

    pub fn nodes_per_element(&self) -> usize {
        self.topology.num_nodes()
    }

    pub fn element_nodes(&self, element: usize) -> &[usize] {
        let n = self.nodes_per_element();
        &self.connectivity[n * element..n * (element + 1)]
    }

    pub fn element_status(&self, element: usize) -> EntityStatus {
        self.status[element]
    }

    pub fn set_element_status(&mut self, element: usize, status: EntityStatus) {
        self.status[element] = status;
    }

    pub fn connectivity(&self) -> &[usize] {
        &self.connectivity
    }
}

/// Storage for the nodal fields of a mesh.
///
/// Each field sits behind its own lock, so that an algorithm may read several fields while
/// writing another.
#[derive(Debug, Default)]
pub struct FieldManager {
    fields: Vec<RwLock<DualField>>,
}

impl FieldManager {
    pub fn field(&self, field: FieldOrdinal) -> &RwLock<DualField> {
        &self.fields[field.index()]
    }

    pub fn field_mut(&mut self, field: FieldOrdinal) -> &mut DualField {
        self.fields[field.index()].get_mut()
    }

    /// Synchronizes the given field to `space` if it is stale there.
    pub fn sync_to(&self, field: FieldOrdinal, space: MemorySpace) {
        self.field(field).write().sync_to(space)
    }

    /// Read-locks a field after bringing its copy in `space` up to date.
    pub fn read_synced(&self, field: FieldOrdinal, space: MemorySpace) -> RwLockReadGuard<'_, DualField> {
        let mut guard = self.field(field).write();
        guard.sync_to(space);
        RwLockWriteGuard::downgrade(guard)
    }
}

/// The mesh database: metadata, element blocks, node statuses and nodal field data.
#[derive(Debug)]
pub struct MeshDb {
    meta: MetaData,
    node_status: Vec<EntityStatus>,
    blocks: Vec<ElementBlock>,
    field_presence: Vec<FixedBitSet>,
    fields: FieldManager,
}

impl MeshDb {
    pub fn meta_data(&self) -> &MetaData {
        &self.meta
    }

    pub fn num_nodes(&self) -> usize {
        self.node_status.len()
    }

    pub fn node_status(&self, node: usize) -> EntityStatus {
        self.node_status[node]
    }

    pub fn set_node_status(&mut self, node: usize, status: EntityStatus) {
        self.node_status[node] = status;
    }

    pub fn blocks(&self) -> &[ElementBlock] {
        &self.blocks
    }

    pub fn block(&self, part: PartOrdinal) -> Option<&ElementBlock> {
        self.blocks.iter().find(|block| block.part == part)
    }

    pub fn block_mut(&mut self, part: PartOrdinal) -> Option<&mut ElementBlock> {
        self.blocks.iter_mut().find(|block| block.part == part)
    }

    /// The nodes on which a field is defined.
    pub fn field_presence(&self, field: FieldOrdinal) -> &FixedBitSet {
        &self.field_presence[field.index()]
    }

    pub fn node_has_field(&self, node: usize, field: FieldOrdinal) -> bool {
        self.field_presence[field.index()].contains(node)
    }

    pub fn fields(&self) -> &FieldManager {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldManager {
        &mut self.fields
    }

    /// Sets field values on the host through a closure called for every node carrying the field.
    ///
    /// The host copy is synchronized first and marked as modified afterwards.
    pub fn set_field_on_host<F>(&mut self, field: FieldOrdinal, mut f: F)
    where
        F: FnMut(usize, &mut [f64]),
    {
        let presence = &self.field_presence[field.index()];
        let data = self.fields.field_mut(field);
        data.sync_to(MemorySpace::Host);
        let mut view = data
            .view_mut(MemorySpace::Host)
            .expect("Host copy was synchronized above");
        for node in presence.ones() {
            f(node, view.entity_mut(node));
        }
    }
}

struct PendingField {
    name: String,
    width: usize,
    parts: Option<Vec<String>>,
    initial_value: f64,
}

/// Incrementally describes a mesh, validating everything on [`build`](MeshBuilder::build).
#[derive(Default)]
pub struct MeshBuilder {
    spatial_dim: usize,
    num_nodes: usize,
    coordinates: Vec<f64>,
    node_status: FxHashMap<usize, EntityStatus>,
    blocks: Vec<(String, TopologyKind, Vec<usize>)>,
    fields: Vec<PendingField>,
}

impl MeshBuilder {
    /// Starts a mesh whose node coordinates are given node by node, `spatial_dim` values each.
    ///
    /// The coordinates are registered as the nodal vector field `coordinates`.
    pub fn with_coordinates(spatial_dim: usize, coordinates: Vec<f64>) -> Self {
        assert!(spatial_dim > 0 && coordinates.len() % spatial_dim == 0);
        let num_nodes = coordinates.len() / spatial_dim;
        Self {
            spatial_dim,
            num_nodes,
            coordinates,
            ..Default::default()
        }
    }

    /// Transforms the coordinates of every node.
    pub fn map_coordinates<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(usize, &mut [f64]),
    {
        for (node, x) in self.coordinates.chunks_exact_mut(self.spatial_dim).enumerate() {
            f(node, x);
        }
        self
    }

    pub fn node_status(mut self, node: usize, status: EntityStatus) -> Self {
        self.node_status.insert(node, status);
        self
    }

    /// Adds a block of elements, given by their concatenated node indices.
    pub fn element_block(mut self, name: &str, topology: TopologyKind, connectivity: Vec<usize>) -> Self {
        self.blocks.push((name.to_string(), topology, connectivity));
        self
    }

    /// Declares a nodal field on every node of the mesh.
    pub fn field(mut self, name: &str, width: usize, initial_value: f64) -> Self {
        self.fields.push(PendingField {
            name: name.to_string(),
            width,
            parts: None,
            initial_value,
        });
        self
    }

    /// Declares a nodal field on the nodes of the given element blocks.
    pub fn field_on_parts(mut self, name: &str, width: usize, parts: &[&str], initial_value: f64) -> Self {
        self.fields.push(PendingField {
            name: name.to_string(),
            width,
            parts: Some(parts.iter().map(|p| p.to_string()).collect()),
            initial_value,
        });
        self
    }

    pub fn build(self) -> Result<MeshDb, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidMesh { reason };
        let num_nodes = self.num_nodes;

        let mut meta = MetaData {
            spatial_dim: self.spatial_dim,
            ..Default::default()
        };

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (name, topology, connectivity) in self.blocks {
            if meta.part_index.contains_key(&name) {
                return Err(ConfigError::DuplicateName { name });
            }
            if topology.spatial_dim() > self.spatial_dim {
                return Err(invalid(format!(
                    "block `{name}` of topology {topology} does not fit a {}D mesh",
                    self.spatial_dim
                )));
            }
            if connectivity.len() % topology.num_nodes() != 0 {
                return Err(invalid(format!(
                    "connectivity of block `{name}` is not a multiple of {} nodes",
                    topology.num_nodes()
                )));
            }
            if let Some(&node) = connectivity.iter().find(|&&node| node >= num_nodes) {
                return Err(invalid(format!("block `{name}` references node {node}, but the mesh has {num_nodes} nodes")));
            }
            if let Some(element) = connectivity
                .chunks_exact(topology.num_nodes())
                .position(|nodes| !nodes.iter().all_unique())
            {
                return Err(invalid(format!("element {element} of block `{name}` lists a node more than once")));
            }
            let part = PartOrdinal(meta.parts.len());
            meta.part_index.insert(name.clone(), part);
            meta.parts.push(name);
            let num_elements = connectivity.len() / topology.num_nodes();
            blocks.push(ElementBlock {
                part,
                topology,
                connectivity,
                status: vec![EntityStatus::Owned; num_elements],
            });
        }

        let mut node_status = vec![EntityStatus::Owned; num_nodes];
        for (node, status) in self.node_status {
            if node >= num_nodes {
                return Err(invalid(format!("status assigned to nonexistent node {node}")));
            }
            node_status[node] = status;
        }

        let coordinates = PendingField {
            name: "coordinates".to_string(),
            width: self.spatial_dim,
            parts: None,
            initial_value: 0.0,
        };

        let mut fields = Vec::new();
        let mut field_presence = Vec::new();
        for pending in std::iter::once(coordinates).chain(self.fields) {
            if meta.field_index.contains_key(&pending.name) {
                return Err(ConfigError::DuplicateName { name: pending.name });
            }
            let parts = pending
                .parts
                .map(|names| {
                    names
                        .iter()
                        .map(|name| meta.get_part_ordinal(name))
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?;

            let mut presence = FixedBitSet::with_capacity(num_nodes);
            match &parts {
                None => presence.insert_range(..),
                Some(parts) => {
                    for block in blocks.iter().filter(|b| parts.contains(&b.part)) {
                        for &node in &block.connectivity {
                            presence.insert(node);
                        }
                    }
                }
            }

            let ordinal = FieldOrdinal(meta.fields.len());
            meta.field_index.insert(pending.name.clone(), ordinal);
            meta.fields.push(FieldMeta {
                name: pending.name,
                width: pending.width,
                parts,
            });
            fields.push(RwLock::new(DualField::new(pending.width, num_nodes, pending.initial_value)));
            field_presence.push(presence);
        }

        info!(
            "Built mesh with {} nodes, {} element blocks and {} fields",
            num_nodes,
            blocks.len(),
            fields.len()
        );

        let mut mesh = MeshDb {
            meta,
            node_status,
            blocks,
            field_presence,
            fields: FieldManager { fields },
        };

        let coordinates_ordinal = FieldOrdinal(0);
        let dim = self.spatial_dim;
        let coords = self.coordinates;
        mesh.set_field_on_host(coordinates_ordinal, |node, x| {
            x.copy_from_slice(&coords[node * dim..(node + 1) * dim]);
        });
        mesh.fields_mut().field_mut(coordinates_ordinal).sync_to(MemorySpace::Device);

        Ok(mesh)
    }
}
