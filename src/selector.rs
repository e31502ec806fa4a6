//! Predicates over mesh entities.
//!
//! A [`Selector`] is a small expression combining parallel status, part membership and field
//! presence. Algorithms resolve it once into an explicit set of entities when they are
//! configured, and iterate over that set on every pass.
use crate::field::FieldOrdinal;
use crate::mesh::{ElementBlock, MeshDb, PartOrdinal};
use fixedbitset::FixedBitSet;
use std::ops::{BitAnd, BitOr, Not};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Universal,
    LocallyOwned,
    GloballyShared,
    /// Entities on which the field is defined. An element carries a field if all of its nodes do.
    Field(FieldOrdinal),
    /// Elements of the part, and the nodes connected to them.
    Part(PartOrdinal),
    Union(Box<Selector>, Box<Selector>),
    Intersection(Box<Selector>, Box<Selector>),
    Complement(Box<Selector>),
}

impl Selector {
    pub fn universal() -> Self {
        Self::Universal
    }

    pub fn locally_owned() -> Self {
        Self::LocallyOwned
    }

    pub fn globally_shared() -> Self {
        Self::GloballyShared
    }

    pub fn field(field: FieldOrdinal) -> Self {
        Self::Field(field)
    }

    pub fn part(part: PartOrdinal) -> Self {
        Self::Part(part)
    }

    /// Resolves the selector into the set of selected nodes.
    pub fn select_nodes(&self, mesh: &MeshDb) -> FixedBitSet {
        let num_nodes = mesh.num_nodes();
        let from_predicate = |predicate: &dyn Fn(usize) -> bool| -> FixedBitSet {
            let mut set = FixedBitSet::with_capacity(num_nodes);
            for node in (0..num_nodes).filter(|&n| predicate(n)) {
                set.insert(node);
            }
            set
        };

        match self {
            Self::Universal => {
                let mut set = FixedBitSet::with_capacity(num_nodes);
                set.insert_range(..);
                set
            }
            Self::LocallyOwned => from_predicate(&|n| mesh.node_status(n).is_locally_owned()),
            Self::GloballyShared => from_predicate(&|n| mesh.node_status(n).is_globally_shared()),
            Self::Field(field) => mesh.field_presence(*field).clone(),
            Self::Part(part) => {
                let mut set = FixedBitSet::with_capacity(num_nodes);
                if let Some(block) = mesh.block(*part) {
                    set.extend(block.connectivity().iter().copied());
                }
                set
            }
            Self::Union(a, b) => {
                let mut set = a.select_nodes(mesh);
                set.union_with(&b.select_nodes(mesh));
                set
            }
            Self::Intersection(a, b) => {
                let mut set = a.select_nodes(mesh);
                set.intersect_with(&b.select_nodes(mesh));
                set
            }
            Self::Complement(a) => {
                let mut set = Self::Universal.select_nodes(mesh);
                set.difference_with(&a.select_nodes(mesh));
                set
            }
        }
    }

    /// Whether the given element of the block is selected.
    pub fn selects_element(&self, mesh: &MeshDb, block: &ElementBlock, element: usize) -> bool {
        match self {
            Self::Universal => true,
            Self::LocallyOwned => block.element_status(element).is_locally_owned(),
            Self::GloballyShared => block.element_status(element).is_globally_shared(),
            Self::Field(field) => block
                .element_nodes(element)
                .iter()
                .all(|&node| mesh.node_has_field(node, *field)),
            Self::Part(part) => block.part() == *part,
            Self::Union(a, b) => {
                a.selects_element(mesh, block, element) || b.selects_element(mesh, block, element)
            }
            Self::Intersection(a, b) => {
                a.selects_element(mesh, block, element) && b.selects_element(mesh, block, element)
            }
            Self::Complement(a) => !a.selects_element(mesh, block, element),
        }
    }

    /// Indices of the selected elements of a block, in increasing order.
    pub fn select_elements(&self, mesh: &MeshDb, block: &ElementBlock) -> Vec<usize> {
        (0..block.num_elements())
            .filter(|&element| self.selects_element(mesh, block, element))
            .collect()
    }
}

impl BitOr for Selector {
    type Output = Selector;

    fn bitor(self, rhs: Self) -> Self::Output {
        Selector::Union(Box::new(self), Box::new(rhs))
    }
}

impl BitAnd for Selector {
    type Output = Selector;

    fn bitand(self, rhs: Self) -> Self::Output {
        Selector::Intersection(Box::new(self), Box::new(rhs))
    }
}

impl Not for Selector {
    type Output = Selector;

    fn not(self) -> Self::Output {
        Selector::Complement(Box::new(self))
    }
}
