//! The global linear system that element contributions are scattered into.
use crate::mesh::MeshDb;
use cvfem_paradis::{DisjointRowAccess, RowMut};
use eyre::eyre;
use itertools::iproduct;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use std::collections::BTreeSet;

/// A sparse matrix with one row and column per mesh node, together with a right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrLinearSystem {
    matrix: CsrMatrix<f64>,
    rhs: DVector<f64>,
    // Scratch space for serial scatter
    sorted_permutation: Vec<usize>,
}

impl CsrLinearSystem {
    /// Creates a zeroed system whose sparsity pattern couples every pair of nodes sharing an
    /// element in any element block of the mesh.
    pub fn from_mesh(mesh: &MeshDb) -> Self {
        // Collecting into a BTreeSet stores each entry exactly once, in row-major order
        let mut entries = BTreeSet::new();
        for block in mesh.blocks() {
            for element in 0..block.num_elements() {
                let nodes = block.element_nodes(element);
                entries.extend(iproduct!(nodes.iter().copied(), nodes.iter().copied()));
            }
        }

        let num_rows = mesh.num_nodes();
        let mut offsets = Vec::with_capacity(num_rows + 1);
        let mut column_indices = Vec::with_capacity(entries.len());
        offsets.push(0);
        for (i, j) in entries {
            // Loop to correctly handle consecutive empty rows
            while i + 1 > offsets.len() {
                offsets.push(column_indices.len());
            }
            column_indices.push(j);
        }
        while offsets.len() < num_rows + 1 {
            offsets.push(column_indices.len());
        }

        let nnz = column_indices.len();
        let pattern = SparsityPattern::try_from_offsets_and_indices(num_rows, num_rows, offsets, column_indices)
            .expect("Sorted and deduplicated entries always form a valid pattern");
        let matrix = CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
            .expect("Values have the same length as the pattern");

        Self {
            matrix,
            rhs: DVector::zeros(num_rows),
            sorted_permutation: Vec::new(),
        }
    }

    pub fn zero(&mut self) {
        self.matrix.values_mut().fill(0.0);
        self.rhs.fill(0.0);
    }

    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub fn num_rows(&self) -> usize {
        self.rhs.len()
    }

    /// Adds the local contributions of an element to the rows of its nodes.
    pub fn sum_into(&mut self, element_nodes: &[usize], lhs: &DMatrix<f64>, rhs: &DVector<f64>) -> eyre::Result<()> {
        sort_permutation(&mut self.sorted_permutation, element_nodes);
        let (offsets, col_indices, values) = self.matrix.csr_data_mut();
        for (local_row, &global_row) in element_nodes.iter().enumerate() {
            let range = offsets[global_row]..offsets[global_row + 1];
            let row = RowMut {
                col_indices: &col_indices[range.clone()],
                values: &mut values[range],
                rhs: &mut self.rhs[global_row],
            };
            add_element_row_to_csr_row(row, element_nodes, &self.sorted_permutation, lhs, rhs, local_row)?;
        }
        Ok(())
    }

    /// Shared access to the rows of the system for concurrent scatter of node-disjoint elements.
    pub fn disjoint_rows(&mut self) -> DisjointRowAccess<'_, f64> {
        let (offsets, col_indices, values) = self.matrix.csr_data_mut();
        DisjointRowAccess::new(offsets, col_indices, values, self.rhs.as_mut_slice())
    }
}

/// Stores in `permutation` the local node indices of an element ordered by global node index.
pub(crate) fn sort_permutation(permutation: &mut Vec<usize>, element_nodes: &[usize]) {
    permutation.clear();
    permutation.extend(0..element_nodes.len());
    permutation.sort_unstable_by_key(|&i| element_nodes[i]);
}

/// Adds the local contributions of an element to the rows of its nodes through disjoint row access.
///
/// # Safety
///
/// No other thread may access the rows of `element_nodes` while this function runs.
pub(crate) unsafe fn sum_into_disjoint_rows(
    rows: &DisjointRowAccess<'_, f64>,
    element_nodes: &[usize],
    sorted_permutation: &[usize],
    lhs: &DMatrix<f64>,
    rhs: &DVector<f64>,
) -> eyre::Result<()> {
    for (local_row, &global_row) in element_nodes.iter().enumerate() {
        let row = rows.row_mut(global_row);
        add_element_row_to_csr_row(row, element_nodes, sorted_permutation, lhs, rhs, local_row)?;
    }
    Ok(())
}

/// Adds row `local_row` of an element's local system to the global row of its node.
///
/// `sorted_permutation` orders the local nodes by global index, so that the sorted columns of
/// the CSR row are searched only once.
fn add_element_row_to_csr_row(
    row: RowMut<'_, f64>,
    element_nodes: &[usize],
    sorted_permutation: &[usize],
    lhs: &DMatrix<f64>,
    rhs: &DVector<f64>,
    local_row: usize,
) -> eyre::Result<()> {
    debug_assert_eq!(element_nodes.len(), sorted_permutation.len());
    let mut csr_cols = row.col_indices.iter().copied().enumerate();
    for &local_col in sorted_permutation {
        let global_col = element_nodes[local_col];
        let (csr_idx, _) = csr_cols
            .find(|&(_, col)| col == global_col)
            .ok_or_else(|| {
                eyre!(
                    "no sparsity entry for node {} in row {}",
                    global_col,
                    element_nodes[local_row]
                )
            })?;
        row.values[csr_idx] += lhs[(local_row, local_col)];
    }
    *row.rhs += rhs[local_row];
    Ok(())
}
