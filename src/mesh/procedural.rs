//! Basic procedural mesh generation routines.
//!
//! The generators return a [`MeshBuilder`] holding the nodes and a single element block named
//! [`BLOCK_NAME`], so that callers can declare fields and statuses before building the mesh.
use crate::mesh::MeshBuilder;
use crate::topology::TopologyKind;

pub const BLOCK_NAME: &str = "block_1";

pub fn create_unit_square_uniform_quad_mesh_2d(cells_per_dim: usize) -> MeshBuilder {
    create_rectangular_uniform_quad_mesh_2d([1.0, 1.0], [cells_per_dim, cells_per_dim])
}

pub fn create_unit_square_uniform_tri_mesh_2d(cells_per_dim: usize) -> MeshBuilder {
    create_rectangular_uniform_tri_mesh_2d([1.0, 1.0], [cells_per_dim, cells_per_dim])
}

pub fn create_unit_box_uniform_hex_mesh_3d(cells_per_dim: usize) -> MeshBuilder {
    create_rectangular_uniform_hex_mesh([1.0; 3], [cells_per_dim; 3])
}

pub fn create_unit_box_uniform_tet_mesh_3d(cells_per_dim: usize) -> MeshBuilder {
    create_rectangular_uniform_tet_mesh([1.0; 3], [cells_per_dim; 3])
}

fn grid_vertices_2d(extents: [f64; 2], cells: [usize; 2]) -> Vec<f64> {
    let mut vertices = Vec::with_capacity(2 * (cells[0] + 1) * (cells[1] + 1));
    for j in 0..=cells[1] {
        for i in 0..=cells[0] {
            vertices.push(extents[0] * i as f64 / cells[0] as f64);
            vertices.push(extents[1] * j as f64 / cells[1] as f64);
        }
    }
    vertices
}

fn grid_quads_2d(cells: [usize; 2]) -> impl Iterator<Item = [usize; 4]> {
    let idx = move |i: usize, j: usize| (cells[0] + 1) * j + i;
    (0..cells[1]).flat_map(move |j| {
        (0..cells[0]).map(move |i| [idx(i, j), idx(i + 1, j), idx(i + 1, j + 1), idx(i, j + 1)])
    })
}

/// Generates an axis-aligned rectangle `[0, extents[0]] x [0, extents[1]]` divided into
/// `cells[0] x cells[1]` counter-clockwise quadrilaterals.
pub fn create_rectangular_uniform_quad_mesh_2d(extents: [f64; 2], cells: [usize; 2]) -> MeshBuilder {
    assert!(cells.iter().all(|&c| c > 0), "Need at least one cell per dimension.");
    let connectivity = grid_quads_2d(cells).flatten().collect();
    MeshBuilder::with_coordinates(2, grid_vertices_2d(extents, cells)).element_block(
        BLOCK_NAME,
        TopologyKind::Quad4,
        connectivity,
    )
}

/// Like [`create_rectangular_uniform_quad_mesh_2d`], with every quadrilateral split into two triangles.
pub fn create_rectangular_uniform_tri_mesh_2d(extents: [f64; 2], cells: [usize; 2]) -> MeshBuilder {
    assert!(cells.iter().all(|&c| c > 0), "Need at least one cell per dimension.");
    let connectivity = grid_quads_2d(cells)
        .flat_map(|[a, b, c, d]| [a, b, c, a, c, d])
        .collect();
    MeshBuilder::with_coordinates(2, grid_vertices_2d(extents, cells)).element_block(
        BLOCK_NAME,
        TopologyKind::Tri3,
        connectivity,
    )
}

struct Grid3d {
    extents: [f64; 3],
    cells: [usize; 3],
}

impl Grid3d {
    fn vertex_index(&self, i: usize, j: usize, k: usize) -> usize {
        let [nx, ny, _] = self.cells;
        ((nx + 1) * (ny + 1)) * k + (nx + 1) * j + i
    }

    fn vertices(&self) -> Vec<f64> {
        let [nx, ny, nz] = self.cells;
        let mut vertices = Vec::with_capacity(3 * (nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    vertices.push(self.extents[0] * i as f64 / nx as f64);
                    vertices.push(self.extents[1] * j as f64 / ny as f64);
                    vertices.push(self.extents[2] * k as f64 / nz as f64);
                }
            }
        }
        vertices
    }

    fn cells(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let [nx, ny, nz] = self.cells;
        (0..nz).flat_map(move |k| (0..ny).flat_map(move |j| (0..nx).map(move |i| [i, j, k])))
    }
}

pub fn create_rectangular_uniform_hex_mesh(extents: [f64; 3], cells: [usize; 3]) -> MeshBuilder {
    assert!(cells.iter().all(|&c| c > 0), "Need at least one cell per dimension.");
    let grid = Grid3d { extents, cells };
    let idx = |i, j, k| grid.vertex_index(i, j, k);
    let connectivity = grid
        .cells()
        .flat_map(|[i, j, k]| {
            [
                idx(i, j, k),
                idx(i + 1, j, k),
                idx(i + 1, j + 1, k),
                idx(i, j + 1, k),
                idx(i, j, k + 1),
                idx(i + 1, j, k + 1),
                idx(i + 1, j + 1, k + 1),
                idx(i, j + 1, k + 1),
            ]
        })
        .collect();
    MeshBuilder::with_coordinates(3, grid.vertices()).element_block(BLOCK_NAME, TopologyKind::Hex8, connectivity)
}

/// Generates a box of hexahedral cells, each split into six positively oriented tetrahedra
/// sharing the cell diagonal.
pub fn create_rectangular_uniform_tet_mesh(extents: [f64; 3], cells: [usize; 3]) -> MeshBuilder {
    assert!(cells.iter().all(|&c| c > 0), "Need at least one cell per dimension.");
    // Paths from the (0, 0, 0) corner to the (1, 1, 1) corner of a cell along the axes,
    // paired with whether the resulting tetrahedron is positively oriented
    const AXIS_PATHS: [([usize; 3], bool); 6] = [
        ([0, 1, 2], true),
        ([0, 2, 1], false),
        ([1, 0, 2], false),
        ([1, 2, 0], true),
        ([2, 0, 1], true),
        ([2, 1, 0], false),
    ];

    let grid = Grid3d { extents, cells };
    let mut connectivity = Vec::with_capacity(24 * cells.iter().product::<usize>());
    for [i, j, k] in grid.cells() {
        for (path, positive) in AXIS_PATHS {
            let mut corner = [i, j, k];
            let mut tet = [grid.vertex_index(i, j, k), 0, 0, 0];
            for (n, &axis) in path.iter().enumerate() {
                corner[axis] += 1;
                tet[n + 1] = grid.vertex_index(corner[0], corner[1], corner[2]);
            }
            if !positive {
                tet.swap(1, 2);
            }
            connectivity.extend_from_slice(&tet);
        }
    }
    MeshBuilder::with_coordinates(3, grid.vertices()).element_block(BLOCK_NAME, TopologyKind::Tet4, connectivity)
}
