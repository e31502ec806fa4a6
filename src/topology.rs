//! Compile-time descriptors of element topologies.
//!
//! Every kernel, evaluator and staging buffer is generic over a [`Topology`] tag, so that loop
//! bounds such as the number of nodes or subcontrol-surface integration points are constants
//! after monomorphization. The runtime [`TopologyKind`] names the topology of an element block
//! and is mapped to a tag once, at configuration time, through [`dispatch_topology!`].
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

/// The topology of a mesh element, as stored by the mesh.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TopologyKind {
    Line2,
    Tri3,
    Quad4,
    Tet4,
    Pyramid5,
    Wedge6,
    Hex8,
}

impl TopologyKind {
    pub fn num_nodes(&self) -> usize {
        match self {
            Self::Line2 => 2,
            Self::Tri3 => 3,
            Self::Quad4 => 4,
            Self::Tet4 => 4,
            Self::Pyramid5 => 5,
            Self::Wedge6 => 6,
            Self::Hex8 => 8,
        }
    }

    pub fn spatial_dim(&self) -> usize {
        match self {
            Self::Line2 => 1,
            Self::Tri3 | Self::Quad4 => 2,
            Self::Tet4 | Self::Pyramid5 | Self::Wedge6 | Self::Hex8 => 3,
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

/// A type-level tag describing an element topology and its control-volume dual.
///
/// The subcontrol surfaces of an element are associated with its edges: the surface of edge
/// `(l, r)` separates the subcontrol volumes of nodes `l` and `r`, and carries a single
/// integration point. In 2D the surface is the segment from the edge midpoint to the element
/// centroid. In 3D it is the quadrilateral spanned by the edge midpoint, the centroids of the
/// two faces adjacent to the edge and the element centroid.
///
/// Reference and physical coordinates are padded to three components, unused components are zero.
pub trait Topology: Debug + Copy + Default + Send + Sync + 'static {
    const KIND: TopologyKind;
    const N_DIM: usize;
    const NODES_PER_ELEMENT: usize;
    const NUM_SCS_IP: usize;

    /// Node coordinates of the reference element.
    const REFERENCE_NODES: &'static [[f64; 3]];

    /// Left/right node pairs, one per subcontrol surface.
    const ADJACENT_NODES: &'static [[usize; 2]];

    /// The two element faces adjacent to each edge in `ADJACENT_NODES`. Empty in 2D.
    const EDGE_FACES: &'static [[&'static [usize]; 2]];

    /// Evaluates all shape functions at the given reference coordinates.
    fn shape_fcn(xi: &[f64; 3], values: &mut [f64]);

    /// Evaluates shape function derivatives with respect to reference coordinates.
    ///
    /// The output is laid out node by node: `derivs[n * N_DIM + j] = dN_n / dxi_j`.
    fn shape_fcn_deriv(xi: &[f64; 3], derivs: &mut [f64]);
}

/// Shape functions of tensor-product elements on `[-1, 1]^d`.
fn tensor_product_shape_fcn(nodes: &[[f64; 3]], n_dim: usize, xi: &[f64; 3], values: &mut [f64]) {
    let scale = 0.5f64.powi(n_dim as i32);
    for (value, node) in values.iter_mut().zip(nodes) {
        *value = (0..n_dim).map(|d| 1.0 + node[d] * xi[d]).product::<f64>() * scale;
    }
}

fn tensor_product_shape_fcn_deriv(nodes: &[[f64; 3]], n_dim: usize, xi: &[f64; 3], derivs: &mut [f64]) {
    let scale = 0.5f64.powi(n_dim as i32);
    for (n, node) in nodes.iter().enumerate() {
        for j in 0..n_dim {
            let mut d = node[j] * scale;
            for k in (0..n_dim).filter(|&k| k != j) {
                d *= 1.0 + node[k] * xi[k];
            }
            derivs[n * n_dim + j] = d;
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Tri3;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Quad4;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Tet4;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Hex8;

impl Topology for Tri3 {
    const KIND: TopologyKind = TopologyKind::Tri3;
    const N_DIM: usize = 2;
    const NODES_PER_ELEMENT: usize = 3;
    const NUM_SCS_IP: usize = 3;

    const REFERENCE_NODES: &'static [[f64; 3]] = &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    const ADJACENT_NODES: &'static [[usize; 2]] = &[[0, 1], [1, 2], [0, 2]];
    const EDGE_FACES: &'static [[&'static [usize]; 2]] = &[];

    fn shape_fcn(xi: &[f64; 3], values: &mut [f64]) {
        values[0] = 1.0 - xi[0] - xi[1];
        values[1] = xi[0];
        values[2] = xi[1];
    }

    #[rustfmt::skip]
    fn shape_fcn_deriv(_xi: &[f64; 3], derivs: &mut [f64]) {
        derivs.copy_from_slice(&[
            -1.0, -1.0,
             1.0,  0.0,
             0.0,  1.0,
        ]);
    }
}

impl Topology for Quad4 {
    const KIND: TopologyKind = TopologyKind::Quad4;
    const N_DIM: usize = 2;
    const NODES_PER_ELEMENT: usize = 4;
    const NUM_SCS_IP: usize = 4;

    #[rustfmt::skip]
    const REFERENCE_NODES: &'static [[f64; 3]] = &[
        [-1.0, -1.0, 0.0],
        [ 1.0, -1.0, 0.0],
        [ 1.0,  1.0, 0.0],
        [-1.0,  1.0, 0.0],
    ];
    const ADJACENT_NODES: &'static [[usize; 2]] = &[[0, 1], [1, 2], [2, 3], [0, 3]];
    const EDGE_FACES: &'static [[&'static [usize]; 2]] = &[];

    fn shape_fcn(xi: &[f64; 3], values: &mut [f64]) {
        tensor_product_shape_fcn(Self::REFERENCE_NODES, Self::N_DIM, xi, values)
    }

    fn shape_fcn_deriv(xi: &[f64; 3], derivs: &mut [f64]) {
        tensor_product_shape_fcn_deriv(Self::REFERENCE_NODES, Self::N_DIM, xi, derivs)
    }
}

const TET4_FACES: [&[usize]; 4] = [&[0, 1, 3], &[1, 2, 3], &[0, 3, 2], &[0, 2, 1]];

impl Topology for Tet4 {
    const KIND: TopologyKind = TopologyKind::Tet4;
    const N_DIM: usize = 3;
    const NODES_PER_ELEMENT: usize = 4;
    const NUM_SCS_IP: usize = 6;

    #[rustfmt::skip]
    const REFERENCE_NODES: &'static [[f64; 3]] = &[
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
    ];
    const ADJACENT_NODES: &'static [[usize; 2]] = &[[0, 1], [1, 2], [0, 2], [0, 3], [1, 3], [2, 3]];
    const EDGE_FACES: &'static [[&'static [usize]; 2]] = &[
        [TET4_FACES[0], TET4_FACES[3]],
        [TET4_FACES[1], TET4_FACES[3]],
        [TET4_FACES[2], TET4_FACES[3]],
        [TET4_FACES[0], TET4_FACES[2]],
        [TET4_FACES[0], TET4_FACES[1]],
        [TET4_FACES[1], TET4_FACES[2]],
    ];

    fn shape_fcn(xi: &[f64; 3], values: &mut [f64]) {
        values[0] = 1.0 - xi[0] - xi[1] - xi[2];
        values[1] = xi[0];
        values[2] = xi[1];
        values[3] = xi[2];
    }

    #[rustfmt::skip]
    fn shape_fcn_deriv(_xi: &[f64; 3], derivs: &mut [f64]) {
        derivs.copy_from_slice(&[
            -1.0, -1.0, -1.0,
             1.0,  0.0,  0.0,
             0.0,  1.0,  0.0,
             0.0,  0.0,  1.0,
        ]);
    }
}

// Bottom, top, front (y = -1), right (x = 1), back (y = 1), left (x = -1)
const HEX8_FACES: [&[usize]; 6] = [
    &[0, 1, 2, 3],
    &[4, 5, 6, 7],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[0, 3, 7, 4],
];

impl Topology for Hex8 {
    const KIND: TopologyKind = TopologyKind::Hex8;
    const N_DIM: usize = 3;
    const NODES_PER_ELEMENT: usize = 8;
    const NUM_SCS_IP: usize = 12;

    #[rustfmt::skip]
    const REFERENCE_NODES: &'static [[f64; 3]] = &[
        [-1.0, -1.0, -1.0],
        [ 1.0, -1.0, -1.0],
        [ 1.0,  1.0, -1.0],
        [-1.0,  1.0, -1.0],
        [-1.0, -1.0,  1.0],
        [ 1.0, -1.0,  1.0],
        [ 1.0,  1.0,  1.0],
        [-1.0,  1.0,  1.0],
    ];
    #[rustfmt::skip]
    const ADJACENT_NODES: &'static [[usize; 2]] = &[
        [0, 1], [1, 2], [2, 3], [0, 3],
        [4, 5], [5, 6], [6, 7], [4, 7],
        [0, 4], [1, 5], [2, 6], [3, 7],
    ];
    const EDGE_FACES: &'static [[&'static [usize]; 2]] = &[
        [HEX8_FACES[2], HEX8_FACES[0]],
        [HEX8_FACES[0], HEX8_FACES[3]],
        [HEX8_FACES[0], HEX8_FACES[4]],
        [HEX8_FACES[0], HEX8_FACES[5]],
        [HEX8_FACES[1], HEX8_FACES[2]],
        [HEX8_FACES[1], HEX8_FACES[3]],
        [HEX8_FACES[1], HEX8_FACES[4]],
        [HEX8_FACES[1], HEX8_FACES[5]],
        [HEX8_FACES[2], HEX8_FACES[5]],
        [HEX8_FACES[2], HEX8_FACES[3]],
        [HEX8_FACES[3], HEX8_FACES[4]],
        [HEX8_FACES[4], HEX8_FACES[5]],
    ];

    fn shape_fcn(xi: &[f64; 3], values: &mut [f64]) {
        tensor_product_shape_fcn(Self::REFERENCE_NODES, Self::N_DIM, xi, values)
    }

    fn shape_fcn_deriv(xi: &[f64; 3], derivs: &mut [f64]) {
        tensor_product_shape_fcn_deriv(Self::REFERENCE_NODES, Self::N_DIM, xi, derivs)
    }
}

/// Maps a runtime [`TopologyKind`] to its [`Topology`] tag and evaluates an expression with
/// the tag bound to the given type name.
///
/// Evaluates to `Ok(expr)` for supported topologies and to
/// `Err(ConfigError::UnsupportedTopology)` for topologies without a subcontrol-surface evaluator.
///
/// ```
/// use cvfem::dispatch_topology;
/// use cvfem::topology::{Topology, TopologyKind};
///
/// let num_ips = dispatch_topology!(TopologyKind::Hex8, T => T::NUM_SCS_IP).unwrap();
/// assert_eq!(num_ips, 12);
/// assert!(dispatch_topology!(TopologyKind::Wedge6, T => T::NUM_SCS_IP).is_err());
/// ```
#[macro_export]
macro_rules! dispatch_topology {
    ($kind:expr, $topo:ident => $body:expr) => {{
        use $crate::topology::TopologyKind as __Kind;
        match $kind {
            __Kind::Tri3 => {
                #[allow(dead_code)]
                type $topo = $crate::topology::Tri3;
                Ok($body)
            }
            __Kind::Quad4 => {
                #[allow(dead_code)]
                type $topo = $crate::topology::Quad4;
                Ok($body)
            }
            __Kind::Tet4 => {
                #[allow(dead_code)]
                type $topo = $crate::topology::Tet4;
                Ok($body)
            }
            __Kind::Hex8 => {
                #[allow(dead_code)]
                type $topo = $crate::topology::Hex8;
                Ok($body)
            }
            unsupported => Err($crate::error::ConfigError::UnsupportedTopology { topology: unsupported }),
        }
    }};
}
