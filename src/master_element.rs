//! Subcontrol-surface reference-element ("master element") evaluation.
use crate::dispatch_topology;
use crate::error::Result;
use crate::topology::{Topology, TopologyKind};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// A quantity that a term may request from the reference-element evaluator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MasterElementCall {
    /// Area vectors of the subcontrol surfaces.
    ScsAreav,
    /// Shape functions at the subcontrol-surface integration points.
    ScsShapeFcn,
    /// Shape functions at the shifted integration points (edge midpoints).
    ScsShiftedShapeFcn,
    /// Physical gradients of the shape functions at the integration points.
    ScsGradOp,
    /// Physical gradients of the shape functions at the shifted integration points.
    ScsShiftedGradOp,
}

impl MasterElementCall {
    pub const ALL: [MasterElementCall; 5] = [
        Self::ScsAreav,
        Self::ScsShapeFcn,
        Self::ScsShiftedShapeFcn,
        Self::ScsGradOp,
        Self::ScsShiftedGradOp,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Whether the quantity depends on the element's nodal coordinates.
    pub fn requires_coordinates(&self) -> bool {
        !matches!(self, Self::ScsShapeFcn | Self::ScsShiftedShapeFcn)
    }
}

fn node_point(coords: &[f64], n_dim: usize, node: usize) -> Vector3<f64> {
    let mut x = Vector3::zeros();
    for d in 0..n_dim {
        x[d] = coords[node * n_dim + d];
    }
    x
}

fn centroid_of(coords: &[f64], n_dim: usize, nodes: impl ExactSizeIterator<Item = usize>) -> Vector3<f64> {
    let count = nodes.len() as f64;
    nodes.fold(Vector3::zeros(), |acc, n| acc + node_point(coords, n_dim, n)) / count
}

/// Corner points of the subcontrol surface with the given index, in the order
/// `(edge midpoint, face A centroid, element centroid, face B centroid)`.
///
/// In 2D the two face centroids coincide with the edge midpoint and element centroid, so the
/// quadrilateral degenerates into the segment between them.
fn scs_corners<T: Topology>(coords: &[f64], scs: usize) -> [Vector3<f64>; 4] {
    let [l, r] = T::ADJACENT_NODES[scs];
    let midpoint = (node_point(coords, T::N_DIM, l) + node_point(coords, T::N_DIM, r)) * 0.5;
    let centroid = centroid_of(coords, T::N_DIM, 0..T::NODES_PER_ELEMENT);
    if T::N_DIM == 3 {
        let [face_a, face_b] = T::EDGE_FACES[scs];
        let face_a = centroid_of(coords, T::N_DIM, face_a.iter().copied());
        let face_b = centroid_of(coords, T::N_DIM, face_b.iter().copied());
        [midpoint, face_a, centroid, face_b]
    } else {
        [midpoint, midpoint, centroid, centroid]
    }
}

fn reference_coords<T: Topology>() -> Vec<f64> {
    T::REFERENCE_NODES
        .iter()
        .flat_map(|x| x[..T::N_DIM].iter().copied())
        .collect()
}

/// Evaluates subcontrol-surface quantities for elements of topology `T`.
///
/// Shape functions only depend on the reference element, so they are tabulated once when the
/// evaluator is created. Area vectors and gradient operators depend on the nodal coordinates of
/// each element instance.
///
/// Coordinates are passed node by node, `coords[n * N_DIM + d]`. Outputs are laid out as
///
/// - area vectors: `areav[ip * N_DIM + d]`,
/// - shape functions: `shape_fcn[ip * NODES_PER_ELEMENT + n]`,
/// - gradient operators: `grad_op[(ip * NODES_PER_ELEMENT + n) * N_DIM + d]`.
#[derive(Debug, Clone)]
pub struct ScsMasterElement<T: Topology> {
    ip_locations: Vec<[f64; 3]>,
    shifted_ip_locations: Vec<[f64; 3]>,
    shape_fcn: Vec<f64>,
    shifted_shape_fcn: Vec<f64>,
    shape_fcn_deriv: Vec<f64>,
    shifted_shape_fcn_deriv: Vec<f64>,
    marker: PhantomData<T>,
}

impl<T: Topology> Default for ScsMasterElement<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Topology> ScsMasterElement<T> {
    pub fn new() -> Self {
        let reference = reference_coords::<T>();
        let mut ip_locations = Vec::with_capacity(T::NUM_SCS_IP);
        let mut shifted_ip_locations = Vec::with_capacity(T::NUM_SCS_IP);
        for scs in 0..T::NUM_SCS_IP {
            let corners = scs_corners::<T>(&reference, scs);
            let ip = corners.iter().sum::<Vector3<f64>>() / 4.0;
            ip_locations.push([ip.x, ip.y, ip.z]);
            let midpoint = corners[0];
            shifted_ip_locations.push([midpoint.x, midpoint.y, midpoint.z]);
        }

        let tabulate = |locations: &[[f64; 3]]| {
            let nodes = T::NODES_PER_ELEMENT;
            let mut values = vec![0.0; T::NUM_SCS_IP * nodes];
            let mut derivs = vec![0.0; T::NUM_SCS_IP * nodes * T::N_DIM];
            for (ip, xi) in locations.iter().enumerate() {
                T::shape_fcn(xi, &mut values[ip * nodes..(ip + 1) * nodes]);
                let stride = nodes * T::N_DIM;
                T::shape_fcn_deriv(xi, &mut derivs[ip * stride..(ip + 1) * stride]);
            }
            (values, derivs)
        };

        let (shape_fcn, shape_fcn_deriv) = tabulate(&ip_locations);
        let (shifted_shape_fcn, shifted_shape_fcn_deriv) = tabulate(&shifted_ip_locations);

        Self {
            ip_locations,
            shifted_ip_locations,
            shape_fcn,
            shifted_shape_fcn,
            shape_fcn_deriv,
            shifted_shape_fcn_deriv,
            marker: PhantomData,
        }
    }

    /// Left/right node pairs of the subcontrol surfaces (one per integration point).
    pub fn adjacent_nodes(&self) -> &'static [[usize; 2]] {
        T::ADJACENT_NODES
    }

    pub fn num_integration_points(&self) -> usize {
        T::NUM_SCS_IP
    }

    /// Reference coordinates of the integration points.
    pub fn integration_locations(&self) -> &[[f64; 3]] {
        &self.ip_locations
    }

    /// Reference coordinates of the shifted integration points.
    pub fn shifted_integration_locations(&self) -> &[[f64; 3]] {
        &self.shifted_ip_locations
    }

    pub fn shape_fcn(&self, shape_fcn: &mut [f64]) {
        shape_fcn.copy_from_slice(&self.shape_fcn);
    }

    pub fn shifted_shape_fcn(&self, shape_fcn: &mut [f64]) {
        shape_fcn.copy_from_slice(&self.shifted_shape_fcn);
    }

    /// Computes the area vectors of all subcontrol surfaces.
    ///
    /// Each area vector is oriented from the left towards the right node of its surface,
    /// so that a flux along it leaves the left subcontrol volume and enters the right one.
    pub fn determinant(&self, coords: &[f64], areav: &mut [f64]) {
        debug_assert_eq!(coords.len(), T::NODES_PER_ELEMENT * T::N_DIM);
        debug_assert_eq!(areav.len(), T::NUM_SCS_IP * T::N_DIM);
        for (scs, &[l, r]) in T::ADJACENT_NODES.iter().enumerate() {
            let [midpoint, face_a, centroid, face_b] = scs_corners::<T>(coords, scs);
            let mut a = if T::N_DIM == 3 {
                (centroid - midpoint).cross(&(face_b - face_a)) * 0.5
            } else {
                let d = centroid - midpoint;
                Vector3::new(d.y, -d.x, 0.0)
            };
            let edge = node_point(coords, T::N_DIM, r) - node_point(coords, T::N_DIM, l);
            if a.dot(&edge) < 0.0 {
                a = -a;
            }
            areav[scs * T::N_DIM..(scs + 1) * T::N_DIM].copy_from_slice(&a.as_slice()[..T::N_DIM]);
        }
    }

    /// Computes shape function gradients at the integration points, along with the
    /// Jacobian determinant of the isoparametric map at each point.
    pub fn grad_op(&self, coords: &[f64], grad_op: &mut [f64], det_j: &mut [f64]) {
        physical_gradients::<T>(&self.shape_fcn_deriv, coords, grad_op, det_j)
    }

    /// Like [`grad_op`](Self::grad_op), but evaluated at the shifted integration points.
    pub fn shifted_grad_op(&self, coords: &[f64], grad_op: &mut [f64], det_j: &mut [f64]) {
        physical_gradients::<T>(&self.shifted_shape_fcn_deriv, coords, grad_op, det_j)
    }
}

/// Maps reference shape function derivatives to physical gradients.
///
/// A degenerate element has a singular Jacobian, which produces non-finite gradients rather
/// than an error.
fn physical_gradients<T: Topology>(reference_derivs: &[f64], coords: &[f64], grad_op: &mut [f64], det_j: &mut [f64]) {
    let nodes = T::NODES_PER_ELEMENT;
    let n_dim = T::N_DIM;
    let stride = nodes * n_dim;
    debug_assert_eq!(grad_op.len(), T::NUM_SCS_IP * stride);
    debug_assert_eq!(det_j.len(), T::NUM_SCS_IP);

    for ip in 0..T::NUM_SCS_IP {
        let derivs = &reference_derivs[ip * stride..(ip + 1) * stride];

        // Unused dimensions are padded with the identity, so that the 3x3 inverse restricted
        // to the leading block is the inverse of the actual Jacobian
        let mut jac = Matrix3::identity();
        for i in 0..n_dim {
            for j in 0..n_dim {
                jac[(i, j)] = (0..nodes)
                    .map(|n| coords[n * n_dim + i] * derivs[n * n_dim + j])
                    .sum();
            }
        }
        det_j[ip] = jac.determinant();
        let jac_inv = jac
            .try_inverse()
            .unwrap_or_else(|| Matrix3::from_element(f64::NAN));

        let out = &mut grad_op[ip * stride..(ip + 1) * stride];
        for n in 0..nodes {
            for i in 0..n_dim {
                out[n * n_dim + i] = (0..n_dim)
                    .map(|j| derivs[n * n_dim + j] * jac_inv[(j, i)])
                    .sum();
            }
        }
    }
}

/// Runtime queries of the subcontrol-surface evaluators, by element topology.
///
/// Fails with [`ConfigError::UnsupportedTopology`](crate::error::ConfigError::UnsupportedTopology) for
/// topologies without an evaluator.
#[derive(Debug, Copy, Clone, Default)]
pub struct MasterElementRepo;

impl MasterElementRepo {
    pub fn is_supported(topology: TopologyKind) -> bool {
        dispatch_topology!(topology, T => ()).is_ok()
    }

    pub fn num_integration_points(topology: TopologyKind) -> Result<usize> {
        dispatch_topology!(topology, T => T::NUM_SCS_IP)
    }

    pub fn adjacent_nodes(topology: TopologyKind) -> Result<&'static [[usize; 2]]> {
        dispatch_topology!(topology, T => T::ADJACENT_NODES)
    }
}
