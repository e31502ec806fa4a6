//! Declaration and staging of per-element data.
//!
//! Terms declare the nodal fields and reference-element quantities they consume on an
//! [`ElemDataRequests`] shared by every term of an element pass. Each declaration returns a
//! handle, and the handle is the only way to read the staged data back from [`ScratchViews`],
//! so a term cannot consume anything it did not declare. Identical declarations resolve to the
//! same storage, which means that every field is gathered and every reference-element quantity
//! is evaluated once per element no matter how many terms consume it.
use crate::error::ConfigError;
use crate::field::{FieldOrdinal, FieldView};
use crate::master_element::{MasterElementCall, ScsMasterElement};
use crate::mesh::MetaData;
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::ops::Index;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The coordinate field defining the geometry of reference-element quantities.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoordsType {
    /// Coordinates of the deformed mesh at the current time.
    Current,
    /// Coordinates of the undeformed mesh.
    Model,
}

impl CoordsType {
    pub const ALL: [CoordsType; 2] = [CoordsType::Current, CoordsType::Model];

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Which of the two integration rules a shape function or gradient operator is evaluated with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorVariant {
    Standard,
    /// Evaluated at the edge midpoints rather than the subcontrol-surface centroids.
    Shifted,
}

impl OperatorVariant {
    pub fn shifted_if(shifted: bool) -> Self {
        if shifted {
            Self::Shifted
        } else {
            Self::Standard
        }
    }
}

/// Identifies the [`ElemDataRequests`] a handle was issued by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DataRequestsId(usize);

static NEXT_DATA_REQUESTS_ID: AtomicUsize = AtomicUsize::new(0);

/// Handle to a gathered nodal field with an arbitrary number of components.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NodalFieldHandle {
    requests: DataRequestsId,
    slot: usize,
}

/// Handle to a gathered nodal scalar field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScalarFieldHandle {
    requests: DataRequestsId,
    slot: usize,
}

/// Handle to a gathered nodal vector field with one component per spatial dimension.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VectorFieldHandle {
    requests: DataRequestsId,
    slot: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AreavHandle {
    requests: DataRequestsId,
    coords: CoordsType,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShapeFcnHandle {
    requests: DataRequestsId,
    variant: OperatorVariant,
}

/// Handle to a gradient operator and the Jacobian determinants computed along with it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GradOpHandle {
    requests: DataRequestsId,
    coords: CoordsType,
    variant: OperatorVariant,
}

#[derive(Debug, Clone)]
struct FieldRequest {
    field: FieldOrdinal,
    widths: BTreeSet<usize>,
}

/// The data requirements of all terms sharing an element pass.
///
/// Every instance has its own [`DataRequestsId`], which is carried by the handles it issues and
/// by the layout it is finalized into.
#[derive(Debug)]
pub struct ElemDataRequests<T: Topology> {
    id: DataRequestsId,
    fields: Vec<FieldRequest>,
    coordinates: [Vec<FieldOrdinal>; 2],
    calls: [BTreeSet<MasterElementCall>; 2],
    marker: PhantomData<T>,
}

impl<T: Topology> Default for ElemDataRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Topology> ElemDataRequests<T> {
    pub fn new() -> Self {
        Self {
            id: DataRequestsId(NEXT_DATA_REQUESTS_ID.fetch_add(1, Ordering::Relaxed)),
            fields: Vec::new(),
            coordinates: Default::default(),
            calls: Default::default(),
            marker: PhantomData,
        }
    }

    pub fn id(&self) -> DataRequestsId {
        self.id
    }

    /// Requests that the field be gathered with `width` components per node.
    ///
    /// Repeated requests for the same field share one gather. Requests for the same field with
    /// different widths are rejected when the requests are finalized.
    pub fn add_gathered_nodal_field(&mut self, field: FieldOrdinal, width: usize) -> NodalFieldHandle {
        let slot = match self.fields.iter().position(|request| request.field == field) {
            Some(slot) => slot,
            None => {
                self.fields.push(FieldRequest {
                    field,
                    widths: BTreeSet::new(),
                });
                self.fields.len() - 1
            }
        };
        self.fields[slot].widths.insert(width);
        NodalFieldHandle {
            requests: self.id,
            slot,
        }
    }

    pub fn gather_scalar(&mut self, field: FieldOrdinal) -> ScalarFieldHandle {
        let NodalFieldHandle { requests, slot } = self.add_gathered_nodal_field(field, 1);
        ScalarFieldHandle { requests, slot }
    }

    pub fn gather_vector(&mut self, field: FieldOrdinal) -> VectorFieldHandle {
        let NodalFieldHandle { requests, slot } = self.add_gathered_nodal_field(field, T::N_DIM);
        VectorFieldHandle { requests, slot }
    }

    /// Declares the field holding the nodal coordinates of the given type, and gathers it.
    pub fn add_coordinates_field(&mut self, field: FieldOrdinal, coords: CoordsType) -> VectorFieldHandle {
        let declared = &mut self.coordinates[coords.index()];
        if !declared.contains(&field) {
            declared.push(field);
        }
        self.gather_vector(field)
    }

    fn add_master_element_call(&mut self, call: MasterElementCall, coords: CoordsType) {
        self.calls[coords.index()].insert(call);
    }

    pub fn scs_areav(&mut self, coords: CoordsType) -> AreavHandle {
        self.add_master_element_call(MasterElementCall::ScsAreav, coords);
        AreavHandle {
            requests: self.id,
            coords,
        }
    }

    pub fn scs_shape_fcn(&mut self, variant: OperatorVariant) -> ShapeFcnHandle {
        let call = match variant {
            OperatorVariant::Standard => MasterElementCall::ScsShapeFcn,
            OperatorVariant::Shifted => MasterElementCall::ScsShiftedShapeFcn,
        };
        // Shape functions do not depend on coordinates, all coordinate types share them
        self.add_master_element_call(call, CoordsType::Current);
        ShapeFcnHandle {
            requests: self.id,
            variant,
        }
    }

    pub fn scs_grad_op(&mut self, coords: CoordsType, variant: OperatorVariant) -> GradOpHandle {
        let call = match variant {
            OperatorVariant::Standard => MasterElementCall::ScsGradOp,
            OperatorVariant::Shifted => MasterElementCall::ScsShiftedGradOp,
        };
        self.add_master_element_call(call, coords);
        GradOpHandle {
            requests: self.id,
            coords,
            variant,
        }
    }

    /// The distinct fields to gather.
    pub fn fields(&self) -> impl Iterator<Item = FieldOrdinal> + '_ {
        self.fields.iter().map(|request| request.field)
    }

    /// The distinct reference-element quantities to evaluate for each coordinate type.
    pub fn master_element_calls(&self, coords: CoordsType) -> impl Iterator<Item = MasterElementCall> + '_ {
        self.calls[coords.index()].iter().copied()
    }

    /// Validates the requests against the mesh metadata and fixes the staging layout.
    pub fn finalize(&self, meta: &MetaData) -> Result<ScratchLayout<T>, ConfigError> {
        let mut slots = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        for request in &self.fields {
            let name = meta.field_name(request.field);
            let mut widths = request.widths.iter().copied();
            let width = widths.next().unwrap_or(1);
            if let Some(second) = widths.next() {
                return Err(ConfigError::ConflictingRequest {
                    field: name.to_string(),
                    first: width,
                    second,
                });
            }
            meta.check_field_width(request.field, width)?;
            slots.push(FieldSlot {
                field: request.field,
                width,
                offset,
            });
            offset += width * T::NODES_PER_ELEMENT;
        }

        let mut coordinates = [None; 2];
        for coords in CoordsType::ALL {
            let declared = &self.coordinates[coords.index()];
            if let [first, second, ..] = declared.as_slice() {
                return Err(ConfigError::InvalidOption {
                    name: format!("{coords:?} coordinates"),
                    reason: format!(
                        "declared as both `{}` and `{}`",
                        meta.field_name(*first),
                        meta.field_name(*second)
                    ),
                });
            }
            coordinates[coords.index()] = declared
                .first()
                .and_then(|field| slots.iter().position(|slot| slot.field == *field));

            if let Some(call) = self.calls[coords.index()]
                .iter()
                .find(|call| call.requires_coordinates())
            {
                if coordinates[coords.index()].is_none() {
                    return Err(ConfigError::MissingCoordinates { call: *call, coords });
                }
            }
        }

        Ok(ScratchLayout {
            requests: self.id,
            slots,
            gathered_len: offset,
            coordinates,
            calls: self.calls.clone(),
            marker: PhantomData,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct FieldSlot {
    field: FieldOrdinal,
    width: usize,
    offset: usize,
}

/// Validated and deduplicated data requests, ready to size staging buffers.
#[derive(Debug, Clone)]
pub struct ScratchLayout<T: Topology> {
    requests: DataRequestsId,
    slots: Vec<FieldSlot>,
    gathered_len: usize,
    coordinates: [Option<usize>; 2],
    calls: [BTreeSet<MasterElementCall>; 2],
    marker: PhantomData<T>,
}

impl<T: Topology> ScratchLayout<T> {
    /// The requests the layout was finalized from. Only their handles can read staged data.
    pub fn requests(&self) -> DataRequestsId {
        self.requests
    }

    /// Fields to gather, in the order staging expects their views.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldOrdinal> + '_ {
        self.slots.iter().map(|slot| slot.field)
    }

    pub fn num_fields(&self) -> usize {
        self.slots.len()
    }

    fn requires(&self, coords: CoordsType, call: MasterElementCall) -> bool {
        self.calls[coords.index()].contains(&call)
    }
}

/// Instrumentation of the staging work done by an element pass.
#[derive(Debug, Default)]
pub struct StagingCounters {
    elements_staged: AtomicUsize,
    nodal_field_gathers: AtomicUsize,
    master_element_evaluations: AtomicUsize,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StagingCounts {
    pub elements_staged: usize,
    /// Number of (element, field) gathers.
    pub nodal_field_gathers: usize,
    /// Number of (element, coordinate-dependent reference-element quantity) evaluations.
    pub master_element_evaluations: usize,
}

impl StagingCounters {
    pub fn counts(&self) -> StagingCounts {
        StagingCounts {
            elements_staged: self.elements_staged.load(Ordering::Relaxed),
            nodal_field_gathers: self.nodal_field_gathers.load(Ordering::Relaxed),
            master_element_evaluations: self.master_element_evaluations.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.elements_staged.store(0, Ordering::Relaxed);
        self.nodal_field_gathers.store(0, Ordering::Relaxed);
        self.master_element_evaluations.store(0, Ordering::Relaxed);
    }

    fn record_element(&self, gathers: usize, evaluations: usize) {
        self.elements_staged.fetch_add(1, Ordering::Relaxed);
        self.nodal_field_gathers.fetch_add(gathers, Ordering::Relaxed);
        self.master_element_evaluations
            .fetch_add(evaluations, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default)]
struct GeometryViews {
    areav: Vec<f64>,
    grad_op: Vec<f64>,
    shifted_grad_op: Vec<f64>,
    grad_op_det_j: Vec<f64>,
    shifted_grad_op_det_j: Vec<f64>,
}

/// Working memory holding the staged data of one element.
///
/// Each concurrently executing task owns its own instance, and staging an element overwrites
/// the data of the previous one.
#[derive(Debug, Clone)]
pub struct ScratchViews<T: Topology> {
    layout: ScratchLayout<T>,
    gathered: Vec<f64>,
    shape_fcn: Vec<f64>,
    shifted_shape_fcn: Vec<f64>,
    geometry: [GeometryViews; 2],
}

impl<T: Topology> ScratchViews<T> {
    pub fn new(layout: &ScratchLayout<T>, master_element: &ScsMasterElement<T>) -> Self {
        let nodes = T::NODES_PER_ELEMENT;
        let num_ip = T::NUM_SCS_IP;

        let mut shape_fcn = vec![0.0; num_ip * nodes];
        let mut shifted_shape_fcn = vec![0.0; num_ip * nodes];
        master_element.shape_fcn(&mut shape_fcn);
        master_element.shifted_shape_fcn(&mut shifted_shape_fcn);

        let geometry = CoordsType::ALL.map(|coords| {
            let sized = |call, len| {
                if layout.requires(coords, call) {
                    vec![0.0; len]
                } else {
                    Vec::new()
                }
            };
            GeometryViews {
                areav: sized(MasterElementCall::ScsAreav, num_ip * T::N_DIM),
                grad_op: sized(MasterElementCall::ScsGradOp, num_ip * nodes * T::N_DIM),
                shifted_grad_op: sized(MasterElementCall::ScsShiftedGradOp, num_ip * nodes * T::N_DIM),
                grad_op_det_j: sized(MasterElementCall::ScsGradOp, num_ip),
                shifted_grad_op_det_j: sized(MasterElementCall::ScsShiftedGradOp, num_ip),
            }
        });

        Self {
            layout: layout.clone(),
            gathered: vec![0.0; layout.gathered_len],
            shape_fcn,
            shifted_shape_fcn,
            geometry,
        }
    }

    /// Gathers the requested fields for the element with the given nodes, and evaluates the
    /// requested reference-element quantities.
    ///
    /// `fields` holds one view per field of the layout, in the layout's order.
    pub fn stage(
        &mut self,
        master_element: &ScsMasterElement<T>,
        fields: &[FieldView<'_>],
        element_nodes: &[usize],
        counters: &StagingCounters,
    ) {
        debug_assert_eq!(fields.len(), self.layout.slots.len());
        debug_assert_eq!(element_nodes.len(), T::NODES_PER_ELEMENT);

        let mut gathers = 0;
        let mut evaluations = 0;
        for (slot, view) in self.layout.slots.iter().zip(fields) {
            debug_assert_eq!(view.width(), slot.width);
            let width = slot.width;
            let out = &mut self.gathered[slot.offset..slot.offset + width * T::NODES_PER_ELEMENT];
            for (n, &node) in element_nodes.iter().enumerate() {
                out[n * width..(n + 1) * width].copy_from_slice(view.entity(node));
            }
            gathers += 1;
        }

        for coords in CoordsType::ALL {
            let Some(coords_slot) = self.layout.coordinates[coords.index()] else {
                continue;
            };
            let slot = self.layout.slots[coords_slot];
            let x = &self.gathered[slot.offset..slot.offset + slot.width * T::NODES_PER_ELEMENT];
            let geometry = &mut self.geometry[coords.index()];
            if self.layout.requires(coords, MasterElementCall::ScsAreav) {
                master_element.determinant(x, &mut geometry.areav);
                evaluations += 1;
            }
            if self.layout.requires(coords, MasterElementCall::ScsGradOp) {
                master_element.grad_op(x, &mut geometry.grad_op, &mut geometry.grad_op_det_j);
                evaluations += 1;
            }
            if self.layout.requires(coords, MasterElementCall::ScsShiftedGradOp) {
                master_element.shifted_grad_op(x, &mut geometry.shifted_grad_op, &mut geometry.shifted_grad_op_det_j);
                evaluations += 1;
            }
        }

        counters.record_element(gathers, evaluations);
    }

    fn check_issued_by_layout(&self, requests: DataRequestsId) {
        debug_assert_eq!(
            requests, self.layout.requests,
            "handle was issued by different data requests than the staged layout"
        );
    }

    fn gathered(&self, slot: usize) -> &[f64] {
        let slot = &self.layout.slots[slot];
        &self.gathered[slot.offset..slot.offset + slot.width * T::NODES_PER_ELEMENT]
    }

    /// Gathered values of a field, indexed by `(node, component)`.
    pub fn nodal_field(&self, handle: NodalFieldHandle) -> ScratchView2<'_> {
        self.check_issued_by_layout(handle.requests);
        let width = self.layout.slots[handle.slot].width;
        ScratchView2::new(self.gathered(handle.slot), width)
    }

    /// Gathered values of a scalar field, indexed by node.
    pub fn scalar(&self, handle: ScalarFieldHandle) -> ScratchView1<'_> {
        self.check_issued_by_layout(handle.requests);
        ScratchView1::new(self.gathered(handle.slot))
    }

    /// Gathered values of a vector field, indexed by `(node, dimension)`.
    pub fn vector(&self, handle: VectorFieldHandle) -> ScratchView2<'_> {
        self.check_issued_by_layout(handle.requests);
        ScratchView2::new(self.gathered(handle.slot), T::N_DIM)
    }

    /// Area vectors, indexed by `(ip, dimension)`.
    pub fn scs_areav(&self, handle: AreavHandle) -> ScratchView2<'_> {
        self.check_issued_by_layout(handle.requests);
        ScratchView2::new(&self.geometry[handle.coords.index()].areav, T::N_DIM)
    }

    /// Shape functions, indexed by `(ip, node)`.
    pub fn scs_shape_fcn(&self, handle: ShapeFcnHandle) -> ScratchView2<'_> {
        self.check_issued_by_layout(handle.requests);
        let values = match handle.variant {
            OperatorVariant::Standard => &self.shape_fcn,
            OperatorVariant::Shifted => &self.shifted_shape_fcn,
        };
        ScratchView2::new(values, T::NODES_PER_ELEMENT)
    }

    /// Shape function gradients, indexed by `(ip, node, dimension)`.
    pub fn scs_grad_op(&self, handle: GradOpHandle) -> ScratchView3<'_> {
        self.check_issued_by_layout(handle.requests);
        let geometry = &self.geometry[handle.coords.index()];
        let values = match handle.variant {
            OperatorVariant::Standard => &geometry.grad_op,
            OperatorVariant::Shifted => &geometry.shifted_grad_op,
        };
        ScratchView3::new(values, T::NODES_PER_ELEMENT, T::N_DIM)
    }

    /// Jacobian determinants at the integration points of the gradient operator, indexed by ip.
    pub fn scs_det_j(&self, handle: GradOpHandle) -> ScratchView1<'_> {
        self.check_issued_by_layout(handle.requests);
        let geometry = &self.geometry[handle.coords.index()];
        let values = match handle.variant {
            OperatorVariant::Standard => &geometry.grad_op_det_j,
            OperatorVariant::Shifted => &geometry.shifted_grad_op_det_j,
        };
        ScratchView1::new(values)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ScratchView1<'a> {
    data: &'a [f64],
}

impl<'a> ScratchView1<'a> {
    pub fn new(data: &'a [f64]) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }
}

impl<'a> Index<usize> for ScratchView1<'a> {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ScratchView2<'a> {
    data: &'a [f64],
    cols: usize,
}

impl<'a> ScratchView2<'a> {
    pub fn new(data: &'a [f64], cols: usize) -> Self {
        debug_assert_eq!(data.len() % cols, 0);
        Self { data, cols }
    }

    pub fn row(&self, i: usize) -> &'a [f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }
}

impl<'a> Index<(usize, usize)> for ScratchView2<'a> {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        debug_assert!(j < self.cols);
        &self.data[i * self.cols + j]
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ScratchView3<'a> {
    data: &'a [f64],
    dim1: usize,
    dim2: usize,
}

impl<'a> ScratchView3<'a> {
    pub fn new(data: &'a [f64], dim1: usize, dim2: usize) -> Self {
        debug_assert_eq!(data.len() % (dim1 * dim2), 0);
        Self { data, dim1, dim2 }
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }
}

impl<'a> Index<(usize, usize, usize)> for ScratchView3<'a> {
    type Output = f64;

    fn index(&self, (i, j, k): (usize, usize, usize)) -> &f64 {
        debug_assert!(j < self.dim1 && k < self.dim2);
        &self.data[(i * self.dim1 + j) * self.dim2 + k]
    }
}
