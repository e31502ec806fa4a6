use crate::error::ConfigError;
use crate::kernel::ElemKernel;
use crate::mesh::MetaData;
use crate::options::SolutionOptions;
use crate::scratch::{
    AreavHandle, CoordsType, DataRequestsId, ElemDataRequests, GradOpHandle, OperatorVariant, ScalarFieldHandle,
    ScratchViews, ShapeFcnHandle,
};
use crate::topology::Topology;
use nalgebra::{DMatrix, DVector};
use std::marker::PhantomData;

/// Diffusion of a nodal scalar with a nodal diffusion coefficient.
///
/// The diffusion coefficient is interpolated to each integration point, and the diffusive flux
/// through the subcontrol surface is `-mu * grad(q) . A`. The shifted gradient operator is used
/// if it is enabled for the scalar in the solution options.
#[derive(Debug, Clone)]
pub struct ScalarDiffElemKernel<T: Topology> {
    requests: DataRequestsId,
    scalar: ScalarFieldHandle,
    diff_flux_coeff: ScalarFieldHandle,
    areav: AreavHandle,
    dndx: GradOpHandle,
    shape_fcn: ShapeFcnHandle,
    marker: PhantomData<T>,
}

impl<T: Topology> ScalarDiffElemKernel<T> {
    pub fn new(
        meta: &MetaData,
        options: &SolutionOptions,
        scalar_name: &str,
        diff_flux_coeff_name: &str,
        requests: &mut ElemDataRequests<T>,
    ) -> Result<Self, ConfigError> {
        let scalar = meta.get_field_ordinal(scalar_name)?;
        let diff_flux_coeff = meta.get_field_ordinal(diff_flux_coeff_name)?;
        let coordinates = meta.get_field_ordinal(options.get_coordinates_name())?;

        requests.add_coordinates_field(coordinates, CoordsType::Current);
        Ok(Self {
            requests: requests.id(),
            scalar: requests.gather_scalar(scalar),
            diff_flux_coeff: requests.gather_scalar(diff_flux_coeff),
            areav: requests.scs_areav(CoordsType::Current),
            dndx: requests.scs_grad_op(
                CoordsType::Current,
                OperatorVariant::shifted_if(options.get_shifted_grad_op(scalar_name)),
            ),
            shape_fcn: requests.scs_shape_fcn(OperatorVariant::Standard),
            marker: PhantomData,
        })
    }
}

impl<T: Topology> ElemKernel<T> for ScalarDiffElemKernel<T> {
    fn data_requests(&self) -> DataRequestsId {
        self.requests
    }

    fn execute(&self, lhs: &mut DMatrix<f64>, rhs: &mut DVector<f64>, scratch: &ScratchViews<T>) {
        let scalar = scratch.scalar(self.scalar);
        let diff_flux_coeff = scratch.scalar(self.diff_flux_coeff);
        let areav = scratch.scs_areav(self.areav);
        let dndx = scratch.scs_grad_op(self.dndx);
        let shape_fcn = scratch.scs_shape_fcn(self.shape_fcn);

        for (ip, &[il, ir]) in T::ADJACENT_NODES.iter().enumerate() {
            let mu_ip: f64 = (0..T::NODES_PER_ELEMENT)
                .map(|ic| shape_fcn[(ip, ic)] * diff_flux_coeff[ic])
                .sum();

            let mut q_diff = 0.0;
            for ic in 0..T::NODES_PER_ELEMENT {
                let lhsfac: f64 = -mu_ip * (0..T::N_DIM).map(|j| dndx[(ip, ic, j)] * areav[(ip, j)]).sum::<f64>();
                q_diff += lhsfac * scalar[ic];
                lhs[(il, ic)] += lhsfac;
                lhs[(ir, ic)] -= lhsfac;
            }

            rhs[il] -= q_diff;
            rhs[ir] += q_diff;
        }
    }
}
