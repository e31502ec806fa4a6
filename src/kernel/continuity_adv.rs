use crate::error::ConfigError;
use crate::kernel::ElemKernel;
use crate::mesh::MetaData;
use crate::options::{SolutionOptions, TimeIntegrator};
use crate::scratch::{
    AreavHandle, CoordsType, DataRequestsId, ElemDataRequests, GradOpHandle, OperatorVariant, ScalarFieldHandle,
    ScratchViews, ShapeFcnHandle, VectorFieldHandle,
};
use crate::topology::Topology;
use nalgebra::{DMatrix, DVector, Vector3};
use std::marker::PhantomData;

/// Advection and pressure-projection stabilization of the continuity equation.
///
/// The mass flow rate through each subcontrol surface is interpolated from nodal velocity and
/// density, and stabilized with the difference between the pressure gradient at the surface
/// and the interpolated nodal pressure gradient, both scaled by the inverse diagonal of the
/// momentum equation. The Jacobian is the linearization of the stabilization term with respect
/// to pressure, i.e. a Poisson operator.
///
/// Contributions are scaled by `1 / tau`, where `tau = dt / gamma1` is the projection time
/// scale fixed by [`setup`](ElemKernel::setup).
///
/// The `momentum_diag` field must be nonzero everywhere. A zero diagonal produces non-finite
/// contributions rather than an error.
#[derive(Debug, Clone)]
pub struct ContinuityAdvElemKernel<T: Topology> {
    requests: DataRequestsId,
    velocity: VectorFieldHandle,
    density: ScalarFieldHandle,
    pressure: ScalarFieldHandle,
    udiag: ScalarFieldHandle,
    gpdx: VectorFieldHandle,
    areav: AreavHandle,
    dndx: GradOpHandle,
    dndx_lhs: GradOpHandle,
    shape_fcn: ShapeFcnHandle,
    interp_together: f64,
    proj_time_scale: f64,
    marker: PhantomData<T>,
}

impl<T: Topology> ContinuityAdvElemKernel<T> {
    pub fn new(
        meta: &MetaData,
        options: &SolutionOptions,
        requests: &mut ElemDataRequests<T>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let shift_poisson = options.get_shifted_grad_op("pressure");
        let reduced_sensitivities = options.reduced_sens_poisson;

        let velocity_name = if options.mesh_motion { "velocity_rtm" } else { "velocity" };
        let velocity = meta.get_field_ordinal(velocity_name)?;
        let gpdx = meta.get_field_ordinal("dpdx")?;
        let pressure = meta.get_field_ordinal("pressure")?;
        let density = meta.get_field_ordinal("density")?;
        let coordinates = meta.get_field_ordinal(options.get_coordinates_name())?;
        let udiag = meta.get_field_ordinal("momentum_diag")?;

        requests.add_coordinates_field(coordinates, CoordsType::Current);
        let kernel = Self {
            requests: requests.id(),
            velocity: requests.gather_vector(velocity),
            density: requests.gather_scalar(density),
            pressure: requests.gather_scalar(pressure),
            udiag: requests.gather_scalar(udiag),
            gpdx: requests.gather_vector(gpdx),
            areav: requests.scs_areav(CoordsType::Current),
            dndx: requests.scs_grad_op(CoordsType::Current, OperatorVariant::shifted_if(shift_poisson)),
            dndx_lhs: requests.scs_grad_op(
                CoordsType::Current,
                OperatorVariant::shifted_if(shift_poisson || reduced_sensitivities),
            ),
            shape_fcn: requests.scs_shape_fcn(OperatorVariant::shifted_if(options.shift_mdot)),
            interp_together: options.mdot_interp,
            proj_time_scale: 1.0,
            marker: PhantomData,
        };
        Ok(kernel)
    }

    /// The projection time scale `dt / gamma1` of the current solve.
    pub fn proj_time_scale(&self) -> f64 {
        self.proj_time_scale
    }
}

impl<T: Topology> ElemKernel<T> for ContinuityAdvElemKernel<T> {
    fn data_requests(&self) -> DataRequestsId {
        self.requests
    }

    fn setup(&mut self, time_integrator: &TimeIntegrator) {
        self.proj_time_scale = time_integrator.time_step() / time_integrator.gamma1();
    }

    fn execute(&self, lhs: &mut DMatrix<f64>, rhs: &mut DVector<f64>, scratch: &ScratchViews<T>) {
        let density = scratch.scalar(self.density);
        let pressure = scratch.scalar(self.pressure);
        let udiag = scratch.scalar(self.udiag);
        let velocity = scratch.vector(self.velocity);
        let gpdx = scratch.vector(self.gpdx);
        let areav = scratch.scs_areav(self.areav);
        let dndx = scratch.scs_grad_op(self.dndx);
        let dndx_lhs = scratch.scs_grad_op(self.dndx_lhs);
        let shape_fcn = scratch.scs_shape_fcn(self.shape_fcn);

        let inv_tau = 1.0 / self.proj_time_scale;
        let om_interp_together = 1.0 - self.interp_together;

        for (ip, &[il, ir]) in T::ADJACENT_NODES.iter().enumerate() {
            let proj_time_scale_ip: f64 = (0..T::NODES_PER_ELEMENT)
                .map(|ic| shape_fcn[(ip, ic)] / udiag[ic])
                .sum();

            let mut rho_ip = 0.0;
            let mut u_ip = Vector3::<f64>::zeros();
            let mut rho_u_ip = Vector3::<f64>::zeros();
            let mut gpdx_ip = Vector3::<f64>::zeros();
            let mut dpdx_ip = Vector3::<f64>::zeros();

            for ic in 0..T::NODES_PER_ELEMENT {
                let r = shape_fcn[(ip, ic)];
                let nodal_rho = density[ic];
                let udiag_inv = 1.0 / udiag[ic];

                rho_ip += r * nodal_rho;

                let mut lhsfac = 0.0;
                for j in 0..T::N_DIM {
                    gpdx_ip[j] += r * gpdx[(ic, j)] * udiag_inv;
                    u_ip[j] += r * velocity[(ic, j)];
                    rho_u_ip[j] += r * nodal_rho * velocity[(ic, j)];
                    dpdx_ip[j] += dndx[(ip, ic, j)] * pressure[ic];
                    lhsfac -= dndx_lhs[(ip, ic, j)] * areav[(ip, j)] * proj_time_scale_ip;
                }

                lhs[(il, ic)] += lhsfac * inv_tau;
                lhs[(ir, ic)] -= lhsfac * inv_tau;
            }

            let mdot: f64 = (0..T::N_DIM)
                .map(|j| {
                    let advection = self.interp_together * rho_u_ip[j] + om_interp_together * rho_ip * u_ip[j];
                    let stabilization = proj_time_scale_ip * dpdx_ip[j] - gpdx_ip[j];
                    (advection - stabilization) * areav[(ip, j)]
                })
                .sum();

            rhs[il] -= mdot * inv_tau;
            rhs[ir] += mdot * inv_tau;
        }
    }
}
