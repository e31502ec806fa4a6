//! Element terms contributing to a local residual and Jacobian.
use crate::error::ConfigError;
use crate::mesh::MetaData;
use crate::options::{SolutionOptions, TimeIntegrator};
use crate::scratch::{DataRequestsId, ElemDataRequests, ScratchViews};
use crate::topology::Topology;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

mod continuity_adv;
mod scalar_diff;

pub use continuity_adv::*;
pub use scalar_diff::*;

/// A term evaluated element by element on the subcontrol surfaces of elements of topology `T`.
///
/// Terms declare the data they consume when they are constructed. `execute` must add its
/// contributions to `lhs` and `rhs`, since several terms share the same local buffers.
pub trait ElemKernel<T: Topology> {
    /// The requests the term declared its data on. Staged data can only be read through
    /// a layout finalized from these requests.
    fn data_requests(&self) -> DataRequestsId;

    /// Receives the time integration coefficients, once per solve.
    fn setup(&mut self, _time_integrator: &TimeIntegrator) {}

    /// Accumulates the contributions of one staged element.
    ///
    /// `lhs` is indexed by `(row node, column node)` and `rhs` by node, both with local node numbers.
    fn execute(&self, lhs: &mut DMatrix<f64>, rhs: &mut DVector<f64>, scratch: &ScratchViews<T>);
}

/// The closed set of terms an element algorithm can run.
///
/// Dispatch happens through a `match` on every element rather than through a trait object.
#[derive(Debug, Clone)]
pub enum ElemKernelVariant<T: Topology> {
    ContinuityAdv(ContinuityAdvElemKernel<T>),
    ScalarDiff(ScalarDiffElemKernel<T>),
}

impl<T: Topology> ElemKernel<T> for ElemKernelVariant<T> {
    fn data_requests(&self) -> DataRequestsId {
        match self {
            Self::ContinuityAdv(kernel) => kernel.data_requests(),
            Self::ScalarDiff(kernel) => kernel.data_requests(),
        }
    }

    fn setup(&mut self, time_integrator: &TimeIntegrator) {
        match self {
            Self::ContinuityAdv(kernel) => kernel.setup(time_integrator),
            Self::ScalarDiff(kernel) => kernel.setup(time_integrator),
        }
    }

    #[inline]
    fn execute(&self, lhs: &mut DMatrix<f64>, rhs: &mut DVector<f64>, scratch: &ScratchViews<T>) {
        match self {
            Self::ContinuityAdv(kernel) => kernel.execute(lhs, rhs, scratch),
            Self::ScalarDiff(kernel) => kernel.execute(lhs, rhs, scratch),
        }
    }
}

impl<T: Topology> From<ContinuityAdvElemKernel<T>> for ElemKernelVariant<T> {
    fn from(kernel: ContinuityAdvElemKernel<T>) -> Self {
        Self::ContinuityAdv(kernel)
    }
}

impl<T: Topology> From<ScalarDiffElemKernel<T>> for ElemKernelVariant<T> {
    fn from(kernel: ScalarDiffElemKernel<T>) -> Self {
        Self::ScalarDiff(kernel)
    }
}

/// A topology-independent description of a term, instantiated for a concrete topology once the
/// topology of the element block is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelSpec {
    ContinuityAdv,
    ScalarDiff { scalar: String, diff_flux_coeff: String },
}

impl KernelSpec {
    pub fn build<T: Topology>(
        &self,
        meta: &MetaData,
        options: &SolutionOptions,
        requests: &mut ElemDataRequests<T>,
    ) -> Result<ElemKernelVariant<T>, ConfigError> {
        match self {
            Self::ContinuityAdv => ContinuityAdvElemKernel::new(meta, options, requests).map(Into::into),
            Self::ScalarDiff { scalar, diff_flux_coeff } => {
                ScalarDiffElemKernel::new(meta, options, scalar, diff_flux_coeff, requests).map(Into::into)
            }
        }
    }
}
