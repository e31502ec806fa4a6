//! Solver options consumed when terms and algorithms are constructed.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named constants of the SST turbulence model.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurbulenceModelConstants {
    pub sigma_k_one: f64,
    pub sigma_k_two: f64,
    pub sigma_w_one: f64,
    pub sigma_w_two: f64,
}

impl Default for TurbulenceModelConstants {
    fn default() -> Self {
        Self {
            sigma_k_one: 0.85,
            sigma_k_two: 1.0,
            sigma_w_one: 0.5,
            sigma_w_two: 0.856,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolutionOptions {
    /// Mesh moves rigidly; advection uses the velocity relative to the mesh.
    pub mesh_motion: bool,
    /// Mesh deforms; geometry is taken from the current rather than the model coordinates.
    pub mesh_deformation: bool,
    /// Interpolate the mass flow rate with the shifted shape functions.
    pub shift_mdot: bool,
    /// Per-equation flag selecting the shifted gradient operator, keyed by the solved field.
    pub shifted_grad_op: BTreeMap<String, bool>,
    /// Use the shifted gradient operator for the pressure Poisson Jacobian only.
    pub reduced_sens_poisson: bool,
    /// Blend between interpolating the mass flux as a whole (1) and as the product of
    /// separately interpolated density and velocity (0).
    pub mdot_interp: f64,
    pub turbulence_model_constants: TurbulenceModelConstants,
}

impl Default for SolutionOptions {
    fn default() -> Self {
        Self {
            mesh_motion: false,
            mesh_deformation: false,
            shift_mdot: false,
            shifted_grad_op: BTreeMap::new(),
            reduced_sens_poisson: false,
            mdot_interp: 1.0,
            turbulence_model_constants: TurbulenceModelConstants::default(),
        }
    }
}

impl SolutionOptions {
    pub fn get_shifted_grad_op(&self, field_name: &str) -> bool {
        self.shifted_grad_op.get(field_name).copied().unwrap_or(false)
    }

    pub fn get_coordinates_name(&self) -> &'static str {
        if self.mesh_deformation {
            "current_coordinates"
        } else {
            "coordinates"
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &str, reason: String| ConfigError::InvalidOption {
            name: name.to_string(),
            reason,
        };
        if !(0.0..=1.0).contains(&self.mdot_interp) {
            return Err(invalid(
                "mdot_interp",
                format!("{} is not in the interval [0, 1]", self.mdot_interp),
            ));
        }
        let constants = &self.turbulence_model_constants;
        let named = [
            ("sigma_k_one", constants.sigma_k_one),
            ("sigma_k_two", constants.sigma_k_two),
            ("sigma_w_one", constants.sigma_w_one),
            ("sigma_w_two", constants.sigma_w_two),
        ];
        if let Some((name, value)) = named.iter().find(|(_, value)| !value.is_finite()) {
            return Err(invalid(name, format!("{value} is not finite")));
        }
        Ok(())
    }
}

/// Time step and implicit scheme coefficients of the current solve.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeIntegrator {
    time_step: f64,
    gamma1: f64,
    gamma2: f64,
    gamma3: f64,
}

impl TimeIntegrator {
    pub fn backward_euler(time_step: f64) -> Self {
        Self::with_gammas(time_step, 1.0, -1.0, 0.0)
    }

    /// Second-order backward differences with a possibly varying time step.
    pub fn bdf2(time_step: f64, previous_time_step: f64) -> Self {
        let tau = time_step / previous_time_step;
        Self::with_gammas(
            time_step,
            (1.0 + 2.0 * tau) / (1.0 + tau),
            -(1.0 + tau),
            tau * tau / (1.0 + tau),
        )
    }

    pub fn with_gammas(time_step: f64, gamma1: f64, gamma2: f64, gamma3: f64) -> Self {
        Self {
            time_step,
            gamma1,
            gamma2,
            gamma3,
        }
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn gamma1(&self) -> f64 {
        self.gamma1
    }

    pub fn gamma2(&self) -> f64 {
        self.gamma2
    }

    pub fn gamma3(&self) -> f64 {
        self.gamma3
    }
}
