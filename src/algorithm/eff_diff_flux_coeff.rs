use crate::algorithm::{Algorithm, PassContext};
use crate::error::ConfigError;
use crate::field::{FieldOrdinal, MemorySpace};
use crate::mesh::MeshDb;
use crate::options::SolutionOptions;
use crate::selector::Selector;
use eyre::WrapErr;
use fixedbitset::FixedBitSet;
use log::{debug, info, warn};
use rayon::prelude::*;

/// Name of the nodal field blending between the inner and outer SST model constants.
pub const SST_F_ONE_BLENDING: &str = "sst_f_one_blending";

/// Computes the effective diffusivity of a turbulence transport equation at the nodes,
///
/// ```text
/// evisc = visc + tvisc * (f1 * sigma_one + (1 - f1) * sigma_two),
/// ```
///
/// where `f1` is the SST blending function. Updates every locally owned or shared node on
/// which the molecular viscosity is defined, and leaves all other nodes untouched. The result
/// is written on the device.
#[derive(Debug, Clone)]
pub struct EffDiffFluxCoeffAlg {
    visc: FieldOrdinal,
    tvisc: FieldOrdinal,
    evisc: FieldOrdinal,
    f_one_blend: FieldOrdinal,
    sigma_one: f64,
    sigma_two: f64,
    selector: Selector,
    nodes: FixedBitSet,
}

impl EffDiffFluxCoeffAlg {
    pub fn new(
        mesh: &MeshDb,
        visc_name: &str,
        tvisc_name: &str,
        evisc_name: &str,
        sigma_one: f64,
        sigma_two: f64,
    ) -> Result<Self, ConfigError> {
        let meta = mesh.meta_data();
        let visc = meta.get_field_ordinal(visc_name)?;
        let tvisc = meta.get_field_ordinal(tvisc_name)?;
        let evisc = meta.get_field_ordinal(evisc_name)?;
        let f_one_blend = meta.get_field_ordinal(SST_F_ONE_BLENDING)?;

        for field in [visc, tvisc, evisc, f_one_blend] {
            meta.check_field_width(field, 1)?;
        }
        if [visc, tvisc, f_one_blend].contains(&evisc) {
            return Err(ConfigError::AliasedField {
                name: evisc_name.to_string(),
            });
        }

        let mut algorithm = Self {
            visc,
            tvisc,
            evisc,
            f_one_blend,
            sigma_one,
            sigma_two,
            selector: (Selector::locally_owned() | Selector::globally_shared()) & Selector::field(visc),
            nodes: FixedBitSet::new(),
        };
        algorithm.reconfigure(mesh);
        info!(
            "Created effective diffusivity update of `{}` with sigma = ({}, {})",
            evisc_name, sigma_one, sigma_two
        );
        Ok(algorithm)
    }

    /// The effective diffusivity of turbulent kinetic energy.
    pub fn sst_k(
        mesh: &MeshDb,
        options: &SolutionOptions,
        visc_name: &str,
        tvisc_name: &str,
        evisc_name: &str,
    ) -> Result<Self, ConfigError> {
        let constants = &options.turbulence_model_constants;
        Self::new(mesh, visc_name, tvisc_name, evisc_name, constants.sigma_k_one, constants.sigma_k_two)
    }

    /// The effective diffusivity of the specific dissipation rate.
    pub fn sst_omega(
        mesh: &MeshDb,
        options: &SolutionOptions,
        visc_name: &str,
        tvisc_name: &str,
        evisc_name: &str,
    ) -> Result<Self, ConfigError> {
        let constants = &options.turbulence_model_constants;
        Self::new(mesh, visc_name, tvisc_name, evisc_name, constants.sigma_w_one, constants.sigma_w_two)
    }

    /// The nodes updated by each pass.
    pub fn selected_nodes(&self) -> &FixedBitSet {
        &self.nodes
    }
}

impl Algorithm for EffDiffFluxCoeffAlg {
    fn execute(&mut self, context: &mut PassContext<'_>) -> eyre::Result<()> {
        let mesh = context.mesh;
        let meta = mesh.meta_data();
        let fields = mesh.fields();

        let visc_guard = fields.read_synced(self.visc, MemorySpace::Device);
        let tvisc_guard = fields.read_synced(self.tvisc, MemorySpace::Device);
        let blend_guard = fields.read_synced(self.f_one_blend, MemorySpace::Device);
        let failed_read = |field: FieldOrdinal| format!("failed to read field `{}`", meta.field_name(field));
        let visc = visc_guard
            .view(MemorySpace::Device)
            .wrap_err_with(|| failed_read(self.visc))?;
        let tvisc = tvisc_guard
            .view(MemorySpace::Device)
            .wrap_err_with(|| failed_read(self.tvisc))?;
        let f_one_blend = blend_guard
            .view(MemorySpace::Device)
            .wrap_err_with(|| failed_read(self.f_one_blend))?;

        // Nodes outside the selection keep their values, so the device copy must be current
        let mut evisc_guard = fields.field(self.evisc).write();
        evisc_guard.sync_to(MemorySpace::Device);
        let mut evisc = evisc_guard
            .view_mut(MemorySpace::Device)
            .wrap_err_with(|| format!("failed to write field `{}`", meta.field_name(self.evisc)))?;

        let (sigma_one, sigma_two) = (self.sigma_one, self.sigma_two);
        let nodes = &self.nodes;
        evisc
            .par_iter_mut()
            .enumerate()
            .filter(|(node, _)| nodes.contains(*node))
            .for_each(|(node, evisc)| {
                let blend = f_one_blend[node];
                let blended_constant = blend * sigma_one + (1.0 - blend) * sigma_two;
                *evisc = visc[node] + tvisc[node] * blended_constant;
            });

        // Dropping the view marks the device copy as modified
        drop(evisc);
        debug!(
            "Updated `{}` on {} nodes",
            meta.field_name(self.evisc),
            self.nodes.count_ones(..)
        );
        Ok(())
    }

    fn reconfigure(&mut self, mesh: &MeshDb) {
        self.nodes = self.selector.select_nodes(mesh);
        if self.nodes.count_ones(..) == 0 {
            warn!(
                "No nodes selected for effective diffusivity update of `{}`",
                mesh.meta_data().field_name(self.evisc)
            );
        }
    }
}
