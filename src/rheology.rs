//! Visco-plastic rheology evaluation
//!
//! Each material carries a closed tagged law (constant, ductile-only,
//! plastic-only, or combined visco-plastic); the catalog is fixed at
//! configuration time, so there is no open-ended dispatch. The effective
//! viscosity is the minimum of the ductile and plastic branches (whichever
//! deformation mechanism is weaker governs), clamped to a global range that
//! keeps the linear solve well-conditioned. Clamping is silent policy, not
//! an error.
//!
//! # References
//! - Moresi et al. (2003), "A Lagrangian integration point FEM"
//! - Paterson & Luan (1990), wet quartzite dislocation creep
//! - Mackwell et al. (1998), dry Maryland diabase dislocation creep
//! - Rosenberg & Handy (2005), melt-fraction weakening

use crate::config::{MaterialConfig, MeltConfig};
use crate::error::{Result, SimulationError};
use crate::utils::units::{GAS_CONSTANT, MPA_TO_PA};

/// Which deformation branches a material activates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RheologyLaw {
    /// Fixed viscosity (air layer, isoviscous mantle)
    Constant,
    /// Dislocation creep only
    DuctileOnly,
    /// Yield-limited only
    PlasticOnly,
    /// min(ductile, plastic)
    ViscoPlastic,
}

/// Power-law dislocation creep
///
/// ```text
/// η = f · A^(-1/n) · ε̇_II^((1-n)/n) · exp(Q / (n·R·T))
/// f = 1/2 · 3^(-(n+1)/(2n))
/// ```
///
/// with A in MPa⁻ⁿ·s⁻¹ (the laboratory convention), converted to SI
/// internally. The geometric factor f maps uniaxial laboratory data onto
/// the tensor invariant form.
#[derive(Debug, Clone, Copy)]
pub struct DislocationCreep {
    /// Prefactor A (MPa⁻ⁿ·s⁻¹)
    pub prefactor: f64,
    /// Stress exponent n
    pub exponent: f64,
    /// Activation energy Q (J/mol)
    pub activation_energy: f64,
}

/// Strain-rate floor that stands in for the background tectonic rate when
/// the local rate vanishes; keeps the power law finite.
const STRAIN_RATE_FLOOR: f64 = 1e-20;

impl DislocationCreep {
    pub fn viscosity(&self, temperature: f64, strain_rate_ii: f64) -> f64 {
        let n = self.exponent;
        let edot = strain_rate_ii.max(STRAIN_RATE_FLOOR);
        let f = 0.5 * 3f64.powf(-(n + 1.0) / (2.0 * n));
        // A^(-1/n) with the MPa⁻ⁿ prefactor: the unit conversion contributes
        // a clean factor of 1e6 Pa/MPa
        let a_term = self.prefactor.powf(-1.0 / n) * MPA_TO_PA;
        f * a_term
            * edot.powf((1.0 - n) / n)
            * (self.activation_energy / (n * GAS_CONSTANT * temperature)).exp()
    }
}

/// Drucker-Prager yield with linear strain softening and a stress limiter
///
/// ```text
/// τ_y = C(ε_p)·cos φ(ε_p) + P·sin φ(ε_p)        (capped by the limiter)
/// η_plastic = τ_y / (2 ε̇_II)
/// ```
///
/// Cohesion and friction drop linearly from their intact to softened values
/// as accumulated plastic strain crosses [strain_start, strain_end].
#[derive(Debug, Clone, Copy)]
pub struct DruckerPrager {
    /// Intact / softened cohesion (Pa)
    pub cohesion: f64,
    pub cohesion_softened: f64,
    /// Intact / softened friction coefficient (tan φ)
    pub friction: f64,
    pub friction_softened: f64,
    /// Plastic strain interval over which softening ramps
    pub strain_start: f64,
    pub strain_end: f64,
    /// Yield stress cap (Pa); infinity disables
    pub stress_limiter: f64,
}

impl DruckerPrager {
    /// Softened cohesion and friction coefficient at a given plastic strain
    pub fn softened_properties(&self, plastic_strain: f64) -> (f64, f64) {
        if plastic_strain <= self.strain_start {
            return (self.cohesion, self.friction);
        }
        let ratio =
            ((plastic_strain - self.strain_start) / (self.strain_end - self.strain_start)).min(1.0);
        let c = self.cohesion - (self.cohesion - self.cohesion_softened) * ratio;
        let f = self.friction - (self.friction - self.friction_softened) * ratio;
        (c, f)
    }

    /// Yield stress at the given pressure and softening state
    pub fn yield_stress(&self, pressure: f64, plastic_strain: f64) -> f64 {
        let (c, fric) = self.softened_properties(plastic_strain);
        let phi = fric.atan();
        // Tension cutoff: never below the softened cohesion alone
        let tau = (c * phi.cos() + pressure.max(0.0) * phi.sin()).max(c * phi.cos());
        tau.min(self.stress_limiter)
    }

    /// Effective plastic viscosity η_p = τ_y / (2 ε̇_II); infinite when the
    /// strain rate vanishes (no plastic limit without deformation)
    pub fn plastic_viscosity(&self, strain_rate_ii: f64, pressure: f64, plastic_strain: f64) -> f64 {
        if strain_rate_ii < 1e-30 {
            return f64::INFINITY;
        }
        self.yield_stress(pressure, plastic_strain) / (2.0 * strain_rate_ii)
    }
}

/// Melt-fraction model: linear solidus/liquidus in pressure, log-linear
/// viscosity drop between two melt fractions.
#[derive(Debug, Clone, Copy)]
pub struct MeltModel {
    solidus: [f64; 3],
    liquidus: [f64; 3],
    viscosity_change: f64,
    fraction_low: f64,
    fraction_high: f64,
}

impl MeltModel {
    pub fn from_config(cfg: &MeltConfig) -> Self {
        Self {
            solidus: [cfg.solidus_a1, cfg.solidus_a2, cfg.solidus_a3],
            liquidus: [cfg.liquidus_a1, cfg.liquidus_a2, cfg.liquidus_a3],
            viscosity_change: cfg.viscosity_change,
            fraction_low: cfg.fraction_low,
            fraction_high: cfg.fraction_high,
        }
    }

    fn poly(coeffs: &[f64; 3], pressure: f64) -> f64 {
        coeffs[0] + coeffs[1] * pressure + coeffs[2] * pressure * pressure
    }

    /// Melt fraction in [0, 1] assuming linear melting between solidus and
    /// liquidus
    pub fn fraction(&self, temperature: f64, pressure: f64) -> f64 {
        let t_sol = Self::poly(&self.solidus, pressure);
        let t_liq = Self::poly(&self.liquidus, pressure);
        if t_liq <= t_sol {
            return 0.0;
        }
        ((temperature - t_sol) / (t_liq - t_sol)).clamp(0.0, 1.0)
    }

    /// Multiplicative viscosity factor: 1 below `fraction_low`, dropping
    /// log-linearly to `viscosity_change` at `fraction_high`
    pub fn weakening_factor(&self, fraction: f64) -> f64 {
        if fraction <= self.fraction_low {
            1.0
        } else if fraction >= self.fraction_high {
            self.viscosity_change
        } else {
            let t = (fraction - self.fraction_low) / (self.fraction_high - self.fraction_low);
            10f64.powf(self.viscosity_change.log10() * t)
        }
    }
}

/// A fully resolved material: rheology branches plus thermal/density
/// parameters, built once from configuration.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub law: RheologyLaw,
    pub constant_viscosity: f64,
    pub creep: Option<DislocationCreep>,
    pub plastic: Option<DruckerPrager>,
    pub melt: Option<MeltModel>,

    /// Reference density (kg/m³) at `reference_temp`
    pub reference_density: f64,
    pub reference_temp: f64,
    pub thermal_expansivity: f64,

    pub conductivity: f64,
    pub heat_capacity: f64,
    pub heat_production: f64,
}

impl Material {
    pub fn from_config(cfg: &MaterialConfig) -> Result<Self> {
        let law = match cfg.rheology.as_str() {
            "constant" => RheologyLaw::Constant,
            "ductile" => RheologyLaw::DuctileOnly,
            "plastic" => RheologyLaw::PlasticOnly,
            "visco_plastic" => RheologyLaw::ViscoPlastic,
            other => {
                return Err(SimulationError::config(format!(
                    "material '{}': unknown rheology '{}'",
                    cfg.name, other
                )))
            }
        };

        let creep = if cfg.creep_prefactor > 0.0 {
            Some(DislocationCreep {
                prefactor: cfg.creep_prefactor,
                exponent: cfg.creep_exponent,
                activation_energy: cfg.activation_energy,
            })
        } else {
            None
        };

        let plastic = if matches!(law, RheologyLaw::PlasticOnly | RheologyLaw::ViscoPlastic) {
            Some(DruckerPrager {
                cohesion: cfg.cohesion_mpa * MPA_TO_PA,
                cohesion_softened: cfg.cohesion_softened_mpa * MPA_TO_PA,
                friction: cfg.friction_coefficient,
                friction_softened: cfg.friction_softened,
                strain_start: cfg.softening_strain_start,
                strain_end: cfg.softening_strain_end,
                stress_limiter: if cfg.stress_limiter_mpa > 0.0 {
                    cfg.stress_limiter_mpa * MPA_TO_PA
                } else {
                    f64::INFINITY
                },
            })
        } else {
            None
        };

        Ok(Self {
            name: cfg.name.clone(),
            law,
            constant_viscosity: cfg.viscosity,
            creep,
            plastic,
            melt: cfg.melt.as_ref().map(MeltModel::from_config),
            reference_density: cfg.density,
            reference_temp: cfg.reference_temp_k,
            thermal_expansivity: cfg.thermal_expansivity,
            conductivity: cfg.conductivity,
            heat_capacity: cfg.heat_capacity,
            heat_production: cfg.heat_production,
        })
    }

    /// Temperature-dependent density with linear thermal expansion:
    /// ρ(T) = ρ₀ · (1 - α·(T - T_ref))
    pub fn density(&self, temperature: f64) -> f64 {
        self.reference_density * (1.0 - self.thermal_expansivity * (temperature - self.reference_temp))
    }

    /// Ductile branch viscosity (creep law if present, constant otherwise)
    fn ductile_viscosity(&self, temperature: f64, strain_rate_ii: f64) -> f64 {
        match self.creep {
            Some(creep) => creep.viscosity(temperature, strain_rate_ii),
            None => self.constant_viscosity,
        }
    }
}

/// The rheology evaluator: material catalog plus the global viscosity clamp.
#[derive(Debug, Clone)]
pub struct MaterialCatalog {
    pub materials: Vec<Material>,
    pub min_viscosity: f64,
    pub max_viscosity: f64,
    pub melt_weakening_enabled: bool,
}

impl MaterialCatalog {
    pub fn from_config(
        configs: &[MaterialConfig],
        min_viscosity: f64,
        max_viscosity: f64,
        melt_weakening_enabled: bool,
    ) -> Result<Self> {
        let materials = configs
            .iter()
            .map(Material::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            materials,
            min_viscosity,
            max_viscosity,
            melt_weakening_enabled,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    #[inline]
    pub fn get(&self, material_id: u32) -> &Material {
        &self.materials[material_id as usize]
    }

    /// Melt fraction for a material at (T, P); zero without a melt model
    pub fn melt_fraction(&self, material_id: u32, temperature: f64, pressure: f64) -> f64 {
        match &self.get(material_id).melt {
            Some(model) => model.fraction(temperature, pressure),
            None => 0.0,
        }
    }

    /// Effective viscosity: min of the active branches, melt-weakened on
    /// the ductile side, clamped to the configured global range.
    pub fn effective_viscosity(
        &self,
        material_id: u32,
        temperature: f64,
        strain_rate_ii: f64,
        pressure: f64,
        plastic_strain: f64,
        melt_fraction: f64,
    ) -> f64 {
        let mat = self.get(material_id);

        let mut ductile = match mat.law {
            RheologyLaw::PlasticOnly => f64::INFINITY,
            _ => mat.ductile_viscosity(temperature, strain_rate_ii),
        };
        if self.melt_weakening_enabled {
            if let Some(model) = &mat.melt {
                ductile *= model.weakening_factor(melt_fraction);
            }
        }

        let plastic = match (mat.law, &mat.plastic) {
            (RheologyLaw::PlasticOnly | RheologyLaw::ViscoPlastic, Some(dp)) => {
                dp.plastic_viscosity(strain_rate_ii, pressure, plastic_strain)
            }
            _ => f64::INFINITY,
        };

        // Min-of-mechanisms: the weaker branch governs
        ductile.min(plastic).clamp(self.min_viscosity, self.max_viscosity)
    }

    /// True when the plastic branch is the governing mechanism (used for
    /// plastic-strain accumulation on points)
    pub fn is_yielding(
        &self,
        material_id: u32,
        temperature: f64,
        strain_rate_ii: f64,
        pressure: f64,
        plastic_strain: f64,
    ) -> bool {
        let mat = self.get(material_id);
        match (&mat.plastic, mat.law) {
            (Some(dp), RheologyLaw::ViscoPlastic | RheologyLaw::PlasticOnly) => {
                let eta_p = dp.plastic_viscosity(strain_rate_ii, pressure, plastic_strain);
                eta_p < mat.ductile_viscosity(temperature, strain_rate_ii)
            }
            _ => false,
        }
    }
}
