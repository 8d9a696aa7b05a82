//! Configuration management for orogenic-cycle simulations
//!
//! Reads TOML configuration files and provides structured data for setting up
//! the domain, material catalog, boundary-condition schedule, swarm seeding,
//! solver parameters, and checkpoint cadence. All validation that must fail
//! before stepping begins lives in [`SimulationConfig::validate`].

use crate::error::{Result, SimulationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main simulation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub domain: DomainConfig,
    pub simulation: SimulationParams,
    pub thermal: ThermalConfig,
    pub swarm: SwarmConfig,
    pub time_stepping: TimeSteppingConfig,
    pub solver: SolverConfig,
    pub physics: PhysicsConfig,
    /// Material catalog; points reference materials by index into this list.
    pub materials: Vec<MaterialConfig>,
    /// Ordered boundary-condition schedule (shortening → ... → collapse).
    pub phases: Vec<PhaseConfig>,
    /// Explicit material-id transition rules (e.g. granulitisation).
    #[serde(default)]
    pub phase_changes: Vec<PhaseChangeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DomainConfig {
    /// Domain width in x (m)
    pub lx: f64,
    /// Domain thickness in z (m); z = 0 is the base, z = lz the surface
    pub lz: f64,
    /// Number of cells in x
    pub nx: usize,
    /// Number of cells in z
    pub nz: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationParams {
    /// Hard cap on model time (Myr); the run terminates here even if the
    /// phase schedule has not been exhausted
    pub max_time_myr: f64,
    /// Hard cap on step count
    pub max_steps: usize,
    /// Checkpoint cadence (years of model time)
    pub checkpoint_interval_years: f64,
    /// Directory for checkpoint files; empty string disables disk checkpoints
    #[serde(default)]
    pub checkpoint_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThermalConfig {
    /// Fixed surface temperature (K), Dirichlet at the top edge
    pub surface_temp_k: f64,
    /// Basal boundary: heat flux (W/m²) into the domain
    pub basal_heat_flux_w_m2: f64,
    /// If set, the base is Dirichlet at this temperature instead of Neumann
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basal_temp_k: Option<f64>,
    /// Initialize temperature with the conductive steady state ("steady_state")
    /// or a simple linear profile ("linear")
    pub initial_geotherm: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwarmConfig {
    /// Points seeded per cell per direction (n² points per cell)
    pub points_per_cell_dir: usize,
    /// Repopulation threshold: minimum points per cell after advection
    pub min_points_per_cell: usize,
    /// Append a P-T-t sample every N steps
    pub history_every_n_steps: usize,
    /// RNG seed for seeding jitter (reproducibility)
    pub rng_seed: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeSteppingConfig {
    pub dt_min_years: f64,
    pub dt_max_years: f64,
    /// Target advective CFL number (typically 0.3-0.5)
    pub cfl_target: f64,
    /// Target diffusion number κΔt/Δx² used for the diffusive Δt limit
    pub diffusion_target: f64,
    /// Cap on internal heat-solve sub-cycles before StabilityViolation
    pub max_thermal_subcycles: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverConfig {
    /// Picard iteration cap per attempt
    pub picard_max_iterations: usize,
    /// Relative velocity-change tolerance for Picard convergence
    pub picard_tolerance: f64,
    /// Under-relaxation factor α ∈ (0, 1]
    pub picard_relaxation: f64,
    /// Bounded retries with reduced relaxation before ConvergenceError
    pub max_retries: usize,
    /// Linear solver iteration cap
    pub linear_max_iterations: usize,
    /// Linear solver relative tolerance
    pub linear_tolerance: f64,
    /// Incompressibility penalty factor ζ = penalty_factor · μ_max
    pub penalty_factor: f64,
    /// Global effective-viscosity clamp (Pa·s)
    pub min_viscosity: f64,
    pub max_viscosity: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhysicsConfig {
    /// Gravitational acceleration (m/s²), acting in -z
    pub gravity: f64,
    /// Include the viscous-dissipation term in the heat equation
    #[serde(default)]
    pub shear_heating_enabled: bool,
    /// Fraction of dissipation converted to heat (0-1)
    #[serde(default = "default_shear_heating_efficiency")]
    pub shear_heating_efficiency: f64,
    /// Enable melt-fraction viscosity weakening
    #[serde(default)]
    pub melt_weakening_enabled: bool,
}

fn default_shear_heating_efficiency() -> f64 {
    1.0
}

/// One material in the catalog.
///
/// Initial assignment is by depth layer: a point seeded between
/// `layer_top_km` and `layer_bottom_km` (depths below the surface) gets this
/// material id. Materials created only by phase changes use a degenerate
/// layer (top == bottom).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaterialConfig {
    pub name: String,
    /// Layer top depth (km below surface)
    pub layer_top_km: f64,
    /// Layer bottom depth (km below surface)
    pub layer_bottom_km: f64,

    /// Reference density (kg/m³) at `reference_temp_k`
    pub density: f64,
    #[serde(default = "default_reference_temp")]
    pub reference_temp_k: f64,
    /// Coefficient of thermal expansion (1/K)
    #[serde(default)]
    pub thermal_expansivity: f64,

    /// Thermal conductivity (W/(m·K))
    pub conductivity: f64,
    /// Heat capacity (J/(kg·K))
    pub heat_capacity: f64,
    /// Radiogenic heat production (W/m³)
    pub heat_production: f64,

    /// Rheological law: "constant", "ductile", "plastic", "visco_plastic"
    pub rheology: String,
    /// Constant viscosity (Pa·s), used by "constant" and as the ductile term
    /// fallback when no creep law is given
    #[serde(default)]
    pub viscosity: f64,

    /// Dislocation-creep prefactor A (MPa⁻ⁿ·s⁻¹)
    #[serde(default)]
    pub creep_prefactor: f64,
    /// Stress exponent n
    #[serde(default = "default_one")]
    pub creep_exponent: f64,
    /// Activation energy Q (J/mol)
    #[serde(default)]
    pub activation_energy: f64,

    /// Drucker-Prager cohesion (MPa) and softened value
    #[serde(default)]
    pub cohesion_mpa: f64,
    #[serde(default)]
    pub cohesion_softened_mpa: f64,
    /// Friction coefficient (tan φ) and softened value
    #[serde(default)]
    pub friction_coefficient: f64,
    #[serde(default)]
    pub friction_softened: f64,
    /// Accumulated-strain interval over which softening ramps
    #[serde(default)]
    pub softening_strain_start: f64,
    #[serde(default = "default_one")]
    pub softening_strain_end: f64,
    /// Cap on yield stress (MPa); 0 disables
    #[serde(default)]
    pub stress_limiter_mpa: f64,

    /// Optional melt model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub melt: Option<MeltConfig>,
}

fn default_reference_temp() -> f64 {
    293.15
}

fn default_one() -> f64 {
    1.0
}

/// Linear solidus/liquidus in pressure with melt-fraction viscosity drop.
///
/// T_sol(P) = a1 + a2·P + a3·P², likewise for the liquidus. Viscosity drops
/// log-linearly by `viscosity_change` as melt fraction rises from
/// `fraction_low` to `fraction_high`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeltConfig {
    pub solidus_a1: f64,
    pub solidus_a2: f64,
    pub solidus_a3: f64,
    pub liquidus_a1: f64,
    pub liquidus_a2: f64,
    pub liquidus_a3: f64,
    /// Multiplicative viscosity factor at full weakening (e.g. 1e-3)
    pub viscosity_change: f64,
    pub fraction_low: f64,
    pub fraction_high: f64,
}

/// One entry in the boundary-condition schedule.
///
/// The side boundaries impose ±`convergence_velocity_cm_yr`/2 horizontally
/// (positive = shortening, negative = extension, zero = stationary); the top
/// is free-slip and the base imposes the normal outflow that balances the
/// side influx, so shortening deepens the column into the mantle. The phase
/// ends at whichever configured trigger is met first; the last phase may run
/// to the global time cap.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaseConfig {
    pub name: String,
    /// Total convergence rate (cm/yr) split evenly between the two sides
    pub convergence_velocity_cm_yr: f64,
    /// End after this much model time in the phase (Myr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_myr: Option<f64>,
    /// End once the crustal root exceeds this thickness (km)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_thickness_trigger_km: Option<f64>,
    /// Basal heat flux at phase start/end (W/m²); ramps linearly between
    /// them over the phase when both are set, otherwise the thermal config
    /// value applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basal_flux_start_w_m2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basal_flux_end_w_m2: Option<f64>,
}

/// Explicit material-id transition, evaluated per point after the heat solve.
///
/// A point of `from_material` becomes `to_material` when all set conditions
/// hold (temperature window, strain-rate floor).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaseChangeConfig {
    pub from_material: String,
    pub to_material: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_temperature_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_strain_rate: Option<f64>,
}

impl SimulationConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            SimulationError::config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: SimulationConfig = toml::from_str(&contents)
            .map_err(|e| SimulationError::config(format!("failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Look up a material index by name
    pub fn material_index(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }

    /// Check well-posedness before any stepping begins.
    ///
    /// Rejects empty or inconsistent material lists, ill-posed thermal
    /// boundary conditions, unresolvable phase-change references, and
    /// degenerate solver limits.
    pub fn validate(&self) -> Result<()> {
        if self.domain.nx == 0 || self.domain.nz == 0 {
            return Err(SimulationError::config("domain resolution must be nonzero"));
        }
        if self.domain.lx <= 0.0 || self.domain.lz <= 0.0 {
            return Err(SimulationError::config("domain extents must be positive"));
        }

        if self.materials.is_empty() {
            return Err(SimulationError::config("material list is empty"));
        }
        for mat in &self.materials {
            if mat.density <= 0.0 || mat.conductivity <= 0.0 || mat.heat_capacity <= 0.0 {
                return Err(SimulationError::config(format!(
                    "material '{}' has non-positive density/conductivity/heat capacity",
                    mat.name
                )));
            }
            match mat.rheology.as_str() {
                "constant" => {
                    if mat.viscosity <= 0.0 {
                        return Err(SimulationError::config(format!(
                            "material '{}': constant rheology requires viscosity > 0",
                            mat.name
                        )));
                    }
                }
                "ductile" | "visco_plastic" => {
                    if mat.creep_prefactor <= 0.0 && mat.viscosity <= 0.0 {
                        return Err(SimulationError::config(format!(
                            "material '{}': ductile rheology needs a creep law or viscosity",
                            mat.name
                        )));
                    }
                    if mat.creep_prefactor > 0.0 && mat.creep_exponent <= 0.0 {
                        return Err(SimulationError::config(format!(
                            "material '{}': creep exponent must be positive",
                            mat.name
                        )));
                    }
                }
                "plastic" => {
                    if mat.cohesion_mpa <= 0.0 && mat.friction_coefficient <= 0.0 {
                        return Err(SimulationError::config(format!(
                            "material '{}': plastic rheology needs cohesion or friction",
                            mat.name
                        )));
                    }
                }
                other => {
                    return Err(SimulationError::config(format!(
                        "material '{}': unknown rheology '{}'",
                        mat.name, other
                    )));
                }
            }
            if mat.softening_strain_end <= mat.softening_strain_start {
                return Err(SimulationError::config(format!(
                    "material '{}': softening strain interval is empty",
                    mat.name
                )));
            }
        }

        // Thermal well-posedness: the top is always Dirichlet, which is the
        // minimum requirement; a Neumann base on top of that is fine.
        if self.thermal.surface_temp_k <= 0.0 {
            return Err(SimulationError::config(
                "surface temperature must be positive kelvin",
            ));
        }
        if self.thermal.initial_geotherm != "steady_state"
            && self.thermal.initial_geotherm != "linear"
        {
            return Err(SimulationError::config(format!(
                "unknown initial geotherm '{}' (expected 'steady_state' or 'linear')",
                self.thermal.initial_geotherm
            )));
        }

        if self.phases.is_empty() {
            return Err(SimulationError::config("phase schedule is empty"));
        }
        for (i, phase) in self.phases.iter().enumerate() {
            let is_last = i + 1 == self.phases.len();
            if !is_last && phase.end_time_myr.is_none() && phase.root_thickness_trigger_km.is_none()
            {
                return Err(SimulationError::config(format!(
                    "phase '{}' has no end trigger but is not the final phase",
                    phase.name
                )));
            }
            if phase.basal_flux_start_w_m2.is_some() != phase.basal_flux_end_w_m2.is_some() {
                return Err(SimulationError::config(format!(
                    "phase '{}': basal flux ramp needs both start and end values",
                    phase.name
                )));
            }
        }

        for rule in &self.phase_changes {
            for name in [&rule.from_material, &rule.to_material] {
                if self.material_index(name).is_none() {
                    return Err(SimulationError::config(format!(
                        "phase change references unknown material '{}'",
                        name
                    )));
                }
            }
            if rule.min_temperature_k.is_none()
                && rule.max_temperature_k.is_none()
                && rule.min_strain_rate.is_none()
            {
                return Err(SimulationError::config(format!(
                    "phase change {} → {} has no conditions",
                    rule.from_material, rule.to_material
                )));
            }
        }

        if self.solver.min_viscosity >= self.solver.max_viscosity {
            return Err(SimulationError::config(
                "viscosity clamp requires min < max",
            ));
        }
        if !(0.0 < self.solver.picard_relaxation && self.solver.picard_relaxation <= 1.0) {
            return Err(SimulationError::config(
                "Picard relaxation must be in (0, 1]",
            ));
        }
        if self.time_stepping.dt_min_years > self.time_stepping.dt_max_years {
            return Err(SimulationError::config("dt_min must not exceed dt_max"));
        }
        if self.swarm.points_per_cell_dir == 0 {
            return Err(SimulationError::config("points_per_cell_dir must be > 0"));
        }
        // Repopulation places at most points_per_cell_dir² points per cell,
        // so a larger floor could never be restored
        let per_cell = self.swarm.points_per_cell_dir * self.swarm.points_per_cell_dir;
        if self.swarm.min_points_per_cell > per_cell {
            return Err(SimulationError::config(format!(
                "min_points_per_cell ({}) exceeds the {} points a cell can hold",
                self.swarm.min_points_per_cell, per_cell
            )));
        }
        if self.swarm.history_every_n_steps == 0 {
            return Err(SimulationError::config("history cadence must be > 0"));
        }

        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("═══════════════════════════════════════════════════════════════");
        println!("  Simulation Configuration");
        println!("═══════════════════════════════════════════════════════════════");
        println!("Domain:");
        println!(
            "  Size: {:.1} × {:.1} km | Grid: {} × {} cells",
            self.domain.lx / 1e3,
            self.domain.lz / 1e3,
            self.domain.nx,
            self.domain.nz
        );

        println!("\nMaterials:");
        for mat in &self.materials {
            println!(
                "  {:24} ρ₀ = {:6.0} kg/m³ | H = {:.2} µW/m³ | {}",
                mat.name,
                mat.density,
                mat.heat_production * 1e6,
                mat.rheology
            );
        }

        println!("\nPhase schedule:");
        for phase in &self.phases {
            let trigger = match (phase.end_time_myr, phase.root_thickness_trigger_km) {
                (Some(t), Some(h)) => format!("t = {:.1} Myr or root > {:.0} km", t, h),
                (Some(t), None) => format!("t = {:.1} Myr", t),
                (None, Some(h)) => format!("root > {:.0} km", h),
                (None, None) => "run to end".to_string(),
            };
            println!(
                "  {:16} v = {:+.2} cm/yr | until {}",
                phase.name, phase.convergence_velocity_cm_yr, trigger
            );
        }

        println!("\nThermal:");
        println!(
            "  T_surface = {:.1} K | basal flux = {:.1} mW/m²",
            self.thermal.surface_temp_k,
            self.thermal.basal_heat_flux_w_m2 * 1e3
        );

        println!("\nSolver:");
        println!(
            "  Picard: max {} iters, tol {:.1e}, α = {:.2}, {} retries",
            self.solver.picard_max_iterations,
            self.solver.picard_tolerance,
            self.solver.picard_relaxation,
            self.solver.max_retries
        );
        println!(
            "  Viscosity clamp: [{:.1e}, {:.1e}] Pa·s",
            self.solver.min_viscosity, self.solver.max_viscosity
        );
        println!("═══════════════════════════════════════════════════════════════\n");
    }
}
