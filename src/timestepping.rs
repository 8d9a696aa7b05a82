//! Adaptive time-step selection
//!
//! Δt is the tighter of the advective CFL limit (points must not cross more
//! than a fraction of a cell per step) and the thermal diffusion limit,
//! clamped to the configured [dt_min, dt_max] window. The diffusion limit is
//! a quality bound rather than a stability bound (the heat solve is
//! implicit), but keeping Δt near it avoids overly smeared thermal fronts.

use crate::config::TimeSteppingConfig;
use crate::fields::FieldState;
use crate::grid::Grid;
use crate::utils::units::seconds_to_years;

/// Which bound produced the chosen Δt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtConstraint {
    Advective,
    Diffusive,
    MinClamp,
    MaxClamp,
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveTimestep {
    /// Chosen step (s)
    pub dt: f64,
    pub cfl_dt: f64,
    pub diffusive_dt: f64,
    pub max_velocity: f64,
    pub constraint: DtConstraint,
}

impl AdaptiveTimestep {
    /// Pick Δt from the current velocity field and cell diffusivities.
    pub fn compute(config: &TimeSteppingConfig, grid: &Grid, fields: &FieldState) -> Self {
        let max_velocity = fields.max_velocity();
        let min_spacing = grid.dx.min(grid.dz);

        let cfl_dt = if max_velocity > 0.0 {
            config.cfl_target * min_spacing / max_velocity
        } else {
            f64::INFINITY
        };

        // κ = k / (ρ cₚ) per cell; the largest diffusivity binds
        let max_kappa = fields
            .conductivity
            .iter()
            .zip(&fields.rho_cp)
            .filter(|(_, &rc)| rc > 0.0)
            .map(|(&k, &rc)| k / rc)
            .fold(0.0f64, f64::max);
        let diffusive_dt = if max_kappa > 0.0 {
            config.diffusion_target * min_spacing * min_spacing / max_kappa
        } else {
            f64::INFINITY
        };

        let dt_min = config.dt_min_years * crate::utils::units::SECONDS_PER_YEAR;
        let dt_max = config.dt_max_years * crate::utils::units::SECONDS_PER_YEAR;

        let unclamped = cfl_dt.min(diffusive_dt);
        let (dt, constraint) = if unclamped < dt_min {
            (dt_min, DtConstraint::MinClamp)
        } else if unclamped > dt_max {
            (dt_max, DtConstraint::MaxClamp)
        } else if cfl_dt <= diffusive_dt {
            (unclamped, DtConstraint::Advective)
        } else {
            (unclamped, DtConstraint::Diffusive)
        };

        Self {
            dt,
            cfl_dt,
            diffusive_dt,
            max_velocity,
            constraint,
        }
    }

    pub fn dt_years(&self) -> f64 {
        seconds_to_years(self.dt)
    }
}
