//! Field state on the fixed grid
//!
//! Nodal fields (temperature, velocity) and cell fields (viscosity, density,
//! heat production, pressure, strain-rate invariant) for the current step.
//! Cell fields are regenerated every step by projecting from the swarm; the
//! temperature field persists across steps (it is the heat solver's state)
//! and is resampled onto points after every heat solve.

use crate::grid::Grid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldState {
    // Nodal fields
    pub temperature: Vec<f64>,
    pub vx: Vec<f64>,
    pub vz: Vec<f64>,

    // Cell fields (projected from the swarm each step)
    pub viscosity: Vec<f64>,
    pub density: Vec<f64>,
    pub heat_production: Vec<f64>,
    pub conductivity: Vec<f64>,
    pub rho_cp: Vec<f64>,
    pub strain_rate_ii: Vec<f64>,
    pub melt_fraction: Vec<f64>,
    /// Total pressure per cell: lithostatic column weight plus the
    /// penalty-recovered dynamic part
    pub pressure: Vec<f64>,
}

impl FieldState {
    pub fn new(grid: &Grid) -> Self {
        let nn = grid.num_nodes();
        let nc = grid.num_cells();
        Self {
            temperature: vec![0.0; nn],
            vx: vec![0.0; nn],
            vz: vec![0.0; nn],
            viscosity: vec![0.0; nc],
            density: vec![0.0; nc],
            heat_production: vec![0.0; nc],
            conductivity: vec![0.0; nc],
            rho_cp: vec![0.0; nc],
            strain_rate_ii: vec![0.0; nc],
            melt_fraction: vec![0.0; nc],
            pressure: vec![0.0; nc],
        }
    }

    /// Interpolated velocity at a point
    pub fn velocity_at(&self, grid: &Grid, x: f64, z: f64) -> Option<(f64, f64)> {
        let vx = grid.interpolate(&self.vx, x, z)?;
        let vz = grid.interpolate(&self.vz, x, z)?;
        Some((vx, vz))
    }

    /// Interpolated temperature at a point
    pub fn temperature_at(&self, grid: &Grid, x: f64, z: f64) -> Option<f64> {
        grid.interpolate(&self.temperature, x, z)
    }

    /// Cell pressure at a point
    pub fn pressure_at(&self, grid: &Grid, x: f64, z: f64) -> Option<f64> {
        let (i, k) = grid.cell_of(x, z)?;
        Some(self.pressure[grid.cell_index(i, k)])
    }

    /// Cell strain-rate invariant at a point
    pub fn strain_rate_at(&self, grid: &Grid, x: f64, z: f64) -> Option<f64> {
        let (i, k) = grid.cell_of(x, z)?;
        Some(self.strain_rate_ii[grid.cell_index(i, k)])
    }

    /// Maximum nodal velocity magnitude (m/s), used by the CFL limit
    pub fn max_velocity(&self) -> f64 {
        self.vx
            .iter()
            .zip(self.vz.iter())
            .map(|(vx, vz)| (vx * vx + vz * vz).sqrt())
            .fold(0.0, f64::max)
    }

    /// Rebuild the pressure field: integrate the current density column
    /// downward from the free surface, then add the dynamic part.
    ///
    /// `dynamic` is the penalty-recovered cell pressure from the Stokes
    /// solve; pass an empty slice to use lithostatic only.
    pub fn update_pressure(&mut self, grid: &Grid, gravity: f64, dynamic: &[f64]) {
        for i in 0..grid.nx {
            let mut p = 0.0;
            for k in (0..grid.nz).rev() {
                let cell = grid.cell_index(i, k);
                // Weight of this cell's upper half plus everything above
                p += self.density[cell] * gravity * grid.dz * 0.5;
                self.pressure[cell] = p;
                if !dynamic.is_empty() {
                    self.pressure[cell] += dynamic[cell];
                }
                p += self.density[cell] * gravity * grid.dz * 0.5;
            }
        }
    }

    /// Vertical temperature profile at horizontal position x, from the
    /// surface down: returns (depth m, temperature K) per node level.
    pub fn temperature_profile(&self, grid: &Grid, x: f64) -> Vec<(f64, f64)> {
        (0..grid.nnz())
            .rev()
            .map(|k| {
                let z = k as f64 * grid.dz;
                let t = self
                    .temperature_at(grid, x.clamp(0.0, grid.lx), z)
                    .unwrap_or(f64::NAN);
                (grid.depth(z), t)
            })
            .collect()
    }
}
