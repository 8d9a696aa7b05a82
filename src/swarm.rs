//! Lagrangian material-point swarm
//!
//! Material identity, accumulated plastic strain, and P-T-t history travel on
//! points, not on the grid. The storage is struct-of-arrays: per-point scalar
//! state lives in parallel `Vec`s indexed by point id, which keeps advection
//! and projection loops cache-friendly and lets rayon split them cleanly.
//!
//! The swarm is the authority on material identity; the grid only ever sees
//! cell-averaged properties projected from the points it contains.

use crate::config::{MaterialConfig, PhaseChangeConfig, SimulationConfig, SwarmConfig};
use crate::error::{Result, SimulationError};
use crate::fields::FieldState;
use crate::grid::Grid;
use crate::rheology::MaterialCatalog;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One sample on a point's pressure-temperature-time path
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PttSample {
    pub time_myr: f64,
    /// Temperature (K)
    pub temperature: f64,
    /// Total pressure (Pa)
    pub pressure: f64,
}

/// A phase-change rule with material names resolved to catalog indices
#[derive(Debug, Clone)]
pub struct PhaseChangeRule {
    pub from: u32,
    pub to: u32,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub min_strain_rate: Option<f64>,
}

impl PhaseChangeRule {
    /// Resolve the configured rules against the material catalog order
    pub fn resolve(config: &SimulationConfig) -> Result<Vec<Self>> {
        config
            .phase_changes
            .iter()
            .map(|rule| Self::from_config(rule, config))
            .collect()
    }

    fn from_config(rule: &PhaseChangeConfig, config: &SimulationConfig) -> Result<Self> {
        let lookup = |name: &str| {
            config.material_index(name).ok_or_else(|| {
                SimulationError::config(format!("phase change references unknown material '{}'", name))
            })
        };
        Ok(Self {
            from: lookup(&rule.from_material)? as u32,
            to: lookup(&rule.to_material)? as u32,
            min_temperature: rule.min_temperature_k,
            max_temperature: rule.max_temperature_k,
            min_strain_rate: rule.min_strain_rate,
        })
    }

    fn matches(&self, material: u32, temperature: f64, strain_rate: f64) -> bool {
        if material != self.from {
            return false;
        }
        if let Some(tmin) = self.min_temperature {
            if temperature < tmin {
                return false;
            }
        }
        if let Some(tmax) = self.max_temperature {
            if temperature > tmax {
                return false;
            }
        }
        if let Some(emin) = self.min_strain_rate {
            if strain_rate < emin {
                return false;
            }
        }
        true
    }
}

/// The material-point swarm (struct-of-arrays)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSwarm {
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub material_id: Vec<u32>,
    pub plastic_strain: Vec<f64>,
    pub temperature: Vec<f64>,
    pub pressure: Vec<f64>,
    pub melt_fraction: Vec<f64>,
    /// Recorded P-T-t path per point, one entry per history cadence tick
    pub histories: Vec<Vec<PttSample>>,
    /// Running count of points discarded at the outflow boundaries
    pub discarded_total: u64,
}

impl PointSwarm {
    /// Seed points on a jittered regular sub-lattice, `points_per_cell_dir`²
    /// per cell, and assign material ids from the configured depth layers.
    ///
    /// Fails if any seeded point falls outside every layer: the catalog must
    /// tile the full domain depth.
    pub fn seed(grid: &Grid, swarm_cfg: &SwarmConfig, materials: &[MaterialConfig]) -> Result<Self> {
        let per_dir = swarm_cfg.points_per_cell_dir;
        let n_points = grid.num_cells() * per_dir * per_dir;
        let mut rng = StdRng::seed_from_u64(swarm_cfg.rng_seed);

        let mut swarm = Self::with_capacity(n_points);
        let sub = 1.0 / per_dir as f64;
        // Jitter amplitude keeps each point inside its own sub-cell
        let jitter = 0.4 * sub;

        for ck in 0..grid.nz {
            for ci in 0..grid.nx {
                for pk in 0..per_dir {
                    for pi in 0..per_dir {
                        let xi = (pi as f64 + 0.5) * sub + rng.gen_range(-jitter..jitter);
                        let eta = (pk as f64 + 0.5) * sub + rng.gen_range(-jitter..jitter);
                        let x = (ci as f64 + xi) * grid.dx;
                        let z = (ck as f64 + eta) * grid.dz;
                        let material = material_for_depth(materials, grid.depth(z) / 1e3)
                            .ok_or_else(|| {
                                SimulationError::config(format!(
                                    "no material layer covers depth {:.2} km",
                                    grid.depth(z) / 1e3
                                ))
                            })?;
                        swarm.push(x, z, material as u32);
                    }
                }
            }
        }
        Ok(swarm)
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            x: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            material_id: Vec::with_capacity(n),
            plastic_strain: Vec::with_capacity(n),
            temperature: Vec::with_capacity(n),
            pressure: Vec::with_capacity(n),
            melt_fraction: Vec::with_capacity(n),
            histories: Vec::with_capacity(n),
            discarded_total: 0,
        }
    }

    fn push(&mut self, x: f64, z: f64, material: u32) {
        self.x.push(x);
        self.z.push(z);
        self.material_id.push(material);
        self.plastic_strain.push(0.0);
        self.temperature.push(0.0);
        self.pressure.push(0.0);
        self.melt_fraction.push(0.0);
        self.histories.push(Vec::new());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Advect all points through the current velocity field with a
    /// second-order midpoint step. Points carried out of the domain by the
    /// boundary outflow are removed and counted, never reflected.
    pub fn advect(&mut self, grid: &Grid, fields: &FieldState, dt: f64) {
        let n = self.len();
        let moved: Vec<Option<(f64, f64)>> = (0..n)
            .into_par_iter()
            .map(|p| {
                let (x0, z0) = (self.x[p], self.z[p]);
                let (vx1, vz1) = fields.velocity_at(grid, x0, z0)?;
                // Midpoint evaluation; if the half-step already leaves the
                // domain, fall back to the full Euler step before deciding
                let xm = x0 + 0.5 * dt * vx1;
                let zm = z0 + 0.5 * dt * vz1;
                let (vx, vz) = fields.velocity_at(grid, xm, zm).unwrap_or((vx1, vz1));
                let x1 = x0 + dt * vx;
                let z1 = z0 + dt * vz;
                grid.contains(x1, z1).then_some((x1, z1))
            })
            .collect();

        let mut keep = vec![true; n];
        for p in 0..n {
            match moved[p] {
                Some((x, z)) => {
                    self.x[p] = x;
                    self.z[p] = z;
                }
                None => keep[p] = false,
            }
        }
        self.retain(&keep);
    }

    /// Drop points flagged false, preserving order
    fn retain(&mut self, keep: &[bool]) {
        let before = self.len();
        let mut w = 0;
        for r in 0..before {
            if keep[r] {
                if w != r {
                    self.x[w] = self.x[r];
                    self.z[w] = self.z[r];
                    self.material_id[w] = self.material_id[r];
                    self.plastic_strain[w] = self.plastic_strain[r];
                    self.temperature[w] = self.temperature[r];
                    self.pressure[w] = self.pressure[r];
                    self.melt_fraction[w] = self.melt_fraction[r];
                    self.histories.swap(w, r);
                }
                w += 1;
            }
        }
        self.x.truncate(w);
        self.z.truncate(w);
        self.material_id.truncate(w);
        self.plastic_strain.truncate(w);
        self.temperature.truncate(w);
        self.pressure.truncate(w);
        self.melt_fraction.truncate(w);
        self.histories.truncate(w);
        self.discarded_total += (before - w) as u64;
    }

    /// Count of points per cell
    pub fn cell_counts(&self, grid: &Grid) -> Vec<usize> {
        let mut counts = vec![0usize; grid.num_cells()];
        for p in 0..self.len() {
            if let Some((i, k)) = grid.cell_of(self.x[p], self.z[p]) {
                counts[grid.cell_index(i, k)] += 1;
            }
        }
        counts
    }

    /// Refill cells whose population fell below the configured minimum.
    ///
    /// New points are placed at deterministic sub-cell centers and inherit
    /// state from the cell's surviving points (majority material, mean scalar
    /// state). An entirely empty cell inherits from its nearest surviving
    /// point, which extends the adjacent material region: acceptable for
    /// interior cells, and at inflow boundaries it continues the entering
    /// layer. Fresh points start with an empty history.
    pub fn repopulate(&mut self, grid: &Grid, min_points: usize, per_cell_dir: usize) -> usize {
        let counts = self.cell_counts(grid);
        let n_old = self.len();

        // Survivor ids per deficient cell, gathered in one pass
        let deficient: Vec<usize> = (0..grid.num_cells())
            .filter(|&c| counts[c] < min_points)
            .collect();
        if deficient.is_empty() {
            return 0;
        }
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); grid.num_cells()];
        for p in 0..n_old {
            if let Some((i, k)) = grid.cell_of(self.x[p], self.z[p]) {
                let c = grid.cell_index(i, k);
                if counts[c] < min_points {
                    members[c].push(p);
                }
            }
        }

        let mut added = 0;
        let sub = 1.0 / per_cell_dir as f64;
        for &c in &deficient {
            let ci = c % grid.nx;
            let ck = c / grid.nx;
            let (cx, cz) = grid.cell_center(ci, ck);

            let donor = self.cell_inheritance(&members[c], cx, cz, n_old);
            let need = min_points - counts[c];
            let mut placed = 0;
            'fill: for pk in 0..per_cell_dir {
                for pi in 0..per_cell_dir {
                    if placed >= need {
                        break 'fill;
                    }
                    let x = (ci as f64 + (pi as f64 + 0.5) * sub) * grid.dx;
                    let z = (ck as f64 + (pk as f64 + 0.5) * sub) * grid.dz;
                    self.push(x, z, donor.material);
                    let idx = self.len() - 1;
                    self.plastic_strain[idx] = donor.plastic_strain;
                    self.temperature[idx] = donor.temperature;
                    self.pressure[idx] = donor.pressure;
                    self.melt_fraction[idx] = donor.melt_fraction;
                    placed += 1;
                }
            }
            added += placed;
        }
        added
    }

    /// Mean state of a deficient cell's survivors, or the nearest surviving
    /// point's state when the cell is empty
    fn cell_inheritance(&self, survivors: &[usize], cx: f64, cz: f64, n_old: usize) -> Donor {
        if survivors.is_empty() {
            // Nearest original point anywhere in the swarm
            let mut best = 0;
            let mut best_d2 = f64::INFINITY;
            for p in 0..n_old {
                let dx = self.x[p] - cx;
                let dz = self.z[p] - cz;
                let d2 = dx * dx + dz * dz;
                if d2 < best_d2 {
                    best_d2 = d2;
                    best = p;
                }
            }
            return Donor {
                material: self.material_id[best],
                plastic_strain: self.plastic_strain[best],
                temperature: self.temperature[best],
                pressure: self.pressure[best],
                melt_fraction: self.melt_fraction[best],
            };
        }

        // Majority material id among survivors
        let mut ids: Vec<u32> = survivors.iter().map(|&p| self.material_id[p]).collect();
        ids.sort_unstable();
        let mut material = ids[0];
        let mut best_run = 0;
        let mut run = 0;
        let mut prev = u32::MAX;
        for &id in &ids {
            if id == prev {
                run += 1;
            } else {
                run = 1;
                prev = id;
            }
            if run > best_run {
                best_run = run;
                material = id;
            }
        }

        let inv = 1.0 / survivors.len() as f64;
        Donor {
            material,
            plastic_strain: survivors.iter().map(|&p| self.plastic_strain[p]).sum::<f64>() * inv,
            temperature: survivors.iter().map(|&p| self.temperature[p]).sum::<f64>() * inv,
            pressure: survivors.iter().map(|&p| self.pressure[p]).sum::<f64>() * inv,
            melt_fraction: survivors.iter().map(|&p| self.melt_fraction[p]).sum::<f64>() * inv,
        }
    }

    /// Resample the grid temperature field onto every point
    pub fn resample_temperature(&mut self, grid: &Grid, fields: &FieldState) {
        for p in 0..self.len() {
            if let Some(t) = fields.temperature_at(grid, self.x[p], self.z[p]) {
                self.temperature[p] = t;
            }
        }
    }

    /// Sample the cell pressure field onto every point
    pub fn sample_pressure(&mut self, grid: &Grid, fields: &FieldState) {
        for p in 0..self.len() {
            if let Some(pr) = fields.pressure_at(grid, self.x[p], self.z[p]) {
                self.pressure[p] = pr;
            }
        }
    }

    /// Update melt fractions from the catalog's solidus/liquidus models
    pub fn update_melt(&mut self, catalog: &MaterialCatalog) {
        for p in 0..self.len() {
            self.melt_fraction[p] =
                catalog.melt_fraction(self.material_id[p], self.temperature[p], self.pressure[p]);
        }
    }

    /// Accumulate plastic strain on points whose cell is at yield
    pub fn accumulate_plastic_strain(
        &mut self,
        grid: &Grid,
        fields: &FieldState,
        catalog: &MaterialCatalog,
        dt: f64,
    ) {
        for p in 0..self.len() {
            let edot = match fields.strain_rate_at(grid, self.x[p], self.z[p]) {
                Some(e) => e,
                None => continue,
            };
            if catalog.is_yielding(
                self.material_id[p],
                self.temperature[p],
                edot,
                self.pressure[p],
                self.plastic_strain[p],
            ) {
                self.plastic_strain[p] += edot * dt;
            }
        }
    }

    /// Append one P-T-t sample per point
    pub fn record_history(&mut self, time_myr: f64) {
        for p in 0..self.len() {
            let sample = PttSample {
                time_myr,
                temperature: self.temperature[p],
                pressure: self.pressure[p],
            };
            self.histories[p].push(sample);
        }
    }

    /// Apply every transition rule to every point, returning the number of
    /// conversions per rule. Rules are evaluated in order against the point's
    /// material id at entry, so one sweep performs at most one transition per
    /// point.
    pub fn apply_phase_changes(
        &mut self,
        rules: &[PhaseChangeRule],
        grid: &Grid,
        fields: &FieldState,
    ) -> Vec<usize> {
        let mut counts = vec![0usize; rules.len()];
        for p in 0..self.len() {
            let material = self.material_id[p];
            let temperature = self.temperature[p];
            let strain_rate = fields
                .strain_rate_at(grid, self.x[p], self.z[p])
                .unwrap_or(0.0);
            for (r, rule) in rules.iter().enumerate() {
                if rule.matches(material, temperature, strain_rate) {
                    self.material_id[p] = rule.to;
                    counts[r] += 1;
                    break;
                }
            }
        }
        counts
    }

    /// Project point state onto the cell fields the solvers consume.
    ///
    /// Density, heat production, conductivity, and ρ·cₚ are arithmetic cell
    /// means; viscosity is the geometric mean, which behaves better across
    /// the orders-of-magnitude contrasts at material interfaces. Cells left
    /// without points keep their previous values (repopulation runs before
    /// the next projection, so this is a one-step bridge at worst).
    pub fn project_to_fields(&self, grid: &Grid, catalog: &MaterialCatalog, fields: &mut FieldState) {
        let nc = grid.num_cells();
        let mut count = vec![0usize; nc];
        let mut rho = vec![0.0; nc];
        let mut heat = vec![0.0; nc];
        let mut cond = vec![0.0; nc];
        let mut rho_cp = vec![0.0; nc];
        let mut log_eta = vec![0.0; nc];
        let mut melt = vec![0.0; nc];

        for p in 0..self.len() {
            let (i, k) = match grid.cell_of(self.x[p], self.z[p]) {
                Some(c) => c,
                None => continue,
            };
            let c = grid.cell_index(i, k);
            let mat = catalog.get(self.material_id[p]);
            let t = self.temperature[p];
            let density = mat.density(t);

            let eta = catalog.effective_viscosity(
                self.material_id[p],
                t,
                fields.strain_rate_ii[c],
                self.pressure[p],
                self.plastic_strain[p],
                self.melt_fraction[p],
            );

            count[c] += 1;
            rho[c] += density;
            heat[c] += mat.heat_production;
            cond[c] += mat.conductivity;
            rho_cp[c] += density * mat.heat_capacity;
            log_eta[c] += eta.ln();
            melt[c] += self.melt_fraction[p];
        }

        for c in 0..nc {
            if count[c] == 0 {
                continue;
            }
            let inv = 1.0 / count[c] as f64;
            fields.density[c] = rho[c] * inv;
            fields.heat_production[c] = heat[c] * inv;
            fields.conductivity[c] = cond[c] * inv;
            fields.rho_cp[c] = rho_cp[c] * inv;
            // Re-clamp after the exp: the log-mean of clamped values can
            // overshoot the bound by roundoff
            fields.viscosity[c] = (log_eta[c] * inv)
                .exp()
                .clamp(catalog.min_viscosity, catalog.max_viscosity);
            fields.melt_fraction[c] = melt[c] * inv;
        }
    }

    /// Deepest extent of crustal material (m below the surface), the
    /// observable driving root-thickness phase triggers. Evaluated as the
    /// maximum over coarse x-bins of the deepest crustal point in each bin,
    /// which rejects isolated stragglers less than a global max would but
    /// still tracks the root.
    pub fn crustal_root_depth(&self, grid: &Grid, is_crustal: &[bool]) -> f64 {
        const BINS: usize = 16;
        let mut deepest = [0.0f64; BINS];
        for p in 0..self.len() {
            if !is_crustal[self.material_id[p] as usize] {
                continue;
            }
            let bin = ((self.x[p] / grid.lx * BINS as f64) as usize).min(BINS - 1);
            let depth = grid.depth(self.z[p]);
            if depth > deepest[bin] {
                deepest[bin] = depth;
            }
        }
        deepest.iter().copied().fold(0.0, f64::max)
    }
}

struct Donor {
    material: u32,
    plastic_strain: f64,
    temperature: f64,
    pressure: f64,
    melt_fraction: f64,
}

/// First configured layer whose [top, bottom) depth interval contains the
/// given depth (km below surface); the deepest layer is bottom-inclusive
fn material_for_depth(materials: &[MaterialConfig], depth_km: f64) -> Option<usize> {
    let mut fallback = None;
    for (idx, mat) in materials.iter().enumerate() {
        if mat.layer_top_km >= mat.layer_bottom_km {
            continue; // degenerate layer: material exists only via transitions
        }
        if depth_km >= mat.layer_top_km && depth_km < mat.layer_bottom_km {
            return Some(idx);
        }
        if (depth_km - mat.layer_bottom_km).abs() < 1e-9 {
            fallback = Some(idx);
        }
    }
    fallback
}
