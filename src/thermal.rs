//! Heat transport on the grid
//!
//! Backward-Euler advection-diffusion-production solve on the node lattice:
//!
//! ```text
//! ρcₚ (∂T/∂t + v·∇T) = ∇·(k ∇T) + H + H_s
//! ```
//!
//! Advection is first-order upwind so the implicit operator stays an
//! M-matrix; diffusion is the usual five-point stencil with face-averaged
//! conductivities. The surface is Dirichlet, the base is a Neumann heat flux
//! (or Dirichlet when a basal temperature is configured), and the sides are
//! insulated. The nonsymmetric system goes to BiCGSTAB.
//!
//! Backward Euler is unconditionally stable but smears advection when the
//! CFL number is large, so steps that would exceed CFL ≈ 1 are split into
//! sub-cycles; a step needing more sub-cycles than the configured cap raises
//! a stability violation, which the driver answers by shrinking Δt.

use crate::config::{SimulationConfig, SolverConfig, ThermalConfig};
use crate::error::{Result, SimulationError};
use crate::fields::FieldState;
use crate::grid::Grid;
use crate::linalg::{bicgstab, conjugate_gradient};
use crate::stokes::StepContext;
use sprs::TriMat;

/// Sub-cycle accounting for one thermal step
#[derive(Debug, Clone, Copy)]
pub struct ThermalStep {
    pub subcycles: usize,
    pub cfl: f64,
}

pub struct ThermalSolver<'a> {
    thermal: &'a ThermalConfig,
    solver: &'a SolverConfig,
    max_subcycles: usize,
    /// Dissipation-to-heat efficiency; None when shear heating is off
    shear_heating: Option<f64>,
}

impl<'a> ThermalSolver<'a> {
    pub fn new(config: &'a SimulationConfig) -> Self {
        Self {
            thermal: &config.thermal,
            solver: &config.solver,
            max_subcycles: config.time_stepping.max_thermal_subcycles,
            shear_heating: if config.physics.shear_heating_enabled {
                Some(config.physics.shear_heating_efficiency)
            } else {
                None
            },
        }
    }

    /// Advance the temperature field by `dt` seconds, sub-cycling as the
    /// advective CFL number demands. Returns the sub-cycle count used.
    pub fn step(
        &self,
        grid: &Grid,
        fields: &mut FieldState,
        dt: f64,
        basal_flux: f64,
        ctx: &StepContext,
    ) -> Result<ThermalStep> {
        let cfl = self.advective_cfl(grid, fields, dt);
        let subcycles = cfl.ceil().max(1.0) as usize;
        if subcycles > self.max_subcycles {
            return Err(SimulationError::Stability {
                step: ctx.step,
                time_myr: ctx.time_myr,
                cfl,
                required_subcycles: subcycles,
                max_subcycles: self.max_subcycles,
            });
        }

        let dt_sub = dt / subcycles as f64;
        for _ in 0..subcycles {
            self.solve_substep(grid, fields, Some(dt_sub), basal_flux, ctx)?;
        }
        Ok(ThermalStep { subcycles, cfl })
    }

    /// Solve the conductive steady state (no time term, no advection) for
    /// the current cell properties; used to initialize the geotherm.
    pub fn steady_state(
        &self,
        grid: &Grid,
        fields: &mut FieldState,
        basal_flux: f64,
    ) -> Result<()> {
        let ctx = StepContext {
            step: 0,
            time_myr: 0.0,
            last_checkpoint_step: 0,
        };
        self.solve_substep(grid, fields, None, basal_flux, &ctx)
    }

    /// Fill the temperature field with a linear profile from the surface
    /// value to `basal_temp` at the base.
    pub fn initialize_linear(&self, grid: &Grid, fields: &mut FieldState, basal_temp: f64) {
        let ts = self.thermal.surface_temp_k;
        for k in 0..grid.nnz() {
            let frac = k as f64 / grid.nz as f64; // 0 at base, 1 at surface
            let t = basal_temp + (ts - basal_temp) * frac;
            for i in 0..grid.nnx() {
                fields.temperature[grid.node_index(i, k)] = t;
            }
        }
    }

    /// Sub-cycles a step of `dt` would need; lets the driver shrink Δt
    /// before committing to advection rather than unwinding a failed step
    pub fn required_subcycles(&self, grid: &Grid, fields: &FieldState, dt: f64) -> usize {
        self.advective_cfl(grid, fields, dt).ceil().max(1.0) as usize
    }

    pub fn max_subcycles(&self) -> usize {
        self.max_subcycles
    }

    /// Largest node CFL number for the given dt
    fn advective_cfl(&self, grid: &Grid, fields: &FieldState, dt: f64) -> f64 {
        let mut worst = 0.0f64;
        for n in 0..grid.num_nodes() {
            let rate = fields.vx[n].abs() / grid.dx + fields.vz[n].abs() / grid.dz;
            worst = worst.max(rate * dt);
        }
        worst
    }

    /// One implicit solve. `dt` None drops the time and advection terms
    /// (steady state).
    ///
    /// Dirichlet nodes are eliminated exactly: their couplings move to the
    /// right-hand side and their rows become scaled identities at the
    /// interior diagonal magnitude, so the matrix stays well-scaled and,
    /// without advection, symmetric.
    fn solve_substep(
        &self,
        grid: &Grid,
        fields: &mut FieldState,
        dt: Option<f64>,
        basal_flux: f64,
        ctx: &StepContext,
    ) -> Result<()> {
        let nn = grid.num_nodes();
        let (cond, rho_cp, source) = self.nodal_properties(grid, fields);

        let mut tri = TriMat::new((nn, nn));
        let mut rhs = vec![0.0; nn];

        let dx2 = grid.dx * grid.dx;
        let dz2 = grid.dz * grid.dz;
        let dirichlet_base = self.thermal.basal_temp_k.is_some();

        // Fixed-temperature nodes: the surface row, and the base when a
        // basal temperature is configured
        let fixed = |_i: usize, k: usize| -> Option<f64> {
            if k == grid.nz {
                Some(self.thermal.surface_temp_k)
            } else if k == 0 && dirichlet_base {
                self.thermal.basal_temp_k
            } else {
                None
            }
        };

        // Identity scale for eliminated rows: the leading interior diagonal
        // magnitude, so no row dwarfs the others in the residual norm
        let k_max = cond.iter().copied().fold(0.0f64, f64::max);
        let mut row_scale = 2.0 * k_max * (1.0 / dx2 + 1.0 / dz2);
        if let Some(dt) = dt {
            let rc_max = rho_cp.iter().copied().fold(0.0f64, f64::max);
            row_scale += rc_max / dt;
        }

        for k in 0..grid.nnz() {
            for i in 0..grid.nnx() {
                let row = grid.node_index(i, k);

                if let Some(t) = fixed(i, k) {
                    tri.add_triplet(row, row, row_scale);
                    rhs[row] = row_scale * t;
                    continue;
                }

                let mut diag = 0.0;
                // Off-diagonal coupling; a coupling to a fixed node moves
                // its known temperature to the right-hand side
                let couple = |tri: &mut TriMat<f64>,
                                  rhs: &mut Vec<f64>,
                                  ci: usize,
                                  ck: usize,
                                  c: f64| {
                    match fixed(ci, ck) {
                        Some(t) => rhs[row] += c * t,
                        None => tri.add_triplet(row, grid.node_index(ci, ck), -c),
                    }
                };

                // Time term
                if let Some(dt) = dt {
                    let c = rho_cp[row] / dt;
                    diag += c;
                    rhs[row] += c * fields.temperature[row];
                }

                // Heat sources
                rhs[row] += source[row];

                // Diffusion, five-point with face conductivities; a missing
                // lateral neighbor is an insulated (mirror) face, a missing
                // basal neighbor carries the imposed flux. Boundary control
                // volumes are half-width, which doubles the surviving face
                // coefficient.
                let half_x = i == 0 || i == grid.nx;
                let half_z = k == 0;
                let fx = if half_x { 2.0 } else { 1.0 };
                let fz = if half_z { 2.0 } else { 1.0 };

                if i > 0 {
                    let kw = 0.5 * (cond[row] + cond[grid.node_index(i - 1, k)]);
                    let c = fx * kw / dx2;
                    diag += c;
                    couple(&mut tri, &mut rhs, i - 1, k, c);
                }
                if i < grid.nx {
                    let ke = 0.5 * (cond[row] + cond[grid.node_index(i + 1, k)]);
                    let c = fx * ke / dx2;
                    diag += c;
                    couple(&mut tri, &mut rhs, i + 1, k, c);
                }
                if k > 0 {
                    let ks = 0.5 * (cond[row] + cond[grid.node_index(i, k - 1)]);
                    let c = fz * ks / dz2;
                    diag += c;
                    couple(&mut tri, &mut rhs, i, k - 1, c);
                }
                // Node above always exists (surface handled separately)
                let kn = 0.5 * (cond[row] + cond[grid.node_index(i, k + 1)]);
                let cn = fz * kn / dz2;
                diag += cn;
                couple(&mut tri, &mut rhs, i, k + 1, cn);

                // Basal Neumann flux enters through the half control volume
                if k == 0 {
                    rhs[row] += 2.0 * basal_flux / grid.dz;
                }

                // Upwind advection (transient solves only)
                if dt.is_some() {
                    let vx = fields.vx[row];
                    let vz = fields.vz[row];
                    let ax = rho_cp[row] * vx.abs() / grid.dx;
                    let az = rho_cp[row] * vz.abs() / grid.dz;
                    if vx > 0.0 && i > 0 {
                        diag += ax;
                        couple(&mut tri, &mut rhs, i - 1, k, ax);
                    } else if vx < 0.0 && i < grid.nx {
                        diag += ax;
                        couple(&mut tri, &mut rhs, i + 1, k, ax);
                    }
                    if vz > 0.0 && k > 0 {
                        diag += az;
                        couple(&mut tri, &mut rhs, i, k - 1, az);
                    } else if vz < 0.0 && k < grid.nz {
                        diag += az;
                        couple(&mut tri, &mut rhs, i, k + 1, az);
                    }
                }

                tri.add_triplet(row, row, diag);
            }
        }

        let matrix = tri.to_csr();
        let mut solution = fields.temperature.clone();
        // The steady problem is symmetric (pure diffusion) and initializes
        // the run, so it gets CG at a tolerance tight enough that the
        // iteration error stays well below the analytic comparison bands;
        // transient sub-steps are nonsymmetric (upwinding) and go to
        // BiCGSTAB at the configured tolerance.
        let stats = match dt {
            None => conjugate_gradient(
                &matrix,
                &rhs,
                &mut solution,
                self.solver.linear_max_iterations.max(8 * nn),
                self.solver.linear_tolerance.min(1e-12),
            ),
            Some(_) => bicgstab(
                &matrix,
                &rhs,
                &mut solution,
                self.solver.linear_max_iterations,
                self.solver.linear_tolerance,
            ),
        };
        if !stats.converged {
            return Err(SimulationError::Convergence {
                step: ctx.step,
                time_myr: ctx.time_myr,
                attempts: 1,
                residual: stats.residual_norm,
                last_checkpoint_step: ctx.last_checkpoint_step,
            });
        }
        fields.temperature = solution;
        Ok(())
    }

    /// Cell-to-node averages of conductivity, ρcₚ, and the volumetric heat
    /// source (radiogenic plus optional shear heating)
    fn nodal_properties(&self, grid: &Grid, fields: &FieldState) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let nn = grid.num_nodes();
        let mut cond = vec![0.0; nn];
        let mut rho_cp = vec![0.0; nn];
        let mut source = vec![0.0; nn];
        let mut count = vec![0u8; nn];

        for ck in 0..grid.nz {
            for ci in 0..grid.nx {
                let cell = grid.cell_index(ci, ck);
                let mut h = fields.heat_production[cell];
                if let Some(eff) = self.shear_heating {
                    // Dissipation Φ = 2μ ε̇:ε̇ = 4μ ε̇_II²
                    let edot = fields.strain_rate_ii[cell];
                    h += eff * 4.0 * fields.viscosity[cell] * edot * edot;
                }
                for &node in &grid.cell_nodes(ci, ck) {
                    cond[node] += fields.conductivity[cell];
                    rho_cp[node] += fields.rho_cp[cell];
                    source[node] += h;
                    count[node] += 1;
                }
            }
        }
        for n in 0..nn {
            if count[n] > 0 {
                let inv = 1.0 / count[n] as f64;
                cond[n] *= inv;
                rho_cp[n] *= inv;
                source[n] *= inv;
            }
        }
        (cond, rho_cp, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::two_layer_config;
    use crate::utils::units::years_to_seconds;
    use approx::assert_relative_eq;

    fn ctx() -> StepContext {
        StepContext {
            step: 0,
            time_myr: 0.0,
            last_checkpoint_step: 0,
        }
    }

    /// Uniform-material fields over the whole grid
    fn uniform_fields(grid: &Grid, k: f64, rho_cp: f64, h: f64) -> FieldState {
        let mut fields = FieldState::new(grid);
        fields.conductivity = vec![k; grid.num_cells()];
        fields.rho_cp = vec![rho_cp; grid.num_cells()];
        fields.heat_production = vec![h; grid.num_cells()];
        fields
    }

    #[test]
    fn test_steady_state_no_production_is_linear() {
        let config = two_layer_config();
        let grid = Grid::new(100e3, 40e3, 4, 40);
        let mut fields = uniform_fields(&grid, 2.5, 2700.0 * 1000.0, 0.0);
        let solver = ThermalSolver::new(&config);
        let q = 0.020;
        solver.steady_state(&grid, &mut fields, q).unwrap();

        // T(d) = Ts + q d / k, exact for the five-point stencil
        let ts = config.thermal.surface_temp_k;
        for k_idx in 0..grid.nnz() {
            let (_, z) = grid.node_pos(2, k_idx);
            let expected = ts + q * grid.depth(z) / 2.5;
            let got = fields.temperature[grid.node_index(2, k_idx)];
            assert_relative_eq!(got, expected, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_steady_state_with_uniform_production() {
        let config = two_layer_config();
        let grid = Grid::new(50e3, 40e3, 2, 80);
        let kc = 3.0;
        let h = 1.0e-6;
        let mut fields = uniform_fields(&grid, kc, 2700.0 * 1000.0, h);
        let solver = ThermalSolver::new(&config);
        let q = 0.020;
        solver.steady_state(&grid, &mut fields, q).unwrap();

        // Analytic: T(d) = Ts + (q·d + H·(D·d - d²/2)) / k
        let ts = config.thermal.surface_temp_k;
        let d_total = grid.lz;
        for k_idx in (0..grid.nnz()).step_by(10) {
            let z = k_idx as f64 * grid.dz;
            let d = grid.depth(z);
            let expected = ts + (q * d + h * (d_total * d - 0.5 * d * d)) / kc;
            let got = fields.temperature[grid.node_index(1, k_idx)];
            assert_relative_eq!(got, expected, max_relative = 5e-3);
        }
    }

    #[test]
    fn test_dirichlet_base_overrides_flux() {
        let mut config = two_layer_config();
        config.thermal.basal_temp_k = Some(1600.0);
        let grid = Grid::new(50e3, 40e3, 2, 20);
        let mut fields = uniform_fields(&grid, 2.5, 2.7e6, 0.0);
        let solver = ThermalSolver::new(&config);
        solver.steady_state(&grid, &mut fields, 0.999).unwrap();

        for i in 0..grid.nnx() {
            assert_relative_eq!(fields.temperature[grid.node_index(i, 0)], 1600.0);
        }
    }

    #[test]
    fn test_transient_relaxes_toward_steady_state() {
        let config = two_layer_config();
        let grid = Grid::new(50e3, 40e3, 2, 20);
        let kc = 2.5;
        let rho_cp = 2.7e6;
        let solver = ThermalSolver::new(&config);
        let q = 0.020;

        let mut steady = uniform_fields(&grid, kc, rho_cp, 0.0);
        solver.steady_state(&grid, &mut steady, q).unwrap();

        // Start hot everywhere and diffuse for a long time
        let mut fields = uniform_fields(&grid, kc, rho_cp, 0.0);
        fields.temperature = vec![1200.0; grid.num_nodes()];
        let dt = years_to_seconds(500_000.0);
        let mut err_prev = f64::INFINITY;
        for _ in 0..6 {
            solver.step(&grid, &mut fields, dt, q, &ctx()).unwrap();
            let err: f64 = fields
                .temperature
                .iter()
                .zip(&steady.temperature)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            assert!(err < err_prev + 1e-9, "must approach steady state");
            err_prev = err;
        }
    }

    #[test]
    fn test_advection_carries_heat_downstream() {
        let config = two_layer_config();
        let grid = Grid::new(100e3, 20e3, 20, 4);
        let mut fields = uniform_fields(&grid, 1e-3, 2.7e6, 0.0); // nearly pure advection
        // Hot blob on the left, cold right, uniform rightward flow
        for k in 0..grid.nnz() {
            for i in 0..grid.nnx() {
                let (x, _) = grid.node_pos(i, k);
                fields.temperature[grid.node_index(i, k)] =
                    if x < 30e3 { 1000.0 } else { 400.0 };
            }
        }
        let v = 1e-9;
        fields.vx = vec![v; grid.num_nodes()];

        let solver = ThermalSolver::new(&config);
        let dt = 0.5 * grid.dx / v; // CFL 0.5, single cycle
        let downstream = grid.node_index(7, 2); // just past the front
        let before = fields.temperature[downstream];
        let result = solver.step(&grid, &mut fields, dt, 0.0, &ctx()).unwrap();
        assert_eq!(result.subcycles, 1);
        assert!(
            fields.temperature[downstream] > before,
            "downstream node must warm as the front advects"
        );
    }

    #[test]
    fn test_subcycling_and_stability_guard() {
        let mut config = two_layer_config();
        config.time_stepping.max_thermal_subcycles = 4;
        let grid = Grid::new(100e3, 20e3, 10, 2);
        let mut fields = uniform_fields(&grid, 2.5, 2.7e6, 0.0);
        let v = 1e-9;
        fields.vx = vec![v; grid.num_nodes()];
        let solver = ThermalSolver::new(&config);

        // CFL 3: needs 3 sub-cycles, under the cap
        let dt3 = 3.0 * grid.dx / v;
        let result = solver.step(&grid, &mut fields, dt3, 0.0, &ctx()).unwrap();
        assert_eq!(result.subcycles, 3);

        // CFL 10: over the cap of 4 → stability violation, not a panic
        let dt10 = 10.0 * grid.dx / v;
        let err = solver.step(&grid, &mut fields, dt10, 0.0, &ctx()).unwrap_err();
        match err {
            SimulationError::Stability {
                required_subcycles,
                max_subcycles,
                ..
            } => {
                assert_eq!(required_subcycles, 10);
                assert_eq!(max_subcycles, 4);
            }
            other => panic!("expected stability violation, got {other}"),
        }
        assert!(!err_is_fatal_helper());
    }

    fn err_is_fatal_helper() -> bool {
        SimulationError::Stability {
            step: 0,
            time_myr: 0.0,
            cfl: 10.0,
            required_subcycles: 10,
            max_subcycles: 4,
        }
        .is_fatal()
    }

    #[test]
    fn test_shear_heating_warms_the_domain() {
        let mut config = two_layer_config();
        config.physics.shear_heating_enabled = true;
        config.physics.shear_heating_efficiency = 1.0;
        let grid = Grid::new(50e3, 20e3, 4, 4);

        let run = |cfg: &crate::config::SimulationConfig| {
            let mut fields = uniform_fields(&grid, 2.5, 2.7e6, 0.0);
            fields.viscosity = vec![1e21; grid.num_cells()];
            fields.strain_rate_ii = vec![1e-14; grid.num_cells()];
            fields.temperature = vec![600.0; grid.num_nodes()];
            let solver = ThermalSolver::new(cfg);
            let dt = years_to_seconds(100_000.0);
            solver.step(&grid, &mut fields, dt, 0.0, &ctx()).unwrap();
            fields.temperature[grid.node_index(2, 2)]
        };

        let heated = run(&config);
        config.physics.shear_heating_enabled = false;
        let unheated = run(&config);
        assert!(
            heated > unheated,
            "dissipation must add heat: {heated} vs {unheated}"
        );
    }
}
