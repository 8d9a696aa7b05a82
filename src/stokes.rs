//! Penalty-formulation Stokes solver
//!
//! Solves the incompressible Stokes problem on the structured quad grid with
//! bilinear (Q1) velocity elements and a penalty term standing in for the
//! pressure equation:
//!
//! ```text
//! ∇·(2μ ε̇_dev) + ζ ∇(∇·v) = -ρ g ẑ,   p_dyn = -ζ ∇·v
//! ```
//!
//! The deviatoric operator is integrated with full 2×2 Gauss quadrature and
//! the penalty term with a single reduced point, which prevents locking. The
//! penalty coefficient ζ scales with the largest cell viscosity so the
//! divergence constraint stays tight across the full viscosity contrast.
//!
//! Nonlinearity (stress-dependent creep, pressure-dependent yield) is
//! handled by Picard iteration with under-relaxation; a bounded retry
//! schedule halves the relaxation before giving up with a convergence error.

use crate::config::SolverConfig;
use crate::error::{Result, SimulationError};
use crate::fields::FieldState;
use crate::grid::Grid;
use crate::linalg::conjugate_gradient;
use nalgebra::SMatrix;
use sprs::{CsMat, TriMat};

/// Kinematic boundary conditions for one solve.
///
/// Sides are Dirichlet in vx (±`side_velocity`, positive = inward
/// shortening) and free-slip in vz; the top is free-slip (vz = 0, vx free).
/// The base imposes the uniform normal velocity that balances the side
/// influx, vz = -2·v·lz/lx, so the prescribed boundary velocities are
/// compatible with incompressibility: shortening pushes the column down
/// through the base (the root deepens into the mantle) and extension draws
/// material back in. With a closed base instead, the net side influx
/// 2·v·lz has nowhere to go and the penalty solve degenerates to uniform
/// compression.
#[derive(Debug, Clone, Copy)]
pub struct StokesBc {
    /// Horizontal velocity magnitude applied at each side (m/s); the left
    /// wall moves +x, the right wall -x
    pub side_velocity: f64,
}

impl StokesBc {
    /// Basal normal velocity balancing the side influx exactly
    pub fn basal_velocity(&self, grid: &Grid) -> f64 {
        -2.0 * self.side_velocity * grid.lz / grid.lx
    }
}

/// Step context threaded into convergence errors
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub step: usize,
    pub time_myr: f64,
    pub last_checkpoint_step: usize,
}

/// Diagnostics from one converged Stokes solve
#[derive(Debug, Clone, Copy)]
pub struct StokesSolution {
    /// Picard iterations spent in the successful attempt
    pub picard_iterations: usize,
    /// Attempts used (1 = converged without retrying)
    pub attempts: usize,
    /// Final relative velocity change
    pub residual: f64,
    /// Penalty coefficient used (Pa·s)
    pub penalty: f64,
}

const GAUSS_2PT: [f64; 2] = [0.211324865405187, 0.788675134594813];

pub struct StokesSolver<'a> {
    config: &'a SolverConfig,
    gravity: f64,
}

impl<'a> StokesSolver<'a> {
    pub fn new(config: &'a SolverConfig, gravity: f64) -> Self {
        Self { config, gravity }
    }

    /// Run the Picard loop until the velocity field is self-consistent with
    /// the strain-rate-dependent viscosity.
    ///
    /// `update_viscosity` recomputes `fields.viscosity` from the freshly
    /// written strain rates and pressures; the driver supplies the swarm
    /// projection for this.
    pub fn solve<F>(
        &self,
        grid: &Grid,
        fields: &mut FieldState,
        bc: &StokesBc,
        ctx: &StepContext,
        mut update_viscosity: F,
    ) -> Result<StokesSolution>
    where
        F: FnMut(&Grid, &mut FieldState),
    {
        let saved_vx = fields.vx.clone();
        let saved_vz = fields.vz.clone();
        let mut last_residual = f64::INFINITY;

        for attempt in 0..=self.config.max_retries {
            // Halve the relaxation on every retry
            let relax = self.config.picard_relaxation * 0.5f64.powi(attempt as i32);

            for iter in 0..self.config.picard_max_iterations {
                let penalty = self.penalty_coefficient(fields);
                let (matrix, rhs) = self.assemble(grid, fields, bc, penalty);

                let ndof = 2 * grid.num_nodes();
                let mut solution = vec![0.0; ndof];
                for n in 0..grid.num_nodes() {
                    solution[2 * n] = fields.vx[n];
                    solution[2 * n + 1] = fields.vz[n];
                }
                let stats = conjugate_gradient(
                    &matrix,
                    &rhs,
                    &mut solution,
                    self.config.linear_max_iterations,
                    self.config.linear_tolerance,
                );
                if !stats.converged {
                    // A stalled linear solve counts as a failed attempt and
                    // falls through to the retry schedule
                    last_residual = stats.residual_norm;
                    break;
                }

                // Under-relaxed update and convergence measure
                let mut diff2 = 0.0;
                let mut norm2 = 0.0;
                for n in 0..grid.num_nodes() {
                    let vx_new = (1.0 - relax) * fields.vx[n] + relax * solution[2 * n];
                    let vz_new = (1.0 - relax) * fields.vz[n] + relax * solution[2 * n + 1];
                    let dx = vx_new - fields.vx[n];
                    let dz = vz_new - fields.vz[n];
                    diff2 += dx * dx + dz * dz;
                    norm2 += vx_new * vx_new + vz_new * vz_new;
                    fields.vx[n] = vx_new;
                    fields.vz[n] = vz_new;
                }
                let residual = if norm2 > 0.0 {
                    (diff2 / norm2).sqrt()
                } else {
                    0.0
                };
                last_residual = residual;

                self.update_strain_rates_and_pressure(grid, fields, penalty);

                // Damp the viscosity update in log space with the same
                // relaxation factor; undamped, the plastic branch flips
                // cells in and out of yield and the fixed point oscillates
                let eta_prev = fields.viscosity.clone();
                update_viscosity(grid, fields);
                for (eta, old) in fields.viscosity.iter_mut().zip(&eta_prev) {
                    *eta = ((1.0 - relax) * old.ln() + relax * eta.ln()).exp();
                }

                if residual < self.config.picard_tolerance {
                    return Ok(StokesSolution {
                        picard_iterations: iter + 1,
                        attempts: attempt + 1,
                        residual,
                        penalty,
                    });
                }
            }

            // Restart the next attempt from the pre-solve state
            fields.vx.copy_from_slice(&saved_vx);
            fields.vz.copy_from_slice(&saved_vz);
        }

        Err(SimulationError::Convergence {
            step: ctx.step,
            time_myr: ctx.time_myr,
            attempts: self.config.max_retries + 1,
            residual: last_residual,
            last_checkpoint_step: ctx.last_checkpoint_step,
        })
    }

    /// ζ = penalty_factor · max cell viscosity
    fn penalty_coefficient(&self, fields: &FieldState) -> f64 {
        let mu_max = fields
            .viscosity
            .iter()
            .copied()
            .fold(self.config.min_viscosity, f64::max);
        self.config.penalty_factor * mu_max
    }

    /// Dirichlet values per dof: side vx, free-slip top vz, compensating
    /// outflow vz at the base
    fn constraints(&self, grid: &Grid, bc: &StokesBc) -> Vec<Option<f64>> {
        let mut constraint = vec![None; 2 * grid.num_nodes()];
        let basal_vz = bc.basal_velocity(grid);
        for k in 0..grid.nnz() {
            // Left wall moves inward (+x), right wall inward (-x)
            constraint[2 * grid.node_index(0, k)] = Some(bc.side_velocity);
            constraint[2 * grid.node_index(grid.nx, k)] = Some(-bc.side_velocity);
        }
        for i in 0..grid.nnx() {
            constraint[2 * grid.node_index(i, 0) + 1] = Some(basal_vz);
            // Free-slip surface: vz = 0
            constraint[2 * grid.node_index(i, grid.nz) + 1] = Some(0.0);
        }
        constraint
    }

    /// Assemble the global stiffness matrix and body-force vector.
    ///
    /// Dirichlet dofs are eliminated exactly: their columns move to the
    /// right-hand side and their rows become identities, so the solver's
    /// stopping criterion is never distorted by constraint scaling.
    fn assemble(
        &self,
        grid: &Grid,
        fields: &FieldState,
        bc: &StokesBc,
        penalty: f64,
    ) -> (CsMat<f64>, Vec<f64>) {
        let ndof = 2 * grid.num_nodes();
        let mut tri = TriMat::new((ndof, ndof));
        let mut rhs = vec![0.0; ndof];
        let constraint = self.constraints(grid, bc);

        let area = grid.dx * grid.dz;
        for ck in 0..grid.nz {
            for ci in 0..grid.nx {
                let cell = grid.cell_index(ci, ck);
                let mu = fields.viscosity[cell];
                let nodes = grid.cell_nodes(ci, ck);

                let ke = element_stiffness(grid, mu, penalty);

                // Scatter; element dof order is [vx0, vz0, vx1, vz1, ...]
                for a in 0..4 {
                    for da in 0..2 {
                        let row = 2 * nodes[a] + da;
                        if constraint[row].is_some() {
                            continue;
                        }
                        for b in 0..4 {
                            for db in 0..2 {
                                let val = ke[(2 * a + da, 2 * b + db)];
                                if val == 0.0 {
                                    continue;
                                }
                                let col = 2 * nodes[b] + db;
                                match constraint[col] {
                                    Some(value) => rhs[row] -= val * value,
                                    None => tri.add_triplet(row, col, val),
                                }
                            }
                        }
                    }
                }

                // Buoyancy: -ρ g on the vertical dof, lumped evenly
                let fz = -fields.density[cell] * self.gravity * area * 0.25;
                for &node in &nodes {
                    if constraint[2 * node + 1].is_none() {
                        rhs[2 * node + 1] += fz;
                    }
                }
            }
        }

        for (dof, value) in constraint.iter().enumerate() {
            if let Some(value) = value {
                tri.add_triplet(dof, dof, 1.0);
                rhs[dof] = *value;
            }
        }

        (tri.to_csr(), rhs)
    }

    /// Cell-centered strain-rate invariant and dynamic pressure recovery,
    /// both evaluated at the reduced integration point; refreshes the total
    /// pressure field afterwards.
    fn update_strain_rates_and_pressure(&self, grid: &Grid, fields: &mut FieldState, penalty: f64) {
        let mut dynamic = vec![0.0; grid.num_cells()];
        for ck in 0..grid.nz {
            for ci in 0..grid.nx {
                let cell = grid.cell_index(ci, ck);
                let nodes = grid.cell_nodes(ci, ck);
                let (dn_dx, dn_dz) = shape_gradients(grid, 0.5, 0.5);

                let mut exx = 0.0;
                let mut ezz = 0.0;
                let mut exz = 0.0;
                for a in 0..4 {
                    let vx = fields.vx[nodes[a]];
                    let vz = fields.vz[nodes[a]];
                    exx += dn_dx[a] * vx;
                    ezz += dn_dz[a] * vz;
                    exz += 0.5 * (dn_dz[a] * vx + dn_dx[a] * vz);
                }
                fields.strain_rate_ii[cell] = (0.5 * (exx * exx + ezz * ezz) + exz * exz).sqrt();
                dynamic[cell] = -penalty * (exx + ezz);
            }
        }
        fields.update_pressure(grid, self.gravity, &dynamic);
    }
}

/// Shape-function gradients in physical coordinates at local (ξ, η),
/// matching `Grid::cell_nodes` ordering
fn shape_gradients(grid: &Grid, xi: f64, eta: f64) -> ([f64; 4], [f64; 4]) {
    let dn_dxi = [-(1.0 - eta), 1.0 - eta, eta, -eta];
    let dn_deta = [-(1.0 - xi), -xi, xi, 1.0 - xi];
    let mut dn_dx = [0.0; 4];
    let mut dn_dz = [0.0; 4];
    for a in 0..4 {
        dn_dx[a] = dn_dxi[a] / grid.dx;
        dn_dz[a] = dn_deta[a] / grid.dz;
    }
    (dn_dx, dn_dz)
}

/// 8×8 element stiffness: full integration of the deviatoric operator plus
/// reduced one-point integration of the penalty term
fn element_stiffness(grid: &Grid, mu: f64, penalty: f64) -> SMatrix<f64, 8, 8> {
    let mut ke = SMatrix::<f64, 8, 8>::zeros();
    let jac = grid.dx * grid.dz;

    // Deviatoric part, 2×2 Gauss (weight 1/2 per direction on [0,1]):
    // D_dev = μ [[4/3, -2/3, 0], [-2/3, 4/3, 0], [0, 0, 1]]
    for &xi in &GAUSS_2PT {
        for &eta in &GAUSS_2PT {
            let (dn_dx, dn_dz) = shape_gradients(grid, xi, eta);
            let w = 0.25 * jac;
            for a in 0..4 {
                for b in 0..4 {
                    let (nax, naz) = (dn_dx[a], dn_dz[a]);
                    let (nbx, nbz) = (dn_dx[b], dn_dz[b]);
                    // Bᵀ D_dev B expanded into the 2-dof blocks
                    let k_xx = mu * (4.0 / 3.0 * nax * nbx + naz * nbz);
                    let k_xz = mu * (-2.0 / 3.0 * nax * nbz + naz * nbx);
                    let k_zx = mu * (-2.0 / 3.0 * naz * nbx + nax * nbz);
                    let k_zz = mu * (4.0 / 3.0 * naz * nbz + nax * nbx);
                    ke[(2 * a, 2 * b)] += w * k_xx;
                    ke[(2 * a, 2 * b + 1)] += w * k_xz;
                    ke[(2 * a + 1, 2 * b)] += w * k_zx;
                    ke[(2 * a + 1, 2 * b + 1)] += w * k_zz;
                }
            }
        }
    }

    // Penalty part, single point at the element center
    let (dn_dx, dn_dz) = shape_gradients(grid, 0.5, 0.5);
    for a in 0..4 {
        for b in 0..4 {
            ke[(2 * a, 2 * b)] += penalty * jac * dn_dx[a] * dn_dx[b];
            ke[(2 * a, 2 * b + 1)] += penalty * jac * dn_dx[a] * dn_dz[b];
            ke[(2 * a + 1, 2 * b)] += penalty * jac * dn_dz[a] * dn_dx[b];
            ke[(2 * a + 1, 2 * b + 1)] += penalty * jac * dn_dz[a] * dn_dz[b];
        }
    }

    ke
}
