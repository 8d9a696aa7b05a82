//! Simulation driver
//!
//! Owns all mutable state (grid, fields, swarm, phase schedule) and runs the
//! per-step pipeline in a fixed order:
//!
//! 1. project swarm → cell fields
//! 2. Stokes solve (Picard, with swarm re-projection as the nonlinear update)
//! 3. adaptive Δt, shrunk until the heat solve's sub-cycle cap is satisfiable
//! 4. pressure/plastic-strain updates on points, advection, repopulation
//! 5. implicit heat solve, temperature resampled back onto points
//! 6. phase-change rules, P-T-t history cadence
//! 7. schedule triggers and checkpoint cadence
//!
//! Phase transitions are logged as first-class events; the run ends when the
//! schedule is exhausted or a time/step cap is hit.

use crate::bc::{PhaseSchedule, PhaseTransition};
use crate::checkpoint::Checkpoint;
use crate::config::SimulationConfig;
use crate::error::{Result, SimulationError};
use crate::fields::FieldState;
use crate::grid::Grid;
use crate::rheology::MaterialCatalog;
use crate::stokes::{StepContext, StokesBc, StokesSolver};
use crate::swarm::{PhaseChangeRule, PointSwarm};
use crate::thermal::ThermalSolver;
use crate::timestepping::AdaptiveTimestep;
use crate::utils::units::{seconds_to_myr, SECONDS_PER_YEAR};
use std::path::Path;

/// Why a completed run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase's trigger fired
    ScheduleExhausted,
    TimeCapReached,
    StepCapReached,
}

/// Per-step diagnostics
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: usize,
    pub time_myr: f64,
    pub dt_years: f64,
    pub picard_iterations: usize,
    pub picard_attempts: usize,
    pub thermal_subcycles: usize,
    pub repopulated_points: usize,
    pub phase_change_counts: Vec<usize>,
    pub phase_transition: Option<PhaseTransition>,
    pub root_depth_km: f64,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub steps: usize,
    pub final_time_myr: f64,
    pub discarded_points: u64,
    pub checkpoints_written: usize,
}

pub struct Simulation {
    config: SimulationConfig,
    grid: Grid,
    fields: FieldState,
    swarm: PointSwarm,
    catalog: MaterialCatalog,
    schedule: PhaseSchedule,
    rules: Vec<PhaseChangeRule>,
    /// Per-material flag used by the root-thickness observable
    is_crustal: Vec<bool>,
    time: f64,
    step_index: usize,
    last_checkpoint_step: usize,
    next_checkpoint_time: f64,
    checkpoints_written: usize,
}

impl Simulation {
    /// Validate the configuration, seed the swarm, and establish the initial
    /// geotherm.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let grid = Grid::new(
            config.domain.lx,
            config.domain.lz,
            config.domain.nx,
            config.domain.nz,
        );
        let catalog = MaterialCatalog::from_config(
            &config.materials,
            config.solver.min_viscosity,
            config.solver.max_viscosity,
            config.physics.melt_weakening_enabled,
        )?;
        let mut swarm = PointSwarm::seed(&grid, &config.swarm, &config.materials)?;
        let rules = PhaseChangeRule::resolve(&config)?;
        let schedule = PhaseSchedule::new(&config);
        let is_crustal = config
            .materials
            .iter()
            .map(|m| !m.name.contains("mantle") && !m.name.contains("air"))
            .collect();

        let mut fields = FieldState::new(&grid);

        // Initial geotherm: seed point temperatures at the surface value so
        // the first projection has physical densities, then solve or fill
        // the profile and resample it back.
        swarm.temperature.iter_mut().for_each(|t| *t = config.thermal.surface_temp_k);
        swarm.project_to_fields(&grid, &catalog, &mut fields);

        let thermal = ThermalSolver::new(&config);
        let basal_flux = schedule.basal_flux(0.0);
        match config.thermal.initial_geotherm.as_str() {
            "steady_state" => thermal.steady_state(&grid, &mut fields, basal_flux)?,
            _ => {
                // Linear estimate from the surface value to a conductive
                // basal temperature T_s + q·L/k̄
                let basal = config.thermal.basal_temp_k.unwrap_or_else(|| {
                    let k_mean = fields.conductivity.iter().sum::<f64>()
                        / fields.conductivity.len() as f64;
                    config.thermal.surface_temp_k + basal_flux * grid.lz / k_mean
                });
                thermal.initialize_linear(&grid, &mut fields, basal);
            }
        }

        swarm.resample_temperature(&grid, &fields);
        swarm.project_to_fields(&grid, &catalog, &mut fields);
        fields.update_pressure(&grid, config.physics.gravity, &[]);
        swarm.sample_pressure(&grid, &fields);
        swarm.update_melt(&catalog);
        swarm.record_history(0.0);

        let next_checkpoint_time = config.simulation.checkpoint_interval_years * SECONDS_PER_YEAR;
        Ok(Self {
            config,
            grid,
            fields,
            swarm,
            catalog,
            schedule,
            rules,
            is_crustal,
            time: 0.0,
            step_index: 0,
            last_checkpoint_step: 0,
            next_checkpoint_time,
            checkpoints_written: 0,
        })
    }

    /// Build a simulation positioned at a previously written checkpoint.
    pub fn resume(config: SimulationConfig, checkpoint_path: &Path) -> Result<Self> {
        let checkpoint = Checkpoint::load(checkpoint_path, &config)?;
        let mut sim = Self::new(config)?;
        sim.fields = checkpoint.fields;
        sim.swarm = checkpoint.swarm;
        sim.step_index = checkpoint.step;
        sim.last_checkpoint_step = checkpoint.step;
        sim.time = checkpoint.time_myr * 1e6 * SECONDS_PER_YEAR;
        sim.schedule.restore(
            checkpoint.phase_index,
            checkpoint.phase_start_myr,
            checkpoint.schedule_exhausted,
        );
        sim.next_checkpoint_time =
            sim.time + sim.config.simulation.checkpoint_interval_years * SECONDS_PER_YEAR;
        Ok(sim)
    }

    pub fn time_myr(&self) -> f64 {
        seconds_to_myr(self.time)
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn fields(&self) -> &FieldState {
        &self.fields
    }

    pub fn swarm(&self) -> &PointSwarm {
        &self.swarm
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn schedule(&self) -> &PhaseSchedule {
        &self.schedule
    }

    /// Advance one step through the full pipeline.
    pub fn step(&mut self) -> Result<StepReport> {
        self.step_index += 1;
        let ctx = StepContext {
            step: self.step_index,
            time_myr: self.time_myr(),
            last_checkpoint_step: self.last_checkpoint_step,
        };

        // 1. Swarm → cell fields
        self.swarm
            .project_to_fields(&self.grid, &self.catalog, &mut self.fields);

        // 2. Stokes with Picard; the nonlinear update is a fresh projection
        // of point viscosities against the just-computed strain rates
        let bc = StokesBc {
            side_velocity: self.schedule.side_velocity(),
        };
        let stokes = StokesSolver::new(&self.config.solver, self.config.physics.gravity);
        let swarm = &self.swarm;
        let catalog = &self.catalog;
        let solution = stokes.solve(&self.grid, &mut self.fields, &bc, &ctx, |grid, fields| {
            swarm.project_to_fields(grid, catalog, fields)
        })?;

        // 3. Δt, shrunk until the heat solve can honor its sub-cycle cap
        let thermal = ThermalSolver::new(&self.config);
        let adaptive = AdaptiveTimestep::compute(&self.config.time_stepping, &self.grid, &self.fields);
        let dt_min = self.config.time_stepping.dt_min_years * SECONDS_PER_YEAR;
        let mut dt = adaptive.dt;
        loop {
            let needed = thermal.required_subcycles(&self.grid, &self.fields, dt);
            if needed <= thermal.max_subcycles() {
                break;
            }
            if dt <= dt_min {
                return Err(SimulationError::Stability {
                    step: ctx.step,
                    time_myr: ctx.time_myr,
                    cfl: needed as f64,
                    required_subcycles: needed,
                    max_subcycles: thermal.max_subcycles(),
                });
            }
            dt = (dt * 0.5).max(dt_min);
        }

        // 4. Point updates that need the converged flow, then advection
        self.swarm.sample_pressure(&self.grid, &self.fields);
        self.swarm
            .accumulate_plastic_strain(&self.grid, &self.fields, &self.catalog, dt);
        self.swarm.advect(&self.grid, &self.fields, dt);
        let repopulated = self.swarm.repopulate(
            &self.grid,
            self.config.swarm.min_points_per_cell,
            self.config.swarm.points_per_cell_dir,
        );

        // 5. Heat transport, then hand the new temperatures back to points
        let basal_flux = self.schedule.basal_flux(self.time_myr());
        let thermal_result = thermal.step(&self.grid, &mut self.fields, dt, basal_flux, &ctx)?;
        self.swarm.resample_temperature(&self.grid, &self.fields);
        self.swarm.update_melt(&self.catalog);

        // 6. Material transitions and history
        let phase_change_counts =
            self.swarm
                .apply_phase_changes(&self.rules, &self.grid, &self.fields);

        self.time += dt;
        if self.step_index % self.config.swarm.history_every_n_steps == 0 {
            self.swarm.record_history(self.time_myr());
        }

        // 7. Schedule triggers and checkpoints
        let root_depth_km = self.swarm.crustal_root_depth(&self.grid, &self.is_crustal) / 1e3;
        let phase_transition = self.schedule.check(self.time_myr(), root_depth_km);
        if let Some(transition) = &phase_transition {
            match &transition.to {
                Some(next) => println!(
                    "── phase transition at t = {:.3} Myr: {} → {} ({:?})",
                    transition.time_myr, transition.from, next, transition.trigger
                ),
                None => println!(
                    "── phase schedule exhausted at t = {:.3} Myr (end of {})",
                    transition.time_myr, transition.from
                ),
            }
        }
        self.maybe_checkpoint()?;

        Ok(StepReport {
            step: self.step_index,
            time_myr: self.time_myr(),
            dt_years: dt / SECONDS_PER_YEAR,
            picard_iterations: solution.picard_iterations,
            picard_attempts: solution.attempts,
            thermal_subcycles: thermal_result.subcycles,
            repopulated_points: repopulated,
            phase_change_counts,
            phase_transition,
            root_depth_km,
        })
    }

    /// Run to completion, logging progress and writing checkpoints.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.config.print_summary();
        println!("Starting run: {} points seeded", self.swarm.len());

        let outcome = loop {
            if self.schedule.is_exhausted() {
                break RunOutcome::ScheduleExhausted;
            }
            if self.time_myr() >= self.config.simulation.max_time_myr {
                break RunOutcome::TimeCapReached;
            }
            if self.step_index >= self.config.simulation.max_steps {
                break RunOutcome::StepCapReached;
            }

            let report = self.step()?;
            if report.step % 10 == 0 || report.phase_transition.is_some() {
                println!(
                    "step {:6} | t = {:8.3} Myr | Δt = {:9.1} yr | Picard {:2} | sub {} | root {:5.1} km",
                    report.step,
                    report.time_myr,
                    report.dt_years,
                    report.picard_iterations,
                    report.thermal_subcycles,
                    report.root_depth_km
                );
            }
        };

        // Terminal checkpoint regardless of cadence
        self.write_checkpoint()?;

        println!("═══════════════════════════════════════════════════════════════");
        println!(
            "Run complete: {:?} after {} steps, t = {:.3} Myr",
            outcome,
            self.step_index,
            self.time_myr()
        );
        println!(
            "  swarm: {} points live, {} discarded at boundaries",
            self.swarm.len(),
            self.swarm.discarded_total
        );
        println!("═══════════════════════════════════════════════════════════════");

        Ok(RunSummary {
            outcome,
            steps: self.step_index,
            final_time_myr: self.time_myr(),
            discarded_points: self.swarm.discarded_total,
            checkpoints_written: self.checkpoints_written,
        })
    }

    fn maybe_checkpoint(&mut self) -> Result<()> {
        if self.time < self.next_checkpoint_time {
            return Ok(());
        }
        self.write_checkpoint()?;
        let interval = self.config.simulation.checkpoint_interval_years * SECONDS_PER_YEAR;
        while self.next_checkpoint_time <= self.time {
            self.next_checkpoint_time += interval;
        }
        Ok(())
    }

    fn write_checkpoint(&mut self) -> Result<()> {
        if self.config.simulation.checkpoint_dir.is_empty() {
            return Ok(());
        }
        let checkpoint = Checkpoint::new(
            self.step_index,
            self.time_myr(),
            self.schedule.current_index(),
            self.schedule.phase_start_myr(),
            self.schedule.is_exhausted(),
            self.config.materials.len(),
            &self.grid,
            &self.fields,
            &self.swarm,
        );
        checkpoint.validate(&self.config)?;
        let path = checkpoint.save(Path::new(&self.config.simulation.checkpoint_dir))?;
        println!("checkpoint written: {}", path.display());
        self.last_checkpoint_step = self.step_index;
        self.checkpoints_written += 1;
        Ok(())
    }
}
