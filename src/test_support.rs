//! Shared fixtures for unit tests

use crate::config::{
    DomainConfig, MaterialConfig, MeltConfig, PhaseConfig, PhysicsConfig, SimulationConfig,
    SimulationParams, SolverConfig, SwarmConfig, ThermalConfig, TimeSteppingConfig,
};
use crate::fields::FieldState;
use crate::grid::Grid;
use crate::rheology::MaterialCatalog;
use crate::swarm::PointSwarm;

/// Reference scenario: 200 × 40 km crustal section with an enriched upper
/// crust over a depleted lower crust and an isoviscous mantle sliver, run
/// through a shortening phase followed by stationary relaxation.
pub fn two_layer_config() -> SimulationConfig {
    SimulationConfig {
        domain: DomainConfig {
            lx: 200e3,
            lz: 40e3,
            nx: 10,
            nz: 8,
        },
        simulation: SimulationParams {
            max_time_myr: 20.0,
            max_steps: 500,
            checkpoint_interval_years: 1e9,
            checkpoint_dir: String::new(),
        },
        thermal: ThermalConfig {
            surface_temp_k: 293.15,
            basal_heat_flux_w_m2: 0.020,
            basal_temp_k: None,
            initial_geotherm: "steady_state".to_string(),
        },
        swarm: SwarmConfig {
            points_per_cell_dir: 3,
            min_points_per_cell: 4,
            history_every_n_steps: 1,
            rng_seed: 42,
        },
        time_stepping: TimeSteppingConfig {
            dt_min_years: 100.0,
            dt_max_years: 50_000.0,
            cfl_target: 0.5,
            diffusion_target: 5.0,
            max_thermal_subcycles: 16,
        },
        solver: SolverConfig {
            picard_max_iterations: 50,
            picard_tolerance: 1e-6,
            picard_relaxation: 0.8,
            max_retries: 2,
            linear_max_iterations: 5000,
            linear_tolerance: 1e-10,
            penalty_factor: 1e5,
            min_viscosity: 1e18,
            max_viscosity: 1e23,
        },
        physics: PhysicsConfig {
            gravity: 9.81,
            shear_heating_enabled: false,
            shear_heating_efficiency: 1.0,
            melt_weakening_enabled: true,
        },
        materials: vec![
            MaterialConfig {
                name: "upper_crust".to_string(),
                layer_top_km: 0.0,
                layer_bottom_km: 20.0,
                density: 2700.0,
                reference_temp_k: 293.15,
                thermal_expansivity: 3.0e-5,
                conductivity: 2.5,
                heat_capacity: 1000.0,
                heat_production: 2.0e-6,
                rheology: "visco_plastic".to_string(),
                viscosity: 0.0,
                // Wet quartzite (Paterson & Luan 1990)
                creep_prefactor: 6.6e-8,
                creep_exponent: 3.1,
                activation_energy: 135e3,
                cohesion_mpa: 15.0,
                cohesion_softened_mpa: 3.0,
                friction_coefficient: 0.44,
                friction_softened: 0.088,
                softening_strain_start: 0.0,
                softening_strain_end: 0.5,
                stress_limiter_mpa: 150.0,
                melt: Some(MeltConfig {
                    solidus_a1: 923.0,
                    solidus_a2: -1.2e-7,
                    solidus_a3: 1.2e-16,
                    liquidus_a1: 1423.0,
                    liquidus_a2: -1.2e-7,
                    liquidus_a3: 1.6e-16,
                    viscosity_change: 1e-3,
                    fraction_low: 0.15,
                    fraction_high: 0.30,
                }),
            },
            MaterialConfig {
                name: "lower_crust".to_string(),
                layer_top_km: 20.0,
                layer_bottom_km: 30.0,
                density: 2850.0,
                reference_temp_k: 293.15,
                thermal_expansivity: 3.0e-5,
                conductivity: 2.2,
                heat_capacity: 1000.0,
                heat_production: 0.3e-6,
                rheology: "visco_plastic".to_string(),
                viscosity: 0.0,
                // Dry Maryland diabase (Mackwell et al. 1998)
                creep_prefactor: 5.0,
                creep_exponent: 4.7,
                activation_energy: 485e3,
                cohesion_mpa: 15.0,
                cohesion_softened_mpa: 3.0,
                friction_coefficient: 0.44,
                friction_softened: 0.088,
                softening_strain_start: 0.0,
                softening_strain_end: 0.5,
                stress_limiter_mpa: 150.0,
                melt: None,
            },
            MaterialConfig {
                name: "mantle_lithosphere".to_string(),
                layer_top_km: 30.0,
                layer_bottom_km: 40.0,
                density: 3300.0,
                reference_temp_k: 293.15,
                thermal_expansivity: 3.0e-5,
                conductivity: 3.0,
                heat_capacity: 1000.0,
                heat_production: 0.02e-6,
                rheology: "constant".to_string(),
                viscosity: 5e21,
                creep_prefactor: 0.0,
                creep_exponent: 1.0,
                activation_energy: 0.0,
                cohesion_mpa: 0.0,
                cohesion_softened_mpa: 0.0,
                friction_coefficient: 0.0,
                friction_softened: 0.0,
                softening_strain_start: 0.0,
                softening_strain_end: 1.0,
                stress_limiter_mpa: 0.0,
                melt: None,
            },
        ],
        phases: vec![
            PhaseConfig {
                name: "shortening".to_string(),
                convergence_velocity_cm_yr: 2.4,
                end_time_myr: Some(5.0),
                root_thickness_trigger_km: None,
                basal_flux_start_w_m2: None,
                basal_flux_end_w_m2: None,
            },
            PhaseConfig {
                name: "relaxation".to_string(),
                convergence_velocity_cm_yr: 0.0,
                end_time_myr: None,
                root_thickness_trigger_km: None,
                basal_flux_start_w_m2: None,
                basal_flux_end_w_m2: None,
            },
        ],
        phase_changes: Vec::new(),
    }
}

/// Grid, fields, and swarm with a plausible linear geotherm and lithostatic
/// pressure, for tests that need populated state without running the driver.
pub fn seeded_state(config: &SimulationConfig) -> (Grid, FieldState, PointSwarm) {
    let grid = Grid::new(
        config.domain.lx,
        config.domain.lz,
        config.domain.nx,
        config.domain.nz,
    );
    let mut swarm = PointSwarm::seed(&grid, &config.swarm, &config.materials).unwrap();
    let mut fields = FieldState::new(&grid);

    let ts = config.thermal.surface_temp_k;
    let gradient = 0.025; // K/m
    for k in 0..grid.nnz() {
        let (_, z) = grid.node_pos(0, k);
        let t = ts + gradient * grid.depth(z);
        for i in 0..grid.nnx() {
            fields.temperature[grid.node_index(i, k)] = t;
        }
    }
    swarm.resample_temperature(&grid, &fields);

    let catalog = MaterialCatalog::from_config(
        &config.materials,
        config.solver.min_viscosity,
        config.solver.max_viscosity,
        config.physics.melt_weakening_enabled,
    )
    .unwrap();
    swarm.project_to_fields(&grid, &catalog, &mut fields);
    fields.update_pressure(&grid, config.physics.gravity, &[]);
    swarm.sample_pressure(&grid, &fields);

    (grid, fields, swarm)
}
