//! End-to-end check of the initial conductive geotherm for a layered crust
//! loaded from a TOML configuration.

use granulite_sim::{Simulation, SimulationConfig};

fn layered_config() -> SimulationConfig {
    let toml = r#"
        [domain]
        lx = 200e3
        lz = 40e3
        nx = 8
        nz = 8

        [simulation]
        max_time_myr = 20.0
        max_steps = 100
        checkpoint_interval_years = 1e9

        [thermal]
        surface_temp_k = 293.15
        basal_heat_flux_w_m2 = 0.020
        initial_geotherm = "steady_state"

        [swarm]
        points_per_cell_dir = 3
        min_points_per_cell = 4
        history_every_n_steps = 1
        rng_seed = 7

        [time_stepping]
        dt_min_years = 100.0
        dt_max_years = 50e3
        cfl_target = 0.5
        diffusion_target = 5.0
        max_thermal_subcycles = 16

        [solver]
        picard_max_iterations = 50
        picard_tolerance = 1e-6
        picard_relaxation = 0.8
        max_retries = 2
        linear_max_iterations = 5000
        linear_tolerance = 1e-10
        penalty_factor = 1e5
        min_viscosity = 1e18
        max_viscosity = 1e23

        [physics]
        gravity = 9.81

        [[materials]]
        name = "upper_crust"
        layer_top_km = 0.0
        layer_bottom_km = 20.0
        density = 2700.0
        thermal_expansivity = 3.0e-5
        conductivity = 2.5
        heat_capacity = 1000.0
        heat_production = 2.0e-6
        rheology = "visco_plastic"
        creep_prefactor = 6.6e-8
        creep_exponent = 3.1
        activation_energy = 135e3
        cohesion_mpa = 15.0
        cohesion_softened_mpa = 3.0
        friction_coefficient = 0.44
        friction_softened = 0.088
        softening_strain_start = 0.0
        softening_strain_end = 0.5
        stress_limiter_mpa = 150.0

        [[materials]]
        name = "lower_crust"
        layer_top_km = 20.0
        layer_bottom_km = 30.0
        density = 2850.0
        thermal_expansivity = 3.0e-5
        conductivity = 2.2
        heat_capacity = 1000.0
        heat_production = 0.3e-6
        rheology = "visco_plastic"
        creep_prefactor = 5.0
        creep_exponent = 4.7
        activation_energy = 485e3
        cohesion_mpa = 15.0
        cohesion_softened_mpa = 3.0
        friction_coefficient = 0.44
        friction_softened = 0.088
        softening_strain_start = 0.0
        softening_strain_end = 0.5
        stress_limiter_mpa = 150.0

        [[materials]]
        name = "mantle_lithosphere"
        layer_top_km = 30.0
        layer_bottom_km = 40.0
        density = 3300.0
        thermal_expansivity = 3.0e-5
        conductivity = 3.0
        heat_capacity = 1000.0
        heat_production = 0.02e-6
        rheology = "constant"
        viscosity = 5e21

        [[phases]]
        name = "shortening"
        convergence_velocity_cm_yr = 2.4
        end_time_myr = 5.0

        [[phases]]
        name = "relaxation"
        convergence_velocity_cm_yr = 0.0
    "#;
    let config: SimulationConfig = toml::from_str(toml).expect("fixture parses");
    config.validate().expect("fixture validates");
    config
}

#[test]
fn initial_geotherm_matches_layered_conduction() {
    let config = layered_config();
    let sim = Simulation::new(config.clone()).unwrap();
    let grid = sim.grid();
    let fields = sim.fields();

    // Surface pinned at the Dirichlet value
    let profile = fields.temperature_profile(grid, grid.lx / 2.0);
    assert!((profile[0].1 - 293.15).abs() < 1e-6);

    // Strictly monotone with depth: heat flows up everywhere at steady state
    for pair in profile.windows(2) {
        assert!(
            pair[1].1 > pair[0].1,
            "temperature must increase with depth: {:?}",
            pair
        );
    }

    // Moho temperature against the piecewise-conductive analytic solution.
    // Surface flux = basal flux + integrated production; integrate T down
    // through the two crustal layers.
    //   q_s = 0.020 + 2.0e-6·20e3 + 0.3e-6·10e3 + 0.02e-6·10e3 ≈ 63.2 mW/m²
    //   T(20 km) ≈ 639 K, T(30 km) ≈ 737 K
    let moho = profile
        .iter()
        .min_by(|a, b| {
            (a.0 - 30e3)
                .abs()
                .partial_cmp(&(b.0 - 30e3).abs())
                .unwrap()
        })
        .unwrap();
    assert!(
        moho.1 > 650.0 && moho.1 < 850.0,
        "Moho temperature {:.0} K outside the conductive band",
        moho.1
    );

    // Basal temperature is hotter still but bounded (no runaway)
    let base = profile.last().unwrap();
    assert!(base.1 > moho.1 && base.1 < 1400.0);
}

#[test]
fn points_inherit_the_geotherm() {
    let config = layered_config();
    let sim = Simulation::new(config).unwrap();
    let grid = sim.grid();
    let swarm = sim.swarm();

    for p in (0..swarm.len()).step_by(17) {
        let depth = grid.depth(swarm.z[p]);
        let t = swarm.temperature[p];
        assert!(t >= 293.0, "point {} at {:.1} km has T = {}", p, depth / 1e3, t);
        // Deep points are hotter than any shallow point could be
        if depth > 35e3 {
            assert!(t > 600.0);
        }
        if depth < 2e3 {
            assert!(t < 450.0);
        }
    }
}
