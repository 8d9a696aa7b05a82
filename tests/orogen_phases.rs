//! Phase-schedule behavior over a short end-to-end run: a shortening phase
//! that hands over to stationary relaxation, and checkpoint/resume across
//! the transition.

use granulite_sim::{PhaseTrigger, Simulation, SimulationConfig};

fn short_run_config(checkpoint_dir: &str) -> SimulationConfig {
    let toml = format!(
        r#"
        [domain]
        lx = 100e3
        lz = 40e3
        nx = 6
        nz = 6

        [simulation]
        max_time_myr = 1.0
        max_steps = 50
        checkpoint_interval_years = 50e3
        checkpoint_dir = "{checkpoint_dir}"

        [thermal]
        surface_temp_k = 293.15
        basal_heat_flux_w_m2 = 0.020
        initial_geotherm = "steady_state"

        [swarm]
        points_per_cell_dir = 3
        min_points_per_cell = 4
        history_every_n_steps = 1
        rng_seed = 11

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
        name = "crust"
        layer_top_km = 0.0
        layer_bottom_km = 30.0
        density = 2700.0
        thermal_expansivity = 3.0e-5
        conductivity = 2.5
        heat_capacity = 1000.0
        heat_production = 1.0e-6
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
        end_time_myr = 0.1

        [[phases]]
        name = "relaxation"
        convergence_velocity_cm_yr = 0.0
    "#
    );
    let config: SimulationConfig = toml::from_str(&toml).expect("fixture parses");
    config.validate().expect("fixture validates");
    config
}

#[test]
fn transition_fires_once_and_switches_velocity() {
    let config = short_run_config("");
    let mut sim = Simulation::new(config).unwrap();

    assert_eq!(sim.schedule().current_phase().name, "shortening");
    assert!(sim.schedule().side_velocity() > 0.0);

    let mut transitions = Vec::new();
    // 0.1 Myr of shortening at dt_max = 50 kyr is two steps
    for _ in 0..6 {
        let report = sim.step().unwrap();
        if let Some(t) = report.phase_transition {
            transitions.push(t);
        }
    }

    assert_eq!(transitions.len(), 1, "exactly one transition event");
    let transition = &transitions[0];
    assert_eq!(transition.from, "shortening");
    assert_eq!(transition.to.as_deref(), Some("relaxation"));
    assert_eq!(transition.trigger, PhaseTrigger::ElapsedTime);
    assert!(transition.time_myr >= 0.1);

    // The relaxation phase is stationary
    assert_eq!(sim.schedule().current_phase().name, "relaxation");
    assert_eq!(sim.schedule().side_velocity(), 0.0);
}

#[test]
fn histories_accumulate_through_both_phases() {
    let config = short_run_config("");
    let mut sim = Simulation::new(config).unwrap();
    for _ in 0..4 {
        sim.step().unwrap();
    }

    let swarm = sim.swarm();
    // History cadence is every step, plus the seeding sample; repopulated
    // points may have fewer entries but never more
    let max_len = swarm.histories.iter().map(Vec::len).max().unwrap();
    assert_eq!(max_len, 5);
    for history in &swarm.histories {
        // Times strictly increase along every path
        for pair in history.windows(2) {
            assert!(pair[1].time_myr > pair[0].time_myr);
        }
        // Pressures stay physical (no negative totals at depth)
        for sample in history {
            assert!(sample.pressure >= 0.0 || sample.pressure.abs() < 1e7);
            assert!(sample.temperature > 0.0);
        }
    }
}

#[test]
fn resume_reproduces_the_uninterrupted_trajectory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = short_run_config(dir.path().to_str().unwrap());
    // Keep the transition time off the step lattice so a least-significant-
    // bit difference in the restored clock cannot flip a trigger comparison
    config.phases[0].end_time_myr = Some(0.12);

    // Uninterrupted reference run; the cadence writes checkpoints on the way
    let mut reference = Simulation::new(config.clone()).unwrap();
    for _ in 0..4 {
        reference.step().unwrap();
    }

    // Resume from the earliest checkpoint and catch up
    let mut paths: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    paths.sort();
    let first = paths.first().expect("cadence wrote a checkpoint").clone();

    let mut resumed = Simulation::resume(config, &first).unwrap();
    assert!(resumed.step_index() < reference.step_index());
    while resumed.step_index() < reference.step_index() {
        resumed.step().unwrap();
    }

    assert!((resumed.time_myr() - reference.time_myr()).abs() < 1e-9);

    // The resumed trajectory must match the uninterrupted one: same grid
    // fields, same swarm, point for point
    let (fa, fb) = (reference.fields(), resumed.fields());
    for (a, b) in fa.temperature.iter().zip(&fb.temperature) {
        approx::assert_relative_eq!(a, b, max_relative = 1e-9);
    }
    for (a, b) in fa.vx.iter().zip(&fb.vx).chain(fa.vz.iter().zip(&fb.vz)) {
        assert!((a - b).abs() < 1e-18, "velocity drift {a:e} vs {b:e}");
    }

    let (sa, sb) = (reference.swarm(), resumed.swarm());
    assert_eq!(sa.len(), sb.len());
    assert_eq!(sa.material_id, sb.material_id);
    for (a, b) in sa.x.iter().zip(&sb.x).chain(sa.z.iter().zip(&sb.z)) {
        assert!((a - b).abs() < 1e-6, "position drift {a} vs {b}");
    }
    for (a, b) in sa.temperature.iter().zip(&sb.temperature) {
        approx::assert_relative_eq!(a, b, max_relative = 1e-9);
    }
    for (ha, hb) in sa.histories.iter().zip(&sb.histories) {
        assert_eq!(ha.len(), hb.len());
    }
}

#[test]
fn checkpoint_resume_continues_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = short_run_config(dir.path().to_str().unwrap());
    let mut sim = Simulation::new(config.clone()).unwrap();

    // Step past the first checkpoint cadence tick (50 kyr)
    let mut checkpoint_path = None;
    for _ in 0..3 {
        sim.step().unwrap();
        let candidate = dir
            .path()
            .join(format!("checkpoint_{:08}.json", sim.step_index()));
        if candidate.exists() {
            checkpoint_path = Some(candidate);
        }
    }
    let path = checkpoint_path.expect("cadence wrote a checkpoint");

    let mut resumed = Simulation::resume(config, &path).unwrap();
    let steps_before = resumed.step_index();
    let time_before = resumed.time_myr();
    let report = resumed.step().unwrap();
    assert_eq!(report.step, steps_before + 1);
    assert!(report.time_myr > time_before);
}
