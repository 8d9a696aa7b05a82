/// Driver: full orogenic cycle (shortening → relaxation → collapse)
///
use granulite_sim::{Simulation, SimulationConfig};
use std::time::Instant;

fn main() {
    println!("═══════════════════════════════════════════════════════════════");
    println!("  Crustal Thermal Evolution: Orogenic Cycle");
    println!("═══════════════════════════════════════════════════════════════\n");

    let args: Vec<String> = std::env::args().collect();
    let config_path = if args.len() > 1 {
        args[1].as_str()
    } else {
        "inputs/orogen_cycle/config.toml"
    };

    let config = SimulationConfig::from_file(config_path).unwrap_or_else(|e| {
        eprintln!("ERROR loading config: {}", e);
        std::process::exit(1);
    });

    // Optional resume from a checkpoint given as the second argument
    let mut sim = if args.len() > 2 {
        println!("Resuming from checkpoint {}\n", args[2]);
        Simulation::resume(config, std::path::Path::new(&args[2]))
    } else {
        Simulation::new(config)
    }
    .unwrap_or_else(|e| {
        eprintln!("ERROR initializing simulation: {}", e);
        std::process::exit(1);
    });

    let start = Instant::now();
    match sim.run() {
        Ok(summary) => {
            println!(
                "\nWall time: {:.1} s for {} steps ({:?})",
                start.elapsed().as_secs_f64(),
                summary.steps,
                summary.outcome
            );
            println!(
                "Checkpoints written: {} | points discarded: {}",
                summary.checkpoints_written, summary.discarded_points
            );
        }
        Err(e) => {
            eprintln!("\nRUN FAILED: {}", e);
            std::process::exit(1);
        }
    }
}
