//! # granulite_sim
//!
//! Two-dimensional thermo-mechanical simulation of crustal thermal and
//! mechanical evolution across an orogenic cycle: visco-plastic Stokes flow
//! with a penalty formulation, implicit heat transport with radiogenic
//! production and basal flux forcing, and a Lagrangian material-point swarm
//! that carries material identity, plastic strain, and pressure-temperature-
//! time histories through the deforming crust.
//!
//! The driver walks an ordered phase schedule (shortening, stationary
//! relaxation, extensional collapse); each phase imposes side velocities and
//! optionally ramps the basal heat flux, and ends on an elapsed-time or
//! crustal-root-thickness trigger.

pub mod bc;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fields;
pub mod grid;
pub mod linalg;
pub mod rheology;
pub mod simulation;
pub mod stokes;
pub mod swarm;
pub mod thermal;
pub mod timestepping;
pub mod utils;

#[cfg(test)]
pub mod test_support;

pub use bc::{PhaseSchedule, PhaseTransition, PhaseTrigger};
pub use checkpoint::Checkpoint;
pub use config::SimulationConfig;
pub use error::{Result, SimulationError};
pub use fields::FieldState;
pub use grid::Grid;
pub use rheology::{Material, MaterialCatalog, RheologyLaw};
pub use simulation::{RunOutcome, RunSummary, Simulation, StepReport};
pub use stokes::{StokesBc, StokesSolver};
pub use swarm::{PhaseChangeRule, PointSwarm, PttSample};
pub use thermal::ThermalSolver;
pub use timestepping::AdaptiveTimestep;
