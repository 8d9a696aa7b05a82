//! Error taxonomy for the simulation driver
//!
//! Fatal errors carry the step and model time at which they occurred plus
//! the last successfully written checkpoint step, so a halted run can be
//! diagnosed and resumed. Out-of-domain point discards are deliberately
//! NOT an error: they are aggregated as diagnostic counters on the swarm.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    /// Ill-posed or inconsistent configuration, detected before stepping.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Stokes solve failed to converge after the bounded retry schedule.
    #[error(
        "Stokes solve failed to converge at step {step} (t = {time_myr:.3} Myr) \
         after {attempts} Picard attempts (residual {residual:.3e}); \
         last checkpoint at step {last_checkpoint_step}"
    )]
    Convergence {
        step: usize,
        time_myr: f64,
        attempts: usize,
        residual: f64,
        last_checkpoint_step: usize,
    },

    /// Heat solve could not be stabilized even with sub-cycling.
    #[error(
        "thermal stability violation at step {step} (t = {time_myr:.3} Myr): \
         advective CFL {cfl:.2} needs {required_subcycles} sub-cycles (cap {max_subcycles})"
    )]
    Stability {
        step: usize,
        time_myr: f64,
        cfl: f64,
        required_subcycles: usize,
        max_subcycles: usize,
    },

    /// Checkpoint could not be written, read, or failed self-validation.
    #[error("checkpoint error: {reason}")]
    Checkpoint { reason: String },
}

impl SimulationError {
    pub fn config<S: Into<String>>(reason: S) -> Self {
        SimulationError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn checkpoint<S: Into<String>>(reason: S) -> Self {
        SimulationError::Checkpoint {
            reason: reason.into(),
        }
    }

    /// Fatal errors halt the run; stability violations are retried by the
    /// time stepper before being escalated.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SimulationError::Stability { .. })
    }
}

pub type Result<T> = std::result::Result<T, SimulationError>;
