//! Boundary-condition schedule
//!
//! A run is an ordered sequence of tectonic phases (shortening, stationary
//! relaxation, extension, ...). Each phase imposes a side convergence
//! velocity and optionally ramps the basal heat flux; it ends at whichever
//! of its configured triggers fires first, elapsed phase time or crustal
//! root thickness. Phase transitions are first-class events: the driver
//! logs them and they mark the boundary between the burial and thermal
//! relaxation stages of a P-T-t path.

use crate::config::{PhaseConfig, SimulationConfig};
use crate::utils::units::cm_per_year_to_m_per_s;

/// Emitted when the active phase hands over to the next one, or when the
/// final phase's trigger fires (`to` is then None and the run should stop).
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTransition {
    pub from: String,
    pub to: Option<String>,
    pub time_myr: f64,
    /// Which trigger fired
    pub trigger: PhaseTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTrigger {
    ElapsedTime,
    RootThickness,
}

/// Tracks the active phase and answers boundary-condition queries.
#[derive(Debug, Clone)]
pub struct PhaseSchedule {
    phases: Vec<PhaseConfig>,
    current: usize,
    phase_start_myr: f64,
    /// Fallback flux when the active phase has no ramp
    default_basal_flux: f64,
    /// Ramp window for trigger-terminated phases without an end time
    fallback_window_myr: f64,
    exhausted: bool,
}

impl PhaseSchedule {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            phases: config.phases.clone(),
            current: 0,
            phase_start_myr: 0.0,
            default_basal_flux: config.thermal.basal_heat_flux_w_m2,
            fallback_window_myr: config.simulation.max_time_myr,
            exhausted: false,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_phase(&self) -> &PhaseConfig {
        &self.phases[self.current]
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn phase_start_myr(&self) -> f64 {
        self.phase_start_myr
    }

    /// Restore schedule position from a checkpoint
    pub fn restore(&mut self, index: usize, phase_start_myr: f64, exhausted: bool) {
        self.current = index.min(self.phases.len() - 1);
        self.phase_start_myr = phase_start_myr;
        self.exhausted = exhausted;
    }

    /// Velocity applied at each side wall (m/s, positive = inward).
    /// The configured value is the total convergence rate, split evenly.
    pub fn side_velocity(&self) -> f64 {
        cm_per_year_to_m_per_s(self.current_phase().convergence_velocity_cm_yr) / 2.0
    }

    /// Basal heat flux at the given model time, linearly ramped across the
    /// active phase when the phase configures a ramp.
    pub fn basal_flux(&self, time_myr: f64) -> f64 {
        let phase = self.current_phase();
        match (phase.basal_flux_start_w_m2, phase.basal_flux_end_w_m2) {
            (Some(start), Some(end)) => {
                let window = phase
                    .end_time_myr
                    .unwrap_or(self.fallback_window_myr - self.phase_start_myr);
                if window <= 0.0 {
                    return end;
                }
                let frac = ((time_myr - self.phase_start_myr) / window).clamp(0.0, 1.0);
                start + (end - start) * frac
            }
            _ => self.default_basal_flux,
        }
    }

    /// Evaluate the active phase's end triggers; advances to the next phase
    /// and reports the transition when one fires. The first trigger met wins.
    /// After the final phase's trigger the schedule is exhausted and no
    /// further events are emitted.
    pub fn check(&mut self, time_myr: f64, root_depth_km: f64) -> Option<PhaseTransition> {
        if self.exhausted {
            return None;
        }
        let phase = self.current_phase();

        let trigger = if phase
            .end_time_myr
            .is_some_and(|end| time_myr - self.phase_start_myr >= end)
        {
            Some(PhaseTrigger::ElapsedTime)
        } else if phase
            .root_thickness_trigger_km
            .is_some_and(|thresh| root_depth_km >= thresh)
        {
            Some(PhaseTrigger::RootThickness)
        } else {
            None
        };
        let trigger = trigger?;

        let from = phase.name.clone();
        let to = if self.current + 1 < self.phases.len() {
            self.current += 1;
            self.phase_start_myr = time_myr;
            Some(self.current_phase().name.clone())
        } else {
            self.exhausted = true;
            None
        };

        Some(PhaseTransition {
            from,
            to,
            time_myr,
            trigger,
        })
    }
}
