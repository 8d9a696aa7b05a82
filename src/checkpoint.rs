//! Checkpointing
//!
//! A checkpoint is one self-contained JSON document holding everything the
//! driver needs to resume: step counters, the active phase, the grid, the
//! field state, and the full swarm including P-T-t histories. Loading always
//! re-validates against the live configuration; a checkpoint from a
//! different domain or material catalog is rejected rather than silently
//! resumed.

use crate::config::SimulationConfig;
use crate::error::{Result, SimulationError};
use crate::fields::FieldState;
use crate::grid::Grid;
use crate::swarm::PointSwarm;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Bumped whenever the on-disk layout changes incompatibly
const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub step: usize,
    pub time_myr: f64,
    /// Active phase and when it started, restoring the schedule position
    pub phase_index: usize,
    pub phase_start_myr: f64,
    pub schedule_exhausted: bool,
    pub material_count: usize,
    pub grid: Grid,
    pub fields: FieldState,
    pub swarm: PointSwarm,
}

impl Checkpoint {
    pub fn new(
        step: usize,
        time_myr: f64,
        phase_index: usize,
        phase_start_myr: f64,
        schedule_exhausted: bool,
        material_count: usize,
        grid: &Grid,
        fields: &FieldState,
        swarm: &PointSwarm,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            step,
            time_myr,
            phase_index,
            phase_start_myr,
            schedule_exhausted,
            material_count,
            grid: grid.clone(),
            fields: fields.clone(),
            swarm: swarm.clone(),
        }
    }

    /// Write to `<dir>/checkpoint_<step>.json`, creating the directory if
    /// needed, and return the path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| {
            SimulationError::checkpoint(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(format!("checkpoint_{:08}.json", self.step));
        let json = serde_json::to_string(self)
            .map_err(|e| SimulationError::checkpoint(format!("serialization failed: {}", e)))?;
        fs::write(&path, json).map_err(|e| {
            SimulationError::checkpoint(format!("cannot write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    /// Read and self-validate a checkpoint against the live configuration.
    pub fn load(path: &Path, config: &SimulationConfig) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            SimulationError::checkpoint(format!("cannot read {}: {}", path.display(), e))
        })?;
        let checkpoint: Checkpoint = serde_json::from_str(&json)
            .map_err(|e| SimulationError::checkpoint(format!("parse failed: {}", e)))?;
        checkpoint.validate(config)?;
        Ok(checkpoint)
    }

    /// Consistency checks: version, grid/configuration agreement, array
    /// shape invariants, and material-id range.
    pub fn validate(&self, config: &SimulationConfig) -> Result<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(SimulationError::checkpoint(format!(
                "version {} unsupported (expected {})",
                self.version, CHECKPOINT_VERSION
            )));
        }
        if self.grid.nx != config.domain.nx
            || self.grid.nz != config.domain.nz
            || self.grid.lx != config.domain.lx
            || self.grid.lz != config.domain.lz
        {
            return Err(SimulationError::checkpoint(
                "grid does not match the configured domain",
            ));
        }
        if self.material_count != config.materials.len() {
            return Err(SimulationError::checkpoint(format!(
                "material count {} does not match configuration ({})",
                self.material_count,
                config.materials.len()
            )));
        }
        if self.phase_index >= config.phases.len() {
            return Err(SimulationError::checkpoint("phase index out of range"));
        }

        let nn = self.grid.num_nodes();
        let nc = self.grid.num_cells();
        if self.fields.temperature.len() != nn
            || self.fields.vx.len() != nn
            || self.fields.vz.len() != nn
            || self.fields.viscosity.len() != nc
            || self.fields.pressure.len() != nc
        {
            return Err(SimulationError::checkpoint("field array shape mismatch"));
        }

        let n = self.swarm.len();
        if self.swarm.z.len() != n
            || self.swarm.material_id.len() != n
            || self.swarm.plastic_strain.len() != n
            || self.swarm.temperature.len() != n
            || self.swarm.pressure.len() != n
            || self.swarm.histories.len() != n
        {
            return Err(SimulationError::checkpoint("swarm array shape mismatch"));
        }
        let max_id = self.material_count as u32;
        if self.swarm.material_id.iter().any(|&id| id >= max_id) {
            return Err(SimulationError::checkpoint(
                "swarm carries a material id outside the catalog",
            ));
        }
        if self
            .fields
            .temperature
            .iter()
            .any(|t| !t.is_finite() || *t <= 0.0)
        {
            return Err(SimulationError::checkpoint(
                "temperature field contains non-physical values",
            ));
        }
        Ok(())
    }
}
