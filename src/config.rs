// src/config.rs
//
// =============================================================================
// HMM-MD-CORE: INITIALIZATION PARAMETERS (C0)
// =============================================================================
//
// One struct, loaded once from a YAML file, carrying every initialization
// parameter supplied once by the FE collaborator. A single top-level config
// type parsed with `serde` rather than scattered globals.

use crate::tensor::Vec3;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmdConfig {
    pub start_timestep: i32,

    pub md_timestep_length: f64,
    pub md_temperature: f64,
    pub md_nsteps_sample: i32,
    pub md_strain_rate: f64,
    pub md_force_field: String,

    /// Nanoscale input location (replica catalog source).
    pub nanostate_loc_in: String,
    /// Nanoscale output location (per-step job artifacts).
    pub nanostate_loc_out: String,
    /// Nanoscale restart location.
    pub nanostate_loc_res: String,
    /// Per-job temporary log directory.
    pub nanolog_loc_tmp: String,
    /// Homogenization trajectory log directory.
    pub nanolog_loc_hom: String,
    /// Macroscale state exchange location (pending-update manifest + results).
    pub macrostate_loc_out: String,

    pub md_scripts_directory: String,

    pub freq_checkpoint: i32,
    pub freq_output_homog: i32,

    pub batch_nnodes_min: usize,
    pub machine_ppn: usize,

    pub materials: Vec<String>,
    pub common_ground_direction: [f64; 3],
    pub nrepl: usize,

    pub use_pjm_scheduler: bool,
}

impl StmdConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let cfg: StmdConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {:?}", path))?;
        Ok(cfg)
    }

    pub fn cg_dir(&self) -> Vec3 {
        Vec3::new(
            self.common_ground_direction[0],
            self.common_ground_direction[1],
            self.common_ground_direction[2],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_minimal_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stmd.yaml");
        fs::write(
            &path,
            r#"
start_timestep: 0
md_timestep_length: 0.002
md_temperature: 300.0
md_nsteps_sample: 1000
md_strain_rate: 1.0e-5
md_force_field: reax
nanostate_loc_in: nanoIn
nanostate_loc_out: nanoOut
nanostate_loc_res: nanoRes
nanolog_loc_tmp: nanoLogTmp
nanolog_loc_hom: nanoLogHom
macrostate_loc_out: macroOut
md_scripts_directory: scripts
freq_checkpoint: 1
freq_output_homog: 1
batch_nnodes_min: 1
machine_ppn: 1
materials: [PE]
common_ground_direction: [1.0, 0.0, 0.0]
nrepl: 2
use_pjm_scheduler: false
"#,
        )
        .unwrap();

        let cfg = StmdConfig::load(&path).unwrap();
        assert_eq!(cfg.materials, vec!["PE".to_string()]);
        assert_eq!(cfg.nrepl, 2);
        assert_eq!(cfg.cg_dir(), Vec3::new(1.0, 0.0, 0.0));
    }
}
