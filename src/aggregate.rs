// src/aggregate.rs
//
// =============================================================================
// HMM-MD-CORE: RESULT AGGREGATOR (C9)
// =============================================================================
//
// Per pending cell update, a single owning process (by `c mod |P|` on the
// parent communicator) reads every replica's stress output, removes the
// equilibrium bias, rotates to common ground, averages over replicas, and
// persists the result. Cleans up per-job artifacts once consumed (§4.7).

use crate::catalog::ReplicaCatalog;
use crate::dispatch::{imdrun, JobDescriptor, PendingUpdate};
use crate::io;
use crate::tensor::{rotate_sym2, Sym2};
use anyhow::{Context, Result};
use std::path::Path;

/// Owning parent rank for cell index `c`, out of `world_size` parent ranks (§4.7).
pub fn owning_rank(c: usize, world_size: usize) -> usize {
    c % world_size
}

pub struct Aggregator<'a> {
    pub macrostate_loc_out: &'a str,
    pub nrepl: usize,
}

impl<'a> Aggregator<'a> {
    pub fn new(macrostate_loc_out: &'a str, nrepl: usize) -> Self {
        Aggregator { macrostate_loc_out, nrepl }
    }

    /// Aggregates one cell's `nrepl` replica stresses into a single
    /// common-ground tensor and persists it, cleaning up per-job artifacts.
    pub fn aggregate_cell(
        &self,
        c: usize,
        update: &PendingUpdate,
        catalog: &ReplicaCatalog,
        jobs: &[JobDescriptor],
    ) -> Result<Sym2> {
        let mut cg_stress = Sym2::zero();

        for r in 0..self.nrepl {
            let run = imdrun(c, self.nrepl, r);
            let job = jobs.iter().find(|j| j.imdrun == run);
            let job = match job {
                Some(j) => j,
                None => continue,
            };

            let rec = catalog
                .get(&update.material, r)
                .with_context(|| format!("no catalog record for material {} replica {}", update.material, r + 1))?;

            let mut loc_rep_stress = Sym2::zero();
            let present = io::read_tensor(&job.stress_output_path, &mut loc_rep_stress)
                .with_context(|| format!("reading replica stress {:?}", job.stress_output_path))?;

            if !present {
                log::warn!(
                    "no stress output for cell {} replica {}; contributes zero to the step mean",
                    update.cell_id,
                    job.replica
                );
                continue;
            }

            let debiased = loc_rep_stress.sub(&rec.init_stress);
            let cg_rep_stress = rotate_sym2(&debiased, &rec.rotam);
            cg_stress = cg_stress.add(&cg_rep_stress);

            self.cleanup_job(job);
        }

        Ok(cg_stress.scale(1.0 / self.nrepl as f64))
    }

    fn cleanup_job(&self, job: &JobDescriptor) {
        if let Err(e) = std::fs::remove_file(&job.stress_output_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed removing {:?}: {e}", job.stress_output_path);
            }
        }
        if let Err(e) = std::fs::remove_file(&job.strain_input_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed removing {:?}: {e}", job.strain_input_path);
            }
        }
        if let Err(e) = std::fs::remove_dir_all(&job.log_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed removing log dir {:?}: {e}", job.log_dir);
            }
        }
    }

    pub fn persist(&self, cell_id: &str, cg_stress: &Sym2) -> Result<()> {
        let path = Path::new(self.macrostate_loc_out).join(format!("last.{cell_id}.stress"));
        io::write_tensor(&path, cg_stress)
    }
}

/// Rank-4 per-step stiffness aggregation: present in the original source but
/// commented out there and left disabled, per the explicit instruction not to
/// invent behavior for a feature the source itself never enabled.
#[allow(dead_code)]
fn aggregate_stiffness_disabled(
    catalog: &ReplicaCatalog,
    update: &PendingUpdate,
    nrepl: usize,
    per_replica_stiffness: &[crate::tensor::Sym4],
) -> crate::tensor::Sym4 {
    use crate::tensor::{rotate_sym4, Sym4};

    let mut cg_stiffness = Sym4::zero();
    for (r, stiff) in per_replica_stiffness.iter().enumerate().take(nrepl) {
        if let Some(rec) = catalog.get(&update.material, r) {
            cg_stiffness = cg_stiffness.add(&rotate_sym4(stiff, &rec.rotam));
        }
    }
    cg_stiffness.scale(1.0 / nrepl as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StmdConfig;
    use crate::tensor::{Mat3, Vec3};
    use tempfile::tempdir;

    fn minimal_catalog(macro_out: &Path) -> (StmdConfig, ReplicaCatalog) {
        let cfg = StmdConfig {
            start_timestep: 0,
            md_timestep_length: 0.002,
            md_temperature: 300.0,
            md_nsteps_sample: 100,
            md_strain_rate: 1e-5,
            md_force_field: "reax".to_string(),
            nanostate_loc_in: "unused".to_string(),
            nanostate_loc_out: "unused".to_string(),
            nanostate_loc_res: "unused".to_string(),
            nanolog_loc_tmp: "unused".to_string(),
            nanolog_loc_hom: "unused".to_string(),
            macrostate_loc_out: macro_out.display().to_string(),
            md_scripts_directory: "scripts".to_string(),
            freq_checkpoint: 1,
            freq_output_homog: 1,
            batch_nnodes_min: 1,
            machine_ppn: 1,
            materials: vec!["PE".to_string()],
            common_ground_direction: [1.0, 0.0, 0.0],
            nrepl: 1,
            use_pjm_scheduler: false,
        };
        let catalog = ReplicaCatalog {
            records: vec![crate::catalog::ReplicaData {
                mat: "PE".to_string(),
                repl: 1,
                rho: 900.0,
                nflakes: 0,
                init_length: Vec3::new(10.0, 10.0, 10.0),
                init_stress: Sym2::zero(),
                init_stiff: crate::tensor::Sym4::zero(),
                rotam: Mat3::identity(),
            }],
            materials: vec!["PE".to_string()],
            nrepl: 1,
        };
        (cfg, catalog)
    }

    #[test]
    fn scenario_1_plain_aggregation() {
        let dir = tempdir().unwrap();
        let (_cfg, catalog) = minimal_catalog(dir.path());

        let update = PendingUpdate {
            cell_id: "7".to_string(),
            material: "PE".to_string(),
        };

        let stress_path = dir.path().join("stress.out");
        io::write_tensor(&stress_path, &Sym2::diag(1.0, 0.0, 0.0)).unwrap();

        let job = JobDescriptor {
            imdrun: imdrun(0, 1, 0),
            cell_id: update.cell_id.clone(),
            material: update.material.clone(),
            replica: 1,
            strain_input_path: dir.path().join("strain.in"),
            stress_output_path: stress_path,
            log_dir: dir.path().join("logdir"),
            args: vec![],
            owner_batch: 0,
        };
        std::fs::create_dir_all(&job.log_dir).unwrap();

        let agg = Aggregator::new("unused", 1);
        let result = agg.aggregate_cell(0, &update, &catalog, &[job]).unwrap();
        assert_eq!(result, Sym2::diag(1.0, 0.0, 0.0));
    }

    #[test]
    fn scenario_2_bias_removal() {
        let dir = tempdir().unwrap();
        let catalog = ReplicaCatalog {
            records: vec![crate::catalog::ReplicaData {
                mat: "PE".to_string(),
                repl: 1,
                rho: 900.0,
                nflakes: 0,
                init_length: Vec3::new(10.0, 10.0, 10.0),
                init_stress: Sym2::diag(0.5, 0.0, 0.0),
                init_stiff: crate::tensor::Sym4::zero(),
                rotam: Mat3::identity(),
            }],
            materials: vec!["PE".to_string()],
            nrepl: 1,
        };

        let update = PendingUpdate {
            cell_id: "7".to_string(),
            material: "PE".to_string(),
        };

        let stress_path = dir.path().join("stress.out");
        io::write_tensor(&stress_path, &Sym2::diag(1.5, 0.0, 0.0)).unwrap();

        let job = JobDescriptor {
            imdrun: imdrun(0, 1, 0),
            cell_id: update.cell_id.clone(),
            material: update.material.clone(),
            replica: 1,
            strain_input_path: dir.path().join("strain.in"),
            stress_output_path: stress_path,
            log_dir: dir.path().join("logdir"),
            args: vec![],
            owner_batch: 0,
        };
        std::fs::create_dir_all(&job.log_dir).unwrap();

        let agg = Aggregator::new("unused", 1);
        let result = agg.aggregate_cell(0, &update, &catalog, &[job]).unwrap();
        assert_eq!(result, Sym2::diag(1.0, 0.0, 0.0));
    }

    #[test]
    fn missing_stress_output_contributes_zero() {
        let dir = tempdir().unwrap();
        let (_cfg, catalog) = minimal_catalog(dir.path());

        let update = PendingUpdate {
            cell_id: "7".to_string(),
            material: "PE".to_string(),
        };

        let job = JobDescriptor {
            imdrun: imdrun(0, 1, 0),
            cell_id: update.cell_id.clone(),
            material: update.material.clone(),
            replica: 1,
            strain_input_path: dir.path().join("strain.in"),
            stress_output_path: dir.path().join("never-written.stress"),
            log_dir: dir.path().join("logdir"),
            args: vec![],
            owner_batch: 0,
        };

        let agg = Aggregator::new("unused", 1);
        let result = agg.aggregate_cell(0, &update, &catalog, &[job]).unwrap();
        assert_eq!(result, Sym2::zero());
    }

    #[test]
    fn owning_rank_is_cell_index_modulo_world_size() {
        assert_eq!(owning_rank(0, 4), 0);
        assert_eq!(owning_rank(5, 4), 1);
    }
}
