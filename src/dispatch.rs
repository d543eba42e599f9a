// src/dispatch.rs
//
// =============================================================================
// HMM-MD-CORE: DISPATCH PLANNER (C6)
// =============================================================================
//
// Reads the pending-update manifest, builds one `JobDescriptor` per
// (cell, replica) pair, determines which batch owns each job, and — on the
// batch root only — rotates and scales the strain into the replica frame and
// writes it to disk. Per-step scratch state (§9 "mutable globals") lives in
// `DispatchPlan` and is rebuilt fresh every step rather than accumulated.

use crate::catalog::ReplicaCatalog;
use crate::config::StmdConfig;
use crate::io;
use crate::tensor::Sym2;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// One macro-step's worth of pending quadrature-point updates, read from the
/// parallel `last.qpupdates` / `last.matqpupdates` files.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub cell_id: String,
    pub material: String,
}

pub fn read_pending_updates(cfg: &StmdConfig) -> Result<Vec<PendingUpdate>> {
    let base = Path::new(&cfg.macrostate_loc_out);
    let cells_path = base.join("last.qpupdates");
    let mats_path = base.join("last.matqpupdates");

    if !cells_path.exists() {
        log::warn!("unable to open {:?} to read it", cells_path);
        return Ok(Vec::new());
    }

    let cells_text = fs::read_to_string(&cells_path).with_context(|| format!("reading {:?}", cells_path))?;
    let cell_ids: Vec<&str> = cells_text.lines().collect();

    let mats_text = fs::read_to_string(&mats_path).with_context(|| format!("reading {:?}", mats_path))?;
    let materials: Vec<&str> = mats_text.lines().collect();

    let ncupd = cell_ids.len();
    let mut updates = Vec::with_capacity(ncupd);
    for i in 0..ncupd {
        updates.push(PendingUpdate {
            cell_id: cell_ids[i].to_string(),
            material: materials.get(i).copied().unwrap_or_default().to_string(),
        });
    }
    Ok(updates)
}

/// One MD invocation for a `(cell, replica)` pair.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub imdrun: usize,
    pub cell_id: String,
    pub material: String,
    pub replica: usize,
    pub strain_input_path: PathBuf,
    pub stress_output_path: PathBuf,
    pub log_dir: PathBuf,
    pub args: Vec<String>,
    /// Batch color that owns execution of this job (`imdrun mod n_md_batches`).
    /// Paths are deterministic functions of `(time_id, cell_id, replica)`, so
    /// the full job list — not just the locally-owned subset — is kept on
    /// every rank: the aggregator (run on the parent communicator) needs every
    /// replica's path for a cell regardless of which batch executed it.
    pub owner_batch: usize,
}

/// Dense index assigning a deterministic batch via `imdrun mod n_md_batches` (§4.5).
pub fn imdrun(cell_index: usize, nrepl: usize, replica_index: usize) -> usize {
    cell_index * nrepl + replica_index
}

pub fn owning_batch(imdrun: usize, n_md_batches: usize) -> usize {
    imdrun % n_md_batches
}

/// Rotates a common-ground strain into the replica frame and scales it into a
/// length-variation quantity (§4.5 step 3): diagonal components are scaled by
/// their own axis, off-diagonal `(i, (i+1) mod d)` by `init_length[(i+2) mod d]`.
pub fn rotate_and_scale_strain(cg_strain: &Sym2, rotam_transpose: &crate::tensor::Mat3, init_length: &crate::tensor::Vec3) -> Sym2 {
    use crate::tensor::rotate_sym2;

    let mut rep_strain = rotate_sym2(cg_strain, rotam_transpose);
    const DIM: usize = crate::tensor::DIM;

    for i in 0..DIM {
        let scaled_diag = rep_strain.get(i, i) * init_length.get(i);
        rep_strain.set(i, i, scaled_diag);

        let j = (i + 1) % DIM;
        let companion = (i + 2) % DIM;
        let scaled_off = rep_strain.get(i, j) * init_length.get(companion);
        rep_strain.set(i, j, scaled_off);
    }

    rep_strain
}

/// Per-step dispatch state. Rebuilt at the start of every macro step — these
/// are per-step scratch vectors, not configuration (§9).
pub struct DispatchPlan {
    pub updates: Vec<PendingUpdate>,
    pub jobs: Vec<JobDescriptor>,
}

impl DispatchPlan {
    /// Jobs owned by this process's batch — the subset to actually execute.
    pub fn owned_jobs(&self, batch_color: usize) -> impl Iterator<Item = &JobDescriptor> {
        self.jobs.iter().filter(move |j| j.owner_batch == batch_color)
    }
}

impl DispatchPlan {
    /// Builds the job list for this step and, on `is_batch_root`, writes the
    /// per-replica strain input files and creates the per-job log directories
    /// for jobs owned by `batch_color`.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        cfg: &StmdConfig,
        catalog: &ReplicaCatalog,
        updates: Vec<PendingUpdate>,
        time_id: &str,
        n_md_batches: usize,
        batch_color: usize,
        is_batch_root: bool,
        output_homog: bool,
        checkpoint_save: bool,
    ) -> Result<Self> {
        let macro_base = Path::new(&cfg.macrostate_loc_out);
        let mut jobs = Vec::with_capacity(updates.len() * cfg.nrepl);

        for (c, update) in updates.iter().enumerate() {
            for r in 0..cfg.nrepl {
                let numrepl = r + 1;
                let run = imdrun(c, cfg.nrepl, r);
                let owner = owning_batch(run, n_md_batches);

                let strain_input_path =
                    macro_base.join(format!("last.{}.{}.upstrain", update.cell_id, numrepl));
                let stress_output_path =
                    macro_base.join(format!("last.{}.{}.stress", update.cell_id, numrepl));
                let log_dir = Path::new(&cfg.nanolog_loc_tmp).join(format!(
                    "{}.{}.{}_{}",
                    time_id, update.cell_id, update.material, numrepl
                ));

                let owned_here = owner == batch_color;

                if owned_here && is_batch_root {
                    let rec = catalog.get(&update.material, r).with_context(|| {
                        format!("no catalog record for material {} replica {}", update.material, numrepl)
                    })?;

                    let upstrain_path = macro_base.join(format!("last.{}.upstrain", update.cell_id));
                    let mut cg_strain = Sym2::zero();
                    io::read_tensor(&upstrain_path, &mut cg_strain)
                        .with_context(|| format!("reading cell strain {:?}", upstrain_path))?;

                    let rep_strain = rotate_and_scale_strain(&cg_strain, &rec.rotam.transpose(), &rec.init_length);
                    io::write_tensor(&strain_input_path, &rep_strain)
                        .with_context(|| format!("writing replica strain {:?}", strain_input_path))?;

                    fs::create_dir_all(&log_dir).with_context(|| format!("creating {:?}", log_dir))?;
                }

                // Non-owned jobs still get a descriptor (deterministic paths the
                // aggregator needs) but no argument vector, since this process
                // never executes them.
                let args = if owned_here {
                    vec![
                        update.cell_id.clone(),
                        time_id.to_string(),
                        update.material.clone(),
                        cfg.nanostate_loc_out.clone(),
                        cfg.nanostate_loc_res.clone(),
                        cfg.nanolog_loc_hom.clone(),
                        log_dir.display().to_string(),
                        cfg.md_scripts_directory.clone(),
                        strain_input_path.display().to_string(),
                        stress_output_path.display().to_string(),
                        numrepl.to_string(),
                        cfg.md_timestep_length.to_string(),
                        cfg.md_temperature.to_string(),
                        cfg.md_nsteps_sample.to_string(),
                        cfg.md_strain_rate.to_string(),
                        cfg.md_force_field.clone(),
                        (output_homog as u8).to_string(),
                        (checkpoint_save as u8).to_string(),
                    ]
                } else {
                    Vec::new()
                };

                jobs.push(JobDescriptor {
                    imdrun: run,
                    cell_id: update.cell_id.clone(),
                    material: update.material.clone(),
                    replica: numrepl,
                    strain_input_path,
                    stress_output_path,
                    log_dir,
                    args,
                    owner_batch: owner,
                });
            }
        }

        Ok(DispatchPlan { updates, jobs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imdrun_is_dense_cell_major_replica_minor() {
        assert_eq!(imdrun(0, 3, 0), 0);
        assert_eq!(imdrun(0, 3, 2), 2);
        assert_eq!(imdrun(1, 3, 0), 3);
        assert_eq!(imdrun(2, 3, 1), 7);
    }

    #[test]
    fn owning_batch_is_unique_per_run_within_a_cycle() {
        let n_md_batches = 4;
        for run in 0..4 {
            let owners: Vec<usize> = (0..n_md_batches)
                .filter(|&color| owning_batch(run, n_md_batches) == color)
                .collect();
            assert_eq!(owners.len(), 1);
        }
    }

    #[test]
    fn rotate_and_scale_strain_is_identity_when_unrotated_and_unit_length() {
        use crate::tensor::{Mat3, Vec3};
        let strain = Sym2::diag(0.01, 0.0, 0.0);
        let id = Mat3::identity();
        let unit_length = Vec3::new(1.0, 1.0, 1.0);
        let scaled = rotate_and_scale_strain(&strain, &id, &unit_length);
        assert_eq!(scaled, strain);
    }

    #[test]
    fn rotate_and_scale_strain_scales_diagonal_by_own_axis() {
        use crate::tensor::{Mat3, Vec3};
        let strain = Sym2::diag(0.01, 0.02, 0.03);
        let id = Mat3::identity();
        let lengths = Vec3::new(10.0, 20.0, 30.0);
        let scaled = rotate_and_scale_strain(&strain, &id, &lengths);
        assert!((scaled.get(0, 0) - 0.1).abs() < 1e-12);
        assert!((scaled.get(1, 1) - 0.4).abs() < 1e-12);
        assert!((scaled.get(2, 2) - 0.9).abs() < 1e-12);
    }
}
