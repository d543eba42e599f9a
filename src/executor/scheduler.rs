// src/executor/scheduler.rs
//
// =============================================================================
// HMM-MD-CORE: EXTERNAL-SCHEDULER EXECUTOR (C8)
// =============================================================================
//
// Parent-rank-0 only: emit one manifest entry per job (JSON, preferred) plus
// a compatibility-fallback shell-invocation file per job, call an external
// optimizer script that returns either "no work" or a node allocation, then
// hand off a single pilot-job manifest and wait for completion. A non-zero
// exit from the pilot-job manager is logged, not fatal — the aggregator
// detects missing stress outputs downstream (§4.6, §7).

use crate::dispatch::JobDescriptor;
use crate::error::CatalogError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Outer Slurm/OpenMPI rank-context variables to unset before spawning the
/// optimizer or pilot-job manager: both scripts may themselves launch a
/// nested `mpirun`, which must form its own fresh communicator from the
/// allocation it's handed rather than inherit this rank's identity.
/// Mirrors the teacher's `drivers/external.rs` scrub list.
const SCRUB_VARS: &[&str] = &[
    "OMPI_COMM_WORLD_RANK",
    "OMPI_COMM_WORLD_SIZE",
    "PMIX_RANK",
    "PMIX_SERVER_URI",
    "PMIX_NAMESPACE",
    "SLURM_JOBID",
    "SLURM_PROCID",
    "SLURM_STEPID",
    "SLURM_GTIDS",
    "HYDRA_RANK",
    "MPI_LOCALRANKID",
];

fn scrub_mpi_env(cmd: &mut Command) {
    for var in SCRUB_VARS {
        cmd.env_remove(var);
    }
}

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    cell_id: &'a str,
    material: &'a str,
    replica: usize,
    args: &'a [String],
}

/// Optimizer verdict, mirroring `generate_job_list`'s `(empty_list, total_node_allocation)`
/// output pair from the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerVerdict {
    EmptyJobList,
    Allocate { total_node_allocation: u32 },
}

/// Parses the single integer the optimizer script prints to stdout:
/// `0` = empty job list, `>0` = total node allocation, `<0` = fatal.
pub fn parse_optimizer_output(raw: &str) -> Result<OptimizerVerdict> {
    let value: i64 = raw
        .trim()
        .parse()
        .context("optimizer did not print a single integer")?;

    match value {
        0 => Ok(OptimizerVerdict::EmptyJobList),
        v if v > 0 => Ok(OptimizerVerdict::Allocate {
            total_node_allocation: v as u32,
        }),
        v => Err(CatalogError::OptimizerMisreturn(v.to_string()).into()),
    }
}

pub struct ExternalSchedulerExecutor {
    pub nanostate_loc_out: String,
    pub nanolog_loc_tmp: String,
    pub macrostate_loc_out: String,
    pub nrepl: usize,
    pub time_id: String,
    pub optimizer_script: String,
    pub pilot_job_manager: String,
}

impl ExternalSchedulerExecutor {
    fn manifest_path(&self) -> PathBuf {
        Path::new(&self.nanostate_loc_out).join("list_md_jobs.json")
    }

    fn script_path(&self, job: &JobDescriptor) -> PathBuf {
        Path::new(&self.nanostate_loc_out).join(format!("bash_cell{}_repl{}.sh", job.cell_id, job.replica))
    }

    /// Writes one manifest entry and one fallback shell script per job.
    pub fn write_job_manifest(&self, jobs: &[JobDescriptor]) -> Result<()> {
        let entries: Vec<ManifestEntry> = jobs
            .iter()
            .map(|j| ManifestEntry {
                cell_id: &j.cell_id,
                material: &j.material,
                replica: j.replica,
                args: &j.args,
            })
            .collect();

        let manifest_path = self.manifest_path();
        if let Some(parent) = manifest_path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let text = serde_json::to_string_pretty(&entries).context("serializing job manifest")?;
        fs::write(&manifest_path, text).with_context(|| format!("writing manifest {:?}", manifest_path))?;

        for job in jobs {
            let args_list = job.args.join(" ");
            let script = format!("mpirun ./strain_md {args_list}\n");
            let path = self.script_path(job);
            fs::write(&path, script).with_context(|| format!("writing fallback script {:?}", path))?;
        }

        Ok(())
    }

    /// Calls the optimizer, then (unless the job list is empty) submits the
    /// pilot-job manifest and waits for it to complete.
    pub fn run_optimizer_and_pilot_job(&self) -> Result<()> {
        let manifest_path = self.manifest_path();
        let mut optimizer_cmd = Command::new(&self.optimizer_script);
        optimizer_cmd
            .arg(&self.macrostate_loc_out)
            .arg("1")
            .arg(self.nrepl.to_string())
            .arg(&self.time_id)
            .arg(&self.nanostate_loc_out)
            .arg(&self.nanolog_loc_tmp)
            .arg(&manifest_path);
        scrub_mpi_env(&mut optimizer_cmd);
        let output = optimizer_cmd
            .output()
            .context("spawning job-list optimization script")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let verdict = parse_optimizer_output(&stdout)
            .with_context(|| "failed executing the job list optimization script")?;

        match verdict {
            OptimizerVerdict::EmptyJobList => {
                log::info!("optimizer returned an empty job list; skipping pilot-job manager");
            }
            OptimizerVerdict::Allocate { total_node_allocation } => {
                log::info!("calling pilot-job manager with {total_node_allocation} nodes allocated");
                let mut pilot_cmd = Command::new(&self.pilot_job_manager);
                pilot_cmd.arg("--file-path").arg(&manifest_path);
                scrub_mpi_env(&mut pilot_cmd);
                let status = pilot_cmd.status();

                match status {
                    Ok(status) if !status.success() => {
                        log::warn!("pilot-job manager exited with {status}; continuing");
                    }
                    Err(e) => log::warn!("failed spawning pilot-job manager: {e}"),
                    Ok(_) => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_job_list() {
        assert_eq!(parse_optimizer_output("0\n").unwrap(), OptimizerVerdict::EmptyJobList);
    }

    #[test]
    fn parses_positive_node_allocation() {
        assert_eq!(
            parse_optimizer_output("12").unwrap(),
            OptimizerVerdict::Allocate { total_node_allocation: 12 }
        );
    }

    #[test]
    fn negative_value_is_fatal() {
        assert!(parse_optimizer_output("-1").is_err());
    }

    #[test]
    fn malformed_output_is_fatal() {
        assert!(parse_optimizer_output("not-an-integer").is_err());
    }
}
