// src/main.rs
//
// =============================================================================
// HMM-MD-CORE: COMMANDER & ENTRY POINT
// =============================================================================
//
// The wiring center of the whole crate, as a `clap` `Parser`/`Subcommand` CLI
// (see `executor/mod.rs`'s `JobExecutor` for the analogous strategy-object
// pattern used by the executors below).
//
// Modes:
// 1. INIT: Loads the replica catalog (generation + equilibration passes),
//    computes replica-averaged stiffness/density, persists both.
// 2. STEP: Runs one plan -> barrier -> execute -> barrier -> aggregate cycle
//    for the pending quadrature-point updates left by the FE collaborator.
//
// Runs SPMD under `mpirun`; every rank executes the same binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hmm_md_core::catalog::ReplicaCatalog;
use hmm_md_core::config::StmdConfig;
use hmm_md_core::dispatch::{self, DispatchPlan};
use hmm_md_core::error::CatalogError;
use hmm_md_core::executor::inprocess::{InProcessExecutor, SubprocessMdEngine};
use hmm_md_core::executor::scheduler::ExternalSchedulerExecutor;
use hmm_md_core::executor::JobExecutor;
use hmm_md_core::partition::BatchCommunicator;
use hmm_md_core::aggregate::owning_rank;
use hmm_md_core::Aggregator;
use mpi::traits::*;

#[derive(Parser)]
#[command(
    name = "stmd_sync",
    version = "0.1",
    about = "MD dispatch and aggregation core for an HMM coupling driver"
)]
struct Cli {
    /// Path to the initialization-parameter YAML file.
    #[arg(long, default_value = "stmd.yaml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the replica catalog, equilibrate, average, and persist artifacts.
    Init,

    /// Run one plan -> execute -> aggregate cycle for the pending updates.
    Step {
        /// Identifier for this macro step, used to namespace per-job artifacts.
        #[arg(long)]
        time_id: String,

        /// Number of MD runs requested this step (drives the batch split).
        #[arg(long)]
        nmdruns: usize,

        /// Current macro-step counter, used against freq_checkpoint/freq_output_homog.
        #[arg(long)]
        timestep: i32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let universe = mpi::initialize().context("MPI_Init failed")?;
    let world = universe.world();
    let rank = world.rank();

    let cli = Cli::parse();
    let cfg = match StmdConfig::load(&cli.config).context("loading initialization parameters") {
        Ok(cfg) => cfg,
        Err(e) => abort_on_catalog_error(&world, e),
    };

    let result = match cli.command {
        Commands::Init => run_init(&cfg, rank),
        Commands::Step {
            time_id,
            nmdruns,
            timestep,
        } => run_step(&cfg, &world, &time_id, nmdruns, timestep, rank),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => abort_on_catalog_error(&world, e),
    }
}

/// `CatalogError` is the one error class spec §7 requires to bring down every
/// rank together, not just the one that hit it: a config/catalog fault is
/// visible identically to every rank (same YAML, same replica tree), so
/// leaving the rest to proceed into the next `world.barrier()` would hang
/// them forever instead of surfacing the failure. Any other error still
/// returns normally and exits only the reporting rank, via the default
/// top-level `Result` handler.
fn abort_on_catalog_error<C: Communicator>(world: &C, e: anyhow::Error) -> ! {
    if e.downcast_ref::<CatalogError>().is_some() {
        log::error!("fatal catalog error, aborting all ranks: {e:#}");
        world.abort(1);
    }
    eprintln!("Error: {e:#}");
    std::process::exit(1);
}

/// Catalog generation + equilibration + averaging, run once before the first
/// macro step. Every rank loads and averages identically (no MPI coordination
/// needed — the catalog is read-only, file-system-sourced state).
fn run_init(cfg: &StmdConfig, rank: i32) -> Result<()> {
    if rank == 0 {
        log::info!("loading replica catalog for {} materials x {} replicas", cfg.materials.len(), cfg.nrepl);
    }

    let mut catalog = ReplicaCatalog::load_generation(cfg).context("replica catalog generation pass")?;
    catalog.load_equilibration(cfg);
    catalog.average_and_export(cfg).context("averaging and exporting initialization artifacts")?;

    if rank == 0 {
        log::info!("catalog initialization complete");
    }
    Ok(())
}

/// One plan -> barrier -> execute -> barrier -> aggregate cycle (§2).
fn run_step<C: Communicator>(
    cfg: &StmdConfig,
    world: &C,
    time_id: &str,
    nmdruns: usize,
    timestep: i32,
    rank: i32,
) -> Result<()> {
    let world_size = world.size() as usize;

    let mut catalog = ReplicaCatalog::load_generation(cfg).context("replica catalog generation pass")?;
    catalog.load_equilibration(cfg);

    let output_homog = cfg.freq_output_homog > 0 && timestep % cfg.freq_output_homog == 0;
    let checkpoint_save = cfg.freq_checkpoint > 0 && timestep % cfg.freq_checkpoint == 0;

    let updates = dispatch::read_pending_updates(cfg).context("reading pending update manifest")?;
    if rank == 0 {
        log::info!("step {time_id}: {} pending quadrature-point updates", updates.len());
    }

    // Communicator lifecycle: split fresh every step (§9), release at step end.
    let batch = BatchCommunicator::split(world, nmdruns, cfg.batch_nnodes_min, cfg.machine_ppn);

    let plan = DispatchPlan::build(
        cfg,
        &catalog,
        updates,
        time_id,
        batch.plan.n_md_batches,
        batch.color,
        batch.is_batch_root(),
        output_homog,
        checkpoint_save,
    )
    .context("building dispatch plan")?;

    world.barrier();

    if cfg.use_pjm_scheduler {
        if rank == 0 {
            let executor = ExternalSchedulerExecutor {
                nanostate_loc_out: cfg.nanostate_loc_out.clone(),
                nanolog_loc_tmp: cfg.nanolog_loc_tmp.clone(),
                macrostate_loc_out: cfg.macrostate_loc_out.clone(),
                nrepl: cfg.nrepl,
                time_id: time_id.to_string(),
                optimizer_script: "optimize_job_list".to_string(),
                pilot_job_manager: "pilot_job_manager".to_string(),
            };
            executor.write_job_manifest(&plan.jobs).context("writing job manifest")?;
            executor.run_optimizer_and_pilot_job().context("running optimizer and pilot-job manager")?;
        }
    } else {
        let executor = InProcessExecutor::new(SubprocessMdEngine::default());
        for job in plan.owned_jobs(batch.color) {
            if let Err(e) = executor.execute(job, &batch) {
                log::warn!("MD run for cell {} replica {} failed: {e}", job.cell_id, job.replica);
            }
        }
    }

    world.barrier();

    let aggregator = Aggregator::new(&cfg.macrostate_loc_out, cfg.nrepl);
    for (c, update) in plan.updates.iter().enumerate() {
        if owning_rank(c, world_size) == rank as usize {
            let cg_stress = aggregator
                .aggregate_cell(c, update, &catalog, &plan.jobs)
                .with_context(|| format!("aggregating cell {}", update.cell_id))?;
            aggregator
                .persist(&update.cell_id, &cg_stress)
                .with_context(|| format!("persisting cell {}", update.cell_id))?;
        }
    }

    Ok(())
}
