// src/executor/mod.rs
//
// =============================================================================
// HMM-MD-CORE: EXECUTOR STRATEGY OBJECTS (C7, C8)
// =============================================================================
//
// Both execution modes share one interface, a strategy-object split between a
// shared trait and a per-mode struct, generalized from "which scientific
// code" to "in-process vs external-scheduler handoff".

pub mod inprocess;
pub mod scheduler;

use crate::dispatch::JobDescriptor;
use crate::partition::BatchCommunicator;
use anyhow::Result;

/// Strategy interface for running one MD job to completion (§9 "subprocess
/// invocation... specify both modes as strategy objects sharing a single
/// interface").
pub trait JobExecutor {
    /// Runs `job` on `batch`. Returns `Ok(true)` if the stress output was
    /// produced, `Ok(false)` for a soft per-job failure (never aborts the step).
    fn execute(&self, job: &JobDescriptor, batch: &BatchCommunicator) -> Result<bool>;
}
