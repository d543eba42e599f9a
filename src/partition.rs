// src/partition.rs
//
// =============================================================================
// HMM-MD-CORE: MPI PROCESS-POOL PARTITIONER (C5)
// =============================================================================
//
// Splits a parent communicator of size `|P|` into `n_md_batches` concurrent
// batches, each sized to respect a minimum-nodes-per-batch constraint while
// maximizing the number of batches. The arithmetic (`plan_batches`) is a pure
// function of three integers so it can be unit-tested without an MPI launch;
// `BatchCommunicator` is the thin wrapper that actually calls into the `mpi`
// crate to split the real communicator.

use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

/// Result of the partitioning arithmetic (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub md_batch_n_processes: usize,
    pub n_md_batches: usize,
}

/// Pure partitioning arithmetic: given the parent pool size `world_size`, the
/// number of MD runs requested this step `nmdruns`, and the per-batch minimum
/// `batch_nnodes_min * machine_ppn`, compute the batch size and count.
pub fn plan_batches(world_size: usize, nmdruns: usize, batch_nnodes_min: usize, machine_ppn: usize) -> BatchPlan {
    let npbtch_min = (batch_nnodes_min * machine_ppn).max(1);
    let fair_npbtch = if nmdruns == 0 { world_size } else { world_size / nmdruns };

    let mut md_batch_n_processes = npbtch_min.max(fair_npbtch - fair_npbtch % npbtch_min);
    if md_batch_n_processes == 0 {
        md_batch_n_processes = npbtch_min;
    }

    let mut n_md_batches = world_size / md_batch_n_processes;
    if n_md_batches == 0 {
        n_md_batches = 1;
        md_batch_n_processes = world_size;
    }

    BatchPlan {
        md_batch_n_processes,
        n_md_batches,
    }
}

/// Color assignment for parent rank `p` (§4.4): processes beyond
/// `md_batch_n_processes * n_md_batches` ("excess") join the last batch rather
/// than going unassigned, per the standardized excess-process policy.
pub fn color_for_rank(p: usize, plan: BatchPlan) -> usize {
    let assigned = plan.md_batch_n_processes * plan.n_md_batches;
    if p < assigned {
        p / plan.md_batch_n_processes
    } else {
        plan.n_md_batches - 1
    }
}

/// A live batch communicator, owned for the duration of one dispatch/execute/
/// aggregate step and re-split fresh every step since `nmdruns` varies (§9
/// "communicator lifecycle").
pub struct BatchCommunicator {
    pub plan: BatchPlan,
    pub color: usize,
    pub batch_comm: SimpleCommunicator,
}

impl BatchCommunicator {
    /// Splits `world` into batches sized for `nmdruns` MD runs this step.
    pub fn split<C: Communicator>(world: &C, nmdruns: usize, batch_nnodes_min: usize, machine_ppn: usize) -> Self {
        let world_size = world.size() as usize;
        let this_rank = world.rank() as usize;

        let plan = plan_batches(world_size, nmdruns, batch_nnodes_min, machine_ppn);
        let color = color_for_rank(this_rank, plan);

        let batch_comm = world.split_by_color(mpi::topology::Color::with_value(color as i32)).expect(
            "communicator split by color must succeed: MPI_Comm_split never fails for a valid color",
        );

        BatchCommunicator {
            plan,
            color,
            batch_comm,
        }
    }

    pub fn is_batch_root(&self) -> bool {
        self.batch_comm.rank() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_case_every_process_owns_one_batch() {
        // End-to-end scenario 4: |P|=4, nmdruns=100, batch_nnodes_min=1, machine_ppn=1.
        let plan = plan_batches(4, 100, 1, 1);
        assert_eq!(plan.md_batch_n_processes, 1);
        assert_eq!(plan.n_md_batches, 4);
        for p in 0..4 {
            assert_eq!(color_for_rank(p, plan), p);
        }
    }

    #[test]
    fn saturation_case_single_batch_spans_whole_pool() {
        // End-to-end scenario 5: |P|=8, nmdruns=1, batch_nnodes_min=1, machine_ppn=2.
        let plan = plan_batches(8, 1, 1, 2);
        assert_eq!(plan.md_batch_n_processes, 8);
        assert_eq!(plan.n_md_batches, 1);
    }

    #[test]
    fn batch_size_times_count_never_exceeds_pool() {
        for world_size in [1usize, 2, 4, 7, 8, 17, 64] {
            for nmdruns in [1usize, 2, 3, 5, 13, 100] {
                let plan = plan_batches(world_size, nmdruns, 1, 1);
                assert!(plan.md_batch_n_processes * plan.n_md_batches <= world_size);
            }
        }
    }

    #[test]
    fn batch_size_respects_minimum_when_pool_is_large_enough() {
        let batch_nnodes_min = 2;
        let machine_ppn = 4;
        let nmdruns = 3;
        let world_size = batch_nnodes_min * machine_ppn * nmdruns * 2;
        let plan = plan_batches(world_size, nmdruns, batch_nnodes_min, machine_ppn);
        assert!(plan.md_batch_n_processes >= batch_nnodes_min * machine_ppn);
    }

    #[test]
    fn exactly_one_color_per_process_including_excess() {
        let plan = plan_batches(10, 3, 1, 1);
        let assigned = plan.md_batch_n_processes * plan.n_md_batches;
        for p in 0..10 {
            let c = color_for_rank(p, plan);
            assert!(c < plan.n_md_batches);
            if p >= assigned {
                assert_eq!(c, plan.n_md_batches - 1);
            }
        }
    }
}
