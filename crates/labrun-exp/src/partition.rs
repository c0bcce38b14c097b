//! Deterministic task to job partitioning.
//!
//! Task index `i` of `ntasks` belongs to job `floor(njobs * i / ntasks)`.
//! Nothing is stored: the assignment is re-derived from `(ntasks, njobs)`,
//! every job receives a contiguous index range and job sizes differ by at
//! most one.

use std::ops::Range;

/// Number of jobs for `ntasks` tasks given an optional configured count.
pub fn resolve_njobs(configured: Option<usize>, ntasks: usize) -> usize {
    match configured {
        Some(njobs) => njobs.min(ntasks),
        None => ntasks,
    }
}

/// Job id owning task index `task`.
pub fn job_of_task(task: u64, ntasks: u64, njobs: u64) -> u64 {
    if ntasks == 0 {
        return 0;
    }
    ((njobs as u128 * task as u128) / ntasks as u128) as u64
}

/// Contiguous task index range assigned to `jobid`.
///
/// The first index of job `j` is the smallest `i` with
/// `floor(njobs * i / ntasks) >= j`, i.e. `ceil(j * ntasks / njobs)`.
pub fn task_range(jobid: u64, ntasks: u64, njobs: u64) -> Range<u64> {
    if njobs == 0 || jobid >= njobs {
        return 0..0;
    }
    first_task(jobid, ntasks, njobs)..first_task(jobid + 1, ntasks, njobs)
}

/// Sizes of every job, indexed by job id.
pub fn job_sizes(ntasks: u64, njobs: u64) -> Vec<u64> {
    (0..njobs)
        .map(|jobid| {
            let range = task_range(jobid, ntasks, njobs);
            range.end - range.start
        })
        .collect()
}

fn first_task(jobid: u64, ntasks: u64, njobs: u64) -> u64 {
    let numerator = jobid as u128 * ntasks as u128;
    numerator.div_ceil(njobs as u128) as u64
}
