//! The worker pool as seen by the queue.
//!
//! The queue does not own any threads. It is handed something implementing
//! [`WorkerPool`] for the duration of a drain and pushes admissible jobs into
//! it. Exclusive access (`&mut`) to the pool stands in for the pool's coarse
//! lock, so capacity and admissibility are decided atomically.

use crate::job::StrokeJob;

/// Snapshot of the jobs currently executing in a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    /// Non-stroke jobs, such as projection merges.
    pub merge_jobs: usize,

    /// Jobs dispatched from strokes.
    pub stroke_jobs: usize,
}

impl JobCounts {
    /// Create a snapshot from the two counts.
    pub fn new(merge_jobs: usize, stroke_jobs: usize) -> Self {
        Self {
            merge_jobs,
            stroke_jobs,
        }
    }

    /// Total number of jobs in flight.
    pub fn total(&self) -> usize {
        self.merge_jobs + self.stroke_jobs
    }

    /// Whether nothing at all is executing.
    pub fn is_idle(&self) -> bool {
        self.total() == 0
    }
}

/// Executor the queue dispatches into.
pub trait WorkerPool {
    /// Whether another job can start right now.
    fn has_spare_capacity(&self) -> bool;

    /// Start executing a stroke job.
    fn add_job(&mut self, job: StrokeJob);

    fn job_counts(&self) -> JobCounts;

    /// Level of detail of the stroke jobs in flight, `None` when no stroke
    /// job is running.
    fn current_level_of_detail(&self) -> Option<u32>;
}
