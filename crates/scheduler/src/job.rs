//! Stroke jobs.
//!
//! A job is the smallest schedulable unit of work. The queue treats the work
//! itself as opaque and only looks at the properties a job declares about
//! how it may be ordered against its neighbours.

use crate::cancel::CancellationToken;
use crate::stroke::StrokeId;
use std::fmt;

/// Ordering requirement a job places on the jobs around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sequentiality {
    /// May run alongside any other job of the same stroke.
    #[default]
    Concurrent,

    /// Must run alone among the stroke's jobs, and the job after it waits
    /// until it has finished.
    Sequential,

    /// Must run with nothing else in flight at all, including merge jobs
    /// and externally pending work.
    Barrier,
}

impl Sequentiality {
    /// Both sequential and barrier jobs require running alone.
    pub fn is_sequential(self) -> bool {
        matches!(self, Sequentiality::Sequential | Sequentiality::Barrier)
    }

    /// Whether the job needs the whole pool to itself.
    pub fn is_barrier(self) -> bool {
        self == Sequentiality::Barrier
    }
}

/// Work carried by a stroke job.
///
/// Implementors provide the actual processing in [`run`](JobData::run). All
/// other methods have defaults describing a plain concurrent job that cannot
/// be cloned for a lower level of detail.
pub trait JobData: Send {
    /// Perform the job. Called on a worker thread, outside the queue lock.
    fn run(&mut self, token: &CancellationToken);

    fn sequentiality(&self) -> Sequentiality {
        Sequentiality::Concurrent
    }

    /// Non-cancellable jobs stay queued when their stroke is cancelled.
    fn is_cancellable(&self) -> bool {
        true
    }

    /// Produce a copy of this job bound to `level_of_detail`.
    ///
    /// Jobs added to a stroke that has a low-resolution buddy must be able
    /// to clone themselves, otherwise the addition is rejected.
    fn create_lod_clone(&self, _level_of_detail: u32) -> Option<Box<dyn JobData>> {
        None
    }

    /// Undo whatever admission-time side effects this job had.
    ///
    /// Called instead of [`run`](JobData::run) when the owning stroke is
    /// cancelled before the job was dispatched.
    fn rollback(&mut self) {}
}

/// What a queued job does for its stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobRole {
    /// Strategy initialization, queued when the stroke is created.
    Init,
    /// Regular work added by the producer.
    Dab,
    /// Strategy finalization, queued when the stroke is closed.
    Finish,
    /// Strategy cleanup, queued when an initialized stroke is cancelled.
    Cancel,
    /// Pauses a running Lod0 stroke in favour of new LodN work.
    Suspend,
    /// Picks up a suspended stroke again.
    Resume,
}

/// A job as it travels from a stroke to the worker pool.
pub struct StrokeJob {
    stroke: StrokeId,
    level_of_detail: u32,
    role: JobRole,
    exclusive: bool,
    token: CancellationToken,
    data: Box<dyn JobData>,
}

impl StrokeJob {
    pub(crate) fn new(
        stroke: StrokeId,
        level_of_detail: u32,
        role: JobRole,
        token: CancellationToken,
        data: Box<dyn JobData>,
    ) -> Self {
        Self {
            stroke,
            level_of_detail,
            role,
            exclusive: false,
            token,
            data,
        }
    }

    /// Stroke this job was queued on.
    pub fn stroke(&self) -> StrokeId {
        self.stroke
    }

    /// Resolution tier the job works on; 0 is full resolution.
    pub fn level_of_detail(&self) -> u32 {
        self.level_of_detail
    }

    /// What the job does for its stroke.
    pub fn role(&self) -> JobRole {
        self.role
    }

    /// Whether the job belongs to an exclusive stroke.
    ///
    /// Set at dispatch time from the owning stroke's strategy.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Ordering requirement declared by the job.
    pub fn sequentiality(&self) -> Sequentiality {
        self.data.sequentiality()
    }

    /// Whether the job must run alone among its stroke's jobs.
    pub fn is_sequential(&self) -> bool {
        self.data.sequentiality().is_sequential()
    }

    /// Whether the job must run with nothing else in flight.
    pub fn is_barrier(&self) -> bool {
        self.data.sequentiality().is_barrier()
    }

    /// Whether cancelling the stroke rolls this job back.
    pub fn is_cancellable(&self) -> bool {
        self.data.is_cancellable()
    }

    /// Token tripped when the owning stroke is cancelled.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Execute the job, consuming it.
    pub fn run(mut self) {
        self.data.run(&self.token);
    }

    pub(crate) fn set_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    pub(crate) fn rollback(mut self) {
        self.data.rollback();
    }
}

impl fmt::Debug for StrokeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrokeJob")
            .field("stroke", &self.stroke)
            .field("level_of_detail", &self.level_of_detail)
            .field("role", &self.role)
            .field("exclusive", &self.exclusive)
            .field("sequentiality", &self.sequentiality())
            .finish()
    }
}

/// Job that does nothing when run.
///
/// Useful for strategies that only need a sequencing point.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopJob {
    pub sequentiality: Sequentiality,
}

impl NoopJob {
    /// Create a no-op job with the given ordering requirement.
    pub fn new(sequentiality: Sequentiality) -> Self {
        Self { sequentiality }
    }
}

impl JobData for NoopJob {
    fn run(&mut self, _token: &CancellationToken) {}

    fn sequentiality(&self) -> Sequentiality {
        self.sequentiality
    }

    fn create_lod_clone(&self, _level_of_detail: u32) -> Option<Box<dyn JobData>> {
        Some(Box::new(*self))
    }
}
