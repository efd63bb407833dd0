//! Threaded worker pool driving a strokes queue.
//!
//! [`ThreadedUpdater`] spawns a fixed set of worker threads and implements
//! [`WorkerPool`] on its internal state. Every time a job finishes, the
//! worker that ran it drains the queue again, so the pool stays saturated
//! without a dispatcher thread.

use crate::context::{JobCounts, WorkerPool};
use crate::error::{ConfigError, UpdaterError};
use crate::job::StrokeJob;
use crate::queue::StrokesQueue;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Environment variable overriding the number of worker threads.
pub const WORKERS_ENV_VAR: &str = "STROKE_SCHEDULER_WORKERS";

/// Opaque non-stroke work, such as merging a finished region into the
/// projection.
pub type MergeJob = Box<dyn FnOnce() + Send>;

/// Configuration for the threaded worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn, which is also the pool capacity.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus(),
            thread_name: "stroke-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with `num_workers` threads.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    /// Set the prefix used for worker thread names.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Defaults overridden by `STROKE_SCHEDULER_WORKERS` when it is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var(WORKERS_ENV_VAR) {
            config.num_workers = val
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue(WORKERS_ENV_VAR.to_string()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can start a pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

enum Task {
    Stroke(StrokeJob),
    Merge(MergeJob),
    Shutdown,
}

/// Pool bookkeeping, guarded by the pool lock.
struct PoolState {
    capacity: usize,
    merge_jobs: usize,
    stroke_jobs: usize,
    running_lod: Option<u32>,
    external_jobs_pending: bool,
    shutting_down: bool,
    sender: Sender<Task>,
}

impl WorkerPool for PoolState {
    fn has_spare_capacity(&self) -> bool {
        !self.shutting_down && self.merge_jobs + self.stroke_jobs < self.capacity
    }

    fn add_job(&mut self, job: StrokeJob) {
        self.stroke_jobs += 1;
        self.running_lod = Some(job.level_of_detail());

        if self.sender.send(Task::Stroke(job)).is_err() {
            error!("stroke job dropped, no worker is listening");
            self.finish_stroke_job();
        }
    }

    fn job_counts(&self) -> JobCounts {
        JobCounts::new(self.merge_jobs, self.stroke_jobs)
    }

    fn current_level_of_detail(&self) -> Option<u32> {
        if self.stroke_jobs == 0 {
            None
        } else {
            self.running_lod
        }
    }
}

impl PoolState {
    fn finish_stroke_job(&mut self) {
        self.stroke_jobs = self.stroke_jobs.saturating_sub(1);
        if self.stroke_jobs == 0 {
            self.running_lod = None;
        }
    }
}

struct Shared {
    queue: Arc<StrokesQueue>,
    pool: Mutex<PoolState>,
    idle: Condvar,
}

impl Shared {
    /// Drain the queue into the pool. The pool lock must be held, and the
    /// queue lock is taken inside it.
    fn drive(&self, pool: &mut PoolState) {
        let external_jobs_pending = pool.external_jobs_pending;
        self.queue.process_queue(pool, external_jobs_pending);

        if pool.job_counts().is_idle() {
            self.idle.notify_all();
        }
    }
}

/// Worker pool executing jobs dispatched by a [`StrokesQueue`].
///
/// # Example
///
/// ```
/// use canvas_editor_scheduler::{
///     NamedStrategy, NoopJob, StrokesQueue, ThreadedUpdater, WorkerPoolConfig,
/// };
/// use std::sync::Arc;
///
/// let queue = Arc::new(StrokesQueue::default());
/// let updater = ThreadedUpdater::new(queue.clone(), WorkerPoolConfig::new(2)).unwrap();
///
/// let id = queue.start_stroke(Box::new(NamedStrategy::new("fill")));
/// queue.add_job(id, Box::new(NoopJob::default())).unwrap();
/// queue.end_stroke(id).unwrap();
///
/// updater.process_queue();
/// updater.wait_for_idle();
/// assert!(queue.is_empty());
///
/// updater.shutdown();
/// ```
pub struct ThreadedUpdater {
    shared: Arc<Shared>,
    sender: Sender<Task>,
    workers: Vec<Worker>,
}

impl ThreadedUpdater {
    /// Spawn the worker threads.
    pub fn new(queue: Arc<StrokesQueue>, config: WorkerPoolConfig) -> Result<Self, UpdaterError> {
        config.validate()?;

        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(Shared {
            queue,
            pool: Mutex::new(PoolState {
                capacity: config.num_workers,
                merge_jobs: 0,
                stroke_jobs: 0,
                running_lod: None,
                external_jobs_pending: false,
                shutting_down: false,
                sender: sender.clone(),
            }),
            idle: Condvar::new(),
        });

        let mut updater = Self {
            shared,
            sender,
            workers: Vec::with_capacity(config.num_workers),
        };

        for id in 0..config.num_workers {
            let worker = Worker::spawn(
                format!("{}-{}", config.thread_name, id),
                updater.shared.clone(),
                receiver.clone(),
            )?;
            updater.workers.push(worker);
        }

        debug!(workers = config.num_workers, "threaded updater started");
        Ok(updater)
    }

    /// The queue this pool drains.
    pub fn queue(&self) -> &Arc<StrokesQueue> {
        &self.shared.queue
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Dispatch whatever the queue allows right now.
    ///
    /// Call this after admitting strokes or jobs; workers re-drive the
    /// queue on their own once jobs start finishing.
    pub fn process_queue(&self) {
        let mut pool = self.shared.pool.lock();
        self.shared.drive(&mut pool);
    }

    /// Run a non-stroke job, counted as a merge job while it executes.
    pub fn add_merge_job<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pool = self.shared.pool.lock();
        pool.merge_jobs += 1;

        if self.sender.send(Task::Merge(Box::new(job))).is_err() {
            error!("merge job dropped, no worker is listening");
            pool.merge_jobs -= 1;
        }
    }

    /// Work queued outside this pool that barrier jobs must wait for.
    pub fn set_external_jobs_pending(&self, pending: bool) {
        let mut pool = self.shared.pool.lock();
        pool.external_jobs_pending = pending;

        if !pending {
            self.shared.drive(&mut pool);
        }
    }

    /// Cancel everything queued if no stroke is open and nothing runs,
    /// then dispatch the cancel jobs that produced.
    pub fn try_cancel_current_stroke(&self) -> bool {
        let mut pool = self.shared.pool.lock();
        let cancelled = self.shared.queue.try_cancel_current_stroke_async(&*pool);

        if cancelled {
            self.shared.drive(&mut pool);
        }
        cancelled
    }

    /// Jobs currently executing in the pool.
    pub fn job_counts(&self) -> JobCounts {
        self.shared.pool.lock().job_counts()
    }

    /// Block until no job is executing.
    pub fn wait_for_idle(&self) {
        let mut pool = self.shared.pool.lock();
        while !pool.job_counts().is_idle() {
            self.shared.idle.wait(&mut pool);
        }
    }

    /// Like [`wait_for_idle`](Self::wait_for_idle) with an upper bound.
    /// Returns `false` if jobs were still running when it expired.
    pub fn wait_for_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pool = self.shared.pool.lock();

        while !pool.job_counts().is_idle() {
            if self.shared.idle.wait_until(&mut pool, deadline).timed_out() {
                return pool.job_counts().is_idle();
            }
        }
        true
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Jobs already handed to the workers still run. Nothing new is
    /// dispatched once shutdown has begun.
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.shared.pool.lock().shutting_down = true;
        for _ in &self.workers {
            let _ = self.sender.send(Task::Shutdown);
        }
        for worker in self.workers.drain(..) {
            worker.join();
        }

        debug!("threaded updater stopped");
    }
}

impl Drop for ThreadedUpdater {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

impl std::fmt::Debug for ThreadedUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedUpdater")
            .field("workers", &self.workers.len())
            .field("job_counts", &self.job_counts())
            .finish()
    }
}

/// A single worker thread in the pool.
struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(name: String, shared: Arc<Shared>, receiver: Receiver<Task>) -> std::io::Result<Self> {
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(shared, receiver))?;

        Ok(Self {
            name,
            thread: Some(thread),
        })
    }

    /// Main worker loop.
    ///
    /// Runs tasks until told to shut down. After each job the worker puts
    /// its slot back and drains the queue again.
    fn run(shared: Arc<Shared>, receiver: Receiver<Task>) {
        for task in receiver.iter() {
            match task {
                Task::Stroke(job) => {
                    let stroke = job.stroke();
                    let role = job.role();
                    if panic::catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
                        error!(stroke = %stroke, ?role, "stroke job panicked");
                    }
                    trace!(stroke = %stroke, ?role, "stroke job finished");

                    let mut pool = shared.pool.lock();
                    pool.finish_stroke_job();
                    shared.drive(&mut pool);
                }
                Task::Merge(job) => {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("merge job panicked");
                    }

                    let mut pool = shared.pool.lock();
                    pool.merge_jobs = pool.merge_jobs.saturating_sub(1);
                    shared.drive(&mut pool);
                }
                Task::Shutdown => break,
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

/// Get the number of logical CPU cores.
///
/// This is used as the default number of worker threads.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
