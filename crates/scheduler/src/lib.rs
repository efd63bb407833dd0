//! Canvas Editor Scheduler Library.
//!
//! Stroke scheduling queue for a painting engine.
//!
//! Edits are submitted as *strokes*: ordered lists of jobs with a lifecycle.
//! The queue decides which job may run next given what is already executing
//! (exclusive strokes, sequential and barrier jobs), and mirrors strokes onto
//! a low-resolution tier so previews can be computed ahead of the full
//! resolution work.
//!
//! # Example
//!
//! ```
//! use canvas_editor_scheduler::{
//!     JobCounts, NamedStrategy, NoopJob, Sequentiality, StrokeJob, StrokesQueue, WorkerPool,
//! };
//!
//! /// Pool that runs every job inline
//! #[derive(Default)]
//! struct InlinePool {
//!     ran: usize,
//! }
//!
//! impl WorkerPool for InlinePool {
//!     fn has_spare_capacity(&self) -> bool {
//!         true
//!     }
//!
//!     fn add_job(&mut self, job: StrokeJob) {
//!         job.run();
//!         self.ran += 1;
//!     }
//!
//!     fn job_counts(&self) -> JobCounts {
//!         JobCounts::default()
//!     }
//!
//!     fn current_level_of_detail(&self) -> Option<u32> {
//!         None
//!     }
//! }
//!
//! let queue = StrokesQueue::default();
//! let stroke = queue.start_stroke(Box::new(NamedStrategy::new("brush")));
//! queue.add_job(stroke, Box::new(NoopJob::default())).unwrap();
//! queue.add_job(stroke, Box::new(NoopJob::new(Sequentiality::Barrier))).unwrap();
//! queue.end_stroke(stroke).unwrap();
//!
//! let mut pool = InlinePool::default();
//! queue.process_queue(&mut pool, false);
//!
//! assert_eq!(pool.ran, 2);
//! assert!(queue.is_empty());
//! ```

mod cancel;
mod context;
mod error;
mod job;
mod lod;
mod queue;
mod strategy;
mod stroke;
mod worker;

// Re-export public API
pub use cancel::CancellationToken;
pub use context::{JobCounts, WorkerPool};
pub use error::{ConfigError, StrokeError, StrokeResult, UpdaterError};
pub use job::{JobData, JobRole, NoopJob, Sequentiality, StrokeJob};
pub use queue::{StrokeInfo, StrokesQueue};
pub use strategy::{
    LodSyncFactory, LodSyncStroke, NamedStrategy, StrokeFactories, StrokeStrategy,
    StrokeStrategyFactory,
};
pub use stroke::{StrokeId, StrokeKind, StrokeType};
pub use worker::{MergeJob, ThreadedUpdater, WorkerPoolConfig, WORKERS_ENV_VAR};
