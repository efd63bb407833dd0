//! Strokes: ordered job lists with a lifecycle.
//!
//! A stroke owns its pending jobs and its strategy. It knows nothing about
//! the queue around it; buddy links are plain ids that the queue resolves
//! through its own stroke arena.

use crate::cancel::CancellationToken;
use crate::job::{JobData, JobRole, StrokeJob};
use crate::strategy::StrokeStrategy;
use std::collections::VecDeque;
use std::fmt;

/// Weak handle to a stroke admitted to a [`StrokesQueue`](crate::StrokesQueue).
///
/// Ids are never reused, so once a stroke has been dequeued its id simply
/// stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrokeId(pub(crate) u64);

impl StrokeId {
    /// Raw numeric value of the id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stroke#{}", self.0)
    }
}

/// The role a stroke plays in the queue, with the data only that role needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeKind {
    /// Full-resolution stroke with no low-resolution counterpart.
    Legacy,
    /// Full-resolution half of a buddy pair.
    Lod0 { buddy: StrokeId },
    /// Low-resolution half of a buddy pair.
    LodN { level_of_detail: u32, buddy: StrokeId },
    /// Synthetic stroke switching canvas updates off before Lod0 work.
    Suspend,
    /// Synthetic stroke switching canvas updates back on after Lod0 work.
    Resume,
    /// Synthetic stroke regenerating the low-resolution cache.
    Sync { level_of_detail: u32 },
}

/// Field-less tag of [`StrokeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrokeType {
    Legacy,
    Lod0,
    LodN,
    Suspend,
    Resume,
    Sync,
}

impl StrokeKind {
    /// Field-less tag of this kind.
    pub fn stroke_type(&self) -> StrokeType {
        match self {
            StrokeKind::Legacy => StrokeType::Legacy,
            StrokeKind::Lod0 { .. } => StrokeType::Lod0,
            StrokeKind::LodN { .. } => StrokeType::LodN,
            StrokeKind::Suspend => StrokeType::Suspend,
            StrokeKind::Resume => StrokeType::Resume,
            StrokeKind::Sync { .. } => StrokeType::Sync,
        }
    }

    /// Resolution tier; 0 for full-resolution kinds.
    pub fn level_of_detail(&self) -> u32 {
        match self {
            StrokeKind::LodN { level_of_detail, .. } | StrokeKind::Sync { level_of_detail } => {
                *level_of_detail
            }
            _ => 0,
        }
    }

    /// Id of the paired stroke for Lod0 and LodN kinds.
    pub fn buddy(&self) -> Option<StrokeId> {
        match self {
            StrokeKind::Lod0 { buddy } | StrokeKind::LodN { buddy, .. } => Some(*buddy),
            _ => None,
        }
    }
}

pub(crate) struct Stroke {
    id: StrokeId,
    kind: StrokeKind,
    strategy: Box<dyn StrokeStrategy>,
    jobs: VecDeque<StrokeJob>,
    token: CancellationToken,
    initialized: bool,
    ended: bool,
    cancelled: bool,
    suspended: bool,
    prev_job_sequential: bool,
}

impl Stroke {
    /// Create a stroke and queue its strategy's init job.
    pub(crate) fn new(id: StrokeId, kind: StrokeKind, strategy: Box<dyn StrokeStrategy>) -> Self {
        let mut stroke = Self {
            id,
            kind,
            strategy,
            jobs: VecDeque::new(),
            token: CancellationToken::new(),
            initialized: false,
            ended: false,
            cancelled: false,
            suspended: false,
            prev_job_sequential: false,
        };

        if let Some(init) = stroke.strategy.create_init_job() {
            stroke.enqueue(JobRole::Init, init);
        }

        stroke
    }

    pub(crate) fn id(&self) -> StrokeId {
        self.id
    }

    pub(crate) fn kind(&self) -> StrokeKind {
        self.kind
    }

    pub(crate) fn stroke_type(&self) -> StrokeType {
        self.kind.stroke_type()
    }

    pub(crate) fn level_of_detail(&self) -> u32 {
        self.kind.level_of_detail()
    }

    pub(crate) fn buddy(&self) -> Option<StrokeId> {
        self.kind.buddy()
    }

    pub(crate) fn name(&self) -> &str {
        self.strategy.name()
    }

    pub(crate) fn add_job(&mut self, data: Box<dyn JobData>) {
        self.enqueue(JobRole::Dab, data);
    }

    /// Close the stroke; the finish job is queued only the first time.
    pub(crate) fn end_stroke(&mut self) {
        if self.ended {
            return;
        }

        if let Some(finish) = self.strategy.create_finish_job() {
            self.enqueue(JobRole::Finish, finish);
        }
        self.ended = true;
    }

    /// Cancel the stroke.
    ///
    /// Pending cancellable jobs are rolled back. A stroke that already
    /// started gets its strategy's cancel job so it can revert what ran.
    pub(crate) fn cancel_stroke(&mut self) {
        if self.cancelled {
            return;
        }

        self.token.cancel();
        self.clear_queue_on_cancel();

        if self.initialized {
            if let Some(cancel) = self.strategy.create_cancel_job() {
                // The cancel job itself must run to completion
                let job = StrokeJob::new(
                    self.id,
                    self.level_of_detail(),
                    JobRole::Cancel,
                    CancellationToken::new(),
                    cancel,
                );
                self.jobs.push_back(job);
            }
        }

        self.cancelled = true;
        self.ended = true;
    }

    /// Pause this stroke in favour of `recipient`.
    ///
    /// A resume job goes to the front of this stroke and a suspend job to
    /// the front of the recipient. Returns `false` when the stroke is not in
    /// a state that can be suspended or the strategy provides no jobs.
    pub(crate) fn suspend_stroke(&mut self, recipient: &mut Stroke) -> bool {
        if !self.initialized || self.suspended || (self.ended && !self.has_jobs()) {
            return false;
        }

        let (Some(resume), Some(suspend)) = (
            self.strategy.create_resume_job(),
            self.strategy.create_suspend_job(),
        ) else {
            return false;
        };

        let lod = self.level_of_detail();
        self.jobs.push_front(StrokeJob::new(
            self.id,
            lod,
            JobRole::Resume,
            self.token.clone(),
            resume,
        ));
        recipient.jobs.push_front(StrokeJob::new(
            recipient.id,
            lod,
            JobRole::Suspend,
            recipient.token.clone(),
            suspend,
        ));
        self.suspended = true;
        true
    }

    /// Take the next job for dispatch.
    pub(crate) fn pop_one_job(&mut self) -> Option<StrokeJob> {
        let mut job = self.jobs.pop_front()?;

        self.initialized = true;
        self.prev_job_sequential = job.is_sequential();
        if job.role() == JobRole::Resume {
            self.suspended = false;
        }
        job.set_exclusive(self.is_exclusive());

        Some(job)
    }

    pub(crate) fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub(crate) fn num_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn is_exclusive(&self) -> bool {
        self.strategy.is_exclusive()
    }

    pub(crate) fn supports_wrap_around_mode(&self) -> bool {
        self.strategy.supports_wrap_around_mode()
    }

    pub(crate) fn supports_suspension(&self) -> bool {
        self.strategy.supports_suspension()
    }

    pub(crate) fn can_forget_about_me(&self) -> bool {
        self.strategy.can_forget_about_me()
    }

    /// The previously dispatched job required running alone.
    pub(crate) fn prev_job_sequential(&self) -> bool {
        self.prev_job_sequential
    }

    /// The next job to dispatch requires running alone.
    pub(crate) fn next_job_sequential(&self) -> bool {
        self.jobs.front().is_some_and(StrokeJob::is_sequential)
    }

    pub(crate) fn next_job_barrier(&self) -> bool {
        self.jobs.front().is_some_and(StrokeJob::is_barrier)
    }

    fn enqueue(&mut self, role: JobRole, data: Box<dyn JobData>) {
        let job = StrokeJob::new(
            self.id,
            self.level_of_detail(),
            role,
            self.token.clone(),
            data,
        );
        self.jobs.push_back(job);
    }

    fn clear_queue_on_cancel(&mut self) {
        let (kept, dropped): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| !job.is_cancellable());

        self.jobs = kept;
        for job in dropped {
            job.rollback();
        }
    }
}

impl fmt::Debug for Stroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stroke")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name())
            .field("jobs", &self.jobs.len())
            .field("initialized", &self.initialized)
            .field("ended", &self.ended)
            .field("cancelled", &self.cancelled)
            .field("suspended", &self.suspended)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{NoopJob, Sequentiality};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Lifecycle {
        init: bool,
        finish: bool,
        cancel: bool,
        suspension: bool,
    }

    impl StrokeStrategy for Lifecycle {
        fn name(&self) -> &str {
            "lifecycle"
        }

        fn supports_suspension(&self) -> bool {
            self.suspension
        }

        fn create_init_job(&mut self) -> Option<Box<dyn JobData>> {
            self.init.then(|| Box::new(NoopJob::new(Sequentiality::Sequential)) as Box<dyn JobData>)
        }

        fn create_finish_job(&mut self) -> Option<Box<dyn JobData>> {
            self.finish.then(|| Box::new(NoopJob::default()) as Box<dyn JobData>)
        }

        fn create_cancel_job(&mut self) -> Option<Box<dyn JobData>> {
            self.cancel.then(|| Box::new(NoopJob::default()) as Box<dyn JobData>)
        }

        fn create_suspend_job(&mut self) -> Option<Box<dyn JobData>> {
            self.suspension.then(|| Box::new(NoopJob::default()) as Box<dyn JobData>)
        }

        fn create_resume_job(&mut self) -> Option<Box<dyn JobData>> {
            self.suspension.then(|| Box::new(NoopJob::default()) as Box<dyn JobData>)
        }
    }

    struct RollbackJob(Arc<AtomicUsize>, bool);

    impl JobData for RollbackJob {
        fn run(&mut self, _token: &CancellationToken) {}

        fn is_cancellable(&self) -> bool {
            self.1
        }

        fn rollback(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stroke(strategy: Lifecycle) -> Stroke {
        Stroke::new(StrokeId(1), StrokeKind::Legacy, Box::new(strategy))
    }

    #[test]
    fn test_kind_accessors() {
        let lod_n = StrokeKind::LodN {
            level_of_detail: 2,
            buddy: StrokeId(5),
        };
        assert_eq!(lod_n.stroke_type(), StrokeType::LodN);
        assert_eq!(lod_n.level_of_detail(), 2);
        assert_eq!(lod_n.buddy(), Some(StrokeId(5)));

        let sync = StrokeKind::Sync { level_of_detail: 3 };
        assert_eq!(sync.level_of_detail(), 3);
        assert_eq!(sync.buddy(), None);

        assert_eq!(StrokeKind::Lod0 { buddy: StrokeId(9) }.level_of_detail(), 0);
        assert_eq!(StrokeKind::Suspend.stroke_type(), StrokeType::Suspend);
    }

    #[test]
    fn test_init_job_queued_on_creation() {
        let s = stroke(Lifecycle {
            init: true,
            ..Default::default()
        });
        assert_eq!(s.num_jobs(), 1);
        assert!(s.next_job_sequential());
        assert!(!s.is_initialized());
    }

    #[test]
    fn test_finish_job_queued_once() {
        let mut s = stroke(Lifecycle {
            finish: true,
            ..Default::default()
        });
        s.end_stroke();
        s.end_stroke();
        assert!(s.is_ended());
        assert_eq!(s.num_jobs(), 1);
    }

    #[test]
    fn test_pop_tracks_initialization_and_sequentiality() {
        let mut s = stroke(Lifecycle {
            init: true,
            ..Default::default()
        });
        s.add_job(Box::new(NoopJob::default()));

        let init = s.pop_one_job().unwrap();
        assert_eq!(init.role(), JobRole::Init);
        assert!(s.is_initialized());
        assert!(s.prev_job_sequential());

        let dab = s.pop_one_job().unwrap();
        assert_eq!(dab.role(), JobRole::Dab);
        assert!(!s.prev_job_sequential());
        assert!(s.pop_one_job().is_none());
    }

    #[test]
    fn test_cancel_uninitialized_rolls_back_without_cancel_job() {
        let rolled_back = Arc::new(AtomicUsize::new(0));
        let mut s = stroke(Lifecycle {
            cancel: true,
            ..Default::default()
        });
        s.add_job(Box::new(RollbackJob(rolled_back.clone(), true)));
        s.add_job(Box::new(RollbackJob(rolled_back.clone(), true)));

        s.cancel_stroke();
        assert_eq!(rolled_back.load(Ordering::SeqCst), 2);
        assert!(!s.has_jobs());
        assert!(s.is_cancelled());
        assert!(s.is_ended());
    }

    #[test]
    fn test_cancel_initialized_queues_cancel_job() {
        let rolled_back = Arc::new(AtomicUsize::new(0));
        let mut s = stroke(Lifecycle {
            cancel: true,
            ..Default::default()
        });
        s.add_job(Box::new(NoopJob::default()));
        s.add_job(Box::new(RollbackJob(rolled_back.clone(), true)));
        s.add_job(Box::new(RollbackJob(rolled_back.clone(), false)));
        let first = s.pop_one_job().unwrap();
        let token = first.cancellation_token().clone();

        s.cancel_stroke();
        assert!(token.is_cancelled());
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);

        // Non-cancellable job survives, cancel job goes after it
        assert_eq!(s.num_jobs(), 2);
        assert_eq!(s.pop_one_job().unwrap().role(), JobRole::Dab);
        let cancel = s.pop_one_job().unwrap();
        assert_eq!(cancel.role(), JobRole::Cancel);
        assert!(!cancel.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut s = stroke(Lifecycle {
            cancel: true,
            ..Default::default()
        });
        s.add_job(Box::new(NoopJob::default()));
        s.pop_one_job();

        s.cancel_stroke();
        s.cancel_stroke();
        assert_eq!(s.num_jobs(), 1);
    }

    #[test]
    fn test_suspend_requires_initialized_stroke() {
        let mut head = stroke(Lifecycle {
            suspension: true,
            ..Default::default()
        });
        let mut recipient = Stroke::new(
            StrokeId(2),
            StrokeKind::LodN {
                level_of_detail: 1,
                buddy: StrokeId(3),
            },
            Box::new(Lifecycle::default()),
        );

        head.add_job(Box::new(NoopJob::default()));
        assert!(!head.suspend_stroke(&mut recipient));

        head.add_job(Box::new(NoopJob::default()));
        head.pop_one_job();
        assert!(head.suspend_stroke(&mut recipient));
        assert!(head.is_suspended());
        assert!(!head.suspend_stroke(&mut recipient));

        let suspend = recipient.pop_one_job().unwrap();
        assert_eq!(suspend.role(), JobRole::Suspend);
        assert_eq!(suspend.stroke(), StrokeId(2));
        assert_eq!(suspend.level_of_detail(), 0);

        let resume = head.pop_one_job().unwrap();
        assert_eq!(resume.role(), JobRole::Resume);
        assert!(!head.is_suspended());
    }

    #[test]
    fn test_suspend_skipped_for_exhausted_stroke() {
        let mut head = stroke(Lifecycle {
            suspension: true,
            ..Default::default()
        });
        let mut recipient = stroke(Lifecycle::default());
        head.add_job(Box::new(NoopJob::default()));
        head.pop_one_job();
        head.end_stroke();

        assert!(!head.suspend_stroke(&mut recipient));
        assert!(!recipient.has_jobs());
    }
}
