//! End-to-end tests driving a strokes queue with real worker threads.

use canvas_editor_scheduler::{
    CancellationToken, JobData, NamedStrategy, NoopJob, Sequentiality, StrokeFactories,
    StrokeStrategy, StrokeType, StrokesQueue, ThreadedUpdater, WorkerPoolConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records the level of detail it ran at.
struct RecordJob {
    level_of_detail: u32,
    log: Arc<Mutex<Vec<u32>>>,
}

impl JobData for RecordJob {
    fn run(&mut self, _token: &CancellationToken) {
        thread::sleep(Duration::from_millis(1));
        self.log.lock().push(self.level_of_detail);
    }

    fn create_lod_clone(&self, level_of_detail: u32) -> Option<Box<dyn JobData>> {
        Some(Box::new(RecordJob {
            level_of_detail,
            log: self.log.clone(),
        }))
    }
}

#[derive(Clone)]
struct BrushStrategy {
    exclusive: bool,
}

impl StrokeStrategy for BrushStrategy {
    fn name(&self) -> &str {
        "brush"
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    fn create_lod_clone(&self, _level_of_detail: u32) -> Option<Box<dyn StrokeStrategy>> {
        Some(Box::new(self.clone()))
    }
}

#[test]
fn test_low_resolution_work_runs_first() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));

    let sync_log = log.clone();
    let factories = StrokeFactories::new()
        .with_lod_sync_factory(move |_forgettable| {
            let strategy: Box<dyn StrokeStrategy> = Box::new(NamedStrategy::new("lod-sync"));
            let jobs: Vec<Box<dyn JobData>> = vec![Box::new(RecordJob {
                level_of_detail: 1,
                log: sync_log.clone(),
            })];
            (strategy, jobs)
        })
        .with_suspend_factory(|| Box::new(NamedStrategy::new("suspend")))
        .with_resume_factory(|| Box::new(NamedStrategy::new("resume")));

    let queue = Arc::new(StrokesQueue::new(factories));
    queue.set_desired_level_of_detail(1);

    let id = queue.start_stroke(Box::new(BrushStrategy { exclusive: false }));
    assert_eq!(queue.stroke_info(id).unwrap().stroke_type(), StrokeType::Lod0);
    for _ in 0..8 {
        queue
            .add_job(
                id,
                Box::new(RecordJob {
                    level_of_detail: 0,
                    log: log.clone(),
                }),
            )
            .unwrap();
    }
    queue.end_stroke(id).unwrap();

    let updater = ThreadedUpdater::new(queue.clone(), WorkerPoolConfig::new(4)).unwrap();
    updater.process_queue();
    assert!(updater.wait_for_idle_timeout(TIMEOUT));
    assert!(queue.is_empty());

    let log = log.lock();
    assert_eq!(log.len(), 17);
    // Nine low-resolution entries (sync + clones), then full resolution
    assert!(log[..9].iter().all(|lod| *lod == 1));
    assert!(log[9..].iter().all(|lod| *lod == 0));

    updater.shutdown();
}

/// Tracks how many jobs run at once and flags exclusive jobs that overlap.
struct OverlapJob {
    exclusive: bool,
    active: Arc<AtomicUsize>,
    violated: Arc<AtomicBool>,
    runs: Arc<AtomicUsize>,
}

impl JobData for OverlapJob {
    fn run(&mut self, _token: &CancellationToken) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        if self.exclusive && now > 1 {
            self.violated.store(true, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_millis(3));
        if self.exclusive && self.active.load(Ordering::SeqCst) > 1 {
            self.violated.store(true, Ordering::SeqCst);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_exclusive_stroke_never_overlaps() {
    init_tracing();
    let queue = Arc::new(StrokesQueue::default());
    let updater = ThreadedUpdater::new(queue.clone(), WorkerPoolConfig::new(4)).unwrap();

    let active = Arc::new(AtomicUsize::new(0));
    let violated = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(AtomicUsize::new(0));
    let job = |exclusive| {
        Box::new(OverlapJob {
            exclusive,
            active: active.clone(),
            violated: violated.clone(),
            runs: runs.clone(),
        })
    };

    for exclusive in [false, true, false, true] {
        let id = queue.start_stroke(Box::new(BrushStrategy { exclusive }));
        for _ in 0..6 {
            queue.add_job(id, job(exclusive)).unwrap();
        }
        queue.end_stroke(id).unwrap();
    }

    updater.process_queue();
    assert!(updater.wait_for_idle_timeout(TIMEOUT));

    assert_eq!(runs.load(Ordering::SeqCst), 24);
    assert!(!violated.load(Ordering::SeqCst));
    assert!(queue.is_empty());
}

/// Spins until its stroke is cancelled.
struct SpinJob {
    started: crossbeam::channel::Sender<()>,
    observed_cancel: Arc<AtomicBool>,
}

impl JobData for SpinJob {
    fn run(&mut self, token: &CancellationToken) {
        let _ = self.started.send(());
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if token.is_cancelled() {
                self.observed_cancel.store(true, Ordering::SeqCst);
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn test_running_job_observes_cancellation() {
    init_tracing();
    let queue = Arc::new(StrokesQueue::default());
    let updater = ThreadedUpdater::new(queue.clone(), WorkerPoolConfig::new(2)).unwrap();

    let (started, on_start) = crossbeam::channel::bounded(1);
    let observed_cancel = Arc::new(AtomicBool::new(false));
    let id = queue.start_stroke(Box::new(NamedStrategy::new("smudge")));
    queue
        .add_job(
            id,
            Box::new(SpinJob {
                started,
                observed_cancel: observed_cancel.clone(),
            }),
        )
        .unwrap();
    queue.add_job(id, Box::new(NoopJob::new(Sequentiality::Sequential))).unwrap();

    updater.process_queue();
    on_start.recv_timeout(TIMEOUT).unwrap();

    assert!(queue.cancel_stroke(id));
    assert!(updater.wait_for_idle_timeout(TIMEOUT));
    assert!(observed_cancel.load(Ordering::SeqCst));

    // The cancelled stroke was released once its running job returned
    assert!(queue.is_empty());
    assert!(!queue.cancel_stroke(id));
}

#[test]
fn test_try_cancel_through_updater() {
    init_tracing();
    let queue = Arc::new(StrokesQueue::default());
    let updater = ThreadedUpdater::new(queue.clone(), WorkerPoolConfig::new(2)).unwrap();
    updater.set_external_jobs_pending(true);

    let id = queue.start_stroke(Box::new(NamedStrategy::new("fill")));
    queue.add_job(id, Box::new(NoopJob::new(Sequentiality::Barrier))).unwrap();
    assert!(!updater.try_cancel_current_stroke());

    queue.end_stroke(id).unwrap();
    updater.process_queue();
    assert!(updater.try_cancel_current_stroke());
    assert!(updater.wait_for_idle_timeout(TIMEOUT));
    assert!(queue.is_empty());
}
