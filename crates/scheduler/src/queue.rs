//! The stroke scheduling queue.
//!
//! Admits strokes, mirrors them onto a low-resolution tier when one is
//! active, and hands the worker pool exactly the jobs that may run now. All
//! state lives behind a single mutex that is held for every admission call
//! and every drain of the queue.

use crate::context::{JobCounts, WorkerPool};
use crate::error::{StrokeError, StrokeResult};
use crate::job::JobData;
use crate::lod::LodSynchronizer;
use crate::strategy::{StrokeFactories, StrokeStrategy};
use crate::stroke::{Stroke, StrokeId, StrokeKind, StrokeType};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, trace, warn};

/// Point-in-time description of a queued stroke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrokeInfo {
    pub id: StrokeId,
    pub kind: StrokeKind,
    pub name: String,
    pub num_jobs: usize,
    pub initialized: bool,
    pub ended: bool,
    pub cancelled: bool,
    pub suspended: bool,
}

impl StrokeInfo {
    fn of(stroke: &Stroke) -> Self {
        Self {
            id: stroke.id(),
            kind: stroke.kind(),
            name: stroke.name().to_string(),
            num_jobs: stroke.num_jobs(),
            initialized: stroke.is_initialized(),
            ended: stroke.is_ended(),
            cancelled: stroke.is_cancelled(),
            suspended: stroke.is_suspended(),
        }
    }

    /// Field-less tag of the stroke's kind.
    pub fn stroke_type(&self) -> StrokeType {
        self.kind.stroke_type()
    }

    /// Resolution tier of the stroke; 0 is full resolution.
    pub fn level_of_detail(&self) -> u32 {
        self.kind.level_of_detail()
    }

    /// The other half of the stroke's buddy pair, if any.
    pub fn buddy(&self) -> Option<StrokeId> {
        self.kind.buddy()
    }
}

/// Ordered collection of strokes feeding a worker pool.
///
/// # Example
///
/// ```
/// use canvas_editor_scheduler::{NamedStrategy, NoopJob, StrokeFactories, StrokesQueue};
///
/// let queue = StrokesQueue::new(StrokeFactories::default());
///
/// let id = queue.start_stroke(Box::new(NamedStrategy::new("fill")));
/// queue.add_job(id, Box::new(NoopJob::default())).unwrap();
/// queue.end_stroke(id).unwrap();
///
/// assert!(!queue.has_opened_strokes());
/// assert_eq!(queue.len(), 1);
/// assert_eq!(queue.current_stroke_name().as_deref(), Some("fill"));
/// ```
pub struct StrokesQueue {
    state: Mutex<QueueState>,
    factories: StrokeFactories,
}

struct QueueState {
    strokes: HashMap<StrokeId, Stroke>,
    order: VecDeque<StrokeId>,
    next_id: u64,
    opened_strokes: usize,
    needs_exclusive_access: bool,
    wrap_around_mode_supported: bool,
    /// The last dispatched job came from an exclusive stroke.
    exclusive_job_dispatched: bool,
    lod: LodSynchronizer,
}

impl StrokesQueue {
    /// Create an empty queue using `factories` for injected strokes.
    pub fn new(factories: StrokeFactories) -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            factories,
        }
    }

    /// Admit a new stroke and return its id.
    ///
    /// When a non-zero level of detail is active and the strategy can be
    /// cloned for it, the stroke is admitted as the Lod0 half of a buddy
    /// pair and the clone is queued ahead of it as the LodN half. Otherwise
    /// it becomes a legacy stroke at the tail.
    pub fn start_stroke(&self, strategy: Box<dyn StrokeStrategy>) -> StrokeId {
        let mut state = self.state.lock();

        state.cancel_forgettable_strokes();

        let desired = state.lod.desired();
        let lod_strategy = if desired != 0
            && self.factories.has_lod_sync_factory()
            && state.can_use_lod_n()
        {
            strategy.create_lod_clone(desired)
        } else {
            None
        };

        let id = match lod_strategy {
            Some(lod_strategy) => {
                state.admit_buddy_pair(strategy, lod_strategy, desired, &self.factories)
            }
            None => state.admit_legacy(strategy),
        };

        state.opened_strokes += 1;
        id
    }

    /// Append a job to a stroke.
    ///
    /// If the stroke has a buddy, a clone of the job is appended to the
    /// buddy first. A job that cannot produce that clone is rejected and
    /// neither stroke receives anything.
    pub fn add_job(&self, id: StrokeId, data: Box<dyn JobData>) -> StrokeResult<()> {
        let mut state = self.state.lock();

        let Some(stroke) = state.strokes.get(&id) else {
            warn!(stroke = %id, "add_job on a stroke that is no longer queued");
            return Err(StrokeError::StrokeNotFound(id));
        };
        if stroke.is_ended() {
            return Err(StrokeError::StrokeEnded(id));
        }

        // An open stroke's buddy is open too, so it cannot have left the queue
        let buddy_id = stroke.buddy();
        let buddy = buddy_id.and_then(|b| state.strokes.get_mut(&b));
        debug_assert!(buddy_id.is_none() || buddy.is_some(), "{id} lost its buddy");
        if let Some(buddy) = buddy {
            let level_of_detail = buddy.level_of_detail();
            let Some(clone) = data.create_lod_clone(level_of_detail) else {
                error!(
                    stroke = %id,
                    lod = level_of_detail,
                    "job cannot be cloned for the buddy stroke"
                );
                return Err(StrokeError::LodCloneUnavailable {
                    stroke: id,
                    level_of_detail,
                });
            };
            buddy.add_job(clone);
        }

        if let Some(stroke) = state.strokes.get_mut(&id) {
            stroke.add_job(data);
        }
        Ok(())
    }

    /// Close a stroke and its buddy.
    pub fn end_stroke(&self, id: StrokeId) -> StrokeResult<()> {
        let mut state = self.state.lock();

        let Some(stroke) = state.strokes.get_mut(&id) else {
            warn!(stroke = %id, "end_stroke on a stroke that is no longer queued");
            return Err(StrokeError::StrokeNotFound(id));
        };
        if stroke.is_ended() {
            return Err(StrokeError::StrokeEnded(id));
        }

        stroke.end_stroke();
        let buddy = stroke.buddy();
        if let Some(buddy) = buddy.and_then(|b| state.strokes.get_mut(&b)) {
            buddy.end_stroke();
        }
        state.opened_strokes = state.opened_strokes.saturating_sub(1);

        debug!(stroke = %id, "stroke ended");
        Ok(())
    }

    /// Cancel a stroke and its buddy.
    ///
    /// Pending jobs are rolled back and running jobs see their
    /// cancellation token tripped. Returns `false` if the id no longer
    /// resolves.
    pub fn cancel_stroke(&self, id: StrokeId) -> bool {
        let mut state = self.state.lock();

        let Some(stroke) = state.strokes.get(&id) else {
            return false;
        };
        let was_open = !stroke.is_ended();

        state.cancel_with_buddy(id);
        if was_open {
            state.opened_strokes = state.opened_strokes.saturating_sub(1);
        }

        debug!(stroke = %id, "stroke cancelled");
        true
    }

    /// Cancel everything queued, if that cannot race with execution.
    ///
    /// Only acts when every queued stroke has been closed by its owner and
    /// `pool` has nothing in flight. Returns whether anything was cancelled.
    pub fn try_cancel_current_stroke_async<P>(&self, pool: &P) -> bool
    where
        P: WorkerPool + ?Sized,
    {
        let mut state = self.state.lock();

        if state.order.is_empty() || state.has_unfinished_strokes() {
            return false;
        }
        if !pool.job_counts().is_idle() {
            return false;
        }

        let QueueState {
            strokes, order, lod, ..
        } = &mut *state;
        for id in order.iter() {
            if let Some(stroke) = strokes.get_mut(id) {
                stroke.cancel_stroke();

                // A finished LodN buddy keeps no undo data, so the only way
                // back is regenerating the cache
                if stroke.stroke_type() == StrokeType::Lod0 {
                    lod.mark_stale();
                }
            }
        }

        debug!(strokes = order.len(), "cancelled all queued strokes");
        true
    }

    /// Feed `pool` with admissible jobs until it is full or nothing can run.
    ///
    /// The caller must hold the pool's own lock for the duration, which the
    /// `&mut` borrow enforces.
    pub fn process_queue<P>(&self, pool: &mut P, external_jobs_pending: bool)
    where
        P: WorkerPool + ?Sized,
    {
        let mut state = self.state.lock();

        while pool.has_spare_capacity()
            && state.process_one_job(pool, external_jobs_pending, &self.factories)
        {}
    }

    /// Record the level of detail new strokes should be mirrored onto.
    ///
    /// The switch happens right away when only legacy strokes are queued,
    /// and is retried every time a stroke leaves otherwise.
    pub fn set_desired_level_of_detail(&self, level_of_detail: u32) {
        let mut state = self.state.lock();

        if !state.lod.set_next_desired(level_of_detail) {
            return;
        }
        debug!(lod = state.lod.next_desired(), "desired level of detail changed");
        state.switch_desired_level_of_detail(false, &self.factories);
    }

    /// Rebuild the low-resolution cache even if the target did not change.
    pub fn explicit_regenerate_level_of_detail(&self) {
        let mut state = self.state.lock();
        state.switch_desired_level_of_detail(true, &self.factories);
    }

    /// The canvas changed in a way the low-resolution cache cannot follow.
    pub fn notify_canvas_changed_structurally(&self) {
        self.state.lock().lod.mark_stale();
    }

    /// Whether some stroke was started and not yet ended or cancelled.
    pub fn has_opened_strokes(&self) -> bool {
        self.state.lock().opened_strokes > 0
    }

    /// Whether no stroke is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().order.is_empty()
    }

    /// Number of queued strokes.
    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Rough amount of pending work.
    pub fn size_metric(&self) -> usize {
        let state = self.state.lock();
        match state.head() {
            Some(head) => head.num_jobs().max(1) * state.order.len(),
            None => 0,
        }
    }

    /// Name of the stroke at the head of the queue.
    pub fn current_stroke_name(&self) -> Option<String> {
        let state = self.state.lock();
        state.head().map(|head| head.name().to_string())
    }

    /// Exclusivity of the stroke that most recently started executing.
    pub fn needs_exclusive_access(&self) -> bool {
        self.state.lock().needs_exclusive_access
    }

    /// Whether the stroke that most recently started executing supports wrap-around mode.
    pub fn wrap_around_mode_supported(&self) -> bool {
        self.state.lock().wrap_around_mode_supported
    }

    /// Level of detail new strokes are currently mirrored onto.
    pub fn desired_level_of_detail(&self) -> u32 {
        self.state.lock().lod.desired()
    }

    /// Whether the low-resolution cache has to be rebuilt before it is used again.
    pub fn lod_needs_synchronization(&self) -> bool {
        self.state.lock().lod.needs_synchronization()
    }

    /// All queued strokes in dispatch order.
    pub fn snapshot(&self) -> Vec<StrokeInfo> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.strokes.get(id))
            .map(StrokeInfo::of)
            .collect()
    }

    /// Description of a single stroke, or `None` once it left the queue.
    pub fn stroke_info(&self, id: StrokeId) -> Option<StrokeInfo> {
        self.state.lock().strokes.get(&id).map(StrokeInfo::of)
    }
}

impl Default for StrokesQueue {
    fn default() -> Self {
        Self::new(StrokeFactories::default())
    }
}

impl Drop for StrokesQueue {
    fn drop(&mut self) {
        for stroke in self.state.get_mut().strokes.values_mut() {
            stroke.cancel_stroke();
        }
    }
}

impl std::fmt::Debug for StrokesQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StrokesQueue")
            .field("strokes", &state.order.len())
            .field("opened_strokes", &state.opened_strokes)
            .field("lod", &state.lod)
            .field("factories", &self.factories)
            .finish()
    }
}

impl QueueState {
    fn new() -> Self {
        Self {
            strokes: HashMap::new(),
            order: VecDeque::new(),
            next_id: 1,
            opened_strokes: 0,
            needs_exclusive_access: false,
            wrap_around_mode_supported: false,
            exclusive_job_dispatched: false,
            lod: LodSynchronizer::new(),
        }
    }

    fn alloc_id(&mut self) -> StrokeId {
        let id = StrokeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn head(&self) -> Option<&Stroke> {
        self.order.front().and_then(|id| self.strokes.get(id))
    }

    fn head_mut(&mut self) -> Option<&mut Stroke> {
        let id = *self.order.front()?;
        self.strokes.get_mut(&id)
    }

    fn ordered(&self) -> impl Iterator<Item = &Stroke> + '_ {
        self.order.iter().filter_map(|id| self.strokes.get(id))
    }

    fn insert(&mut self, index: usize, stroke: Stroke) {
        let id = stroke.id();
        self.strokes.insert(id, stroke);
        self.order.insert(index, id);
    }

    fn has_unfinished_strokes(&self) -> bool {
        self.ordered().any(|stroke| !stroke.is_ended())
    }

    /// No legacy stroke is queued, so new strokes may get a LodN buddy.
    fn can_use_lod_n(&self) -> bool {
        self.ordered()
            .all(|stroke| stroke.stroke_type() != StrokeType::Legacy)
    }

    fn only_legacy_queued(&self) -> bool {
        self.ordered()
            .all(|stroke| stroke.stroke_type() == StrokeType::Legacy)
    }

    fn should_wrap_in_suspend_updates_stroke(&self) -> bool {
        !self
            .ordered()
            .any(|stroke| !stroke.is_cancelled() && stroke.stroke_type() == StrokeType::Resume)
    }

    /// Before the first live resume stroke, or the tail.
    fn find_new_lod0_pos(&self) -> usize {
        self.ordered()
            .position(|stroke| {
                !stroke.is_cancelled() && stroke.stroke_type() == StrokeType::Resume
            })
            .unwrap_or(self.order.len())
    }

    /// Before the first live full-resolution stroke of a pair, or the tail.
    fn find_new_lod_n_pos(&self) -> usize {
        self.ordered()
            .position(|stroke| {
                !stroke.is_cancelled()
                    && matches!(
                        stroke.stroke_type(),
                        StrokeType::Lod0 | StrokeType::Suspend | StrokeType::Resume
                    )
            })
            .unwrap_or(self.order.len())
    }

    /// Silently drop forgettable strokes once nobody holds an open stroke.
    fn cancel_forgettable_strokes(&mut self) {
        if self.order.is_empty() || self.has_unfinished_strokes() {
            return;
        }

        let forgettable: Vec<StrokeId> = self
            .ordered()
            .filter(|stroke| !stroke.is_cancelled() && stroke.can_forget_about_me())
            .map(Stroke::id)
            .collect();

        for id in forgettable {
            trace!(stroke = %id, "forgetting finished stroke");
            self.cancel_with_buddy(id);
        }
    }

    fn cancel_with_buddy(&mut self, id: StrokeId) {
        let Some(stroke) = self.strokes.get_mut(&id) else {
            return;
        };
        stroke.cancel_stroke();

        let buddy = stroke.buddy();
        if let Some(buddy) = buddy.and_then(|b| self.strokes.get_mut(&b)) {
            buddy.cancel_stroke();
        }
    }

    fn admit_legacy(&mut self, strategy: Box<dyn StrokeStrategy>) -> StrokeId {
        let id = self.alloc_id();
        self.insert(self.order.len(), Stroke::new(id, StrokeKind::Legacy, strategy));

        // Legacy strokes bypass the low-resolution cache
        self.lod.mark_stale();

        debug!(stroke = %id, "admitted legacy stroke");
        id
    }

    fn admit_buddy_pair(
        &mut self,
        strategy: Box<dyn StrokeStrategy>,
        lod_strategy: Box<dyn StrokeStrategy>,
        level_of_detail: u32,
        factories: &StrokeFactories,
    ) -> StrokeId {
        let lod0_id = self.alloc_id();
        let lod_n_id = self.alloc_id();

        let lod_n = Stroke::new(
            lod_n_id,
            StrokeKind::LodN {
                level_of_detail,
                buddy: lod0_id,
            },
            lod_strategy,
        );
        let lod0 = Stroke::new(lod0_id, StrokeKind::Lod0 { buddy: lod_n_id }, strategy);

        // Low-resolution work, with a cache rebuild in front of it if needed
        let lod_n_pos = self.find_new_lod_n_pos();
        let mut low_res = Vec::with_capacity(2);
        if self.lod.needs_synchronization() {
            if let Some(sync) = self.build_sync_stroke(level_of_detail, false, factories) {
                low_res.push(sync);
            }
        }
        low_res.push(lod_n);
        let lod_n_index = low_res.len() - 1;

        if lod_n_pos == 0 {
            if let Some(head) = self.head_mut() {
                if head.supports_suspension() && head.suspend_stroke(&mut low_res[lod_n_index]) {
                    debug!(stroke = %head.id(), "suspended head in favour of low-resolution work");
                }
            }
        }
        for (offset, stroke) in low_res.into_iter().enumerate() {
            self.insert(lod_n_pos + offset, stroke);
        }

        let bracket = if self.should_wrap_in_suspend_updates_stroke() {
            factories.create_bracket_strategies()
        } else {
            None
        };

        let pos = self.find_new_lod0_pos();
        match bracket {
            Some((suspend_strategy, resume_strategy)) => {
                let suspend_id = self.alloc_id();
                let mut suspend = Stroke::new(suspend_id, StrokeKind::Suspend, suspend_strategy);
                suspend.end_stroke();

                let resume_id = self.alloc_id();
                let mut resume = Stroke::new(resume_id, StrokeKind::Resume, resume_strategy);
                resume.end_stroke();

                self.insert(pos, resume);
                self.insert(pos, lod0);
                self.insert(pos, suspend);
            }
            None => self.insert(pos, lod0),
        }

        debug!(
            stroke = %lod0_id,
            buddy = %lod_n_id,
            lod = level_of_detail,
            position = lod_n_pos,
            "admitted buddy pair"
        );
        lod0_id
    }

    /// Closed stroke regenerating the low-resolution cache.
    fn build_sync_stroke(
        &mut self,
        level_of_detail: u32,
        forgettable: bool,
        factories: &StrokeFactories,
    ) -> Option<Stroke> {
        let factory = factories.lod_sync.as_ref()?;
        let (strategy, jobs) = factory(forgettable);

        let id = self.alloc_id();
        let mut sync = Stroke::new(id, StrokeKind::Sync { level_of_detail }, strategy);
        for job in jobs {
            sync.add_job(job);
        }
        sync.end_stroke();
        self.lod.mark_synchronized();

        debug!(stroke = %id, lod = level_of_detail, forgettable, "injected lod sync stroke");
        Some(sync)
    }

    fn switch_desired_level_of_detail(&mut self, forced: bool, factories: &StrokeFactories) {
        let only_legacy = self.only_legacy_queued();
        let Some(request) = self.lod.switch(forced, only_legacy) else {
            return;
        };

        if let Some(sync) =
            self.build_sync_stroke(request.level_of_detail, request.forgettable, factories)
        {
            self.insert(self.order.len(), sync);
        }
    }

    fn process_one_job<P>(
        &mut self,
        pool: &mut P,
        external_jobs_pending: bool,
        factories: &StrokeFactories,
    ) -> bool
    where
        P: WorkerPool + ?Sized,
    {
        let counts = pool.job_counts();
        let running_lod = pool.current_level_of_detail();

        if !(self.check_stroke_state(counts.stroke_jobs > 0, running_lod, factories)
            && self.check_exclusive_property(counts)
            && self.check_sequential_property(counts)
            && self.check_barrier_property(counts, external_jobs_pending))
        {
            return false;
        }

        let Some(job) = self.head_mut().and_then(Stroke::pop_one_job) else {
            return false;
        };
        self.exclusive_job_dispatched = job.is_exclusive();

        trace!(
            stroke = %job.stroke(),
            role = ?job.role(),
            lod = job.level_of_detail(),
            "dispatching job"
        );
        pool.add_job(job);
        true
    }

    /// Make sure the head can start or continue, dropping exhausted strokes.
    fn check_stroke_state(
        &mut self,
        has_stroke_jobs_running: bool,
        running_lod: Option<u32>,
        factories: &StrokeFactories,
    ) -> bool {
        loop {
            let Some(head) = self.head() else {
                return false;
            };

            // Tiers never interleave in flight
            let lod_compatible = running_lod.map_or(true, |lod| lod == head.level_of_detail());
            let has_jobs = head.has_jobs();
            let id = head.id();

            if has_jobs && lod_compatible {
                if !head.is_initialized() {
                    let exclusive = head.is_exclusive();
                    let wrap_around = head.supports_wrap_around_mode();
                    self.needs_exclusive_access = exclusive;
                    self.wrap_around_mode_supported = wrap_around;
                }
                return true;
            }

            // A stroke cancelled before it started ends up here without ever
            // being initialized
            if head.is_ended() && !has_jobs && !has_stroke_jobs_running {
                self.order.pop_front();
                self.strokes.remove(&id);
                self.needs_exclusive_access = false;
                self.wrap_around_mode_supported = false;
                trace!(stroke = %id, "stroke finished");

                self.switch_desired_level_of_detail(false, factories);
                continue;
            }

            return false;
        }
    }

    fn check_exclusive_property(&self, counts: JobCounts) -> bool {
        let Some(head) = self.head() else {
            return false;
        };

        if head.is_exclusive() {
            counts.is_idle()
        } else {
            !(self.exclusive_job_dispatched && counts.stroke_jobs > 0)
        }
    }

    fn check_sequential_property(&self, counts: JobCounts) -> bool {
        let Some(head) = self.head() else {
            return false;
        };

        if !head.prev_job_sequential() && !head.next_job_sequential() {
            return true;
        }
        counts.stroke_jobs == 0
    }

    fn check_barrier_property(&self, counts: JobCounts, external_jobs_pending: bool) -> bool {
        let Some(head) = self.head() else {
            return false;
        };

        if !head.next_job_barrier() {
            return true;
        }
        counts.is_idle() && !external_jobs_pending
    }
}
