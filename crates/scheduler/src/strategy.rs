//! Stroke strategies and the factories for synthetic strokes.

use crate::job::JobData;

/// Per-stroke behaviour supplied by whoever opens the stroke.
///
/// A strategy describes how its stroke must be scheduled and can contribute
/// lifecycle jobs of its own. Everything except [`name`](StrokeStrategy::name)
/// has a default, so a plain strategy is a one-liner.
pub trait StrokeStrategy: Send {
    /// Human readable name, reported by `current_stroke_name`.
    fn name(&self) -> &str;

    /// Exclusive strokes never overlap execution with any other job.
    fn is_exclusive(&self) -> bool {
        false
    }

    fn supports_wrap_around_mode(&self) -> bool {
        false
    }

    /// Whether a running stroke may be paused in favour of new LodN work.
    fn supports_suspension(&self) -> bool {
        false
    }

    /// Ended strokes that report `true` are cancelled silently the next
    /// time a stroke is started while nothing else is open.
    fn can_forget_about_me(&self) -> bool {
        false
    }

    /// Clone this strategy for a downscaled copy of the stroke.
    ///
    /// Returning `None` forces the stroke to be admitted as a legacy stroke
    /// that works on full resolution only.
    fn create_lod_clone(&self, _level_of_detail: u32) -> Option<Box<dyn StrokeStrategy>> {
        None
    }

    /// Job queued when the stroke is created.
    fn create_init_job(&mut self) -> Option<Box<dyn JobData>> {
        None
    }

    /// Job queued when the stroke is closed.
    fn create_finish_job(&mut self) -> Option<Box<dyn JobData>> {
        None
    }

    /// Job queued when an initialized stroke is cancelled.
    fn create_cancel_job(&mut self) -> Option<Box<dyn JobData>> {
        None
    }

    /// Job inserted ahead of the new LodN stroke when this one is suspended.
    fn create_suspend_job(&mut self) -> Option<Box<dyn JobData>> {
        None
    }

    /// Job put back at the front of this stroke when it is suspended.
    fn create_resume_job(&mut self) -> Option<Box<dyn JobData>> {
        None
    }
}

/// Output of the lod-sync factory: the strategy of the synchronization
/// stroke plus the jobs that rebuild the low-resolution cache.
pub type LodSyncStroke = (Box<dyn StrokeStrategy>, Vec<Box<dyn JobData>>);

/// Builds a synchronization stroke; the flag tells whether it is forgettable.
pub type LodSyncFactory = Box<dyn Fn(bool) -> LodSyncStroke + Send + Sync>;

/// Builds the strategy of a synthetic suspend or resume stroke.
pub type StrokeStrategyFactory = Box<dyn Fn() -> Box<dyn StrokeStrategy> + Send + Sync>;

/// Factories for the strokes the queue injects on its own.
///
/// Without a lod-sync factory the queue never creates low-resolution
/// buddies. Without both suspend and resume factories the Lod0 half of a
/// pair is not bracketed.
#[derive(Default)]
pub struct StrokeFactories {
    pub(crate) lod_sync: Option<LodSyncFactory>,
    pub(crate) suspend: Option<StrokeStrategyFactory>,
    pub(crate) resume: Option<StrokeStrategyFactory>,
}

impl StrokeFactories {
    /// Create a set of factories with nothing configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the factory building lod-sync strokes.
    pub fn with_lod_sync_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(bool) -> LodSyncStroke + Send + Sync + 'static,
    {
        self.lod_sync = Some(Box::new(factory));
        self
    }

    /// Set the factory building the strategy of suspend strokes.
    pub fn with_suspend_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn StrokeStrategy> + Send + Sync + 'static,
    {
        self.suspend = Some(Box::new(factory));
        self
    }

    /// Set the factory building the strategy of resume strokes.
    pub fn with_resume_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn StrokeStrategy> + Send + Sync + 'static,
    {
        self.resume = Some(Box::new(factory));
        self
    }

    /// Whether low-resolution buddies can be created at all.
    pub fn has_lod_sync_factory(&self) -> bool {
        self.lod_sync.is_some()
    }

    /// Strategies for a suspend/resume pair bracketing a Lod0 stroke.
    ///
    /// Returns `None` unless both factories are configured.
    pub(crate) fn create_bracket_strategies(
        &self,
    ) -> Option<(Box<dyn StrokeStrategy>, Box<dyn StrokeStrategy>)> {
        match (&self.suspend, &self.resume) {
            (Some(suspend), Some(resume)) => Some((suspend(), resume())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StrokeFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrokeFactories")
            .field("lod_sync", &self.lod_sync.is_some())
            .field("suspend", &self.suspend.is_some())
            .field("resume", &self.resume.is_some())
            .finish()
    }
}

/// Strategy with a fixed name and default behaviour everywhere else.
///
/// Handy for synthetic strokes that only need a label.
#[derive(Debug, Clone)]
pub struct NamedStrategy {
    name: String,
}

impl NamedStrategy {
    /// Create a strategy reporting `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StrokeStrategy for NamedStrategy {
    fn name(&self) -> &str {
        &self.name
    }
}
