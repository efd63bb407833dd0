//! Level-of-detail bookkeeping.
//!
//! Tracks which resolution tier new strokes should be mirrored onto and
//! whether the low-resolution cache is stale. The synchronizer only makes
//! decisions; the queue injects the synchronization strokes it asks for.

/// Request to rebuild the low-resolution cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncRequest {
    pub level_of_detail: u32,

    /// The cache was already fresh and this rebuild may be dropped silently.
    pub forgettable: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct LodSynchronizer {
    desired: u32,
    next_desired: u32,
    needs_synchronization: bool,
}

impl LodSynchronizer {
    /// Starts at full resolution with a stale cache.
    pub(crate) fn new() -> Self {
        Self {
            desired: 0,
            next_desired: 0,
            needs_synchronization: true,
        }
    }

    /// Level of detail new buddy pairs are created for.
    pub(crate) fn desired(&self) -> u32 {
        self.desired
    }

    pub(crate) fn next_desired(&self) -> u32 {
        self.next_desired
    }

    pub(crate) fn needs_synchronization(&self) -> bool {
        self.needs_synchronization
    }

    pub(crate) fn mark_stale(&mut self) {
        self.needs_synchronization = true;
    }

    pub(crate) fn mark_synchronized(&mut self) {
        self.needs_synchronization = false;
    }

    /// Record a new target. Returns `false` when it matches the current one.
    pub(crate) fn set_next_desired(&mut self, level_of_detail: u32) -> bool {
        if level_of_detail == self.next_desired {
            return false;
        }
        self.next_desired = level_of_detail;
        true
    }

    /// Try to move to the recorded target.
    ///
    /// Nothing happens while non-legacy strokes are queued (`only_legacy`
    /// is false); the queue retries every time a stroke leaves. A returned
    /// request means the new tier is non-zero and its cache has to be
    /// rebuilt.
    pub(crate) fn switch(&mut self, forced: bool, only_legacy: bool) -> Option<SyncRequest> {
        if !forced && self.next_desired == self.desired {
            return None;
        }
        if !only_legacy {
            return None;
        }

        let forgettable =
            forced && !self.needs_synchronization && self.desired == self.next_desired;

        self.desired = self.next_desired;
        self.needs_synchronization |= !forgettable;

        (self.desired != 0).then_some(SyncRequest {
            level_of_detail: self.desired,
            forgettable,
        })
    }
}

impl Default for LodSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}
