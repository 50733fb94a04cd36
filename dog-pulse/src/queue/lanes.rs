use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::{JobId, JobRecord};

/// Per-lane bookkeeping
#[derive(Debug, Default)]
struct LaneState {
    /// Members still in the waiting stage, in submission order
    waiting: BTreeSet<JobId>,

    /// Member currently holding the lane
    active: Option<JobId>,

    /// Whether the most recently resolved member failed
    errored: bool,
}

impl LaneState {
    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.active.is_none()
    }
}

/// Enforces one-at-a-time, submission-ordered execution within a lane.
///
/// Lanes with no waiting or active member are pruned and carry no state
/// forward.
#[derive(Debug, Default)]
pub struct LaneTracker {
    lanes: HashMap<String, LaneState>,
}

impl LaneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly submitted job as its lane's tail
    pub fn register(&mut self, job: &JobRecord) {
        if let Some(lane) = &job.lane {
            self.lanes.entry(lane.clone()).or_default().waiting.insert(job.id);
        }
    }

    /// Whether the job may leave the waiting stage now
    pub fn is_dispatchable(&self, job: &JobRecord) -> bool {
        let Some(lane) = &job.lane else {
            return true;
        };
        match self.lanes.get(lane) {
            Some(state) => state.active.is_none() && state.waiting.first() == Some(&job.id),
            None => true,
        }
    }

    /// Whether the job must be skipped instead of dispatched
    pub fn should_skip(&self, job: &JobRecord) -> bool {
        if !job.skip_on_lane_error {
            return false;
        }
        job.lane
            .as_ref()
            .and_then(|lane| self.lanes.get(lane))
            .is_some_and(|state| state.errored)
    }

    /// Mark the job as its lane's active member
    pub fn dispatch(&mut self, job: &JobRecord) {
        if let Some(state) = job.lane.as_ref().and_then(|lane| self.lanes.get_mut(lane)) {
            state.waiting.remove(&job.id);
            state.active = Some(job.id);
        }
    }

    /// Record a terminal outcome for a lane member.
    ///
    /// A skipped member resolves as failed, so skipping carries on to the
    /// next member that asked for it.
    pub fn resolve(&mut self, job: &JobRecord, failed: bool) {
        let Some(lane) = &job.lane else {
            return;
        };
        let Some(state) = self.lanes.get_mut(lane) else {
            return;
        };

        state.waiting.remove(&job.id);
        if state.active == Some(job.id) {
            state.active = None;
        }
        state.errored = failed;

        if state.is_idle() {
            debug!(lane = %lane, "Pruning idle lane");
            self.lanes.remove(lane);
        }
    }

    /// Number of lanes with pending or active members
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Forget every lane
    pub fn clear(&mut self) {
        self.lanes.clear();
    }
}
