//! The three staging areas a job moves through.
//!
//! `waiting` (priority ordered) → `working` (slot table) → `completed`
//! (priority ordered). A record lives in exactly one of them until the
//! caller retrieves it. [`Stages`] is always accessed under one lock, so a
//! move between stages is atomic to observers.

pub mod container;
pub mod lanes;
pub mod slots;

pub use container::{PriorityContainer, PriorityKey, Prioritized};
pub use lanes::LaneTracker;
pub use slots::{WorkingSlot, WorkingTable};

use serde::{Deserialize, Serialize};

use crate::JobRecord;

/// One of the three stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Waiting,
    Working,
    Completed,
}

impl Stage {
    /// Every stage, in pipeline order
    pub fn all() -> &'static [Stage] {
        &[Self::Waiting, Self::Working, Self::Completed]
    }
}

/// The engine's shared job state
#[derive(Debug)]
pub struct Stages {
    pub waiting: PriorityContainer<JobRecord>,
    pub working: WorkingTable,
    pub completed: PriorityContainer<JobRecord>,
    pub lanes: LaneTracker,
}

impl Stages {
    pub fn new(n_workers: usize) -> Self {
        Self {
            waiting: PriorityContainer::new(),
            working: WorkingTable::new(n_workers),
            completed: PriorityContainer::new(),
            lanes: LaneTracker::new(),
        }
    }

    /// Accept a new job into the waiting stage
    pub fn enqueue(&mut self, record: JobRecord) {
        self.lanes.register(&record);
        self.waiting.insert(record);
    }

    /// Remove the highest-ordered waiting job its lane allows to run.
    ///
    /// Gated jobs are passed over but stay where they are.
    pub fn next_dispatchable(&mut self) -> Option<JobRecord> {
        let key = self
            .waiting
            .iter()
            .find(|record| self.lanes.is_dispatchable(record))
            .map(Prioritized::priority_key)?;
        self.waiting.remove(&key)
    }

    /// Move a terminal record into the completed stage and resolve its lane
    pub fn complete(&mut self, record: JobRecord) {
        self.lanes.resolve(&record, record.is_failed());
        self.completed.insert(record);
    }

    /// Count jobs in the given stages; an empty slice counts every stage
    pub fn size(&self, stages: &[Stage]) -> usize {
        let stages = if stages.is_empty() { Stage::all() } else { stages };
        stages
            .iter()
            .map(|stage| match stage {
                Stage::Waiting => self.waiting.len(),
                Stage::Working => self.working.occupied(),
                Stage::Completed => self.completed.len(),
            })
            .sum()
    }

    /// Drop every waiting job and forget lane state
    pub fn discard_waiting(&mut self) -> Vec<JobRecord> {
        self.lanes.clear();
        self.waiting.drain_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{job::Callable, Job, JobId};

    fn record(id: u64, priority: i32, lane: Option<&str>) -> JobRecord {
        let mut job = Job::new(Callable::program("true")).with_priority(priority);
        if let Some(lane) = lane {
            job = job.with_lane(lane);
        }
        JobRecord::new(JobId(id), job)
    }

    #[test]
    fn test_gated_lane_member_is_passed_over() {
        let mut stages = Stages::new(2);
        stages.enqueue(record(1, 0, Some("l")));
        stages.enqueue(record(2, 9, Some("l")));
        stages.enqueue(record(3, 5, None));

        // Job 2 has the highest priority but must wait for job 1
        let first = stages.next_dispatchable().unwrap();
        assert_eq!(first.id, JobId(3));

        let second = stages.next_dispatchable().unwrap();
        assert_eq!(second.id, JobId(1));

        assert_eq!(stages.size(&[Stage::Waiting]), 1);
    }

    #[test]
    fn test_size_partitions() {
        let mut stages = Stages::new(1);
        stages.enqueue(record(1, 0, None));
        stages.enqueue(record(2, 0, None));

        let mut done = stages.next_dispatchable().unwrap();
        done.skip(1).unwrap();
        stages.complete(done);

        assert_eq!(stages.size(&[Stage::Waiting]), 1);
        assert_eq!(stages.size(&[Stage::Completed]), 1);
        assert_eq!(stages.size(&[Stage::Working]), 0);
        assert_eq!(stages.size(&[]), 2);
        assert_eq!(
            stages.size(&[]),
            stages.size(&[Stage::Waiting]) + stages.size(&[Stage::Working]) + stages.size(&[Stage::Completed])
        );
    }
}
