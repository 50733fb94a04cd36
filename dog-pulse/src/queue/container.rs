use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::{JobId, JobPriority, JobRecord};

/// Ordering key shared by the waiting and completed stages.
///
/// Sorts by priority descending, then by arrival sequence ascending, which
/// gives FIFO order within a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriorityKey {
    priority: Reverse<JobPriority>,
    seq: JobId,
}

impl PriorityKey {
    pub fn new(priority: JobPriority, seq: JobId) -> Self {
        Self {
            priority: Reverse(priority),
            seq,
        }
    }

    pub fn priority(&self) -> JobPriority {
        self.priority.0
    }

    pub fn seq(&self) -> JobId {
        self.seq
    }
}

/// Anything that can be stored in a [`PriorityContainer`]
pub trait Prioritized {
    fn priority_key(&self) -> PriorityKey;
}

impl Prioritized for JobRecord {
    fn priority_key(&self) -> PriorityKey {
        PriorityKey::new(self.priority, self.id)
    }
}

/// Ordered multiset keyed by (priority desc, arrival asc).
///
/// No operation blocks; callers that need to wait poll on top of it.
#[derive(Debug)]
pub struct PriorityContainer<T> {
    items: BTreeMap<PriorityKey, T>,
}

impl<T: Prioritized> PriorityContainer<T> {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    /// Insert an item, O(log n). An item with the same key is replaced and returned.
    pub fn insert(&mut self, item: T) -> Option<T> {
        self.items.insert(item.priority_key(), item)
    }

    /// Highest-ordered item, if any
    pub fn peek_highest(&self) -> Option<&T> {
        self.items.values().next()
    }

    /// Remove and return the highest-ordered item, if any
    pub fn pop_highest(&mut self) -> Option<T> {
        self.items.pop_first().map(|(_, item)| item)
    }

    /// Remove the item with the given key
    pub fn remove(&mut self, key: &PriorityKey) -> Option<T> {
        self.items.remove(key)
    }

    /// Count items matching a predicate
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.items.values().filter(|item| predicate(item)).count()
    }

    /// Remove every item, returned in priority order
    pub fn drain_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items).into_values().collect()
    }

    /// Remove the items matching a predicate, returned in priority order
    pub fn take_where<F>(&mut self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        let keys: Vec<PriorityKey> = self
            .items
            .iter()
            .filter(|(_, item)| predicate(item))
            .map(|(key, _)| *key)
            .collect();

        keys.iter().filter_map(|key| self.items.remove(key)).collect()
    }

    /// Iterate in priority order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Prioritized> Default for PriorityContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}
