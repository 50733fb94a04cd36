use crate::{execution::WorkerHandle, JobRecord};

/// A job in flight together with its worker
#[derive(Debug)]
pub struct WorkingSlot {
    pub record: JobRecord,
    pub handle: WorkerHandle,
}

/// Fixed-size table of working slots, one per unit of worker concurrency
#[derive(Debug)]
pub struct WorkingTable {
    slots: Vec<Option<WorkingSlot>>,
}

impl WorkingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.occupied()
    }

    /// Place a job in the first free slot, handing it back if the table is full
    pub fn occupy(&mut self, slot: WorkingSlot) -> Result<usize, WorkingSlot> {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(slot);
                Ok(index)
            }
            None => Err(slot),
        }
    }

    /// Free a slot, returning its occupant
    pub fn release(&mut self, index: usize) -> Option<WorkingSlot> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Occupied slots with their indices
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut WorkingSlot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|slot| (index, slot)))
    }

    /// Occupied slots
    pub fn iter(&self) -> impl Iterator<Item = &WorkingSlot> {
        self.slots.iter().flatten()
    }

    /// Empty every slot
    pub fn drain(&mut self) -> Vec<WorkingSlot> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
