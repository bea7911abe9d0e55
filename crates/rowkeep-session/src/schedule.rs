//! Pending operation schedule.
//!
//! Each entity handle has at most one pending operation, so insert, update
//! and delete sets are disjoint by construction. Within one operation kind,
//! entities come back in the order they were (last) scheduled.

use crate::EntityHandle;
use rowkeep_core::PersistOp;
use std::collections::HashMap;

/// A scheduled operation and its position in scheduling order.
#[derive(Debug, Clone, Copy)]
struct Slot {
    op: PersistOp,
    seq: u64,
}

/// Pending insert / update / delete operations keyed by entity handle.
#[derive(Debug, Default)]
pub struct OperationSchedule {
    pending: HashMap<EntityHandle, Slot>,
    next_seq: u64,
}

impl OperationSchedule {
    /// Create an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `op` for the handle, replacing any pending operation.
    ///
    /// Returns the operation that was replaced.
    pub fn schedule(&mut self, handle: EntityHandle, op: PersistOp) -> Option<PersistOp> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending
            .insert(handle, Slot { op, seq })
            .map(|previous| previous.op)
    }

    /// The pending operation for a handle.
    pub fn get(&self, handle: EntityHandle) -> Option<PersistOp> {
        self.pending.get(&handle).map(|slot| slot.op)
    }

    /// Whether any operation is pending for the handle.
    pub fn is_scheduled(&self, handle: EntityHandle) -> bool {
        self.pending.contains_key(&handle)
    }

    /// Remove the pending operation for a handle.
    pub fn remove(&mut self, handle: EntityHandle) -> Option<PersistOp> {
        self.pending.remove(&handle).map(|slot| slot.op)
    }

    /// Handles scheduled for `op`, in scheduling order.
    pub fn handles(&self, op: PersistOp) -> Vec<EntityHandle> {
        let mut slots: Vec<(u64, EntityHandle)> = self
            .pending
            .iter()
            .filter(|(_, slot)| slot.op == op)
            .map(|(handle, slot)| (slot.seq, *handle))
            .collect();
        slots.sort_unstable_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Every scheduled handle.
    pub fn all_handles(&self) -> Vec<EntityHandle> {
        self.pending.keys().copied().collect()
    }

    /// Get the count of pending operations.
    pub fn counts(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for slot in self.pending.values() {
            match slot.op {
                PersistOp::Insert => counts.insert += 1,
                PersistOp::Update => counts.update += 1,
                PersistOp::Delete => counts.delete += 1,
            }
        }
        counts
    }

    /// Drop every pending operation.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Count of pending operations by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PendingCounts {
    /// Entities pending INSERT.
    pub insert: usize,
    /// Entities pending UPDATE.
    pub update: usize,
    /// Entities pending DELETE.
    pub delete: usize,
}

impl PendingCounts {
    /// Total number of pending operations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.insert + self.update + self.delete
    }

    /// Check if there are no pending operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insert == 0 && self.update == 0 && self.delete == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityRef;
    use rowkeep_core::{Entity, FieldInfo, Value};

    struct Tag;

    impl Entity for Tag {
        const ENTITY_NAME: &'static str = "tags";
        const PRIMARY_KEY: &'static [&'static str] = &[];

        fn fields() -> &'static [FieldInfo] {
            &[]
        }

        fn field_values(&self) -> Vec<(&'static str, Value)> {
            vec![]
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![]
        }

        fn is_new(&self) -> bool {
            true
        }
    }

    fn handle() -> EntityHandle {
        EntityRef::new(Tag).handle()
    }

    #[test]
    fn test_sets_are_disjoint() {
        let mut schedule = OperationSchedule::new();
        let h = handle();

        assert_eq!(schedule.schedule(h, PersistOp::Delete), None);
        assert_eq!(schedule.schedule(h, PersistOp::Insert), Some(PersistOp::Delete));

        assert_eq!(schedule.get(h), Some(PersistOp::Insert));
        assert!(schedule.handles(PersistOp::Delete).is_empty());
        assert_eq!(schedule.handles(PersistOp::Insert), vec![h]);
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn test_handles_in_scheduling_order() {
        let mut schedule = OperationSchedule::new();
        let (a, b, c) = (handle(), handle(), handle());

        schedule.schedule(c, PersistOp::Update);
        schedule.schedule(a, PersistOp::Update);
        schedule.schedule(b, PersistOp::Insert);
        schedule.schedule(c, PersistOp::Update);

        // Re-scheduling moves c to the back of its phase.
        assert_eq!(schedule.handles(PersistOp::Update), vec![a, c]);
        assert_eq!(schedule.handles(PersistOp::Insert), vec![b]);
    }

    #[test]
    fn test_counts_and_clear() {
        let mut schedule = OperationSchedule::new();
        schedule.schedule(handle(), PersistOp::Insert);
        schedule.schedule(handle(), PersistOp::Insert);
        schedule.schedule(handle(), PersistOp::Delete);

        let counts = schedule.counts();
        assert_eq!(
            counts,
            PendingCounts {
                insert: 2,
                update: 0,
                delete: 1
            }
        );
        assert_eq!(counts.total(), 3);

        schedule.clear();
        assert!(schedule.is_empty());
        assert!(schedule.counts().is_empty());
    }

    #[test]
    fn test_remove() {
        let mut schedule = OperationSchedule::new();
        let h = handle();
        schedule.schedule(h, PersistOp::Update);

        assert_eq!(schedule.remove(h), Some(PersistOp::Update));
        assert!(!schedule.is_scheduled(h));
        assert_eq!(schedule.remove(h), None);
    }
}
