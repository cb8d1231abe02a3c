//! Per-partition slot pool.
//!
//! Freed slots go onto a stack per partition and are handed out again
//! most-recently-freed first, which keeps the register arrays small.

use tracing::trace;

use crate::Vec;
use crate::compiler::BuildError;
use crate::format;
use crate::vm::{Slot, SlotCounts, SlotKind};

#[derive(Debug, Default)]
pub struct SlotPool {
    free: [Vec<Slot>; 5],
    /// `live[kind][slot]` is set while a pooled slot is handed out.
    live: [Vec<bool>; 5],
    counts: SlotCounts,
}

impl SlotPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn extend(&mut self, kind: SlotKind) -> Slot {
        let count = self.counts.get_mut(kind);
        let slot = Slot(*count);
        *count += 1;
        self.live[kind.index()].push(false);
        slot
    }

    /// Allocates a slot that never returns to the pool (parameters, locals).
    pub fn reserve(&mut self, kind: SlotKind) -> Slot {
        self.extend(kind)
    }

    pub fn acquire(&mut self, kind: SlotKind) -> Slot {
        let slot = match self.free[kind.index()].pop() {
            Some(slot) => slot,
            None => self.extend(kind),
        };
        self.live[kind.index()][slot.index()] = true;
        trace!(?kind, ?slot, "acquire");
        slot
    }

    pub fn release(&mut self, kind: SlotKind, slot: Slot) -> Result<(), BuildError> {
        let live = self.live[kind.index()]
            .get_mut(slot.index())
            .filter(|live| **live)
            .ok_or_else(|| {
                BuildError::internal(format!("{:?} slot {:?} released while not live", kind, slot))
            })?;
        *live = false;
        self.free[kind.index()].push(slot);
        trace!(?kind, ?slot, "release");
        Ok(())
    }

    #[cfg(test)]
    pub fn is_live(&self, kind: SlotKind, slot: Slot) -> bool {
        self.live[kind.index()]
            .get(slot.index())
            .copied()
            .unwrap_or(false)
    }

    /// Number of pooled slots currently handed out, over all partitions.
    pub fn live_count(&self) -> usize {
        self.live.iter().flatten().filter(|live| **live).count()
    }

    /// Register array sizes needed so far.
    pub fn counts(&self) -> SlotCounts {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lifo_reuse() {
        let mut pool = SlotPool::new();
        let a = pool.acquire(SlotKind::Int);
        let b = pool.acquire(SlotKind::Int);
        assert_eq!((a, b), (Slot(0), Slot(1)));

        pool.release(SlotKind::Int, b).unwrap();
        pool.release(SlotKind::Int, a).unwrap();
        assert_eq!(pool.acquire(SlotKind::Int), a);
        assert_eq!(pool.acquire(SlotKind::Int), b);
        assert_eq!(pool.counts().int, 2);
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut pool = SlotPool::new();
        assert_eq!(pool.acquire(SlotKind::Int), Slot(0));
        assert_eq!(pool.acquire(SlotKind::Double), Slot(0));
        assert_eq!(pool.acquire(SlotKind::Double), Slot(1));
        assert_eq!(
            pool.counts(),
            SlotCounts {
                int: 1,
                double: 2,
                ..SlotCounts::default()
            }
        );
    }

    #[test]
    fn test_reserved_slots_are_never_pooled() {
        let mut pool = SlotPool::new();
        let fixed = pool.reserve(SlotKind::Object);
        let temp = pool.acquire(SlotKind::Object);
        assert_ne!(fixed, temp);
        assert!(pool.release(SlotKind::Object, fixed).is_err());
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn test_live_slots_are_never_handed_out_twice() {
        let mut pool = SlotPool::new();
        let kinds = [SlotKind::Int, SlotKind::Long, SlotKind::Object];
        let mut held = Vec::new();
        for round in 0..4 {
            for kind in kinds {
                let slot = pool.acquire(kind);
                assert!(
                    !held.contains(&(kind, slot)),
                    "{:?} {:?} handed out while live",
                    kind,
                    slot
                );
                held.push((kind, slot));
            }
            // Free every other slot, so later rounds mix reuse and growth.
            if round % 2 == 1 {
                let (kind, slot) = held.remove(0);
                pool.release(kind, slot).unwrap();
                assert!(!pool.is_live(kind, slot));
            }
        }
        for (kind, slot) in &held {
            assert!(pool.is_live(*kind, *slot));
        }
        assert_eq!(pool.live_count(), held.len());
    }

    #[test]
    fn test_double_release_is_an_error() {
        let mut pool = SlotPool::new();
        let slot = pool.acquire(SlotKind::Long);
        pool.release(SlotKind::Long, slot).unwrap();
        assert!(matches!(
            pool.release(SlotKind::Long, slot),
            Err(BuildError::Internal { .. })
        ));
        assert_eq!(pool.live_count(), 0);
    }
}
