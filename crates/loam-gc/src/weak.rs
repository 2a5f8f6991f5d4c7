//! The weak-reference slot table.
//!
//! A weak reference is an indirection cell with a fixed identity: the mutator
//! holds a [`WeakRef`] naming a slot, and the slot holds the referent. The
//! collector clears the slot when the referent dies and recycles the slot
//! onto a free list once no live holder names it anymore.
//!
//! Each slot is an explicit `{state, value}` pair. The state machine is:
//! `Unmarked` (liveness of the holder unknown) -> `Marked` (a holder was
//! reported this cycle) -> back to `Unmarked` at reconciliation, or
//! `Unmarked` -> `Free` (no holder reported; the slot joins the free list,
//! its value becoming the free-list link). A slot in `Free` state never
//! stores a cell reference.

use crate::value::CellPtr;

/// Lifecycle state of a weak slot, for the purpose of reusing slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakSlotState {
    /// Unknown whether any holder still names this slot.
    Unmarked,
    /// A holder was reported during the current cycle's weak-root scan.
    Marked,
    /// No holder names this slot; it is on the free list.
    Free,
}

#[derive(Debug, Clone, Copy)]
enum WeakSlotValue {
    /// A live (or not-yet-reconciled) referent.
    Cell(CellPtr),
    /// The referent died; reads report "no value".
    Empty,
    /// Free-list link. Only valid in `Free` state.
    NextFree(Option<u32>),
}

#[derive(Debug, Clone, Copy)]
struct WeakSlot {
    state: WeakSlotState,
    value: WeakSlotValue,
}

/// A mutator-held name for a weak slot.
///
/// Copies share the slot. The embedder's weak-root scan must report each
/// slot at most once per cycle; a slot that no holder reports is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakRef {
    pub(crate) slot: u32,
}

/// The slot table. Owned by the heap; all mutator access goes through
/// [`GcHeap`](crate::GcHeap) methods.
#[derive(Debug, Default)]
pub(crate) struct WeakSlotTable {
    slots: Vec<WeakSlot>,
    first_free: Option<u32>,
}

impl WeakSlotTable {
    /// Allocate or reuse a slot, initially `Unmarked`, holding `target`.
    pub(crate) fn create(&mut self, target: CellPtr) -> WeakRef {
        let slot = WeakSlot {
            state: WeakSlotState::Unmarked,
            value: WeakSlotValue::Cell(target),
        };
        if let Some(index) = self.first_free {
            let recycled = &mut self.slots[index as usize];
            debug_assert!(matches!(recycled.state, WeakSlotState::Free));
            self.first_free = match recycled.value {
                WeakSlotValue::NextFree(next) => next,
                _ => unreachable!("free slot must hold a free-list link"),
            };
            *recycled = slot;
            WeakRef { slot: index }
        } else {
            let index = u32::try_from(self.slots.len()).expect("weak slot table overflow");
            self.slots.push(slot);
            WeakRef { slot: index }
        }
    }

    /// Mark the slot as in use by a live holder. `strict` makes
    /// double-marking (and marking a free slot) a hard error.
    pub(crate) fn mark(&mut self, weak: WeakRef, strict: bool) {
        let slot = &mut self.slots[weak.slot as usize];
        match slot.state {
            WeakSlotState::Unmarked => slot.state = WeakSlotState::Marked,
            WeakSlotState::Marked => {
                assert!(!strict, "weak slot {} marked twice in one cycle", weak.slot);
            }
            WeakSlotState::Free => {
                assert!(!strict, "marked a freed weak slot {}", weak.slot);
            }
        }
    }

    /// The current state of a slot.
    pub(crate) fn state(&self, weak: WeakRef) -> WeakSlotState {
        self.slots[weak.slot as usize].state
    }

    /// The referent, if the slot still has one. `None` for cleared slots.
    /// Reading a freed slot is a stale-handle bug; strict callers check
    /// [`Self::state`] first.
    pub(crate) fn value(&self, weak: WeakRef) -> Option<CellPtr> {
        match self.slots[weak.slot as usize].value {
            WeakSlotValue::Cell(p) => Some(p),
            _ => None,
        }
    }

    /// Reconcile every slot after marking: clear referents that died, return
    /// marked slots to `Unmarked`, and recycle slots no holder reported.
    pub(crate) fn reconcile(&mut self, mut alive: impl FnMut(CellPtr) -> bool) {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            match slot.state {
                WeakSlotState::Free => {}
                WeakSlotState::Marked => {
                    if let WeakSlotValue::Cell(p) = slot.value {
                        if !alive(p) {
                            slot.value = WeakSlotValue::Empty;
                        }
                    }
                    slot.state = WeakSlotState::Unmarked;
                }
                WeakSlotState::Unmarked => {
                    // No live holder reported this slot; splice it onto the
                    // free list.
                    slot.state = WeakSlotState::Free;
                    slot.value = WeakSlotValue::NextFree(self.first_free);
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        self.first_free = Some(index as u32);
                    }
                }
            }
        }
    }

    /// Rewrite surviving referents through the evacuation forwarding table.
    pub(crate) fn forward(&mut self, forwarding: &[Option<CellPtr>], from_bank: usize) {
        for slot in &mut self.slots {
            if let WeakSlotValue::Cell(p) = slot.value {
                debug_assert_eq!(p.bank(), from_bank, "weak referent in wrong bank");
                let moved = forwarding[p.index()]
                    .expect("surviving weak referent must have been evacuated");
                slot.value = WeakSlotValue::Cell(moved);
            }
        }
    }

    /// Total slots ever allocated (free slots included).
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(index: usize) -> CellPtr {
        CellPtr::new(0, index)
    }

    #[test]
    fn create_mark_reconcile_keeps_live_referent() {
        let mut table = WeakSlotTable::default();
        let w = table.create(ptr(3));
        table.mark(w, true);
        table.reconcile(|_| true);
        assert_eq!(table.state(w), WeakSlotState::Unmarked);
        assert_eq!(table.value(w), Some(ptr(3)));
    }

    #[test]
    fn dead_referent_is_cleared_but_slot_kept_for_holder() {
        let mut table = WeakSlotTable::default();
        let w = table.create(ptr(3));
        table.mark(w, true);
        table.reconcile(|_| false);
        assert_eq!(table.state(w), WeakSlotState::Unmarked);
        assert_eq!(table.value(w), None);
    }

    #[test]
    fn unreported_slot_is_recycled() {
        let mut table = WeakSlotTable::default();
        let w = table.create(ptr(1));
        table.reconcile(|_| true);
        assert_eq!(table.state(w), WeakSlotState::Free);

        // The next create reuses the freed slot instead of growing the table.
        let before = table.slot_count();
        let w2 = table.create(ptr(2));
        assert_eq!(table.slot_count(), before);
        assert_eq!(table.value(w2), Some(ptr(2)));
    }

    #[test]
    fn free_list_chains_through_slots() {
        let mut table = WeakSlotTable::default();
        let a = table.create(ptr(1));
        let b = table.create(ptr(2));
        let c = table.create(ptr(3));
        // Keep only b alive as a holder.
        table.mark(b, true);
        table.reconcile(|_| true);
        assert_eq!(table.state(a), WeakSlotState::Free);
        assert_eq!(table.state(c), WeakSlotState::Free);

        let before = table.slot_count();
        let _r1 = table.create(ptr(4));
        let _r2 = table.create(ptr(5));
        assert_eq!(table.slot_count(), before);
    }

    #[test]
    #[should_panic(expected = "marked twice")]
    fn double_mark_is_a_strict_error() {
        let mut table = WeakSlotTable::default();
        let w = table.create(ptr(1));
        table.mark(w, true);
        table.mark(w, true);
    }

    #[test]
    fn forwarding_rewrites_referents() {
        let mut table = WeakSlotTable::default();
        let w = table.create(ptr(2));
        table.mark(w, true);
        table.reconcile(|_| true);

        let mut forwarding = vec![None; 4];
        forwarding[2] = Some(CellPtr::new(1, 0));
        table.forward(&forwarding, 0);
        assert_eq!(table.value(w), Some(CellPtr::new(1, 0)));
    }
}
