//! The per-kind descriptor table.
//!
//! One static table, indexed by kind tag, of the function values the
//! collector needs for any cell: byte size, field visiting (which also
//! drives pointer rewriting and snapshot edges), optional finalization,
//! optional trimming, and optional native-memory attribution. The kind set
//! is closed, so dispatch is a plain array lookup.

use crate::acceptor::{FieldLabel, SlotAcceptor};
use crate::cell::{CellKind, CellPayload, HeapCell, CELL_OVERHEAD, VALUE_BYTES};
use crate::id_tracker::IdTracker;
use crate::segmented_array::{segment_byte_size, spine_byte_size};

/// A native allocation owned by a heap cell, reported for snapshots.
#[derive(Debug, Clone, Copy)]
pub struct NativeAllocation {
    /// Address of the native memory; the key for its native ID.
    pub addr: usize,
    /// Bytes attributed to the allocation.
    pub bytes: usize,
    /// Display label for snapshot consumers.
    pub label: &'static str,
}

/// Context handed to finalizers. Finalizers run exactly once per dead cell,
/// during reclamation; they must not touch the heap.
pub struct FinalizeCtx<'a> {
    pub(crate) ids: &'a mut IdTracker,
}

impl FinalizeCtx<'_> {
    /// Stop tracking freed native memory, so a later allocation reusing the
    /// address cannot alias the old ID.
    pub fn untrack_native(&mut self, addr: usize) {
        self.ids.untrack_native(addr);
    }
}

/// The descriptor for one cell kind. Immutable for the life of the process;
/// a cell's descriptor never changes after construction.
pub struct VTable {
    /// The kind this descriptor describes.
    pub kind: CellKind,
    /// Display name.
    pub name: &'static str,
    /// Current byte size of a payload.
    pub size: fn(&CellPayload) -> usize,
    /// Visit every value slot the collector may need to mark or rewrite.
    /// Must tolerate a partially initialized cell: only published slots are
    /// reported.
    pub mark: fn(&mut CellPayload, &mut dyn SlotAcceptor),
    /// Finalizer, for kinds owning non-heap resources.
    pub finalize: Option<fn(&mut HeapCell, &mut FinalizeCtx<'_>)>,
    /// Shrink physical storage to the published size during compaction;
    /// returns the new byte size. Must be idempotent.
    pub trim: Option<fn(&mut CellPayload) -> usize>,
    /// Report the native allocation owned by a cell, if any.
    pub native_memory: Option<fn(&HeapCell) -> Option<NativeAllocation>>,
}

/// Look up the descriptor for a kind.
#[must_use]
pub fn vtable(kind: CellKind) -> &'static VTable {
    &TABLES[kind as usize]
}

static TABLES: [VTable; CellKind::COUNT] = [
    VTable {
        kind: CellKind::Record,
        name: "Record",
        size: record_size,
        mark: mark_record,
        finalize: None,
        trim: None,
        native_memory: None,
    },
    VTable {
        kind: CellKind::Text,
        name: "Text",
        size: text_size,
        mark: mark_nothing,
        finalize: Some(finalize_text),
        trim: None,
        native_memory: Some(text_native_memory),
    },
    VTable {
        kind: CellKind::Array,
        name: "Array",
        size: array_size,
        mark: mark_array,
        finalize: None,
        trim: Some(trim_array),
        native_memory: None,
    },
    VTable {
        kind: CellKind::Segment,
        name: "Segment",
        size: segment_size,
        mark: mark_segment,
        finalize: None,
        trim: None,
        native_memory: None,
    },
];

fn record_size(payload: &CellPayload) -> usize {
    CELL_OVERHEAD + payload.expect_record().fields.len() * VALUE_BYTES
}

fn text_size(_payload: &CellPayload) -> usize {
    // Character storage is credited as external memory, not cell size.
    CELL_OVERHEAD + std::mem::size_of::<String>()
}

fn array_size(payload: &CellPayload) -> usize {
    spine_byte_size(payload.expect_array().slots.len())
}

fn segment_size(_payload: &CellPayload) -> usize {
    segment_byte_size()
}

fn mark_record(payload: &mut CellPayload, acceptor: &mut dyn SlotAcceptor) {
    for (i, slot) in payload.expect_record_mut().fields.iter_mut().enumerate() {
        acceptor.accept_value(slot, FieldLabel::Index(i));
    }
}

fn mark_nothing(_payload: &mut CellPayload, _acceptor: &mut dyn SlotAcceptor) {}

fn mark_array(payload: &mut CellPayload, acceptor: &mut dyn SlotAcceptor) {
    let a = payload.expect_array_mut();
    let used = a.num_slots_used as usize;
    for (i, slot) in a.slots[..used].iter_mut().enumerate() {
        acceptor.accept_value(slot, FieldLabel::Index(i));
    }
}

fn mark_segment(payload: &mut CellPayload, acceptor: &mut dyn SlotAcceptor) {
    let s = payload.expect_segment_mut();
    let length = s.length as usize;
    for (i, slot) in s.data[..length].iter_mut().enumerate() {
        acceptor.accept_value(slot, FieldLabel::Index(i));
    }
}

fn finalize_text(cell: &mut HeapCell, ctx: &mut FinalizeCtx<'_>) {
    if let Some(addr) = cell.payload.expect_text().native_address() {
        ctx.untrack_native(addr);
    }
}

fn trim_array(payload: &mut CellPayload) -> usize {
    payload.expect_array_mut().trim()
}

fn text_native_memory(cell: &HeapCell) -> Option<NativeAllocation> {
    cell.payload.expect_text().native_address().map(|addr| NativeAllocation {
        addr,
        bytes: cell.header.external_bytes,
        label: "Text storage",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::FieldLabel;
    use crate::value::{CellPtr, Value};

    struct CountingAcceptor {
        cells: usize,
        total: usize,
    }

    impl SlotAcceptor for CountingAcceptor {
        fn accept_value(&mut self, slot: &mut Value, _label: FieldLabel<'_>) {
            self.total += 1;
            if slot.is_cell() {
                self.cells += 1;
            }
        }
    }

    #[test]
    fn table_is_indexed_by_kind() {
        for kind in [
            CellKind::Record,
            CellKind::Text,
            CellKind::Array,
            CellKind::Segment,
        ] {
            assert_eq!(vtable(kind).kind, kind);
            assert_eq!(vtable(kind).name, kind.name());
        }
    }

    #[test]
    fn record_mark_reports_every_field() {
        let mut payload = CellPayload::record(3);
        if let CellPayload::Record(r) = &mut payload {
            r.fields[1] = Value::Cell(CellPtr::new(0, 5));
        }
        let mut acceptor = CountingAcceptor { cells: 0, total: 0 };
        (vtable(CellKind::Record).mark)(&mut payload, &mut acceptor);
        assert_eq!(acceptor.total, 3);
        assert_eq!(acceptor.cells, 1);
    }

    #[test]
    fn finalizer_presence_matches_kind() {
        assert!(vtable(CellKind::Text).finalize.is_some());
        assert!(vtable(CellKind::Record).finalize.is_none());
        assert!(vtable(CellKind::Array).trim.is_some());
        assert!(vtable(CellKind::Segment).trim.is_none());
    }
}
