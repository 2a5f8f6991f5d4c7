//! The heap object model: cells, headers, and the closed set of kinds.
//!
//! Every GC-managed allocation is a [`HeapCell`]: a small header (kind tag,
//! byte size, external-memory credit, placement flags) plus a kind-specific
//! payload. The kind set is closed; per-kind behavior (field visiting,
//! finalization, trimming) is dispatched through the descriptor table in
//! [`vtable`](crate::vtable). A cell's kind never changes after construction.

use crate::heap::{AllocHint, Mutator};
use crate::metrics::FixedSizeHint;
use crate::segmented_array::{Segment, SegmentedArray};
use crate::value::{CellPtr, Value};

/// Fixed per-cell bookkeeping charge, counted into every cell's byte size.
pub(crate) const CELL_OVERHEAD: usize = 16;

/// Byte size of one value slot.
pub(crate) const VALUE_BYTES: usize = std::mem::size_of::<Value>();

/// The closed set of heap cell kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellKind {
    /// A fixed-size run of value fields.
    Record = 0,
    /// A string whose character storage is native memory.
    Text,
    /// A segmented-array spine.
    Array,
    /// One fixed-capacity chunk of segmented-array storage.
    Segment,
}

impl CellKind {
    /// Number of kinds; the descriptor table is indexed by kind.
    pub const COUNT: usize = 4;

    /// The kind's display name, used in snapshots and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Record => "Record",
            Self::Text => "Text",
            Self::Array => "Array",
            Self::Segment => "Segment",
        }
    }
}

/// Per-cell bookkeeping.
#[derive(Debug)]
pub(crate) struct CellHeader {
    pub(crate) kind: CellKind,
    /// Current byte size of the cell (trimming may reduce it).
    pub(crate) size: usize,
    /// Heap-external bytes credited to this cell.
    pub(crate) external_bytes: usize,
    /// Placement hint: expected to live for the rest of execution.
    pub(crate) long_lived: bool,
    /// Whether this cell's kind has a finalizer to run at reclamation.
    pub(crate) has_finalizer: bool,
}

/// Kind-specific cell contents.
#[derive(Debug)]
pub enum CellPayload {
    /// See [`Record`].
    Record(Record),
    /// See [`Text`].
    Text(Text),
    /// See [`SegmentedArray`].
    Array(SegmentedArray),
    /// See [`Segment`].
    Segment(Segment),
}

impl CellPayload {
    /// The kind tag of this payload.
    #[must_use]
    pub const fn kind(&self) -> CellKind {
        match self {
            Self::Record(_) => CellKind::Record,
            Self::Text(_) => CellKind::Text,
            Self::Array(_) => CellKind::Array,
            Self::Segment(_) => CellKind::Segment,
        }
    }

    /// A record payload with `field_count` fields, all `Empty`.
    #[must_use]
    pub fn record(field_count: u32) -> Self {
        Self::Record(Record {
            fields: vec![Value::Empty; field_count as usize].into_boxed_slice(),
        })
    }

    /// A text payload holding a copy of `text`.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::Text(Text {
            text: text.to_owned(),
        })
    }

    pub(crate) fn expect_record(&self) -> &Record {
        match self {
            Self::Record(r) => r,
            other => panic!("expected a Record cell, found {:?}", other.kind()),
        }
    }

    pub(crate) fn expect_record_mut(&mut self) -> &mut Record {
        match self {
            Self::Record(r) => r,
            other => panic!("expected a Record cell, found {:?}", other.kind()),
        }
    }

    pub(crate) fn expect_text(&self) -> &Text {
        match self {
            Self::Text(t) => t,
            other => panic!("expected a Text cell, found {:?}", other.kind()),
        }
    }

    pub(crate) fn expect_array(&self) -> &SegmentedArray {
        match self {
            Self::Array(a) => a,
            other => panic!("expected an Array cell, found {:?}", other.kind()),
        }
    }

    pub(crate) fn expect_array_mut(&mut self) -> &mut SegmentedArray {
        match self {
            Self::Array(a) => a,
            other => panic!("expected an Array cell, found {:?}", other.kind()),
        }
    }

    pub(crate) fn expect_segment(&self) -> &Segment {
        match self {
            Self::Segment(s) => s,
            other => panic!("expected a Segment cell, found {:?}", other.kind()),
        }
    }

    pub(crate) fn expect_segment_mut(&mut self) -> &mut Segment {
        match self {
            Self::Segment(s) => s,
            other => panic!("expected a Segment cell, found {:?}", other.kind()),
        }
    }
}

/// A heap cell: header plus payload.
#[derive(Debug)]
pub struct HeapCell {
    pub(crate) header: CellHeader,
    pub(crate) payload: CellPayload,
}

impl HeapCell {
    /// The cell's kind tag.
    #[must_use]
    pub const fn kind(&self) -> CellKind {
        self.header.kind
    }

    /// The cell's current byte size.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.header.size
    }

    /// Heap-external bytes credited to this cell.
    #[must_use]
    pub const fn external_bytes(&self) -> usize {
        self.header.external_bytes
    }

    /// Whether the cell was placed with the long-lived hint.
    #[must_use]
    pub const fn is_long_lived(&self) -> bool {
        self.header.long_lived
    }
}

// ============================================================================
// Record
// ============================================================================

/// A fixed-size run of value fields; the generic object the runtime builds
/// everything else from.
#[derive(Debug)]
pub struct Record {
    pub(crate) fields: Box<[Value]>,
}

impl Record {
    /// Allocate a record with `field_count` fields, all `Empty`.
    pub fn create(m: &mut Mutator<'_>, field_count: u32) -> CellPtr {
        m.alloc(
            CellPayload::record(field_count),
            AllocHint {
                fixed_size: FixedSizeHint::Yes,
                ..AllocHint::default()
            },
        )
    }

    /// Allocate a long-lived record.
    pub fn create_long_lived(m: &mut Mutator<'_>, field_count: u32) -> CellPtr {
        m.alloc_long_lived(CellPayload::record(field_count))
    }

    /// Number of fields.
    #[must_use]
    pub fn field_count(heap: &crate::GcHeap, record: CellPtr) -> u32 {
        u32::try_from(heap.payload(record).expect_record().fields.len())
            .expect("record field count fits in u32")
    }

    /// Read field `index`.
    #[must_use]
    pub fn get(heap: &crate::GcHeap, record: CellPtr, index: u32) -> Value {
        heap.payload(record).expect_record().fields[index as usize]
    }

    /// Write field `index` through the write barrier.
    pub fn set(heap: &mut crate::GcHeap, record: CellPtr, index: u32, value: Value) {
        heap.write_barrier(record, value);
        heap.payload_mut(record).expect_record_mut().fields[index as usize] = value;
    }
}

// ============================================================================
// Text
// ============================================================================

/// A string cell. The character storage is ordinary native memory owned by
/// the cell, credited to the collector as external memory at creation and
/// debited (with its native identity untracked) when the cell dies.
#[derive(Debug)]
pub struct Text {
    pub(crate) text: String,
}

impl Text {
    /// Allocate a text cell holding a copy of `text`.
    pub fn create(m: &mut Mutator<'_>, text: &str) -> CellPtr {
        let payload = CellPayload::text(text);
        let external = match &payload {
            CellPayload::Text(t) => t.text.capacity(),
            _ => unreachable!(),
        };
        let cell = m.alloc(
            payload,
            AllocHint {
                has_finalizer: true,
                fixed_size: FixedSizeHint::Yes,
                ..AllocHint::default()
            },
        );
        m.heap.credit_external_memory(cell, external);
        cell
    }

    /// The text contents.
    #[must_use]
    pub fn as_str<'h>(heap: &'h crate::GcHeap, text: CellPtr) -> &'h str {
        &heap.payload(text).expect_text().text
    }

    /// Address of the native character storage, the key for its native ID.
    /// `None` for texts with no allocated storage.
    #[must_use]
    pub(crate) fn native_address(&self) -> Option<usize> {
        if self.text.capacity() == 0 {
            None
        } else {
            Some(self.text.as_ptr() as usize)
        }
    }
}
