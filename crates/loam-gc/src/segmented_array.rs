//! Growable value storage split into bounded segments.
//!
//! A segmented array presents a logically contiguous, randomly indexable,
//! resizable sequence of values while keeping every physical allocation
//! bounded: the spine cell holds the first few elements inline and a table
//! of pointers to fixed-capacity [`Segment`] cells for the rest. The
//! collector therefore never scans or relocates one arbitrarily large block.
//!
//! Growth must cooperate with the collector. Allocating a segment can itself
//! trigger a full collection, and a collection both scans every published
//! spine slot and may trim the spine down to its published slot count. So
//! growth always (1) fills the about-to-be-published slots with `Empty`,
//! (2) publishes the new used-slot count, and only then (3) allocates
//! segment cells, fixing up their lengths afterwards. Freshly created
//! segments keep length 0 until that fixup so no unpublished storage is ever
//! scanned.

use crate::cell::{CellPayload, CELL_OVERHEAD, VALUE_BYTES};
use crate::errors::{GcError, GcResult};
use crate::handles::Handle;
use crate::heap::{AllocHint, GcHeap, Mutator};
use crate::metrics::FixedSizeHint;
use crate::value::{CellPtr, Value};

/// Number of elements stored inline in the spine before segments are used.
pub const VALUE_TO_SEGMENT_THRESHOLD: u32 = 4;

/// Maximum number of elements in one segment cell.
pub const SEGMENT_MAX_LENGTH: u32 = 1024;

/// Ceiling on spine slots, which bounds the largest single allocation.
const MAX_SPINE_SLOTS: u32 = 32 * 1024;

const T: u32 = VALUE_TO_SEGMENT_THRESHOLD;
const L: u32 = SEGMENT_MAX_LENGTH;

// ============================================================================
// Layout arithmetic
// ============================================================================

/// Number of segment cells needed for `capacity` elements,
/// `capacity > VALUE_TO_SEGMENT_THRESHOLD`.
const fn num_segments_for_capacity(capacity: u32) -> u32 {
    (capacity - T + L - 1) / L
}

/// Number of spine slots (inline values plus segment pointers) needed for
/// `capacity` elements.
pub(crate) const fn num_slots_for_capacity(capacity: u32) -> u32 {
    if capacity <= T {
        capacity
    } else {
        T + num_segments_for_capacity(capacity)
    }
}

/// The segment holding element `index`, `index >= VALUE_TO_SEGMENT_THRESHOLD`.
const fn to_segment(index: u32) -> u32 {
    (index - T) / L
}

/// Element `index`'s offset within its segment.
const fn to_interior(index: u32) -> u32 {
    (index - T) % L
}

/// Element capacity provided by `slot_capacity` spine slots.
const fn element_capacity(slot_capacity: u32) -> u32 {
    if slot_capacity <= T {
        slot_capacity
    } else {
        T + (slot_capacity - T) * L
    }
}

/// Byte size of a spine cell with `slots` spine slots.
pub(crate) const fn spine_byte_size(slots: usize) -> usize {
    CELL_OVERHEAD + slots * VALUE_BYTES
}

/// Byte size of a segment cell.
pub(crate) const fn segment_byte_size() -> usize {
    CELL_OVERHEAD + SEGMENT_MAX_LENGTH as usize * VALUE_BYTES
}

// ============================================================================
// Payloads
// ============================================================================

/// The spine of a segmented array.
///
/// `slots[0..VALUE_TO_SEGMENT_THRESHOLD]` hold elements inline; every later
/// slot holds a pointer to a [`Segment`]. `num_slots_used` is the published
/// prefix the collector scans; every published slot always holds a defined
/// value.
#[derive(Debug)]
pub struct SegmentedArray {
    pub(crate) slot_capacity: u32,
    pub(crate) num_slots_used: u32,
    pub(crate) slots: Box<[Value]>,
}

/// One fixed-capacity chunk of array storage. `length` is the published
/// prefix of `data` the collector scans.
#[derive(Debug)]
pub struct Segment {
    pub(crate) length: u32,
    pub(crate) data: Box<[Value]>,
}

impl Segment {
    /// Allocate a fresh segment with published length 0.
    pub(crate) fn create(m: &mut Mutator<'_>) -> CellPtr {
        m.alloc(
            CellPayload::Segment(Self {
                length: 0,
                data: vec![Value::Empty; L as usize].into_boxed_slice(),
            }),
            AllocHint {
                fixed_size: FixedSizeHint::Yes,
                ..AllocHint::default()
            },
        )
    }

    /// Publish a new length. Growing with `fill` writes `Empty` into the
    /// newly published range first; shrinking needs nothing special.
    pub(crate) fn set_length(heap: &mut GcHeap, segment: CellPtr, new_length: u32, fill: bool) {
        debug_assert!(new_length <= L);
        let old_length = heap.payload(segment).expect_segment().length;
        if fill && new_length > old_length {
            heap.write_barrier_range_fill(segment, new_length - old_length, Value::Empty);
        }
        let s = heap.payload_mut(segment).expect_segment_mut();
        if fill && new_length > old_length {
            for slot in &mut s.data[old_length as usize..new_length as usize] {
                *slot = Value::Empty;
            }
        }
        s.length = new_length;
    }
}

impl SegmentedArray {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Largest representable element count.
    #[must_use]
    pub const fn max_elements() -> u32 {
        element_capacity(MAX_SPINE_SLOTS)
    }

    /// Allocate an array able to hold `capacity` elements without spine
    /// reallocation. Segments stay unallocated until first use.
    ///
    /// # Errors
    ///
    /// [`GcError::ExcessiveCapacity`] when `capacity` exceeds
    /// [`Self::max_elements`]; nothing is allocated in that case.
    pub fn create(m: &mut Mutator<'_>, capacity: u32) -> GcResult<CellPtr> {
        Ok(m.alloc(Self::payload_for_capacity(capacity)?, Self::spine_hint()))
    }

    /// Like [`Self::create`], but with the long-lived placement hint.
    ///
    /// # Errors
    ///
    /// [`GcError::ExcessiveCapacity`] as for [`Self::create`].
    pub fn create_long_lived(m: &mut Mutator<'_>, capacity: u32) -> GcResult<CellPtr> {
        Ok(m.alloc_long_lived(Self::payload_for_capacity(capacity)?))
    }

    /// Allocate an array with `capacity` slots and an initial size of `size`
    /// elements, all `Empty`.
    ///
    /// # Errors
    ///
    /// [`GcError::ExcessiveCapacity`] as for [`Self::create`].
    pub fn create_with_size(m: &mut Mutator<'_>, capacity: u32, size: u32) -> GcResult<CellPtr> {
        debug_assert!(size <= capacity);
        let array = Self::create(m, capacity)?;
        let scope = m.heap.enter_scope();
        let this = m.heap.make_handle(Value::Cell(array));
        Self::increase_size(m, this, size, true);
        let array = m.heap.handle_cell(this);
        m.heap.exit_scope(scope);
        Ok(array)
    }

    fn payload_for_capacity(capacity: u32) -> GcResult<CellPayload> {
        if capacity > Self::max_elements() {
            return Err(GcError::ExcessiveCapacity {
                requested: capacity,
                max: Self::max_elements(),
            });
        }
        let slots = num_slots_for_capacity(capacity);
        Ok(CellPayload::Array(Self {
            slot_capacity: slots,
            num_slots_used: 0,
            slots: vec![Value::Empty; slots as usize].into_boxed_slice(),
        }))
    }

    const fn spine_hint() -> AllocHint {
        AllocHint {
            long_lived: false,
            fixed_size: FixedSizeHint::No,
            has_finalizer: false,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current number of elements.
    #[must_use]
    pub fn size(heap: &GcHeap, array: CellPtr) -> u32 {
        let a = heap.payload(array).expect_array();
        let used = a.num_slots_used;
        if used <= T {
            return used;
        }
        let segments = used - T;
        let last = a.slots[(T + segments - 1) as usize].expect_cell();
        let last_length = heap.payload(last).expect_segment().length;
        T + (segments - 1) * L + last_length
    }

    /// Elements the array can hold without spine reallocation.
    #[must_use]
    pub fn capacity(heap: &GcHeap, array: CellPtr) -> u32 {
        element_capacity(heap.payload(array).expect_array().slot_capacity)
    }

    /// Read element `index`. Panics when out of bounds.
    #[must_use]
    pub fn get(heap: &GcHeap, array: CellPtr, index: u32) -> Value {
        assert!(index < Self::size(heap, array), "array index out of bounds");
        let a = heap.payload(array).expect_array();
        if index < T {
            a.slots[index as usize]
        } else {
            let segment = a.slots[(T + to_segment(index)) as usize].expect_cell();
            heap.payload(segment).expect_segment().data[to_interior(index) as usize]
        }
    }

    /// Write element `index` through the write barrier. Panics when out of
    /// bounds.
    pub fn set(heap: &mut GcHeap, array: CellPtr, index: u32, value: Value) {
        assert!(index < Self::size(heap, array), "array index out of bounds");
        if index < T {
            heap.write_barrier(array, value);
            heap.payload_mut(array).expect_array_mut().slots[index as usize] = value;
        } else {
            let segment =
                heap.payload(array).expect_array().slots[(T + to_segment(index)) as usize]
                    .expect_cell();
            heap.write_barrier(segment, value);
            heap.payload_mut(segment).expect_segment_mut().data[to_interior(index) as usize] =
                value;
        }
    }

    // ------------------------------------------------------------------
    // Resizing
    // ------------------------------------------------------------------

    /// Append one element. `this` must be a handle whose slot holds the
    /// array; growth may relocate or replace the spine, and the handle is
    /// updated accordingly.
    ///
    /// # Errors
    ///
    /// [`GcError::ExcessiveCapacity`] when the array would exceed
    /// [`Self::max_elements`].
    pub fn push_back(m: &mut Mutator<'_>, this: Handle, value: Value) -> GcResult<()> {
        let old_size = Self::size(m.heap, m.heap.handle_cell(this));
        Self::grow_right(m, this, 1)?;
        let array = m.heap.handle_cell(this);
        Self::set(m.heap, array, old_size, value);
        Ok(())
    }

    /// Resize to `new_size` elements, growing at (or truncating from) the
    /// back. New elements read as `Empty`.
    ///
    /// # Errors
    ///
    /// [`GcError::ExcessiveCapacity`] when `new_size` cannot be represented.
    pub fn resize(m: &mut Mutator<'_>, this: Handle, new_size: u32) -> GcResult<()> {
        let size = Self::size(m.heap, m.heap.handle_cell(this));
        if new_size > size {
            Self::grow_right(m, this, new_size - size)
        } else {
            if new_size < size {
                let array = m.heap.handle_cell(this);
                Self::shrink_right(m.heap, array, size - new_size);
            }
            Ok(())
        }
    }

    /// Resize to `new_size` elements, growing at (or truncating from) the
    /// front. Existing elements keep their relative order; new front
    /// elements read as `Empty`.
    ///
    /// # Errors
    ///
    /// [`GcError::ExcessiveCapacity`] when `new_size` cannot be represented.
    pub fn resize_left(m: &mut Mutator<'_>, this: Handle, new_size: u32) -> GcResult<()> {
        let size = Self::size(m.heap, m.heap.handle_cell(this));
        if new_size == size {
            Ok(())
        } else if new_size > size {
            Self::grow_left(m, this, new_size - size)
        } else {
            let array = m.heap.handle_cell(this);
            Self::shrink_left(m.heap, array, size - new_size);
            Ok(())
        }
    }

    /// Resize without ever reallocating the spine. The caller guarantees
    /// `new_size` fits in the current capacity; segment cells may still be
    /// allocated.
    pub fn resize_within_capacity(m: &mut Mutator<'_>, this: Handle, new_size: u32) {
        let array = m.heap.handle_cell(this);
        let size = Self::size(m.heap, array);
        assert!(
            new_size <= Self::capacity(m.heap, array),
            "resize_within_capacity requires the size to fit in capacity"
        );
        if new_size > size {
            Self::increase_size(m, this, new_size - size, true);
        } else if new_size < size {
            Self::shrink_right(m.heap, array, size - new_size);
        }
    }

    /// The capacity the growth policy picks when `current_size` elements
    /// must become `new_size`: doubling, clamped to the representable
    /// maximum, never less than requested.
    #[must_use]
    pub fn calculate_new_capacity(current_size: u32, new_size: u32) -> u32 {
        new_size.max(current_size.saturating_mul(2).min(Self::max_elements()))
    }

    fn grow_right(m: &mut Mutator<'_>, this: Handle, amount: u32) -> GcResult<()> {
        let array = m.heap.handle_cell(this);
        let size = Self::size(m.heap, array);
        let new_size = size + amount;
        if new_size <= Self::capacity(m.heap, array) {
            Self::increase_size(m, this, amount, true);
            return Ok(());
        }

        // Allocate a bigger spine and copy the used slots over. Segment
        // pointers are copied as-is, so existing segments are shared; the old
        // spine becomes garbage.
        let new_array = Self::create(m, Self::calculate_new_capacity(size, new_size))?;
        let old_array = m.heap.handle_cell(this);
        let (prefix, used) = {
            let a = m.heap.payload(old_array).expect_array();
            (a.slots[..a.num_slots_used as usize].to_vec(), a.num_slots_used)
        };
        m.heap.write_barrier_range(new_array, &prefix);
        {
            let a = m.heap.payload_mut(new_array).expect_array_mut();
            a.slots[..prefix.len()].copy_from_slice(&prefix);
            a.num_slots_used = used;
        }
        m.heap.write_handle(this, Value::Cell(new_array));
        Self::increase_size(m, this, amount, true);
        Ok(())
    }

    fn grow_left(m: &mut Mutator<'_>, this: Handle, amount: u32) -> GcResult<()> {
        let array = m.heap.handle_cell(this);
        let size = Self::size(m.heap, array);
        // Strict inequality: front growth keeps one slot of capacity in
        // reserve before reallocating.
        if size + amount < Self::capacity(m.heap, array) {
            Self::grow_left_within_capacity(m, this, amount);
            return Ok(());
        }
        let new_size = size + amount;
        let new_array = Self::create(m, Self::calculate_new_capacity(size, new_size))?;

        let scope = m.heap.enter_scope();
        let new_handle = m.heap.make_handle(Value::Cell(new_array));
        // Size the new array without redundant filling; everything past the
        // front gap is about to be copied in.
        Self::increase_size(m, new_handle, new_size, false);
        let new_array = m.heap.handle_cell(new_handle);
        let old_array = m.heap.handle_cell(this);
        for i in 0..amount {
            Self::set(m.heap, new_array, i, Value::Empty);
        }
        for i in 0..size {
            let v = Self::get(m.heap, old_array, i);
            Self::set(m.heap, new_array, amount + i, v);
        }
        m.heap.write_handle(this, Value::Cell(new_array));
        m.heap.exit_scope(scope);
        Ok(())
    }

    fn grow_left_within_capacity(m: &mut Mutator<'_>, this: Handle, amount: u32) {
        Self::increase_size(m, this, amount, false);
        let array = m.heap.handle_cell(this);
        let size = Self::size(m.heap, array);
        // Shift the existing elements up, back to front, then blank the gap.
        let mut i = size - amount;
        while i > 0 {
            i -= 1;
            let v = Self::get(m.heap, array, i);
            Self::set(m.heap, array, i + amount, v);
        }
        for i in 0..amount {
            Self::set(m.heap, array, i, Value::Empty);
        }
    }

    fn shrink_right(heap: &mut GcHeap, array: CellPtr, amount: u32) {
        Self::decrease_size(heap, array, amount);
    }

    fn shrink_left(heap: &mut GcHeap, array: CellPtr, amount: u32) {
        let size = Self::size(heap, array);
        for i in amount..size {
            let v = Self::get(heap, array, i);
            Self::set(heap, array, i - amount, v);
        }
        Self::decrease_size(heap, array, amount);
    }

    /// Grow by `amount` elements within the current capacity.
    ///
    /// Ordering is what makes this safe against collections triggered by the
    /// segment allocations below: new spine slots are filled with `Empty`
    /// and the grown used-slot count is published first, so a collection in
    /// the middle neither scans undefined storage nor trims away slots this
    /// growth is about to use.
    fn increase_size(m: &mut Mutator<'_>, this: Handle, amount: u32, fill: bool) {
        let array = m.heap.handle_cell(this);
        let current_size = Self::size(m.heap, array);
        let final_size = current_size + amount;
        debug_assert!(
            final_size <= Self::capacity(m.heap, array),
            "increase_size requires the new size to fit in capacity"
        );

        if final_size <= T {
            // Entirely inline: bump and fill.
            if fill {
                m.heap
                    .write_barrier_range_fill(array, final_size - current_size, Value::Empty);
            }
            let a = m.heap.payload_mut(array).expect_array_mut();
            if fill {
                for slot in &mut a.slots[current_size as usize..final_size as usize] {
                    *slot = Value::Empty;
                }
            }
            a.num_slots_used = final_size;
            return;
        }

        if current_size <= T {
            // The tail of inline storage is becoming reachable; blank it.
            let a = m.heap.payload_mut(array).expect_array_mut();
            for slot in &mut a.slots[current_size as usize..T as usize] {
                *slot = Value::Empty;
            }
            a.num_slots_used = T;
        }

        let start_segment = if current_size <= T {
            0
        } else {
            to_segment(current_size - 1)
        };
        let last_segment = to_segment(final_size - 1);
        let new_slots_used = num_slots_for_capacity(final_size);
        {
            let a = m.heap.payload_mut(array).expect_array_mut();
            for slot in &mut a.slots[a.num_slots_used as usize..new_slots_used as usize] {
                *slot = Value::Empty;
            }
            a.num_slots_used = new_slots_used;
        }

        // The start segment may already exist (it was partially full).
        let start_missing = m.heap.payload(array).expect_array().slots
            [(T + start_segment) as usize]
            .is_empty();
        if start_missing {
            Self::allocate_segment(m, this, start_segment);
        }
        for i in start_segment + 1..=last_segment {
            Self::allocate_segment(m, this, i);
        }

        // All allocations done; publish each segment's length.
        let array = m.heap.handle_cell(this);
        for i in start_segment..=last_segment {
            let segment_length = if i == last_segment {
                to_interior(final_size - 1) + 1
            } else {
                L
            };
            let segment = m.heap.payload(array).expect_array().slots[(T + i) as usize]
                .expect_cell();
            Segment::set_length(m.heap, segment, segment_length, fill);
        }
    }

    fn allocate_segment(m: &mut Mutator<'_>, this: Handle, segment_number: u32) {
        let segment = Segment::create(m);
        let array = m.heap.handle_cell(this);
        debug_assert!(
            m.heap.payload(array).expect_array().slots[(T + segment_number) as usize].is_empty(),
            "allocating into a non-empty segment slot"
        );
        m.heap.write_barrier(array, Value::Cell(segment));
        m.heap.payload_mut(array).expect_array_mut().slots[(T + segment_number) as usize] =
            Value::Cell(segment);
    }

    fn decrease_size(heap: &mut GcHeap, array: CellPtr, amount: u32) {
        let size = Self::size(heap, array);
        assert!(amount <= size, "cannot decrease size past zero");
        let final_size = size - amount;
        if final_size <= T {
            // Inline only; segment pointers past the count become
            // unreachable and are reclaimed by the collector, not freed here.
            heap.payload_mut(array).expect_array_mut().num_slots_used = final_size;
            return;
        }
        let last_segment = heap.payload(array).expect_array().slots
            [(T + to_segment(final_size - 1)) as usize]
            .expect_cell();
        Segment::set_length(heap, last_segment, to_interior(final_size - 1) + 1, true);
        heap.payload_mut(array).expect_array_mut().num_slots_used =
            num_slots_for_capacity(final_size);
    }

    /// Shrink physical spine storage to exactly the published slot count.
    /// Invoked by the collector's compaction phase; a no-op when already
    /// trimmed. Returns the cell's new byte size.
    pub(crate) fn trim(&mut self) -> usize {
        let used = self.num_slots_used as usize;
        if used < self.slots.len() {
            let mut slots = std::mem::take(&mut self.slots).into_vec();
            slots.truncate(used);
            self.slots = slots.into_boxed_slice();
            self.slot_capacity = self.num_slots_used;
        }
        spine_byte_size(self.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_arithmetic() {
        assert_eq!(num_slots_for_capacity(0), 0);
        assert_eq!(num_slots_for_capacity(T), T);
        assert_eq!(num_slots_for_capacity(T + 1), T + 1);
        assert_eq!(num_slots_for_capacity(T + L), T + 1);
        assert_eq!(num_slots_for_capacity(T + L + 1), T + 2);

        assert_eq!(to_segment(T), 0);
        assert_eq!(to_segment(T + L - 1), 0);
        assert_eq!(to_segment(T + L), 1);
        assert_eq!(to_interior(T), 0);
        assert_eq!(to_interior(T + L), 0);
        assert_eq!(to_interior(T + L - 1), L - 1);
    }

    #[test]
    fn element_capacity_round_trips() {
        for capacity in [0, 1, T, T + 1, T + L, T + L + 1, 5000] {
            let slots = num_slots_for_capacity(capacity);
            assert!(
                element_capacity(slots) >= capacity,
                "slots for {capacity} must cover it"
            );
        }
    }

    #[test]
    fn growth_policy_is_monotone_and_superlinear() {
        assert_eq!(SegmentedArray::calculate_new_capacity(0, 1), 1);
        assert_eq!(SegmentedArray::calculate_new_capacity(4, 5), 8);
        assert_eq!(SegmentedArray::calculate_new_capacity(100, 101), 200);
        // Requested size always wins when doubling is not enough.
        assert_eq!(SegmentedArray::calculate_new_capacity(10, 500), 500);
        // Clamped at the representable maximum.
        let max = SegmentedArray::max_elements();
        assert_eq!(SegmentedArray::calculate_new_capacity(max, max), max);
    }

    #[test]
    fn max_elements_is_segment_aligned() {
        let max = SegmentedArray::max_elements();
        assert_eq!((max - T) % L, 0);
        assert!(num_slots_for_capacity(max) <= MAX_SPINE_SLOTS);
    }

    #[test]
    fn trim_is_idempotent() {
        let mut a = SegmentedArray {
            slot_capacity: 10,
            num_slots_used: 3,
            slots: vec![Value::Empty; 10].into_boxed_slice(),
        };
        let size = a.trim();
        assert_eq!(a.slot_capacity, 3);
        assert_eq!(a.slots.len(), 3);
        assert_eq!(size, spine_byte_size(3));
        // Second trim changes nothing.
        assert_eq!(a.trim(), size);
        assert_eq!(a.slots.len(), 3);
    }
}
