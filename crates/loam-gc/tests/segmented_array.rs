//! Segmented-array behavior: flat-array equivalence, segment accounting,
//! growth under interleaved collections, and trimming.

mod common;

use common::{collect, strict_heap, TestRoots};
use loam_gc::{
    GcCause, GcError, Mutator, SegmentedArray, Value, SEGMENT_MAX_LENGTH,
    VALUE_TO_SEGMENT_THRESHOLD,
};

fn expected_segments(capacity: u32) -> u32 {
    if capacity <= VALUE_TO_SEGMENT_THRESHOLD {
        0
    } else {
        (capacity - VALUE_TO_SEGMENT_THRESHOLD + SEGMENT_MAX_LENGTH - 1) / SEGMENT_MAX_LENGTH
    }
}

#[test]
fn reads_match_a_flat_model_across_segment_boundaries() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    let mut model: Vec<Value> = Vec::new();

    let scope = heap.enter_scope();
    let array = SegmentedArray::create(&mut Mutator::new(&mut heap, &mut roots), 0).unwrap();
    let this = heap.make_handle(Value::Cell(array));

    // A scripted mix of pushes and both-ended resizes crossing the inline
    // threshold and several segment boundaries.
    for i in 0..40u32 {
        SegmentedArray::push_back(
            &mut Mutator::new(&mut heap, &mut roots),
            this,
            Value::Number(f64::from(i)),
        )
        .unwrap();
        model.push(Value::Number(f64::from(i)));
    }

    SegmentedArray::resize(&mut Mutator::new(&mut heap, &mut roots), this, 2000).unwrap();
    model.resize(2000, Value::Empty);

    SegmentedArray::resize_left(&mut Mutator::new(&mut heap, &mut roots), this, 2600).unwrap();
    for _ in 0..600 {
        model.insert(0, Value::Empty);
    }

    for i in 0..2600u32 {
        if i % 7 == 0 {
            let array = heap.handle_cell(this);
            SegmentedArray::set(&mut heap, array, i, Value::Number(f64::from(i) * 0.5));
            model[i as usize] = Value::Number(f64::from(i) * 0.5);
        }
    }

    SegmentedArray::resize_left(&mut Mutator::new(&mut heap, &mut roots), this, 900).unwrap();
    model.drain(..2600 - 900);

    SegmentedArray::resize(&mut Mutator::new(&mut heap, &mut roots), this, 3).unwrap();
    model.truncate(3);

    SegmentedArray::resize(&mut Mutator::new(&mut heap, &mut roots), this, 1500).unwrap();
    model.resize(1500, Value::Empty);

    let array = heap.handle_cell(this);
    assert_eq!(SegmentedArray::size(&heap, array), 1500);
    for i in 0..1500u32 {
        assert_eq!(
            SegmentedArray::get(&heap, array, i),
            model[i as usize],
            "index {i} diverged from the flat model"
        );
    }
    heap.exit_scope(scope);
}

#[test]
fn create_then_resize_allocates_exactly_the_needed_segments() {
    for capacity in [0u32, 3, 4, 5, 1028, 1029, 3000, 4100] {
        let mut heap = strict_heap();
        let mut roots = TestRoots::new();
        let scope = heap.enter_scope();

        let cells_before = heap.num_cells();
        let array =
            SegmentedArray::create(&mut Mutator::new(&mut heap, &mut roots), capacity).unwrap();
        assert_eq!(heap.num_cells(), cells_before + 1, "segments are lazy");

        let this = heap.make_handle(Value::Cell(array));
        SegmentedArray::resize(&mut Mutator::new(&mut heap, &mut roots), this, capacity).unwrap();
        let segment_cells = heap.num_cells() - cells_before - 1;
        assert_eq!(
            segment_cells,
            expected_segments(capacity) as usize,
            "capacity {capacity}"
        );
        heap.exit_scope(scope);
    }
}

#[test]
fn excessive_capacity_fails_without_allocating() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    let too_big = SegmentedArray::max_elements() + 1;
    let before = heap.num_cells();
    let result = SegmentedArray::create(&mut Mutator::new(&mut heap, &mut roots), too_big);
    assert_eq!(
        result,
        Err(GcError::ExcessiveCapacity {
            requested: too_big,
            max: SegmentedArray::max_elements(),
        })
    );
    assert_eq!(heap.num_cells(), before);

    let message = result.unwrap_err().to_string();
    assert!(message.contains("Requested elements"));
    assert!(message.contains("max elements"));
}

#[test]
fn five_thousand_pushes_interleaved_with_collections() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    let scope = heap.enter_scope();
    let array = SegmentedArray::create(&mut Mutator::new(&mut heap, &mut roots), 0).unwrap();
    let this = heap.make_handle(Value::Cell(array));

    for i in 0..5000u32 {
        SegmentedArray::push_back(
            &mut Mutator::new(&mut heap, &mut roots),
            this,
            Value::Number(f64::from(i)),
        )
        .unwrap();
        if i % 500 == 499 {
            Mutator::new(&mut heap, &mut roots).collect(GcCause::Forced);
        }
    }

    let array = heap.handle_cell(this);
    assert_eq!(SegmentedArray::size(&heap, array), 5000);
    for i in 0..5000u32 {
        let value = SegmentedArray::get(&heap, array, i);
        assert!(!value.is_empty(), "index {i} read back as Empty");
        assert_eq!(value, Value::Number(f64::from(i)));
    }
    heap.exit_scope(scope);
}

#[test]
fn collection_trims_capacity_to_size() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    let scope = heap.enter_scope();
    let array = SegmentedArray::create(&mut Mutator::new(&mut heap, &mut roots), 5000).unwrap();
    let this = heap.make_handle(Value::Cell(array));
    SegmentedArray::resize(&mut Mutator::new(&mut heap, &mut roots), this, 10).unwrap();

    let array = heap.handle_cell(this);
    assert!(SegmentedArray::capacity(&heap, array) >= 5000);
    let size_before = heap.cell_size(array);

    collect(&mut heap, &mut roots);
    let array = heap.handle_cell(this);
    assert!(heap.cell_size(array) < size_before, "trim shrank the spine");
    // Trimming is idempotent: a second collection changes nothing.
    let trimmed = heap.cell_size(array);
    collect(&mut heap, &mut roots);
    let array = heap.handle_cell(this);
    assert_eq!(heap.cell_size(array), trimmed);

    // Contents and behavior are unchanged; growth still works after a trim.
    assert_eq!(SegmentedArray::size(&heap, array), 10);
    for i in 0..200u32 {
        SegmentedArray::push_back(
            &mut Mutator::new(&mut heap, &mut roots),
            this,
            Value::Number(f64::from(i)),
        )
        .unwrap();
    }
    let array = heap.handle_cell(this);
    assert_eq!(SegmentedArray::size(&heap, array), 210);
    assert_eq!(SegmentedArray::get(&heap, array, 10), Value::Number(0.0));
    assert_eq!(SegmentedArray::get(&heap, array, 209), Value::Number(199.0));
    heap.exit_scope(scope);
}

#[test]
fn abandoned_segments_are_reclaimed_after_shrink() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    let scope = heap.enter_scope();
    let array = SegmentedArray::create(&mut Mutator::new(&mut heap, &mut roots), 0).unwrap();
    let this = heap.make_handle(Value::Cell(array));

    SegmentedArray::resize(&mut Mutator::new(&mut heap, &mut roots), this, 4100).unwrap();
    let with_segments = heap.num_cells();
    assert_eq!(with_segments, 1 + expected_segments(4100) as usize);

    // Shrink to inline-only; the segment cells become unreachable and the
    // next collection reclaims them.
    SegmentedArray::resize(&mut Mutator::new(&mut heap, &mut roots), this, 2).unwrap();
    assert_eq!(heap.num_cells(), with_segments, "shrink frees nothing itself");
    collect(&mut heap, &mut roots);
    assert_eq!(heap.num_cells(), 1);

    let array = heap.handle_cell(this);
    assert_eq!(SegmentedArray::size(&heap, array), 2);
    heap.exit_scope(scope);
}

#[test]
fn create_with_size_fills_with_empty() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    let array =
        SegmentedArray::create_with_size(&mut Mutator::new(&mut heap, &mut roots), 1100, 1100)
            .unwrap();
    assert_eq!(SegmentedArray::size(&heap, array), 1100);
    for i in [0u32, 3, 4, 1023, 1027, 1099] {
        assert!(SegmentedArray::get(&heap, array, i).is_empty());
    }
}
