//! End-to-end collection behavior: reachability, relocation, reclamation,
//! and finalization.

mod common;

use common::{collect, strict_heap, TestRoots};
use loam_gc::{GcCause, Mutator, Record, Text, Value};

#[test]
fn empty_heap_collects_cleanly() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    collect(&mut heap, &mut roots);
    collect(&mut heap, &mut roots);
    assert_eq!(heap.heap_info().num_collections, 2);
    assert_eq!(heap.heap_info().allocated_bytes, 0);
}

#[test]
fn reachable_objects_survive_with_contents_intact() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::with_slots(1);

    // a -> b -> c, rooted at a.
    let c = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[0] = Value::Cell(c);
    Record::set(&mut heap, c, 0, Value::Number(3.0));

    let b = Record::create(&mut Mutator::new(&mut heap, &mut roots), 2);
    Record::set(&mut heap, b, 0, Value::Cell(roots.values[0].expect_cell()));
    Record::set(&mut heap, b, 1, Value::Number(2.0));
    roots.values[0] = Value::Cell(b);

    let a = Record::create(&mut Mutator::new(&mut heap, &mut roots), 2);
    Record::set(&mut heap, a, 0, Value::Cell(roots.values[0].expect_cell()));
    Record::set(&mut heap, a, 1, Value::Number(1.0));
    roots.values[0] = Value::Cell(a);

    let before = roots.values[0].expect_cell();
    collect(&mut heap, &mut roots);
    let after = roots.values[0].expect_cell();

    // The root was rewritten to the relocated cell, and the same logical
    // path yields the same values.
    assert_ne!(before, after, "evacuation must relocate the cell");
    assert_eq!(Record::get(&heap, after, 1), Value::Number(1.0));
    let b2 = Record::get(&heap, after, 0).expect_cell();
    assert_eq!(Record::get(&heap, b2, 1), Value::Number(2.0));
    let c2 = Record::get(&heap, b2, 0).expect_cell();
    assert_eq!(Record::get(&heap, c2, 0), Value::Number(3.0));
    assert_eq!(heap.num_cells(), 3);
}

#[test]
fn unreachable_objects_are_reclaimed() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::with_slots(1);

    let keep = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[0] = Value::Cell(keep);
    for _ in 0..10 {
        let _garbage = Record::create(&mut Mutator::new(&mut heap, &mut roots), 4);
    }
    assert_eq!(heap.num_cells(), 11);

    collect(&mut heap, &mut roots);
    assert_eq!(heap.num_cells(), 1);
    let stats = heap.last_gc_stats().unwrap().clone();
    assert_eq!(stats.reclaimed_cells, 10);
    assert_eq!(stats.marked_cells, 1);
    assert_eq!(stats.cause, GcCause::Forced);
}

#[test]
fn cyclic_garbage_is_reclaimed() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::with_slots(2);

    let a = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[0] = Value::Cell(a);
    let b = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[1] = Value::Cell(b);
    let (a, b) = (
        roots.values[0].expect_cell(),
        roots.values[1].expect_cell(),
    );
    Record::set(&mut heap, a, 0, Value::Cell(b));
    Record::set(&mut heap, b, 0, Value::Cell(a));

    // Cycles die once the roots are dropped.
    roots.values[0] = Value::Null;
    roots.values[1] = Value::Null;
    collect(&mut heap, &mut roots);
    assert_eq!(heap.num_cells(), 0);
    assert_eq!(heap.heap_info().allocated_bytes, 0);
}

#[test]
fn linked_chain_reclaims_to_zero_with_one_finalizer_each() {
    const CHAIN: usize = 10_000;
    let mut heap = strict_heap();
    // Slots: 0 = head, 1 = previous node, 2 = scratch text.
    let mut roots = TestRoots::with_slots(3);

    for i in 0..CHAIN {
        let text = Text::create(&mut Mutator::new(&mut heap, &mut roots), &format!("node-{i}"));
        roots.values[2] = Value::Cell(text);
        let node = Record::create(&mut Mutator::new(&mut heap, &mut roots), 2);
        Record::set(&mut heap, node, 0, roots.values[1]);
        Record::set(&mut heap, node, 1, roots.values[2]);
        roots.values[1] = Value::Cell(node);
        if i == 0 {
            roots.values[0] = Value::Cell(node);
        }
    }
    // Root only at the chain's tail-end (values[1] points at the last link,
    // which reaches every other link transitively).
    roots.values[0] = Value::Null;
    roots.values[2] = Value::Null;

    collect(&mut heap, &mut roots);
    assert_eq!(heap.num_cells(), 2 * CHAIN);

    // Walk the chain and check the texts are intact.
    let mut cursor = roots.values[1];
    let mut seen = 0;
    while let Value::Cell(node) = cursor {
        let label = Record::get(&heap, node, 1).expect_cell();
        assert_eq!(
            Text::as_str(&heap, label),
            format!("node-{}", CHAIN - 1 - seen)
        );
        seen += 1;
        cursor = Record::get(&heap, node, 0);
    }
    assert_eq!(seen, CHAIN);

    // Drop the root: everything dies, every finalizer runs exactly once.
    roots.values[1] = Value::Null;
    collect(&mut heap, &mut roots);
    assert_eq!(heap.num_cells(), 0);
    assert_eq!(heap.heap_info().allocated_bytes, 0);
    assert_eq!(heap.external_bytes(), 0);
    let stats = heap.last_gc_stats().unwrap();
    assert_eq!(stats.reclaimed_cells, 2 * CHAIN);
    assert_eq!(stats.finalized_cells, CHAIN);
}

#[test]
fn long_lived_cells_evacuate_to_the_front() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::with_slots(2);

    let ordinary = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[0] = Value::Cell(ordinary);
    let long_lived = Record::create_long_lived(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[1] = Value::Cell(long_lived);

    collect(&mut heap, &mut roots);
    // The long-lived cell lands at a lower index than the ordinary one even
    // though it was allocated later.
    let ordinary = roots.values[0].expect_cell();
    let long_lived = roots.values[1].expect_cell();
    assert!(long_lived.raw() & 0x7fff_ffff < ordinary.raw() & 0x7fff_ffff);
}

#[test]
fn restore_mode_places_allocations_long_lived() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::with_slots(2);

    heap.set_restoring_image(true);
    assert!(heap.is_restoring_image());
    let restored = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[0] = Value::Cell(restored);
    heap.set_restoring_image(false);

    let ordinary = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    roots.values[1] = Value::Cell(ordinary);

    collect(&mut heap, &mut roots);
    let restored = roots.values[0].expect_cell();
    let ordinary = roots.values[1].expect_cell();
    assert!(restored.raw() & 0x7fff_ffff < ordinary.raw() & 0x7fff_ffff);
}
