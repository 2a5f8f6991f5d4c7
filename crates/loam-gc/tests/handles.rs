//! Handle scopes and handle sanitization.

mod common;

use common::{collect, strict_heap, TestRoots};
use loam_gc::{GcConfig, GcHeap, Mutator, Record, Value};

#[test]
fn handles_track_relocation() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();

    let scope = heap.enter_scope();
    let cell = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    let this = heap.make_handle(Value::Cell(cell));
    Record::set(&mut heap, cell, 0, Value::Number(7.0));

    collect(&mut heap, &mut roots);
    let moved = heap.handle_cell(this);
    assert_ne!(moved, cell);
    assert_eq!(Record::get(&heap, moved, 0), Value::Number(7.0));
    heap.exit_scope(scope);
}

#[test]
fn handles_alone_keep_cells_alive() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();

    let scope = heap.enter_scope();
    let cell = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    let this = heap.make_handle(Value::Cell(cell));

    collect(&mut heap, &mut roots);
    assert_eq!(heap.num_cells(), 1);

    // Exiting the scope drops the only root.
    heap.exit_scope(scope);
    collect(&mut heap, &mut roots);
    assert_eq!(heap.num_cells(), 0);
    let _ = this;
}

#[test]
#[should_panic(expected = "reverse entry order")]
fn out_of_order_scope_exit_panics_in_strict_mode() {
    let mut heap = strict_heap();
    let outer = heap.enter_scope();
    let _inner = heap.enter_scope();
    heap.exit_scope(outer);
}

#[test]
#[should_panic(expected = "scope has exited")]
fn stale_handle_read_panics_in_strict_mode() {
    let mut heap = strict_heap();
    let mut roots = TestRoots::new();
    let scope = heap.enter_scope();
    let cell = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    let this = heap.make_handle(Value::Cell(cell));
    heap.exit_scope(scope);
    let _ = heap.read_handle(this);
}

fn sanitizing_heap() -> GcHeap {
    GcHeap::new(
        GcConfig::default()
            .with_name("sanitize-heap")
            .with_strict(true)
            .with_sanitize_rate(1.0)
            .with_sanitize_seed(42),
    )
}

#[test]
fn sanitizer_relocates_on_every_allocation() {
    let mut heap = sanitizing_heap();
    let mut roots = TestRoots::new();

    let scope = heap.enter_scope();
    let first = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    let this = heap.make_handle(Value::Cell(first));
    Record::set(&mut heap, first, 0, Value::Number(1.0));

    // Every allocation runs a shuffling collection first; the handle keeps
    // pace while the raw pointer goes stale.
    let _second = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    assert_ne!(heap.handle_cell(this), first);
    assert_eq!(
        Record::get(&heap, heap.handle_cell(this), 0),
        Value::Number(1.0)
    );
    heap.exit_scope(scope);
}

#[test]
#[should_panic(expected = "stale cell pointer")]
fn sanitizer_catches_unrooted_pointer_use() {
    let mut heap = sanitizing_heap();
    let mut roots = TestRoots::new();

    let scope = heap.enter_scope();
    let stale = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    let keep = Record::create(&mut Mutator::new(&mut heap, &mut roots), 1);
    let _this = heap.make_handle(Value::Cell(keep));

    // `stale` was never rooted; the sanitizing collection above already
    // relocated the heap out from under it.
    let _ = Record::get(&heap, stale, 0);
    heap.exit_scope(scope);
}
