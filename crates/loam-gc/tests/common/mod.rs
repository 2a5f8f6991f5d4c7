//! Shared test harness: a minimal root provider driven from plain vectors.
#![allow(dead_code)]

use loam_gc::{
    FieldLabel, GcConfig, GcHeap, Mutator, RootAcceptor, RootProvider, RootSection, Value,
    WeakAcceptor, WeakRef,
};

/// A root set for tests: one section of value roots, one of bare cell roots,
/// plus weak holders and a symbol table stub.
#[derive(Default)]
pub struct TestRoots {
    pub values: Vec<Value>,
    pub cells: Vec<loam_gc::CellPtr>,
    pub weaks: Vec<WeakRef>,
    pub symbols_upper_bound: u32,
    pub freed_symbols: Vec<u32>,
}

impl TestRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// A root set with `slots` value roots, all `Null`.
    pub fn with_slots(slots: usize) -> Self {
        Self {
            values: vec![Value::Null; slots],
            ..Self::default()
        }
    }
}

impl RootProvider for TestRoots {
    fn mark_roots(&mut self, acceptor: &mut dyn RootAcceptor, _include_long_lived: bool) {
        acceptor.begin_section(RootSection::Registers);
        for slot in &mut self.values {
            acceptor.accept_value(slot, FieldLabel::Hidden);
        }
        acceptor.begin_section(RootSection::Custom);
        for slot in &mut self.cells {
            acceptor.accept_cell(slot, FieldLabel::Hidden);
        }
    }

    fn mark_weak_roots(&mut self, acceptor: &mut dyn WeakAcceptor) {
        for weak in &self.weaks {
            acceptor.accept_weak(*weak);
        }
    }

    fn symbols_table_upper_bound(&self) -> u32 {
        self.symbols_upper_bound
    }

    fn free_unmarked_symbols(&mut self, marked: &[bool]) {
        for (index, is_marked) in marked.iter().enumerate() {
            if !is_marked {
                self.freed_symbols.push(u32::try_from(index).unwrap());
            }
        }
    }

    fn call_stack_text(&self) -> String {
        "    at <test harness>".to_owned()
    }
}

/// A strict heap with a roomy default capacity, so tests control collections.
pub fn strict_heap() -> GcHeap {
    GcHeap::new(
        GcConfig::default()
            .with_name("test-heap")
            .with_strict(true)
            .with_initial_heap_size(8 << 20),
    )
}

/// Run one forced collection.
pub fn collect(heap: &mut GcHeap, roots: &mut TestRoots) {
    Mutator::new(heap, roots).collect(loam_gc::GcCause::Forced);
}
