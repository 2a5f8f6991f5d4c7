//! The embedding runtime's root set for the loam heap.
//!
//! A language runtime owns many reference locations outside the heap:
//! registers, the global object, loaded modules, interned strings, builtins,
//! prototypes, the identifier table, the symbol registry, profiler state,
//! and the call stack. [`Runtime`] bundles those locations with a
//! [`GcHeap`] and implements the collector's root-provider protocol over
//! them, so a collection can discover, and after relocation rewrite, every
//! root the runtime holds.
//!
//! ```
//! use loam_gc::{Record, Value};
//! use loam_runtime::Runtime;
//!
//! let mut rt = Runtime::new(loam_gc::GcConfig::default());
//! let node = Record::create(&mut rt.ctx(), 1);
//! rt.set_register(0, Value::Cell(node));
//! rt.collect();
//! let node = rt.register(0).expect_cell();
//! assert_eq!(Record::get(&rt.heap, node, 0), Value::Empty);
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod identifier_table;
mod roots;

pub use identifier_table::IdentifierTable;
pub use roots::{ModuleRecord, RuntimeRoots, StackFrame};

use std::io::{self, Write};

use loam_gc::{
    CellPtr, GcCause, GcConfig, GcHeap, HeapInfo, Mutator, RootAcceptor, RootProvider, SymbolId,
    Text, Value, WeakRef,
};

/// A heap plus the runtime root set that feeds its collections.
pub struct Runtime {
    /// The garbage-collected heap.
    pub heap: GcHeap,
    /// The runtime's root locations.
    pub roots: RuntimeRoots,
}

impl Runtime {
    /// Create a runtime with a fresh heap.
    #[must_use]
    pub fn new(config: GcConfig) -> Self {
        Self {
            heap: GcHeap::new(config),
            roots: RuntimeRoots::default(),
        }
    }

    /// A mutator pairing this runtime's heap with its root set.
    pub fn ctx(&mut self) -> Mutator<'_> {
        Mutator {
            heap: &mut self.heap,
            roots: &mut self.roots,
        }
    }

    /// Force a full collection.
    pub fn collect(&mut self) {
        self.ctx().collect(GcCause::Forced);
    }

    // ------------------------------------------------------------------
    // Root mutation
    // ------------------------------------------------------------------

    /// Write register `index`, growing the register file as needed.
    pub fn set_register(&mut self, index: usize, value: Value) {
        if index >= self.roots.registers.len() {
            self.roots.registers.resize(index + 1, Value::Null);
        }
        self.roots.registers[index] = value;
    }

    /// Read register `index`.
    #[must_use]
    pub fn register(&self, index: usize) -> Value {
        self.roots.registers.get(index).copied().unwrap_or(Value::Null)
    }

    /// Set the global object slot.
    pub fn set_global(&mut self, value: Value) {
        self.roots.global = value;
    }

    /// Append to the builtins table, returning the builtin's index.
    pub fn add_builtin(&mut self, value: Value) -> usize {
        self.roots.builtins.push(value);
        self.roots.builtins.len() - 1
    }

    /// Append to the prototypes table, returning the prototype's index.
    pub fn add_prototype(&mut self, value: Value) -> usize {
        self.roots.prototypes.push(value);
        self.roots.prototypes.len() - 1
    }

    /// Register a module's exports under `name`.
    pub fn register_module(&mut self, name: &str, exports: Value) {
        tracing::debug!(module = name, "registered module roots");
        self.roots.modules.push(ModuleRecord {
            name: name.to_owned(),
            exports,
        });
    }

    /// Bind `value` to `symbol` in the symbol registry. Registration keeps
    /// both alive.
    pub fn register_symbol(&mut self, symbol: SymbolId, value: Value) {
        self.roots.symbol_registry.push((symbol, value));
    }

    /// Register a callback that reports extra roots every collection.
    pub fn add_custom_root(&mut self, callback: Box<dyn FnMut(&mut dyn RootAcceptor)>) {
        self.roots.custom_roots.push(callback);
    }

    // ------------------------------------------------------------------
    // Interning
    // ------------------------------------------------------------------

    /// Intern a symbol name.
    pub fn intern_symbol(&mut self, name: &str) -> SymbolId {
        self.roots.identifiers.get_or_intern(name)
    }

    /// Intern a symbol name and pin it for the life of the runtime.
    pub fn intern_pinned_symbol(&mut self, name: &str) -> SymbolId {
        let symbol = self.roots.identifiers.get_or_intern(name);
        self.roots.identifiers.pin(symbol);
        symbol
    }

    /// Allocate an interned string cell, rooted in the char-strings table.
    pub fn intern_string(&mut self, text: &str) -> CellPtr {
        let cell = Text::create(&mut self.ctx(), text);
        self.roots.interned_strings.push(Value::Cell(cell));
        cell
    }

    // ------------------------------------------------------------------
    // Call stack
    // ------------------------------------------------------------------

    /// Push a named frame.
    pub fn push_frame(&mut self, name: &str) {
        self.roots.call_stack.push(StackFrame {
            name: name.to_owned(),
            slots: Vec::new(),
        });
    }

    /// Pop the innermost frame, dropping its rooted slots.
    pub fn pop_frame(&mut self) {
        self.roots.call_stack.pop();
    }

    /// Root `value` in the innermost frame, returning its slot index.
    ///
    /// # Panics
    ///
    /// Panics when no frame has been pushed.
    pub fn push_frame_slot(&mut self, value: Value) -> usize {
        let frame = self
            .roots
            .call_stack
            .last_mut()
            .expect("push_frame_slot requires an active frame");
        frame.slots.push(value);
        frame.slots.len() - 1
    }

    /// The current call stack rendered as text.
    #[must_use]
    pub fn call_stack_text(&self) -> String {
        RootProvider::call_stack_text(&self.roots)
    }

    // ------------------------------------------------------------------
    // Weak references
    // ------------------------------------------------------------------

    /// Create a runtime-held weak reference to `target`.
    pub fn make_weak(&mut self, target: CellPtr) -> WeakRef {
        let weak = self.heap.new_weak_ref(target);
        self.roots.weak_holders.push(weak);
        weak
    }

    /// Drop the runtime's hold on `weak`; its slot is recycled at the next
    /// collection unless another holder reports it.
    pub fn release_weak(&mut self, weak: WeakRef) {
        self.roots.weak_holders.retain(|held| *held != weak);
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Heap info including the runtime's external-memory estimate.
    #[must_use]
    pub fn heap_info(&self) -> HeapInfo {
        let mut info = self.heap.heap_info();
        info.malloc_size_estimate = self.roots.estimate_external_memory();
        info
    }

    /// Write a heap snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `out`.
    pub fn create_snapshot(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.ctx().create_snapshot(out)
    }

    /// Dump cumulative collection statistics as JSON.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `out`.
    pub fn print_stats(&self, out: &mut dyn Write) -> io::Result<()> {
        self.heap.print_stats(out)
    }
}
