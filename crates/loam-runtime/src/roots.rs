//! The runtime's root set and its root-provider implementation.

use loam_gc::{
    FieldLabel, RootAcceptor, RootProvider, RootSection, SlotAcceptor, SymbolId, Value,
    WeakAcceptor, WeakRef,
};

use crate::identifier_table::IdentifierTable;

/// One call-stack frame: a name for diagnostics plus its rooted value slots.
#[derive(Debug, Default)]
pub struct StackFrame {
    /// Function or frame label, rendered in stack traces.
    pub name: String,
    /// Rooted local slots.
    pub slots: Vec<Value>,
}

/// A loaded module's root fields.
#[derive(Debug)]
pub struct ModuleRecord {
    /// Module name.
    pub name: String,
    /// The module's exports object.
    pub exports: Value,
}

/// Every reference location the runtime owns outside the heap. The collector
/// discovers (and after relocation, rewrites) all of them through
/// [`RootProvider::mark_roots`], section by section in declared order.
#[derive(Default)]
pub struct RuntimeRoots {
    /// Virtual-machine registers.
    pub registers: Vec<Value>,
    /// The global object slot.
    pub global: Value,
    /// Loaded modules.
    pub modules: Vec<ModuleRecord>,
    /// Interned string cells.
    pub interned_strings: Vec<Value>,
    /// The builtins table.
    pub builtins: Vec<Value>,
    /// Prototype objects.
    pub prototypes: Vec<Value>,
    /// The identifier table.
    pub identifiers: IdentifierTable,
    /// Registered symbol-to-value bindings. Registration keeps both the
    /// symbol and the value alive.
    pub symbol_registry: Vec<(SymbolId, Value)>,
    /// Sampling-profiler retained values.
    pub profiler_roots: Vec<Value>,
    /// Call-stack frames, oldest first.
    pub call_stack: Vec<StackFrame>,
    pub(crate) custom_roots: Vec<Box<dyn FnMut(&mut dyn RootAcceptor)>>,
    /// Weak references held by the runtime.
    pub weak_holders: Vec<WeakRef>,
}

impl RuntimeRoots {
    fn accept_all(acceptor: &mut dyn RootAcceptor, slots: &mut [Value]) {
        for slot in slots {
            acceptor.accept_value(slot, FieldLabel::Hidden);
        }
    }
}

impl RootProvider for RuntimeRoots {
    fn mark_roots(&mut self, acceptor: &mut dyn RootAcceptor, _include_long_lived: bool) {
        acceptor.begin_section(RootSection::Registers);
        Self::accept_all(acceptor, &mut self.registers);

        acceptor.begin_section(RootSection::InstanceVars);
        acceptor.accept_value(&mut self.global, FieldLabel::Named("global"));

        acceptor.begin_section(RootSection::Modules);
        for module in &mut self.modules {
            acceptor.accept_value(&mut module.exports, FieldLabel::Named("exports"));
        }

        acceptor.begin_section(RootSection::CharStrings);
        Self::accept_all(acceptor, &mut self.interned_strings);

        acceptor.begin_section(RootSection::Builtins);
        Self::accept_all(acceptor, &mut self.builtins);

        acceptor.begin_section(RootSection::Prototypes);
        Self::accept_all(acceptor, &mut self.prototypes);

        acceptor.begin_section(RootSection::IdentifierTable);
        for symbol in self.identifiers.pinned_symbols() {
            acceptor.accept_symbol(symbol);
        }

        acceptor.begin_section(RootSection::SymbolRegistry);
        for (symbol, value) in &mut self.symbol_registry {
            acceptor.accept_symbol(*symbol);
            acceptor.accept_value(value, FieldLabel::Hidden);
        }

        acceptor.begin_section(RootSection::Profiler);
        Self::accept_all(acceptor, &mut self.profiler_roots);

        // Frame locals and embedder callbacks both report under Custom.
        acceptor.begin_section(RootSection::Custom);
        for frame in &mut self.call_stack {
            Self::accept_all(acceptor, &mut frame.slots);
        }
        for callback in &mut self.custom_roots {
            callback(&mut *acceptor);
        }
    }

    fn mark_weak_roots(&mut self, acceptor: &mut dyn WeakAcceptor) {
        for weak in &self.weak_holders {
            acceptor.accept_weak(*weak);
        }
    }

    fn symbols_table_upper_bound(&self) -> u32 {
        self.identifiers.upper_bound()
    }

    fn free_unmarked_symbols(&mut self, marked: &[bool]) {
        self.identifiers.free_unmarked(marked);
    }

    fn estimate_external_memory(&self) -> usize {
        let frames: usize = self
            .call_stack
            .iter()
            .map(|frame| frame.name.capacity())
            .sum();
        let modules: usize = self.modules.iter().map(|m| m.name.capacity()).sum();
        self.identifiers.external_bytes() + frames + modules
    }

    fn convert_symbol_to_text(&self, symbol: SymbolId) -> Option<String> {
        self.identifiers.text(symbol).map(ToOwned::to_owned)
    }

    fn call_stack_text(&self) -> String {
        let mut text = String::new();
        for frame in self.call_stack.iter().rev() {
            text.push_str("    at ");
            if frame.name.is_empty() {
                text.push_str("<anonymous>");
            } else {
                text.push_str(&frame.name);
            }
            text.push('\n');
        }
        text
    }
}
