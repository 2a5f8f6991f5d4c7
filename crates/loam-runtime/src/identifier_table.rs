//! The identifier table: interned symbol names.
//!
//! Symbols are small integer IDs naming interned strings. The collector
//! treats symbols like references: every `Value::Symbol` encountered during
//! marking sets a bit, and at the end of reclamation the table frees every
//! unmarked, unpinned entry. Entry indices are recycled through a free list;
//! the strings themselves are ordinary native memory.

use std::collections::HashMap;

use loam_gc::SymbolId;

#[derive(Debug)]
struct Entry {
    text: String,
    pinned: bool,
}

/// Interned symbol storage with pinning and collector-driven reclamation.
#[derive(Debug, Default)]
pub struct IdentifierTable {
    entries: Vec<Option<Entry>>,
    lookup: HashMap<String, SymbolId>,
    free: Vec<u32>,
}

impl IdentifierTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing symbol if already present.
    pub fn get_or_intern(&mut self, name: &str) -> SymbolId {
        if let Some(&existing) = self.lookup.get(name) {
            return existing;
        }
        let entry = Entry {
            text: name.to_owned(),
            pinned: false,
        };
        let symbol = if let Some(index) = self.free.pop() {
            self.entries[index as usize] = Some(entry);
            SymbolId(index)
        } else {
            let index = u32::try_from(self.entries.len()).expect("identifier table overflow");
            self.entries.push(Some(entry));
            SymbolId(index)
        };
        self.lookup.insert(name.to_owned(), symbol);
        symbol
    }

    /// Pin a symbol so reclamation never frees it.
    pub fn pin(&mut self, symbol: SymbolId) {
        if let Some(entry) = self.entries[symbol.0 as usize].as_mut() {
            entry.pinned = true;
        }
    }

    /// Whether the symbol is pinned.
    #[must_use]
    pub fn is_pinned(&self, symbol: SymbolId) -> bool {
        self.entries
            .get(symbol.0 as usize)
            .and_then(Option::as_ref)
            .is_some_and(|entry| entry.pinned)
    }

    /// The symbol's text, if it is still live.
    #[must_use]
    pub fn text(&self, symbol: SymbolId) -> Option<&str> {
        self.entries
            .get(symbol.0 as usize)
            .and_then(Option::as_ref)
            .map(|entry| entry.text.as_str())
    }

    /// One higher than the largest symbol index ever used; sizes the
    /// collector's marking bitset.
    #[must_use]
    pub fn upper_bound(&self) -> u32 {
        u32::try_from(self.entries.len()).expect("identifier table overflow")
    }

    /// Number of live entries.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Pinned symbols, for root marking.
    pub fn pinned_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry
                .as_ref()
                .filter(|e| e.pinned)
                .map(|_| SymbolId(u32::try_from(index).unwrap()))
        })
    }

    /// Free every entry that is neither pinned nor marked. Invoked by the
    /// collector at the end of reclamation.
    pub fn free_unmarked(&mut self, marked: &[bool]) {
        for index in 0..self.entries.len() {
            let keep = self.entries[index].as_ref().is_some_and(|entry| {
                entry.pinned || marked.get(index).copied().unwrap_or(false)
            });
            if keep || self.entries[index].is_none() {
                continue;
            }
            let entry = self.entries[index].take().expect("checked above");
            self.lookup.remove(&entry.text);
            self.free.push(u32::try_from(index).unwrap());
        }
    }

    /// Approximate native bytes held by the table.
    #[must_use]
    pub fn external_bytes(&self) -> usize {
        self.entries
            .iter()
            .flatten()
            .map(|entry| entry.text.capacity() + std::mem::size_of::<Entry>())
            .sum()
    }
}
