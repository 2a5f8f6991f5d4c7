//! Stable object identity, independent of physical location.
//!
//! Analysis tools (snapshots, memory profilers) need IDs that survive
//! relocation and are never reused, so two objects can never be confused
//! even across the death of one. Heap cells draw even IDs and native
//! allocations odd IDs from one monotonically increasing counter family, so
//! a consumer can classify an ID's origin without a side table.

use std::collections::HashMap;

use crate::value::CellPtr;
use crate::RootSection;

/// A stable numeric identity for a heap cell or native allocation.
pub type NodeId = u64;

/// A tracked memory location: either a heap cell or a native allocation
/// keyed by its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// A heap cell, keyed by its current (bank, index) location.
    Object(CellPtr),
    /// Native (malloc'd) memory, keyed by address.
    Native(usize),
}

/// Tracks which objects need a stable identity, assigning IDs lazily on
/// first query and rebinding them when the collector relocates cells.
#[derive(Debug)]
pub struct IdTracker {
    next_object_id: NodeId,
    next_native_id: NodeId,
    map: HashMap<Location, NodeId>,
    strict: bool,
}

/// Even/odd step between consecutive IDs of one origin.
const ID_STEP: NodeId = 2;

impl IdTracker {
    /// The ID reported when no ID can be found.
    pub const NO_ID: NodeId = 0;

    /// The ID of the synthetic super-root in snapshots.
    pub const SUPER_ROOT: NodeId = 1;

    /// First ID past the reserved range, rounded up to even so heap IDs stay
    /// even.
    pub const FIRST_NON_RESERVED: NodeId = {
        let first = 2 + RootSection::COUNT as NodeId;
        first + first % 2
    };

    /// The reserved snapshot node ID for a root section.
    #[must_use]
    pub const fn section_id(section: RootSection) -> NodeId {
        2 + section as NodeId
    }

    pub(crate) fn new(strict: bool) -> Self {
        Self {
            next_object_id: Self::FIRST_NON_RESERVED,
            next_native_id: Self::FIRST_NON_RESERVED + 1,
            map: HashMap::new(),
            strict,
        }
    }

    /// Whether any IDs have been handed out yet.
    #[must_use]
    pub fn is_tracking_ids(&self) -> bool {
        !self.map.is_empty()
    }

    /// The unique ID of `cell`, assigned on first query.
    pub fn object_id(&mut self, cell: CellPtr) -> NodeId {
        if let Some(&id) = self.map.get(&Location::Object(cell)) {
            return id;
        }
        let id = self.next_object_id();
        self.map.insert(Location::Object(cell), id);
        id
    }

    /// The unique ID of the native allocation at `addr`, assigned on first
    /// query.
    pub fn native_id(&mut self, addr: usize) -> NodeId {
        if let Some(&id) = self.map.get(&Location::Native(addr)) {
            return id;
        }
        let id = self.next_native_id();
        self.map.insert(Location::Native(addr), id);
        id
    }

    /// Rebind a tracked cell to its post-relocation location.
    ///
    /// Moves must be recorded in move order: if A moves to B and C then moves
    /// to A's old location, A's move must be recorded first, so that no two
    /// live locations ever alias one ID.
    pub fn move_object(&mut self, old: CellPtr, new: CellPtr) {
        if old == new {
            return;
        }
        let Some(id) = self.map.remove(&Location::Object(old)) else {
            // Untracked objects don't acquire an ID just because they moved.
            return;
        };
        if self.strict {
            assert!(
                !self.map.contains_key(&Location::Object(new)),
                "moving {old:?} onto a location that is already tracked"
            );
        }
        self.map.insert(Location::Object(new), id);
    }

    /// Stop tracking a cell. Its ID is retired, never reassigned.
    pub fn untrack_object(&mut self, cell: CellPtr) {
        self.map.remove(&Location::Object(cell));
    }

    /// Stop tracking native memory. Required when the memory is freed, since
    /// later allocations may reuse the address.
    pub fn untrack_native(&mut self, addr: usize) {
        self.map.remove(&Location::Native(addr));
    }

    /// Invoke `callback` on every tracked (location, ID) pair.
    pub fn for_each_id(&self, mut callback: impl FnMut(Location, NodeId)) {
        for (&location, &id) in &self.map {
            callback(location, id);
        }
    }

    fn next_object_id(&mut self) -> NodeId {
        assert!(
            self.next_object_id < NodeId::MAX - ID_STEP,
            "ran out of object IDs"
        );
        let id = self.next_object_id;
        self.next_object_id += ID_STEP;
        id
    }

    fn next_native_id(&mut self) -> NodeId {
        assert!(
            self.next_native_id < NodeId::MAX - ID_STEP,
            "ran out of native IDs"
        );
        let id = self.next_native_id;
        self.next_native_id += ID_STEP;
        id
    }
}
