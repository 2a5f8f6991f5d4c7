//! Heap snapshots: a node/edge graph for external analysis tools.
//!
//! Nodes are live cells and the native allocations they own, keyed by the
//! stable IDs of the identity tracker, plus a synthetic super-root and one
//! pseudo-node per root section (reserved IDs). Edges are typed field
//! references. Each node is emitted exactly once and referenced by ID
//! thereafter, so arbitrarily deep or cyclic graphs serialize without
//! duplication. Building a snapshot reads the heap but never changes its
//! contents, and allocation is forbidden for the duration.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::acceptor::{FieldLabel, RootAcceptor, RootProvider, RootSection, SlotAcceptor};
use crate::cell::CellKind;
use crate::heap::{GcHeap, Mutator};
use crate::id_tracker::{IdTracker, NodeId};
use crate::value::{CellPtr, Value};
use crate::vtable::vtable;

/// One node in the snapshot graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Stable node ID (even: heap cell, odd: native allocation, reserved
    /// range: synthetic).
    pub id: NodeId,
    /// Kind name ("Record", "Text", ..., "native", "synthetic").
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Bytes attributed to the node itself.
    pub self_size: usize,
}

/// One directed, named edge in the snapshot graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEdge {
    /// Source node ID.
    pub from: NodeId,
    /// Target node ID.
    pub to: NodeId,
    /// Field name, element index, or root-slot label.
    pub name: String,
}

/// A complete heap snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapSnapshot {
    /// The super-root's node ID.
    pub root: NodeId,
    /// Every node, each exactly once.
    pub nodes: Vec<SnapshotNode>,
    /// Every edge.
    pub edges: Vec<SnapshotEdge>,
}

impl HeapSnapshot {
    /// The node with the given ID, if present.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&SnapshotNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving the given node.
    pub fn edges_from(&self, id: NodeId) -> impl Iterator<Item = &SnapshotEdge> {
        self.edges.iter().filter(move |e| e.from == id)
    }
}

/// Collects `(section, cell)` pairs from the embedder's root walk without
/// touching the heap.
struct RootCollector {
    current: RootSection,
    entries: Vec<(RootSection, CellPtr)>,
}

impl SlotAcceptor for RootCollector {
    fn accept_value(&mut self, slot: &mut Value, _label: FieldLabel<'_>) {
        if let Value::Cell(ptr) = *slot {
            self.entries.push((self.current, ptr));
        }
    }
}

impl RootAcceptor for RootCollector {
    fn begin_section(&mut self, section: RootSection) {
        self.current = section;
    }
}

/// Collects labeled outgoing references from one cell.
struct EdgeRecorder {
    targets: Vec<(String, CellPtr)>,
}

impl SlotAcceptor for EdgeRecorder {
    fn accept_value(&mut self, slot: &mut Value, label: FieldLabel<'_>) {
        if let Value::Cell(ptr) = *slot {
            let name = match label {
                FieldLabel::Named(name) => name.to_owned(),
                FieldLabel::Index(index) => index.to_string(),
                FieldLabel::Hidden => "(internal)".to_owned(),
            };
            self.targets.push((name, ptr));
        }
    }
}

impl GcHeap {
    /// Build a snapshot of every live cell and tracked native allocation.
    pub fn build_snapshot(&mut self, roots: &mut dyn RootProvider) -> HeapSnapshot {
        self.begin_no_alloc();

        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        nodes.push(SnapshotNode {
            id: IdTracker::SUPER_ROOT,
            kind: "synthetic".to_owned(),
            name: "(super root)".to_owned(),
            self_size: 0,
        });
        for section in RootSection::ALL {
            let id = IdTracker::section_id(section);
            nodes.push(SnapshotNode {
                id,
                kind: "synthetic".to_owned(),
                name: format!("({})", section.name()),
                self_size: 0,
            });
            edges.push(SnapshotEdge {
                from: IdTracker::SUPER_ROOT,
                to: id,
                name: section.name().to_owned(),
            });
        }

        // Root edges: the embedder's sections, then the handle stack.
        let mut collector = RootCollector {
            current: RootSection::Custom,
            entries: Vec::new(),
        };
        roots.mark_roots(&mut collector, true);
        collector.begin_section(RootSection::GcScopes);
        for slot in self.handle_values() {
            if let Value::Cell(ptr) = *slot {
                collector.entries.push((RootSection::GcScopes, ptr));
            }
        }
        let mut per_section_counts = [0usize; RootSection::COUNT];
        for (section, target) in collector.entries {
            let slot_number = per_section_counts[section as usize];
            per_section_counts[section as usize] += 1;
            let to = self.object_id(target);
            edges.push(SnapshotEdge {
                from: IdTracker::section_id(section),
                to,
                name: slot_number.to_string(),
            });
        }

        // Cell nodes, native nodes, and field edges.
        for index in self.live_cell_indices() {
            let ptr = CellPtr::new(self.active_bank(), index);
            let id = self.object_id(ptr);
            let (kind, self_size, display_name, native) = {
                let cell = self.cell_ref(ptr);
                let display_name = match cell.kind() {
                    CellKind::Text => {
                        let text = crate::cell::Text::as_str(self, ptr);
                        let mut excerpt: String = text.chars().take(32).collect();
                        if excerpt.len() < text.len() {
                            excerpt.push('\u{2026}');
                        }
                        excerpt
                    }
                    other => other.name().to_owned(),
                };
                let native = vtable(cell.kind()).native_memory.and_then(|f| f(cell));
                (cell.kind(), cell.size(), display_name, native)
            };
            nodes.push(SnapshotNode {
                id,
                kind: kind.name().to_owned(),
                name: display_name,
                self_size,
            });
            if let Some(native) = native {
                let native_id = self.native_id(native.addr);
                nodes.push(SnapshotNode {
                    id: native_id,
                    kind: "native".to_owned(),
                    name: native.label.to_owned(),
                    self_size: native.bytes,
                });
                edges.push(SnapshotEdge {
                    from: id,
                    to: native_id,
                    name: native.label.to_owned(),
                });
            }

            let mut recorder = EdgeRecorder {
                targets: Vec::new(),
            };
            self.with_cell_taken(index, |_, cell| {
                (vtable(cell.kind()).mark)(&mut cell.payload, &mut recorder);
            });
            for (name, target) in recorder.targets {
                let to = self.object_id(target);
                edges.push(SnapshotEdge { from: id, to, name });
            }
        }

        self.end_no_alloc();
        HeapSnapshot {
            root: IdTracker::SUPER_ROOT,
            nodes,
            edges,
        }
    }

    /// Serialize a snapshot as JSON to `out`.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `out`.
    pub fn create_snapshot(
        &mut self,
        roots: &mut dyn RootProvider,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let snapshot = self.build_snapshot(roots);
        serde_json::to_writer(&mut *out, &snapshot).map_err(io::Error::from)?;
        writeln!(out)
    }

    /// Write a snapshot to the file at `path`.
    ///
    /// # Errors
    ///
    /// Propagates file-creation and write failures.
    pub fn create_snapshot_to_file(
        &mut self,
        roots: &mut dyn RootProvider,
        path: &Path,
    ) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.create_snapshot(roots, &mut out)
    }
}

impl Mutator<'_> {
    /// Build a snapshot through this mutator's root provider.
    pub fn build_snapshot(&mut self) -> HeapSnapshot {
        self.heap.build_snapshot(&mut *self.roots)
    }

    /// Serialize a snapshot as JSON to `out`.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `out`.
    pub fn create_snapshot(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.heap.create_snapshot(&mut *self.roots, out)
    }
}
