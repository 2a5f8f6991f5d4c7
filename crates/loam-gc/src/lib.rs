//! A relocating, handle-based garbage-collected heap for embedding language
//! runtimes.
//!
//! `loam-gc` provides the memory subsystem a managed-language runtime builds
//! on: a tracing, moving collector with a typed heap object model, weak
//! references with recyclable slots, stable object identity for analysis
//! tools, and a segmented array as the canonical variable-size storage.
//!
//! # Model
//!
//! - **Explicit context, no globals.** A [`GcHeap`] owns everything; the
//!   embedder implements [`RootProvider`] and pairs the two in a [`Mutator`]
//!   for any operation that can allocate.
//! - **Everything moves.** Cell references are bank+index handles, and every
//!   collection evacuates survivors into the other bank, rewriting all
//!   recorded references (roots, [`Handle`] scopes, weak slots, cell
//!   fields). Keep cell pointers only in places the collector scans.
//! - **Closed kinds.** Heap cells come in a fixed set of kinds dispatched
//!   through a static descriptor table: field visiting, finalization,
//!   trimming, native-memory attribution.
//! - **Strict mode.** Internal invariants are checked at runtime when
//!   [`GcConfig::strict`] is on (the default in debug builds) and trusted
//!   when off.
//!
//! # Quick start
//!
//! ```
//! use loam_gc::{GcConfig, GcHeap, Mutator, NoRoots, Record, Value};
//!
//! let mut heap = GcHeap::new(GcConfig::default());
//! let mut roots = NoRoots;
//! let mut m = Mutator::new(&mut heap, &mut roots);
//!
//! m.with_scope(|m| {
//!     let record = Record::create(m, 2);
//!     let this = m.heap.make_handle(Value::Cell(record));
//!     Record::set(m.heap, record, 0, Value::Number(42.0));
//!     assert_eq!(Record::get(m.heap, m.heap.handle_cell(this), 0), Value::Number(42.0));
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod acceptor;
mod cell;
mod config;
mod errors;
mod handles;
mod heap;
mod id_tracker;
mod segmented_array;
mod snapshot;
mod value;
mod vtable;
mod weak;

/// Statistics and instrumentation types.
pub mod metrics;

pub use acceptor::{
    FieldLabel, NoRoots, RootAcceptor, RootProvider, RootSection, SlotAcceptor, WeakAcceptor,
};
pub use cell::{CellKind, CellPayload, HeapCell, Record, Text};
pub use config::{GcConfig, TripwireConfig};
pub use errors::{GcError, GcResult};
pub use handles::{GcScope, Handle};
pub use heap::{AllocHint, GcHeap, GcPhase, Mutator, TripwireContext};
pub use id_tracker::{IdTracker, Location, NodeId};
pub use metrics::{
    gc_history, global_metrics, CumulativeHeapStats, DebugHeapInfo, FixedSizeHint, GcCause,
    GcStats, HeapInfo, StatsAccumulator,
};
pub use segmented_array::{
    Segment, SegmentedArray, SEGMENT_MAX_LENGTH, VALUE_TO_SEGMENT_THRESHOLD,
};
pub use snapshot::{HeapSnapshot, SnapshotEdge, SnapshotNode};
pub use value::{CellPtr, SymbolId, Value};
pub use vtable::{vtable, FinalizeCtx, NativeAllocation, VTable};
pub use weak::{WeakRef, WeakSlotState};
