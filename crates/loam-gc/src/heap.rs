//! The collector core: heap ownership, allocation, and the collection cycle.
//!
//! [`GcHeap`] owns every cell, the handle stack, the weak-slot table, and the
//! identity tracker. There is no global collector state; the heap is an
//! explicit context object, and operations that can allocate (and therefore
//! collect) go through a [`Mutator`], which pairs the heap with the
//! embedder's [`RootProvider`].
//!
//! Cells live in one of two banks. A collection marks the live graph, runs
//! finalizers for the dead, then evacuates every survivor into the other
//! bank and rewrites all recorded references (roots, handles, weak slots,
//! cell fields) through a forwarding table, rebinding tracked identities in
//! move order. Every collection is therefore a moving collection: code that
//! keeps a raw [`CellPtr`] anywhere the collector does not scan has a bug,
//! and strict mode plus handle sanitization exist to surface it.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, debug_span, error, info, warn};

use crate::acceptor::{
    FieldLabel, RootAcceptor, RootProvider, RootSection, SlotAcceptor, WeakAcceptor,
};
use crate::cell::{CellHeader, CellKind, CellPayload, HeapCell};
use crate::config::GcConfig;
use crate::handles::{GcScope, Handle, HandleStack};
use crate::id_tracker::{IdTracker, NodeId};
use crate::metrics::{
    self, CumulativeHeapStats, DebugHeapInfo, FixedSizeHint, GcCause, GcStats, HeapInfo,
    PhaseTimes,
};
use crate::value::{CellPtr, SymbolId, Value};
use crate::vtable::{vtable, FinalizeCtx};
use crate::weak::{WeakRef, WeakSlotState, WeakSlotTable};

/// Default seed for the sanitizer RNG, so sanitizing runs are reproducible.
const DEFAULT_SANITIZE_SEED: u64 = 0x6c6f_616d;

/// Where the collection cycle currently stands. Anything other than `Idle`
/// means the mutator is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    /// No cycle active; the mutator is running.
    Idle,
    /// Enumerating strong roots.
    RootScanning,
    /// Enumerating weak-reference holders.
    WeakRootScanning,
    /// Computing the transitive closure of reachability.
    Marking,
    /// Clearing and recycling weak slots.
    WeakReconciliation,
    /// Finalizing and reclaiming dead cells.
    Reclamation,
    /// Evacuating survivors and rewriting references.
    Compaction,
}

/// Allocation placement and checking hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocHint {
    /// Expected to live for the remainder of execution.
    pub long_lived: bool,
    /// Whether the payload will ever change size.
    pub fixed_size: FixedSizeHint,
    /// Must match the kind descriptor's finalizer presence; checked in
    /// strict mode.
    pub has_finalizer: bool,
}

/// Diagnostic context passed to the tripwire callback.
#[derive(Debug, Clone)]
pub struct TripwireContext {
    /// Name of the heap that crossed the threshold.
    pub heap_name: String,
    /// Live bytes (heap plus external) after the triggering collection.
    pub used_bytes: usize,
    /// The configured threshold.
    pub limit_bytes: usize,
    /// Collections completed so far.
    pub num_collections: u32,
}

struct Tripwire {
    limit: Option<usize>,
    cooldown: Duration,
    callback: Option<Box<dyn FnMut(&TripwireContext)>>,
    next_allowed: Option<Instant>,
}

/// The mutator's view of the heap: the heap itself plus the root provider
/// that must be consulted whenever an allocation triggers a collection.
pub struct Mutator<'a> {
    /// The heap.
    pub heap: &'a mut GcHeap,
    /// The embedder's root set.
    pub roots: &'a mut dyn RootProvider,
}

impl<'a> Mutator<'a> {
    /// Pair a heap with a root provider.
    pub fn new(heap: &'a mut GcHeap, roots: &'a mut dyn RootProvider) -> Self {
        Self { heap, roots }
    }

    /// Allocate a cell. May run a full collection; aborts the process when
    /// the heap cannot be grown to fit the request.
    pub fn alloc(&mut self, payload: CellPayload, hint: AllocHint) -> CellPtr {
        self.heap.alloc_cell(&mut *self.roots, payload, hint)
    }

    /// Allocate a cell expected to live for the remainder of execution.
    pub fn alloc_long_lived(&mut self, payload: CellPayload) -> CellPtr {
        self.heap.alloc_cell(
            &mut *self.roots,
            payload,
            AllocHint {
                long_lived: true,
                fixed_size: FixedSizeHint::Unknown,
                has_finalizer: false,
            },
        )
    }

    /// Force a full, synchronous collection.
    pub fn collect(&mut self, cause: GcCause) {
        self.heap.collect(&mut *self.roots, cause);
    }

    /// Run `f` inside a fresh handle scope, exiting it afterwards.
    pub fn with_scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let scope = self.heap.enter_scope();
        let result = f(self);
        self.heap.exit_scope(scope);
        result
    }

    /// Heap info including the root provider's external-memory estimate.
    #[must_use]
    pub fn heap_info_with_external(&self) -> HeapInfo {
        let mut info = self.heap.heap_info();
        info.malloc_size_estimate = self.roots.estimate_external_memory();
        info
    }
}

/// The garbage-collected heap.
pub struct GcHeap {
    config: GcConfig,
    spaces: [Vec<Option<HeapCell>>; 2],
    active: usize,
    capacity: usize,
    occupied: usize,
    external: usize,
    total_allocated: u64,
    phase: GcPhase,
    no_alloc_depth: u32,
    handles: HandleStack,
    weak: WeakSlotTable,
    ids: IdTracker,
    full_stats: CumulativeHeapStats,
    young_gen_stats: CumulativeHeapStats,
    section_times: [Duration; RootSection::COUNT],
    last_stats: Option<GcStats>,
    next_gc_id: u64,
    debug_info: DebugHeapInfo,
    restoring_image: bool,
    sanitizer: Option<SmallRng>,
    tripwire: Tripwire,
}

impl GcHeap {
    /// Create a heap with the given configuration.
    #[must_use]
    pub fn new(config: GcConfig) -> Self {
        let capacity = config.initial_heap_size.min(config.max_heap_size);
        let sanitizer = (config.sanitize_rate > 0.0).then(|| {
            SmallRng::seed_from_u64(config.sanitize_seed.unwrap_or(DEFAULT_SANITIZE_SEED))
        });
        let strict = config.strict;
        let tripwire = Tripwire {
            limit: config.tripwire.limit_bytes,
            cooldown: config.tripwire.cooldown,
            callback: None,
            next_allowed: None,
        };
        Self {
            config,
            spaces: [Vec::new(), Vec::new()],
            active: 0,
            capacity,
            occupied: 0,
            external: 0,
            total_allocated: 0,
            phase: GcPhase::Idle,
            no_alloc_depth: 0,
            handles: HandleStack::default(),
            weak: WeakSlotTable::default(),
            ids: IdTracker::new(strict),
            full_stats: CumulativeHeapStats::default(),
            young_gen_stats: CumulativeHeapStats::default(),
            section_times: [Duration::ZERO; RootSection::COUNT],
            last_stats: None,
            next_gc_id: 0,
            debug_info: DebugHeapInfo::default(),
            restoring_image: false,
            sanitizer,
            tripwire,
        }
    }

    /// The heap's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration the heap was built with.
    #[must_use]
    pub const fn config(&self) -> &GcConfig {
        &self.config
    }

    /// The current collection phase.
    #[must_use]
    pub const fn phase(&self) -> GcPhase {
        self.phase
    }

    /// Whether a collection cycle is active.
    #[must_use]
    pub fn in_gc(&self) -> bool {
        self.phase != GcPhase::Idle
    }

    // ------------------------------------------------------------------
    // Cell access
    // ------------------------------------------------------------------

    pub(crate) fn cell_ref(&self, ptr: CellPtr) -> &HeapCell {
        if self.config.strict {
            assert_eq!(
                ptr.bank(),
                self.active,
                "stale cell pointer: the heap has relocated since it was obtained"
            );
        }
        self.spaces[ptr.bank()]
            .get(ptr.index())
            .and_then(Option::as_ref)
            .expect("dangling cell pointer")
    }

    fn cell_mut(&mut self, ptr: CellPtr) -> &mut HeapCell {
        if self.config.strict {
            assert_eq!(
                ptr.bank(),
                self.active,
                "stale cell pointer: the heap has relocated since it was obtained"
            );
        }
        self.spaces[ptr.bank()]
            .get_mut(ptr.index())
            .and_then(Option::as_mut)
            .expect("dangling cell pointer")
    }

    pub(crate) fn payload(&self, ptr: CellPtr) -> &CellPayload {
        &self.cell_ref(ptr).payload
    }

    pub(crate) fn payload_mut(&mut self, ptr: CellPtr) -> &mut CellPayload {
        &mut self.cell_mut(ptr).payload
    }

    /// The cell's kind tag.
    #[must_use]
    pub fn cell_kind(&self, ptr: CellPtr) -> CellKind {
        self.cell_ref(ptr).header.kind
    }

    /// The cell's current byte size.
    #[must_use]
    pub fn cell_size(&self, ptr: CellPtr) -> usize {
        self.cell_ref(ptr).header.size
    }

    /// Whether `ptr` names a live cell in the current bank.
    #[must_use]
    pub fn contains(&self, ptr: CellPtr) -> bool {
        ptr.bank() == self.active
            && self.spaces[self.active]
                .get(ptr.index())
                .is_some_and(Option::is_some)
    }

    /// Number of cells currently present (reachable or not).
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.spaces[self.active]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub(crate) const fn active_bank(&self) -> usize {
        self.active
    }

    pub(crate) fn live_cell_indices(&self) -> Vec<usize> {
        self.spaces[self.active]
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
            .collect()
    }

    pub(crate) fn with_cell_taken<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Self, &mut HeapCell) -> R,
    ) -> R {
        let mut cell = self.spaces[self.active][index]
            .take()
            .expect("taking an empty cell slot");
        let result = f(self, &mut cell);
        self.spaces[self.active][index] = Some(cell);
        result
    }

    // ------------------------------------------------------------------
    // Handle scopes
    // ------------------------------------------------------------------

    /// Enter a handle scope.
    pub fn enter_scope(&mut self) -> GcScope {
        self.handles.enter()
    }

    /// Exit a handle scope, invalidating every handle created inside it.
    /// Scopes must exit in reverse entry order; strict mode asserts it.
    pub fn exit_scope(&mut self, scope: GcScope) {
        let strict = self.config.strict;
        self.handles.exit(scope, strict);
    }

    /// Create a handle holding `value` in the innermost scope.
    pub fn make_handle(&mut self, value: Value) -> Handle {
        let strict = self.config.strict;
        self.handles.make(value, strict)
    }

    /// Read a handle's current value.
    #[must_use]
    pub fn read_handle(&self, handle: Handle) -> Value {
        self.handles.read(handle, self.config.strict)
    }

    /// Replace a handle's value.
    pub fn write_handle(&mut self, handle: Handle, value: Value) {
        let strict = self.config.strict;
        self.handles.write(handle, value, strict);
    }

    /// Read a handle known to hold a cell reference.
    #[must_use]
    pub fn handle_cell(&self, handle: Handle) -> CellPtr {
        self.read_handle(handle).expect_cell()
    }

    /// Number of live handles across all scopes.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.handles.live_handles()
    }

    pub(crate) fn handle_values(&mut self) -> &mut [Value] {
        self.handles.values_mut()
    }

    // ------------------------------------------------------------------
    // Weak references
    // ------------------------------------------------------------------

    /// Create a weak reference to `target`. The slot is recycled once no
    /// holder reports it during a collection's weak-root scan.
    pub fn new_weak_ref(&mut self, target: CellPtr) -> WeakRef {
        debug_assert!(self.contains(target), "weak target must be live");
        self.weak.create(target)
    }

    /// The weak referent, if it survived the most recent collection. Between
    /// collections this never speculates: absence of a strong reference is
    /// only observed once a cycle completes.
    #[must_use]
    pub fn weak_value(&self, weak: WeakRef) -> Option<CellPtr> {
        if self.config.strict {
            assert!(
                self.weak.state(weak) != WeakSlotState::Free,
                "read through a recycled weak reference"
            );
        }
        self.weak.value(weak)
    }

    /// Whether the weak referent is still present.
    #[must_use]
    pub fn weak_has_value(&self, weak: WeakRef) -> bool {
        self.weak.state(weak) != WeakSlotState::Free && self.weak.value(weak).is_some()
    }

    /// Total weak slots ever created (including recycled ones).
    #[must_use]
    pub fn weak_slot_count(&self) -> usize {
        self.weak.slot_count()
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// The stable ID of a cell, assigned on first query.
    pub fn object_id(&mut self, cell: CellPtr) -> NodeId {
        self.ids.object_id(cell)
    }

    /// The stable ID of a native allocation, assigned on first query.
    pub fn native_id(&mut self, addr: usize) -> NodeId {
        self.ids.native_id(addr)
    }

    /// The identity tracker.
    #[must_use]
    pub const fn id_tracker(&self) -> &IdTracker {
        &self.ids
    }

    /// The identity tracker, mutably.
    pub fn id_tracker_mut(&mut self) -> &mut IdTracker {
        &mut self.ids
    }

    // ------------------------------------------------------------------
    // External memory
    // ------------------------------------------------------------------

    /// Whether an external allocation of `bytes` could ever be credited
    /// without exceeding the maximum heap size.
    #[must_use]
    pub fn can_alloc_external_memory(&self, bytes: usize) -> bool {
        self.occupied + self.external + bytes <= self.config.max_heap_size
    }

    /// Credit `bytes` of heap-external memory to `cell`, so collection
    /// heuristics see the true memory pressure.
    pub fn credit_external_memory(&mut self, cell: CellPtr, bytes: usize) {
        self.cell_mut(cell).header.external_bytes += bytes;
        self.external += bytes;
    }

    /// Debit previously credited external memory.
    pub fn debit_external_memory(&mut self, cell: CellPtr, bytes: usize) {
        let header = &mut self.cell_mut(cell).header;
        assert!(
            bytes <= header.external_bytes,
            "debit exceeds credited external memory"
        );
        header.external_bytes -= bytes;
        self.external -= bytes;
    }

    /// Bytes of external memory currently credited across all cells.
    #[must_use]
    pub const fn external_bytes(&self) -> usize {
        self.external
    }

    // ------------------------------------------------------------------
    // Write barriers
    // ------------------------------------------------------------------

    /// Barrier for a single store of `value` into a slot of `target`.
    ///
    /// Every mutator store of a possibly-cell-bearing value into heap memory
    /// must pass through here. This stop-the-world collector needs no
    /// barrier work, so the body only enforces the phase contract; the call
    /// sites are what keep the design portable to collectors that do need
    /// one.
    #[inline]
    pub fn write_barrier(&self, _target: CellPtr, _value: Value) {
        self.barrier_contract();
    }

    /// Barrier for copying a run of values into `target`.
    #[inline]
    pub fn write_barrier_range(&self, _target: CellPtr, _values: &[Value]) {
        self.barrier_contract();
    }

    /// Barrier for filling `count` slots of `target` with one value.
    #[inline]
    pub fn write_barrier_range_fill(&self, _target: CellPtr, _count: u32, _value: Value) {
        self.barrier_contract();
    }

    #[inline]
    fn barrier_contract(&self) {
        if self.config.strict {
            assert!(
                self.phase == GcPhase::Idle,
                "mutator store during an active collection cycle"
            );
        }
    }

    // ------------------------------------------------------------------
    // Image restore mode
    // ------------------------------------------------------------------

    /// Toggle image-restore mode. While enabled, every allocation is placed
    /// as long-lived instead of following the default incremental build-up.
    pub fn set_restoring_image(&mut self, restoring: bool) {
        self.restoring_image = restoring;
    }

    /// Whether the heap is currently being rebuilt from a persisted image.
    #[must_use]
    pub const fn is_restoring_image(&self) -> bool {
        self.restoring_image
    }

    // ------------------------------------------------------------------
    // Tripwire
    // ------------------------------------------------------------------

    /// Install the tripwire callback. Fires at most once per cooldown window
    /// when live bytes after a collection reach the configured limit.
    pub fn set_tripwire_callback(&mut self, callback: Box<dyn FnMut(&TripwireContext)>) {
        self.tripwire.callback = Some(callback);
    }

    fn check_tripwire(&mut self, used_bytes: usize, now: Instant) {
        let Some(limit) = self.tripwire.limit else {
            return;
        };
        if used_bytes < limit {
            return;
        }
        if let Some(next) = self.tripwire.next_allowed {
            if now < next {
                return;
            }
        }
        // Taking the callback out also blocks re-entrant firing.
        if let Some(mut callback) = self.tripwire.callback.take() {
            let context = TripwireContext {
                heap_name: self.config.name.clone(),
                used_bytes,
                limit_bytes: limit,
                num_collections: self.full_stats.num_collections,
            };
            warn!(
                heap = %self.config.name,
                used_bytes,
                limit,
                "heap tripwire triggered"
            );
            callback(&context);
            self.tripwire.callback = Some(callback);
            self.tripwire.next_allowed = Some(now + self.tripwire.cooldown);
        }
    }

    // ------------------------------------------------------------------
    // Info and stats
    // ------------------------------------------------------------------

    /// A point-in-time description of the heap. No side effects.
    #[must_use]
    pub fn heap_info(&self) -> HeapInfo {
        HeapInfo {
            num_collections: self.full_stats.num_collections,
            total_allocated_bytes: self.total_allocated,
            allocated_bytes: self.occupied,
            external_bytes: self.external,
            heap_size: self.capacity,
            malloc_size_estimate: 0,
            full_stats: self.full_stats,
            young_gen_stats: self.young_gen_stats,
        }
    }

    /// Strict-mode-only heap facts; zeroes when strict mode is off.
    #[must_use]
    pub const fn debug_heap_info(&self) -> DebugHeapInfo {
        self.debug_info
    }

    /// Stats from the most recent collection, if any have run.
    #[must_use]
    pub const fn last_gc_stats(&self) -> Option<&GcStats> {
        self.last_stats.as_ref()
    }

    /// Cumulative strong-root scan time attributed to each section, in
    /// [`RootSection::ALL`] order.
    #[must_use]
    pub const fn root_section_times(&self) -> &[Duration; RootSection::COUNT] {
        &self.section_times
    }

    /// Dump cumulative statistics as JSON.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `out`.
    pub fn print_stats(&self, out: &mut dyn Write) -> io::Result<()> {
        fn accumulator_json(acc: &metrics::StatsAccumulator) -> serde_json::Value {
            serde_json::json!({
                "count": acc.count(),
                "sum": acc.sum(),
                "average": acc.average(),
                "min": acc.min(),
                "max": acc.max(),
            })
        }

        let mut sections = serde_json::Map::new();
        for (section, time) in RootSection::ALL.iter().zip(self.section_times.iter()) {
            sections.insert(
                section.name().to_owned(),
                serde_json::Value::from(time.as_secs_f64()),
            );
        }
        let stats = serde_json::json!({
            "heapName": self.config.name,
            "numCollections": self.full_stats.num_collections,
            "totalAllocatedBytes": self.total_allocated,
            "allocatedBytes": self.occupied,
            "externalBytes": self.external,
            "heapSize": self.capacity,
            "gcWallTime": accumulator_json(&self.full_stats.gc_wall_time),
            "gcCPUTime": accumulator_json(&self.full_stats.gc_cpu_time),
            "usedBefore": accumulator_json(&self.full_stats.used_before),
            "usedAfter": accumulator_json(&self.full_stats.used_after),
            "rootSectionTimes": sections,
        });
        serde_json::to_writer_pretty(&mut *out, &stats).map_err(io::Error::from)?;
        writeln!(out)
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    pub(crate) fn begin_no_alloc(&mut self) {
        self.no_alloc_depth += 1;
    }

    pub(crate) fn end_no_alloc(&mut self) {
        self.no_alloc_depth -= 1;
    }

    pub(crate) fn alloc_cell(
        &mut self,
        roots: &mut dyn RootProvider,
        payload: CellPayload,
        hint: AllocHint,
    ) -> CellPtr {
        assert!(
            self.phase == GcPhase::Idle,
            "allocation during an active collection cycle"
        );
        assert!(
            self.no_alloc_depth == 0,
            "allocation inside a no-allocation region"
        );

        let sanitize = match self.sanitizer.as_mut() {
            Some(rng) => {
                let roll: f64 = rng.random();
                roll < self.config.sanitize_rate
            }
            None => false,
        };
        if sanitize {
            self.collect(roots, GcCause::HandleSanitization);
        }

        let vt = vtable(payload.kind());
        let size = (vt.size)(&payload);
        if self.config.strict {
            assert_eq!(
                hint.has_finalizer,
                vt.finalize.is_some(),
                "finalizer hint must match the kind descriptor"
            );
        }

        // Collections below cannot strand references inside `payload`:
        // creation payloads never carry cell references (fields start Empty,
        // segments start unpublished).
        if self.occupied + self.external + size > self.capacity {
            self.collect(roots, GcCause::Capacity);
            while self.occupied + self.external + size > self.capacity {
                if self.capacity >= self.config.max_heap_size {
                    self.oom(
                        &format!(
                            "allocation of {size} bytes cannot fit: {} occupied + {} external, max heap {}",
                            self.occupied, self.external, self.config.max_heap_size
                        ),
                        &roots.call_stack_text(),
                    );
                }
                let grown = self
                    .capacity
                    .saturating_mul(2)
                    .min(self.config.max_heap_size);
                info!(
                    heap = %self.config.name,
                    old = self.capacity,
                    new = grown,
                    "growing heap capacity"
                );
                self.capacity = grown;
            }
        }

        let long_lived = hint.long_lived || self.restoring_image;
        let header = CellHeader {
            kind: vt.kind,
            size,
            external_bytes: 0,
            long_lived,
            has_finalizer: vt.finalize.is_some(),
        };
        let space = &mut self.spaces[self.active];
        let index = space.len();
        space.push(Some(HeapCell { header, payload }));
        self.occupied += size;
        self.total_allocated += size as u64;
        if self.config.strict {
            self.debug_info.num_allocated_cells += 1;
            self.debug_info.last_alloc_fixed_size = if long_lived {
                FixedSizeHint::Unknown
            } else {
                hint.fixed_size
            };
        }
        CellPtr::new(self.active, index)
    }

    /// Flush diagnostics and die. Out-of-memory is unrecoverable by design:
    /// the mutator has no generic way to undo partial execution.
    #[cold]
    fn oom(&self, reason: &str, call_stack: &str) -> ! {
        error!(heap = %self.config.name, reason, "out of memory");
        let mut err = io::stderr();
        let _ = writeln!(err, "{}: out of memory: {reason}", self.config.name);
        let _ = self.print_stats(&mut err);
        if !call_stack.is_empty() {
            let _ = writeln!(err, "call stack:\n{call_stack}");
        }
        std::process::abort();
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    pub(crate) fn collect(&mut self, roots: &mut dyn RootProvider, cause: GcCause) {
        assert!(self.phase == GcPhase::Idle, "collection cycle re-entered");
        self.next_gc_id += 1;
        let gc_id = self.next_gc_id;
        let span = debug_span!("gc_collect", heap = %self.config.name, gc_id, cause = cause.name());
        let _entered = span.enter();

        let strict = self.config.strict;
        let wall_start = Instant::now();
        let cpu_start = metrics::thread_cpu_time();
        let used_before = self.occupied + self.external;
        let from = self.active;
        let to = 1 - from;
        let cell_count = self.spaces[from].len();

        let mut marked = vec![false; cell_count];
        let mut worklist: Vec<u32> = Vec::new();
        let mut marked_symbols = vec![false; roots.symbols_table_upper_bound() as usize];
        let mut section_times = [Duration::ZERO; RootSection::COUNT];
        let mut phases = PhaseTimes::default();

        // Root scanning: the embedder's sections, then the heap's own handle
        // stack as the GcScopes section.
        self.phase = GcPhase::RootScanning;
        let phase_start = Instant::now();
        {
            let mut acceptor = MarkAcceptor {
                bank: from,
                strict,
                marked: &mut marked,
                worklist: &mut worklist,
                symbols: &mut marked_symbols,
                sections: &mut section_times,
                current_section: None,
            };
            roots.mark_roots(&mut acceptor, true);
            acceptor.begin_section(RootSection::GcScopes);
            for slot in self.handles.values_mut() {
                acceptor.accept_value(slot, FieldLabel::Hidden);
            }
            acceptor.close_section();
        }
        phases.root_scan = phase_start.elapsed();

        // Weak-root scanning: flag the slots that still have a live holder.
        self.phase = GcPhase::WeakRootScanning;
        let phase_start = Instant::now();
        {
            let mut acceptor = WeakMarker {
                table: &mut self.weak,
                strict,
            };
            roots.mark_weak_roots(&mut acceptor);
        }
        phases.weak_root_scan = phase_start.elapsed();

        // Marking: transitive closure over the per-kind field visitors.
        self.phase = GcPhase::Marking;
        let phase_start = Instant::now();
        let mut marked_cells = 0usize;
        {
            let space = &mut self.spaces[from];
            loop {
                let Some(index) = worklist.pop() else { break };
                marked_cells += 1;
                let mut cell = space[index as usize]
                    .take()
                    .expect("worklist entry names an empty slot");
                {
                    let mut acceptor = MarkAcceptor {
                        bank: from,
                        strict,
                        marked: &mut marked,
                        worklist: &mut worklist,
                        symbols: &mut marked_symbols,
                        sections: &mut section_times,
                        current_section: None,
                    };
                    (vtable(cell.header.kind).mark)(&mut cell.payload, &mut acceptor);
                }
                space[index as usize] = Some(cell);
            }
        }
        phases.mark = phase_start.elapsed();

        // Weak reconciliation: clear dead referents, recycle unreported
        // slots, reset the rest for the next cycle.
        self.phase = GcPhase::WeakReconciliation;
        let phase_start = Instant::now();
        self.weak.reconcile(|referent| {
            debug_assert_eq!(referent.bank(), from);
            marked[referent.index()]
        });
        phases.weak_reconcile = phase_start.elapsed();

        // Reclamation: finalize and drop everything unmarked.
        self.phase = GcPhase::Reclamation;
        let phase_start = Instant::now();
        let mut reclaimed_cells = 0usize;
        let mut reclaimed_bytes = 0usize;
        let mut finalized_cells = 0usize;
        let mut external_released = 0usize;
        {
            let space = &mut self.spaces[from];
            for index in 0..cell_count {
                if marked[index] {
                    continue;
                }
                let Some(mut cell) = space[index].take() else {
                    continue;
                };
                if let Some(finalize) = vtable(cell.header.kind).finalize {
                    let mut ctx = FinalizeCtx { ids: &mut self.ids };
                    finalize(&mut cell, &mut ctx);
                    finalized_cells += 1;
                }
                self.ids.untrack_object(CellPtr::new(from, index));
                reclaimed_cells += 1;
                reclaimed_bytes += cell.header.size;
                external_released += cell.header.external_bytes;
            }
        }
        self.occupied -= reclaimed_bytes;
        self.external -= external_released;
        roots.free_unmarked_symbols(&marked_symbols);
        phases.reclaim = phase_start.elapsed();

        // Compaction: evacuate survivors into the other bank (long-lived
        // first; shuffled when sanitizing), trim trimmable cells, rebind
        // identities in move order, then rewrite every recorded reference.
        self.phase = GcPhase::Compaction;
        let phase_start = Instant::now();
        let mut order: Vec<u32> = Vec::with_capacity(marked_cells);
        {
            let space = &self.spaces[from];
            for pass_long_lived in [true, false] {
                for (index, slot) in space.iter().enumerate() {
                    if !marked[index] {
                        continue;
                    }
                    let cell = slot.as_ref().expect("marked cell disappeared");
                    if cell.header.long_lived == pass_long_lived {
                        #[allow(clippy::cast_possible_truncation)]
                        order.push(index as u32);
                    }
                }
            }
        }
        if cause == GcCause::HandleSanitization {
            if let Some(rng) = self.sanitizer.as_mut() {
                order.shuffle(rng);
            }
        }

        let mut forwarding: Vec<Option<CellPtr>> = vec![None; cell_count];
        let mut trimmed_bytes = 0usize;
        {
            let (first, second) = self.spaces.split_at_mut(1);
            let (from_space, to_space) = if from == 0 {
                (&mut first[0], &mut second[0])
            } else {
                (&mut second[0], &mut first[0])
            };
            debug_assert!(to_space.is_empty(), "destination bank must start empty");
            to_space.reserve(order.len());
            for &old_index in &order {
                let mut cell = from_space[old_index as usize]
                    .take()
                    .expect("evacuating an empty slot");
                if let Some(trim) = vtable(cell.header.kind).trim {
                    let new_size = trim(&mut cell.payload);
                    if new_size < cell.header.size {
                        trimmed_bytes += cell.header.size - new_size;
                        cell.header.size = new_size;
                    }
                }
                let new_index = to_space.len();
                let old_ptr = CellPtr::new(from, old_index as usize);
                let new_ptr = CellPtr::new(to, new_index);
                to_space.push(Some(cell));
                forwarding[old_index as usize] = Some(new_ptr);
                self.ids.move_object(old_ptr, new_ptr);
            }
            from_space.clear();
        }
        self.occupied -= trimmed_bytes;
        self.active = to;

        {
            let mut acceptor = ForwardAcceptor {
                from_bank: from,
                strict,
                forwarding: &forwarding,
            };
            roots.mark_roots(&mut acceptor, true);
            for slot in self.handles.values_mut() {
                acceptor.accept_value(slot, FieldLabel::Hidden);
            }
            let to_space = &mut self.spaces[to];
            for index in 0..to_space.len() {
                let mut cell = to_space[index]
                    .take()
                    .expect("evacuated cell disappeared");
                (vtable(cell.header.kind).mark)(&mut cell.payload, &mut acceptor);
                to_space[index] = Some(cell);
            }
        }
        self.weak.forward(&forwarding, from);
        phases.compact = phase_start.elapsed();

        self.phase = GcPhase::Idle;
        let wall = wall_start.elapsed();
        let cpu = match (cpu_start, metrics::thread_cpu_time()) {
            (Some(start), Some(end)) => end.checked_sub(start).unwrap_or_default(),
            _ => wall,
        };
        let used_after = self.occupied + self.external;
        self.full_stats
            .record(wall, cpu, self.capacity, used_before, used_after);
        for (total, slice) in self.section_times.iter_mut().zip(section_times.iter()) {
            *total += *slice;
        }
        if strict {
            self.debug_info.num_reachable_cells = marked_cells;
            self.debug_info.num_collected_cells = reclaimed_cells;
            self.debug_info.num_finalized_cells = finalized_cells;
            self.debug_info.num_marked_symbols = marked_symbols.iter().filter(|m| **m).count();
            self.debug_info.num_allocated_cells = self.spaces[self.active].len();
        }
        let stats = GcStats {
            gc_id,
            cause,
            wall,
            cpu,
            used_before,
            used_after,
            final_heap_size: self.capacity,
            marked_cells,
            reclaimed_cells,
            reclaimed_bytes,
            finalized_cells,
            moved_cells: order.len(),
            phases,
            root_sections: section_times,
        };
        debug!(
            heap = %self.config.name,
            wall_us = wall.as_micros() as u64,
            used_before,
            used_after,
            reclaimed_cells,
            moved_cells = stats.moved_cells,
            "collection finished"
        );
        metrics::record_collection(&stats);
        self.last_stats = Some(stats);
        self.check_tripwire(used_after, Instant::now());
    }
}

// ============================================================================
// Acceptors
// ============================================================================

/// Marks reachable cells and symbols, attributing root-scan time to the
/// current section.
struct MarkAcceptor<'a> {
    bank: usize,
    strict: bool,
    marked: &'a mut [bool],
    worklist: &'a mut Vec<u32>,
    symbols: &'a mut [bool],
    sections: &'a mut [Duration; RootSection::COUNT],
    current_section: Option<(RootSection, Instant)>,
}

impl MarkAcceptor<'_> {
    fn close_section(&mut self) {
        if let Some((section, start)) = self.current_section.take() {
            self.sections[section as usize] += start.elapsed();
        }
    }

    fn mark_cell(&mut self, ptr: CellPtr) {
        if self.strict {
            assert_eq!(
                ptr.bank(),
                self.bank,
                "marked a stale cell pointer from a previous heap layout"
            );
        }
        let index = ptr.index();
        if !self.marked[index] {
            self.marked[index] = true;
            #[allow(clippy::cast_possible_truncation)]
            self.worklist.push(index as u32);
        }
    }
}

impl SlotAcceptor for MarkAcceptor<'_> {
    fn accept_value(&mut self, slot: &mut Value, _label: FieldLabel<'_>) {
        match *slot {
            Value::Cell(ptr) => self.mark_cell(ptr),
            Value::Symbol(symbol) => self.accept_symbol(symbol),
            _ => {}
        }
    }

    fn accept_symbol(&mut self, symbol: SymbolId) {
        if let Some(flag) = self.symbols.get_mut(symbol.0 as usize) {
            *flag = true;
        } else {
            assert!(
                !self.strict,
                "symbol {} above the reported table upper bound",
                symbol.0
            );
        }
    }
}

impl RootAcceptor for MarkAcceptor<'_> {
    fn begin_section(&mut self, section: RootSection) {
        self.close_section();
        self.current_section = Some((section, Instant::now()));
    }
}

/// Flags weak slots whose holders are still live.
struct WeakMarker<'a> {
    table: &'a mut WeakSlotTable,
    strict: bool,
}

impl WeakAcceptor for WeakMarker<'_> {
    fn accept_weak(&mut self, weak: WeakRef) {
        self.table.mark(weak, self.strict);
    }
}

/// Rewrites every surviving cell reference through the forwarding table.
struct ForwardAcceptor<'a> {
    from_bank: usize,
    strict: bool,
    forwarding: &'a [Option<CellPtr>],
}

impl SlotAcceptor for ForwardAcceptor<'_> {
    fn accept_value(&mut self, slot: &mut Value, _label: FieldLabel<'_>) {
        if let Value::Cell(ptr) = *slot {
            if self.strict {
                assert_eq!(ptr.bank(), self.from_bank, "rewriting an unmarked pointer");
            }
            let moved = self.forwarding[ptr.index()]
                .expect("live reference to a cell that was never evacuated");
            *slot = Value::Cell(moved);
        }
    }
}

impl RootAcceptor for ForwardAcceptor<'_> {}
