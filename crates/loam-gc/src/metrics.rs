//! Collection statistics and instrumentation.
//!
//! Two layers: per-heap cumulative stats (owned by the heap, reported via
//! [`HeapInfo`](crate::HeapInfo) and the stats dump) and process-wide
//! aggregates (`global_metrics()` atomic counters plus a `gc_history()` ring
//! buffer of recent collections). Everything here is instrumentation-only
//! and never affects collection behavior.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::RootSection;

// ============================================================================
// Summary statistics
// ============================================================================

/// Running summary of a stream of samples: count, sum, min, max, and sum of
/// squares (for standard deviation).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAccumulator {
    count: u64,
    sum: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
}

impl StatsAccumulator {
    /// An empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Record one sample.
    pub fn record(&mut self, sample: f64) {
        self.count += 1;
        self.sum += sample;
        self.sum_of_squares += sample * sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }

    /// Number of samples recorded.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Sum of all samples.
    #[must_use]
    pub const fn sum(&self) -> f64 {
        self.sum
    }

    /// Arithmetic mean, or zero with no samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Smallest sample, or zero with no samples.
    #[must_use]
    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    /// Largest sample, or zero with no samples.
    #[must_use]
    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Population standard deviation, or zero with no samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.average();
        let variance = self.sum_of_squares / self.count as f64 - mean * mean;
        variance.max(0.0).sqrt()
    }
}

// ============================================================================
// Per-heap cumulative stats
// ============================================================================

/// Cumulative stats for one category of collections. Time unit is seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct CumulativeHeapStats {
    /// Number of collections in this category.
    pub num_collections: u32,
    /// Summary statistics for collection wall times.
    pub gc_wall_time: StatsAccumulator,
    /// Summary statistics for collection CPU times.
    pub gc_cpu_time: StatsAccumulator,
    /// Heap capacity after the most recent collection.
    pub final_heap_size: usize,
    /// Bytes occupied just before each collection.
    pub used_before: StatsAccumulator,
    /// Bytes alive after each collection.
    pub used_after: StatsAccumulator,
}

impl CumulativeHeapStats {
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn record(
        &mut self,
        wall: Duration,
        cpu: Duration,
        final_heap_size: usize,
        used_before: usize,
        used_after: usize,
    ) {
        self.num_collections += 1;
        self.gc_wall_time.record(wall.as_secs_f64());
        self.gc_cpu_time.record(cpu.as_secs_f64());
        self.final_heap_size = final_heap_size;
        self.used_before.record(used_before as f64);
        self.used_after.record(used_after as f64);
    }
}

/// A point-in-time description of the heap, returned by
/// [`GcHeap::heap_info`](crate::GcHeap::heap_info).
#[derive(Debug, Clone, Default)]
pub struct HeapInfo {
    /// Collections of any kind since heap creation.
    pub num_collections: u32,
    /// Cumulative bytes ever allocated in the heap.
    pub total_allocated_bytes: u64,
    /// Currently allocated bytes. Some may be in unreachable cells unless a
    /// collection just finished.
    pub allocated_bytes: usize,
    /// Bytes of heap-external memory credited to live cells.
    pub external_bytes: usize,
    /// Current heap capacity in bytes.
    pub heap_size: usize,
    /// Estimate of malloc'd memory owned by the embedder's roots; filled in
    /// by [`Mutator::heap_info_with_external`](crate::Mutator::heap_info_with_external).
    pub malloc_size_estimate: usize,
    /// Stats for full collections.
    pub full_stats: CumulativeHeapStats,
    /// Stats for young-generation collections. Always zero in this
    /// non-generational collector; present so consumers see one shape across
    /// collector designs.
    pub young_gen_stats: CumulativeHeapStats,
}

/// Heap facts only tracked when strict mode is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugHeapInfo {
    /// Cells currently present in the heap, reachable or not.
    pub num_allocated_cells: usize,
    /// Cells that survived the last collection.
    pub num_reachable_cells: usize,
    /// Cells reclaimed by the last collection.
    pub num_collected_cells: usize,
    /// Finalizers run by the last collection.
    pub num_finalized_cells: usize,
    /// Symbols marked live by the last collection.
    pub num_marked_symbols: usize,
    /// The fixed-size hint of the most recent allocation.
    pub last_alloc_fixed_size: FixedSizeHint,
}

/// Whether an allocation declared itself fixed-size. Long-lived allocations
/// don't declare either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixedSizeHint {
    /// The payload never changes size.
    Yes,
    /// The payload may be resized in place (e.g. trimmed).
    No,
    /// Not declared.
    #[default]
    Unknown,
}

// ============================================================================
// Per-cycle stats
// ============================================================================

/// What prompted a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcCause {
    /// The embedder forced a collection.
    Forced,
    /// An allocation did not fit in the current capacity.
    Capacity,
    /// The handle sanitizer relocated the heap before an allocation.
    HandleSanitization,
}

impl GcCause {
    /// Short name for logs and dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Forced => "forced",
            Self::Capacity => "capacity",
            Self::HandleSanitization => "handle-sanitization",
        }
    }
}

/// Wall-clock duration of each collection phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimes {
    /// Strong-root scanning.
    pub root_scan: Duration,
    /// Weak-root scanning.
    pub weak_root_scan: Duration,
    /// Transitive marking.
    pub mark: Duration,
    /// Weak-slot reconciliation.
    pub weak_reconcile: Duration,
    /// Finalization and reclamation of dead cells.
    pub reclaim: Duration,
    /// Evacuation, trimming, and reference rewriting.
    pub compact: Duration,
}

/// Statistics from a single collection.
#[derive(Debug, Clone)]
pub struct GcStats {
    /// Monotonically increasing collection number for this heap.
    pub gc_id: u64,
    /// What prompted the collection.
    pub cause: GcCause,
    /// Total stop-the-world wall time.
    pub wall: Duration,
    /// CPU time consumed by the collecting thread, when the platform reports
    /// it; falls back to wall time otherwise.
    pub cpu: Duration,
    /// Bytes occupied (heap + external) when the cycle began.
    pub used_before: usize,
    /// Bytes occupied when the cycle finished.
    pub used_after: usize,
    /// Heap capacity when the cycle finished.
    pub final_heap_size: usize,
    /// Cells marked reachable.
    pub marked_cells: usize,
    /// Cells reclaimed.
    pub reclaimed_cells: usize,
    /// Bytes reclaimed (heap bytes only).
    pub reclaimed_bytes: usize,
    /// Finalizers run.
    pub finalized_cells: usize,
    /// Cells relocated by evacuation.
    pub moved_cells: usize,
    /// Per-phase wall times.
    pub phases: PhaseTimes,
    /// Strong-root scan time attributed to each root section, in
    /// [`RootSection::ALL`] order.
    pub root_sections: [Duration; RootSection::COUNT],
}

// ============================================================================
// Process-wide aggregates
// ============================================================================

/// Process-level cumulative counters across every heap.
#[derive(Debug)]
pub struct GlobalMetrics {
    collections: AtomicUsize,
    pause_ns: AtomicU64,
    bytes_reclaimed: AtomicUsize,
    cells_reclaimed: AtomicUsize,
    cells_moved: AtomicUsize,
}

impl GlobalMetrics {
    const fn new() -> Self {
        Self {
            collections: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
            bytes_reclaimed: AtomicUsize::new(0),
            cells_reclaimed: AtomicUsize::new(0),
            cells_moved: AtomicUsize::new(0),
        }
    }

    /// Total collections across all heaps.
    #[inline]
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Total pause time in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.pause_ns.load(Ordering::Relaxed)
    }

    /// Total heap bytes reclaimed.
    #[inline]
    #[must_use]
    pub fn total_bytes_reclaimed(&self) -> usize {
        self.bytes_reclaimed.load(Ordering::Relaxed)
    }

    /// Total cells reclaimed.
    #[inline]
    #[must_use]
    pub fn total_cells_reclaimed(&self) -> usize {
        self.cells_reclaimed.load(Ordering::Relaxed)
    }

    /// Total cells relocated.
    #[inline]
    #[must_use]
    pub fn total_cells_moved(&self) -> usize {
        self.cells_moved.load(Ordering::Relaxed)
    }
}

static GLOBAL_METRICS: GlobalMetrics = GlobalMetrics::new();

/// The process-wide cumulative GC metrics.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

/// Ring buffer size for recent-collection history.
const HISTORY_SIZE: usize = 64;

#[derive(Debug)]
struct HistoryInner {
    ring: VecDeque<GcStats>,
    total_recorded: u64,
}

/// Ring buffer of the most recent collections across all heaps.
#[derive(Debug)]
pub struct GcHistory {
    inner: Mutex<HistoryInner>,
}

impl GcHistory {
    const fn new() -> Self {
        Self {
            inner: Mutex::new(HistoryInner {
                ring: VecDeque::new(),
                total_recorded: 0,
            }),
        }
    }

    fn push(&self, stats: GcStats) {
        let mut inner = self.inner.lock();
        if inner.ring.len() == HISTORY_SIZE {
            inner.ring.pop_front();
        }
        inner.ring.push_back(stats);
        inner.total_recorded += 1;
    }

    /// Total collections ever recorded, which may exceed the buffer size.
    #[must_use]
    pub fn total_recorded(&self) -> u64 {
        self.inner.lock().total_recorded
    }

    /// Up to `n` most recent collections, newest last.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<GcStats> {
        let inner = self.inner.lock();
        let start = inner.ring.len().saturating_sub(n);
        inner.ring.iter().skip(start).cloned().collect()
    }

    /// Average pause over the most recent `n` collections.
    #[must_use]
    pub fn average_pause_time(&self, n: usize) -> Duration {
        let recent = self.recent(n);
        if recent.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = recent.iter().map(|s| s.wall).sum();
        total / u32::try_from(recent.len()).unwrap_or(u32::MAX)
    }

    /// Longest pause over the most recent `n` collections.
    #[must_use]
    pub fn max_pause_time(&self, n: usize) -> Duration {
        self.recent(n)
            .iter()
            .map(|s| s.wall)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

static GC_HISTORY: GcHistory = GcHistory::new();

/// The process-wide ring buffer of recent collections.
#[must_use]
pub fn gc_history() -> &'static GcHistory {
    &GC_HISTORY
}

/// Record one collection into the process-wide aggregates.
pub(crate) fn record_collection(stats: &GcStats) {
    let g = global_metrics();
    g.collections.fetch_add(1, Ordering::Relaxed);
    g.pause_ns.fetch_add(
        u64::try_from(stats.wall.as_nanos()).unwrap_or(u64::MAX),
        Ordering::Relaxed,
    );
    g.bytes_reclaimed
        .fetch_add(stats.reclaimed_bytes, Ordering::Relaxed);
    g.cells_reclaimed
        .fetch_add(stats.reclaimed_cells, Ordering::Relaxed);
    g.cells_moved.fetch_add(stats.moved_cells, Ordering::Relaxed);
    GC_HISTORY.push(stats.clone());
}

// ============================================================================
// Clocks
// ============================================================================

/// CPU time consumed by the calling thread, when the platform reports it.
#[cfg(unix)]
#[must_use]
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn thread_cpu_time() -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer for clock_gettime.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

/// CPU time consumed by the calling thread, when the platform reports it.
#[cfg(not(unix))]
#[must_use]
pub fn thread_cpu_time() -> Option<Duration> {
    None
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// Formats a duration in seconds with an appropriate unit, down to
/// microseconds.
#[derive(Debug, Clone, Copy)]
pub struct FormatSecs(pub f64);

impl fmt::Display for FormatSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0;
        if secs >= 1.0 {
            write!(f, "{secs:.3}s")
        } else if secs >= 1e-3 {
            write!(f, "{:.3}ms", secs * 1e3)
        } else {
            write!(f, "{:.3}us", secs * 1e6)
        }
    }
}

/// Formats a byte count with an appropriate unit, bytes to GiB.
#[derive(Debug, Clone, Copy)]
pub struct FormatSize(pub usize);

impl fmt::Display for FormatSize {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        const KIB: usize = 1 << 10;
        const MIB: usize = 1 << 20;
        const GIB: usize = 1 << 30;
        if bytes >= GIB {
            write!(f, "{:.2}GiB", bytes as f64 / GIB as f64)
        } else if bytes >= MIB {
            write!(f, "{:.2}MiB", bytes as f64 / MIB as f64)
        } else if bytes >= KIB {
            write!(f, "{:.2}KiB", bytes as f64 / KIB as f64)
        } else {
            write!(f, "{bytes}B")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_summary() {
        let mut acc = StatsAccumulator::new();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.average(), 0.0);
        assert_eq!(acc.min(), 0.0);
        assert_eq!(acc.max(), 0.0);

        acc.record(2.0);
        acc.record(4.0);
        acc.record(6.0);
        assert_eq!(acc.count(), 3);
        assert_eq!(acc.sum(), 12.0);
        assert_eq!(acc.average(), 4.0);
        assert_eq!(acc.min(), 2.0);
        assert_eq!(acc.max(), 6.0);
        assert!(acc.stddev() > 1.6 && acc.stddev() < 1.7);
    }

    #[test]
    fn cumulative_stats_record() {
        let mut stats = CumulativeHeapStats::default();
        stats.record(
            Duration::from_millis(2),
            Duration::from_millis(1),
            4096,
            1000,
            400,
        );
        assert_eq!(stats.num_collections, 1);
        assert_eq!(stats.final_heap_size, 4096);
        assert_eq!(stats.used_before.max(), 1000.0);
        assert_eq!(stats.used_after.max(), 400.0);
    }

    #[test]
    fn format_helpers() {
        assert_eq!(FormatSecs(2.5).to_string(), "2.500s");
        assert_eq!(FormatSecs(0.002).to_string(), "2.000ms");
        assert_eq!(FormatSecs(0.000_004).to_string(), "4.000us");
        assert_eq!(FormatSize(512).to_string(), "512B");
        assert_eq!(FormatSize(2048).to_string(), "2.00KiB");
        assert_eq!(FormatSize(3 << 20).to_string(), "3.00MiB");
    }

    #[test]
    fn thread_cpu_time_is_monotonic_when_available() {
        if let Some(first) = thread_cpu_time() {
            let mut spin = 0u64;
            for i in 0..100_000u64 {
                spin = spin.wrapping_add(i);
            }
            std::hint::black_box(spin);
            let second = thread_cpu_time().unwrap();
            assert!(second >= first);
        }
    }
}
