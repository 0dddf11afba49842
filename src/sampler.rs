/// Sampler contracts and their default runtime-backed implementations.
///
/// Each sampler answers one instantaneous question about the host process:
/// what time is it, how many bytes are live on the heap, how many tasks are
/// alive, what do their stacks look like, how much physical memory does the
/// machine have. The watchers only depend on the traits, so hosts (and
/// tests) can substitute their own measurements.
use chrono::{DateTime, Local};
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use sysinfo::{MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind};

/// Number of return-address slots in a stack fingerprint.
pub const STACK_SLOTS: usize = 32;

/// A fixed-width vector of return-address words identifying a task's stack.
///
/// Shallower stacks are zero-padded. Equality is bitwise over the full
/// width, and the fingerprint doubles as the task's identity in the hanging
/// tracker: two tasks executing identical call chains collapse into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackFingerprint(pub [u64; STACK_SLOTS]);

impl StackFingerprint {
    /// The all-zero fingerprint, used as the `previous` value of a task on
    /// first observation.
    pub const ZERO: StackFingerprint = StackFingerprint([0; STACK_SLOTS]);

    /// Build a fingerprint from raw frame words, zero-padding or truncating
    /// to [`STACK_SLOTS`].
    pub fn from_frames(frames: &[u64]) -> Self {
        let mut slots = [0u64; STACK_SLOTS];
        for (slot, frame) in slots.iter_mut().zip(frames) {
            *slot = *frame;
        }
        StackFingerprint(slots)
    }

    /// Render all slots as comma-joined lowercase hex words, e.g.
    /// `0x4011a0,0x402f33,0x0,...`. This is the on-disk report format.
    pub fn render_hex(&self) -> String {
        let words: Vec<String> = self.0.iter().map(|w| format!("0x{:x}", w)).collect();
        words.join(",")
    }
}

/// Errors from a sampler. Always recovered: the watcher logs the failure,
/// skips the tick, and stays on schedule.
#[derive(Debug)]
pub enum SampleError {
    /// No Tokio runtime is reachable from the sampling thread.
    NoRuntime,
    /// The process table no longer lists our own pid.
    ProcessGone,
    /// The host did not wire up a sampler for this measurement.
    Unsupported,
    /// The platform probe failed outright.
    Probe { detail: String },
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::NoRuntime => write!(f, "no tokio runtime in reach of the sampler"),
            SampleError::ProcessGone => write!(f, "own process missing from the process table"),
            SampleError::Unsupported => write!(f, "no sampler configured for this measurement"),
            SampleError::Probe { detail } => write!(f, "platform probe failed: {}", detail),
        }
    }
}

impl std::error::Error for SampleError {}

/// Wall-clock source. Injected so tracker timing is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The real local clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Current live-heap bytes.
pub trait HeapSampler: Send + Sync {
    fn sample(&self) -> Result<u64, SampleError>;
}

/// Number of currently alive tasks.
pub trait TaskCountSampler: Send + Sync {
    fn sample(&self) -> Result<usize, SampleError>;
}

/// Per-task call-stack access: fingerprints for the hanging tracker plus a
/// human-readable multi-task listing for the report body.
///
/// Stable Rust has no portable in-process per-task stack capture, so the
/// crate cannot provide a universally working implementation; hosts that
/// have one (task-dump builds, frame-pointer samplers) implement this trait
/// and pass it through [`crate::Samplers`].
pub trait TaskStackSampler: Send + Sync {
    /// Fingerprints of every live task. An error skips the tick without
    /// touching tracker state.
    fn fingerprints(&self) -> Result<Vec<StackFingerprint>, SampleError>;

    /// Human-readable listing of every live task's stack, verbatim in the
    /// report body.
    fn render(&self) -> String;
}

/// Total physical memory of the machine, read once at startup when
/// percentage-based heap thresholds are in use.
pub trait SystemMemoryProbe: Send + Sync {
    fn total_bytes(&self) -> Result<u64, SampleError>;
}

// --- Default implementations ---

/// Resident-set-size heap sampler backed by `sysinfo`.
///
/// RSS over-approximates live heap (it includes code, stacks, and allocator
/// slack) but needs no cooperation from the host. For exact live-heap bytes
/// register [`CountingAlloc`] and use [`CountingHeapSampler`].
pub struct RssHeapSampler {
    pid: Pid,
    system: Mutex<sysinfo::System>,
}

impl RssHeapSampler {
    pub fn new() -> Result<Self, SampleError> {
        let pid = sysinfo::get_current_pid().map_err(|detail| SampleError::Probe {
            detail: detail.to_string(),
        })?;
        Ok(RssHeapSampler {
            pid,
            system: Mutex::new(sysinfo::System::new()),
        })
    }
}

impl HeapSampler for RssHeapSampler {
    fn sample(&self) -> Result<u64, SampleError> {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system
            .process(self.pid)
            .map(|process| process.memory())
            .ok_or(SampleError::ProcessGone)
    }
}

static COUNTED_LIVE_BYTES: AtomicU64 = AtomicU64::new(0);

/// Counting wrapper around the system allocator.
///
/// Hosts that want exact live-heap numbers opt in with:
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: dumpwatch::CountingAlloc = dumpwatch::CountingAlloc;
/// ```
pub struct CountingAlloc;

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            COUNTED_LIVE_BYTES.fetch_add(layout.size() as u64, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        COUNTED_LIVE_BYTES.fetch_sub(layout.size() as u64, Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            if new_size >= layout.size() {
                COUNTED_LIVE_BYTES.fetch_add((new_size - layout.size()) as u64, Ordering::Relaxed);
            } else {
                COUNTED_LIVE_BYTES.fetch_sub((layout.size() - new_size) as u64, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

/// Heap sampler reading the [`CountingAlloc`] counter. Returns 0 until the
/// host registers the allocator.
pub struct CountingHeapSampler;

impl HeapSampler for CountingHeapSampler {
    fn sample(&self) -> Result<u64, SampleError> {
        Ok(COUNTED_LIVE_BYTES.load(Ordering::Relaxed))
    }
}

/// Task count from the ambient Tokio runtime's metrics.
pub struct TokioTaskCountSampler;

impl TaskCountSampler for TokioTaskCountSampler {
    fn sample(&self) -> Result<usize, SampleError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SampleError::NoRuntime)?;
        Ok(handle.metrics().num_alive_tasks())
    }
}

/// Placeholder stack sampler: every call reports
/// [`SampleError::Unsupported`], so a hanging watcher wired to it skips
/// every tick.
pub struct NullStackSampler;

impl TaskStackSampler for NullStackSampler {
    fn fingerprints(&self) -> Result<Vec<StackFingerprint>, SampleError> {
        Err(SampleError::Unsupported)
    }

    fn render(&self) -> String {
        "<task stack listing unavailable>\n".to_string()
    }
}

/// Total physical memory via `sysinfo`.
pub struct SysinfoMemoryProbe;

impl SystemMemoryProbe for SysinfoMemoryProbe {
    fn total_bytes(&self) -> Result<u64, SampleError> {
        let system = sysinfo::System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        let total = system.total_memory();
        if total == 0 {
            return Err(SampleError::Probe {
                detail: "total memory reported as 0".to_string(),
            });
        }
        Ok(total)
    }
}
