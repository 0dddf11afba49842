//! Embeddable in-process diagnostic watchdog.
//!
//! `dumpwatch` monitors a long-lived host application from the inside and
//! writes dump artifacts to disk when resource usage crosses configured
//! thresholds or when tasks appear stuck. Four independent watchers are
//! available, each running as its own cooperative Tokio task on a shared
//! sampling interval:
//!
//! - **heap-bytes**: live-heap bytes above an absolute threshold;
//! - **heap-percentage**: live-heap bytes above a fraction of total system
//!   memory (read once at startup);
//! - **task-count**: number of alive tasks above a threshold;
//! - **task-hanging**: tasks whose stack fingerprint has stayed
//!   bit-identical for longer than a dwell time.
//!
//! Heap triggers write `.hprof` files, task triggers write `.txt` stack
//! reports, both named `{prefix}{YYYY-MM-DDTHH:MM:SS}` inside the
//! configured dump directory. The report layout is kept byte-compatible
//! with the dumps existing operator tooling already parses.
//!
//! The host owns shutdown: it passes a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) and a
//! [`TaskTracker`](tokio_util::task::TaskTracker) into
//! [`DumpService::start`], cancels the token to stop all watchers, and
//! awaits the tracker to know every watcher has wound down. Runtime
//! failures inside watchers (a failed sample, an unwritable dump file) are
//! logged and swallowed; the watchdog never crashes the process it is
//! there to diagnose.

pub mod config;
pub mod sampler;
pub mod service;
pub mod sink;
pub mod tracker;

mod watcher;

#[cfg(test)]
mod testutil;

pub use config::{
    ConfigError, HeapWatchConfig, TaskWatchConfig, WatchConfig, DEFAULT_HEAP_PREFIX,
    DEFAULT_STACK_PREFIX,
};
pub use sampler::{
    Clock, CountingAlloc, CountingHeapSampler, HeapSampler, NullStackSampler, RssHeapSampler,
    SampleError, StackFingerprint, SysinfoMemoryProbe, SystemClock, SystemMemoryProbe,
    TaskCountSampler, TaskStackSampler, TokioTaskCountSampler, STACK_SLOTS,
};
pub use service::{DumpService, Samplers, StartError};
pub use sink::{ArtifactSink, FileSink, StackReport};
pub use tracker::{HangTracker, StackRecord};
