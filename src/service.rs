/// Watchdog supervisor: builds the enabled watchers from a validated config
/// and hands them to the caller's cancellation token and task tracker.
use crate::config::{ConfigError, WatchConfig};
use crate::sampler::{
    Clock, CountingHeapSampler, HeapSampler, NullStackSampler, RssHeapSampler, SampleError,
    SystemClock, SystemMemoryProbe, SysinfoMemoryProbe, TaskCountSampler, TaskStackSampler,
    TokioTaskCountSampler,
};
use crate::sink::{ArtifactSink, FileSink};
use crate::watcher::{watch_hanging, watch_heap, watch_task_count, WatchContext};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// The measurement sources the watchers draw from. [`Samplers::runtime`]
/// wires up the in-crate defaults; hosts with better instrumentation (an
/// exact heap counter, a real per-task stack capture) substitute their own.
pub struct Samplers {
    pub heap: Arc<dyn HeapSampler>,
    pub task_count: Arc<dyn TaskCountSampler>,
    pub task_stacks: Arc<dyn TaskStackSampler>,
    pub system_memory: Arc<dyn SystemMemoryProbe>,
    pub clock: Arc<dyn Clock>,
}

impl Samplers {
    /// Default samplers backed by the process and the ambient Tokio
    /// runtime. Heap bytes come from process RSS; see
    /// [`crate::CountingHeapSampler`] for an exact alternative.
    pub fn runtime() -> Result<Self, SampleError> {
        Ok(Samplers {
            heap: Arc::new(RssHeapSampler::new()?),
            task_count: Arc::new(TokioTaskCountSampler),
            task_stacks: Arc::new(NullStackSampler),
            system_memory: Arc::new(SysinfoMemoryProbe),
            clock: Arc::new(SystemClock),
        })
    }

    /// Defaults with the allocator counter in place of the RSS sampler,
    /// used when the pid lookup fails. The counter reads 0 until the host
    /// registers [`crate::CountingAlloc`].
    fn counting_fallback() -> Self {
        Samplers {
            heap: Arc::new(CountingHeapSampler),
            task_count: Arc::new(TokioTaskCountSampler),
            task_stacks: Arc::new(NullStackSampler),
            system_memory: Arc::new(SysinfoMemoryProbe),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Errors from [`DumpService::start`].
#[derive(Debug)]
pub enum StartError {
    /// Percentage-based heap watching needs total system memory and the
    /// probe failed.
    MemoryProbe { source: SampleError },
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::MemoryProbe { source } => {
                write!(f, "failed to read total system memory: {}", source)
            }
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::MemoryProbe { source } => Some(source),
        }
    }
}

/// The embeddable watchdog service.
///
/// Construction validates the config; [`DumpService::start`] spawns one
/// cooperative task per enabled trigger on the caller's [`TaskTracker`]
/// and returns immediately. The caller shuts the watchers down by
/// cancelling the token and awaiting the tracker:
///
/// ```no_run
/// use dumpwatch::{DumpService, HeapWatchConfig, WatchConfig};
/// use tokio_util::sync::CancellationToken;
/// use tokio_util::task::TaskTracker;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = WatchConfig {
///         dump_dir: "/var/tmp/dumps".to_string(),
///         sampling_interval_ms: 5000,
///         watch_heap: true,
///         watch_tasks: false,
///         heap: Some(HeapWatchConfig {
///             threshold_bytes: 512 * 1024 * 1024,
///             ..Default::default()
///         }),
///         tasks: None,
///     };
///     let service = DumpService::new(config)?;
///
///     let cancel = CancellationToken::new();
///     let tasks = TaskTracker::new();
///     service.start(&cancel, &tasks)?;
///
///     // ... application work ...
///
///     cancel.cancel();
///     tasks.close();
///     tasks.wait().await;
///     Ok(())
/// }
/// ```
pub struct DumpService {
    config: Arc<WatchConfig>,
    samplers: Samplers,
    sink: Arc<dyn ArtifactSink>,
}

impl DumpService {
    /// Validate the config and build a service with the default file sink
    /// and runtime samplers.
    pub fn new(config: WatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sink = Arc::new(FileSink::from_config(&config));
        // If the pid lookup for the RSS sampler fails, fall back to the
        // allocator counter rather than failing construction.
        let samplers = match Samplers::runtime() {
            Ok(samplers) => samplers,
            Err(error) => {
                warn!(
                    error = %error,
                    "RSS heap sampler unavailable, falling back to the allocator \
                     counter; heap dumps stay disarmed unless CountingAlloc is \
                     registered as the global allocator"
                );
                Samplers::counting_fallback()
            }
        };
        Ok(DumpService {
            config: Arc::new(config),
            samplers,
            sink,
        })
    }

    /// Build a service from explicit parts. This is the seam for hosts
    /// supplying their own samplers (exact heap counters, real stack
    /// capture) or a non-filesystem sink.
    pub fn with_parts(
        config: WatchConfig,
        samplers: Samplers,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(DumpService {
            config: Arc::new(config),
            samplers,
            sink,
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Spawn one watcher task per enabled trigger.
    ///
    /// Reads total system memory once, and only if percentage-based heap
    /// watching is enabled; a probe failure aborts the start before any
    /// task spawns. Each watcher registers with the tracker at spawn, so a
    /// `tasks.close(); tasks.wait()` after cancellation observes every
    /// exit. Must be called from within a Tokio runtime; does not block.
    pub fn start(
        &self,
        cancel: &CancellationToken,
        tasks: &TaskTracker,
    ) -> Result<(), StartError> {
        let config = &self.config;
        let ctx = WatchContext {
            period: Duration::from_millis(config.sampling_interval_ms),
            clock: self.samplers.clock.clone(),
            sink: self.sink.clone(),
            cancel: cancel.clone(),
        };

        // Resolve the percentage threshold up front so a dead probe fails
        // loudly instead of silently disarming a watcher.
        let mut fraction_limit = None;
        if config.watch_heap {
            if let Some(heap) = &config.heap {
                if heap.threshold_fraction > 0.0 {
                    let total = self
                        .samplers
                        .system_memory
                        .total_bytes()
                        .map_err(|source| StartError::MemoryProbe { source })?;
                    fraction_limit = Some((total as f64 * heap.threshold_fraction) as u64);
                }
            }
        }

        if config.watch_heap {
            if let Some(heap) = &config.heap {
                if heap.threshold_bytes > 0 {
                    tasks.spawn(watch_heap(
                        ctx.clone(),
                        self.samplers.heap.clone(),
                        heap.threshold_bytes,
                        "heap-bytes",
                    ));
                }
                if let Some(limit) = fraction_limit {
                    tasks.spawn(watch_heap(
                        ctx.clone(),
                        self.samplers.heap.clone(),
                        limit,
                        "heap-percentage",
                    ));
                }
            }
        }

        if config.watch_tasks {
            if let Some(task_config) = &config.tasks {
                if task_config.count_threshold > 0 {
                    tasks.spawn(watch_task_count(
                        ctx.clone(),
                        self.samplers.task_count.clone(),
                        self.samplers.task_stacks.clone(),
                        task_config.count_threshold,
                        task_config.hanging_dwell_ms,
                    ));
                }
                if task_config.hanging_dwell_ms > 0 {
                    tasks.spawn(watch_hanging(
                        ctx,
                        self.samplers.task_stacks.clone(),
                        self.samplers.task_count.clone(),
                        task_config.hanging_dwell_ms,
                    ));
                }
            }
        }

        info!(
            watchers = tasks.len(),
            interval_ms = config.sampling_interval_ms,
            dump_dir = %config.dump_dir,
            "watchdog started"
        );
        Ok(())
    }
}
