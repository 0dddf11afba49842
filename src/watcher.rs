/// The four periodic watcher loops.
///
/// Every watcher suspends at exactly two points: the tick timer and the
/// cancellation signal, raced with cancellation taking priority. Sampling
/// and sink calls run synchronously inside the tick; their failures are
/// logged and swallowed so the watchdog never takes the host down with it.
use crate::sampler::{Clock, HeapSampler, TaskCountSampler, TaskStackSampler};
use crate::sink::{ArtifactSink, StackReport};
use crate::tracker::HangTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pieces every watcher shares: the tick period, the wall clock, the
/// artifact sink, and the broadcast cancel signal.
#[derive(Clone)]
pub(crate) struct WatchContext {
    pub period: Duration,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn ArtifactSink>,
    pub cancel: CancellationToken,
}

/// Sleep one period or observe cancellation, whichever comes first.
/// Returns false once cancelled; cancellation wins ties so a watcher never
/// takes another sample after the signal is raised.
async fn tick_or_cancel(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

/// Heap watcher loop, spawned once per enabled heap trigger. The effective
/// threshold is precomputed by the supervisor (configured bytes, or total
/// memory times the configured fraction). No debounce: every
/// over-threshold tick produces one artifact.
pub(crate) async fn watch_heap(
    ctx: WatchContext,
    sampler: Arc<dyn HeapSampler>,
    threshold_bytes: u64,
    trigger: &'static str,
) {
    debug!(watcher = trigger, threshold_bytes, "watcher started");
    while tick_or_cancel(&ctx.cancel, ctx.period).await {
        let live_heap_bytes = match sampler.sample() {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(watcher = trigger, error = %error, "heap sample failed, skipping tick");
                continue;
            }
        };
        if live_heap_bytes > threshold_bytes {
            warn!(
                watcher = trigger,
                live_heap_bytes, threshold_bytes, "heap threshold exceeded, dumping heap"
            );
            ctx.sink.write_heap(ctx.clock.now(), live_heap_bytes);
        }
    }
    debug!(watcher = trigger, "watcher stopped");
}

/// Task-count watcher loop: one stack report (with an empty hanging set)
/// per tick the live-task count strictly exceeds the threshold.
pub(crate) async fn watch_task_count(
    ctx: WatchContext,
    counts: Arc<dyn TaskCountSampler>,
    stacks: Arc<dyn TaskStackSampler>,
    threshold: usize,
    dwell_ms: u64,
) {
    debug!(watcher = "task-count", threshold, "watcher started");
    while tick_or_cancel(&ctx.cancel, ctx.period).await {
        let task_count = match counts.sample() {
            Ok(count) => count,
            Err(error) => {
                debug!(error = %error, "task count sample failed, skipping tick");
                continue;
            }
        };
        if task_count > threshold {
            warn!(task_count, threshold, "task count exceeded, dumping stacks");
            let report = StackReport {
                task_count,
                tasks: stacks.render(),
                hanging: Vec::new(),
                dwell_ms,
            };
            ctx.sink.write_stacks(ctx.clock.now(), &report);
        }
    }
    debug!(watcher = "task-count", "watcher stopped");
}

/// Hanging-task watcher loop. Owns the tracker map outright; no other task
/// ever sees it. A failed stack sample skips the tick with tracker state
/// untouched; a non-empty hanging classification emits a stack report
/// carrying the stuck records.
pub(crate) async fn watch_hanging(
    ctx: WatchContext,
    stacks: Arc<dyn TaskStackSampler>,
    counts: Arc<dyn TaskCountSampler>,
    dwell_ms: u64,
) {
    debug!(watcher = "task-hanging", dwell_ms, "watcher started");
    let mut tracker = HangTracker::new(dwell_ms);
    while tick_or_cancel(&ctx.cancel, ctx.period).await {
        let live = match stacks.fingerprints() {
            Ok(live) => live,
            Err(error) => {
                debug!(error = %error, "stack sample failed, skipping tick");
                continue;
            }
        };
        let now = ctx.clock.now();
        let hanging = tracker.observe(&live, now);
        if !hanging.is_empty() {
            warn!(
                hanging = hanging.len(),
                tracked = tracker.len(),
                dwell_ms,
                "hanging tasks detected, dumping stacks"
            );
            let task_count = counts.sample().unwrap_or(live.len());
            let report = StackReport {
                task_count,
                tasks: stacks.render(),
                hanging,
                dwell_ms,
            };
            ctx.sink.write_stacks(now, &report);
        }
    }
    debug!(watcher = "task-hanging", "watcher stopped");
}
