/// Artifact sink: turns watcher trigger events into files on disk.
///
/// Filenames and the stack-report body are a backward-compatible contract
/// with existing operator tooling, down to the `GoRoutine Dump` header and
/// the `Mesure` spelling. Write failures are swallowed: the watchdog must
/// never crash the host it is diagnosing.
use crate::config::{WatchConfig, DEFAULT_HEAP_PREFIX, DEFAULT_STACK_PREFIX};
use crate::tracker::StackRecord;
use chrono::{DateTime, Local};
use std::backtrace::Backtrace;
use std::io::Write;

/// Everything a stack artifact needs besides the timestamp.
#[derive(Debug)]
pub struct StackReport {
    /// Number of live tasks at the trigger tick.
    pub task_count: usize,
    /// Human-readable multi-task stack listing.
    pub tasks: String,
    /// Records classified as hanging; empty for count-triggered reports.
    pub hanging: Vec<StackRecord>,
    /// Configured dwell threshold, echoed into the report header.
    pub dwell_ms: u64,
}

/// Destination for dump artifacts. Both calls are infallible at this
/// boundary; implementations handle their own failures.
pub trait ArtifactSink: Send + Sync {
    fn write_heap(&self, now: DateTime<Local>, live_heap_bytes: u64);
    fn write_stacks(&self, now: DateTime<Local>, report: &StackReport);
}

/// Default sink writing timestamped files into the configured directory.
pub struct FileSink {
    dump_dir: String,
    heap_prefix: String,
    stack_prefix: String,
}

impl FileSink {
    pub fn new(dump_dir: String, heap_prefix: String, stack_prefix: String) -> Self {
        FileSink {
            dump_dir,
            heap_prefix,
            stack_prefix,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        let heap_prefix = config
            .heap
            .as_ref()
            .map(|h| h.prefix().to_string())
            .unwrap_or_else(|| DEFAULT_HEAP_PREFIX.to_string());
        let stack_prefix = config
            .tasks
            .as_ref()
            .map(|t| t.prefix().to_string())
            .unwrap_or_else(|| DEFAULT_STACK_PREFIX.to_string());
        FileSink::new(config.dump_dir.clone(), heap_prefix, stack_prefix)
    }

    /// `{dump_dir}/{prefix}{YYYY-MM-DDTHH:MM:SS}{suffix}`, with any `//`
    /// collapsed. One-second granularity; a later artifact in the same
    /// second overwrites the earlier one.
    fn artifact_path(&self, prefix: &str, now: DateTime<Local>, suffix: &str) -> String {
        format!("{}/{}{}{}", self.dump_dir, prefix, stamp(now), suffix).replace("//", "/")
    }
}

impl ArtifactSink for FileSink {
    fn write_heap(&self, now: DateTime<Local>, live_heap_bytes: u64) {
        let path = self.artifact_path(&self.heap_prefix, now, ".hprof");
        if let Err(error) = write_heap_snapshot(&path, now, live_heap_bytes) {
            tracing::warn!(path = %path, error = %error, "failed to write heap dump");
        } else {
            tracing::info!(path = %path, live_heap_bytes, "heap dump written");
        }
    }

    fn write_stacks(&self, now: DateTime<Local>, report: &StackReport) {
        let path = self.artifact_path(&self.stack_prefix, now, ".txt");
        let body = render_stack_report(now, report);
        if let Err(error) = std::fs::write(&path, body) {
            tracing::warn!(path = %path, error = %error, "failed to write stack report");
        } else {
            tracing::info!(
                path = %path,
                task_count = report.task_count,
                hanging = report.hanging.len(),
                "stack report written"
            );
        }
    }
}

fn stamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// The heap payload format is deliberately unspecified; record enough to
/// correlate the trigger with allocator state.
fn write_heap_snapshot(
    path: &str,
    now: DateTime<Local>,
    live_heap_bytes: u64,
) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "Heap Dump")?;
    writeln!(file, "Time: {}", stamp(now))?;
    writeln!(file, "Live heap bytes: {}", live_heap_bytes)?;
    Ok(())
}

/// Build the order-significant report body. Header layout, separators, and
/// the hanging section (including `Mesure`) are parsed by existing tooling.
pub(crate) fn render_stack_report(now: DateTime<Local>, report: &StackReport) -> String {
    let mut body = String::new();
    body.push_str("GoRoutine Dump\n---\n");
    body.push_str(&format!("Time: {}\n", stamp(now)));
    body.push_str("---\n\n");
    body.push_str("Stack Trace:\n");
    body.push_str(&format!("{}\n", Backtrace::force_capture()));
    body.push_str("---\n\n");
    body.push_str(&format!("Number of Goroutines: {}\n", report.task_count));
    body.push_str("Goroutines:\n");
    body.push_str(&report.tasks);
    if !report.hanging.is_empty() {
        body.push_str("---\n\n");
        body.push_str("\nHanging Goroutines Detected:\n");
        body.push_str(&format!(
            "Number of Hanging Goroutines: {}\n",
            report.hanging.len()
        ));
        body.push_str(&format!(
            "Considered Hanging time (ms): {}\n",
            report.dwell_ms
        ));
        for record in &report.hanging {
            body.push_str(&format!(" * Last Change: {}", stamp(record.last_changed_at)));
            body.push_str(&format!(" * Last Mesure: {}", stamp(record.sampled_at)));
            body.push_str(&format!(" (Stack) -> [{}]\n", record.current.render_hex()));
        }
    }
    body
}
