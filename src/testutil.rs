//! In-memory samplers, sinks, and clocks for watcher and service tests.
use crate::sampler::{
    Clock, HeapSampler, SampleError, StackFingerprint, SystemMemoryProbe, TaskCountSampler,
    TaskStackSampler,
};
use crate::sink::{ArtifactSink, StackReport};
use chrono::{DateTime, Duration, Local, TimeZone};
use std::collections::VecDeque;
use std::sync::{Mutex, Once};

static TRACING_INIT: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`; later calls are no-ops.
pub(crate) fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Sink that records trigger events instead of touching the filesystem.
#[derive(Default)]
pub(crate) struct MemorySink {
    pub heap_events: Mutex<Vec<u64>>,
    pub stack_events: Mutex<Vec<StackEvent>>,
}

#[derive(Debug, Clone)]
pub(crate) struct StackEvent {
    pub task_count: usize,
    pub hanging: usize,
    pub dwell_ms: u64,
}

impl MemorySink {
    pub fn heap_count(&self) -> usize {
        self.heap_events.lock().unwrap().len()
    }

    pub fn stack_count(&self) -> usize {
        self.stack_events.lock().unwrap().len()
    }

    pub fn last_stack_event(&self) -> Option<StackEvent> {
        self.stack_events.lock().unwrap().last().cloned()
    }
}

impl ArtifactSink for MemorySink {
    fn write_heap(&self, _now: DateTime<Local>, live_heap_bytes: u64) {
        self.heap_events.lock().unwrap().push(live_heap_bytes);
    }

    fn write_stacks(&self, _now: DateTime<Local>, report: &StackReport) {
        self.stack_events.lock().unwrap().push(StackEvent {
            task_count: report.task_count,
            hanging: report.hanging.len(),
            dwell_ms: report.dwell_ms,
        });
    }
}

/// Clock that starts at a fixed instant and advances by a fixed step on
/// every `now()` call, one call per watcher tick.
pub(crate) struct TickClock {
    next: Mutex<DateTime<Local>>,
    step: Duration,
}

impl TickClock {
    pub fn new(step_ms: i64) -> Self {
        TickClock {
            next: Mutex::new(Local.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()),
            step: Duration::milliseconds(step_ms),
        }
    }
}

impl Clock for TickClock {
    fn now(&self) -> DateTime<Local> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + self.step;
        now
    }
}

pub(crate) struct ConstHeapSampler(pub u64);

impl HeapSampler for ConstHeapSampler {
    fn sample(&self) -> Result<u64, SampleError> {
        Ok(self.0)
    }
}

/// Heap sampler following a script; `None` entries fail the sample. Once
/// the script runs out, `fallback` repeats forever.
pub(crate) struct ScriptedHeapSampler {
    script: Mutex<VecDeque<Option<u64>>>,
    fallback: Option<u64>,
}

impl ScriptedHeapSampler {
    pub fn new(script: Vec<Option<u64>>, fallback: Option<u64>) -> Self {
        ScriptedHeapSampler {
            script: Mutex::new(script.into()),
            fallback,
        }
    }
}

impl HeapSampler for ScriptedHeapSampler {
    fn sample(&self) -> Result<u64, SampleError> {
        let value = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        value.ok_or(SampleError::Unsupported)
    }
}

pub(crate) struct ConstTaskCountSampler(pub usize);

impl TaskCountSampler for ConstTaskCountSampler {
    fn sample(&self) -> Result<usize, SampleError> {
        Ok(self.0)
    }
}

/// Stack sampler following a script of live fingerprint sets; `None`
/// entries fail the sample. Once the script runs out, the last successful
/// set repeats forever.
pub(crate) struct ScriptedStackSampler {
    script: Mutex<VecDeque<Option<Vec<StackFingerprint>>>>,
    last: Mutex<Vec<StackFingerprint>>,
}

impl ScriptedStackSampler {
    pub fn new(script: Vec<Option<Vec<StackFingerprint>>>) -> Self {
        ScriptedStackSampler {
            script: Mutex::new(script.into()),
            last: Mutex::new(Vec::new()),
        }
    }

    pub fn constant(live: Vec<StackFingerprint>) -> Self {
        Self::new(vec![Some(live)])
    }
}

impl TaskStackSampler for ScriptedStackSampler {
    fn fingerprints(&self) -> Result<Vec<StackFingerprint>, SampleError> {
        let mut last = self.last.lock().unwrap();
        match self.script.lock().unwrap().pop_front() {
            Some(Some(live)) => {
                *last = live;
                Ok(last.clone())
            }
            Some(None) => Err(SampleError::Unsupported),
            None => Ok(last.clone()),
        }
    }

    fn render(&self) -> String {
        "scripted task listing\n".to_string()
    }
}

pub(crate) struct ConstMemoryProbe(pub u64);

impl SystemMemoryProbe for ConstMemoryProbe {
    fn total_bytes(&self) -> Result<u64, SampleError> {
        Ok(self.0)
    }
}

pub(crate) struct FailingMemoryProbe;

impl SystemMemoryProbe for FailingMemoryProbe {
    fn total_bytes(&self) -> Result<u64, SampleError> {
        Err(SampleError::Probe {
            detail: "sysinfo unavailable".to_string(),
        })
    }
}
