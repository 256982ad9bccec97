use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// How often a kernel path has run for one operation and dtype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelUsage {
    pub operation: &'static str,
    pub dtype: &'static str,
    pub path: &'static str,
    pub count: u64,
}

/// Summary of the most recent kernel call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KernelEvent {
    pub operation: &'static str,
    pub dtype: &'static str,
    pub path: &'static str,
    pub elements: usize,
    pub outputs: usize,
    pub partitions: usize,
    pub duration_ms: f64,
}

impl KernelEvent {
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_secs_f64() * 1_000.0;
        self
    }
}

type UsageKey = (&'static str, &'static str, &'static str);

#[derive(Default)]
struct MetricsState {
    counts: HashMap<UsageKey, u64>,
    last_event: Option<KernelEvent>,
}

fn state() -> &'static Mutex<MetricsState> {
    static STATE: OnceLock<Mutex<MetricsState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(MetricsState::default()))
}

pub fn record(event: KernelEvent) {
    if event.operation.is_empty() || event.dtype.is_empty() || event.path.is_empty() {
        return;
    }
    if let Ok(mut guard) = state().lock() {
        let entry = guard
            .counts
            .entry((event.operation, event.dtype, event.path))
            .or_insert(0);
        *entry = entry.saturating_add(1);
        guard.last_event = Some(event);
    }
}

pub fn snapshot() -> Vec<KernelUsage> {
    let mut usage: Vec<KernelUsage> = state()
        .lock()
        .map(|guard| {
            guard
                .counts
                .iter()
                .map(|(&(operation, dtype, path), &count)| KernelUsage {
                    operation,
                    dtype,
                    path,
                    count,
                })
                .collect()
        })
        .unwrap_or_default();
    usage.sort_by_key(|entry| (entry.operation, entry.dtype, entry.path));
    usage
}

pub fn last_event() -> Option<KernelEvent> {
    state().lock().ok().and_then(|guard| guard.last_event.clone())
}
